//! Signing and encryption processor for AS4 messages.
//!
//! Implements the WS-Security profile the gateway speaks: XML-DSig style
//! signatures over the Messaging header, the Body and attachment content,
//! plus SwA attachment encryption with RSA-OAEP key transport. The codec
//! carries the resulting Security header verbatim; this crate is the only
//! place that interprets it.

pub mod algorithms;
pub mod certificates;
pub mod encrypt;
pub mod error;
pub mod header;
pub mod reference;
pub mod sign;
pub mod verify;

#[cfg(test)]
pub(crate) mod test_support;

pub use algorithms::SymmetricCipher;
pub use certificates::{
    Certificate, CertificateRepository, InMemoryCertificateRepository, TokenReferenceStyle,
};
pub use encrypt::{decrypt_message, encrypt_message, has_encryption, EncryptionConfig};
pub use error::CryptoError;
pub use sign::{has_signature, sign_message, SigningConfig};
pub use verify::verify_message;
