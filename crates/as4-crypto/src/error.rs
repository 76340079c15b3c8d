use thiserror::Error;

use as4_codec::CodecError;
use as4_core::xml::XmlError;

/// Errors returned by the signing/encryption processor.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Recomputed digest or signature value does not match the header.
    #[error("signature verification failed")]
    InvalidSignature,
    /// Referenced certificate is unknown or outside the trust anchors.
    #[error("certificate not trusted: {0}")]
    CertificateNotTrusted(String),
    /// A ds:Reference or cipher reference does not resolve to exactly one target.
    #[error("malformed reference: {0}")]
    MalformedReference(String),
    /// Any failure while unwrapping the key or decrypting data.
    ///
    /// Deliberately carries no detail: distinguishing padding errors from
    /// key errors hands an oracle to the peer.
    #[error("decryption failed")]
    DecryptionFailed,
    /// Symmetric or key-wrap operation failed on the sending side.
    #[error("encryption failed")]
    EncryptionFailed,
    /// Signature computation failed on the sending side.
    #[error("signing failed")]
    SigningFailed,
    /// Algorithm URI names no implementation in this build.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    /// Operation needs the private half of a key pair that only has the
    /// public half.
    #[error("certificate {0} carries no private key")]
    MissingPrivateKey(String),
    /// Envelope assembly failed underneath a security operation.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl From<XmlError> for CryptoError {
    fn from(err: XmlError) -> Self {
        CryptoError::MalformedReference(err.to_string())
    }
}
