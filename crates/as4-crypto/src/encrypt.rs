//! Attachment encryption and decryption (SwA profile).
//!
//! Ciphertext stays in the MIME part; the Security header carries the
//! wrapped key and one EncryptedData entry per attachment with a
//! CipherReference back to the part.

use rand::{CryptoRng, RngCore};
use rsa::Oaep;
use sha2::Sha256;
use tracing::debug;

use as4_codec::soap::build_envelope;
use as4_core::attachment::OCTET_STREAM;
use as4_core::message::AS4Message;
use as4_core::security::{
    EncryptedDataInfo, EncryptedDataType, EncryptedKeyInfo, EncryptionState,
    SecurityTokenReference,
};

use crate::algorithms::{SymmetricCipher, RSA_OAEP};
use crate::certificates::{Certificate, CertificateRepository, TokenReferenceStyle};
use crate::error::CryptoError;
use crate::header::{build_security, find_signature};

/// Encryption policy for outgoing messages.
#[derive(Debug, Clone)]
pub struct EncryptionConfig {
    pub algorithm: SymmetricCipher,
    pub data_type: EncryptedDataType,
    pub token_reference: TokenReferenceStyle,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            algorithm: SymmetricCipher::Aes128Gcm,
            data_type: EncryptedDataType::ContentOnly,
            token_reference: TokenReferenceStyle::KeyIdentifier,
        }
    }
}

/// Encrypts every attachment with a fresh symmetric key wrapped for the
/// receiver's certificate. Runs after signing: the signed digests cover the
/// plaintext the receiver checks once it has decrypted.
///
/// A message without attachments is left untouched.
pub fn encrypt_message(
    message: &mut AS4Message,
    certificate: &Certificate,
    config: &EncryptionConfig,
    rng: &mut (impl RngCore + CryptoRng),
) -> Result<(), CryptoError> {
    if message.attachments.is_empty() {
        return Ok(());
    }

    let cipher = config.algorithm;
    let key = cipher.generate_key(rng);

    let mut data = Vec::new();
    for (index, attachment) in message.attachments.iter_mut().enumerate() {
        let original_type = attachment.content_type().to_string();
        let plaintext = match config.data_type {
            EncryptedDataType::ContentOnly => attachment.content().to_vec(),
            EncryptedDataType::CompleteMimePart => {
                let mut part = format!(
                    "Content-Type: {original_type}\r\nContent-ID: <{}>\r\n\r\n",
                    attachment.id
                )
                .into_bytes();
                part.extend_from_slice(attachment.content());
                part
            }
        };
        let iv = cipher.generate_iv(rng);
        let wire = cipher.encrypt(&key, &iv, &plaintext)?;
        attachment.set_content(wire, OCTET_STREAM);
        data.push(EncryptedDataInfo {
            id: format!("encrypted-data-{}", index + 1),
            data_type: config.data_type,
            algorithm: cipher.uri().to_string(),
            mime_type: Some(original_type),
            cipher_reference: format!("cid:{}", attachment.id),
        });
    }

    let cipher_value = certificate
        .public_key
        .encrypt(rng, Oaep::new::<Sha256>(), &key)
        .map_err(|_| CryptoError::EncryptionFailed)?;
    let encryption = EncryptionState {
        encrypted_key: EncryptedKeyInfo {
            id: "encrypted-key-1".to_string(),
            algorithm: RSA_OAEP.to_string(),
            token_reference: certificate.token_reference(config.token_reference)?,
            cipher_value,
            reference_ids: data.iter().map(|d| d.id.clone()).collect(),
        },
        data,
    };

    // Rebuild the Security header around any signature already present.
    let (token_b64, signature) = match message.security_header.take_raw() {
        Some(raw) => (binary_token_text(&raw), find_signature(&raw).cloned()),
        None => (None, None),
    };
    debug!(
        attachments = message.attachments.len(),
        algorithm = cipher.uri(),
        certificate = %certificate.alias,
        "encrypted attachments"
    );
    message.security_header.set_encryption(encryption);
    let security = build_security(
        token_b64.as_deref(),
        message.security_header.encryption(),
        signature,
    );
    message.security_header.set_raw(security);
    message.envelope = None;
    message.envelope = Some(build_envelope(message)?);
    Ok(())
}

fn binary_token_text(security: &as4_core::xml::XmlElement) -> Option<String> {
    use as4_core::namespaces::WSSE;
    security
        .child_elements()
        .find(|e| e.namespace == WSSE && e.local_name() == "BinarySecurityToken")
        .map(|e| e.text().trim().to_string())
}

/// Decrypts the attachments referenced from the Security header, restoring
/// their plaintext bytes and media types.
///
/// A header without an EncryptedKey is a no-op. All cryptographic failures
/// collapse to [`CryptoError::DecryptionFailed`].
pub fn decrypt_message(
    message: &mut AS4Message,
    repository: &impl CertificateRepository,
) -> Result<(), CryptoError> {
    let Some(security) = message.security_header.raw() else {
        return Ok(());
    };
    let Some(encryption) = crate::header::encryption_state_from_xml(security)? else {
        return Ok(());
    };

    if encryption.encrypted_key.algorithm != RSA_OAEP {
        return Err(CryptoError::UnsupportedAlgorithm(
            encryption.encrypted_key.algorithm.clone(),
        ));
    }
    let certificate = repository
        .resolve(&encryption.encrypted_key.token_reference)
        .ok_or(CryptoError::DecryptionFailed)?;
    let key = certificate
        .private_key()?
        .decrypt(Oaep::new::<Sha256>(), &encryption.encrypted_key.cipher_value)
        .map_err(|_| CryptoError::DecryptionFailed)?;

    for datum in &encryption.data {
        let cipher = SymmetricCipher::from_uri(&datum.algorithm)?;
        let attachment = message
            .attachment_by_href_mut(&datum.cipher_reference)
            .ok_or_else(|| {
                CryptoError::MalformedReference(format!(
                    "no attachment for {}",
                    datum.cipher_reference
                ))
            })?;
        let plaintext = cipher.decrypt(&key, attachment.content())?;
        match datum.data_type {
            EncryptedDataType::ContentOnly => {
                let content_type = datum
                    .mime_type
                    .clone()
                    .unwrap_or_else(|| OCTET_STREAM.to_string());
                attachment.set_content(plaintext, content_type);
            }
            EncryptedDataType::CompleteMimePart => {
                let (content_type, content) = split_mime_part(&plaintext)?;
                attachment.set_content(content, content_type);
            }
        }
    }

    debug!(
        attachments = encryption.data.len(),
        "decrypted attachments"
    );
    message.security_header.clear_encryption();
    Ok(())
}

/// Whether the carried Security header holds an EncryptedKey. Usable before
/// decryption, which strips the encryption state on success.
pub fn has_encryption(message: &AS4Message) -> bool {
    use as4_core::namespaces::XENC;
    message
        .security_header
        .raw()
        .and_then(|security| security.first_child(XENC, "EncryptedKey"))
        .is_some()
}

/// Splits a decrypted complete MIME part into its Content-Type and body.
fn split_mime_part(part: &[u8]) -> Result<(String, Vec<u8>), CryptoError> {
    let split = part
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or(CryptoError::DecryptionFailed)?;
    let headers =
        std::str::from_utf8(&part[..split]).map_err(|_| CryptoError::DecryptionFailed)?;
    let content_type = headers
        .split("\r\n")
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("content-type")
                .then(|| value.trim().to_string())
        })
        .unwrap_or_else(|| OCTET_STREAM.to_string());
    Ok((content_type, part[split + 4..].to_vec()))
}
