//! Envelope and attachment signing.

use rsa::Pkcs1v15Sign;
use sha2::{Digest, Sha256};
use tracing::debug;

use as4_codec::soap::build_envelope;
use as4_core::message::AS4Message;
use as4_core::security::{SecurityTokenReference, SignedReference, SigningState};

use crate::algorithms::{RSA_SHA256, SHA256 as SHA256_URI};
use crate::certificates::{Certificate, TokenReferenceStyle};
use crate::error::CryptoError;
use crate::header::{build_security, find_signature, signature_to_xml, signed_info_to_xml};
use crate::reference::digest_reference;

/// Signing policy for outgoing messages.
#[derive(Debug, Clone)]
pub struct SigningConfig {
    pub token_reference: TokenReferenceStyle,
    pub signature_algorithm: String,
    pub digest_algorithm: String,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            token_reference: TokenReferenceStyle::BinarySecurityToken,
            signature_algorithm: RSA_SHA256.to_string(),
            digest_algorithm: SHA256_URI.to_string(),
        }
    }
}

/// Signs the Messaging header, the Body and every attachment with the
/// certificate's private key, then rebuilds the envelope around the new
/// Security header.
///
/// Runs before encryption so that signed attachment digests cover the
/// plaintext bytes the receiver verifies after decrypting.
pub fn sign_message(
    message: &mut AS4Message,
    certificate: &Certificate,
    config: &SigningConfig,
) -> Result<(), CryptoError> {
    if config.signature_algorithm != RSA_SHA256 {
        return Err(CryptoError::UnsupportedAlgorithm(
            config.signature_algorithm.clone(),
        ));
    }
    let private_key = certificate.private_key()?;

    // Always sign a freshly built envelope so the digests cover exactly
    // what will be serialized.
    message.envelope = None;
    let envelope = build_envelope(message)?;

    let mut references = Vec::new();
    for id in [
        message.signing_id.header_id.clone(),
        message.signing_id.body_id.clone(),
    ] {
        let uri = format!("#{id}");
        let digest_value =
            digest_reference(message, &envelope, &uri, &config.digest_algorithm)?;
        references.push(SignedReference {
            uri,
            digest_algorithm: config.digest_algorithm.clone(),
            digest_value,
        });
    }
    for attachment in &message.attachments {
        let uri = format!("cid:{}", attachment.id);
        let digest_value =
            digest_reference(message, &envelope, &uri, &config.digest_algorithm)?;
        references.push(SignedReference {
            uri,
            digest_algorithm: config.digest_algorithm.clone(),
            digest_value,
        });
    }

    let signed_info = signed_info_to_xml(&config.signature_algorithm, &references);
    let digest = Sha256::digest(signed_info.canonical_bytes()?);
    let signature_value = private_key
        .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
        .map_err(|_| CryptoError::SigningFailed)?;

    let token_reference = certificate.token_reference(config.token_reference)?;
    let token_b64 = match &token_reference {
        SecurityTokenReference::BinarySecurityToken { token_b64 } => Some(token_b64.clone()),
        _ => None,
    };
    let signature = signature_to_xml(signed_info, &signature_value, &token_reference);
    let security = build_security(
        token_b64.as_deref(),
        message.security_header.encryption(),
        Some(signature),
    );

    debug!(
        references = references.len(),
        certificate = %certificate.alias,
        "signed message"
    );
    message.security_header.set_signing(SigningState {
        token_reference,
        signature_algorithm: config.signature_algorithm.clone(),
        references,
        signature_value,
    });
    message.security_header.set_raw(security);
    message.envelope = Some(build_envelope(message)?);
    Ok(())
}

/// Whether the message's Security header carries a signature element.
pub fn has_signature(message: &AS4Message) -> bool {
    message
        .security_header
        .raw()
        .and_then(find_signature)
        .is_some()
}

#[cfg(test)]
mod tests {
    use super::{has_signature, sign_message, SigningConfig};
    use crate::certificates::test_support::certificate;
    use crate::error::CryptoError;
    use crate::test_support::signable_message;

    #[test]
    fn signing_covers_header_body_and_attachments() {
        let cert = certificate("signer", 11);
        let mut message = signable_message();
        sign_message(&mut message, &cert, &SigningConfig::default())
            .expect("signing should work");

        assert!(has_signature(&message));
        let signing = message
            .security_header
            .signing()
            .expect("signing state should be recorded");
        assert_eq!(signing.references.len(), 3);
        assert!(signing.references.iter().any(|r| r.uri == "cid:payload-1"));
        assert!(message.envelope.is_some());
    }

    #[test]
    fn signing_requires_a_private_key() {
        let mut cert = certificate("pubonly", 12);
        cert.private_key = None;
        let mut message = signable_message();
        let err = sign_message(&mut message, &cert, &SigningConfig::default())
            .expect_err("public-only certificate must fail");
        assert!(matches!(err, CryptoError::MissingPrivateKey(_)));
    }

    #[test]
    fn unknown_signature_algorithm_is_rejected() {
        let cert = certificate("signer", 13);
        let mut message = signable_message();
        let config = SigningConfig {
            signature_algorithm: "http://www.w3.org/2000/09/xmldsig#rsa-sha1".to_string(),
            ..SigningConfig::default()
        };
        let err = sign_message(&mut message, &cert, &config)
            .expect_err("sha1 must be refused");
        assert!(matches!(err, CryptoError::UnsupportedAlgorithm(_)));
    }
}
