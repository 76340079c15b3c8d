//! Signature verification for received messages.

use rsa::Pkcs1v15Sign;
use sha2::{Digest, Sha256};
use tracing::debug;

use as4_core::message::AS4Message;
use as4_core::namespaces::DSIG;

use crate::algorithms::RSA_SHA256;
use crate::certificates::CertificateRepository;
use crate::error::CryptoError;
use crate::header::{find_signature, signing_state_from_xml};
use crate::reference::digest_reference;

/// Verifies the signature carried in the message's Security header.
///
/// Every ds:Reference digest is recomputed from the received envelope and
/// attachments, then the signature value is checked over the canonical
/// SignedInfo with the certificate the token reference resolves to. On
/// success the parsed signing state is recorded on the message so receipt
/// generation can echo the signed references.
pub fn verify_message(
    message: &mut AS4Message,
    repository: &impl CertificateRepository,
) -> Result<(), CryptoError> {
    let envelope = message
        .envelope
        .clone()
        .ok_or_else(|| CryptoError::MalformedReference("message has no envelope".to_string()))?;
    let security = message
        .security_header
        .raw()
        .ok_or_else(|| CryptoError::MalformedReference("message has no Security header".to_string()))?;
    let signature = find_signature(security)
        .ok_or_else(|| CryptoError::MalformedReference("Security header has no Signature".to_string()))?;
    let state = signing_state_from_xml(signature, security)?;

    if state.signature_algorithm != RSA_SHA256 {
        return Err(CryptoError::UnsupportedAlgorithm(
            state.signature_algorithm.clone(),
        ));
    }

    let certificate = repository.resolve(&state.token_reference).ok_or_else(|| {
        CryptoError::CertificateNotTrusted("token reference resolves to no certificate".to_string())
    })?;
    if !repository.is_trusted(certificate) {
        return Err(CryptoError::CertificateNotTrusted(
            certificate.alias.clone(),
        ));
    }

    for reference in &state.references {
        let actual = digest_reference(
            message,
            &envelope,
            &reference.uri,
            &reference.digest_algorithm,
        )?;
        if actual != reference.digest_value {
            debug!(
                uri = %reference.uri,
                expected = %hex::encode(&reference.digest_value),
                actual = %hex::encode(&actual),
                "digest mismatch"
            );
            return Err(CryptoError::InvalidSignature);
        }
    }

    let signed_info = signature
        .first_child(DSIG, "SignedInfo")
        .ok_or_else(|| CryptoError::MalformedReference("Signature without SignedInfo".to_string()))?;
    let digest = Sha256::digest(signed_info.canonical_bytes()?);
    certificate
        .public_key
        .verify(
            Pkcs1v15Sign::new::<Sha256>(),
            &digest,
            &state.signature_value,
        )
        .map_err(|_| CryptoError::InvalidSignature)?;

    debug!(
        references = state.references.len(),
        certificate = %certificate.alias,
        "signature verified"
    );
    message.security_header.set_signing(state);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::verify_message;
    use crate::certificates::test_support::certificate;
    use crate::certificates::InMemoryCertificateRepository;
    use crate::error::CryptoError;
    use crate::sign::{sign_message, SigningConfig};
    use crate::test_support::signable_message;
    use as4_codec::SerializerRegistry;
    use as4_core::cancel::CancelToken;
    use as4_core::message::AS4Message;

    fn signed_wire_message() -> (AS4Message, InMemoryCertificateRepository) {
        let cert = certificate("signer", 21);
        let mut repo = InMemoryCertificateRepository::new();
        repo.install(cert.clone(), true);

        let mut message = signable_message();
        sign_message(&mut message, &cert, &SigningConfig::default())
            .expect("signing should work");

        // Round-trip over the wire so verification sees parsed state.
        let registry = SerializerRegistry::new();
        let mut bytes = Vec::new();
        registry
            .serialize(&message, &mut bytes, &CancelToken::new())
            .expect("serialize should work");
        let received = registry
            .deserialize(&bytes, &message.content_type())
            .expect("deserialize should work");
        (received, repo)
    }

    #[test]
    fn verifies_a_signed_round_tripped_message() {
        let (mut message, repo) = signed_wire_message();
        verify_message(&mut message, &repo).expect("verification should pass");
        assert!(message.security_header.is_signed());
    }

    #[test]
    fn tampered_attachment_fails_verification() {
        let (mut message, repo) = signed_wire_message();
        let attachment = message
            .attachment_by_href_mut("cid:payload-1")
            .expect("attachment should exist");
        attachment.set_content(b"tampered".to_vec(), "text/plain");

        let err = verify_message(&mut message, &repo).expect_err("tampering must fail");
        assert!(matches!(err, CryptoError::InvalidSignature));
    }

    #[test]
    fn untrusted_signer_is_rejected() {
        let cert = certificate("signer", 22);
        let mut repo = InMemoryCertificateRepository::new();
        repo.install(cert.clone(), false);

        let mut message = signable_message();
        sign_message(&mut message, &cert, &SigningConfig::default())
            .expect("signing should work");
        let err = verify_message(&mut message, &repo).expect_err("untrusted must fail");
        assert!(matches!(err, CryptoError::CertificateNotTrusted(_)));
    }

    #[test]
    fn unknown_signer_is_rejected() {
        let (mut message, _) = signed_wire_message();
        let empty_repo = InMemoryCertificateRepository::new();
        let err = verify_message(&mut message, &empty_repo).expect_err("unknown must fail");
        assert!(matches!(err, CryptoError::CertificateNotTrusted(_)));
    }

    #[test]
    fn unsigned_message_is_a_malformed_reference() {
        let mut message = signable_message();
        message.envelope = Some(
            as4_codec::soap::build_envelope(&message).expect("envelope should build"),
        );
        let repo = InMemoryCertificateRepository::new();
        let err = verify_message(&mut message, &repo).expect_err("no signature must fail");
        assert!(matches!(err, CryptoError::MalformedReference(_)));
    }
}
