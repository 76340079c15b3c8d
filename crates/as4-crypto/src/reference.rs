//! Reference resolution from ds:Reference URIs to digestible octets.

use sha2::{Digest, Sha256};

use as4_core::message::AS4Message;
use as4_core::xml::XmlElement;

use crate::algorithms::SHA256 as SHA256_URI;
use crate::error::CryptoError;

/// Finds the one element in `envelope` carrying the given Id.
///
/// Matching covers `wsu:Id`, bare `Id`, `ID` and `id` attributes. More than
/// one match is rejected outright: ambiguous ids are how signature wrapping
/// smuggles unsigned content past verification.
pub fn find_unique_by_id<'a>(
    envelope: &'a XmlElement,
    id: &str,
) -> Result<&'a XmlElement, CryptoError> {
    let mut matches: Vec<&XmlElement> = Vec::new();
    envelope.visit(&mut |element| {
        let hit = element.attributes.iter().any(|attr| {
            let local = match attr.qname.split_once(':') {
                Some((_, l)) => l,
                None => attr.qname.as_str(),
            };
            matches!(local, "Id" | "ID" | "id") && attr.value == id
        });
        if hit {
            matches.push(element);
        }
    });
    match matches.as_slice() {
        [only] => Ok(only),
        [] => Err(CryptoError::MalformedReference(format!(
            "no element with id {id}"
        ))),
        _ => Err(CryptoError::MalformedReference(format!(
            "id {id} is not unique"
        ))),
    }
}

/// SHA-256 digest of the octets a reference URI points at: canonical bytes
/// for `#id` envelope parts, raw content bytes for `cid:` attachments.
pub fn digest_reference(
    message: &AS4Message,
    envelope: &XmlElement,
    uri: &str,
    digest_algorithm: &str,
) -> Result<Vec<u8>, CryptoError> {
    if digest_algorithm != SHA256_URI {
        return Err(CryptoError::UnsupportedAlgorithm(
            digest_algorithm.to_string(),
        ));
    }
    if let Some(id) = uri.strip_prefix('#') {
        let element = find_unique_by_id(envelope, id)?;
        return Ok(Sha256::digest(element.canonical_bytes()?).to_vec());
    }
    if uri.starts_with("cid:") {
        let attachment = message.attachment_by_href(uri).ok_or_else(|| {
            CryptoError::MalformedReference(format!("no attachment for {uri}"))
        })?;
        return Ok(Sha256::digest(attachment.content()).to_vec());
    }
    Err(CryptoError::MalformedReference(format!(
        "unsupported reference uri {uri}"
    )))
}
