//! wsse:Security header assembly and parsing.
//!
//! The codec carries this header as a raw element; everything that reads or
//! writes its internals funnels through here.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use as4_core::namespaces::{DSIG, WSSE, WSU, XENC};
use as4_core::security::{
    EncryptedDataInfo, EncryptedDataType, EncryptedKeyInfo, EncryptionState, SecurityTokenReference,
    SignedReference, SigningState,
};
use as4_core::xml::XmlElement;

use crate::algorithms::{ATTACHMENT_CONTENT_SIGNATURE_TRANSFORM, EXCLUSIVE_C14N, SHA256};
use crate::error::CryptoError;

/// wsu:Id of the embedded BinarySecurityToken.
pub const BINARY_TOKEN_ID: &str = "binary-security-token";

const X509V3_VALUE_TYPE: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-x509-token-profile-1.0#X509v3";
const BASE64_ENCODING_TYPE: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary";

fn wsse(local: &str) -> XmlElement {
    XmlElement::new(format!("wsse:{local}"), WSSE)
}

fn ds(local: &str) -> XmlElement {
    XmlElement::new(format!("ds:{local}"), DSIG)
}

fn xenc(local: &str) -> XmlElement {
    XmlElement::new(format!("xenc:{local}"), XENC)
}

fn malformed(what: impl Into<String>) -> CryptoError {
    CryptoError::MalformedReference(what.into())
}

fn decode_b64(text: &str, what: &str) -> Result<Vec<u8>, CryptoError> {
    BASE64
        .decode(text.trim())
        .map_err(|_| malformed(format!("{what} is not valid base64")))
}

/// Assembles the wsse:Security element. Child order follows processing
/// order on the receiving side: token, encryption material, then signature.
pub fn build_security(
    token_b64: Option<&str>,
    encryption: Option<&EncryptionState>,
    signature: Option<XmlElement>,
) -> XmlElement {
    let mut security = wsse("Security")
        .with_attr("xmlns:wsse", WSSE)
        .with_attr("xmlns:wsu", WSU)
        .with_attr("xmlns:ds", DSIG)
        .with_attr("xmlns:xenc", XENC);
    if let Some(token) = token_b64 {
        security.push_child(
            wsse("BinarySecurityToken")
                .with_attr("wsu:Id", BINARY_TOKEN_ID)
                .with_attr("EncodingType", BASE64_ENCODING_TYPE)
                .with_attr("ValueType", X509V3_VALUE_TYPE)
                .with_text(token),
        );
    }
    if let Some(state) = encryption {
        security.push_child(encrypted_key_to_xml(&state.encrypted_key));
        for datum in &state.data {
            security.push_child(encrypted_data_to_xml(datum));
        }
    }
    if let Some(signature) = signature {
        security.push_child(signature);
    }
    security
}

pub fn token_reference_to_xml(reference: &SecurityTokenReference) -> XmlElement {
    let inner = match reference {
        SecurityTokenReference::BinarySecurityToken { .. } => wsse("Reference")
            .with_attr("URI", format!("#{BINARY_TOKEN_ID}"))
            .with_attr("ValueType", X509V3_VALUE_TYPE),
        SecurityTokenReference::IssuerSerial { issuer, serial } => ds("X509Data").with_child(
            ds("X509IssuerSerial")
                .with_child(ds("X509IssuerName").with_text(issuer.as_str()))
                .with_child(ds("X509SerialNumber").with_text(serial.as_str())),
        ),
        SecurityTokenReference::KeyIdentifier { identifier_b64 } => wsse("KeyIdentifier")
            .with_attr("EncodingType", BASE64_ENCODING_TYPE)
            .with_text(identifier_b64.as_str()),
    };
    wsse("SecurityTokenReference").with_child(inner)
}

/// Reads a SecurityTokenReference; `security` is needed to chase a
/// wsse:Reference back to the embedded BinarySecurityToken.
pub fn token_reference_from_xml(
    reference: &XmlElement,
    security: &XmlElement,
) -> Result<SecurityTokenReference, CryptoError> {
    if let Some(direct) = reference.first_child(WSSE, "Reference") {
        let uri = direct
            .attr("URI")
            .ok_or_else(|| malformed("wsse:Reference without URI"))?;
        let id = uri.strip_prefix('#').unwrap_or(uri);
        let token = security
            .child_elements()
            .find(|e| {
                e.namespace == WSSE
                    && e.local_name() == "BinarySecurityToken"
                    && e.attr_by_local("Id") == Some(id)
            })
            .ok_or_else(|| malformed(format!("no BinarySecurityToken with id {id}")))?;
        return Ok(SecurityTokenReference::BinarySecurityToken {
            token_b64: token.text().trim().to_string(),
        });
    }
    if let Some(x509) = reference.first_child(DSIG, "X509Data") {
        let issuer_serial = x509
            .first_child(DSIG, "X509IssuerSerial")
            .ok_or_else(|| malformed("X509Data without X509IssuerSerial"))?;
        let issuer = issuer_serial
            .first_child(DSIG, "X509IssuerName")
            .map(|e| e.text())
            .ok_or_else(|| malformed("X509IssuerSerial without issuer"))?;
        let serial = issuer_serial
            .first_child(DSIG, "X509SerialNumber")
            .map(|e| e.text())
            .ok_or_else(|| malformed("X509IssuerSerial without serial"))?;
        return Ok(SecurityTokenReference::IssuerSerial { issuer, serial });
    }
    if let Some(key_id) = reference.first_child(WSSE, "KeyIdentifier") {
        return Ok(SecurityTokenReference::KeyIdentifier {
            identifier_b64: key_id.text().trim().to_string(),
        });
    }
    Err(malformed("SecurityTokenReference of unknown form"))
}

/// Builds ds:SignedInfo for the given references. This exact element is the
/// signed surface; its canonical bytes feed the signature.
pub fn signed_info_to_xml(signature_algorithm: &str, references: &[SignedReference]) -> XmlElement {
    let mut signed_info = ds("SignedInfo")
        .with_child(ds("CanonicalizationMethod").with_attr("Algorithm", EXCLUSIVE_C14N))
        .with_child(ds("SignatureMethod").with_attr("Algorithm", signature_algorithm));
    for reference in references {
        let transform = if reference.uri.starts_with("cid:") {
            ATTACHMENT_CONTENT_SIGNATURE_TRANSFORM
        } else {
            EXCLUSIVE_C14N
        };
        signed_info.push_child(
            ds("Reference")
                .with_attr("URI", reference.uri.as_str())
                .with_child(
                    ds("Transforms").with_child(ds("Transform").with_attr("Algorithm", transform)),
                )
                .with_child(
                    ds("DigestMethod").with_attr("Algorithm", reference.digest_algorithm.as_str()),
                )
                .with_child(ds("DigestValue").with_text(BASE64.encode(&reference.digest_value))),
        );
    }
    signed_info
}

pub fn signature_to_xml(
    signed_info: XmlElement,
    signature_value: &[u8],
    token_reference: &SecurityTokenReference,
) -> XmlElement {
    ds("Signature")
        .with_child(signed_info)
        .with_child(ds("SignatureValue").with_text(BASE64.encode(signature_value)))
        .with_child(ds("KeyInfo").with_child(token_reference_to_xml(token_reference)))
}

/// The ds:Signature child of a Security header, when present.
pub fn find_signature(security: &XmlElement) -> Option<&XmlElement> {
    security
        .child_elements()
        .find(|e| e.namespace == DSIG && e.local_name() == "Signature")
}

pub fn signing_state_from_xml(
    signature: &XmlElement,
    security: &XmlElement,
) -> Result<SigningState, CryptoError> {
    let signed_info = signature
        .first_child(DSIG, "SignedInfo")
        .ok_or_else(|| malformed("Signature without SignedInfo"))?;
    let signature_algorithm = signed_info
        .first_child(DSIG, "SignatureMethod")
        .and_then(|e| e.attr("Algorithm"))
        .ok_or_else(|| malformed("SignedInfo without SignatureMethod"))?
        .to_string();

    let mut references = Vec::new();
    for reference in signed_info.children_named(DSIG, "Reference") {
        let uri = reference
            .attr("URI")
            .ok_or_else(|| malformed("Reference without URI"))?
            .to_string();
        let digest_algorithm = reference
            .first_child(DSIG, "DigestMethod")
            .and_then(|e| e.attr("Algorithm"))
            .unwrap_or(SHA256)
            .to_string();
        let digest_value = reference
            .first_child(DSIG, "DigestValue")
            .map(|e| decode_b64(&e.text(), "DigestValue"))
            .transpose()?
            .ok_or_else(|| malformed("Reference without DigestValue"))?;
        references.push(SignedReference {
            uri,
            digest_algorithm,
            digest_value,
        });
    }
    if references.is_empty() {
        return Err(malformed("SignedInfo without references"));
    }

    let signature_value = signature
        .first_child(DSIG, "SignatureValue")
        .map(|e| decode_b64(&e.text(), "SignatureValue"))
        .transpose()?
        .ok_or_else(|| malformed("Signature without SignatureValue"))?;
    let token_reference = signature
        .first_child(DSIG, "KeyInfo")
        .and_then(|e| e.first_child(WSSE, "SecurityTokenReference"))
        .map(|e| token_reference_from_xml(e, security))
        .transpose()?
        .ok_or_else(|| malformed("Signature without SecurityTokenReference"))?;

    Ok(SigningState {
        token_reference,
        signature_algorithm,
        references,
        signature_value,
    })
}

fn encrypted_key_to_xml(key: &EncryptedKeyInfo) -> XmlElement {
    let mut reference_list = xenc("ReferenceList");
    for id in &key.reference_ids {
        reference_list
            .push_child(xenc("DataReference").with_attr("URI", format!("#{id}")));
    }
    xenc("EncryptedKey")
        .with_attr("Id", key.id.as_str())
        .with_child(xenc("EncryptionMethod").with_attr("Algorithm", key.algorithm.as_str()))
        .with_child(ds("KeyInfo").with_child(token_reference_to_xml(&key.token_reference)))
        .with_child(
            xenc("CipherData")
                .with_child(xenc("CipherValue").with_text(BASE64.encode(&key.cipher_value))),
        )
        .with_child(reference_list)
}

fn encrypted_data_to_xml(datum: &EncryptedDataInfo) -> XmlElement {
    let mut element = xenc("EncryptedData")
        .with_attr("Id", datum.id.as_str())
        .with_attr("Type", datum.data_type.uri());
    if let Some(mime_type) = &datum.mime_type {
        element.set_attr("MimeType", mime_type);
    }
    element
        .with_child(xenc("EncryptionMethod").with_attr("Algorithm", datum.algorithm.as_str()))
        .with_child(
            xenc("CipherData").with_child(
                xenc("CipherReference").with_attr("URI", datum.cipher_reference.as_str()),
            ),
        )
}

/// Reads the encryption material out of a Security header. `None` when the
/// header carries no EncryptedKey.
pub fn encryption_state_from_xml(
    security: &XmlElement,
) -> Result<Option<EncryptionState>, CryptoError> {
    let Some(key_element) = security
        .child_elements()
        .find(|e| e.namespace == XENC && e.local_name() == "EncryptedKey")
    else {
        return Ok(None);
    };

    let algorithm = key_element
        .first_child(XENC, "EncryptionMethod")
        .and_then(|e| e.attr("Algorithm"))
        .ok_or_else(|| malformed("EncryptedKey without EncryptionMethod"))?
        .to_string();
    let token_reference = key_element
        .first_child(DSIG, "KeyInfo")
        .and_then(|e| e.first_child(WSSE, "SecurityTokenReference"))
        .map(|e| token_reference_from_xml(e, security))
        .transpose()?
        .ok_or_else(|| malformed("EncryptedKey without SecurityTokenReference"))?;
    let cipher_value = key_element
        .first_child(XENC, "CipherData")
        .and_then(|e| e.first_child(XENC, "CipherValue"))
        .map(|e| decode_b64(&e.text(), "CipherValue"))
        .transpose()?
        .ok_or_else(|| malformed("EncryptedKey without CipherValue"))?;
    let reference_ids = key_element
        .first_child(XENC, "ReferenceList")
        .map(|list| {
            list.children_named(XENC, "DataReference")
                .filter_map(|e| e.attr("URI"))
                .map(|uri| uri.strip_prefix('#').unwrap_or(uri).to_string())
                .collect()
        })
        .unwrap_or_default();

    let encrypted_key = EncryptedKeyInfo {
        id: key_element.attr("Id").unwrap_or_default().to_string(),
        algorithm,
        token_reference,
        cipher_value,
        reference_ids,
    };

    let mut data = Vec::new();
    for datum in security.children_named(XENC, "EncryptedData") {
        let type_uri = datum
            .attr("Type")
            .ok_or_else(|| malformed("EncryptedData without Type"))?;
        let data_type = EncryptedDataType::from_uri(type_uri)
            .ok_or_else(|| malformed(format!("unknown EncryptedData type {type_uri}")))?;
        let algorithm = datum
            .first_child(XENC, "EncryptionMethod")
            .and_then(|e| e.attr("Algorithm"))
            .ok_or_else(|| malformed("EncryptedData without EncryptionMethod"))?
            .to_string();
        let cipher_reference = datum
            .first_child(XENC, "CipherData")
            .and_then(|e| e.first_child(XENC, "CipherReference"))
            .and_then(|e| e.attr("URI"))
            .ok_or_else(|| malformed("EncryptedData without CipherReference"))?
            .to_string();
        data.push(EncryptedDataInfo {
            id: datum.attr("Id").unwrap_or_default().to_string(),
            data_type,
            algorithm,
            mime_type: datum.attr("MimeType").map(str::to_string),
            cipher_reference,
        });
    }

    Ok(Some(EncryptionState {
        encrypted_key,
        data,
    }))
}

#[cfg(test)]
mod tests {
    use super::{
        build_security, encryption_state_from_xml, find_signature, signature_to_xml,
        signed_info_to_xml, signing_state_from_xml,
    };
    use as4_core::security::{
        EncryptedDataInfo, EncryptedDataType, EncryptedKeyInfo, EncryptionState,
        SecurityTokenReference, SignedReference,
    };
    use as4_core::xml::parse_element;

    fn sample_references() -> Vec<SignedReference> {
        vec![
            SignedReference {
                uri: "#header-1".to_string(),
                digest_algorithm: crate::algorithms::SHA256.to_string(),
                digest_value: vec![1, 2, 3],
            },
            SignedReference {
                uri: "cid:payload-1".to_string(),
                digest_algorithm: crate::algorithms::SHA256.to_string(),
                digest_value: vec![4, 5, 6],
            },
        ]
    }

    fn sample_encryption() -> EncryptionState {
        EncryptionState {
            encrypted_key: EncryptedKeyInfo {
                id: "ek-1".to_string(),
                algorithm: crate::algorithms::RSA_OAEP.to_string(),
                token_reference: SecurityTokenReference::IssuerSerial {
                    issuer: "CN=test-ca".to_string(),
                    serial: "7".to_string(),
                },
                cipher_value: vec![9, 9, 9],
                reference_ids: vec!["ed-1".to_string()],
            },
            data: vec![EncryptedDataInfo {
                id: "ed-1".to_string(),
                data_type: EncryptedDataType::ContentOnly,
                algorithm: crate::algorithms::AES128_GCM.to_string(),
                mime_type: Some("text/plain".to_string()),
                cipher_reference: "cid:payload-1".to_string(),
            }],
        }
    }

    #[test]
    fn signing_state_round_trips_through_xml() {
        let references = sample_references();
        let token_reference = SecurityTokenReference::KeyIdentifier {
            identifier_b64: "AQID".to_string(),
        };
        let signed_info = signed_info_to_xml(crate::algorithms::RSA_SHA256, &references);
        let signature = signature_to_xml(signed_info, &[0xAB, 0xCD], &token_reference);
        let security = build_security(None, None, Some(signature));

        let xml = security.to_xml_string().expect("serialize should work");
        let parsed = parse_element(&xml).expect("parse should work");
        let signature = find_signature(&parsed).expect("signature should be found");
        let state =
            signing_state_from_xml(signature, &parsed).expect("state should parse");

        assert_eq!(state.signature_algorithm, crate::algorithms::RSA_SHA256);
        assert_eq!(state.references, references);
        assert_eq!(state.signature_value, vec![0xAB, 0xCD]);
        assert_eq!(state.token_reference, token_reference);
    }

    #[test]
    fn encryption_state_round_trips_through_xml() {
        let state = sample_encryption();
        let security = build_security(None, Some(&state), None);
        let xml = security.to_xml_string().expect("serialize should work");
        let parsed = parse_element(&xml).expect("parse should work");

        let decoded = encryption_state_from_xml(&parsed)
            .expect("state should parse")
            .expect("encrypted key should be present");
        assert_eq!(decoded, state);
    }

    #[test]
    fn binary_token_reference_chases_the_embedded_token() {
        let reference = SecurityTokenReference::BinarySecurityToken {
            token_b64: "dG9rZW4=".to_string(),
        };
        let signed_info = signed_info_to_xml(crate::algorithms::RSA_SHA256, &sample_references());
        let signature = signature_to_xml(signed_info, &[1], &reference);
        let security = build_security(Some("dG9rZW4="), None, Some(signature));

        let xml = security.to_xml_string().expect("serialize should work");
        let parsed = parse_element(&xml).expect("parse should work");
        let signature = find_signature(&parsed).expect("signature should be found");
        let state = signing_state_from_xml(signature, &parsed).expect("state should parse");
        assert_eq!(state.token_reference, reference);
    }

    #[test]
    fn header_without_encrypted_key_yields_none() {
        let security = build_security(None, None, None);
        assert!(encryption_state_from_xml(&security)
            .expect("parse should work")
            .is_none());
    }
}
