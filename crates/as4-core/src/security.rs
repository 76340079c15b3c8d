use crate::xml::XmlElement;

/// How the signing certificate is referenced from KeyInfo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityTokenReference {
    /// Full token embedded as a BinarySecurityToken (base64 SPKI).
    BinarySecurityToken { token_b64: String },
    /// Reference by issuer distinguished name and serial number.
    IssuerSerial { issuer: String, serial: String },
    /// Reference by key identifier (base64 SHA-256 of the SPKI).
    KeyIdentifier { identifier_b64: String },
}

/// One signed reference with its computed digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedReference {
    /// `#wsuId` for envelope parts, `cid:` for attachments.
    pub uri: String,
    pub digest_algorithm: String,
    pub digest_value: Vec<u8>,
}

/// Signature state carried in the Security header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningState {
    pub token_reference: SecurityTokenReference,
    pub signature_algorithm: String,
    pub references: Vec<SignedReference>,
    pub signature_value: Vec<u8>,
}

/// Transform applied when an encrypted attachment is restored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptedDataType {
    /// Plaintext is the bare attachment content.
    ContentOnly,
    /// Plaintext is a complete MIME part: headers, blank line, content.
    CompleteMimePart,
}

impl EncryptedDataType {
    /// SwA-profile Type attribute URI.
    pub fn uri(self) -> &'static str {
        match self {
            EncryptedDataType::ContentOnly => {
                "http://docs.oasis-open.org/wss/oasis-wss-SwAProfile-1.1#Attachment-Content-Only"
            }
            EncryptedDataType::CompleteMimePart => {
                "http://docs.oasis-open.org/wss/oasis-wss-SwAProfile-1.1#Attachment-Complete"
            }
        }
    }

    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            "http://docs.oasis-open.org/wss/oasis-wss-SwAProfile-1.1#Attachment-Content-Only" => {
                Some(EncryptedDataType::ContentOnly)
            }
            "http://docs.oasis-open.org/wss/oasis-wss-SwAProfile-1.1#Attachment-Complete" => {
                Some(EncryptedDataType::CompleteMimePart)
            }
            _ => None,
        }
    }
}

/// Wrapped symmetric key plus the data references it unlocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedKeyInfo {
    pub id: String,
    pub algorithm: String,
    pub token_reference: SecurityTokenReference,
    pub cipher_value: Vec<u8>,
    /// Ids of every EncryptedData entry this key covers.
    pub reference_ids: Vec<String>,
}

/// One EncryptedData entry, one per encrypted attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedDataInfo {
    pub id: String,
    pub data_type: EncryptedDataType,
    pub algorithm: String,
    /// Original media type of the plaintext, kept for restoration.
    pub mime_type: Option<String>,
    /// `cid:` URI of the attachment carrying the ciphertext.
    pub cipher_reference: String,
}

/// Encryption state carried in the Security header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionState {
    pub encrypted_key: EncryptedKeyInfo,
    pub data: Vec<EncryptedDataInfo>,
}

/// Signing and encryption state of an AS4 message.
///
/// `raw` holds the Security header element exactly as built or received;
/// the codec re-emits it verbatim and the security processor owns its
/// interpretation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecurityHeader {
    signing: Option<SigningState>,
    encryption: Option<EncryptionState>,
    raw: Option<XmlElement>,
}

impl SecurityHeader {
    pub fn is_signed(&self) -> bool {
        self.signing
            .as_ref()
            .is_some_and(|s| !s.references.is_empty())
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption.as_ref().is_some_and(|e| !e.data.is_empty())
    }

    pub fn signing(&self) -> Option<&SigningState> {
        self.signing.as_ref()
    }

    pub fn encryption(&self) -> Option<&EncryptionState> {
        self.encryption.as_ref()
    }

    pub fn raw(&self) -> Option<&XmlElement> {
        self.raw.as_ref()
    }

    pub fn set_signing(&mut self, state: SigningState) {
        self.signing = Some(state);
    }

    pub fn set_encryption(&mut self, state: EncryptionState) {
        self.encryption = Some(state);
    }

    pub fn clear_encryption(&mut self) {
        self.encryption = None;
    }

    pub fn set_raw(&mut self, element: XmlElement) {
        self.raw = Some(element);
    }

    pub fn take_raw(&mut self) -> Option<XmlElement> {
        self.raw.take()
    }
}

#[cfg(test)]
mod tests {
    use super::{
        EncryptedDataType, EncryptionState, SecurityHeader, SecurityTokenReference,
        SignedReference, SigningState,
    };

    #[test]
    fn empty_header_reports_neither_signed_nor_encrypted() {
        let header = SecurityHeader::default();
        assert!(!header.is_signed());
        assert!(!header.is_encrypted());
    }

    #[test]
    fn signed_requires_at_least_one_reference() {
        let mut header = SecurityHeader::default();
        header.set_signing(SigningState {
            token_reference: SecurityTokenReference::KeyIdentifier {
                identifier_b64: "AA==".to_string(),
            },
            signature_algorithm: "alg".to_string(),
            references: Vec::new(),
            signature_value: vec![1],
        });
        assert!(!header.is_signed());

        header.set_signing(SigningState {
            token_reference: SecurityTokenReference::KeyIdentifier {
                identifier_b64: "AA==".to_string(),
            },
            signature_algorithm: "alg".to_string(),
            references: vec![SignedReference {
                uri: "#body".to_string(),
                digest_algorithm: "dig".to_string(),
                digest_value: vec![2],
            }],
            signature_value: vec![1],
        });
        assert!(header.is_signed());
    }

    #[test]
    fn encrypted_requires_at_least_one_datum() {
        let mut header = SecurityHeader::default();
        header.set_encryption(EncryptionState {
            encrypted_key: super::EncryptedKeyInfo {
                id: "ek".to_string(),
                algorithm: "alg".to_string(),
                token_reference: SecurityTokenReference::IssuerSerial {
                    issuer: "CN=issuer".to_string(),
                    serial: "1".to_string(),
                },
                cipher_value: vec![1],
                reference_ids: Vec::new(),
            },
            data: Vec::new(),
        });
        assert!(!header.is_encrypted());
    }

    #[test]
    fn data_type_uris_round_trip() {
        for data_type in [
            EncryptedDataType::ContentOnly,
            EncryptedDataType::CompleteMimePart,
        ] {
            assert_eq!(EncryptedDataType::from_uri(data_type.uri()), Some(data_type));
        }
        assert_eq!(EncryptedDataType::from_uri("urn:unknown"), None);
    }
}
