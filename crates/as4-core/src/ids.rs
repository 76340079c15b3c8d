use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default host suffix appended to generated ebMS message identifiers.
pub const DEFAULT_ID_SUFFIX: &str = "as4.gateway";

/// ebMS message identifier, unique within a message's unit set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generates a fresh `uuid@suffix` identifier.
    pub fn generate() -> Self {
        Self::generate_with_suffix(DEFAULT_ID_SUFFIX)
    }

    /// Generates a fresh identifier with an explicit host suffix.
    pub fn generate_with_suffix(suffix: &str) -> Self {
        Self(format!("{}@{suffix}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// wsu:Id values assigned to the envelope parts covered by a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningId {
    /// wsu:Id of the Messaging header element.
    pub header_id: String,
    /// wsu:Id of the SOAP Body element.
    pub body_id: String,
}

impl SigningId {
    /// Generates fresh `header-`/`body-` scoped ids.
    pub fn generate() -> Self {
        Self {
            header_id: format!("header-{}", Uuid::new_v4()),
            body_id: format!("body-{}", Uuid::new_v4()),
        }
    }
}

impl Default for SigningId {
    fn default() -> Self {
        Self::generate()
    }
}

#[cfg(test)]
mod tests {
    use super::{MessageId, SigningId, DEFAULT_ID_SUFFIX};

    #[test]
    fn generated_ids_carry_suffix_and_differ() {
        let a = MessageId::generate();
        let b = MessageId::generate();
        assert!(a.as_str().ends_with(DEFAULT_ID_SUFFIX));
        assert_ne!(a, b);
    }

    #[test]
    fn signing_ids_are_scoped() {
        let ids = SigningId::generate();
        assert!(ids.header_id.starts_with("header-"));
        assert!(ids.body_id.starts_with("body-"));
        assert_ne!(ids.header_id, ids.body_id);
    }
}
