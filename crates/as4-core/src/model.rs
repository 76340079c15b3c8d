use serde::{Deserialize, Serialize};

use crate::namespaces::{TEST_ACTION, TEST_SERVICE};

/// A single party identifier with optional type qualifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyId {
    pub id: String,
    pub id_type: Option<String>,
}

impl PartyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            id_type: None,
        }
    }

    pub fn with_type(id: impl Into<String>, id_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            id_type: Some(id_type.into()),
        }
    }
}

/// Sending or receiving trading partner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub role: String,
    pub party_ids: Vec<PartyId>,
}

impl Party {
    pub fn new(role: impl Into<String>, party_ids: Vec<PartyId>) -> Self {
        Self {
            role: role.into(),
            party_ids,
        }
    }

    /// Primary (first) party id, when any is present.
    pub fn primary_party_id(&self) -> Option<&PartyId> {
        self.party_ids.first()
    }
}

/// Business service the message targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub value: String,
    pub service_type: Option<String>,
}

impl Service {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            service_type: None,
        }
    }
}

/// Reference to the partner agreement governing the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementReference {
    pub value: String,
    pub agreement_type: Option<String>,
    /// Explicit PMode id carried by the sender, when present.
    pub pmode_id: Option<String>,
}

/// Service/Action/ConversationId triple plus optional agreement reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaborationInfo {
    pub service: Service,
    pub action: String,
    pub conversation_id: String,
    pub agreement: Option<AgreementReference>,
}

impl CollaborationInfo {
    /// Whether this matches the well-known ebMS test Service/Action pair.
    pub fn is_test(&self) -> bool {
        self.service.value == TEST_SERVICE && self.action == TEST_ACTION
    }
}

/// Payload reference carried in the Messaging header (`cid:` href).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartInfo {
    pub href: String,
    pub properties: Vec<MessageProperty>,
}

impl PartInfo {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            properties: Vec::new(),
        }
    }

    /// Content id the href points at, with any `cid:` scheme stripped.
    pub fn content_id(&self) -> &str {
        self.href.strip_prefix("cid:").unwrap_or(&self.href)
    }
}

/// Key/value business metadata attached to a user message or payload part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageProperty {
    pub name: String,
    pub value: String,
}

impl MessageProperty {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CollaborationInfo, PartInfo, Service};
    use crate::namespaces::{TEST_ACTION, TEST_SERVICE};

    fn collaboration(service: &str, action: &str) -> CollaborationInfo {
        CollaborationInfo {
            service: Service::new(service),
            action: action.to_string(),
            conversation_id: "conv-1".to_string(),
            agreement: None,
        }
    }

    #[test]
    fn test_flag_requires_both_service_and_action() {
        assert!(collaboration(TEST_SERVICE, TEST_ACTION).is_test());
        assert!(!collaboration(TEST_SERVICE, "urn:real:action").is_test());
        assert!(!collaboration("urn:real:service", TEST_ACTION).is_test());
    }

    #[test]
    fn part_info_strips_cid_scheme() {
        assert_eq!(PartInfo::new("cid:payload-1").content_id(), "payload-1");
        assert_eq!(PartInfo::new("payload-2").content_id(), "payload-2");
    }
}
