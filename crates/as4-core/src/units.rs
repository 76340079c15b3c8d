use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::MessageId;
use crate::model::{CollaborationInfo, MessageProperty, PartInfo, Party};
use crate::namespaces::DEFAULT_MPC;

/// Business message exchanged between trading partners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub message_id: MessageId,
    pub ref_to_message_id: Option<MessageId>,
    pub timestamp: DateTime<Utc>,
    pub sender: Party,
    pub receiver: Party,
    pub collaboration: CollaborationInfo,
    /// Message partition channel; defaults to the well-known URI.
    pub mpc: String,
    pub part_infos: Vec<PartInfo>,
    pub message_properties: Vec<MessageProperty>,
    /// Set by the reliability layer after a store lookup; never on the wire.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_duplicate: bool,
}

impl UserMessage {
    pub fn new(
        message_id: MessageId,
        sender: Party,
        receiver: Party,
        collaboration: CollaborationInfo,
    ) -> Self {
        Self {
            message_id,
            ref_to_message_id: None,
            timestamp: Utc::now(),
            sender,
            receiver,
            collaboration,
            mpc: DEFAULT_MPC.to_string(),
            part_infos: Vec::new(),
            message_properties: Vec::new(),
            is_duplicate: false,
        }
    }

    /// Whether this targets the well-known test Service/Action pair.
    pub fn is_test(&self) -> bool {
        self.collaboration.is_test()
    }
}

/// Error severity per the ebMS error schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Failure,
    Warning,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Failure => "FAILURE",
            Severity::Warning => "WARNING",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "FAILURE" => Some(Severity::Failure),
            "WARNING" => Some(Severity::Warning),
            _ => None,
        }
    }
}

/// One ebMS Error entry inside an Error signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub error_code: String,
    pub severity: Severity,
    pub origin: Option<String>,
    pub category: Option<String>,
    pub short_description: Option<String>,
    pub detail: Option<String>,
    pub ref_to_message_in_error: Option<MessageId>,
}

/// Signed reference echoed back inside an NRR receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonRepudiationReference {
    /// URI of the originally signed part (`#id` or `cid:`).
    pub uri: String,
    pub digest_algorithm: String,
    pub digest_value: Vec<u8>,
}

/// Receipt payload: an echoed copy of the acknowledged user message XOR
/// non-repudiation references. The variants are mutually exclusive by type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReceiptContent {
    EchoedUserMessage(UserMessage),
    NonRepudiation(Vec<NonRepudiationReference>),
}

/// Routed party/collaboration copy used by multi-hop signals, with
/// Sender/Receiver reversed relative to the original user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingInput {
    pub sender: Party,
    pub receiver: Party,
    pub collaboration: CollaborationInfo,
    pub mpc: String,
}

impl RoutingInput {
    /// Builds the reply route for `original`, swapping sender and receiver.
    pub fn for_reply(original: &UserMessage) -> Self {
        Self {
            sender: original.receiver.clone(),
            receiver: original.sender.clone(),
            collaboration: original.collaboration.clone(),
            mpc: original.mpc.clone(),
        }
    }
}

/// Signal-specific payload of a [`SignalMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Signal {
    Receipt(ReceiptContent),
    Error(Vec<ErrorDetail>),
    PullRequest {
        /// Partition channel the sender wants to pull from.
        mpc: String,
    },
}

/// Receipt, Error, or PullRequest signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalMessage {
    pub message_id: MessageId,
    pub ref_to_message_id: Option<MessageId>,
    pub timestamp: DateTime<Utc>,
    pub signal: Signal,
    /// Present when the signal travels multi-hop.
    pub routing_input: Option<RoutingInput>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_duplicate: bool,
}

impl SignalMessage {
    pub fn new(message_id: MessageId, signal: Signal) -> Self {
        Self {
            message_id,
            ref_to_message_id: None,
            timestamp: Utc::now(),
            signal,
            routing_input: None,
            is_duplicate: false,
        }
    }

    /// Receipt acknowledging `user_message` by echoing it back.
    pub fn receipt_for(user_message: &UserMessage) -> Self {
        let mut signal = Self::new(
            MessageId::generate(),
            Signal::Receipt(ReceiptContent::EchoedUserMessage(user_message.clone())),
        );
        signal.ref_to_message_id = Some(user_message.message_id.clone());
        signal
    }

    /// Receipt acknowledging `user_message` with non-repudiation references.
    pub fn nrr_receipt_for(
        user_message: &UserMessage,
        references: Vec<NonRepudiationReference>,
    ) -> Self {
        let mut signal = Self::new(
            MessageId::generate(),
            Signal::Receipt(ReceiptContent::NonRepudiation(references)),
        );
        signal.ref_to_message_id = Some(user_message.message_id.clone());
        signal
    }

    /// Error signal carrying `details`, referencing `ref_to` when known.
    pub fn error(details: Vec<ErrorDetail>, ref_to: Option<MessageId>) -> Self {
        let mut signal = Self::new(MessageId::generate(), Signal::Error(details));
        signal.ref_to_message_id = ref_to;
        signal
    }

    /// PullRequest for the given partition channel.
    pub fn pull_request(mpc: impl Into<String>) -> Self {
        Self::new(MessageId::generate(), Signal::PullRequest { mpc: mpc.into() })
    }

    pub fn is_receipt(&self) -> bool {
        matches!(self.signal, Signal::Receipt(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self.signal, Signal::Error(_))
    }

    pub fn is_pull_request(&self) -> bool {
        matches!(self.signal, Signal::PullRequest { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::{Severity, Signal, SignalMessage, UserMessage};
    use crate::ids::MessageId;
    use crate::model::{CollaborationInfo, Party, PartyId, Service};
    use crate::namespaces::DEFAULT_MPC;

    fn sample_user_message() -> UserMessage {
        UserMessage::new(
            MessageId::from("um-1@test"),
            Party::new("Sender", vec![PartyId::new("org:sender")]),
            Party::new("Receiver", vec![PartyId::new("org:receiver")]),
            CollaborationInfo {
                service: Service::new("urn:service"),
                action: "urn:action".to_string(),
                conversation_id: "conv".to_string(),
                agreement: None,
            },
        )
    }

    #[test]
    fn user_message_defaults_to_well_known_mpc() {
        assert_eq!(sample_user_message().mpc, DEFAULT_MPC);
    }

    #[test]
    fn receipt_references_acknowledged_message() {
        let user_message = sample_user_message();
        let receipt = SignalMessage::receipt_for(&user_message);
        assert!(receipt.is_receipt());
        assert_eq!(
            receipt.ref_to_message_id.as_ref(),
            Some(&user_message.message_id)
        );
    }

    #[test]
    fn routing_input_reverses_parties() {
        let user_message = sample_user_message();
        let routing = super::RoutingInput::for_reply(&user_message);
        assert_eq!(routing.sender, user_message.receiver);
        assert_eq!(routing.receiver, user_message.sender);
    }

    #[test]
    fn severity_parses_case_insensitively() {
        assert_eq!(Severity::parse("failure"), Some(Severity::Failure));
        assert_eq!(Severity::parse("WARNING"), Some(Severity::Warning));
        assert_eq!(Severity::parse("fatal"), None);
    }

    #[test]
    fn pull_request_matches_variant() {
        let pull = SignalMessage::pull_request("urn:mpc:one");
        assert!(pull.is_pull_request());
        match pull.signal {
            Signal::PullRequest { ref mpc } => assert_eq!(mpc, "urn:mpc:one"),
            _ => panic!("expected pull request signal"),
        }
    }
}
