//! Processing-mode (PMode) configuration model and catalog seam.
//!
//! PModes are loaded externally (files, database); this module only defines
//! their shape and the lookup contract the resolver works against.

use serde::{Deserialize, Serialize};

use as4_core::model::{AgreementReference, Party, Service};

/// Message exchange pattern of the agreed exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MessageExchangePattern {
    #[default]
    OneWay,
    TwoWay,
}

/// Who initiates the transfer leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MepBinding {
    #[default]
    Push,
    Pull,
}

/// Policy stance towards an inbound security feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Requirement {
    #[default]
    Allowed,
    NotAllowed,
    Required,
    Ignored,
}

/// How signals travel back to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ReplyPattern {
    /// Signal rides the HTTP response of the original exchange.
    #[default]
    Response,
    /// Signal is pushed later to a callback endpoint.
    Callback,
}

/// Receipt/error reply handling for received user messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReplyHandling {
    pub pattern: ReplyPattern,
    /// Non-repudiation receipts echo the verified signature references.
    pub non_repudiation: bool,
    /// Callback endpoint, required when `pattern` is Callback.
    pub callback_url: Option<String>,
}

/// Matching criteria and packaging parameters of a PMode leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MessagePackaging {
    pub sender: Option<Party>,
    pub receiver: Option<Party>,
    pub service: Option<Service>,
    pub action: Option<String>,
    pub agreement: Option<AgreementReference>,
    /// Message partition channel; `None` means the default MPC.
    pub mpc: Option<String>,
    pub multihop: bool,
    pub compression: bool,
}

/// Retry policy for reception awareness on outbound messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceptionAwarenessConfig {
    pub enabled: bool,
    /// Maximum number of retries after the first send.
    pub retry_count: u32,
    pub retry_interval_secs: u64,
}

impl Default for ReceptionAwarenessConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            retry_count: 5,
            retry_interval_secs: 60,
        }
    }
}

/// Signing policy for an outbound leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningPolicy {
    /// Alias of the local certificate holding the private key.
    pub certificate_alias: String,
}

/// Encryption policy for an outbound leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionPolicy {
    /// Alias of the receiver's certificate.
    pub certificate_alias: String,
    /// XML-ENC data-encryption algorithm URI.
    pub algorithm: String,
}

/// PMode governing inbound user messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivingPMode {
    pub id: String,
    pub mep: MessageExchangePattern,
    pub binding: MepBinding,
    pub packaging: MessagePackaging,
    pub signing: Requirement,
    pub encryption: Requirement,
    pub duplicate_elimination: bool,
    /// Whether a duplicate signal may still update the referenced
    /// OutMessage status (idempotent re-ack) or is ignored entirely.
    pub allow_duplicate_signal_status_update: bool,
    pub reply: ReplyHandling,
    /// SendingPMode used for replies when the original OutMessage snapshot
    /// cannot provide one.
    pub reply_pmode_id: Option<String>,
}

impl ReceivingPMode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            mep: MessageExchangePattern::default(),
            binding: MepBinding::default(),
            packaging: MessagePackaging::default(),
            signing: Requirement::default(),
            encryption: Requirement::default(),
            duplicate_elimination: false,
            allow_duplicate_signal_status_update: true,
            reply: ReplyHandling::default(),
            reply_pmode_id: None,
        }
    }
}

/// PMode governing outbound user messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendingPMode {
    pub id: String,
    pub mep: MessageExchangePattern,
    pub binding: MepBinding,
    /// Receiver endpoint for push sends.
    pub endpoint: String,
    pub packaging: MessagePackaging,
    pub signing: Option<SigningPolicy>,
    pub encryption: Option<EncryptionPolicy>,
    pub reception_awareness: ReceptionAwarenessConfig,
}

impl SendingPMode {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            mep: MessageExchangePattern::default(),
            binding: MepBinding::default(),
            endpoint: endpoint.into(),
            packaging: MessagePackaging::default(),
            signing: None,
            encryption: None,
            reception_awareness: ReceptionAwarenessConfig::default(),
        }
    }
}

/// Read access to the installed PModes.
pub trait PModeCatalog {
    fn receiving_pmodes(&self) -> Vec<ReceivingPMode>;
    fn sending_pmode(&self, id: &str) -> Option<SendingPMode>;
}

/// Fixed catalog populated at construction; the usual test and bootstrap
/// implementation.
#[derive(Debug, Default, Clone)]
pub struct StaticCatalog {
    receiving: Vec<ReceivingPMode>,
    sending: Vec<SendingPMode>,
}

impl StaticCatalog {
    pub fn new(receiving: Vec<ReceivingPMode>, sending: Vec<SendingPMode>) -> Self {
        Self { receiving, sending }
    }
}

impl PModeCatalog for StaticCatalog {
    fn receiving_pmodes(&self) -> Vec<ReceivingPMode> {
        self.receiving.clone()
    }

    fn sending_pmode(&self, id: &str) -> Option<SendingPMode> {
        self.sending.iter().find(|p| p.id == id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::{PModeCatalog, ReceivingPMode, SendingPMode, StaticCatalog};

    #[test]
    fn sending_pmode_round_trips_as_json() {
        let pmode = SendingPMode::new("pm-send", "https://peer.example/as4");
        let json = serde_json::to_string(&pmode).expect("serialize should work");
        let decoded: SendingPMode =
            serde_json::from_str(&json).expect("deserialize should work");
        assert_eq!(decoded, pmode);
    }

    #[test]
    fn static_catalog_looks_up_by_id() {
        let catalog = StaticCatalog::new(
            vec![ReceivingPMode::new("pm-recv")],
            vec![SendingPMode::new("pm-send", "https://peer.example/as4")],
        );
        assert_eq!(catalog.receiving_pmodes().len(), 1);
        assert!(catalog.sending_pmode("pm-send").is_some());
        assert!(catalog.sending_pmode("missing").is_none());
    }
}
