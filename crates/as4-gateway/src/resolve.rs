//! PMode resolution by deterministic point scoring.

use thiserror::Error;
use tracing::debug;

use as4_core::ids::MessageId;
use as4_core::units::{SignalMessage, UserMessage};

use crate::pmode::{PModeCatalog, ReceivingPMode, SendingPMode};
use crate::store::{MessageRepository, StoreError};

/// Errors raised while resolving PModes.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No candidate PMode reached the viability threshold.
    #[error("no matching pmode for the incoming message")]
    NoMatchingPMode,
    /// Two or more candidates tied at the maximum score; a configuration
    /// error, never resolved by first-match.
    #[error("more than one matching pmode found")]
    AmbiguousPMode,
    /// Signal refers to an OutMessage the store does not know.
    #[error("no sent message with id {0}")]
    UnknownReferencedMessage(MessageId),
    /// A referenced SendingPMode id resolves to nothing in the catalog.
    #[error("dangling pmode reference: {0}")]
    DanglingPModeReference(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Decisive score for an explicit PMode-Id match; higher than every other
/// combination so it wins outright.
const SCORE_PMODE_ID: u32 = 30;
/// Party (From+To) match outweighs Service+Action combined.
const SCORE_PARTY: u32 = 12;
const SCORE_SERVICE: u32 = 5;
const SCORE_ACTION: u32 = 5;
/// Agreement alone stays below the viability threshold by design of the
/// insufficient-discriminator policy.
const SCORE_AGREEMENT: u32 = 2;
/// Minimum score for a candidate to be viable.
const VIABLE_THRESHOLD: u32 = 10;

fn score(pmode: &ReceivingPMode, user_message: &UserMessage) -> u32 {
    if let Some(agreement) = &user_message.collaboration.agreement {
        if agreement.pmode_id.as_deref() == Some(pmode.id.as_str()) {
            return SCORE_PMODE_ID;
        }
    }

    let packaging = &pmode.packaging;
    let mut points = 0;
    if let (Some(sender), Some(receiver)) = (&packaging.sender, &packaging.receiver) {
        if *sender == user_message.sender && *receiver == user_message.receiver {
            points += SCORE_PARTY;
        }
    }
    if packaging.service.as_ref() == Some(&user_message.collaboration.service) {
        points += SCORE_SERVICE;
    }
    if packaging.action.as_deref() == Some(user_message.collaboration.action.as_str()) {
        points += SCORE_ACTION;
    }
    if packaging.agreement.is_some()
        && packaging.agreement == user_message.collaboration.agreement
    {
        points += SCORE_AGREEMENT;
    }
    points
}

/// Selects the single best-matching ReceivingPMode for a received user
/// message.
pub fn determine_receiving_pmode(
    user_message: &UserMessage,
    candidates: &[ReceivingPMode],
) -> Result<ReceivingPMode, ResolveError> {
    let mut best: Option<(&ReceivingPMode, u32)> = None;
    let mut tied = false;
    for candidate in candidates {
        let points = score(candidate, user_message);
        debug!(pmode = %candidate.id, points, "scored candidate pmode");
        if points < VIABLE_THRESHOLD {
            continue;
        }
        match best {
            Some((_, top)) if points > top => {
                best = Some((candidate, points));
                tied = false;
            }
            Some((_, top)) if points == top => tied = true,
            None => best = Some((candidate, points)),
            Some(_) => {}
        }
    }

    match best {
        None => Err(ResolveError::NoMatchingPMode),
        Some(_) if tied => Err(ResolveError::AmbiguousPMode),
        Some((winner, points)) => {
            debug!(pmode = %winner.id, points, "resolved receiving pmode");
            Ok(winner.clone())
        }
    }
}

/// Recovers the SendingPMode governing a received signal.
///
/// Primary source is the PMode snapshot persisted with the OutMessage the
/// signal refers to; when that message is unknown, the resolved
/// ReceivingPMode's reply-pmode reference is chased through the catalog.
pub fn determine_sending_pmode_for_signal(
    signal: &SignalMessage,
    repository: &impl MessageRepository,
    catalog: &impl PModeCatalog,
    receiving: Option<&ReceivingPMode>,
) -> Result<SendingPMode, ResolveError> {
    if let Some(ref_id) = &signal.ref_to_message_id {
        if let Some(record) = repository.out_message_by_ref(ref_id)? {
            if let Some(snapshot) = &record.pmode_snapshot {
                let pmode: SendingPMode = serde_json::from_str(snapshot)
                    .map_err(|e| StoreError::InvalidSnapshot(e.to_string()))?;
                return Ok(pmode);
            }
        }
    }

    let fallback_id = receiving.and_then(|pmode| pmode.reply_pmode_id.as_deref());
    match fallback_id {
        Some(id) => catalog
            .sending_pmode(id)
            .ok_or_else(|| ResolveError::DanglingPModeReference(id.to_string())),
        None => {
            let ref_id = signal
                .ref_to_message_id
                .clone()
                .unwrap_or_else(|| signal.message_id.clone());
            Err(ResolveError::UnknownReferencedMessage(ref_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        determine_receiving_pmode, determine_sending_pmode_for_signal, ResolveError,
    };
    use crate::pmode::{PModeCatalog, ReceivingPMode, SendingPMode, StaticCatalog};
    use crate::store::{
        InMemoryMessageStore, MessageRepository, MessageType, Operation, OutMessageRecord,
        OutStatus,
    };
    use as4_core::ids::MessageId;
    use as4_core::model::{
        AgreementReference, CollaborationInfo, Party, PartyId, Service,
    };
    use as4_core::units::{SignalMessage, UserMessage};
    use chrono::Utc;

    fn incoming_message() -> UserMessage {
        UserMessage::new(
            MessageId::from("in-1@peer"),
            Party::new("Sender", vec![PartyId::new("org:a")]),
            Party::new("Receiver", vec![PartyId::new("org:b")]),
            CollaborationInfo {
                service: Service::new("urn:orders"),
                action: "urn:submit".to_string(),
                conversation_id: "conv".to_string(),
                agreement: None,
            },
        )
    }

    fn party_match_pmode(id: &str) -> ReceivingPMode {
        let mut pmode = ReceivingPMode::new(id);
        pmode.packaging.sender = Some(Party::new("Sender", vec![PartyId::new("org:a")]));
        pmode.packaging.receiver = Some(Party::new("Receiver", vec![PartyId::new("org:b")]));
        pmode
    }

    fn service_action_pmode(id: &str) -> ReceivingPMode {
        let mut pmode = ReceivingPMode::new(id);
        pmode.packaging.service = Some(Service::new("urn:orders"));
        pmode.packaging.action = Some("urn:submit".to_string());
        pmode
    }

    #[test]
    fn party_match_beats_service_and_action() {
        let candidates = vec![service_action_pmode("pm-sa"), party_match_pmode("pm-party")];
        let winner = determine_receiving_pmode(&incoming_message(), &candidates)
            .expect("resolution should work");
        assert_eq!(winner.id, "pm-party");
    }

    #[test]
    fn explicit_pmode_id_wins_outright() {
        let mut message = incoming_message();
        message.collaboration.agreement = Some(AgreementReference {
            value: "agr-1".to_string(),
            agreement_type: None,
            pmode_id: Some("pm-direct".to_string()),
        });
        let candidates = vec![party_match_pmode("pm-party"), ReceivingPMode::new("pm-direct")];
        let winner =
            determine_receiving_pmode(&message, &candidates).expect("resolution should work");
        assert_eq!(winner.id, "pm-direct");
    }

    #[test]
    fn agreement_alone_is_never_sufficient() {
        let mut message = incoming_message();
        let agreement = AgreementReference {
            value: "agr-1".to_string(),
            agreement_type: None,
            pmode_id: None,
        };
        message.collaboration.agreement = Some(agreement.clone());
        let mut pmode = ReceivingPMode::new("pm-agr");
        pmode.packaging.agreement = Some(agreement);

        let err = determine_receiving_pmode(&message, &[pmode])
            .expect_err("agreement-only match must not resolve");
        assert!(matches!(err, ResolveError::NoMatchingPMode));
    }

    #[test]
    fn tied_maximum_is_ambiguous() {
        let candidates = vec![party_match_pmode("pm-1"), party_match_pmode("pm-2")];
        let err = determine_receiving_pmode(&incoming_message(), &candidates)
            .expect_err("tie must fail");
        assert!(matches!(err, ResolveError::AmbiguousPMode));
    }

    #[test]
    fn no_viable_candidate_fails() {
        let err = determine_receiving_pmode(&incoming_message(), &[ReceivingPMode::new("pm-x")])
            .expect_err("zero points must fail");
        assert!(matches!(err, ResolveError::NoMatchingPMode));
    }

    #[test]
    fn signal_pmode_comes_from_the_out_message_snapshot() {
        let sent_pmode = SendingPMode::new("pm-send", "https://peer.example/as4");
        let mut store = InMemoryMessageStore::new();
        store
            .insert_out_message(OutMessageRecord {
                message_id: MessageId::from("out-1@here"),
                ref_to_message_id: None,
                message_type: MessageType::UserMessage,
                status: OutStatus::Sent,
                operation: Operation::Sent,
                mpc: "mpc:default".to_string(),
                pmode_snapshot: Some(
                    serde_json::to_string(&sent_pmode).expect("snapshot should serialize"),
                ),
                body_location: None,
                content_type: None,
                insertion_time: Utc::now(),
            })
            .expect("insert should work");

        let mut receipt = SignalMessage::pull_request("mpc:default");
        receipt.ref_to_message_id = Some(MessageId::from("out-1@here"));
        let catalog = StaticCatalog::default();
        let resolved =
            determine_sending_pmode_for_signal(&receipt, &store, &catalog, None)
                .expect("snapshot should resolve");
        assert_eq!(resolved.id, "pm-send");
    }

    #[test]
    fn signal_falls_back_to_the_catalog_reference() {
        let store = InMemoryMessageStore::new();
        let catalog = StaticCatalog::new(
            Vec::new(),
            vec![SendingPMode::new("pm-reply", "https://peer.example/as4")],
        );
        let mut receiving = ReceivingPMode::new("pm-recv");
        receiving.reply_pmode_id = Some("pm-reply".to_string());

        let mut signal = SignalMessage::pull_request("mpc:default");
        signal.ref_to_message_id = Some(MessageId::from("ghost@peer"));
        let resolved =
            determine_sending_pmode_for_signal(&signal, &store, &catalog, Some(&receiving))
                .expect("fallback should resolve");
        assert_eq!(resolved.id, "pm-reply");

        receiving.reply_pmode_id = Some("pm-missing".to_string());
        let err =
            determine_sending_pmode_for_signal(&signal, &store, &catalog, Some(&receiving))
                .expect_err("missing catalog entry must fail");
        assert!(matches!(err, ResolveError::DanglingPModeReference(_)));
        assert!(catalog.sending_pmode("pm-reply").is_some());
    }

    #[test]
    fn unknown_reference_without_fallback_fails() {
        let store = InMemoryMessageStore::new();
        let catalog = StaticCatalog::default();
        let mut signal = SignalMessage::pull_request("mpc:default");
        signal.ref_to_message_id = Some(MessageId::from("ghost@peer"));
        let err = determine_sending_pmode_for_signal(&signal, &store, &catalog, None)
            .expect_err("unknown reference must fail");
        assert!(matches!(err, ResolveError::UnknownReferencedMessage(_)));
    }
}
