//! Reception-awareness retries, acknowledgment correlation and duplicate
//! detection.
//!
//! The persisted record is the single source of truth: every transition is
//! one read-modify-write against the repository, so a crashed attempt can
//! be re-evaluated after restart without double-incrementing the retry
//! count.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use as4_core::ids::MessageId;
use as4_core::units::{SignalMessage, UserMessage};

use crate::pmode::{ReceivingPMode, ReceptionAwarenessConfig};
use crate::store::{MessageRepository, Operation, OutStatus, StoreError};

/// Errors raised by the reliability engine.
#[derive(Debug, Error)]
pub enum ReliabilityError {
    /// Retry bound reached; the message has been dead-lettered.
    #[error("retries exhausted for message {0}")]
    RetryExhausted(MessageId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Retry status of one outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryStatus {
    /// Waiting for an ack; eligible for retry once the interval elapses.
    Pending,
    /// A retry attempt is in flight; not eligible until it reports back.
    Busy,
    /// Acknowledged (positively or negatively); no further retries.
    Completed,
    /// Retry bound reached without an ack.
    DeadLettered,
}

/// Reception-awareness row, keyed uniquely by the OutMessage it tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceptionAwarenessRecord {
    pub ref_to_message_id: MessageId,
    pub status: RetryStatus,
    pub current_retry_count: u32,
    pub total_retry_count: u32,
    pub retry_interval_secs: u64,
    pub last_send_time: DateTime<Utc>,
}

/// Storage contract for reception-awareness records.
pub trait ReceptionAwarenessRepository {
    /// Inserts the record unless one already exists for the same message.
    fn register(&mut self, record: ReceptionAwarenessRecord) -> Result<(), StoreError>;
    fn by_message(
        &self,
        ref_to_message_id: &MessageId,
    ) -> Result<Option<ReceptionAwarenessRecord>, StoreError>;
    fn update(
        &mut self,
        ref_to_message_id: &MessageId,
        update: &mut dyn FnMut(&mut ReceptionAwarenessRecord),
    ) -> Result<(), StoreError>;
    /// All records in the given status, the indexed retry-agent query.
    fn by_status(&self, status: RetryStatus) -> Result<Vec<ReceptionAwarenessRecord>, StoreError>;
}

/// In-memory reception-awareness table.
#[derive(Debug, Default)]
pub struct InMemoryReceptionAwareness {
    records: Vec<ReceptionAwarenessRecord>,
}

impl InMemoryReceptionAwareness {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReceptionAwarenessRepository for InMemoryReceptionAwareness {
    fn register(&mut self, record: ReceptionAwarenessRecord) -> Result<(), StoreError> {
        if self
            .records
            .iter()
            .any(|r| r.ref_to_message_id == record.ref_to_message_id)
        {
            return Ok(());
        }
        self.records.push(record);
        Ok(())
    }

    fn by_message(
        &self,
        ref_to_message_id: &MessageId,
    ) -> Result<Option<ReceptionAwarenessRecord>, StoreError> {
        Ok(self
            .records
            .iter()
            .find(|r| r.ref_to_message_id == *ref_to_message_id)
            .cloned())
    }

    fn update(
        &mut self,
        ref_to_message_id: &MessageId,
        update: &mut dyn FnMut(&mut ReceptionAwarenessRecord),
    ) -> Result<(), StoreError> {
        let record = self
            .records
            .iter_mut()
            .find(|r| r.ref_to_message_id == *ref_to_message_id)
            .ok_or_else(|| StoreError::NotFound(ref_to_message_id.clone()))?;
        update(record);
        Ok(())
    }

    fn by_status(&self, status: RetryStatus) -> Result<Vec<ReceptionAwarenessRecord>, StoreError> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.status == status)
            .cloned()
            .collect())
    }
}

/// Registers the first send of an outbound message; idempotent, so a
/// restarted attempt never resets an existing record.
pub fn register_first_send(
    retries: &mut impl ReceptionAwarenessRepository,
    message_id: &MessageId,
    config: &ReceptionAwarenessConfig,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    retries.register(ReceptionAwarenessRecord {
        ref_to_message_id: message_id.clone(),
        status: RetryStatus::Pending,
        current_retry_count: 0,
        total_retry_count: config.retry_count,
        retry_interval_secs: config.retry_interval_secs,
        last_send_time: now,
    })
}

/// Applies a received Receipt: completes the retry loop and marks the
/// referenced OutMessage Ack.
///
/// `allow_duplicate_status_update` governs whether a duplicate receipt may
/// re-apply the status change.
pub fn process_receipt(
    repository: &mut impl MessageRepository,
    retries: &mut impl ReceptionAwarenessRepository,
    ref_to_message_id: &MessageId,
    is_duplicate: bool,
    allow_duplicate_status_update: bool,
) -> Result<(), StoreError> {
    if is_duplicate && !allow_duplicate_status_update {
        debug!(message = %ref_to_message_id, "ignoring duplicate receipt");
        return Ok(());
    }
    complete_retries(retries, ref_to_message_id)?;
    repository.update_out_message(ref_to_message_id, &mut |record| {
        record.status = OutStatus::Ack;
    })?;
    info!(message = %ref_to_message_id, "acknowledged");
    Ok(())
}

/// Applies a received Error signal: terminal for retries, OutMessage Nack.
pub fn process_error(
    repository: &mut impl MessageRepository,
    retries: &mut impl ReceptionAwarenessRepository,
    ref_to_message_id: &MessageId,
    is_duplicate: bool,
    allow_duplicate_status_update: bool,
) -> Result<(), StoreError> {
    if is_duplicate && !allow_duplicate_status_update {
        debug!(message = %ref_to_message_id, "ignoring duplicate error signal");
        return Ok(());
    }
    complete_retries(retries, ref_to_message_id)?;
    repository.update_out_message(ref_to_message_id, &mut |record| {
        record.status = OutStatus::Nack;
    })?;
    warn!(message = %ref_to_message_id, "negatively acknowledged");
    Ok(())
}

fn complete_retries(
    retries: &mut impl ReceptionAwarenessRepository,
    ref_to_message_id: &MessageId,
) -> Result<(), StoreError> {
    if retries.by_message(ref_to_message_id)?.is_some() {
        retries.update(ref_to_message_id, &mut |record| {
            record.status = RetryStatus::Completed;
        })?;
    }
    Ok(())
}

/// Evaluates pending records against the clock.
///
/// Records whose interval elapsed and whose bound is not yet reached are
/// moved to Busy with the count incremented in the same update, and
/// returned for resending. Records at the bound are dead-lettered and the
/// referenced OutMessage marked Exception.
pub fn evaluate_due_retries(
    repository: &mut impl MessageRepository,
    retries: &mut impl ReceptionAwarenessRepository,
    now: DateTime<Utc>,
) -> Result<Vec<MessageId>, StoreError> {
    let mut due = Vec::new();
    for record in retries.by_status(RetryStatus::Pending)? {
        let deadline =
            record.last_send_time + Duration::seconds(record.retry_interval_secs as i64);
        if now < deadline {
            continue;
        }
        if record.current_retry_count < record.total_retry_count {
            retries.update(&record.ref_to_message_id, &mut |r| {
                r.status = RetryStatus::Busy;
                r.current_retry_count += 1;
                r.last_send_time = now;
            })?;
            debug!(
                message = %record.ref_to_message_id,
                retry = record.current_retry_count + 1,
                "retry due"
            );
            due.push(record.ref_to_message_id.clone());
        } else {
            dead_letter(repository, retries, &record.ref_to_message_id)?;
        }
    }
    Ok(due)
}

/// Reports the outcome of a retry attempt issued by [`evaluate_due_retries`].
/// Success or failure both return the record to Pending; the next
/// evaluation decides whether to retry again or dead-letter.
pub fn finish_retry_attempt(
    retries: &mut impl ReceptionAwarenessRepository,
    ref_to_message_id: &MessageId,
) -> Result<(), StoreError> {
    retries.update(ref_to_message_id, &mut |record| {
        if record.status == RetryStatus::Busy {
            record.status = RetryStatus::Pending;
        }
    })
}

fn dead_letter(
    repository: &mut impl MessageRepository,
    retries: &mut impl ReceptionAwarenessRepository,
    ref_to_message_id: &MessageId,
) -> Result<(), StoreError> {
    retries.update(ref_to_message_id, &mut |record| {
        record.status = RetryStatus::DeadLettered;
    })?;
    repository.update_out_message(ref_to_message_id, &mut |record| {
        record.status = OutStatus::Exception;
        record.operation = Operation::DeadLettered;
    })?;
    warn!(message = %ref_to_message_id, "dead-lettered after retry exhaustion");
    Ok(())
}

/// Flags duplicates on a batch of received user messages with one
/// existing-ids query.
pub fn flag_duplicates(
    repository: &impl MessageRepository,
    user_messages: &mut [UserMessage],
) -> Result<(), StoreError> {
    let ids: Vec<MessageId> = user_messages
        .iter()
        .map(|m| m.message_id.clone())
        .collect();
    let existing = repository.existing_message_ids(&ids)?;
    for message in user_messages {
        if existing.contains(&message.message_id) {
            message.is_duplicate = true;
            debug!(message = %message.message_id, "duplicate user message");
        }
    }
    Ok(())
}

/// Flags duplicates on a batch of received signal messages.
pub fn flag_duplicate_signals(
    repository: &impl MessageRepository,
    signals: &mut [SignalMessage],
) -> Result<(), StoreError> {
    let ids: Vec<MessageId> = signals.iter().map(|s| s.message_id.clone()).collect();
    let existing = repository.existing_message_ids(&ids)?;
    for signal in signals {
        if existing.contains(&signal.message_id) {
            signal.is_duplicate = true;
            debug!(message = %signal.message_id, "duplicate signal message");
        }
    }
    Ok(())
}

/// Delivery operation for a received user message under the PMode's
/// duplicate policy.
pub fn delivery_operation(user_message: &UserMessage, pmode: &ReceivingPMode) -> Operation {
    if user_message.is_duplicate && pmode.duplicate_elimination {
        Operation::NotApplicable
    } else {
        Operation::ToBeDelivered
    }
}

#[cfg(test)]
mod tests {
    use super::{
        delivery_operation, evaluate_due_retries, finish_retry_attempt, flag_duplicates,
        process_error, process_receipt, register_first_send, InMemoryReceptionAwareness,
        ReceptionAwarenessRepository, RetryStatus,
    };
    use crate::pmode::{ReceivingPMode, ReceptionAwarenessConfig};
    use crate::store::{
        InMemoryMessageStore, InMessageRecord, InStatus, MessageRepository, MessageType,
        Operation, OutMessageRecord, OutStatus,
    };
    use as4_core::ids::MessageId;
    use as4_core::model::{CollaborationInfo, Party, PartyId, Service};
    use as4_core::units::UserMessage;
    use chrono::{Duration, Utc};

    fn out_record(id: &str) -> OutMessageRecord {
        OutMessageRecord {
            message_id: MessageId::from(id),
            ref_to_message_id: None,
            message_type: MessageType::UserMessage,
            status: OutStatus::Sent,
            operation: Operation::Sent,
            mpc: "mpc:default".to_string(),
            pmode_snapshot: None,
            body_location: None,
            content_type: None,
            insertion_time: Utc::now(),
        }
    }

    fn config(retry_count: u32) -> ReceptionAwarenessConfig {
        ReceptionAwarenessConfig {
            enabled: true,
            retry_count,
            retry_interval_secs: 60,
        }
    }

    #[test]
    fn receipt_completes_retries_and_acks() {
        let mut store = InMemoryMessageStore::new();
        let mut retries = InMemoryReceptionAwareness::new();
        let id = MessageId::from("out-1");
        store.insert_out_message(out_record("out-1")).expect("insert should work");
        register_first_send(&mut retries, &id, &config(5), Utc::now())
            .expect("register should work");

        process_receipt(&mut store, &mut retries, &id, false, true)
            .expect("receipt should apply");
        assert_eq!(store.out_message(&id).expect("record").status, OutStatus::Ack);
        assert_eq!(
            retries.by_message(&id).expect("query").expect("record").status,
            RetryStatus::Completed
        );
    }

    #[test]
    fn error_signal_is_terminal_for_retries() {
        let mut store = InMemoryMessageStore::new();
        let mut retries = InMemoryReceptionAwareness::new();
        let id = MessageId::from("out-1");
        store.insert_out_message(out_record("out-1")).expect("insert should work");
        register_first_send(&mut retries, &id, &config(5), Utc::now())
            .expect("register should work");

        process_error(&mut store, &mut retries, &id, false, true)
            .expect("error should apply");
        assert_eq!(store.out_message(&id).expect("record").status, OutStatus::Nack);

        let now = Utc::now() + Duration::seconds(3600);
        let due = evaluate_due_retries(&mut store, &mut retries, now)
            .expect("evaluation should work");
        assert!(due.is_empty(), "nacked message must not be retried");
    }

    #[test]
    fn retry_bound_is_exact_and_dead_letters() {
        let mut store = InMemoryMessageStore::new();
        let mut retries = InMemoryReceptionAwareness::new();
        let id = MessageId::from("out-1");
        store.insert_out_message(out_record("out-1")).expect("insert should work");
        let mut now = Utc::now();
        register_first_send(&mut retries, &id, &config(5), now)
            .expect("register should work");

        let mut attempts = 0;
        for _ in 0..10 {
            now += Duration::seconds(61);
            let due = evaluate_due_retries(&mut store, &mut retries, now)
                .expect("evaluation should work");
            for message_id in &due {
                attempts += 1;
                finish_retry_attempt(&mut retries, message_id)
                    .expect("attempt should finish");
            }
        }

        assert_eq!(attempts, 5, "exactly the configured number of retries");
        assert_eq!(
            retries.by_message(&id).expect("query").expect("record").status,
            RetryStatus::DeadLettered
        );
        let record = store.out_message(&id).expect("record");
        assert_eq!(record.status, OutStatus::Exception);
        assert_eq!(record.operation, Operation::DeadLettered);
    }

    #[test]
    fn busy_records_are_not_re_evaluated() {
        let mut store = InMemoryMessageStore::new();
        let mut retries = InMemoryReceptionAwareness::new();
        let id = MessageId::from("out-1");
        store.insert_out_message(out_record("out-1")).expect("insert should work");
        let start = Utc::now();
        register_first_send(&mut retries, &id, &config(5), start)
            .expect("register should work");

        let now = start + Duration::seconds(61);
        let first = evaluate_due_retries(&mut store, &mut retries, now)
            .expect("evaluation should work");
        assert_eq!(first.len(), 1);

        // The attempt is still in flight; a concurrent evaluation at the
        // same instant must not hand it out again.
        let second = evaluate_due_retries(&mut store, &mut retries, now)
            .expect("evaluation should work");
        assert!(second.is_empty());
    }

    #[test]
    fn registration_is_idempotent_across_restarts() {
        let mut retries = InMemoryReceptionAwareness::new();
        let id = MessageId::from("out-1");
        let start = Utc::now();
        register_first_send(&mut retries, &id, &config(5), start)
            .expect("register should work");
        retries
            .update(&id, &mut |r| r.current_retry_count = 3)
            .expect("update should work");

        register_first_send(&mut retries, &id, &config(5), start + Duration::seconds(5))
            .expect("re-register should work");
        assert_eq!(
            retries
                .by_message(&id)
                .expect("query")
                .expect("record")
                .current_retry_count,
            3,
            "existing progress must survive re-registration"
        );
    }

    fn received_message(id: &str) -> UserMessage {
        UserMessage::new(
            MessageId::from(id),
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

    #[test]
    fn duplicates_are_flagged_and_eliminated() {
        let mut store = InMemoryMessageStore::new();
        store
            .insert_in_message(InMessageRecord {
                message_id: MessageId::from("in-1"),
                ref_to_message_id: None,
                message_type: MessageType::UserMessage,
                status: InStatus::Received,
                operation: Operation::ToBeDelivered,
                pmode_id: None,
                body_location: None,
                is_duplicate: false,
                insertion_time: Utc::now(),
            })
            .expect("insert should work");

        let mut messages = vec![received_message("in-1"), received_message("in-2")];
        flag_duplicates(&store, &mut messages).expect("flagging should work");
        assert!(messages[0].is_duplicate);
        assert!(!messages[1].is_duplicate);

        let mut pmode = ReceivingPMode::new("pm");
        pmode.duplicate_elimination = true;
        assert_eq!(
            delivery_operation(&messages[0], &pmode),
            Operation::NotApplicable
        );
        assert_eq!(
            delivery_operation(&messages[1], &pmode),
            Operation::ToBeDelivered
        );

        pmode.duplicate_elimination = false;
        assert_eq!(
            delivery_operation(&messages[0], &pmode),
            Operation::ToBeDelivered
        );
    }

    #[test]
    fn duplicate_signal_status_update_is_configurable() {
        let mut store = InMemoryMessageStore::new();
        let mut retries = InMemoryReceptionAwareness::new();
        let id = MessageId::from("out-1");
        store.insert_out_message(out_record("out-1")).expect("insert should work");

        process_receipt(&mut store, &mut retries, &id, true, false)
            .expect("ignored duplicate should succeed");
        assert_eq!(store.out_message(&id).expect("record").status, OutStatus::Sent);

        process_receipt(&mut store, &mut retries, &id, true, true)
            .expect("allowed duplicate should apply");
        assert_eq!(store.out_message(&id).expect("record").status, OutStatus::Ack);
    }
}
