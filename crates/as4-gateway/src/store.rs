//! Datastore contracts and the in-memory reference implementation.
//!
//! Metadata records live behind [`MessageRepository`]; large payload bytes
//! go through [`MessageBodyStore`] so they never bloat the metadata rows.
//! The in-memory store doubles as the reference semantics for the
//! pull-and-mark-sending critical section.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use as4_core::ids::MessageId;

/// Errors raised by datastore operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transient backend failure; callers retry a bounded number of times.
    #[error("datastore unavailable: {0}")]
    Unavailable(String),
    /// Insert would violate the unique ebMS message id constraint.
    #[error("duplicate message id: {0}")]
    DuplicateKey(MessageId),
    /// Update or load targeted a record that does not exist.
    #[error("no record for message id: {0}")]
    NotFound(MessageId),
    /// Body location token does not resolve to stored bytes.
    #[error("no message body at location: {0}")]
    UnknownBodyLocation(String),
    /// Persisted PMode snapshot could not be decoded.
    #[error("invalid pmode snapshot: {0}")]
    InvalidSnapshot(String),
}

impl StoreError {
    /// Whether the caller may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Runs `operation`, retrying up to `attempts` times while the failure is
/// retryable. Non-retryable errors surface immediately.
pub fn with_store_retries<T>(
    attempts: u32,
    mut operation: impl FnMut() -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    let mut remaining = attempts;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && remaining > 0 => {
                remaining -= 1;
                warn!(error = %err, remaining, "retrying datastore operation");
            }
            Err(err) => return Err(err),
        }
    }
}

/// Which message unit a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    UserMessage,
    Receipt,
    Error,
    PullRequest,
}

/// Internal processing operation of a message unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Suppressed: duplicate under duplicate elimination.
    NotApplicable,
    ToBeProcessed,
    ToBeDelivered,
    Delivered,
    ToBeSent,
    Sending,
    Sent,
    DeadLettered,
}

/// External status of a received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InStatus {
    Received,
    Delivered,
    Exception,
}

/// External status of a sent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutStatus {
    NotApplicable,
    Sent,
    Ack,
    Nack,
    Exception,
}

/// Metadata row for a received message unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InMessageRecord {
    pub message_id: MessageId,
    pub ref_to_message_id: Option<MessageId>,
    pub message_type: MessageType,
    pub status: InStatus,
    pub operation: Operation,
    pub pmode_id: Option<String>,
    pub body_location: Option<String>,
    pub is_duplicate: bool,
    pub insertion_time: DateTime<Utc>,
}

/// Metadata row for an outbound message unit. Carries a JSON snapshot of
/// the SendingPMode so signal replies resolve against the exact
/// configuration in force at send time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutMessageRecord {
    pub message_id: MessageId,
    pub ref_to_message_id: Option<MessageId>,
    pub message_type: MessageType,
    pub status: OutStatus,
    pub operation: Operation,
    pub mpc: String,
    pub pmode_snapshot: Option<String>,
    pub body_location: Option<String>,
    /// Wire content type of the stored body, needed to replay it.
    pub content_type: Option<String>,
    pub insertion_time: DateTime<Utc>,
}

/// Dead-letter record with bounded remediation detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionRecord {
    pub message_id: Option<MessageId>,
    pub detail: String,
    pub insertion_time: DateTime<Utc>,
}

const EXCEPTION_DETAIL_LIMIT: usize = 1024;

impl ExceptionRecord {
    /// Builds a record, truncating the detail to a bounded size.
    pub fn new(message_id: Option<MessageId>, detail: impl Into<String>) -> Self {
        let mut detail = detail.into();
        if detail.len() > EXCEPTION_DETAIL_LIMIT {
            let mut end = EXCEPTION_DETAIL_LIMIT;
            while !detail.is_char_boundary(end) {
                end -= 1;
            }
            detail.truncate(end);
        }
        Self {
            message_id,
            detail,
            insertion_time: Utc::now(),
        }
    }
}

/// Metadata repository keyed by unique ebMS message id.
pub trait MessageRepository {
    fn insert_in_message(&mut self, record: InMessageRecord) -> Result<(), StoreError>;
    fn update_in_message(
        &mut self,
        id: &MessageId,
        update: &mut dyn FnMut(&mut InMessageRecord),
    ) -> Result<(), StoreError>;
    fn insert_out_message(&mut self, record: OutMessageRecord) -> Result<(), StoreError>;
    fn update_out_message(
        &mut self,
        id: &MessageId,
        update: &mut dyn FnMut(&mut OutMessageRecord),
    ) -> Result<(), StoreError>;
    /// Which of `ids` already exist, for batch duplicate detection.
    fn existing_message_ids(&self, ids: &[MessageId]) -> Result<Vec<MessageId>, StoreError>;
    /// Outbound message a signal refers to.
    fn out_message_by_ref(
        &self,
        ref_to_message_id: &MessageId,
    ) -> Result<Option<OutMessageRecord>, StoreError>;
    /// Atomically selects the next ToBeSent message on `mpc` and marks it
    /// Sending, so concurrent pull handlers never double-send.
    fn pull_next_for_sending(&mut self, mpc: &str) -> Result<Option<OutMessageRecord>, StoreError>;
    fn insert_exception(&mut self, record: ExceptionRecord) -> Result<(), StoreError>;
}

/// Payload body storage decoupled from metadata.
pub trait MessageBodyStore {
    /// Persists serialized message bytes, returning a location token.
    fn save_message(&mut self, bytes: &[u8]) -> Result<String, StoreError>;
    /// Loads the bytes a location token points at.
    fn load_message(&self, location: &str) -> Result<Vec<u8>, StoreError>;
}

/// In-memory store implementing the repository and body-store contracts.
///
/// The exclusive borrow on every mutating method is the critical section:
/// `pull_next_for_sending` reads and marks under that one borrow, which is
/// the behavior durable backends must reproduce transactionally.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    in_messages: Vec<InMessageRecord>,
    out_messages: Vec<OutMessageRecord>,
    exceptions: Vec<ExceptionRecord>,
    bodies: HashMap<String, Vec<u8>>,
    next_body_id: u64,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_message(&self, id: &MessageId) -> Option<&InMessageRecord> {
        self.in_messages.iter().find(|r| r.message_id == *id)
    }

    pub fn out_message(&self, id: &MessageId) -> Option<&OutMessageRecord> {
        self.out_messages.iter().find(|r| r.message_id == *id)
    }

    pub fn exceptions(&self) -> &[ExceptionRecord] {
        &self.exceptions
    }
}

impl MessageRepository for InMemoryMessageStore {
    fn insert_in_message(&mut self, record: InMessageRecord) -> Result<(), StoreError> {
        if self.in_messages.iter().any(|r| r.message_id == record.message_id) {
            return Err(StoreError::DuplicateKey(record.message_id));
        }
        self.in_messages.push(record);
        Ok(())
    }

    fn update_in_message(
        &mut self,
        id: &MessageId,
        update: &mut dyn FnMut(&mut InMessageRecord),
    ) -> Result<(), StoreError> {
        let record = self
            .in_messages
            .iter_mut()
            .find(|r| r.message_id == *id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        update(record);
        Ok(())
    }

    fn insert_out_message(&mut self, record: OutMessageRecord) -> Result<(), StoreError> {
        if self.out_messages.iter().any(|r| r.message_id == record.message_id) {
            return Err(StoreError::DuplicateKey(record.message_id));
        }
        self.out_messages.push(record);
        Ok(())
    }

    fn update_out_message(
        &mut self,
        id: &MessageId,
        update: &mut dyn FnMut(&mut OutMessageRecord),
    ) -> Result<(), StoreError> {
        let record = self
            .out_messages
            .iter_mut()
            .find(|r| r.message_id == *id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        update(record);
        Ok(())
    }

    fn existing_message_ids(&self, ids: &[MessageId]) -> Result<Vec<MessageId>, StoreError> {
        Ok(ids
            .iter()
            .filter(|id| {
                self.in_messages.iter().any(|r| r.message_id == **id)
                    || self.out_messages.iter().any(|r| r.message_id == **id)
            })
            .cloned()
            .collect())
    }

    fn out_message_by_ref(
        &self,
        ref_to_message_id: &MessageId,
    ) -> Result<Option<OutMessageRecord>, StoreError> {
        Ok(self
            .out_messages
            .iter()
            .find(|r| r.message_id == *ref_to_message_id)
            .cloned())
    }

    fn pull_next_for_sending(&mut self, mpc: &str) -> Result<Option<OutMessageRecord>, StoreError> {
        let Some(record) = self
            .out_messages
            .iter_mut()
            .find(|r| r.operation == Operation::ToBeSent && r.mpc == mpc)
        else {
            return Ok(None);
        };
        record.operation = Operation::Sending;
        Ok(Some(record.clone()))
    }

    fn insert_exception(&mut self, record: ExceptionRecord) -> Result<(), StoreError> {
        self.exceptions.push(record);
        Ok(())
    }
}

impl MessageBodyStore for InMemoryMessageStore {
    fn save_message(&mut self, bytes: &[u8]) -> Result<String, StoreError> {
        self.next_body_id += 1;
        let location = format!("mem:{}", self.next_body_id);
        self.bodies.insert(location.clone(), bytes.to_vec());
        Ok(location)
    }

    fn load_message(&self, location: &str) -> Result<Vec<u8>, StoreError> {
        self.bodies
            .get(location)
            .cloned()
            .ok_or_else(|| StoreError::UnknownBodyLocation(location.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        with_store_retries, ExceptionRecord, InMemoryMessageStore, MessageBodyStore,
        MessageRepository, MessageType, Operation, OutMessageRecord, OutStatus, StoreError,
    };
    use as4_core::ids::MessageId;
    use chrono::Utc;

    pub(crate) fn out_record(id: &str, operation: Operation) -> OutMessageRecord {
        OutMessageRecord {
            message_id: MessageId::from(id),
            ref_to_message_id: None,
            message_type: MessageType::UserMessage,
            status: OutStatus::NotApplicable,
            operation,
            mpc: "mpc:orders".to_string(),
            pmode_snapshot: None,
            body_location: None,
            content_type: None,
            insertion_time: Utc::now(),
        }
    }

    #[test]
    fn duplicate_out_message_id_is_rejected() {
        let mut store = InMemoryMessageStore::new();
        store
            .insert_out_message(out_record("m1", Operation::ToBeSent))
            .expect("first insert should work");
        let err = store
            .insert_out_message(out_record("m1", Operation::ToBeSent))
            .expect_err("second insert must fail");
        assert!(matches!(err, StoreError::DuplicateKey(_)));
    }

    #[test]
    fn pull_next_marks_sending_exactly_once() {
        let mut store = InMemoryMessageStore::new();
        store
            .insert_out_message(out_record("m1", Operation::ToBeSent))
            .expect("insert should work");

        let first = store
            .pull_next_for_sending("mpc:orders")
            .expect("pull should work")
            .expect("message should be selected");
        assert_eq!(first.operation, Operation::Sending);

        let second = store
            .pull_next_for_sending("mpc:orders")
            .expect("pull should work");
        assert!(second.is_none(), "a Sending message must not be re-selected");
    }

    #[test]
    fn pull_next_honours_the_mpc() {
        let mut store = InMemoryMessageStore::new();
        store
            .insert_out_message(out_record("m1", Operation::ToBeSent))
            .expect("insert should work");
        assert!(store
            .pull_next_for_sending("mpc:other")
            .expect("pull should work")
            .is_none());
    }

    #[test]
    fn body_store_round_trips_bytes() {
        let mut store = InMemoryMessageStore::new();
        let location = store.save_message(b"payload").expect("save should work");
        assert_eq!(store.load_message(&location).expect("load should work"), b"payload");
        assert!(matches!(
            store.load_message("mem:999"),
            Err(StoreError::UnknownBodyLocation(_))
        ));
    }

    #[test]
    fn retries_are_bounded_and_only_for_retryable_errors() {
        let mut calls = 0;
        let result: Result<(), _> = with_store_retries(3, || {
            calls += 1;
            Err(StoreError::Unavailable("down".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 4, "initial attempt plus three retries");

        let mut calls = 0;
        let result: Result<(), _> = with_store_retries(3, || {
            calls += 1;
            Err(StoreError::NotFound(MessageId::from("m1")))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1, "non-retryable errors fail immediately");
    }

    #[test]
    fn exception_detail_is_bounded() {
        let record = ExceptionRecord::new(None, "x".repeat(5000));
        assert!(record.detail.len() <= 1024);
    }
}
