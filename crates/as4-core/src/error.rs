use thiserror::Error;

use crate::ids::MessageId;

/// Errors raised by message-model invariants.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    /// A message id appeared twice across the user/signal unit union.
    #[error("duplicate message id: {0}")]
    DuplicateMessageId(MessageId),
    /// Two attachments carry the same content id.
    #[error("duplicate attachment content id: {0}")]
    DuplicateAttachmentId(String),
    /// A PartInfo href points at no attachment in the message.
    #[error("part info references missing attachment: {0}")]
    DanglingPartInfo(String),
}
