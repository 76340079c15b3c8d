//! AS4 messaging gateway core.
//!
//! Ties the codec, security processor and transport together behind one
//! [`Gateway`] value: received wire payloads go through the receive
//! pipeline (PMode resolution, decryption, signature verification,
//! persistence, receipt creation), submissions go through the submit
//! pipeline (signing, encryption, persistence, push), and a retry agent
//! drives reception awareness for unacknowledged sends.

pub mod context;
pub mod ebms_error;
pub mod gateway;
pub mod pmode;
pub mod reliability;
pub mod resolve;
pub mod steps;
pub mod store;

pub use context::{MessagingContext, StepError, StepOutcome, StepResult};
pub use ebms_error::{classify, error_detail, EbmsError};
pub use gateway::Gateway;
pub use pmode::{
    MepBinding, MessageExchangePattern, PModeCatalog, ReceivingPMode, ReplyPattern, Requirement,
    SendingPMode, StaticCatalog,
};
pub use reliability::{
    InMemoryReceptionAwareness, ReceptionAwarenessRecord, ReceptionAwarenessRepository,
    ReliabilityError, RetryStatus,
};
pub use resolve::ResolveError;
pub use store::{
    InMemoryMessageStore, InMessageRecord, InStatus, MessageBodyStore, MessageRepository,
    MessageType, Operation, OutMessageRecord, OutStatus, StoreError,
};
