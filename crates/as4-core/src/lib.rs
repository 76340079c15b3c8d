//! Core AS4 primitives shared across crates.
//!
//! Includes the Message Unit Model, ebMS namespace constants, message and
//! signing identifiers, the XML element tree used by the codec and security
//! layers, and the cooperative cancellation token.

pub mod attachment;
pub mod cancel;
pub mod error;
pub mod ids;
pub mod message;
pub mod model;
pub mod namespaces;
pub mod security;
pub mod units;
pub mod xml;

pub use attachment::Attachment;
pub use cancel::CancelToken;
pub use ids::{MessageId, SigningId};
pub use message::{AS4Message, AS4MessageBuilder};
pub use model::{AgreementReference, CollaborationInfo, MessageProperty, PartInfo, Party, PartyId, Service};
pub use security::SecurityHeader;
pub use units::{ErrorDetail, ReceiptContent, RoutingInput, Severity, Signal, SignalMessage, UserMessage};
