//! Per-exchange processing context threaded through pipeline steps.

use thiserror::Error;

use as4_codec::CodecError;
use as4_core::cancel::{CancelToken, Cancelled};
use as4_core::message::AS4Message;
use as4_crypto::CryptoError;

use crate::pmode::{ReceivingPMode, SendingPMode};
use crate::reliability::ReliabilityError;
use crate::resolve::ResolveError;
use crate::store::StoreError;

/// Failure raised by a pipeline step.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Reliability(#[from] ReliabilityError),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
    /// Exchange with the peer failed at the transport layer.
    #[error("transport failure: {0}")]
    Transport(String),
    /// Message violates the resolved PMode's policy.
    #[error("policy violation: {0}")]
    Validation(String),
}

/// How a step left the pipeline.
#[derive(Debug)]
pub enum StepOutcome {
    /// Proceed with the next step.
    Continue,
    /// Exchange handled completely; skip the remaining steps.
    Stop,
    Failed(StepError),
}

/// Step outcome paired with the surviving context, so error handling can
/// still reach the message that failed.
#[derive(Debug)]
pub struct StepResult {
    pub context: MessagingContext,
    pub outcome: StepOutcome,
}

/// State accumulated while one message moves through a pipeline.
#[derive(Debug)]
pub struct MessagingContext {
    pub message: AS4Message,
    /// Resolved for inbound user messages.
    pub receiving_pmode: Option<ReceivingPMode>,
    /// Resolved for outbound messages and inbound signals.
    pub sending_pmode: Option<SendingPMode>,
    /// PMode id named by the submitter, resolved by the first submit step.
    pub requested_pmode_id: Option<String>,
    /// Message to return or push back to the peer.
    pub response: Option<AS4Message>,
    pub token: CancelToken,
}

impl MessagingContext {
    pub fn new(message: AS4Message, token: CancelToken) -> Self {
        Self {
            message,
            receiving_pmode: None,
            sending_pmode: None,
            requested_pmode_id: None,
            response: None,
            token,
        }
    }

    pub fn proceed(self) -> StepResult {
        StepResult {
            context: self,
            outcome: StepOutcome::Continue,
        }
    }

    pub fn stop(self) -> StepResult {
        StepResult {
            context: self,
            outcome: StepOutcome::Stop,
        }
    }

    pub fn fail(self, error: impl Into<StepError>) -> StepResult {
        StepResult {
            context: self,
            outcome: StepOutcome::Failed(error.into()),
        }
    }
}
