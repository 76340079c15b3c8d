//! Pipeline steps for receiving and submitting messages.
//!
//! A pipeline is a [`CompositeStep`] of small single-purpose steps; the
//! receive pipeline is additionally wrapped in a decorator that turns step
//! failures into ebMS Error signals or dead-letter records. Steps hand the
//! context forward by value, so error handling always has the message that
//! failed.

pub mod receive;
pub mod submit;

use tracing::{debug, warn};

use as4_core::message::AS4Message;
use as4_core::units::{RoutingInput, SignalMessage};

use crate::context::{MessagingContext, StepError, StepOutcome, StepResult};
use crate::ebms_error::error_detail;
use crate::gateway::Gateway;
use crate::pmode::PModeCatalog;
use crate::reliability::ReceptionAwarenessRepository;
use crate::store::{
    ExceptionRecord, InStatus, MessageBodyStore, MessageRepository,
};
use as4_crypto::CertificateRepository;
use as4_transport::TransportAdapter;

/// One stage of a messaging pipeline.
pub trait Step<S, R, C, P, T> {
    fn name(&self) -> &'static str;
    fn execute(
        &self,
        context: MessagingContext,
        gateway: &mut Gateway<S, R, C, P, T>,
    ) -> StepResult;
}

/// Runs its steps in order, short-circuiting on Stop or failure. The
/// cancellation token is checked between steps; a step already running
/// observes it at its own suspension points.
pub struct CompositeStep<S, R, C, P, T> {
    steps: Vec<Box<dyn Step<S, R, C, P, T>>>,
}

impl<S, R, C, P, T> CompositeStep<S, R, C, P, T> {
    pub fn new(steps: Vec<Box<dyn Step<S, R, C, P, T>>>) -> Self {
        Self { steps }
    }
}

impl<S, R, C, P, T> Step<S, R, C, P, T> for CompositeStep<S, R, C, P, T> {
    fn name(&self) -> &'static str {
        "Composite"
    }

    fn execute(
        &self,
        mut context: MessagingContext,
        gateway: &mut Gateway<S, R, C, P, T>,
    ) -> StepResult {
        for step in &self.steps {
            if let Err(cancelled) = context.token.check() {
                return context.fail(cancelled);
            }
            debug!(step = step.name(), "executing step");
            let result = step.execute(context, gateway);
            match result.outcome {
                StepOutcome::Continue => context = result.context,
                StepOutcome::Stop | StepOutcome::Failed(_) => return result,
            }
        }
        context.proceed()
    }
}

/// Converts receive-side failures into their outward form.
///
/// A failure while processing a received user message becomes an ebMS
/// Error signal answered to the sender; a failure on a received signal is
/// only logged and dead-lettered, answering errors to signals invites
/// loops. Cancellation passes through untouched so no store write happens
/// after the token fires.
pub struct ReceiveExceptionDecorator<S, R, C, P, T> {
    inner: CompositeStep<S, R, C, P, T>,
}

impl<S, R, C, P, T> ReceiveExceptionDecorator<S, R, C, P, T> {
    pub fn new(inner: CompositeStep<S, R, C, P, T>) -> Self {
        Self { inner }
    }
}

impl<S, R, C, P, T> Step<S, R, C, P, T> for ReceiveExceptionDecorator<S, R, C, P, T>
where
    S: MessageRepository,
{
    fn name(&self) -> &'static str {
        "ReceiveExceptionDecorator"
    }

    fn execute(
        &self,
        context: MessagingContext,
        gateway: &mut Gateway<S, R, C, P, T>,
    ) -> StepResult {
        let result = self.inner.execute(context, gateway);
        let StepOutcome::Failed(error) = result.outcome else {
            return result;
        };
        let mut context = result.context;
        // Cancellation may surface wrapped in a codec or transport error;
        // the token is the reliable signal. No store write after it fires.
        if context.token.is_cancelled() || matches!(error, StepError::Cancelled(_)) {
            return context.fail(error);
        }
        warn!(error = %error, "receive pipeline failed");

        let in_error = context
            .message
            .primary_user_message()
            .map(|u| u.message_id.clone())
            .or_else(|| {
                context
                    .message
                    .primary_signal_message()
                    .map(|s| s.message_id.clone())
            });
        if let Err(store_error) = gateway
            .store
            .insert_exception(ExceptionRecord::new(in_error.clone(), error.to_string()))
        {
            warn!(error = %store_error, "failed to dead-letter receive exception");
        }
        if let Some(id) = &in_error {
            // Best effort; the record only exists when the failure came
            // after the save step.
            let _ = gateway
                .store
                .update_in_message(id, &mut |record| record.status = InStatus::Exception);
        }

        if let Some(user_message) = context.message.primary_user_message() {
            let detail = error_detail(&error, Some(user_message.message_id.clone()));
            let mut signal =
                SignalMessage::error(vec![detail], Some(user_message.message_id.clone()));
            if context
                .receiving_pmode
                .as_ref()
                .is_some_and(|p| p.packaging.multihop)
            {
                signal.routing_input = Some(RoutingInput::for_reply(user_message));
            }
            match AS4Message::builder().with_signal_message(signal).build() {
                Ok(response) => context.response = Some(response),
                Err(model_error) => {
                    warn!(error = %model_error, "failed to build error signal response")
                }
            }
        }
        context.stop()
    }
}

/// The full receive pipeline, exception handling included.
pub fn receive_pipeline<S, R, C, P, T>() -> ReceiveExceptionDecorator<S, R, C, P, T>
where
    S: MessageRepository + MessageBodyStore + 'static,
    R: ReceptionAwarenessRepository + 'static,
    C: CertificateRepository + 'static,
    P: PModeCatalog + 'static,
    T: TransportAdapter + 'static,
{
    ReceiveExceptionDecorator::new(CompositeStep::new(vec![
        Box::new(receive::DeterminePModes),
        Box::new(receive::Decrypt),
        Box::new(receive::VerifySignature),
        Box::new(receive::ValidateMessage),
        Box::new(receive::RespondToPullRequest),
        Box::new(receive::SaveReceivedMessage),
        Box::new(receive::ProcessSignals),
        Box::new(receive::CreateReceipt),
        Box::new(receive::SendSignal),
    ]))
}

/// The full submit pipeline.
pub fn submit_pipeline<S, R, C, P, T>() -> CompositeStep<S, R, C, P, T>
where
    S: MessageRepository + MessageBodyStore + 'static,
    R: ReceptionAwarenessRepository + 'static,
    C: CertificateRepository + 'static,
    P: PModeCatalog + 'static,
    T: TransportAdapter + 'static,
{
    CompositeStep::new(vec![
        Box::new(submit::ResolveSendingPMode),
        Box::new(submit::SignMessage),
        Box::new(submit::EncryptMessage),
        Box::new(submit::StoreOutMessage),
        Box::new(submit::SendMessage),
    ])
}
