//! The gateway aggregate: services plus the receive/submit entry points.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use as4_codec::{CodecError, SerializerRegistry};
use as4_core::cancel::CancelToken;
use as4_core::ids::MessageId;
use as4_core::message::AS4Message;
use as4_core::namespaces::SOAP_CONTENT_TYPE;
use as4_core::units::{Signal, SignalMessage};
use as4_crypto::CertificateRepository;
use as4_transport::{TransportAdapter, TransportRequest, TransportResponse};

use crate::context::{MessagingContext, StepError, StepOutcome};
use crate::ebms_error::error_detail;
use crate::pmode::{PModeCatalog, SendingPMode};
use crate::reliability::{
    evaluate_due_retries, finish_retry_attempt, process_error, process_receipt,
    ReceptionAwarenessRepository,
};
use crate::steps::{receive_pipeline, submit_pipeline, Step};
use crate::store::{ExceptionRecord, MessageBodyStore, MessageRepository, StoreError};

/// Content type assumed for stored or returned bodies that carry none.
pub(crate) fn default_content_type() -> String {
    format!("{SOAP_CONTENT_TYPE}; charset=\"utf-8\"")
}

/// One messaging gateway instance: the datastore, certificate store, PMode
/// catalog and transport it operates with.
pub struct Gateway<S, R, C, P, T> {
    pub store: S,
    pub retries: R,
    pub certificates: C,
    pub catalog: P,
    pub transport: T,
    pub serializer: SerializerRegistry,
}

impl<S, R, C, P, T> Gateway<S, R, C, P, T>
where
    S: MessageRepository + MessageBodyStore + 'static,
    R: ReceptionAwarenessRepository + 'static,
    C: CertificateRepository + 'static,
    P: PModeCatalog + 'static,
    T: TransportAdapter + 'static,
{
    pub fn new(store: S, retries: R, certificates: C, catalog: P, transport: T) -> Self {
        Self {
            store,
            retries,
            certificates,
            catalog,
            transport,
            serializer: SerializerRegistry::new(),
        }
    }

    /// Processes one received wire payload and returns what to answer on
    /// the same exchange. An empty response means answer-nothing.
    pub fn receive(
        &mut self,
        bytes: &[u8],
        content_type: &str,
        token: &CancelToken,
    ) -> Result<TransportResponse, StepError> {
        let message = match self.serializer.deserialize(bytes, content_type) {
            Ok(message) => message,
            Err(error) => return self.reject_unreadable(error, token),
        };
        let context = MessagingContext::new(message, token.clone());
        let pipeline = receive_pipeline();
        let result = pipeline.execute(context, self);
        match result.outcome {
            StepOutcome::Continue | StepOutcome::Stop => {
                self.render_response(result.context.response, token)
            }
            StepOutcome::Failed(error) => Err(error),
        }
    }

    /// Submits a composed message for sending under the named PMode. Push
    /// legs go out immediately; pull legs wait for the peer's PullRequest.
    pub fn submit(
        &mut self,
        message: AS4Message,
        pmode_id: &str,
        token: &CancelToken,
    ) -> Result<(), StepError> {
        let mut context = MessagingContext::new(message, token.clone());
        context.requested_pmode_id = Some(pmode_id.to_string());
        let pipeline = submit_pipeline();
        let result = pipeline.execute(context, self);
        match result.outcome {
            StepOutcome::Failed(error) => Err(error),
            _ => Ok(()),
        }
    }

    /// One pass of the retry agent: re-pushes every message whose retry
    /// interval elapsed, dead-lettering those at the bound. Returns the
    /// number of successful re-pushes.
    pub fn process_due_retries(
        &mut self,
        now: DateTime<Utc>,
        token: &CancelToken,
    ) -> Result<usize, StepError> {
        let due = evaluate_due_retries(&mut self.store, &mut self.retries, now)?;
        let mut resent = 0;
        for id in due {
            token.check()?;
            let outcome = self.resend(&id, token);
            finish_retry_attempt(&mut self.retries, &id)?;
            match outcome {
                Ok(()) => resent += 1,
                Err(error) => warn!(message = %id, error = %error, "retry attempt failed"),
            }
        }
        Ok(resent)
    }

    fn resend(&mut self, id: &MessageId, token: &CancelToken) -> Result<(), StepError> {
        let record = self
            .store
            .out_message_by_ref(id)?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let location = record
            .body_location
            .as_deref()
            .ok_or_else(|| StoreError::UnknownBodyLocation("no body stored".to_string()))?;
        let bytes = self.store.load_message(location)?;
        let snapshot = record
            .pmode_snapshot
            .as_deref()
            .ok_or_else(|| StoreError::InvalidSnapshot("missing snapshot".to_string()))?;
        let pmode: SendingPMode = serde_json::from_str(snapshot)
            .map_err(|e| StoreError::InvalidSnapshot(e.to_string()))?;

        let request = TransportRequest {
            endpoint: pmode.endpoint,
            content_type: record.content_type.clone().unwrap_or_else(default_content_type),
            body: bytes,
        };
        let response = self
            .transport
            .submit(&request, token)
            .map_err(|e| StepError::Transport(e.to_string()))?;
        info!(message = %id, endpoint = %request.endpoint, "message re-pushed");
        if !response.is_empty() {
            apply_response_signals(self, &response)?;
        }
        Ok(())
    }

    fn render_response(
        &self,
        response: Option<AS4Message>,
        token: &CancelToken,
    ) -> Result<TransportResponse, StepError> {
        let Some(response) = response else {
            return Ok(TransportResponse::empty());
        };
        let mut bytes = Vec::new();
        self.serializer.serialize(&response, &mut bytes, token)?;
        Ok(TransportResponse {
            content_type: Some(response.content_type()),
            body: bytes,
        })
    }

    /// An unreadable payload never reaches the pipeline; answer the
    /// InvalidHeader error directly and dead-letter the failure.
    fn reject_unreadable(
        &mut self,
        error: CodecError,
        token: &CancelToken,
    ) -> Result<TransportResponse, StepError> {
        let step_error = StepError::from(error);
        warn!(error = %step_error, "rejecting unreadable message");
        self.store
            .insert_exception(ExceptionRecord::new(None, step_error.to_string()))?;
        let detail = error_detail(&step_error, None);
        let signal = SignalMessage::error(vec![detail], None);
        let response = AS4Message::builder()
            .with_signal_message(signal)
            .build()
            .map_err(CodecError::from)?;
        self.render_response(Some(response), token)
    }
}

/// Applies receipts and errors riding a push response. An undecodable
/// response is logged and ignored; the ack will arrive again or reception
/// awareness will retry.
pub(crate) fn apply_response_signals<S, R, C, P, T>(
    gateway: &mut Gateway<S, R, C, P, T>,
    response: &TransportResponse,
) -> Result<(), StepError>
where
    S: MessageRepository,
    R: ReceptionAwarenessRepository,
{
    let content_type = response
        .content_type
        .clone()
        .unwrap_or_else(default_content_type);
    let reply = match gateway.serializer.deserialize(&response.body, &content_type) {
        Ok(reply) => reply,
        Err(error) => {
            warn!(error = %error, "ignoring undecodable push response");
            return Ok(());
        }
    };
    for signal in &reply.signal_messages {
        let Some(ref_id) = &signal.ref_to_message_id else {
            continue;
        };
        match &signal.signal {
            Signal::Receipt(_) => {
                process_receipt(&mut gateway.store, &mut gateway.retries, ref_id, false, true)?
            }
            Signal::Error(_) => {
                process_error(&mut gateway.store, &mut gateway.retries, ref_id, false, true)?
            }
            Signal::PullRequest { .. } => {}
        }
    }
    Ok(())
}
