//! Steps of the receive pipeline, in execution order.

use chrono::Utc;
use tracing::{debug, info};

use as4_codec::CodecError;
use as4_core::message::AS4Message;
use as4_core::units::{
    NonRepudiationReference, RoutingInput, Signal, SignalMessage,
};
use as4_crypto::{
    decrypt_message, has_encryption, has_signature, verify_message, CertificateRepository,
};
use as4_transport::{TransportAdapter, TransportRequest};

use crate::context::{MessagingContext, StepError, StepResult};
use crate::ebms_error::EMPTY_MESSAGE_PARTITION_CHANNEL;
use crate::gateway::{default_content_type, Gateway};
use crate::pmode::{PModeCatalog, ReplyPattern, Requirement, SendingPMode};
use crate::reliability::{
    delivery_operation, flag_duplicate_signals, flag_duplicates, process_error,
    process_receipt, register_first_send, ReceptionAwarenessRepository,
};
use crate::resolve::{determine_receiving_pmode, determine_sending_pmode_for_signal};
use crate::steps::Step;
use crate::store::{
    InMessageRecord, InStatus, MessageBodyStore, MessageRepository, MessageType, Operation,
    OutMessageRecord, OutStatus, StoreError,
};

fn signal_message_type(signal: &SignalMessage) -> MessageType {
    match signal.signal {
        Signal::Receipt(_) => MessageType::Receipt,
        Signal::Error(_) => MessageType::Error,
        Signal::PullRequest { .. } => MessageType::PullRequest,
    }
}

/// Resolves the PMode governing the received message. User messages match
/// against the receiving catalog; receipts and errors recover the sending
/// PMode of the message they acknowledge. PullRequests carry no matching
/// material and resolve later, against the pulled message itself.
pub struct DeterminePModes;

impl<S, R, C, P, T> Step<S, R, C, P, T> for DeterminePModes
where
    S: MessageRepository,
    P: PModeCatalog,
{
    fn name(&self) -> &'static str {
        "DeterminePModes"
    }

    fn execute(
        &self,
        mut context: MessagingContext,
        gateway: &mut Gateway<S, R, C, P, T>,
    ) -> StepResult {
        if let Some(user_message) = context.message.primary_user_message() {
            let resolved =
                determine_receiving_pmode(user_message, &gateway.catalog.receiving_pmodes());
            match resolved {
                Ok(pmode) => {
                    debug!(pmode = %pmode.id, "resolved receiving pmode");
                    context.receiving_pmode = Some(pmode);
                }
                Err(error) => return context.fail(error),
            }
        } else if let Some(signal) = context.message.primary_signal_message() {
            if signal.is_pull_request() {
                return context.proceed();
            }
            let resolved = determine_sending_pmode_for_signal(
                signal,
                &gateway.store,
                &gateway.catalog,
                context.receiving_pmode.as_ref(),
            );
            match resolved {
                Ok(pmode) => context.sending_pmode = Some(pmode),
                Err(error) => return context.fail(error),
            }
        } else {
            return context.fail(StepError::Validation(
                "message carries no message unit".to_string(),
            ));
        }
        context.proceed()
    }
}

/// Checks the encryption policy and restores attachment plaintext.
pub struct Decrypt;

impl<S, R, C, P, T> Step<S, R, C, P, T> for Decrypt
where
    C: CertificateRepository,
{
    fn name(&self) -> &'static str {
        "Decrypt"
    }

    fn execute(
        &self,
        mut context: MessagingContext,
        gateway: &mut Gateway<S, R, C, P, T>,
    ) -> StepResult {
        let policy = context
            .receiving_pmode
            .as_ref()
            .map(|p| p.encryption)
            .unwrap_or_default();
        let encrypted = has_encryption(&context.message);
        match policy {
            Requirement::Required if !encrypted => {
                return context.fail(StepError::Validation(
                    "pmode requires encryption but the message is not encrypted".to_string(),
                ));
            }
            Requirement::NotAllowed if encrypted => {
                return context.fail(StepError::Validation(
                    "pmode forbids encryption but the message is encrypted".to_string(),
                ));
            }
            Requirement::Ignored => return context.proceed(),
            _ => {}
        }
        if encrypted {
            if let Err(error) = decrypt_message(&mut context.message, &gateway.certificates) {
                return context.fail(error);
            }
        }
        context.proceed()
    }
}

/// Checks the signing policy and verifies the signature against the
/// decrypted content.
pub struct VerifySignature;

impl<S, R, C, P, T> Step<S, R, C, P, T> for VerifySignature
where
    C: CertificateRepository,
{
    fn name(&self) -> &'static str {
        "VerifySignature"
    }

    fn execute(
        &self,
        mut context: MessagingContext,
        gateway: &mut Gateway<S, R, C, P, T>,
    ) -> StepResult {
        let policy = context
            .receiving_pmode
            .as_ref()
            .map(|p| p.signing)
            .unwrap_or_default();
        let signed = has_signature(&context.message);
        match policy {
            Requirement::Required if !signed => {
                return context.fail(StepError::Validation(
                    "pmode requires a signature but the message is unsigned".to_string(),
                ));
            }
            Requirement::NotAllowed if signed => {
                return context.fail(StepError::Validation(
                    "pmode forbids signatures but the message is signed".to_string(),
                ));
            }
            Requirement::Ignored => return context.proceed(),
            _ => {}
        }
        if signed {
            if let Err(error) = verify_message(&mut context.message, &gateway.certificates) {
                return context.fail(error);
            }
        }
        context.proceed()
    }
}

/// Model validation plus duplicate flagging against the stored history.
pub struct ValidateMessage;

impl<S, R, C, P, T> Step<S, R, C, P, T> for ValidateMessage
where
    S: MessageRepository,
{
    fn name(&self) -> &'static str {
        "ValidateMessage"
    }

    fn execute(
        &self,
        mut context: MessagingContext,
        gateway: &mut Gateway<S, R, C, P, T>,
    ) -> StepResult {
        if let Err(error) = context.message.validate() {
            return context.fail(CodecError::from(error));
        }
        if let Err(error) = flag_duplicates(&gateway.store, &mut context.message.user_messages) {
            return context.fail(error);
        }
        if let Err(error) =
            flag_duplicate_signals(&gateway.store, &mut context.message.signal_messages)
        {
            return context.fail(error);
        }
        context.proceed()
    }
}

/// Answers a PullRequest with the next message awaiting the partition
/// channel, or an EmptyMessagePartitionChannel warning. Either way the
/// exchange is complete and the pipeline stops.
pub struct RespondToPullRequest;

impl<S, R, C, P, T> Step<S, R, C, P, T> for RespondToPullRequest
where
    S: MessageRepository + MessageBodyStore,
    R: ReceptionAwarenessRepository,
{
    fn name(&self) -> &'static str {
        "RespondToPullRequest"
    }

    fn execute(
        &self,
        mut context: MessagingContext,
        gateway: &mut Gateway<S, R, C, P, T>,
    ) -> StepResult {
        let Some(signal) = context.message.primary_signal_message() else {
            return context.proceed();
        };
        let Signal::PullRequest { mpc } = &signal.signal else {
            return context.proceed();
        };
        let mpc = mpc.clone();
        let pull_id = signal.message_id.clone();

        let record = match gateway.store.pull_next_for_sending(&mpc) {
            Ok(record) => record,
            Err(error) => return context.fail(error),
        };
        let Some(record) = record else {
            info!(%mpc, "nothing to pull");
            let detail = EMPTY_MESSAGE_PARTITION_CHANNEL
                .detail(format!("no message awaiting pull on {mpc}"), None);
            let warning = SignalMessage::error(vec![detail], Some(pull_id));
            match AS4Message::builder().with_signal_message(warning).build() {
                Ok(response) => context.response = Some(response),
                Err(error) => return context.fail(CodecError::from(error)),
            }
            return context.stop();
        };

        let response = match load_stored_message(gateway, &record) {
            Ok(message) => message,
            Err(error) => return context.fail(error),
        };
        if let Err(error) = gateway
            .store
            .update_out_message(&record.message_id, &mut |r| {
                r.operation = Operation::Sent;
                r.status = OutStatus::Sent;
            })
        {
            return context.fail(error);
        }
        if let Some(snapshot) = &record.pmode_snapshot {
            if let Ok(pmode) = serde_json::from_str::<SendingPMode>(snapshot) {
                if pmode.reception_awareness.enabled {
                    if let Err(error) = register_first_send(
                        &mut gateway.retries,
                        &record.message_id,
                        &pmode.reception_awareness,
                        Utc::now(),
                    ) {
                        return context.fail(error);
                    }
                }
            }
        }
        info!(message = %record.message_id, %mpc, "answering pull request");
        context.response = Some(response);
        context.stop()
    }
}

fn load_stored_message<S, R, C, P, T>(
    gateway: &Gateway<S, R, C, P, T>,
    record: &OutMessageRecord,
) -> Result<AS4Message, StepError>
where
    S: MessageBodyStore,
{
    let location = record
        .body_location
        .as_deref()
        .ok_or_else(|| StoreError::UnknownBodyLocation("no body stored".to_string()))?;
    let bytes = gateway.store.load_message(location)?;
    let content_type = record.content_type.clone().unwrap_or_else(default_content_type);
    Ok(gateway.serializer.deserialize(&bytes, &content_type)?)
}

/// Persists the received message: one body, one metadata record per unit.
/// Flagged duplicates already have their record and are skipped.
pub struct SaveReceivedMessage;

impl<S, R, C, P, T> Step<S, R, C, P, T> for SaveReceivedMessage
where
    S: MessageRepository + MessageBodyStore,
{
    fn name(&self) -> &'static str {
        "SaveReceivedMessage"
    }

    fn execute(
        &self,
        context: MessagingContext,
        gateway: &mut Gateway<S, R, C, P, T>,
    ) -> StepResult {
        let mut bytes = Vec::new();
        if let Err(error) =
            gateway
                .serializer
                .serialize(&context.message, &mut bytes, &context.token)
        {
            return context.fail(error);
        }
        let location = match gateway.store.save_message(&bytes) {
            Ok(location) => location,
            Err(error) => return context.fail(error),
        };

        let now = Utc::now();
        let pmode_id = context.receiving_pmode.as_ref().map(|p| p.id.clone());
        for user_message in &context.message.user_messages {
            if user_message.is_duplicate {
                debug!(message = %user_message.message_id, "duplicate already recorded");
                continue;
            }
            let operation = context
                .receiving_pmode
                .as_ref()
                .map(|p| delivery_operation(user_message, p))
                .unwrap_or(Operation::ToBeDelivered);
            let record = InMessageRecord {
                message_id: user_message.message_id.clone(),
                ref_to_message_id: user_message.ref_to_message_id.clone(),
                message_type: MessageType::UserMessage,
                status: InStatus::Received,
                operation,
                pmode_id: pmode_id.clone(),
                body_location: Some(location.clone()),
                is_duplicate: false,
                insertion_time: now,
            };
            if let Err(error) = gateway.store.insert_in_message(record) {
                return context.fail(error);
            }
        }
        for signal in &context.message.signal_messages {
            if signal.is_duplicate {
                continue;
            }
            let record = InMessageRecord {
                message_id: signal.message_id.clone(),
                ref_to_message_id: signal.ref_to_message_id.clone(),
                message_type: signal_message_type(signal),
                status: InStatus::Received,
                operation: Operation::ToBeProcessed,
                pmode_id: context.sending_pmode.as_ref().map(|p| p.id.clone()),
                body_location: Some(location.clone()),
                is_duplicate: false,
                insertion_time: now,
            };
            if let Err(error) = gateway.store.insert_in_message(record) {
                return context.fail(error);
            }
        }
        context.proceed()
    }
}

/// Applies received receipts and errors to the outbound messages they
/// acknowledge.
pub struct ProcessSignals;

impl<S, R, C, P, T> Step<S, R, C, P, T> for ProcessSignals
where
    S: MessageRepository,
    R: ReceptionAwarenessRepository,
{
    fn name(&self) -> &'static str {
        "ProcessSignals"
    }

    fn execute(
        &self,
        context: MessagingContext,
        gateway: &mut Gateway<S, R, C, P, T>,
    ) -> StepResult {
        let allow_duplicate_update = context
            .receiving_pmode
            .as_ref()
            .map(|p| p.allow_duplicate_signal_status_update)
            .unwrap_or(true);
        for signal in &context.message.signal_messages {
            let Some(ref_id) = &signal.ref_to_message_id else {
                continue;
            };
            let applied = match &signal.signal {
                Signal::Receipt(_) => process_receipt(
                    &mut gateway.store,
                    &mut gateway.retries,
                    ref_id,
                    signal.is_duplicate,
                    allow_duplicate_update,
                ),
                Signal::Error(_) => process_error(
                    &mut gateway.store,
                    &mut gateway.retries,
                    ref_id,
                    signal.is_duplicate,
                    allow_duplicate_update,
                ),
                Signal::PullRequest { .. } => continue,
            };
            if let Err(error) = applied {
                return context.fail(error);
            }
            // Best effort; duplicates have no fresh record to update.
            let _ = gateway
                .store
                .update_in_message(&signal.message_id, &mut |record| {
                    record.status = InStatus::Delivered;
                    record.operation = Operation::Delivered;
                });
        }
        context.proceed()
    }
}

/// Builds the Receipt acknowledging the primary user message. Duplicates
/// are acknowledged again, the receipt is idempotent.
pub struct CreateReceipt;

impl<S, R, C, P, T> Step<S, R, C, P, T> for CreateReceipt {
    fn name(&self) -> &'static str {
        "CreateReceipt"
    }

    fn execute(
        &self,
        mut context: MessagingContext,
        _gateway: &mut Gateway<S, R, C, P, T>,
    ) -> StepResult {
        let Some(user_message) = context.message.primary_user_message() else {
            return context.proceed();
        };
        let Some(pmode) = context.receiving_pmode.as_ref() else {
            return context.proceed();
        };

        let mut receipt = if pmode.reply.non_repudiation
            && context.message.security_header.is_signed()
        {
            let references: Vec<NonRepudiationReference> = context
                .message
                .security_header
                .signing()
                .map(|state| {
                    state
                        .references
                        .iter()
                        .map(|r| NonRepudiationReference {
                            uri: r.uri.clone(),
                            digest_algorithm: r.digest_algorithm.clone(),
                            digest_value: r.digest_value.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default();
            SignalMessage::nrr_receipt_for(user_message, references)
        } else {
            SignalMessage::receipt_for(user_message)
        };
        if pmode.packaging.multihop {
            receipt.routing_input = Some(RoutingInput::for_reply(user_message));
        }

        match AS4Message::builder().with_signal_message(receipt).build() {
            Ok(response) => context.response = Some(response),
            Err(error) => return context.fail(CodecError::from(error)),
        }
        context.proceed()
    }
}

/// Delivers the reply signal: kept on the context for the Response
/// pattern, pushed to the callback endpoint for the Callback pattern.
/// Either way the signal is recorded as sent.
pub struct SendSignal;

impl<S, R, C, P, T> Step<S, R, C, P, T> for SendSignal
where
    S: MessageRepository,
    T: TransportAdapter,
{
    fn name(&self) -> &'static str {
        "SendSignal"
    }

    fn execute(
        &self,
        mut context: MessagingContext,
        gateway: &mut Gateway<S, R, C, P, T>,
    ) -> StepResult {
        let Some(response) = context.response.as_ref() else {
            return context.proceed();
        };
        let Some(signal) = response.primary_signal_message() else {
            return context.proceed();
        };
        let record = OutMessageRecord {
            message_id: signal.message_id.clone(),
            ref_to_message_id: signal.ref_to_message_id.clone(),
            message_type: signal_message_type(signal),
            status: OutStatus::Sent,
            operation: Operation::Sent,
            mpc: context
                .message
                .primary_user_message()
                .map(|u| u.mpc.clone())
                .unwrap_or_default(),
            pmode_snapshot: None,
            body_location: None,
            content_type: Some(response.content_type()),
            insertion_time: Utc::now(),
        };
        if let Err(error) = gateway.store.insert_out_message(record) {
            return context.fail(error);
        }

        let pattern = context
            .receiving_pmode
            .as_ref()
            .map(|p| p.reply.pattern)
            .unwrap_or_default();
        if pattern == ReplyPattern::Response {
            return context.proceed();
        }

        let Some(callback_url) = context
            .receiving_pmode
            .as_ref()
            .and_then(|p| p.reply.callback_url.clone())
        else {
            return context.fail(StepError::Validation(
                "callback reply pattern without a callback url".to_string(),
            ));
        };
        let response = match context.response.take() {
            Some(response) => response,
            None => return context.proceed(),
        };
        let mut bytes = Vec::new();
        if let Err(error) = gateway
            .serializer
            .serialize(&response, &mut bytes, &context.token)
        {
            return context.fail(error);
        }
        let request = TransportRequest {
            endpoint: callback_url,
            content_type: response.content_type(),
            body: bytes,
        };
        match gateway.transport.submit(&request, &context.token) {
            Ok(_) => info!(endpoint = %request.endpoint, "pushed reply signal"),
            Err(error) => return context.fail(StepError::Transport(error.to_string())),
        }
        context.proceed()
    }
}
