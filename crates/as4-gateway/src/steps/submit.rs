//! Steps of the submit pipeline, in execution order.

use chrono::Utc;
use rand::rngs::OsRng;
use tracing::{debug, info, warn};

use as4_crypto::{
    encrypt_message, sign_message, CertificateRepository, EncryptionConfig, SigningConfig,
    SymmetricCipher,
};
use as4_transport::{TransportAdapter, TransportRequest};

use crate::context::{MessagingContext, StepError, StepResult};
use crate::gateway::{apply_response_signals, Gateway};
use crate::pmode::{MepBinding, PModeCatalog};
use crate::reliability::{register_first_send, ReceptionAwarenessRepository};
use crate::resolve::ResolveError;
use crate::steps::Step;
use crate::store::{
    MessageBodyStore, MessageRepository, MessageType, Operation, OutMessageRecord, OutStatus,
    StoreError,
};

/// Resolves the SendingPMode the submitter named and stamps its packaging
/// onto the message.
pub struct ResolveSendingPMode;

impl<S, R, C, P, T> Step<S, R, C, P, T> for ResolveSendingPMode
where
    P: PModeCatalog,
{
    fn name(&self) -> &'static str {
        "ResolveSendingPMode"
    }

    fn execute(
        &self,
        mut context: MessagingContext,
        gateway: &mut Gateway<S, R, C, P, T>,
    ) -> StepResult {
        let Some(id) = context.requested_pmode_id.clone() else {
            return context.fail(StepError::Validation(
                "submission names no sending pmode".to_string(),
            ));
        };
        let Some(pmode) = gateway.catalog.sending_pmode(&id) else {
            return context.fail(ResolveError::DanglingPModeReference(id));
        };
        if let Some(mpc) = &pmode.packaging.mpc {
            for user_message in &mut context.message.user_messages {
                user_message.mpc = mpc.clone();
            }
        }
        debug!(pmode = %pmode.id, "resolved sending pmode");
        context.sending_pmode = Some(pmode);
        context.proceed()
    }
}

/// Signs the message when the PMode carries a signing policy.
pub struct SignMessage;

impl<S, R, C, P, T> Step<S, R, C, P, T> for SignMessage
where
    C: CertificateRepository,
{
    fn name(&self) -> &'static str {
        "SignMessage"
    }

    fn execute(
        &self,
        mut context: MessagingContext,
        gateway: &mut Gateway<S, R, C, P, T>,
    ) -> StepResult {
        let Some(alias) = context
            .sending_pmode
            .as_ref()
            .and_then(|p| p.signing.as_ref())
            .map(|policy| policy.certificate_alias.clone())
        else {
            return context.proceed();
        };
        let Some(certificate) = gateway.certificates.find(&alias) else {
            return context.fail(StepError::Validation(format!(
                "no certificate installed for signing alias {alias}"
            )));
        };
        if let Err(error) =
            sign_message(&mut context.message, certificate, &SigningConfig::default())
        {
            return context.fail(error);
        }
        context.proceed()
    }
}

/// Encrypts the attachments for the receiver when the PMode carries an
/// encryption policy. Runs after signing so the signed digests cover
/// plaintext.
pub struct EncryptMessage;

impl<S, R, C, P, T> Step<S, R, C, P, T> for EncryptMessage
where
    C: CertificateRepository,
{
    fn name(&self) -> &'static str {
        "EncryptMessage"
    }

    fn execute(
        &self,
        mut context: MessagingContext,
        gateway: &mut Gateway<S, R, C, P, T>,
    ) -> StepResult {
        let Some(policy) = context
            .sending_pmode
            .as_ref()
            .and_then(|p| p.encryption.clone())
        else {
            return context.proceed();
        };
        let algorithm = match SymmetricCipher::from_uri(&policy.algorithm) {
            Ok(algorithm) => algorithm,
            Err(error) => return context.fail(error),
        };
        let Some(certificate) = gateway.certificates.find(&policy.certificate_alias) else {
            return context.fail(StepError::Validation(format!(
                "no certificate installed for encryption alias {}",
                policy.certificate_alias
            )));
        };
        let config = EncryptionConfig {
            algorithm,
            ..EncryptionConfig::default()
        };
        if let Err(error) =
            encrypt_message(&mut context.message, certificate, &config, &mut OsRng)
        {
            return context.fail(error);
        }
        context.proceed()
    }
}

/// Persists the outbound message with its PMode snapshot and registers
/// reception awareness. A pull-bound message stops here and waits to be
/// pulled.
pub struct StoreOutMessage;

impl<S, R, C, P, T> Step<S, R, C, P, T> for StoreOutMessage
where
    S: MessageRepository + MessageBodyStore,
    R: ReceptionAwarenessRepository,
{
    fn name(&self) -> &'static str {
        "StoreOutMessage"
    }

    fn execute(
        &self,
        context: MessagingContext,
        gateway: &mut Gateway<S, R, C, P, T>,
    ) -> StepResult {
        let Some(pmode) = context.sending_pmode.clone() else {
            return context.fail(StepError::Validation(
                "no sending pmode resolved".to_string(),
            ));
        };
        let snapshot = match serde_json::to_string(&pmode) {
            Ok(snapshot) => snapshot,
            Err(error) => {
                return context.fail(StoreError::InvalidSnapshot(error.to_string()))
            }
        };

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

        let pull_bound = pmode.binding == MepBinding::Pull;
        let now = Utc::now();
        for user_message in &context.message.user_messages {
            let record = OutMessageRecord {
                message_id: user_message.message_id.clone(),
                ref_to_message_id: user_message.ref_to_message_id.clone(),
                message_type: MessageType::UserMessage,
                status: OutStatus::NotApplicable,
                operation: Operation::ToBeSent,
                mpc: user_message.mpc.clone(),
                pmode_snapshot: Some(snapshot.clone()),
                body_location: Some(location.clone()),
                content_type: Some(context.message.content_type()),
                insertion_time: now,
            };
            if let Err(error) = gateway.store.insert_out_message(record) {
                return context.fail(error);
            }
            if pmode.reception_awareness.enabled && !pull_bound {
                if let Err(error) = register_first_send(
                    &mut gateway.retries,
                    &user_message.message_id,
                    &pmode.reception_awareness,
                    now,
                ) {
                    return context.fail(error);
                }
            }
        }

        if pull_bound {
            info!("message stored, awaiting pull");
            return context.stop();
        }
        context.proceed()
    }
}

/// Pushes the message to the receiver's endpoint and applies any signals
/// riding the response.
pub struct SendMessage;

impl<S, R, C, P, T> Step<S, R, C, P, T> for SendMessage
where
    S: MessageRepository,
    R: ReceptionAwarenessRepository,
    T: TransportAdapter,
{
    fn name(&self) -> &'static str {
        "SendMessage"
    }

    fn execute(
        &self,
        context: MessagingContext,
        gateway: &mut Gateway<S, R, C, P, T>,
    ) -> StepResult {
        let Some(pmode) = context.sending_pmode.clone() else {
            return context.fail(StepError::Validation(
                "no sending pmode resolved".to_string(),
            ));
        };
        let mut bytes = Vec::new();
        if let Err(error) =
            gateway
                .serializer
                .serialize(&context.message, &mut bytes, &context.token)
        {
            return context.fail(error);
        }
        let request = TransportRequest {
            endpoint: pmode.endpoint.clone(),
            content_type: context.message.content_type(),
            body: bytes,
        };

        let response = match gateway.transport.submit(&request, &context.token) {
            Ok(response) => response,
            Err(error) => {
                // The stored message stays ToBeSent; reception awareness
                // owns the retry from here.
                warn!(endpoint = %pmode.endpoint, error = %error, "push failed");
                return context.fail(StepError::Transport(error.to_string()));
            }
        };
        for user_message in &context.message.user_messages {
            if let Err(error) =
                gateway
                    .store
                    .update_out_message(&user_message.message_id, &mut |record| {
                        record.operation = Operation::Sent;
                        record.status = OutStatus::Sent;
                    })
            {
                return context.fail(error);
            }
        }
        info!(endpoint = %pmode.endpoint, "message pushed");

        if !response.is_empty() {
            if let Err(error) = apply_response_signals(gateway, &response) {
                return context.fail(error);
            }
        }
        context.proceed()
    }
}
