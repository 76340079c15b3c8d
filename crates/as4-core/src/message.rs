use std::collections::HashSet;

use uuid::Uuid;

use crate::attachment::Attachment;
use crate::error::ModelError;
use crate::ids::{MessageId, SigningId};
use crate::namespaces::{MIME_CONTENT_TYPE, SOAP_CONTENT_TYPE};
use crate::security::SecurityHeader;
use crate::units::{SignalMessage, UserMessage};
use crate::xml::XmlElement;

/// Root aggregate for one AS4 message exchange unit.
///
/// A message is *empty* iff it has neither a primary user message nor a
/// primary signal message. Message ids are unique across the user+signal
/// union; the builder enforces this.
#[derive(Debug, Clone, PartialEq)]
pub struct AS4Message {
    /// Envelope document; present after deserialization or signing.
    pub envelope: Option<XmlElement>,
    /// wsu:Id values covering the envelope parts in a signature.
    pub signing_id: SigningId,
    pub user_messages: Vec<UserMessage>,
    pub signal_messages: Vec<SignalMessage>,
    pub attachments: Vec<Attachment>,
    pub security_header: SecurityHeader,
    mime_boundary: String,
}

impl AS4Message {
    /// Empty message shell; compose through [`AS4MessageBuilder`] instead
    /// where unit invariants matter.
    pub fn empty() -> Self {
        Self {
            envelope: None,
            signing_id: SigningId::generate(),
            user_messages: Vec::new(),
            signal_messages: Vec::new(),
            attachments: Vec::new(),
            security_header: SecurityHeader::default(),
            mime_boundary: format!("MIMEBoundary_{}", Uuid::new_v4().simple()),
        }
    }

    pub fn builder() -> AS4MessageBuilder {
        AS4MessageBuilder::default()
    }

    pub fn is_empty(&self) -> bool {
        self.primary_user_message().is_none() && self.primary_signal_message().is_none()
    }

    pub fn primary_user_message(&self) -> Option<&UserMessage> {
        self.user_messages.first()
    }

    pub fn primary_signal_message(&self) -> Option<&SignalMessage> {
        self.signal_messages.first()
    }

    /// All message ids across the user/signal union, in insertion order.
    pub fn message_ids(&self) -> Vec<MessageId> {
        self.user_messages
            .iter()
            .map(|u| u.message_id.clone())
            .chain(self.signal_messages.iter().map(|s| s.message_id.clone()))
            .collect()
    }

    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }

    /// MIME boundary used when this message is packaged as multipart.
    pub fn mime_boundary(&self) -> &str {
        &self.mime_boundary
    }

    /// Content type of the serialized form: plain SOAP without attachments,
    /// multipart/related with the boundary parameter otherwise.
    pub fn content_type(&self) -> String {
        if self.has_attachments() {
            format!(
                "{MIME_CONTENT_TYPE}; boundary=\"{}\"; type=\"{SOAP_CONTENT_TYPE}\"; charset=\"utf-8\"",
                self.mime_boundary
            )
        } else {
            format!("{SOAP_CONTENT_TYPE}; charset=\"utf-8\"")
        }
    }

    pub fn attachment_by_href(&self, href: &str) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.matches_href(href))
    }

    pub fn attachment_by_href_mut(&mut self, href: &str) -> Option<&mut Attachment> {
        self.attachments.iter_mut().find(|a| a.matches_href(href))
    }

    /// Adds an attachment, rejecting content-id collisions.
    pub fn add_attachment(&mut self, attachment: Attachment) -> Result<(), ModelError> {
        if self.attachments.iter().any(|a| a.id == attachment.id) {
            return Err(ModelError::DuplicateAttachmentId(attachment.id));
        }
        self.attachments.push(attachment);
        Ok(())
    }

    /// Checks unit-id uniqueness and PartInfo/attachment consistency.
    pub fn validate(&self) -> Result<(), ModelError> {
        let mut seen = HashSet::new();
        for id in self.message_ids() {
            if !seen.insert(id.clone()) {
                return Err(ModelError::DuplicateMessageId(id));
            }
        }
        for user_message in &self.user_messages {
            for part in &user_message.part_infos {
                if self.attachment_by_href(&part.href).is_none() {
                    return Err(ModelError::DanglingPartInfo(part.href.clone()));
                }
            }
        }
        Ok(())
    }
}

/// Incremental composer for outbound messages.
#[derive(Debug, Default)]
pub struct AS4MessageBuilder {
    user_messages: Vec<UserMessage>,
    signal_messages: Vec<SignalMessage>,
    attachments: Vec<Attachment>,
}

impl AS4MessageBuilder {
    pub fn with_user_message(mut self, user_message: UserMessage) -> Self {
        self.user_messages.push(user_message);
        self
    }

    pub fn with_signal_message(mut self, signal_message: SignalMessage) -> Self {
        self.signal_messages.push(signal_message);
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn build(self) -> Result<AS4Message, ModelError> {
        let mut message = AS4Message::empty();
        message.user_messages = self.user_messages;
        message.signal_messages = self.signal_messages;
        for attachment in self.attachments {
            message.add_attachment(attachment)?;
        }
        message.validate()?;
        Ok(message)
    }
}
