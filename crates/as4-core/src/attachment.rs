use std::io::Read;

use thiserror::Error;

/// Default media type assigned to encrypted attachment content.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Errors returned by attachment content helpers.
#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("failed to read attachment content: {0}")]
    Read(#[from] std::io::Error),
}

/// Payload part referenced from the Messaging header by `cid:` URI.
///
/// The attachment exclusively owns its content; every assignment replaces
/// (and drops) the previous bytes and recomputes `estimated_size`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Content id used as the `cid:` reference target.
    pub id: String,
    content_type: String,
    /// String properties carried next to the part (e.g. original MimeType).
    pub properties: Vec<(String, String)>,
    content: Vec<u8>,
    estimated_size: Option<u64>,
}

impl Attachment {
    pub fn new(id: impl Into<String>, content_type: impl Into<String>, content: Vec<u8>) -> Self {
        let size = content.len() as u64;
        Self {
            id: id.into(),
            content_type: content_type.into(),
            properties: Vec::new(),
            content,
            estimated_size: Some(size),
        }
    }

    /// Builds an attachment by draining a reader whose length is unknown
    /// up front; `estimated_size` stays `None` until the next assignment.
    pub fn from_reader(
        id: impl Into<String>,
        content_type: impl Into<String>,
        mut reader: impl Read,
    ) -> Result<Self, AttachmentError> {
        let mut content = Vec::new();
        reader.read_to_end(&mut content)?;
        Ok(Self {
            id: id.into(),
            content_type: content_type.into(),
            properties: Vec::new(),
            content,
            estimated_size: None,
        })
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Size of the content when it was determinable at assignment time.
    pub fn estimated_size(&self) -> Option<u64> {
        self.estimated_size
    }

    /// Replaces the content and content type, dropping the previous bytes.
    pub fn set_content(&mut self, content: Vec<u8>, content_type: impl Into<String>) {
        self.estimated_size = Some(content.len() as u64);
        self.content = content;
        self.content_type = content_type.into();
    }

    /// Looks up a string property by name.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Sets or replaces a string property.
    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(entry) = self.properties.iter_mut().find(|(k, _)| *k == name) {
            entry.1 = value;
            return;
        }
        self.properties.push((name, value));
    }

    /// Whether this attachment is the target of the given `cid:` href.
    pub fn matches_href(&self, href: &str) -> bool {
        href.strip_prefix("cid:").unwrap_or(href) == self.id
    }
}
