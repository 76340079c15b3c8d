use thiserror::Error;

use as4_core::cancel::Cancelled;
use as4_core::error::ModelError;
use as4_core::xml::XmlError;

/// Errors returned by envelope serialize/deserialize operations.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Envelope XML could not be parsed or violates the ebMS schema.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    /// SOAP envelope carries no Body element.
    #[error("envelope is missing the SOAP body")]
    MissingBody,
    /// No registered codec handles the given content type.
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),
    /// MIME multipart framing violation.
    #[error("malformed mime envelope: {0}")]
    MalformedMime(String),
    /// Model invariant violated while assembling the decoded message.
    #[error(transparent)]
    Model(#[from] ModelError),
    /// Sink-level write failure.
    #[error("write error: {0}")]
    Write(#[from] std::io::Error),
    /// Operation observed a cancelled token.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl From<XmlError> for CodecError {
    fn from(err: XmlError) -> Self {
        CodecError::MalformedEnvelope(err.to_string())
    }
}
