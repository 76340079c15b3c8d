//! Wire codec for AS4 messages.
//!
//! Turns [`as4_core::message::AS4Message`] values into SOAP 1.2 envelopes,
//! wraps them in MIME multipart/related bodies when attachments are present,
//! and parses both representations back. Security header contents are carried
//! verbatim; interpreting them is the crypto layer's job.

pub mod ebms;
pub mod error;
pub mod mime;
pub mod serializer;
pub mod soap;

pub use error::CodecError;
pub use serializer::{serialized_length, CountingWriter, SerializerRegistry};
