//! Content-type-driven serializer registry and size determination.

use std::io::Write;

use as4_core::attachment::Attachment;
use as4_core::cancel::CancelToken;
use as4_core::message::AS4Message;
use as4_core::namespaces::{MIME_CONTENT_TYPE, SOAP_CONTENT_TYPE};
use as4_core::xml::parse_element;

use crate::error::CodecError;
use crate::mime::{parse_content_type, read_multipart, write_multipart};
use crate::soap::{build_envelope, read_envelope};

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>";

/// Wire codecs this registry knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Codec {
    Soap,
    Mime,
}

/// Maps content types onto registered codecs.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerializerRegistry;

impl SerializerRegistry {
    pub fn new() -> Self {
        Self
    }

    fn codec_for(&self, content_type: &str) -> Result<(Codec, Vec<(String, String)>), CodecError> {
        let (media_type, params) = parse_content_type(content_type);
        match media_type.as_str() {
            SOAP_CONTENT_TYPE => Ok((Codec::Soap, params)),
            MIME_CONTENT_TYPE => Ok((Codec::Mime, params)),
            _ => Err(CodecError::UnsupportedContentType(content_type.to_string())),
        }
    }

    /// Serializes `message` in its content-type-appropriate representation,
    /// fully flushing `out` before returning.
    pub fn serialize(
        &self,
        message: &AS4Message,
        out: &mut impl Write,
        token: &CancelToken,
    ) -> Result<(), CodecError> {
        token.check()?;
        let envelope = build_envelope(message)?;
        let envelope_xml = format!("{XML_DECLARATION}{}", envelope.to_xml_string()?);

        if message.has_attachments() {
            token.check()?;
            write_multipart(out, message.mime_boundary(), &envelope_xml, &message.attachments)?;
        } else {
            out.write_all(envelope_xml.as_bytes())?;
            out.flush()?;
        }
        Ok(())
    }

    /// Parses a wire payload into a fully populated message.
    pub fn deserialize(
        &self,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<AS4Message, CodecError> {
        let (codec, params) = self.codec_for(content_type)?;
        match codec {
            Codec::Soap => {
                let xml = std::str::from_utf8(bytes).map_err(|_| {
                    CodecError::MalformedEnvelope("envelope is not valid utf-8".to_string())
                })?;
                let mut message = AS4Message::empty();
                read_envelope(parse_element(xml)?, &mut message)?;
                message.validate()?;
                Ok(message)
            }
            Codec::Mime => {
                let boundary = params
                    .iter()
                    .find(|(name, _)| name == "boundary")
                    .map(|(_, value)| value.as_str())
                    .ok_or_else(|| {
                        CodecError::MalformedMime("multipart without boundary".to_string())
                    })?;
                let mut parts = read_multipart(bytes, boundary)?.into_iter();
                let root = parts.next().ok_or_else(|| {
                    CodecError::MalformedMime("multipart without root part".to_string())
                })?;
                let xml = std::str::from_utf8(&root.content).map_err(|_| {
                    CodecError::MalformedEnvelope("envelope is not valid utf-8".to_string())
                })?;

                let mut message = AS4Message::empty();
                read_envelope(parse_element(xml)?, &mut message)?;
                for (index, part) in parts.enumerate() {
                    let id = part
                        .content_id
                        .unwrap_or_else(|| format!("attachment-{index}"));
                    message.add_attachment(Attachment::new(id, part.content_type, part.content))?;
                }
                message.validate()?;
                Ok(message)
            }
        }
    }
}

/// Write-only sink counting bytes, used to size a message without buffering.
#[derive(Debug, Default)]
pub struct CountingWriter {
    written: u64,
}

impl CountingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl Write for CountingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Computes the serialized byte length of `message` without retaining bytes.
pub fn serialized_length(message: &AS4Message) -> Result<u64, CodecError> {
    let mut sink = CountingWriter::new();
    SerializerRegistry::new().serialize(message, &mut sink, &CancelToken::new())?;
    Ok(sink.written())
}

#[cfg(test)]
mod tests {
    use super::{serialized_length, SerializerRegistry};
    use as4_core::attachment::Attachment;
    use as4_core::cancel::CancelToken;
    use as4_core::ids::MessageId;
    use as4_core::message::AS4Message;
    use as4_core::model::{CollaborationInfo, PartInfo, Party, PartyId, Service};
    use as4_core::units::UserMessage;

    fn sample_message(with_attachment: bool) -> AS4Message {
        let mut user_message = UserMessage::new(
            MessageId::from("um-1@test"),
            Party::new("Sender", vec![PartyId::new("org:a")]),
            Party::new("Receiver", vec![PartyId::new("org:b")]),
            CollaborationInfo {
                service: Service::new("urn:service"),
                action: "urn:action".to_string(),
                conversation_id: "conv".to_string(),
                agreement: None,
            },
        );
        user_message.timestamp = "2026-08-29T10:30:00.125Z"
            .parse()
            .expect("timestamp literal should parse");

        let mut builder = AS4Message::builder();
        if with_attachment {
            user_message.part_infos.push(PartInfo::new("cid:payload-1"));
            builder = builder
                .with_attachment(Attachment::new("payload-1", "text/plain", b"hello".to_vec()));
        }
        builder
            .with_user_message(user_message)
            .build()
            .expect("message should build")
    }

    #[test]
    fn soap_message_round_trips() {
        let message = sample_message(false);
        let registry = SerializerRegistry::new();
        let mut buffer = Vec::new();
        registry
            .serialize(&message, &mut buffer, &CancelToken::new())
            .expect("serialize should work");

        let decoded = registry
            .deserialize(&buffer, &message.content_type())
            .expect("deserialize should work");
        assert_eq!(decoded.user_messages, message.user_messages);
        assert!(!decoded.has_attachments());
    }

    #[test]
    fn mime_message_round_trips_attachment_bytes() {
        let message = sample_message(true);
        let registry = SerializerRegistry::new();
        let mut buffer = Vec::new();
        registry
            .serialize(&message, &mut buffer, &CancelToken::new())
            .expect("serialize should work");

        let decoded = registry
            .deserialize(&buffer, &message.content_type())
            .expect("deserialize should work");
        assert_eq!(decoded.user_messages, message.user_messages);
        assert_eq!(decoded.attachments.len(), 1);
        assert_eq!(decoded.attachments[0].id, "payload-1");
        assert_eq!(decoded.attachments[0].content(), b"hello");
    }

    #[test]
    fn unknown_content_type_is_rejected() {
        let registry = SerializerRegistry::new();
        let err = registry
            .deserialize(b"{}", "application/json")
            .expect_err("json should be unsupported");
        assert!(matches!(
            err,
            crate::error::CodecError::UnsupportedContentType(_)
        ));
    }

    #[test]
    fn cancelled_serialize_writes_nothing() {
        let message = sample_message(false);
        let token = CancelToken::new();
        token.cancel();
        let mut buffer = Vec::new();
        let err = SerializerRegistry::new()
            .serialize(&message, &mut buffer, &token)
            .expect_err("cancelled token should abort");
        assert!(matches!(err, crate::error::CodecError::Cancelled(_)));
        assert!(buffer.is_empty());
    }

    #[test]
    fn serialized_length_matches_buffered_length() {
        let message = sample_message(true);
        let mut buffer = Vec::new();
        SerializerRegistry::new()
            .serialize(&message, &mut buffer, &CancelToken::new())
            .expect("serialize should work");
        let length = serialized_length(&message).expect("length should compute");
        assert_eq!(length, buffer.len() as u64);
    }
}
