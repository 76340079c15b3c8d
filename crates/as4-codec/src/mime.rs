//! MIME multipart/related framing for AS4 messages with attachments.
//!
//! The root body part carries the SOAP envelope; every further part is one
//! attachment addressed by Content-ID so `cid:` hrefs in the Messaging
//! header resolve to it.

use std::io::Write;

use as4_core::attachment::Attachment;
use as4_core::namespaces::SOAP_CONTENT_TYPE;

use crate::error::CodecError;

const CRLF: &str = "\r\n";

/// Writes the multipart body: SOAP root part first, then attachments in
/// their insertion order.
pub fn write_multipart(
    out: &mut impl Write,
    boundary: &str,
    envelope_xml: &str,
    attachments: &[Attachment],
) -> Result<(), CodecError> {
    write!(out, "--{boundary}{CRLF}")?;
    write!(
        out,
        "Content-Type: {SOAP_CONTENT_TYPE}; charset=\"utf-8\"{CRLF}"
    )?;
    write!(out, "Content-Transfer-Encoding: 8bit{CRLF}{CRLF}")?;
    out.write_all(envelope_xml.as_bytes())?;
    write!(out, "{CRLF}")?;

    for attachment in attachments {
        write!(out, "--{boundary}{CRLF}")?;
        write!(out, "Content-Type: {}{CRLF}", attachment.content_type())?;
        write!(out, "Content-Transfer-Encoding: binary{CRLF}")?;
        write!(out, "Content-ID: <{}>{CRLF}{CRLF}", attachment.id)?;
        out.write_all(attachment.content())?;
        write!(out, "{CRLF}")?;
    }
    write!(out, "--{boundary}--{CRLF}")?;
    out.flush()?;
    Ok(())
}

/// One parsed body part: headers plus raw content bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimePart {
    pub content_type: String,
    pub content_id: Option<String>,
    pub content: Vec<u8>,
}

/// Splits a multipart body into its parts. The first returned part is the
/// root (SOAP) part.
pub fn read_multipart(bytes: &[u8], boundary: &str) -> Result<Vec<MimePart>, CodecError> {
    let delimiter = format!("--{boundary}");
    let mut parts = Vec::new();
    let mut cursor = find(bytes, delimiter.as_bytes(), 0)
        .ok_or_else(|| CodecError::MalformedMime("opening boundary not found".to_string()))?
        + delimiter.len();

    loop {
        // Closing delimiter is "--boundary--".
        if bytes[cursor..].starts_with(b"--") {
            break;
        }
        cursor = skip_crlf(bytes, cursor);

        let headers_end = find(bytes, b"\r\n\r\n", cursor)
            .ok_or_else(|| CodecError::MalformedMime("part without header block".to_string()))?;
        let headers = parse_part_headers(&bytes[cursor..headers_end])?;
        let content_start = headers_end + 4;

        let next_boundary = find(bytes, delimiter.as_bytes(), content_start)
            .ok_or_else(|| CodecError::MalformedMime("unterminated part".to_string()))?;
        // Strip the CRLF that precedes the boundary line.
        let content_end = next_boundary.saturating_sub(2).max(content_start);
        parts.push(MimePart {
            content_type: headers.content_type,
            content_id: headers.content_id,
            content: bytes[content_start..content_end].to_vec(),
        });
        cursor = next_boundary + delimiter.len();
    }

    if parts.is_empty() {
        return Err(CodecError::MalformedMime("no body parts".to_string()));
    }
    Ok(parts)
}

struct PartHeaders {
    content_type: String,
    content_id: Option<String>,
}

fn parse_part_headers(raw: &[u8]) -> Result<PartHeaders, CodecError> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| CodecError::MalformedMime("part headers are not utf-8".to_string()))?;
    let mut content_type = None;
    let mut content_id = None;
    for line in text.split(CRLF) {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "content-type" => content_type = Some(value.to_string()),
            "content-id" => {
                content_id = Some(value.trim_matches(['<', '>']).to_string());
            }
            _ => {}
        }
    }
    Ok(PartHeaders {
        content_type: content_type
            .ok_or_else(|| CodecError::MalformedMime("part without Content-Type".to_string()))?,
        content_id,
    })
}

/// Media type and parameters of a Content-Type header value.
pub fn parse_content_type(value: &str) -> (String, Vec<(String, String)>) {
    let mut segments = value.split(';');
    let media_type = segments.next().unwrap_or_default().trim().to_ascii_lowercase();
    let params = segments
        .filter_map(|segment| {
            let (name, value) = segment.split_once('=')?;
            Some((
                name.trim().to_ascii_lowercase(),
                value.trim().trim_matches('"').to_string(),
            ))
        })
        .collect();
    (media_type, params)
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

fn skip_crlf(bytes: &[u8], mut cursor: usize) -> usize {
    if bytes[cursor..].starts_with(b"\r\n") {
        cursor += 2;
    }
    cursor
}

#[cfg(test)]
mod tests {
    use super::{parse_content_type, read_multipart, write_multipart};
    use as4_core::attachment::Attachment;

    #[test]
    fn multipart_round_trips_binary_attachment_bytes() {
        let attachment = Attachment::new("att-1", "application/octet-stream", vec![0, 13, 10, 255]);
        let mut buffer = Vec::new();
        write_multipart(&mut buffer, "bnd", "<xml/>", &[attachment]).expect("write should work");

        let parts = read_multipart(&buffer, "bnd").expect("read should work");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].content, b"<xml/>");
        assert_eq!(parts[1].content_id.as_deref(), Some("att-1"));
        assert_eq!(parts[1].content, vec![0, 13, 10, 255]);
        assert_eq!(parts[1].content_type, "application/octet-stream");
    }

    #[test]
    fn multipart_preserves_attachment_order() {
        let attachments = vec![
            Attachment::new("first", "text/plain", b"one".to_vec()),
            Attachment::new("second", "text/plain", b"two".to_vec()),
            Attachment::new("third", "text/plain", b"three".to_vec()),
        ];
        let mut buffer = Vec::new();
        write_multipart(&mut buffer, "bnd", "<xml/>", &attachments).expect("write should work");

        let parts = read_multipart(&buffer, "bnd").expect("read should work");
        let ids: Vec<_> = parts[1..]
            .iter()
            .map(|p| p.content_id.clone().expect("attachment part needs an id"))
            .collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn missing_boundary_is_rejected() {
        let err = read_multipart(b"no boundaries here", "bnd")
            .expect_err("missing boundary should fail");
        assert!(err.to_string().contains("opening boundary"));
    }

    #[test]
    fn content_type_parameters_are_extracted() {
        let (media_type, params) =
            parse_content_type("Multipart/Related; boundary=\"abc\"; type=\"application/soap+xml\"");
        assert_eq!(media_type, "multipart/related");
        assert!(params.contains(&("boundary".to_string(), "abc".to_string())));
    }
}
