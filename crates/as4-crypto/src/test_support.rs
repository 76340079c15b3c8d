//! Shared fixtures for the crate's tests.

use as4_core::attachment::Attachment;
use as4_core::ids::MessageId;
use as4_core::message::AS4Message;
use as4_core::model::{CollaborationInfo, PartInfo, Party, PartyId, Service};
use as4_core::units::UserMessage;

/// One user message with a single plaintext attachment, timestamps pinned
/// to wire precision.
pub fn signable_message() -> AS4Message {
    let mut user_message = UserMessage::new(
        MessageId::from("um-sign@test"),
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
    user_message.part_infos.push(PartInfo::new("cid:payload-1"));
    AS4Message::builder()
        .with_user_message(user_message)
        .with_attachment(Attachment::new("payload-1", "text/plain", b"hello".to_vec()))
        .build()
        .expect("message should build")
}
