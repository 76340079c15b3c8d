//! SOAP 1.2 envelope assembly and parsing.
//!
//! The Security header round-trips as a raw element: this layer locates it
//! and hands it to the security processor without interpreting signature or
//! encryption internals.

use as4_core::message::AS4Message;
use as4_core::model::{Party, PartyId};
use as4_core::namespaces::{
    EBMS3, ICLOUD_ADDRESS, MULTIHOP, NEXT_MSH_ROLE, ONE_WAY_ERROR_ACTION,
    ONE_WAY_RECEIPT_ACTION, SOAP12, WSA, WSSE, WSU,
};
use as4_core::units::{RoutingInput, Signal, SignalMessage};
use as4_core::xml::XmlElement;

use crate::ebms::{
    collaboration_from_xml, collaboration_to_xml, signal_message_from_xml, signal_message_to_xml,
    user_message_from_xml, user_message_to_xml,
};
use crate::error::CodecError;

fn s12(local: &str) -> XmlElement {
    XmlElement::new(format!("s12:{local}"), SOAP12)
}

fn mh(local: &str) -> XmlElement {
    XmlElement::new(format!("mh:{local}"), MULTIHOP)
}

/// Builds the full envelope document for `message`.
///
/// When the message already carries an envelope (deserialized from the wire
/// or produced by the security processor) that document wins: its bytes are
/// the signed surface and must not be rebuilt.
pub fn build_envelope(message: &AS4Message) -> Result<XmlElement, CodecError> {
    if let Some(envelope) = &message.envelope {
        return Ok(envelope.clone());
    }

    let multihop_signal = message
        .signal_messages
        .iter()
        .find(|s| s.routing_input.is_some());

    let mut messaging = XmlElement::new("eb3:Messaging", EBMS3)
        .with_attr("xmlns:eb3", EBMS3)
        .with_attr("wsu:Id", message.signing_id.header_id.as_str());
    if multihop_signal.is_some() {
        messaging.set_attr("s12:role", NEXT_MSH_ROLE);
        messaging.set_attr("s12:mustUnderstand", "true");
    }
    for signal_message in &message.signal_messages {
        messaging.push_child(signal_message_to_xml(signal_message));
    }
    for user_message in &message.user_messages {
        messaging.push_child(user_message_to_xml(user_message));
    }

    let mut header = s12("Header");
    if let Some(signal) = multihop_signal {
        if let Some(routing) = &signal.routing_input {
            for element in multihop_headers(signal, routing) {
                header.push_child(element);
            }
        }
    }
    header.push_child(messaging);
    if let Some(security) = message.security_header.raw() {
        header.push_child(security.clone());
    }

    let body = s12("Body").with_attr("wsu:Id", message.signing_id.body_id.as_str());

    let mut envelope = XmlElement::new("s12:Envelope", SOAP12)
        .with_attr("xmlns:s12", SOAP12)
        .with_attr("xmlns:wsu", WSU);
    if multihop_signal.is_some() {
        envelope.set_attr("xmlns:wsa", WSA);
        envelope.set_attr("xmlns:mh", MULTIHOP);
    }
    envelope.push_child(header);
    envelope.push_child(body);
    Ok(envelope)
}

fn multihop_headers(signal: &SignalMessage, routing: &RoutingInput) -> Vec<XmlElement> {
    let action = match &signal.signal {
        Signal::Error(_) => ONE_WAY_ERROR_ACTION,
        _ => ONE_WAY_RECEIPT_ACTION,
    };

    let to = XmlElement::new("wsa:To", WSA)
        .with_attr("s12:role", NEXT_MSH_ROLE)
        .with_text(ICLOUD_ADDRESS);
    let action_el = XmlElement::new("wsa:Action", WSA).with_text(action);

    let mut routed = mh("UserMessage");
    if !routing.mpc.is_empty() {
        routed.set_attr("mpc", routing.mpc.as_str());
    }
    routed.push_child(
        XmlElement::new("eb3:PartyInfo", EBMS3)
            .with_child(routed_party("From", &routing.sender))
            .with_child(routed_party("To", &routing.receiver)),
    );
    routed.push_child(collaboration_to_xml(&routing.collaboration));

    let routing_input = mh("RoutingInput")
        .with_attr("xmlns:eb3", EBMS3)
        .with_attr("s12:role", NEXT_MSH_ROLE)
        .with_attr("s12:mustUnderstand", "true")
        .with_child(routed);
    vec![to, action_el, routing_input]
}

fn routed_party(direction: &str, party: &Party) -> XmlElement {
    let mut element = XmlElement::new(format!("eb3:{direction}"), EBMS3);
    for party_id in &party.party_ids {
        let mut id =
            XmlElement::new("eb3:PartyId", EBMS3).with_text(party_id.id.as_str());
        if let Some(id_type) = &party_id.id_type {
            id.set_attr("type", id_type);
        }
        element.push_child(id);
    }
    element.push_child(XmlElement::new("eb3:Role", EBMS3).with_text(party.role.as_str()));
    element
}

fn routing_input_from_xml(element: &XmlElement) -> Result<RoutingInput, CodecError> {
    let routed = element
        .first_child(MULTIHOP, "UserMessage")
        .ok_or_else(|| CodecError::MalformedEnvelope("RoutingInput without UserMessage".to_string()))?;
    let party_info = routed
        .first_child(EBMS3, "PartyInfo")
        .ok_or_else(|| CodecError::MalformedEnvelope("RoutingInput without PartyInfo".to_string()))?;
    let sender = party_info
        .first_child(EBMS3, "From")
        .map(parse_routed_party)
        .transpose()?
        .ok_or_else(|| CodecError::MalformedEnvelope("RoutingInput without From".to_string()))?;
    let receiver = party_info
        .first_child(EBMS3, "To")
        .map(parse_routed_party)
        .transpose()?
        .ok_or_else(|| CodecError::MalformedEnvelope("RoutingInput without To".to_string()))?;
    let collaboration = routed
        .first_child(EBMS3, "CollaborationInfo")
        .map(collaboration_from_xml)
        .transpose()?
        .ok_or_else(|| {
            CodecError::MalformedEnvelope("RoutingInput without CollaborationInfo".to_string())
        })?;
    Ok(RoutingInput {
        sender,
        receiver,
        collaboration,
        mpc: routed.attr("mpc").unwrap_or_default().to_string(),
    })
}

fn parse_routed_party(element: &XmlElement) -> Result<Party, CodecError> {
    let role = element
        .first_child(EBMS3, "Role")
        .map(|e| e.text())
        .ok_or_else(|| CodecError::MalformedEnvelope("routed party without Role".to_string()))?;
    let party_ids = element
        .children_named(EBMS3, "PartyId")
        .map(|e| PartyId {
            id: e.text(),
            id_type: e.attr("type").map(str::to_string),
        })
        .collect();
    Ok(Party { role, party_ids })
}

/// Populates `message` from a parsed envelope document.
///
/// A Header without a Messaging element yields an empty message (the valid
/// empty SOAP response used by async reply patterns); a missing Body is an
/// error.
pub fn read_envelope(envelope: XmlElement, message: &mut AS4Message) -> Result<(), CodecError> {
    if envelope.namespace != SOAP12 || envelope.local_name() != "Envelope" {
        return Err(CodecError::MalformedEnvelope(
            "document root is not a SOAP 1.2 Envelope".to_string(),
        ));
    }
    if envelope.first_child(SOAP12, "Body").is_none() {
        return Err(CodecError::MissingBody);
    }

    if let Some(header) = envelope.first_child(SOAP12, "Header") {
        if let Some(messaging) = header.first_child(EBMS3, "Messaging") {
            if let Some(id) = messaging.attr_by_local("Id") {
                message.signing_id.header_id = id.to_string();
            }
            for child in messaging.child_elements() {
                if child.namespace != EBMS3 {
                    continue;
                }
                match child.local_name() {
                    "UserMessage" => message.user_messages.push(user_message_from_xml(child)?),
                    "SignalMessage" => {
                        message.signal_messages.push(signal_message_from_xml(child)?)
                    }
                    _ => {}
                }
            }
        }
        if let Some(security) = header
            .child_elements()
            .find(|e| e.namespace == WSSE && e.local_name() == "Security")
        {
            message.security_header.set_raw(security.clone());
        }
        if let Some(routing) = header
            .child_elements()
            .find(|e| e.namespace == MULTIHOP && e.local_name() == "RoutingInput")
        {
            let routing_input = routing_input_from_xml(routing)?;
            if let Some(signal) = message.signal_messages.first_mut() {
                signal.routing_input = Some(routing_input);
            }
        }
    }

    if let Some(body) = envelope.first_child(SOAP12, "Body") {
        if let Some(id) = body.attr_by_local("Id") {
            message.signing_id.body_id = id.to_string();
        }
    }

    message.envelope = Some(envelope);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{build_envelope, read_envelope};
    use as4_core::ids::MessageId;
    use as4_core::message::AS4Message;
    use as4_core::model::{CollaborationInfo, Party, PartyId, Service};
    use as4_core::namespaces::{ICLOUD_ADDRESS, MULTIHOP, WSA};
    use as4_core::units::{RoutingInput, SignalMessage, UserMessage};
    use as4_core::xml::parse_element;

    fn sample_user_message() -> UserMessage {
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
        user_message
    }

    fn multihop_receipt() -> SignalMessage {
        let user_message = sample_user_message();
        let mut receipt = SignalMessage::receipt_for(&user_message);
        receipt.timestamp = user_message.timestamp;
        receipt.routing_input = Some(RoutingInput::for_reply(&user_message));
        receipt
    }

    #[test]
    fn envelope_round_trips_a_user_message() {
        let message = AS4Message::builder()
            .with_user_message(sample_user_message())
            .build()
            .expect("message should build");
        let envelope = build_envelope(&message).expect("envelope should build");
        let xml = envelope.to_xml_string().expect("envelope should serialize");

        let mut decoded = AS4Message::empty();
        read_envelope(parse_element(&xml).expect("envelope should parse"), &mut decoded)
            .expect("read should work");
        assert_eq!(decoded.user_messages, message.user_messages);
        assert!(decoded.signal_messages.is_empty());
    }

    #[test]
    fn multihop_receipt_gets_routing_headers() {
        let message = AS4Message::builder()
            .with_signal_message(multihop_receipt())
            .build()
            .expect("message should build");
        let envelope = build_envelope(&message).expect("envelope should build");
        let xml = envelope.to_xml_string().expect("envelope should serialize");

        assert!(xml.contains(ICLOUD_ADDRESS));
        assert!(xml.contains("RoutingInput"));
        assert!(xml.contains("mustUnderstand"));

        let parsed = parse_element(&xml).expect("envelope should parse");
        let header = parsed
            .first_child("http://www.w3.org/2003/05/soap-envelope", "Header")
            .expect("header should exist");
        assert!(header.first_child(WSA, "To").is_some());
        assert!(header.first_child(WSA, "Action").is_some());
        assert!(header.first_child(MULTIHOP, "RoutingInput").is_some());
    }

    #[test]
    fn multihop_routing_input_round_trips_reversed_parties() {
        let receipt = multihop_receipt();
        let message = AS4Message::builder()
            .with_signal_message(receipt.clone())
            .build()
            .expect("message should build");
        let xml = build_envelope(&message)
            .expect("envelope should build")
            .to_xml_string()
            .expect("envelope should serialize");

        let mut decoded = AS4Message::empty();
        read_envelope(parse_element(&xml).expect("envelope should parse"), &mut decoded)
            .expect("read should work");
        let routing = decoded.signal_messages[0]
            .routing_input
            .as_ref()
            .expect("routing input should survive");
        assert_eq!(routing.sender.role, "Receiver");
        assert_eq!(routing.receiver.role, "Sender");
    }

    #[test]
    fn plain_receipt_has_no_multihop_headers() {
        let user_message = sample_user_message();
        let mut receipt = SignalMessage::receipt_for(&user_message);
        receipt.timestamp = user_message.timestamp;
        let message = AS4Message::builder()
            .with_signal_message(receipt)
            .build()
            .expect("message should build");
        let xml = build_envelope(&message)
            .expect("envelope should build")
            .to_xml_string()
            .expect("envelope should serialize");
        assert!(!xml.contains("RoutingInput"));
        assert!(!xml.contains("wsa:To"));
    }

    #[test]
    fn missing_body_is_detected() {
        let xml = r#"<s12:Envelope xmlns:s12="http://www.w3.org/2003/05/soap-envelope"><s12:Header/></s12:Envelope>"#;
        let mut message = AS4Message::empty();
        let err = read_envelope(
            parse_element(xml).expect("envelope should parse"),
            &mut message,
        )
        .expect_err("missing body should fail");
        assert!(matches!(err, crate::error::CodecError::MissingBody));
    }

    #[test]
    fn envelope_without_messaging_yields_empty_message() {
        let xml = r#"<s12:Envelope xmlns:s12="http://www.w3.org/2003/05/soap-envelope"><s12:Header/><s12:Body/></s12:Envelope>"#;
        let mut message = AS4Message::empty();
        read_envelope(
            parse_element(xml).expect("envelope should parse"),
            &mut message,
        )
        .expect("read should work");
        assert!(message.is_empty());
    }
}
