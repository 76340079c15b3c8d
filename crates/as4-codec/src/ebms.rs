//! XML projections of the ebMS Messaging header units.
//!
//! Builders emit `eb3:`-prefixed elements matching the ebMS3 core schema;
//! parsers match on resolved namespace plus local name so any prefix used by
//! an interop partner is accepted.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};

use as4_core::ids::MessageId;
use as4_core::model::{
    AgreementReference, CollaborationInfo, MessageProperty, PartInfo, Party, PartyId, Service,
};
use as4_core::namespaces::{DEFAULT_MPC, DSIG, EBBP, EBMS3};
use as4_core::units::{
    ErrorDetail, NonRepudiationReference, ReceiptContent, Severity, Signal, SignalMessage,
    UserMessage,
};
use as4_core::xml::XmlElement;

use crate::error::CodecError;

fn eb3(local: &str) -> XmlElement {
    XmlElement::new(format!("eb3:{local}"), EBMS3)
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, CodecError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| CodecError::MalformedEnvelope(format!("bad timestamp: {e}")))
}

fn message_info_to_xml(
    message_id: &MessageId,
    ref_to: Option<&MessageId>,
    timestamp: DateTime<Utc>,
) -> XmlElement {
    let mut info = eb3("MessageInfo")
        .with_child(eb3("Timestamp").with_text(format_timestamp(timestamp)))
        .with_child(eb3("MessageId").with_text(message_id.as_str()));
    if let Some(ref_to) = ref_to {
        info.push_child(eb3("RefToMessageId").with_text(ref_to.as_str()));
    }
    info
}

struct MessageInfo {
    message_id: MessageId,
    ref_to_message_id: Option<MessageId>,
    timestamp: DateTime<Utc>,
}

fn message_info_from_xml(parent: &XmlElement) -> Result<MessageInfo, CodecError> {
    let info = parent
        .first_child(EBMS3, "MessageInfo")
        .ok_or_else(|| CodecError::MalformedEnvelope("missing MessageInfo".to_string()))?;
    let message_id = info
        .first_child(EBMS3, "MessageId")
        .map(|e| MessageId::from(e.text()))
        .ok_or_else(|| CodecError::MalformedEnvelope("missing MessageId".to_string()))?;
    let timestamp = match info.first_child(EBMS3, "Timestamp") {
        Some(e) => parse_timestamp(&e.text())?,
        None => return Err(CodecError::MalformedEnvelope("missing Timestamp".to_string())),
    };
    let ref_to_message_id = info
        .first_child(EBMS3, "RefToMessageId")
        .map(|e| MessageId::from(e.text()));
    Ok(MessageInfo {
        message_id,
        ref_to_message_id,
        timestamp,
    })
}

fn party_to_xml(direction: &str, party: &Party) -> XmlElement {
    let mut element = eb3(direction);
    for party_id in &party.party_ids {
        let mut id = eb3("PartyId").with_text(party_id.id.as_str());
        if let Some(id_type) = &party_id.id_type {
            id.set_attr("type", id_type);
        }
        element.push_child(id);
    }
    element.push_child(eb3("Role").with_text(party.role.as_str()));
    element
}

fn party_from_xml(element: &XmlElement) -> Result<Party, CodecError> {
    let role = element
        .first_child(EBMS3, "Role")
        .map(|e| e.text())
        .ok_or_else(|| CodecError::MalformedEnvelope("party without Role".to_string()))?;
    let party_ids = element
        .children_named(EBMS3, "PartyId")
        .map(|e| PartyId {
            id: e.text(),
            id_type: e.attr("type").map(str::to_string),
        })
        .collect();
    Ok(Party { role, party_ids })
}

pub(crate) fn collaboration_to_xml(collaboration: &CollaborationInfo) -> XmlElement {
    let mut element = eb3("CollaborationInfo");
    if let Some(agreement) = &collaboration.agreement {
        let mut agreement_el = eb3("AgreementRef").with_text(agreement.value.as_str());
        if let Some(agreement_type) = &agreement.agreement_type {
            agreement_el.set_attr("type", agreement_type);
        }
        if let Some(pmode_id) = &agreement.pmode_id {
            agreement_el.set_attr("pmode", pmode_id);
        }
        element.push_child(agreement_el);
    }
    let mut service = eb3("Service").with_text(collaboration.service.value.as_str());
    if let Some(service_type) = &collaboration.service.service_type {
        service.set_attr("type", service_type);
    }
    element.push_child(service);
    element.push_child(eb3("Action").with_text(collaboration.action.as_str()));
    element.push_child(eb3("ConversationId").with_text(collaboration.conversation_id.as_str()));
    element
}

pub(crate) fn collaboration_from_xml(element: &XmlElement) -> Result<CollaborationInfo, CodecError> {
    let agreement = element.first_child(EBMS3, "AgreementRef").map(|e| AgreementReference {
        value: e.text(),
        agreement_type: e.attr("type").map(str::to_string),
        pmode_id: e.attr("pmode").map(str::to_string),
    });
    let service = element
        .first_child(EBMS3, "Service")
        .map(|e| Service {
            value: e.text(),
            service_type: e.attr("type").map(str::to_string),
        })
        .ok_or_else(|| CodecError::MalformedEnvelope("missing Service".to_string()))?;
    let action = element
        .first_child(EBMS3, "Action")
        .map(|e| e.text())
        .ok_or_else(|| CodecError::MalformedEnvelope("missing Action".to_string()))?;
    let conversation_id = element
        .first_child(EBMS3, "ConversationId")
        .map(|e| e.text())
        .unwrap_or_default();
    Ok(CollaborationInfo {
        service,
        action,
        conversation_id,
        agreement,
    })
}

fn properties_to_xml(wrapper: &str, properties: &[MessageProperty]) -> XmlElement {
    let mut element = eb3(wrapper);
    for property in properties {
        element.push_child(
            eb3("Property")
                .with_attr("name", property.name.as_str())
                .with_text(property.value.as_str()),
        );
    }
    element
}

fn properties_from_xml(element: &XmlElement) -> Vec<MessageProperty> {
    element
        .children_named(EBMS3, "Property")
        .map(|e| MessageProperty {
            name: e.attr("name").unwrap_or_default().to_string(),
            value: e.text(),
        })
        .collect()
}

/// Projects a user message into its `eb3:UserMessage` element.
pub fn user_message_to_xml(user_message: &UserMessage) -> XmlElement {
    let mut element = eb3("UserMessage");
    if user_message.mpc != DEFAULT_MPC {
        element.set_attr("mpc", user_message.mpc.as_str());
    }
    element.push_child(message_info_to_xml(
        &user_message.message_id,
        user_message.ref_to_message_id.as_ref(),
        user_message.timestamp,
    ));
    element.push_child(
        eb3("PartyInfo")
            .with_child(party_to_xml("From", &user_message.sender))
            .with_child(party_to_xml("To", &user_message.receiver)),
    );
    element.push_child(collaboration_to_xml(&user_message.collaboration));
    if !user_message.message_properties.is_empty() {
        element.push_child(properties_to_xml(
            "MessageProperties",
            &user_message.message_properties,
        ));
    }
    if !user_message.part_infos.is_empty() {
        let mut payload_info = eb3("PayloadInfo");
        for part in &user_message.part_infos {
            let mut part_el = eb3("PartInfo").with_attr("href", part.href.as_str());
            if !part.properties.is_empty() {
                part_el.push_child(properties_to_xml("PartProperties", &part.properties));
            }
            payload_info.push_child(part_el);
        }
        element.push_child(payload_info);
    }
    element
}

/// Reads a user message back from its `eb3:UserMessage` element.
pub fn user_message_from_xml(element: &XmlElement) -> Result<UserMessage, CodecError> {
    let info = message_info_from_xml(element)?;
    let party_info = element
        .first_child(EBMS3, "PartyInfo")
        .ok_or_else(|| CodecError::MalformedEnvelope("missing PartyInfo".to_string()))?;
    let sender = party_info
        .first_child(EBMS3, "From")
        .map(party_from_xml)
        .transpose()?
        .ok_or_else(|| CodecError::MalformedEnvelope("missing From party".to_string()))?;
    let receiver = party_info
        .first_child(EBMS3, "To")
        .map(party_from_xml)
        .transpose()?
        .ok_or_else(|| CodecError::MalformedEnvelope("missing To party".to_string()))?;
    let collaboration = element
        .first_child(EBMS3, "CollaborationInfo")
        .map(collaboration_from_xml)
        .transpose()?
        .ok_or_else(|| CodecError::MalformedEnvelope("missing CollaborationInfo".to_string()))?;

    let message_properties = element
        .first_child(EBMS3, "MessageProperties")
        .map(properties_from_xml)
        .unwrap_or_default();
    let part_infos = element
        .first_child(EBMS3, "PayloadInfo")
        .map(|payload_info| {
            payload_info
                .children_named(EBMS3, "PartInfo")
                .map(|part_el| PartInfo {
                    href: part_el.attr("href").unwrap_or_default().to_string(),
                    properties: part_el
                        .first_child(EBMS3, "PartProperties")
                        .map(properties_from_xml)
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(UserMessage {
        message_id: info.message_id,
        ref_to_message_id: info.ref_to_message_id,
        timestamp: info.timestamp,
        sender,
        receiver,
        collaboration,
        mpc: element
            .attr("mpc")
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_MPC.to_string()),
        part_infos,
        message_properties,
        is_duplicate: false,
    })
}

fn nrr_to_xml(references: &[NonRepudiationReference]) -> XmlElement {
    let mut nri = XmlElement::new("ebbp:NonRepudiationInformation", EBBP)
        .with_attr("xmlns:ebbp", EBBP);
    for reference in references {
        let ds_reference = XmlElement::new("ds:Reference", DSIG)
            .with_attr("xmlns:ds", DSIG)
            .with_attr("URI", reference.uri.as_str())
            .with_child(
                XmlElement::new("ds:DigestMethod", DSIG)
                    .with_attr("Algorithm", reference.digest_algorithm.as_str()),
            )
            .with_child(
                XmlElement::new("ds:DigestValue", DSIG)
                    .with_text(BASE64.encode(&reference.digest_value)),
            );
        nri.push_child(
            XmlElement::new("ebbp:MessagePartNRInformation", EBBP).with_child(ds_reference),
        );
    }
    nri
}

fn nrr_from_xml(element: &XmlElement) -> Result<Vec<NonRepudiationReference>, CodecError> {
    let mut references = Vec::new();
    for part in element.children_named(EBBP, "MessagePartNRInformation") {
        let ds_reference = part
            .first_child(DSIG, "Reference")
            .ok_or_else(|| CodecError::MalformedEnvelope("NRR part without Reference".to_string()))?;
        let digest_method = ds_reference
            .first_child(DSIG, "DigestMethod")
            .and_then(|e| e.attr("Algorithm"))
            .unwrap_or_default()
            .to_string();
        let digest_value = ds_reference
            .first_child(DSIG, "DigestValue")
            .map(|e| e.text())
            .ok_or_else(|| CodecError::MalformedEnvelope("NRR reference without digest".to_string()))?;
        references.push(NonRepudiationReference {
            uri: ds_reference.attr("URI").unwrap_or_default().to_string(),
            digest_algorithm: digest_method,
            digest_value: BASE64
                .decode(digest_value.trim())
                .map_err(|e| CodecError::MalformedEnvelope(format!("bad NRR digest: {e}")))?,
        });
    }
    Ok(references)
}

fn error_detail_to_xml(detail: &ErrorDetail) -> XmlElement {
    let mut element = eb3("Error")
        .with_attr("errorCode", detail.error_code.as_str())
        .with_attr("severity", detail.severity.as_str());
    if let Some(origin) = &detail.origin {
        element.set_attr("origin", origin);
    }
    if let Some(category) = &detail.category {
        element.set_attr("category", category);
    }
    if let Some(short_description) = &detail.short_description {
        element.set_attr("shortDescription", short_description);
    }
    if let Some(ref_to) = &detail.ref_to_message_in_error {
        element.set_attr("refToMessageInError", ref_to.as_str());
    }
    if let Some(text) = &detail.detail {
        element.push_child(eb3("ErrorDetail").with_text(text.as_str()));
    }
    element
}

fn error_detail_from_xml(element: &XmlElement) -> Result<ErrorDetail, CodecError> {
    let severity_text = element.attr("severity").unwrap_or("FAILURE");
    let severity = Severity::parse(severity_text).ok_or_else(|| {
        CodecError::MalformedEnvelope(format!("unknown error severity: {severity_text}"))
    })?;
    Ok(ErrorDetail {
        error_code: element.attr("errorCode").unwrap_or_default().to_string(),
        severity,
        origin: element.attr("origin").map(str::to_string),
        category: element.attr("category").map(str::to_string),
        short_description: element.attr("shortDescription").map(str::to_string),
        detail: element
            .first_child(EBMS3, "ErrorDetail")
            .map(|e| e.text()),
        ref_to_message_in_error: element
            .attr("refToMessageInError")
            .map(MessageId::from),
    })
}

/// Projects a signal message into its `eb3:SignalMessage` element.
pub fn signal_message_to_xml(signal_message: &SignalMessage) -> XmlElement {
    let mut element = eb3("SignalMessage").with_child(message_info_to_xml(
        &signal_message.message_id,
        signal_message.ref_to_message_id.as_ref(),
        signal_message.timestamp,
    ));
    match &signal_message.signal {
        Signal::Receipt(content) => {
            let mut receipt = eb3("Receipt");
            match content {
                ReceiptContent::EchoedUserMessage(user_message) => {
                    receipt.push_child(user_message_to_xml(user_message));
                }
                ReceiptContent::NonRepudiation(references) => {
                    receipt.push_child(nrr_to_xml(references));
                }
            }
            element.push_child(receipt);
        }
        Signal::Error(details) => {
            for detail in details {
                element.push_child(error_detail_to_xml(detail));
            }
        }
        Signal::PullRequest { mpc } => {
            element.push_child(eb3("PullRequest").with_attr("mpc", mpc.as_str()));
        }
    }
    element
}

/// Reads a signal message back, selecting the variant by which child is present.
pub fn signal_message_from_xml(element: &XmlElement) -> Result<SignalMessage, CodecError> {
    let info = message_info_from_xml(element)?;

    let signal = if let Some(receipt) = element.first_child(EBMS3, "Receipt") {
        if let Some(echoed) = receipt.first_child(EBMS3, "UserMessage") {
            Signal::Receipt(ReceiptContent::EchoedUserMessage(user_message_from_xml(
                echoed,
            )?))
        } else if let Some(nri) = receipt.first_child(EBBP, "NonRepudiationInformation") {
            Signal::Receipt(ReceiptContent::NonRepudiation(nrr_from_xml(nri)?))
        } else {
            Signal::Receipt(ReceiptContent::NonRepudiation(Vec::new()))
        }
    } else if element.first_child(EBMS3, "Error").is_some() {
        let details = element
            .children_named(EBMS3, "Error")
            .map(error_detail_from_xml)
            .collect::<Result<Vec<_>, _>>()?;
        Signal::Error(details)
    } else if let Some(pull) = element.first_child(EBMS3, "PullRequest") {
        Signal::PullRequest {
            mpc: pull
                .attr("mpc")
                .map(str::to_string)
                .unwrap_or_else(|| DEFAULT_MPC.to_string()),
        }
    } else {
        return Err(CodecError::MalformedEnvelope(
            "signal message without Receipt, Error, or PullRequest".to_string(),
        ));
    };

    Ok(SignalMessage {
        message_id: info.message_id,
        ref_to_message_id: info.ref_to_message_id,
        timestamp: info.timestamp,
        signal,
        routing_input: None,
        is_duplicate: false,
    })
}
