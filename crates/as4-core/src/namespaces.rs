//! Namespace URIs and well-known values from the ebMS3/AS4 OASIS stack.
//!
//! These are a bit-exact interoperability surface; every constant here must
//! match the published specification text verbatim.

/// SOAP 1.2 envelope namespace.
pub const SOAP12: &str = "http://www.w3.org/2003/05/soap-envelope";
/// ebMS3 core messaging header namespace.
pub const EBMS3: &str = "http://docs.oasis-open.org/ebxml-msg/ebms/v3.0/ns/core/200704/";
/// AS4 multi-hop extension namespace (RoutingInput et al.).
pub const MULTIHOP: &str = "http://docs.oasis-open.org/ebxml-msg/ns/ebms/v3.0/multihop/200902/";
/// WS-Addressing namespace.
pub const WSA: &str = "http://www.w3.org/2005/08/addressing";
/// WS-Security extension namespace (wsse).
pub const WSSE: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
/// WS-Security utility namespace (wsu), home of the interop `Id` attribute.
pub const WSU: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";
/// XML digital signature namespace.
pub const DSIG: &str = "http://www.w3.org/2000/09/xmldsig#";
/// XML encryption namespace.
pub const XENC: &str = "http://www.w3.org/2001/04/xmlenc#";
/// ebBP signal schema namespace (NonRepudiationInformation).
pub const EBBP: &str = "http://docs.oasis-open.org/ebxml-bp/ebbp-signals-2.0";

/// Default message partition channel assigned when none is specified.
pub const DEFAULT_MPC: &str =
    "http://docs.oasis-open.org/ebxml-msg/ebms/v3.0/ns/core/200704/defaultMPC";
/// Well-known test service; paired with [`TEST_ACTION`] it marks a test message.
pub const TEST_SERVICE: &str =
    "http://docs.oasis-open.org/ebxml-msg/ebms/v3.0/ns/core/200704/service";
/// Well-known test action.
pub const TEST_ACTION: &str =
    "http://docs.oasis-open.org/ebxml-msg/ebms/v3.0/ns/core/200704/test";

/// SOAP role carried by the Messaging header on multi-hop messages.
pub const NEXT_MSH_ROLE: &str =
    "http://docs.oasis-open.org/ebxml-msg/ebms/v3.0/ns/part2/200811/nextmsh";
/// wsa:To address used when routing signals through the I-Cloud.
pub const ICLOUD_ADDRESS: &str =
    "http://docs.oasis-open.org/ebxml-msg/ebms/v3.0/ns/part2/200811/icloud";
/// wsa:Action for a one-way receipt traveling multi-hop.
pub const ONE_WAY_RECEIPT_ACTION: &str =
    "http://docs.oasis-open.org/ebxml-msg/ebms/v3.0/ns/core/200704/oneWay.receipt";
/// wsa:Action for a one-way error traveling multi-hop.
pub const ONE_WAY_ERROR_ACTION: &str =
    "http://docs.oasis-open.org/ebxml-msg/ebms/v3.0/ns/core/200704/oneWay.error";

/// Media type of a bare SOAP 1.2 envelope.
pub const SOAP_CONTENT_TYPE: &str = "application/soap+xml";
/// Media type of a MIME-packaged AS4 message.
pub const MIME_CONTENT_TYPE: &str = "multipart/related";
