//! SOAP envelope construction and response extraction.

use quick_xml::escape::escape;
use xmltree::{Element, XMLNode};

use crate::error::{SoapError, SoapFault};

const ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const ENCODING_STYLE: &str = "http://schemas.xmlsoap.org/soap/encoding/";

/// Build the SOAP envelope for `action` of `service_type`.
///
/// Every argument becomes a child element of the `u:{action}` body element.
/// Values are XML-escaped, names are used verbatim.
pub fn build_envelope(service_type: &str, action: &str, arguments: &[(&str, &str)]) -> String {
    let payload: String = arguments
        .iter()
        .map(|(name, value)| format!("<{name}>{}</{name}>", escape(value)))
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="{ENVELOPE_NS}" s:encodingStyle="{ENCODING_STYLE}"><s:Body><u:{action} xmlns:u="{service_type}">{payload}</u:{action}></s:Body></s:Envelope>"#,
        service_type = escape(service_type),
    )
}

/// Parse a raw SOAP response and return the `{action}Response` element.
pub fn parse_response(xml_text: &str, action: &str) -> Result<Element, SoapError> {
    let xml = parse_document(xml_text)?;
    extract_response(&xml, action)
}

/// Parse an XML document, tolerating the trailing NUL bytes some gateways append.
pub fn parse_document(xml_text: &str) -> Result<Element, SoapError> {
    let trimmed = xml_text.trim_end_matches(|c: char| c == '\0' || c.is_whitespace());
    Element::parse(trimmed.as_bytes()).map_err(|e| SoapError::Parse(e.to_string()))
}

/// Extract the action response from a parsed envelope or surface its fault.
pub fn extract_response(xml: &Element, action: &str) -> Result<Element, SoapError> {
    let body = xml
        .get_child("Body")
        .ok_or_else(|| SoapError::Parse("Missing SOAP Body".to_string()))?;

    // A fault replaces the response element entirely
    if let Some(fault) = body.get_child("Fault") {
        return Err(SoapError::Fault(parse_fault(fault)));
    }

    let response_name = format!("{}Response", action);
    body.get_child(response_name.as_str())
        .cloned()
        .ok_or_else(|| SoapError::Parse(format!("Missing {} element", response_name)))
}

/// Text content of the direct child `name`, if present.
pub fn child_text(element: &Element, name: &str) -> Option<String> {
    element
        .get_child(name)
        .map(|child| child.get_text().map(|t| t.trim().to_string()).unwrap_or_default())
}

/// Iterate over the element children of `element`, skipping text and comments.
pub fn child_elements(element: &Element) -> impl Iterator<Item = &Element> {
    element.children.iter().filter_map(|node| match node {
        XMLNode::Element(child) => Some(child),
        _ => None,
    })
}

fn parse_fault(fault: &Element) -> SoapFault {
    let upnp_error = fault.get_child("detail").and_then(|detail| {
        detail
            .get_child("UPnPError")
            .or_else(|| detail.get_child("UpnPError"))
    });

    SoapFault {
        fault_code: child_text(fault, "faultcode").unwrap_or_default(),
        fault_string: child_text(fault, "faultstring").unwrap_or_default(),
        error_code: upnp_error
            .and_then(|e| child_text(e, "errorCode"))
            .and_then(|code| code.parse::<u16>().ok()),
        error_description: upnp_error.and_then(|e| child_text(e, "errorDescription")),
    }
}
