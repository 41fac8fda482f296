//! Error types for the SOAP client

use std::fmt;
use thiserror::Error;

/// Errors that can occur during SOAP or GENA communication
#[derive(Debug, Error)]
pub enum SoapError {
    /// No response was received (connection refused, timeout, TLS failure)
    #[error("Network error: {0}")]
    Network(String),

    /// The device answered with a non-success HTTP status
    #[error("HTTP error {status}: {message}")]
    HttpStatus {
        /// HTTP status code
        status: u16,
        /// Reason phrase or request context
        message: String,
    },

    /// XML parsing error or a response missing an expected element
    #[error("XML parsing error: {0}")]
    Parse(String),

    /// SOAP fault returned by the device
    #[error("SOAP fault: {0}")]
    Fault(SoapFault),

    /// The request could not be built (invalid method, header or URL)
    #[error("Invalid request: {0}")]
    Request(String),
}

impl SoapError {
    /// HTTP status code carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            SoapError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Content of a SOAP `Fault` element.
///
/// TR-064 devices put the actual reason into a `UPnPError` detail block,
/// the `faultcode`/`faultstring` pair is usually generic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SoapFault {
    pub fault_code: String,
    pub fault_string: String,
    pub error_code: Option<u16>,
    pub error_description: Option<String>,
}

impl fmt::Display for SoapFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.fault_string, self.fault_code)?;
        match (self.error_code, &self.error_description) {
            (Some(code), Some(description)) => write!(f, ", UPnP error {code}: {description}"),
            (Some(code), None) => write!(f, ", UPnP error {code}"),
            (None, Some(description)) => write!(f, ", {description}"),
            (None, None) => Ok(()),
        }
    }
}
