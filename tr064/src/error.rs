use callback_server::ServerError;
use soap_client::{SoapError, SoapFault};
use thiserror::Error;

/// Errors returned by the TR-064 client
#[derive(Debug, Error)]
pub enum Tr064Error {
    /// No response from the gateway (connection refused, timeout, TLS)
    #[error("Network error: {0}")]
    Network(String),

    /// The gateway answered with a non-success HTTP status
    #[error("HTTP error {status}: {message}")]
    HttpStatus { status: u16, message: String },

    /// A descriptor, SCPD or response document could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// The gateway answered an action call with a SOAP fault
    #[error("Device responded with fault: {0}")]
    SoapFault(SoapFault),

    /// No registered service matches the id, even after resolution
    #[error("service with id {0} not known")]
    UnknownService(String),

    #[error("action {action} of {service_type} not known")]
    UnknownAction { action: String, service_type: String },

    /// Invalid configuration or conflicting descriptors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The event listener could not be started
    #[error("Listener error: {0}")]
    Listener(#[from] ServerError),
}

impl Tr064Error {
    /// UPnP error code of a SOAP fault, e.g. `401` for an invalid action
    pub fn upnp_error_code(&self) -> Option<u16> {
        match self {
            Tr064Error::SoapFault(fault) => fault.error_code,
            _ => None,
        }
    }
}

/// Type alias for results that can return a Tr064Error
pub type Result<T> = std::result::Result<T, Tr064Error>;

impl From<SoapError> for Tr064Error {
    fn from(error: SoapError) -> Self {
        match error {
            SoapError::Network(msg) => Tr064Error::Network(msg),
            SoapError::HttpStatus { status, message } => Tr064Error::HttpStatus { status, message },
            SoapError::Parse(msg) => Tr064Error::Parse(msg),
            SoapError::Fault(fault) => Tr064Error::SoapFault(fault),
            SoapError::Request(msg) => Tr064Error::Configuration(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soap_error_conversion() {
        let error: Tr064Error = SoapError::Network("connection refused".to_string()).into();
        assert!(matches!(error, Tr064Error::Network(_)));

        let error: Tr064Error = SoapError::HttpStatus {
            status: 401,
            message: "Unauthorized".to_string(),
        }
        .into();
        assert!(matches!(error, Tr064Error::HttpStatus { status: 401, .. }));

        let fault = SoapFault {
            fault_code: "s:Client".to_string(),
            fault_string: "UPnPError".to_string(),
            error_code: Some(714),
            error_description: Some("NoSuchEntryInArray".to_string()),
        };
        let error: Tr064Error = SoapError::Fault(fault).into();
        assert_eq!(error.upnp_error_code(), Some(714));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            Tr064Error::UnknownService("urn:Foo-com:serviceId:Foo1".to_string()).to_string(),
            "service with id urn:Foo-com:serviceId:Foo1 not known"
        );
        assert_eq!(
            Tr064Error::UnknownAction {
                action: "Reboot".to_string(),
                service_type: "urn:dslforum-org:service:DeviceConfig:1".to_string(),
            }
            .to_string(),
            "action Reboot of urn:dslforum-org:service:DeviceConfig:1 not known"
        );
        assert_eq!(
            Tr064Error::Listener(ServerError::LocalAddress).to_string(),
            "Listener error: Could not determine the local address to advertise"
        );
    }
}
