//! Configuration for the TR-064 client
//!
//! [`Tr064Config`] controls which descriptors are loaded, how the gateway is
//! reached and how the event listener binds. It can be built in code with the
//! `with_*` methods or deserialized from JSON; missing fields take their
//! defaults.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;
use url::Url;

use crate::error::{Result, Tr064Error};

/// Configuration for a [`Tr064Client`](crate::Tr064Client)
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tr064Config {
    /// Base URL of the gateway
    /// Default: `http://fritz.box:49000`
    pub url: String,

    /// Username for digest authentication
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Password for digest authentication
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Load `/tr64desc.xml`
    /// Default: true
    pub tr064: bool,

    /// Load `/igddesc.xml`
    /// Default: true
    pub igd: bool,

    /// Switch to the gateway's secure port after initialization
    /// Default: true
    pub auto_ssl: bool,

    /// Accept the gateway's self-signed certificate
    /// Default: true
    pub accept_invalid_certs: bool,

    /// Address advertised in callback URLs; detected from the route to the
    /// gateway when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_address: Option<IpAddr>,

    /// Fixed listener port; when unset the first free port of
    /// `event_port_range` is used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_port: Option<u16>,

    /// Candidate listener ports (inclusive)
    /// Default: (49300, 49400)
    pub event_port_range: (u16, u16),

    /// Subscription timeout requested from the gateway
    /// Default: 1800 seconds
    pub subscription_timeout_secs: u32,

    /// Upper bound between two renewals of a subscription
    /// Default: 300 seconds
    pub renewal_interval_secs: u64,

    /// HTTP request timeout
    /// Default: 10 seconds
    pub request_timeout_secs: u64,

    /// Capacity of the event broadcast channel
    /// Default: 256
    pub event_buffer_size: usize,
}

impl Default for Tr064Config {
    fn default() -> Self {
        Self {
            url: "http://fritz.box:49000".to_string(),
            username: None,
            password: None,
            tr064: true,
            igd: true,
            auto_ssl: true,
            accept_invalid_certs: true,
            event_address: None,
            event_port: None,
            event_port_range: (49300, 49400),
            subscription_timeout_secs: 1800,
            renewal_interval_secs: 300,
            request_timeout_secs: 10,
            event_buffer_size: 256,
        }
    }
}

impl fmt::Debug for Tr064Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tr064Config")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("tr064", &self.tr064)
            .field("igd", &self.igd)
            .field("auto_ssl", &self.auto_ssl)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("event_address", &self.event_address)
            .field("event_port", &self.event_port)
            .field("event_port_range", &self.event_port_range)
            .field("subscription_timeout_secs", &self.subscription_timeout_secs)
            .field("renewal_interval_secs", &self.renewal_interval_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

impl Tr064Config {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON configuration; absent fields keep their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Tr064Error::Configuration(format!("Invalid configuration: {}", e)))
    }

    /// Validate the configuration and return the first issue found
    pub fn validate(&self) -> Result<()> {
        self.base_url()?;

        if !self.tr064 && !self.igd {
            return Err(Tr064Error::Configuration(
                "At least one of tr064 and igd must be enabled".to_string(),
            ));
        }

        if self.event_port.is_none() && self.event_port_range.0 > self.event_port_range.1 {
            return Err(Tr064Error::Configuration(
                "Invalid event port range: start must not exceed end".to_string(),
            ));
        }

        if self.renewal_interval_secs == 0 {
            return Err(Tr064Error::Configuration(
                "Renewal interval must be greater than 0".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Tr064Error::Configuration(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// The gateway URL without credentials, path or query
    pub fn base_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| Tr064Error::Configuration(format!("Invalid url '{}': {}", self.url, e)))?;

        if url.host_str().is_none() {
            return Err(Tr064Error::Configuration(format!("Url '{}' has no host", self.url)));
        }

        // Credentials travel in the digest header, never in the URL
        let _ = url.set_username("");
        let _ = url.set_password(None);
        url.set_path("");
        url.set_query(None);
        url.set_fragment(None);
        Ok(url)
    }

    /// Username and password, taken from the fields or else from the URL
    pub fn credentials(&self) -> Option<(String, String)> {
        if let Some(username) = &self.username {
            return Some((username.clone(), self.password.clone().unwrap_or_default()));
        }

        let url = Url::parse(&self.url).ok()?;
        if url.username().is_empty() {
            return None;
        }
        Some((
            url.username().to_string(),
            url.password().unwrap_or_default().to_string(),
        ))
    }

    pub fn subscription_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.subscription_timeout_secs))
    }

    pub fn renewal_interval(&self) -> Duration {
        Duration::from_secs(self.renewal_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    // Builder pattern methods for fluent configuration

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_tr064(mut self, enabled: bool) -> Self {
        self.tr064 = enabled;
        self
    }

    pub fn with_igd(mut self, enabled: bool) -> Self {
        self.igd = enabled;
        self
    }

    pub fn with_auto_ssl(mut self, enabled: bool) -> Self {
        self.auto_ssl = enabled;
        self
    }

    pub fn with_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    pub fn with_event_address(mut self, address: IpAddr) -> Self {
        self.event_address = Some(address);
        self
    }

    pub fn with_event_port(mut self, port: u16) -> Self {
        self.event_port = Some(port);
        self
    }

    pub fn with_event_ports(mut self, start: u16, end: u16) -> Self {
        self.event_port_range = (start, end);
        self
    }

    pub fn with_subscription_timeout(mut self, seconds: u32) -> Self {
        self.subscription_timeout_secs = seconds;
        self
    }

    pub fn with_renewal_interval(mut self, interval: Duration) -> Self {
        self.renewal_interval_secs = interval.as_secs();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs();
        self
    }
}
