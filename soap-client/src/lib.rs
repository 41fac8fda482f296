//! Private SOAP client for TR-064 device communication
//!
//! This crate provides the HTTP side of the tr064 client: descriptor
//! retrieval, SOAP action calls and GENA event subscriptions
//! (SUBSCRIBE/UNSUBSCRIBE). The [`Transport`] trait is the seam the domain
//! crate talks to; [`SoapClient`] is its `reqwest` implementation.
//!
//! When credentials are configured, a `401` answered with a digest challenge
//! is retried exactly once with an `Authorization: Digest` header.

mod digest;
pub mod envelope;
mod error;

pub use digest::DigestChallenge;
pub use error::{SoapError, SoapFault};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{Method, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};
use xmltree::Element;

/// Response from a GENA subscription request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionResponse {
    /// Subscription ID returned by the device
    pub sid: String,
    /// Actual timeout granted by the device (in seconds)
    pub timeout_seconds: u32,
}

/// HTTP operations the TR-064 client needs from its transport.
///
/// All URLs are absolute. Implementations must not retry on their own except
/// for the single digest-authentication challenge.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// GET a document and return its body
    async fn get(&self, url: &str) -> Result<String, SoapError>;

    /// POST a SOAP envelope and return the raw response body.
    ///
    /// A `500` carrying a SOAP fault is returned as `Ok` so the caller can
    /// extract the fault.
    async fn post_soap(
        &self,
        url: &str,
        service_type: &str,
        action: &str,
        envelope: String,
    ) -> Result<String, SoapError>;

    /// Create a new subscription delivering events to `callback_url`
    async fn subscribe(
        &self,
        url: &str,
        callback_url: &str,
        timeout_seconds: u32,
    ) -> Result<SubscriptionResponse, SoapError>;

    /// Renew an existing subscription, returning the granted timeout
    async fn renew_subscription(
        &self,
        url: &str,
        sid: &str,
        timeout_seconds: u32,
    ) -> Result<u32, SoapError>;

    /// Cancel a subscription
    async fn unsubscribe(&self, url: &str, sid: &str) -> Result<(), SoapError>;

    /// Build the envelope, send it and return the `{action}Response` element
    async fn call(
        &self,
        url: &str,
        service_type: &str,
        action: &str,
        arguments: &[(&str, &str)],
    ) -> Result<Element, SoapError> {
        let body = envelope::build_envelope(service_type, action, arguments);
        let xml_text = self.post_soap(url, service_type, action, body).await?;
        envelope::parse_response(&xml_text, action)
    }
}

/// Username and password used to answer digest challenges
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Builder for [`SoapClient`]
#[derive(Debug, Clone)]
pub struct SoapClientBuilder {
    timeout: Duration,
    accept_invalid_certs: bool,
    credentials: Option<Credentials>,
}

impl Default for SoapClientBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            accept_invalid_certs: true,
            credentials: None,
        }
    }
}

impl SoapClientBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Accept self-signed certificates (gateways ship with one)
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn build(self) -> Result<SoapClient, SoapError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(self.timeout)
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .build()
            .map_err(|e| SoapError::Request(format!("Failed to create HTTP client: {}", e)))?;

        Ok(SoapClient {
            http,
            credentials: self.credentials,
        })
    }
}

/// A minimal SOAP/GENA client for TR-064 devices
#[derive(Debug, Clone)]
pub struct SoapClient {
    http: reqwest::Client,
    credentials: Option<Credentials>,
}

impl SoapClient {
    /// Create a new client with default configuration and no credentials
    pub fn new() -> Result<Self, SoapError> {
        Self::builder().build()
    }

    pub fn builder() -> SoapClientBuilder {
        SoapClientBuilder::default()
    }

    /// Send a request, answering one digest challenge if credentials are set.
    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Option<String>,
    ) -> Result<reqwest::Response, SoapError> {
        let response = self
            .request(method.clone(), url, headers.clone(), body.clone(), None)
            .send()
            .await
            .map_err(|e| network_error(url, e))?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(credentials) = &self.credentials else {
            return Ok(response);
        };

        let Some(challenge) = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(DigestChallenge::parse)
        else {
            return Ok(response);
        };

        let uri = request_uri(url)?;
        let authorization = challenge.authorization(
            &credentials.username,
            &credentials.password,
            method.as_str(),
            &uri,
        );
        debug!(%method, url, realm = %challenge.realm, "answering digest challenge");

        self.request(method, url, headers, body, Some(authorization))
            .send()
            .await
            .map_err(|e| network_error(url, e))
    }

    fn request(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Option<String>,
        authorization: Option<String>,
    ) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, url).headers(headers);
        if let Some(authorization) = authorization {
            builder = builder.header(AUTHORIZATION, authorization);
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }
        builder
    }
}

#[async_trait]
impl Transport for SoapClient {
    async fn get(&self, url: &str) -> Result<String, SoapError> {
        let response = self.send(Method::GET, url, HeaderMap::new(), None).await?;
        let response = ensure_success(response)?;
        response.text().await.map_err(|e| network_error(url, e))
    }

    async fn post_soap(
        &self,
        url: &str,
        service_type: &str,
        action: &str,
        envelope: String,
    ) -> Result<String, SoapError> {
        let mut headers = HeaderMap::new();
        insert_header(&mut headers, "Content-Type", r#"text/xml; charset="utf-8""#)?;
        insert_header(&mut headers, "SOAPAction", &format!("\"{}#{}\"", service_type, action))?;

        let response = self.send(Method::POST, url, headers, Some(envelope)).await?;
        let status = response.status();
        if status.is_success() {
            return response.text().await.map_err(|e| network_error(url, e));
        }

        // Faults travel with a 500 status
        let text = response.text().await.unwrap_or_default();
        if status == StatusCode::INTERNAL_SERVER_ERROR && text.contains("Fault") {
            return Ok(text);
        }
        Err(status_error(status))
    }

    async fn subscribe(
        &self,
        url: &str,
        callback_url: &str,
        timeout_seconds: u32,
    ) -> Result<SubscriptionResponse, SoapError> {
        let mut headers = HeaderMap::new();
        insert_header(&mut headers, "CALLBACK", &format!("<{}>", callback_url))?;
        insert_header(&mut headers, "NT", "upnp:event")?;
        insert_header(&mut headers, "TIMEOUT", &format!("Second-{}", timeout_seconds))?;

        let response = self.send(gena_method("SUBSCRIBE")?, url, headers, None).await?;
        let response = ensure_success(response)?;

        // Extract SID from response headers
        let sid = response
            .headers()
            .get("SID")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| SoapError::Parse("Missing SID header in SUBSCRIBE response".to_string()))?
            .to_string();

        let granted = granted_timeout(response.headers()).unwrap_or(timeout_seconds);

        Ok(SubscriptionResponse {
            sid,
            timeout_seconds: granted,
        })
    }

    async fn renew_subscription(
        &self,
        url: &str,
        sid: &str,
        timeout_seconds: u32,
    ) -> Result<u32, SoapError> {
        let mut headers = HeaderMap::new();
        insert_header(&mut headers, "SID", sid)?;
        insert_header(&mut headers, "TIMEOUT", &format!("Second-{}", timeout_seconds))?;

        let response = self.send(gena_method("SUBSCRIBE")?, url, headers, None).await?;
        let response = ensure_success(response)?;

        Ok(granted_timeout(response.headers()).unwrap_or(timeout_seconds))
    }

    async fn unsubscribe(&self, url: &str, sid: &str) -> Result<(), SoapError> {
        let mut headers = HeaderMap::new();
        insert_header(&mut headers, "SID", sid)?;

        let response = self.send(gena_method("UNSUBSCRIBE")?, url, headers, None).await?;
        ensure_success(response)?;
        Ok(())
    }
}

fn gena_method(name: &str) -> Result<Method, SoapError> {
    Method::from_bytes(name.as_bytes()).map_err(|e| SoapError::Request(e.to_string()))
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) -> Result<(), SoapError> {
    let value = value
        .parse()
        .map_err(|_| SoapError::Request(format!("Invalid value for header {}: {}", name, value)))?;
    headers.insert(name, value);
    Ok(())
}

fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, SoapError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(status_error(response.status()))
    }
}

fn status_error(status: StatusCode) -> SoapError {
    if status == StatusCode::UNAUTHORIZED {
        warn!("device rejected the request as unauthorized");
    }
    SoapError::HttpStatus {
        status: status.as_u16(),
        message: status.canonical_reason().unwrap_or("Unknown").to_string(),
    }
}

fn network_error(url: &str, error: reqwest::Error) -> SoapError {
    SoapError::Network(format!("{}: {}", url, error))
}

/// Path and query of `url`, as used in the digest `uri` field
fn request_uri(url: &str) -> Result<String, SoapError> {
    let parsed = url::Url::parse(url).map_err(|e| SoapError::Request(e.to_string()))?;
    Ok(match parsed.query() {
        Some(query) => format!("{}?{}", parsed.path(), query),
        None => parsed.path().to_string(),
    })
}

/// Parse the `TIMEOUT: Second-1800` response header.
///
/// `Second-infinite` yields `None` so the requested timeout is kept.
fn granted_timeout(headers: &HeaderMap) -> Option<u32> {
    headers
        .get("TIMEOUT")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().strip_prefix("Second-"))
        .and_then(|s| s.parse::<u32>().ok())
}
