//! In-memory gateway for client tests.
//!
//! `FakeGateway` serves the XML fixtures by path, answers SOAP calls from a
//! table of canned responses and hands out sequential subscription ids. Every
//! request is recorded so tests can assert on what the client sent.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tr064::{SoapError, SubscriptionResponse, Transport, Tr064Client, Tr064Config};
use url::Url;

pub const GATEWAY: &str = "http://fritz.box:49000";

pub fn fixture(name: &str) -> String {
    let path = format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("fixture {}: {}", path, e))
}

/// Successful SOAP response carrying `outputs`
pub fn soap_response(service_type: &str, action: &str, outputs: &[(&str, &str)]) -> String {
    let values: String = outputs
        .iter()
        .map(|(name, value)| format!("<{name}>{value}</{name}>"))
        .collect();
    format!(
        r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
<s:Body><u:{action}Response xmlns:u="{service_type}">{values}</u:{action}Response></s:Body>
</s:Envelope>"#
    )
}

pub fn soap_fault(code: u16, description: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
<s:Body><s:Fault><faultcode>s:Client</faultcode><faultstring>UPnPError</faultstring>
<detail><UPnPError xmlns="urn:dslforum-org:control-1-0"><errorCode>{code}</errorCode><errorDescription>{description}</errorDescription></UPnPError></detail>
</s:Fault></s:Body></s:Envelope>"#
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Get(String),
    Post { url: String, action: String, envelope: String },
    Subscribe { url: String, callback_url: String },
    Renew { url: String, sid: String },
    Unsubscribe { url: String, sid: String },
}

#[derive(Debug)]
struct Reply {
    path: String,
    action: String,
    /// Only answer when the envelope contains this text
    needle: Option<String>,
    body: String,
}

#[derive(Debug)]
pub struct FakeGateway {
    documents: Mutex<HashMap<String, String>>,
    replies: Mutex<Vec<Reply>>,
    requests: Mutex<Vec<Request>>,
    renew_failures: Mutex<VecDeque<u16>>,
    next_sid: AtomicU32,
    granted_timeout: u32,
    subscribe_delay: Mutex<Option<Duration>>,
}

impl FakeGateway {
    /// Gateway serving every descriptor and SCPD fixture
    pub fn new() -> Arc<Self> {
        let documents = [
            "tr64desc.xml",
            "igddesc.xml",
            "deviceinfoSCPD.xml",
            "wlanconfigSCPD.xml",
            "hostsSCPD.xml",
            "igdconnSCPD.xml",
        ]
        .into_iter()
        .map(|name| (format!("/{}", name), fixture(name)))
        .collect();

        Arc::new(Self {
            documents: Mutex::new(documents),
            replies: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            renew_failures: Mutex::new(VecDeque::new()),
            next_sid: AtomicU32::new(1),
            granted_timeout: 1800,
            subscribe_delay: Mutex::new(None),
        })
    }

    /// Answer `action` on the control URL `path` with `body`
    pub fn reply(&self, path: &str, action: &str, body: String) {
        self.replies.lock().push(Reply {
            path: path.to_string(),
            action: action.to_string(),
            needle: None,
            body,
        });
    }

    /// Like [`reply`](Self::reply), but only for envelopes containing `needle`
    pub fn reply_when(&self, path: &str, action: &str, needle: &str, body: String) {
        self.replies.lock().push(Reply {
            path: path.to_string(),
            action: action.to_string(),
            needle: Some(needle.to_string()),
            body,
        });
    }

    /// Stop serving the document at `path`
    pub fn forget(&self, path: &str) {
        self.documents.lock().remove(path);
    }

    /// Answer SUBSCRIBE requests only after `delay`
    pub fn delay_subscribe(&self, delay: Duration) {
        *self.subscribe_delay.lock() = Some(delay);
    }

    /// Reject the next renewal with `status`
    pub fn fail_next_renewal(&self, status: u16) {
        self.renew_failures.lock().push_back(status);
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    pub fn posts(&self, action: &str) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter_map(|request| match request {
                Request::Post { url, action: a, .. } if a == action => Some(url),
                _ => None,
            })
            .collect()
    }

    pub fn renewals(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter_map(|request| match request {
                Request::Renew { sid, .. } => Some(sid),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, predicate: impl Fn(&Request) -> bool) -> usize {
        self.requests().iter().filter(|r| predicate(r)).count()
    }

    fn record(&self, request: Request) {
        self.requests.lock().push(request);
    }
}

fn path_of(url: &str) -> String {
    Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}

#[async_trait]
impl Transport for FakeGateway {
    async fn get(&self, url: &str) -> Result<String, SoapError> {
        self.record(Request::Get(url.to_string()));
        self.documents
            .lock()
            .get(&path_of(url))
            .cloned()
            .ok_or_else(|| SoapError::HttpStatus {
                status: 404,
                message: format!("GET {}", url),
            })
    }

    async fn post_soap(
        &self,
        url: &str,
        _service_type: &str,
        action: &str,
        envelope: String,
    ) -> Result<String, SoapError> {
        let path = path_of(url);
        let body = self
            .replies
            .lock()
            .iter()
            .find(|reply| {
                reply.path == path
                    && reply.action == action
                    && reply.needle.as_ref().map_or(true, |n| envelope.contains(n.as_str()))
            })
            .map(|reply| reply.body.clone());
        self.record(Request::Post {
            url: url.to_string(),
            action: action.to_string(),
            envelope,
        });

        body.ok_or_else(|| SoapError::HttpStatus {
            status: 500,
            message: format!("no reply for {} on {}", action, path),
        })
    }

    async fn subscribe(
        &self,
        url: &str,
        callback_url: &str,
        _timeout_seconds: u32,
    ) -> Result<SubscriptionResponse, SoapError> {
        self.record(Request::Subscribe {
            url: url.to_string(),
            callback_url: callback_url.to_string(),
        });
        let n = self.next_sid.fetch_add(1, Ordering::SeqCst);
        let delay = *self.subscribe_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(SubscriptionResponse {
            sid: format!("uuid:sub-{}", n),
            timeout_seconds: self.granted_timeout,
        })
    }

    async fn renew_subscription(
        &self,
        url: &str,
        sid: &str,
        _timeout_seconds: u32,
    ) -> Result<u32, SoapError> {
        self.record(Request::Renew {
            url: url.to_string(),
            sid: sid.to_string(),
        });
        match self.renew_failures.lock().pop_front() {
            Some(status) => Err(SoapError::HttpStatus {
                status,
                message: "Precondition Failed".to_string(),
            }),
            None => Ok(self.granted_timeout),
        }
    }

    async fn unsubscribe(&self, url: &str, sid: &str) -> Result<(), SoapError> {
        self.record(Request::Unsubscribe {
            url: url.to_string(),
            sid: sid.to_string(),
        });
        Ok(())
    }
}

/// Client on `gateway` with the SSL upgrade disabled
pub fn client(gateway: &Arc<FakeGateway>) -> Tr064Client {
    client_with(gateway, Tr064Config::new().with_url(GATEWAY).with_auto_ssl(false))
}

pub fn client_with(gateway: &Arc<FakeGateway>, config: Tr064Config) -> Tr064Client {
    let transport: Arc<dyn Transport> = gateway.clone();
    Tr064Client::with_transport(config, transport).unwrap()
}
