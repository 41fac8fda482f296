//! HTTP server for receiving GENA event notifications.

use bytes::Bytes;
use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use warp::http::{Method, StatusCode};
use warp::Filter;

use crate::error::ServerError;
use crate::router::{EventRouter, NotificationPayload};

/// How the callback server binds and advertises itself
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Fixed port; when set, `port_range` is ignored
    pub port: Option<u16>,
    /// Inclusive range scanned for the first free port
    pub port_range: (u16, u16),
    /// Interface the listener binds to
    pub bind_address: IpAddr,
    /// Address put into callback URLs; detected when unset
    pub advertised_address: Option<IpAddr>,
    /// Remote address used to pick the outgoing interface during detection
    pub probe_target: String,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            port: None,
            port_range: (49300, 49400),
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            advertised_address: None,
            probe_target: "8.8.8.8:80".to_string(),
        }
    }
}

/// HTTP callback server for receiving GENA `NOTIFY` requests.
///
/// Every accepted notification is forwarded through an [`EventRouter`] to the
/// channel given at construction. Dropping the server stops it as well, but
/// only [`CallbackServer::shutdown`] waits for in-flight requests.
#[derive(Debug)]
pub struct CallbackServer {
    port: u16,
    base_url: String,
    event_router: Arc<EventRouter>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server_handle: Option<tokio::task::JoinHandle<()>>,
}

impl CallbackServer {
    /// Start a server on the first free port in `port_range`, advertising the
    /// detected local address.
    pub async fn new(
        port_range: (u16, u16),
        event_sender: mpsc::UnboundedSender<NotificationPayload>,
    ) -> Result<Self, ServerError> {
        let options = ServerOptions {
            port_range,
            ..ServerOptions::default()
        };
        Self::with_options(options, event_sender).await
    }

    /// Start a server with explicit bind and advertise options.
    pub async fn with_options(
        options: ServerOptions,
        event_sender: mpsc::UnboundedSender<NotificationPayload>,
    ) -> Result<Self, ServerError> {
        let advertised = options
            .advertised_address
            .or_else(|| local_address_towards(&options.probe_target))
            .ok_or(ServerError::LocalAddress)?;

        let (start, end) = options.port_range;
        let candidates: Vec<u16> = match options.port {
            Some(port) => vec![port],
            None => (start..=end).collect(),
        };

        let event_router = Arc::new(EventRouter::new(event_sender));
        let routes = routes(event_router.clone());
        let mut last_error = None;

        for port in candidates {
            let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
            let addr = SocketAddr::new(options.bind_address, port);
            let bound = warp::serve(routes.clone()).try_bind_with_graceful_shutdown(addr, async move {
                let _ = shutdown_rx.await;
            });

            match bound {
                Ok((local_addr, server)) => {
                    let port = local_addr.port();
                    let base_url = format!("http://{}", SocketAddr::new(advertised, port));
                    info!(%local_addr, %base_url, "callback server listening");

                    let server_handle = tokio::spawn(server);
                    return Ok(Self {
                        port,
                        base_url,
                        event_router,
                        shutdown_tx: Some(shutdown_tx),
                        server_handle: Some(server_handle),
                    });
                }
                Err(e) => {
                    debug!(port, error = %e, "callback port unavailable");
                    last_error = Some(e.to_string());
                }
            }
        }

        match options.port {
            Some(_) => Err(ServerError::Bind(last_error.unwrap_or_default())),
            None => Err(ServerError::NoAvailablePort { start, end }),
        }
    }

    /// Base URL, e.g. `http://192.168.178.20:49300`
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL to put into the `CALLBACK` header of a subscription
    pub fn callback_url(&self) -> String {
        format!("{}/", self.base_url)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.event_router
    }

    /// Stop accepting connections and wait for in-flight requests to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.server_handle.take() {
            let _ = handle.await;
        }
        debug!(port = self.port, "callback server stopped");
    }
}

/// Local address of the interface that routes to `target` (`host:port`).
///
/// No packet is sent; connecting a UDP socket only selects the route.
pub fn local_address_towards(target: &str) -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect(target).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

fn routes(
    event_router: Arc<EventRouter>,
) -> impl Filter<Extract = impl warp::Reply, Error = Infallible> + Clone {
    warp::method()
        .and(warp::header::optional::<String>("sid"))
        .and(warp::header::optional::<String>("seq"))
        .and(warp::header::optional::<String>("nt"))
        .and(warp::header::optional::<String>("nts"))
        .and(warp::body::bytes())
        .and_then(
            move |method: Method,
                  sid: Option<String>,
                  seq: Option<String>,
                  nt: Option<String>,
                  nts: Option<String>,
                  body: Bytes| {
                let router = event_router.clone();
                async move { handle_notify(&router, method, sid, seq, nt, nts, body) }
            },
        )
        .recover(handle_rejection)
}

fn handle_notify(
    router: &EventRouter,
    method: Method,
    sid: Option<String>,
    seq: Option<String>,
    nt: Option<String>,
    nts: Option<String>,
    body: Bytes,
) -> Result<warp::reply::WithStatus<&'static str>, warp::Rejection> {
    if method.as_str() != "NOTIFY" {
        return Err(warp::reject::custom(UnsupportedMethod));
    }

    let Some(subscription_id) = sid.filter(|s| !s.trim().is_empty()) else {
        warn!("NOTIFY without SID header");
        return Err(warp::reject::custom(MissingSid));
    };

    if !is_property_change(&nt, &nts) {
        warn!(sid = %subscription_id, ?nt, ?nts, "ignoring NOTIFY with unexpected NT/NTS");
        return Ok(warp::reply::with_status("", StatusCode::OK));
    }

    let sequence = seq.and_then(|s| s.trim().parse::<u32>().ok());
    debug!(sid = %subscription_id, ?sequence, bytes = body.len(), "NOTIFY received");

    router.route_event(NotificationPayload {
        subscription_id,
        sequence,
        event_xml: String::from_utf8_lossy(&body).into_owned(),
    });

    Ok(warp::reply::with_status("", StatusCode::OK))
}

/// NT and NTS are optional, but when both are present they must describe a
/// property change.
fn is_property_change(nt: &Option<String>, nts: &Option<String>) -> bool {
    match (nt, nts) {
        (Some(nt), Some(nts)) => nt == "upnp:event" && nts == "upnp:propchange",
        _ => true,
    }
}

#[derive(Debug)]
struct MissingSid;

impl warp::reject::Reject for MissingSid {}

#[derive(Debug)]
struct UnsupportedMethod;

impl warp::reject::Reject for UnsupportedMethod {}

async fn handle_rejection(err: warp::Rejection) -> Result<impl warp::Reply, Infallible> {
    let (code, message) = if err.find::<MissingSid>().is_some() {
        (StatusCode::BAD_REQUEST, "Missing SID header")
    } else if err.find::<UnsupportedMethod>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Only NOTIFY is supported")
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found")
    } else {
        (StatusCode::BAD_REQUEST, "Invalid request")
    };

    Ok(warp::reply::with_status(message, code))
}
