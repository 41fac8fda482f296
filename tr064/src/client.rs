//! Tr064Client - main entry point of the crate
//!
//! Ties the pieces together: descriptor loading, the service registry, the
//! optional switch to the gateway's TLS port and the shared event listener.

use callback_server::{local_address_towards, CallbackServer, ServerOptions};
use futures::future::try_join_all;
use parking_lot::RwLock;
use soap_client::{SoapClient, Transport};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument, Span};

use crate::config::Tr064Config;
use crate::description::DescriptorRoot;
use crate::error::{Result, Tr064Error};
use crate::events::{spawn_publisher, Event, EventCorrelator};
use crate::registry::ServiceRegistry;
use crate::service::{endpoint, ActionResult, ServiceProxy, ServiceSummary, SharedBaseUrl};
use crate::subscription::SubscriptionSettings;

/// TR-064 device descriptor
pub const TR064_DESCRIPTOR: &str = "/tr64desc.xml";
/// UPnP Internet Gateway Device descriptor
pub const IGD_DESCRIPTOR: &str = "/igddesc.xml";

pub(crate) const DEVICE_INFO: &str = "urn:DeviceInfo-com:serviceId:DeviceInfo1";

/// Fallback route probe when the gateway host cannot be resolved
const FALLBACK_PROBE: &str = "8.8.8.8:80";

struct Listener {
    server: CallbackServer,
    publisher: JoinHandle<()>,
}

/// Client for one TR-064 gateway
///
/// # Example
///
/// ```rust,no_run
/// use tr064::{Tr064Client, Tr064Config};
///
/// #[tokio::main]
/// async fn main() -> tr064::Result<()> {
///     let config = Tr064Config::new()
///         .with_url("http://192.168.178.1:49000")
///         .with_credentials("admin", "secret");
///     let client = Tr064Client::new(config)?;
///
///     let info = client
///         .exec("urn:DeviceInfo-com:serviceId:DeviceInfo1", "GetInfo", &[])
///         .await?;
///     println!("{:?}", info.get("NewModelName"));
///
///     let mut events = client.observe().await?;
///     while let Ok(event) = events.recv().await {
///         println!("{} = {}", event.name, event.value);
///     }
///     Ok(())
/// }
/// ```
pub struct Tr064Client {
    config: Tr064Config,
    transport: Arc<dyn Transport>,
    base_url: SharedBaseUrl,
    registry: OnceCell<Arc<ServiceRegistry>>,
    listener: Mutex<Option<Listener>>,
    events: broadcast::Sender<Event>,
    span: Span,
}

impl std::fmt::Debug for Tr064Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tr064Client")
            .field("base_url", &self.base_url.read().as_str())
            .field("initialized", &self.registry.initialized())
            .finish_non_exhaustive()
    }
}

impl Tr064Client {
    /// Create a client talking HTTP to the gateway in `config`.
    ///
    /// Nothing is sent until the first operation.
    pub fn new(config: Tr064Config) -> Result<Self> {
        config.validate()?;

        let mut builder = SoapClient::builder()
            .timeout(config.request_timeout())
            .accept_invalid_certs(config.accept_invalid_certs);
        if let Some((username, password)) = config.credentials() {
            builder = builder.credentials(username, password);
        }
        let transport = Arc::new(builder.build()?);

        Self::with_transport(config, transport)
    }

    /// Create a client on top of a custom transport
    pub fn with_transport(config: Tr064Config, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;

        let base_url = config.base_url()?;
        let span = info_span!("tr064", gateway = %base_url.origin().ascii_serialization());
        let (events, _) = broadcast::channel(config.event_buffer_size);

        Ok(Self {
            config,
            transport,
            base_url: Arc::new(RwLock::new(base_url)),
            registry: OnceCell::new(),
            listener: Mutex::new(None),
            events,
            span,
        })
    }

    pub fn config(&self) -> &Tr064Config {
        &self.config
    }

    /// Current base URL; `https` after a successful SSL upgrade
    pub fn base_url(&self) -> String {
        self.base_url.read().to_string()
    }

    pub fn is_initialized(&self) -> bool {
        self.registry.initialized()
    }

    /// Load descriptors and build the registry, once.
    ///
    /// Concurrent callers wait for the same initialization. A failed attempt
    /// leaves the client uninitialized so the next call tries again.
    pub async fn initialize(&self) -> Result<&ServiceRegistry> {
        Ok(self.shared_registry().await?.as_ref())
    }

    async fn shared_registry(&self) -> Result<&Arc<ServiceRegistry>> {
        self.registry
            .get_or_try_init(|| self.load().instrument(self.span.clone()))
            .await
    }

    async fn load(&self) -> Result<Arc<ServiceRegistry>> {
        let mut registry = ServiceRegistry::new();
        let descriptors = [
            (self.config.tr064, TR064_DESCRIPTOR),
            (self.config.igd, IGD_DESCRIPTOR),
        ];

        for (_, path) in descriptors.into_iter().filter(|(enabled, _)| *enabled) {
            let url = endpoint(&self.base_url, path);
            debug!(%url, "loading device descriptor");
            let xml = self.transport.get(&url).await?;
            let root = DescriptorRoot::from_xml(&xml)?;
            let added = registry.add_device_tree(root.device, &self.transport, &self.base_url, &self.span)?;
            info!(%url, added, "device descriptor loaded");
        }

        if self.config.auto_ssl {
            self.upgrade_to_ssl(&registry).await?;
        }

        Ok(Arc::new(registry))
    }

    async fn upgrade_to_ssl(&self, registry: &ServiceRegistry) -> Result<()> {
        let port = query_security_port(registry.resolve(DEVICE_INFO)?).await?;

        let mut url = self.base_url.write();
        url.set_scheme("https")
            .map_err(|_| Tr064Error::Configuration(format!("Cannot switch {} to https", url)))?;
        url.set_port(Some(port))
            .map_err(|_| Tr064Error::Configuration(format!("Cannot set port {} on {}", port, url)))?;
        info!(base_url = %url, "switched to secure port");
        Ok(())
    }

    /// Registry after initialization
    pub async fn registry(&self) -> Result<&ServiceRegistry> {
        self.initialize().await
    }

    pub async fn service_count(&self) -> Result<usize> {
        Ok(self.initialize().await?.len())
    }

    /// Proxy for `service_id`, resolving alternate naming schemes
    pub async fn service(&self, service_id: &str) -> Result<Arc<ServiceProxy>> {
        Ok(self.initialize().await?.resolve(service_id)?.clone())
    }

    /// Invoke `action` on `service_id` and return its output arguments
    pub async fn exec(
        &self,
        service_id: &str,
        action: &str,
        arguments: &[(&str, &str)],
    ) -> Result<ActionResult> {
        self.service(service_id)
            .await?
            .exec_action(action, arguments)
            .await
    }

    /// Summary of every registered service, in id order
    pub async fn describe(&self) -> Result<Vec<ServiceSummary>> {
        let registry = self.initialize().await?;
        try_join_all(registry.services().map(|service| service.summary())).await
    }

    /// Services with at least one evented state variable
    pub async fn event_services(&self) -> Result<Vec<Arc<ServiceProxy>>> {
        let registry = self.initialize().await?;
        let flags = try_join_all(registry.services().map(|service| service.sends_events())).await?;
        Ok(registry
            .services()
            .zip(flags)
            .filter(|(_, sends_events)| *sends_events)
            .map(|(service, _)| service.clone())
            .collect())
    }

    /// Start the listener if needed, subscribe every event-capable service
    /// and return a receiver of correlated events.
    ///
    /// Services that already hold a subscription are left alone, so calling
    /// this again only adds a receiver.
    pub async fn observe(&self) -> Result<broadcast::Receiver<Event>> {
        let receiver = self.events.subscribe();
        let callback_url = self.ensure_listener().await?;
        let settings = SubscriptionSettings {
            timeout_seconds: self.config.subscription_timeout_secs,
            renewal_interval: self.config.renewal_interval(),
        };

        for service in self.event_services().await? {
            if service.is_subscribed() {
                continue;
            }
            service
                .subscribe(&callback_url, settings)
                .instrument(self.span.clone())
                .await?;
        }

        Ok(receiver)
    }

    /// Callback URL of the shared listener, starting it on first use
    pub async fn ensure_listener(&self) -> Result<String> {
        let registry = self.shared_registry().await?.clone();
        let mut listener = self.listener.lock().await;
        if let Some(running) = listener.as_ref() {
            return Ok(running.server.callback_url());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let server = CallbackServer::with_options(self.server_options(), tx).await?;
        let publisher = spawn_publisher(rx, EventCorrelator::new(registry), self.events.clone());
        let callback_url = server.callback_url();
        info!(parent: &self.span, %callback_url, "event listener started");

        *listener = Some(Listener { server, publisher });
        Ok(callback_url)
    }

    fn server_options(&self) -> ServerOptions {
        let gateway = {
            let url = self.base_url.read();
            format!(
                "{}:{}",
                url.host_str().unwrap_or_default(),
                url.port_or_known_default().unwrap_or(80)
            )
        };

        let advertised_address = self
            .config
            .event_address
            .or_else(|| local_address_towards(&gateway))
            .or_else(|| local_address_towards(FALLBACK_PROBE));

        ServerOptions {
            port: self.config.event_port,
            port_range: self.config.event_port_range,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            advertised_address,
            probe_target: gateway,
        }
    }

    /// Unsubscribe every service and stop the listener.
    ///
    /// Every service is attempted; the first unsubscribe error is returned
    /// after the listener has been stopped.
    pub async fn shutdown(&self) -> Result<()> {
        let mut first_error = None;

        if let Some(registry) = self.registry.get() {
            for service in registry.services() {
                if let Err(e) = service.unsubscribe().await {
                    warn!(parent: &self.span, id = %service.service_id(), error = %e, "unsubscribe failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(listener) = self.listener.lock().await.take() {
            listener.server.shutdown().await;
            listener.publisher.abort();
            info!(parent: &self.span, "event listener stopped");
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Port of the gateway's TLS endpoint
    pub async fn security_port(&self) -> Result<u16> {
        query_security_port(self.service(DEVICE_INFO).await?.as_ref()).await
    }
}

async fn query_security_port(device_info: &ServiceProxy) -> Result<u16> {
    let outputs = device_info.exec_action("GetSecurityPort", &[]).await?;
    let value = outputs
        .get("NewSecurityPort")
        .ok_or_else(|| Tr064Error::Parse("GetSecurityPort returned no NewSecurityPort".to_string()))?;
    value
        .parse()
        .map_err(|_| Tr064Error::Parse(format!("Invalid security port '{}'", value)))
}
