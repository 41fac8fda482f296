//! Service registry built from descriptor trees.

use soap_client::Transport;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, Span};

use crate::description::{DeviceInfo, DeviceNode};
use crate::error::{Result, Tr064Error};
use crate::resolver;
use crate::service::{ServiceProxy, SharedBaseUrl};

/// Flat map from service id to proxy, plus the devices seen on the way
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, Arc<ServiceProxy>>,
    devices: BTreeMap<String, DeviceInfo>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn get(&self, service_id: &str) -> Option<&Arc<ServiceProxy>> {
        self.services.get(service_id)
    }

    pub fn contains(&self, service_id: &str) -> bool {
        self.services.contains_key(service_id)
    }

    /// Registered service ids in sorted order
    pub fn service_ids(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    pub fn services(&self) -> impl Iterator<Item = &Arc<ServiceProxy>> {
        self.services.values()
    }

    /// Devices keyed by device type
    pub fn devices(&self) -> &BTreeMap<String, DeviceInfo> {
        &self.devices
    }

    /// Look up `service_id`, falling back to the naming-scheme resolver
    pub fn resolve(&self, service_id: &str) -> Result<&Arc<ServiceProxy>> {
        if let Some(proxy) = self.services.get(service_id) {
            return Ok(proxy);
        }

        resolver::resolve(service_id, self.service_ids())
            .and_then(|key| self.services.get(key))
            .ok_or_else(|| Tr064Error::UnknownService(service_id.to_string()))
    }

    /// Service currently holding subscription `sid`
    pub fn find_by_sid(&self, sid: &str) -> Option<&Arc<ServiceProxy>> {
        self.services
            .values()
            .find(|proxy| proxy.subscription_id().as_deref() == Some(sid))
    }

    /// Add every service of `root` and its sub-devices.
    ///
    /// A service id already registered with the same descriptor is skipped;
    /// one registered with a different control URL is a configuration error.
    pub(crate) fn add_device_tree(
        &mut self,
        root: DeviceNode,
        transport: &Arc<dyn Transport>,
        base_url: &SharedBaseUrl,
        span: &Span,
    ) -> Result<usize> {
        let mut added = 0;
        let mut pending = vec![root];

        while let Some(mut device) = pending.pop() {
            let services = device.service_list.take().map(|l| l.services).unwrap_or_default();
            let children = device.device_list.take().map(|l| l.devices).unwrap_or_default();
            self.devices
                .insert(device.device_type.clone(), DeviceInfo::from(&device));

            for descriptor in services {
                if let Some(existing) = self.services.get(&descriptor.service_id) {
                    if existing.descriptor().control_url != descriptor.control_url {
                        return Err(Tr064Error::Configuration(format!(
                            "service {} registered twice with control URLs {} and {}",
                            descriptor.service_id,
                            existing.descriptor().control_url,
                            descriptor.control_url
                        )));
                    }
                    debug!(parent: span, id = %descriptor.service_id, "skipping duplicate service");
                    continue;
                }

                debug!(parent: span, id = %descriptor.service_id, device = %device.device_type, "registering service");
                let proxy = ServiceProxy::new(descriptor, transport.clone(), base_url.clone(), span);
                self.services
                    .insert(proxy.service_id().to_string(), Arc::new(proxy));
                added += 1;
            }

            // Reverse keeps document order when popping
            pending.extend(children.into_iter().rev());
        }

        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::DescriptorRoot;
    use async_trait::async_trait;
    use parking_lot::RwLock;
    use soap_client::{SoapError, SubscriptionResponse};
    use url::Url;

    #[derive(Debug)]
    struct OfflineTransport;

    #[async_trait]
    impl Transport for OfflineTransport {
        async fn get(&self, _url: &str) -> std::result::Result<String, SoapError> {
            Err(SoapError::Network("offline".to_string()))
        }

        async fn post_soap(
            &self,
            _url: &str,
            _service_type: &str,
            _action: &str,
            _envelope: String,
        ) -> std::result::Result<String, SoapError> {
            Err(SoapError::Network("offline".to_string()))
        }

        async fn subscribe(
            &self,
            _url: &str,
            _callback_url: &str,
            _timeout_seconds: u32,
        ) -> std::result::Result<SubscriptionResponse, SoapError> {
            Err(SoapError::Network("offline".to_string()))
        }

        async fn renew_subscription(
            &self,
            _url: &str,
            _sid: &str,
            _timeout_seconds: u32,
        ) -> std::result::Result<u32, SoapError> {
            Err(SoapError::Network("offline".to_string()))
        }

        async fn unsubscribe(&self, _url: &str, _sid: &str) -> std::result::Result<(), SoapError> {
            Err(SoapError::Network("offline".to_string()))
        }
    }

    fn service(id: &str, control: &str) -> String {
        format!(
            "<service><serviceType>urn:dslforum-org:service:{id}:1</serviceType>\
             <serviceId>urn:{id}-com:serviceId:{id}1</serviceId>\
             <controlURL>{control}</controlURL><eventSubURL>{control}</eventSubURL>\
             <SCPDURL>/{id}SCPD.xml</SCPDURL></service>"
        )
    }

    fn tree(root_services: &[String], child_services: &[String]) -> DeviceNode {
        let xml = format!(
            "<root><device><deviceType>urn:dslforum-org:device:InternetGatewayDevice:1</deviceType>\
             <serviceList>{}</serviceList><deviceList><device>\
             <deviceType>urn:dslforum-org:device:LANDevice:1</deviceType>\
             <serviceList>{}</serviceList></device></deviceList></device></root>",
            root_services.concat(),
            child_services.concat()
        );
        DescriptorRoot::from_xml(&xml).unwrap().device
    }

    fn build(registry: &mut ServiceRegistry, root: DeviceNode) -> Result<usize> {
        let transport: Arc<dyn Transport> = Arc::new(OfflineTransport);
        let base_url: SharedBaseUrl = Arc::new(RwLock::new(Url::parse("http://fritz.box:49000").unwrap()));
        registry.add_device_tree(root, &transport, &base_url, &Span::none())
    }

    #[test]
    fn test_nested_devices_are_flattened() {
        let root = tree(
            &[
                service("DeviceInfo", "/upnp/control/deviceinfo"),
                service("Time", "/upnp/control/time"),
                service("UserInterface", "/upnp/control/userif"),
            ],
            &[
                service("Hosts", "/upnp/control/hosts"),
                service("LANConfigSecurity", "/upnp/control/lanconfigsecurity"),
            ],
        );

        let mut registry = ServiceRegistry::new();
        assert_eq!(build(&mut registry, root).unwrap(), 5);
        assert_eq!(registry.len(), 5);
        assert!(registry.contains("urn:Hosts-com:serviceId:Hosts1"));
        assert_eq!(registry.devices().len(), 2);
        assert!(registry
            .devices()
            .contains_key("urn:dslforum-org:device:LANDevice:1"));
    }

    #[test]
    fn test_identical_duplicate_is_skipped() {
        let mut registry = ServiceRegistry::new();
        let info = service("DeviceInfo", "/upnp/control/deviceinfo");
        build(&mut registry, tree(&[info.clone()], &[])).unwrap();

        let added = build(&mut registry, tree(&[info], &[service("Hosts", "/upnp/control/hosts")])).unwrap();
        assert_eq!(added, 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_conflicting_duplicate_is_rejected() {
        let mut registry = ServiceRegistry::new();
        let result = build(
            &mut registry,
            tree(
                &[service("DeviceInfo", "/upnp/control/deviceinfo")],
                &[service("DeviceInfo", "/igdupnp/control/deviceinfo")],
            ),
        );
        assert!(matches!(result, Err(Tr064Error::Configuration(_))));
    }

    #[test]
    fn test_resolve_falls_back_to_resolver() {
        let mut registry = ServiceRegistry::new();
        build(
            &mut registry,
            tree(&[service("DeviceInfo", "/upnp/control/deviceinfo")], &[]),
        )
        .unwrap();

        let proxy = registry.resolve("urn:dslforum-org:service:DeviceInfo:1").unwrap();
        assert_eq!(proxy.service_id(), "urn:DeviceInfo-com:serviceId:DeviceInfo1");

        let err = registry.resolve("urn:dslforum-org:service:Hosts:1").unwrap_err();
        assert_eq!(err.to_string(), "service with id urn:dslforum-org:service:Hosts:1 not known");
        assert!(registry.find_by_sid("uuid:none").is_none());
    }
}
