//! Service proxy: one remote TR-064 service endpoint.
//!
//! A proxy knows its endpoint URLs from the device tree and loads the
//! service's SCPD lazily on first use. From that document it derives one
//! immutable [`ActionDescriptor`] per action and the list of state variables
//! that are delivered as events.

use parking_lot::RwLock;
use serde::Serialize;
use soap_client::envelope::child_text;
use soap_client::Transport;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, Instrument, Span};
use url::Url;
use xmltree::Element;

use crate::description::{Scpd, ScpdAction, ServiceDescriptor};
use crate::error::{Result, Tr064Error};
use crate::subscription::{SubscriptionInfo, SubscriptionManager, SubscriptionSettings};

/// Base URL shared by all proxies; switched once by the SSL upgrade
pub(crate) type SharedBaseUrl = Arc<RwLock<Url>>;

/// Output arguments of an action call, keyed by argument name
pub type ActionResult = BTreeMap<String, String>;

/// Absolute URL for a path from a descriptor
pub(crate) fn endpoint(base: &SharedBaseUrl, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }

    let origin = base.read().origin().ascii_serialization();
    if path.starts_with('/') {
        format!("{}{}", origin, path)
    } else {
        format!("{}/{}", origin, path)
    }
}

/// Name and argument lists of one action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionDescriptor {
    pub name: String,
    /// Input argument names in declaration order
    pub in_args: Vec<String>,
    /// Output argument names in declaration order
    pub out_args: Vec<String>,
}

impl ActionDescriptor {
    /// Build from an SCPD action; `None` when it declares no argument list
    fn from_scpd(action: &ScpdAction) -> Option<Self> {
        let arguments = &action.argument_list.as_ref()?.arguments;
        let names = |direction: &str| -> Vec<String> {
            arguments
                .iter()
                .filter(|a| a.direction.trim().eq_ignore_ascii_case(direction))
                .map(|a| a.name.trim().to_string())
                .collect()
        };

        Some(Self {
            name: action.name.trim().to_string(),
            in_args: names("in"),
            out_args: names("out"),
        })
    }

    /// Pick the declared outputs from a response element.
    ///
    /// Outputs missing from the response are omitted, undeclared elements are
    /// ignored.
    pub fn extract_outputs(&self, response: &Element) -> ActionResult {
        self.out_args
            .iter()
            .filter_map(|name| child_text(response, name).map(|value| (name.clone(), value)))
            .collect()
    }
}

#[derive(Debug)]
struct ServiceMetadata {
    actions: BTreeMap<String, ActionDescriptor>,
    events: Vec<String>,
}

impl ServiceMetadata {
    fn from_scpd(scpd: Scpd) -> Self {
        let actions = scpd
            .action_list
            .map(|list| list.actions)
            .unwrap_or_default()
            .iter()
            .filter_map(ActionDescriptor::from_scpd)
            .map(|action| (action.name.clone(), action))
            .collect();

        let events = scpd
            .service_state_table
            .map(|table| table.variables)
            .unwrap_or_default()
            .into_iter()
            .filter(|variable| variable.sends_events())
            .map(|variable| variable.name.trim().to_string())
            .collect();

        Self { actions, events }
    }
}

/// Short introspection record of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSummary {
    pub id: String,
    pub sends_events: bool,
    pub actions: Vec<String>,
}

/// Full introspection record of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDescription {
    #[serde(flatten)]
    pub descriptor: ServiceDescriptor,
    pub actions: Vec<ActionDescriptor>,
    pub events: Vec<String>,
}

/// Handle to one remote service
#[derive(Debug)]
pub struct ServiceProxy {
    descriptor: ServiceDescriptor,
    transport: Arc<dyn Transport>,
    base_url: SharedBaseUrl,
    metadata: OnceCell<ServiceMetadata>,
    subscription: SubscriptionManager,
    span: Span,
}

impl ServiceProxy {
    pub(crate) fn new(
        descriptor: ServiceDescriptor,
        transport: Arc<dyn Transport>,
        base_url: SharedBaseUrl,
        parent: &Span,
    ) -> Self {
        let span = tracing::debug_span!(parent: parent, "service", id = %descriptor.service_id);
        let subscription = SubscriptionManager::new(transport.clone(), span.clone());

        Self {
            descriptor,
            transport,
            base_url,
            metadata: OnceCell::new(),
            subscription,
            span,
        }
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    pub fn service_id(&self) -> &str {
        &self.descriptor.service_id
    }

    pub fn service_type(&self) -> &str {
        &self.descriptor.service_type
    }

    pub fn is_initialized(&self) -> bool {
        self.metadata.initialized()
    }

    /// Load the SCPD once; concurrent callers share the single fetch
    pub async fn initialize(&self) -> Result<()> {
        self.metadata().await.map(|_| ())
    }

    async fn metadata(&self) -> Result<&ServiceMetadata> {
        self.metadata
            .get_or_try_init(|| {
                async {
                    let url = endpoint(&self.base_url, &self.descriptor.scpd_url);
                    debug!(%url, "loading service description");
                    let xml = self.transport.get(&url).await?;
                    let metadata = ServiceMetadata::from_scpd(Scpd::from_xml(&xml)?);
                    debug!(
                        actions = metadata.actions.len(),
                        events = metadata.events.len(),
                        "service initialized"
                    );
                    Ok::<_, Tr064Error>(metadata)
                }
                .instrument(self.span.clone())
            })
            .await
    }

    /// Call `action_name` with `arguments` and return its declared outputs
    pub async fn exec_action(
        &self,
        action_name: &str,
        arguments: &[(&str, &str)],
    ) -> Result<ActionResult> {
        let metadata = self.metadata().await?;
        let action = metadata
            .actions
            .get(action_name)
            .ok_or_else(|| Tr064Error::UnknownAction {
                action: action_name.to_string(),
                service_type: self.descriptor.service_type.clone(),
            })?;

        let url = endpoint(&self.base_url, &self.descriptor.control_url);
        let response = self
            .transport
            .call(&url, &self.descriptor.service_type, action_name, arguments)
            .instrument(self.span.clone())
            .await?;

        debug!(parent: &self.span, action = action_name, "action executed");
        Ok(action.extract_outputs(&response))
    }

    /// Descriptor plus resolved actions and event names
    pub async fn describe(&self) -> Result<ServiceDescription> {
        let metadata = self.metadata().await?;
        Ok(ServiceDescription {
            descriptor: self.descriptor.clone(),
            actions: metadata.actions.values().cloned().collect(),
            events: metadata.events.clone(),
        })
    }

    pub async fn summary(&self) -> Result<ServiceSummary> {
        let metadata = self.metadata().await?;
        Ok(ServiceSummary {
            id: self.descriptor.service_id.clone(),
            sends_events: !metadata.events.is_empty(),
            actions: metadata.actions.keys().cloned().collect(),
        })
    }

    /// Whether any state variable of this service is evented
    pub async fn sends_events(&self) -> Result<bool> {
        Ok(!self.metadata().await?.events.is_empty())
    }

    pub async fn action(&self, action_name: &str) -> Result<Option<ActionDescriptor>> {
        Ok(self.metadata().await?.actions.get(action_name).cloned())
    }

    /// Subscribe this service's events to `callback_url`
    pub async fn subscribe(&self, callback_url: &str, settings: SubscriptionSettings) -> Result<String> {
        let event_url = endpoint(&self.base_url, &self.descriptor.event_sub_url);
        self.subscription.subscribe(&event_url, callback_url, settings).await
    }

    pub async fn unsubscribe(&self) -> Result<()> {
        self.subscription.unsubscribe().await
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_subscribed()
    }

    /// SID of the live subscription, if any
    pub fn subscription_id(&self) -> Option<String> {
        self.subscription.sid()
    }

    pub fn subscription(&self) -> Option<SubscriptionInfo> {
        self.subscription.info()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::{ArgumentList, ScpdArgument};

    fn argument(name: &str, direction: &str) -> ScpdArgument {
        ScpdArgument {
            name: name.to_string(),
            direction: direction.to_string(),
        }
    }

    fn response(xml: &str) -> Element {
        Element::parse(xml.as_bytes()).unwrap()
    }

    #[test]
    fn test_action_descriptor_from_scpd() {
        let action = ScpdAction {
            name: "GetSpecificHostEntry".to_string(),
            argument_list: Some(ArgumentList {
                arguments: vec![
                    argument("NewMACAddress", "in"),
                    argument("NewIPAddress", "out"),
                    argument("NewActive", "out"),
                    argument("NewHostName", "out"),
                ],
            }),
        };

        let descriptor = ActionDescriptor::from_scpd(&action).unwrap();
        assert_eq!(descriptor.in_args, vec!["NewMACAddress"]);
        assert_eq!(descriptor.out_args, vec!["NewIPAddress", "NewActive", "NewHostName"]);
    }

    #[test]
    fn test_action_without_argument_list_is_skipped() {
        let action = ScpdAction {
            name: "Reboot".to_string(),
            argument_list: None,
        };
        assert!(ActionDescriptor::from_scpd(&action).is_none());

        let empty = ScpdAction {
            name: "FactoryReset".to_string(),
            argument_list: Some(ArgumentList::default()),
        };
        let descriptor = ActionDescriptor::from_scpd(&empty).unwrap();
        assert!(descriptor.in_args.is_empty() && descriptor.out_args.is_empty());
    }

    #[test]
    fn test_extract_outputs_ignores_extra_and_omits_missing() {
        let descriptor = ActionDescriptor {
            name: "GetInfo".to_string(),
            in_args: vec![],
            out_args: vec!["NewEnable".to_string(), "NewSSID".to_string(), "NewChannel".to_string()],
        };

        let outputs = descriptor.extract_outputs(&response(
            "<u:GetInfoResponse xmlns:u=\"urn:test\"><NewEnable>1</NewEnable><NewSSID>FRITZ!Box Gastzugang</NewSSID><NewBogus>x</NewBogus></u:GetInfoResponse>",
        ));

        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs["NewEnable"], "1");
        assert_eq!(outputs["NewSSID"], "FRITZ!Box Gastzugang");
        assert!(!outputs.contains_key("NewChannel"));
        assert!(!outputs.contains_key("NewBogus"));
    }

    #[test]
    fn test_endpoint_joins_paths() {
        let base: SharedBaseUrl = Arc::new(RwLock::new(Url::parse("http://fritz.box:49000").unwrap()));
        assert_eq!(
            endpoint(&base, "/upnp/control/deviceinfo"),
            "http://fritz.box:49000/upnp/control/deviceinfo"
        );
        assert_eq!(endpoint(&base, "hostsSCPD.xml"), "http://fritz.box:49000/hostsSCPD.xml");
        assert_eq!(
            endpoint(&base, "http://192.168.178.1:49000/igdconnSCPD.xml"),
            "http://192.168.178.1:49000/igdconnSCPD.xml"
        );

        *base.write() = Url::parse("https://fritz.box:49443").unwrap();
        assert_eq!(
            endpoint(&base, "/upnp/control/deviceinfo"),
            "https://fritz.box:49443/upnp/control/deviceinfo"
        );
    }
}
