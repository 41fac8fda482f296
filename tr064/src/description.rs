//! Descriptor document models.
//!
//! Gateways publish a device tree (`/tr64desc.xml`, `/igddesc.xml`) and one
//! control description (SCPD) per service. Lists may hold a single entry or
//! many; both deserialize into `Vec` fields. Unknown elements are ignored.

use serde::{Deserialize, Serialize};

use crate::error::{Result, Tr064Error};

/// Root element of a device descriptor document
#[derive(Debug, Deserialize)]
pub struct DescriptorRoot {
    pub device: DeviceNode,
}

impl DescriptorRoot {
    pub fn from_xml(xml: &str) -> Result<Self> {
        quick_xml::de::from_str(trim_document(xml))
            .map_err(|e| Tr064Error::Parse(format!("Failed to parse device descriptor: {}", e)))
    }
}

/// One device of the descriptor tree with its services and sub-devices
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceNode {
    pub device_type: String,
    #[serde(default)]
    pub friendly_name: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(rename = "UDN", default)]
    pub udn: Option<String>,
    #[serde(default)]
    pub service_list: Option<ServiceList>,
    #[serde(default)]
    pub device_list: Option<DeviceList>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceList {
    #[serde(rename = "service", default)]
    pub services: Vec<ServiceDescriptor>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceList {
    #[serde(rename = "device", default)]
    pub devices: Vec<DeviceNode>,
}

/// Endpoint description of one service, as listed in the device tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    #[serde(rename = "serviceType")]
    pub service_type: String,
    #[serde(rename = "serviceId")]
    pub service_id: String,
    #[serde(rename = "controlURL")]
    pub control_url: String,
    #[serde(rename = "eventSubURL")]
    pub event_sub_url: String,
    #[serde(rename = "SCPDURL")]
    pub scpd_url: String,
}

/// Identity of a device found in the descriptor tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub device_type: String,
    pub friendly_name: Option<String>,
    pub manufacturer: Option<String>,
    pub model_name: Option<String>,
    pub udn: Option<String>,
}

impl From<&DeviceNode> for DeviceInfo {
    fn from(node: &DeviceNode) -> Self {
        Self {
            device_type: node.device_type.clone(),
            friendly_name: node.friendly_name.clone(),
            manufacturer: node.manufacturer.clone(),
            model_name: node.model_name.clone(),
            udn: node.udn.clone(),
        }
    }
}

/// Service control description (SCPD) document
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scpd {
    #[serde(default)]
    pub action_list: Option<ActionList>,
    #[serde(default)]
    pub service_state_table: Option<StateTable>,
}

impl Scpd {
    pub fn from_xml(xml: &str) -> Result<Self> {
        quick_xml::de::from_str(trim_document(xml))
            .map_err(|e| Tr064Error::Parse(format!("Failed to parse service description: {}", e)))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ActionList {
    #[serde(rename = "action", default)]
    pub actions: Vec<ScpdAction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScpdAction {
    pub name: String,
    #[serde(default)]
    pub argument_list: Option<ArgumentList>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ArgumentList {
    #[serde(rename = "argument", default)]
    pub arguments: Vec<ScpdArgument>,
}

#[derive(Debug, Deserialize)]
pub struct ScpdArgument {
    pub name: String,
    pub direction: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct StateTable {
    #[serde(rename = "stateVariable", default)]
    pub variables: Vec<StateVariable>,
}

#[derive(Debug, Deserialize)]
pub struct StateVariable {
    #[serde(rename = "@sendEvents", default)]
    pub send_events: Option<String>,
    pub name: String,
}

impl StateVariable {
    pub fn sends_events(&self) -> bool {
        self.send_events.as_deref().map(str::trim) == Some("yes")
    }
}

fn trim_document(xml: &str) -> &str {
    xml.trim_matches(|c: char| c == '\0' || c.is_whitespace())
}
