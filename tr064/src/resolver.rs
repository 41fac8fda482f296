//! Fallback lookup for service ids that are not registered verbatim.
//!
//! Callers use two naming families for the same service:
//!
//! - vendor service ids: `urn:WLANConfiguration-com:serviceId:WLANConfiguration3`
//! - canonical service types: `urn:dslforum-org:service:WLANConfiguration:3`
//!
//! Both reduce to a base name and an optional instance number
//! (`WLANConfiguration`, `3`). A requested id matches a registered one when
//! both parts agree. Wi-Fi configuration services are numbered
//! inconsistently across firmware revisions, so for a base name containing
//! `WLAN` the instance one below the requested one is tried as well.

/// Base name and instance number of a service identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceName<'a> {
    pub base: &'a str,
    pub instance: Option<u32>,
}

impl<'a> ServiceName<'a> {
    /// Split either naming form; `None` for identifiers that fit neither
    pub fn parse(id: &'a str) -> Option<Self> {
        let segments: Vec<&str> = id.trim().split(':').collect();

        // urn:{domain}:service:{Name}:{N}
        if segments.len() == 5 && segments[0] == "urn" && segments[2] == "service" {
            return Some(Self {
                base: non_empty(segments[3])?,
                instance: segments[4].parse().ok(),
            });
        }

        // urn:{domain}:serviceId:{NameN}
        if segments.len() == 4 && segments[0] == "urn" && segments[2] == "serviceId" {
            return Some(split_instance(non_empty(segments[3])?));
        }

        None
    }

    fn matches(&self, other: &ServiceName<'_>) -> bool {
        if self.base != other.base {
            return false;
        }
        match (self.instance, other.instance) {
            (a, b) if a == b => true,
            // An unnumbered request means the first instance
            (None, Some(1)) => true,
            _ => false,
        }
    }
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

/// `WLANConfiguration3` -> (`WLANConfiguration`, 3)
fn split_instance(name: &str) -> ServiceName<'_> {
    let base = name.trim_end_matches(|c: char| c.is_ascii_digit());
    if base.is_empty() || base.len() == name.len() {
        return ServiceName {
            base: name,
            instance: None,
        };
    }

    ServiceName {
        base,
        instance: name[base.len()..].parse().ok(),
    }
}

/// Find the registered key that `requested` refers to.
///
/// Exact base-and-instance matches win; the Wi-Fi decrement is only tried
/// when no key matches exactly.
pub fn resolve<'k>(requested: &str, keys: impl IntoIterator<Item = &'k str>) -> Option<&'k str> {
    let wanted = ServiceName::parse(requested)?;
    let candidates: Vec<(&'k str, ServiceName<'k>)> = keys
        .into_iter()
        .filter_map(|key| ServiceName::parse(key).map(|name| (key, name)))
        .collect();

    if let Some((key, _)) = candidates.iter().find(|(_, name)| wanted.matches(name)) {
        return Some(*key);
    }

    if !wanted.base.contains("WLAN") {
        return None;
    }

    let shifted = ServiceName {
        base: wanted.base,
        instance: Some(wanted.instance?.checked_sub(1)?),
    };
    candidates
        .iter()
        .find(|(_, name)| shifted.matches(name))
        .map(|(key, _)| *key)
}
