//! GENA notification parsing and correlation.
//!
//! The callback server hands over raw `NOTIFY` payloads. Each property of the
//! body's property-set becomes one [`Event`]; the correlator then stamps the
//! id of the service currently holding the notification's SID.

use callback_server::NotificationPayload;
use serde::Serialize;
use soap_client::envelope::{child_elements, parse_document};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{Result, Tr064Error};
use crate::registry::ServiceRegistry;

/// One changed state variable reported by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    /// State variable name, e.g. `ChangeCounter`
    pub name: String,
    /// Raw text value
    pub value: String,
    /// Subscription id from the `SID` header
    pub sid: String,
    /// Event key from the `SEQ` header
    pub seq: Option<u32>,
    /// Id of the service holding `sid`; `None` when no service matches
    pub service: Option<String>,
}

/// Split a property-set document into events, in document order.
///
/// ```
/// let xml = r#"<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
///   <e:property><ChangeCounter>12</ChangeCounter></e:property>
/// </e:propertyset>"#;
/// let events = tr064::events::parse_property_set(xml, "uuid:1", Some(0)).unwrap();
/// assert_eq!(events[0].name, "ChangeCounter");
/// assert_eq!(events[0].value, "12");
/// ```
pub fn parse_property_set(xml: &str, sid: &str, seq: Option<u32>) -> Result<Vec<Event>> {
    let root = parse_document(xml.trim_start())?;
    if root.name != "propertyset" {
        return Err(Tr064Error::Parse(format!(
            "expected propertyset, found {}",
            root.name
        )));
    }

    let events = child_elements(&root)
        .filter(|element| element.name == "property")
        .flat_map(child_elements)
        .map(|variable| Event {
            name: variable.name.clone(),
            value: variable
                .get_text()
                .map(|text| text.into_owned())
                .unwrap_or_default(),
            sid: sid.to_string(),
            seq,
            service: None,
        })
        .collect();

    Ok(events)
}

/// Attributes notifications to registered services by SID
#[derive(Debug, Clone)]
pub struct EventCorrelator {
    registry: Arc<ServiceRegistry>,
}

impl EventCorrelator {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }

    /// Parse `payload` and fill in the service of every event
    pub fn correlate(&self, payload: &NotificationPayload) -> Result<Vec<Event>> {
        let mut events = parse_property_set(
            &payload.event_xml,
            &payload.subscription_id,
            payload.sequence,
        )?;

        let service = self
            .registry
            .find_by_sid(&payload.subscription_id)
            .map(|proxy| proxy.service_id().to_string());
        if service.is_none() {
            debug!(sid = %payload.subscription_id, "notification for unknown subscription");
        }

        for event in &mut events {
            event.service = service.clone();
        }
        Ok(events)
    }
}

/// Forward notifications from the callback server to broadcast observers.
///
/// Malformed notifications are logged and dropped. The task ends when the
/// callback server's sender side is gone.
pub(crate) fn spawn_publisher(
    mut notifications: mpsc::UnboundedReceiver<NotificationPayload>,
    correlator: EventCorrelator,
    events: broadcast::Sender<Event>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(payload) = notifications.recv().await {
            let parsed = match correlator.correlate(&payload) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(sid = %payload.subscription_id, error = %e, "dropping malformed notification");
                    continue;
                }
            };

            for event in parsed {
                trace!(name = %event.name, sid = %event.sid, "publishing event");
                // No observers is fine
                let _ = events.send(event);
            }
        }
        debug!("event publisher stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_PROPERTIES: &str = r#"<?xml version="1.0"?>
<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
  <e:property><ChangeCounter>7</ChangeCounter></e:property>
  <e:property><X_AVM-DE_HostListChanged>1</X_AVM-DE_HostListChanged></e:property>
</e:propertyset>"#;

    fn payload(sid: &str, xml: &str) -> NotificationPayload {
        NotificationPayload {
            subscription_id: sid.to_string(),
            sequence: Some(3),
            event_xml: xml.to_string(),
        }
    }

    #[test]
    fn test_two_properties_in_order() {
        let events = parse_property_set(TWO_PROPERTIES, "uuid:sub-1", Some(3)).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].name, "ChangeCounter");
        assert_eq!(events[0].value, "7");
        assert_eq!(events[1].name, "X_AVM-DE_HostListChanged");
        assert_eq!(events[1].value, "1");
        assert!(events.iter().all(|e| e.sid == "uuid:sub-1" && e.seq == Some(3)));
        assert!(events.iter().all(|e| e.service.is_none()));
    }

    #[test]
    fn test_single_property_with_trailing_nul() {
        let xml = "<e:propertyset xmlns:e=\"urn:schemas-upnp-org:event-1-0\"><e:property><ExternalIPAddress>203.0.113.7</ExternalIPAddress></e:property></e:propertyset>\n\u{0}";
        let events = parse_property_set(xml, "uuid:sub-2", None).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].value, "203.0.113.7");
        assert_eq!(events[0].seq, None);
    }

    #[test]
    fn test_empty_value() {
        let xml = "<e:propertyset xmlns:e=\"urn:schemas-upnp-org:event-1-0\"><e:property><LastChange/></e:property></e:propertyset>";
        let events = parse_property_set(xml, "uuid:sub-3", None).unwrap();
        assert_eq!(events[0].name, "LastChange");
        assert_eq!(events[0].value, "");
    }

    #[test]
    fn test_malformed_notifications() {
        assert!(matches!(
            parse_property_set("<e:propertyset", "uuid:x", None),
            Err(Tr064Error::Parse(_))
        ));
        assert!(matches!(
            parse_property_set("<root><property/></root>", "uuid:x", None),
            Err(Tr064Error::Parse(_))
        ));
    }

    #[test]
    fn test_correlator_leaves_unknown_sid_unset() {
        let correlator = EventCorrelator::new(Arc::new(ServiceRegistry::new()));
        let events = correlator.correlate(&payload("uuid:gone", TWO_PROPERTIES)).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.service.is_none()));
    }

    #[tokio::test]
    async fn test_publisher_skips_malformed_and_keeps_running() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events_tx, mut events_rx) = broadcast::channel(16);
        let correlator = EventCorrelator::new(Arc::new(ServiceRegistry::new()));
        let handle = spawn_publisher(rx, correlator, events_tx);

        tx.send(payload("uuid:a", "not xml")).unwrap();
        tx.send(payload("uuid:b", TWO_PROPERTIES)).unwrap();

        let first = events_rx.recv().await.unwrap();
        let second = events_rx.recv().await.unwrap();
        assert_eq!(first.sid, "uuid:b");
        assert_eq!(first.name, "ChangeCounter");
        assert_eq!(second.name, "X_AVM-DE_HostListChanged");

        drop(tx);
        handle.await.unwrap();
    }
}
