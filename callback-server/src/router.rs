//! Event routing for HTTP callback notifications.
//!
//! The `EventRouter` forwards every accepted notification to a channel. It
//! does not filter by subscription: a notification for a SID that is no
//! longer known still reaches the consumer, which decides how to correlate it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Unparsed GENA event notification received via HTTP callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPayload {
    /// The subscription ID from the `SID` header
    pub subscription_id: String,
    /// The event key from the `SEQ` header, if present and numeric
    pub sequence: Option<u32>,
    /// The raw XML event body
    pub event_xml: String,
}

/// Routes notifications from HTTP callbacks to a channel.
#[derive(Debug, Clone)]
pub struct EventRouter {
    event_sender: mpsc::UnboundedSender<NotificationPayload>,
    routed: Arc<AtomicU64>,
}

impl EventRouter {
    /// Create a new event router.
    ///
    /// ```
    /// use tokio::sync::mpsc;
    /// use callback_server::router::{EventRouter, NotificationPayload};
    ///
    /// let (tx, _rx) = mpsc::unbounded_channel::<NotificationPayload>();
    /// let router = EventRouter::new(tx);
    /// assert_eq!(router.routed_count(), 0);
    /// ```
    pub fn new(event_sender: mpsc::UnboundedSender<NotificationPayload>) -> Self {
        Self {
            event_sender,
            routed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Forward a notification to the channel.
    ///
    /// Returns `false` when the receiving side has been dropped.
    pub fn route_event(&self, payload: NotificationPayload) -> bool {
        let subscription_id = payload.subscription_id.clone();
        match self.event_sender.send(payload) {
            Ok(()) => {
                self.routed.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                debug!(sid = %subscription_id, "notification dropped, receiver closed");
                false
            }
        }
    }

    /// Number of notifications forwarded so far
    pub fn routed_count(&self) -> u64 {
        self.routed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(sid: &str, sequence: Option<u32>) -> NotificationPayload {
        NotificationPayload {
            subscription_id: sid.to_string(),
            sequence,
            event_xml: "<e:propertyset/>".to_string(),
        }
    }

    #[tokio::test]
    async fn test_event_router_forwards_any_subscription() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let router = EventRouter::new(tx);

        assert!(router.route_event(payload("uuid:a", Some(0))));
        assert!(router.route_event(payload("uuid:never-registered", None)));

        assert_eq!(rx.recv().await.unwrap().subscription_id, "uuid:a");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.subscription_id, "uuid:never-registered");
        assert_eq!(second.sequence, None);
        assert_eq!(router.routed_count(), 2);
    }

    #[tokio::test]
    async fn test_event_router_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        let router = EventRouter::new(tx);
        drop(rx);

        assert!(!router.route_event(payload("uuid:a", Some(1))));
        assert_eq!(router.routed_count(), 0);
    }

    #[test]
    fn test_cloned_routers_share_counter() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let router = EventRouter::new(tx);
        let clone = router.clone();

        clone.route_event(payload("uuid:a", None));
        assert_eq!(router.routed_count(), 1);

        let received = tokio_test::block_on(rx.recv());
        assert_eq!(received.map(|p| p.subscription_id).as_deref(), Some("uuid:a"));
    }
}
