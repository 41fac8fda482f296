//! GENA subscription lifecycle for a single service.
//!
//! Each [`ServiceProxy`](crate::ServiceProxy) owns one `SubscriptionManager`.
//! It holds at most one live subscription and a spawned renewal task that
//! keeps it alive:
//!
//! - the task fires every `min(renewal_interval, granted_timeout / 2)`, never
//!   below half a second, so it always runs before the gateway drops the
//!   subscription
//! - renewal goes by SID; if the gateway rejects it, the task subscribes
//!   again with the same callback URL and stores the new SID
//! - `unsubscribe` aborts the task and bumps the slot generation under the
//!   lock, so a task that is already past its sleep sees the change and stops
//!   without touching the slot
//! - a SUBSCRIBE whose response arrives after an `unsubscribe` is released
//!   again instead of being stored

use parking_lot::Mutex;
use soap_client::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument, Span};

use crate::error::Result;

/// Timing parameters for a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionSettings {
    /// Timeout requested in `TIMEOUT: Second-N`
    pub timeout_seconds: u32,
    /// Upper bound between renewals
    pub renewal_interval: Duration,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: 1800,
            renewal_interval: Duration::from_secs(300),
        }
    }
}

/// Snapshot of a live subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub sid: String,
    /// Timeout most recently granted by the gateway
    pub timeout_seconds: u32,
    pub callback_url: String,
}

#[derive(Debug)]
struct ActiveSubscription {
    info: SubscriptionInfo,
    event_url: String,
    renewal: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct SubscriptionSlot {
    active: Option<ActiveSubscription>,
    /// Bumped whenever the active subscription is replaced or removed
    generation: u64,
}

/// Subscribe, renew and unsubscribe one service's events
#[derive(Debug)]
pub struct SubscriptionManager {
    transport: Arc<dyn Transport>,
    slot: Arc<Mutex<SubscriptionSlot>>,
    span: Span,
}

impl SubscriptionManager {
    pub fn new(transport: Arc<dyn Transport>, span: Span) -> Self {
        Self {
            transport,
            slot: Arc::new(Mutex::new(SubscriptionSlot::default())),
            span,
        }
    }

    /// SID of the live subscription, if any
    pub fn sid(&self) -> Option<String> {
        self.slot.lock().active.as_ref().map(|a| a.info.sid.clone())
    }

    pub fn is_subscribed(&self) -> bool {
        self.slot.lock().active.is_some()
    }

    pub fn info(&self) -> Option<SubscriptionInfo> {
        self.slot.lock().active.as_ref().map(|a| a.info.clone())
    }

    /// Subscribe to `event_url`, delivering events to `callback_url`.
    ///
    /// A previous subscription of this service is cancelled first. Returns the
    /// SID granted by the gateway. If the subscription is cancelled or
    /// replaced while the request is in flight, the granted SID is
    /// unsubscribed again and not stored.
    pub async fn subscribe(
        &self,
        event_url: &str,
        callback_url: &str,
        settings: SubscriptionSettings,
    ) -> Result<String> {
        let (previous, generation) = self.cancel();
        if let Some(previous) = previous {
            debug!(parent: &self.span, sid = %previous.info.sid, "replacing subscription");
            if let Err(e) = self.transport.unsubscribe(&previous.event_url, &previous.info.sid).await {
                warn!(parent: &self.span, error = %e, "failed to cancel replaced subscription");
            }
        }

        let response = self
            .transport
            .subscribe(event_url, callback_url, settings.timeout_seconds)
            .await?;
        info!(
            parent: &self.span,
            sid = %response.sid,
            timeout = response.timeout_seconds,
            "subscribed"
        );

        let info = SubscriptionInfo {
            sid: response.sid.clone(),
            timeout_seconds: response.timeout_seconds,
            callback_url: callback_url.to_string(),
        };

        let cancelled = {
            let mut slot = self.slot.lock();
            if slot.generation != generation {
                true
            } else {
                slot.generation += 1;
                let context = RenewalContext {
                    transport: self.transport.clone(),
                    slot: self.slot.clone(),
                    generation: slot.generation,
                    event_url: event_url.to_string(),
                    callback_url: callback_url.to_string(),
                    settings,
                };
                let renewal = tokio::spawn(
                    renewal_loop(context, response.timeout_seconds).instrument(self.span.clone()),
                );
                slot.active = Some(ActiveSubscription {
                    info,
                    event_url: event_url.to_string(),
                    renewal,
                });
                false
            }
        };

        if cancelled {
            debug!(parent: &self.span, sid = %response.sid, "cancelled while subscribing, releasing");
            if let Err(e) = self.transport.unsubscribe(event_url, &response.sid).await {
                warn!(parent: &self.span, error = %e, "failed to release cancelled subscription");
            }
        }

        Ok(response.sid)
    }

    /// Cancel the subscription.
    ///
    /// The renewal task is stopped and the SID cleared before the
    /// `UNSUBSCRIBE` request is sent. Without a live subscription this is a
    /// no-op.
    pub async fn unsubscribe(&self) -> Result<()> {
        let (Some(previous), _) = self.cancel() else {
            return Ok(());
        };

        debug!(parent: &self.span, sid = %previous.info.sid, "unsubscribing");
        self.transport
            .unsubscribe(&previous.event_url, &previous.info.sid)
            .await?;
        Ok(())
    }

    /// Remove the active subscription and stop its renewal task.
    ///
    /// Returns the removed subscription and the new slot generation.
    fn cancel(&self) -> (Option<ActiveSubscription>, u64) {
        let mut slot = self.slot.lock();
        slot.generation += 1;
        let previous = slot.active.take();
        if let Some(active) = &previous {
            active.renewal.abort();
        }
        (previous, slot.generation)
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        if let Some(active) = self.slot.lock().active.take() {
            active.renewal.abort();
        }
    }
}

/// Delay before the next renewal
pub fn renewal_delay(renewal_interval: Duration, granted_seconds: u32) -> Duration {
    const MIN_DELAY: Duration = Duration::from_millis(500);

    let half_timeout = Duration::from_millis(u64::from(granted_seconds) * 500);
    renewal_interval.min(half_timeout).max(MIN_DELAY)
}

struct RenewalContext {
    transport: Arc<dyn Transport>,
    slot: Arc<Mutex<SubscriptionSlot>>,
    generation: u64,
    event_url: String,
    callback_url: String,
    settings: SubscriptionSettings,
}

impl RenewalContext {
    /// Current SID, or `None` once the subscription was cancelled or replaced
    fn current_sid(&self) -> Option<String> {
        let slot = self.slot.lock();
        if slot.generation != self.generation {
            return None;
        }
        slot.active.as_ref().map(|a| a.info.sid.clone())
    }

    /// Store renewal results; `false` when the subscription is gone
    fn update(&self, sid: Option<String>, timeout_seconds: u32) -> bool {
        let mut slot = self.slot.lock();
        if slot.generation != self.generation {
            return false;
        }
        match slot.active.as_mut() {
            Some(active) => {
                if let Some(sid) = sid {
                    active.info.sid = sid;
                }
                active.info.timeout_seconds = timeout_seconds;
                true
            }
            None => false,
        }
    }
}

async fn renewal_loop(context: RenewalContext, mut granted: u32) {
    loop {
        tokio::time::sleep(renewal_delay(context.settings.renewal_interval, granted)).await;

        let Some(sid) = context.current_sid() else {
            return;
        };

        match context
            .transport
            .renew_subscription(&context.event_url, &sid, context.settings.timeout_seconds)
            .await
        {
            Ok(timeout) => {
                debug!(sid = %sid, timeout, "subscription renewed");
                granted = timeout;
                if !context.update(None, timeout) {
                    return;
                }
            }
            Err(e) => {
                warn!(sid = %sid, error = %e, "renewal rejected, subscribing again");
                match context
                    .transport
                    .subscribe(
                        &context.event_url,
                        &context.callback_url,
                        context.settings.timeout_seconds,
                    )
                    .await
                {
                    Ok(response) => {
                        info!(sid = %response.sid, "subscribed again");
                        granted = response.timeout_seconds;
                        if !context.update(Some(response.sid.clone()), response.timeout_seconds) {
                            // Cancelled while the request was in flight
                            let _ = context
                                .transport
                                .unsubscribe(&context.event_url, &response.sid)
                                .await;
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "resubscription failed, retrying at next renewal");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renewal_delay() {
        let interval = Duration::from_secs(300);
        assert_eq!(renewal_delay(interval, 1800), Duration::from_secs(300));
        assert_eq!(renewal_delay(interval, 300), Duration::from_secs(150));
        assert_eq!(renewal_delay(interval, 3), Duration::from_millis(1500));
        assert_eq!(renewal_delay(interval, 1), Duration::from_millis(500));
        assert_eq!(renewal_delay(interval, 0), Duration::from_millis(500));
        assert_eq!(renewal_delay(Duration::ZERO, 1800), Duration::from_millis(500));
    }

    #[test]
    fn test_renewal_delay_is_before_timeout() {
        for granted in [1u32, 2, 3, 10, 61, 600, 1800, 3600] {
            let delay = renewal_delay(Duration::from_secs(3600), granted);
            assert!(delay < Duration::from_secs(u64::from(granted)), "granted {granted}");
        }
    }

    #[test]
    fn test_new_manager_is_not_subscribed() {
        let transport: Arc<dyn Transport> = Arc::new(soap_client::SoapClient::new().unwrap());
        let manager = SubscriptionManager::new(transport, Span::none());
        assert!(!manager.is_subscribed());
        assert_eq!(manager.sid(), None);
        assert_eq!(manager.info(), None);
    }

    #[test]
    fn test_default_settings() {
        let settings = SubscriptionSettings::default();
        assert_eq!(settings.timeout_seconds, 1800);
        assert_eq!(settings.renewal_interval, Duration::from_secs(300));
    }
}
