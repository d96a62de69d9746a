//! # Subscription lifecycle with the devices.
//!
//! On attachment every device is asked to publish its state changes to
//! this controller; a periodic heartbeat renews the subscriptions. On
//! teardown the devices are unsubscribed and the confirmations drained.
//!
//! ## Rules
//! - Heartbeats are best-effort: a missed heartbeat never ignores a
//!   device; liveness is owned by the deployment service.
//! - The publisher-count wait polls under the core mutex at the configured
//!   granularity and gives up when the connect window closes or the
//!   deployment session stops running.

use std::sync::Arc;

use tracing::debug;

use crate::commands::Cmd;

use super::topology::Inner;

impl Inner {
    /// Broadcasts the subscription request and starts the heartbeat loop.
    pub(crate) fn subscribe_to_state_changes(self: &Arc<Self>) {
        let interval_ms = self.cfg.heartbeat_interval.as_millis() as u64;
        self.send(Cmd::SubscribeToStateChange { interval_ms }, "");

        let weak = Arc::downgrade(self);
        let heartbeat = self.heartbeat.clone();
        let interval = self.cfg.heartbeat_interval;
        self.rt.spawn(async move {
            loop {
                tokio::select! {
                    _ = heartbeat.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let Some(inner) = weak.upgrade() else { break };
                        inner.send(Cmd::SubscriptionHeartbeat { interval_ms }, "");
                    }
                }
            }
            debug!("subscription heartbeat loop stopped");
        });
    }

    /// Stops heartbeats, unsubscribes every device and waits for the
    /// confirmations to drain.
    pub(crate) async fn unsubscribe_from_state_changes(&self) {
        self.heartbeat.cancel();
        self.send(Cmd::UnsubscribeFromStateChange, "");
        self.wait_for_publishers(0).await;
    }

    /// Waits until the publisher count reaches `target`.
    ///
    /// Polls at [`poll_interval`](crate::TopologyConfig::poll_interval)
    /// granularity (woken early by subscription acks) and returns `false`
    /// when [`connect_wait`](crate::TopologyConfig::connect_wait) elapses
    /// or the deployment session is no longer running.
    pub(crate) async fn wait_for_publishers(&self, target: usize) -> bool {
        let deadline = tokio::time::Instant::now() + self.cfg.connect_wait;
        loop {
            if self.core.lock().table.publishers() == target {
                return true;
            }
            if !self.deploy.is_running() || tokio::time::Instant::now() >= deadline {
                return false;
            }
            let _ = tokio::time::timeout(self.cfg.poll_interval, self.subs_notify.notified()).await;
        }
    }
}
