//! Per-connection subscriber wrapper: no persisted identity, just an
//! outbound channel and the set of `event:{id}` rooms it currently
//! belongs to. Nothing here survives a reconnect.

use crate::hub::{ConnId, HubEvent};
use crate::models::EventId;
use dashmap::DashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct Subscription {
    pub conn_id: ConnId,
    pub sender: UnboundedSender<HubEvent>,
    pub subscribed_events: Arc<DashSet<EventId>>,
    last_heartbeat: Arc<RwLock<Instant>>,
    connected_at: Instant,
}

impl Subscription {
    pub fn new(conn_id: ConnId, sender: UnboundedSender<HubEvent>) -> Self {
        Self {
            conn_id,
            sender,
            subscribed_events: Arc::new(DashSet::new()),
            last_heartbeat: Arc::new(RwLock::new(Instant::now())),
            connected_at: Instant::now(),
        }
    }

    pub fn send(&self, event: HubEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    pub async fn touch_heartbeat(&self) {
        *self.last_heartbeat.write().await = Instant::now();
    }

    pub async fn is_alive(&self, timeout: Duration) -> bool {
        self.last_heartbeat.read().await.elapsed() < timeout
    }

    pub fn connection_duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    #[tokio::test]
    async fn new_subscription_is_immediately_alive() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let subscription = Subscription::new(Uuid::new_v4(), tx);
        assert!(subscription.is_alive(Duration::from_secs(30)).await);
    }

    #[tokio::test]
    async fn send_after_receiver_dropped_reports_failure() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let subscription = Subscription::new(Uuid::new_v4(), tx);
        assert!(!subscription.send(HubEvent::EventStatusChange {
            event_id: Uuid::new_v4(),
            status: "ACTIVE".to_string(),
        }));
    }
}
