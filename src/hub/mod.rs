//! Subscription rooms keyed by `event:{id}`, broadcasting
//! queue/vote/now-playing/status deltas to every current subscriber.
//! Mutations to a room's subscriber set are independently serialized
//! via `dashmap`; broadcasts take a lock-free snapshot of subscribers
//! at send time and never hold a lock across the actual per-subscriber
//! send.

mod rooms;

pub use rooms::RoomKey;

use crate::models::{EventId, QueueItem, TrackId};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

pub type ConnId = Uuid;

/// Self-contained snapshot payloads — clients never diff against a
/// prior state, each event carries everything needed to render.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "topic", content = "payload")]
pub enum HubEvent {
    #[serde(rename = "queueUpdate")]
    QueueUpdate { event_id: EventId, queue: Vec<QueueItem> },
    #[serde(rename = "voteUpdate")]
    VoteUpdate {
        event_id: EventId,
        track_id: TrackId,
        vote_count: i32,
        position: i32,
    },
    #[serde(rename = "nowPlayingUpdate")]
    NowPlayingUpdate {
        event_id: EventId,
        track: Option<QueueItem>,
    },
    #[serde(rename = "eventStatusChange")]
    EventStatusChange { event_id: EventId, status: String },
}

/// A single connected listener's outbound channel. Best-effort
/// delivery: a full/closed channel just drops the send, since the next
/// broadcast carries a fresh snapshot that supersedes it anyway.
#[derive(Clone)]
pub struct Subscriber {
    pub conn_id: ConnId,
    pub sender: UnboundedSender<HubEvent>,
}

#[derive(Default)]
pub struct EventHub {
    rooms: DashMap<RoomKey, Vec<Subscriber>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, event_id: EventId, subscriber: Subscriber) {
        let key = RoomKey::for_event(event_id);
        let mut room = self.rooms.entry(key).or_default();
        room.retain(|s| s.conn_id != subscriber.conn_id);
        room.push(subscriber);
    }

    pub fn unsubscribe(&self, event_id: EventId, conn_id: ConnId) {
        let key = RoomKey::for_event(event_id);
        if let Some(mut room) = self.rooms.get_mut(&key) {
            room.retain(|s| s.conn_id != conn_id);
        }
    }

    /// Drops a connection from every room it belongs to (on disconnect).
    pub fn unsubscribe_all(&self, conn_id: ConnId) {
        for mut room in self.rooms.iter_mut() {
            room.retain(|s| s.conn_id != conn_id);
        }
    }

    pub fn subscriber_count(&self, event_id: EventId) -> usize {
        self.rooms
            .get(&RoomKey::for_event(event_id))
            .map(|room| room.len())
            .unwrap_or(0)
    }

    /// Delivers `event` to every current subscriber of `event_id`'s
    /// room. Best-effort FIFO per subscriber; no ordering guarantee
    /// across subscribers.
    pub fn broadcast(&self, event_id: EventId, event: HubEvent) {
        let key = RoomKey::for_event(event_id);
        let snapshot: Vec<Subscriber> = self
            .rooms
            .get(&key)
            .map(|room| room.clone())
            .unwrap_or_default();

        for subscriber in snapshot {
            if subscriber.sender.send(event.clone()).is_err() {
                tracing::debug!(conn_id = %subscriber.conn_id, %event_id, "dropped broadcast to closed subscriber");
            }
        }
    }
}

pub type SharedHub = Arc<EventHub>;

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn subscribe_then_broadcast_delivers_to_subscriber() {
        let hub = EventHub::new();
        let event_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.subscribe(event_id, Subscriber { conn_id: Uuid::new_v4(), sender: tx });

        hub.broadcast(
            event_id,
            HubEvent::EventStatusChange {
                event_id,
                status: "ACTIVE".to_string(),
            },
        );

        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn unsubscribe_stops_further_delivery() {
        let hub = EventHub::new();
        let event_id = Uuid::new_v4();
        let conn_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.subscribe(event_id, Subscriber { conn_id, sender: tx });
        hub.unsubscribe(event_id, conn_id);

        hub.broadcast(
            event_id,
            HubEvent::EventStatusChange {
                event_id,
                status: "ENDED".to_string(),
            },
        );

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn broadcast_to_unknown_room_is_a_no_op() {
        let hub = EventHub::new();
        hub.broadcast(
            Uuid::new_v4(),
            HubEvent::EventStatusChange {
                event_id: Uuid::new_v4(),
                status: "ACTIVE".to_string(),
            },
        );
    }
}
