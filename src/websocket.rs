//! The bidirectional subscription port: join/leave an event's room,
//! receive server-pushed `queueUpdate`/`voteUpdate`/
//! `nowPlayingUpdate`/`eventStatusChange` events. Command execution
//! (`events.*`, `queue.*`, `playback.*`) goes over the request/response
//! HTTP surface in `routes.rs`; this socket is fan-out only.

use crate::client::Subscription;
use crate::hub::SharedHub;
use crate::models::EventId;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum IncomingMessage {
    #[serde(rename = "subscription.joinEvent")]
    JoinEvent { event_id: EventId },
    #[serde(rename = "subscription.leaveEvent")]
    LeaveEvent { event_id: EventId },
    #[serde(rename = "ping")]
    Ping,
}

/// Drives one WebSocket connection end to end: registers a fresh
/// `Subscription`, forwards hub pushes out, parses inbound join/leave
/// commands, and tears the subscription out of every room on exit.
pub async fn handle_connection(socket: WebSocket, hub: SharedHub) {
    let conn_id = Uuid::new_v4();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let subscription = Subscription::new(conn_id, outbound_tx);

    let (mut sender, mut receiver) = socket.split();

    let forward_task = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let Ok(json) = serde_json::to_string(&event) else { continue };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) => {
                subscription.touch_heartbeat().await;
                handle_incoming_text(&text, &hub, &subscription);
            }
            Message::Ping(_) => subscription.touch_heartbeat().await,
            Message::Close(_) => break,
            _ => {}
        }
        if !subscription.is_alive(HEARTBEAT_TIMEOUT).await {
            tracing::warn!(%conn_id, "connection heartbeat timed out");
            break;
        }
    }

    for event_id in subscription.subscribed_events.iter() {
        hub.unsubscribe(*event_id, conn_id);
    }
    forward_task.abort();
    tracing::debug!(%conn_id, duration = ?subscription.connection_duration(), "connection closed");
}

fn handle_incoming_text(text: &str, hub: &SharedHub, subscription: &Subscription) {
    let parsed: Result<IncomingMessage, _> = serde_json::from_str(text);
    match parsed {
        Ok(IncomingMessage::JoinEvent { event_id }) => {
            hub.subscribe(
                event_id,
                crate::hub::Subscriber {
                    conn_id: subscription.conn_id,
                    sender: subscription.sender.clone(),
                },
            );
            subscription.subscribed_events.insert(event_id);
        }
        Ok(IncomingMessage::LeaveEvent { event_id }) => {
            hub.unsubscribe(event_id, subscription.conn_id);
            subscription.subscribed_events.remove(&event_id);
        }
        Ok(IncomingMessage::Ping) => {
            // Heartbeat already refreshed by the caller before dispatch.
        }
        Err(err) => {
            tracing::debug!(%err, "malformed subscription message");
        }
    }
}
