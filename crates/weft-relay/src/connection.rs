//! Per-observer connection handling
//!
//! Every observer gets one `initial` snapshot before any incremental
//! update, then a relay loop where each send carries its own budget.
//! A connection that exceeds its budget is dropped alone; pings run as
//! an independent arm of the same loop so a relay burst never delays
//! them.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use weft_core::{BroadcastMessage, MachineSnapshot};

use crate::watchdog::{Heartbeat, RelayStats};

/// Largest serialized payload relayed to an observer
pub const MAX_OUTGOING_BYTES: usize = 256 * 1024;

/// Per-observer loop settings
#[derive(Debug, Clone)]
pub struct ObserverSettings {
    /// Budget for one send
    pub send_timeout: Duration,

    /// Interval between server-originated pings
    pub ping_interval: Duration,
}

/// Serialize a broadcast message for one observer.
///
/// Size-capped and failure-tolerant: an oversized or unserializable
/// message becomes a structured error note rather than aborting the
/// relay.
pub fn serialize_outgoing(message: &BroadcastMessage) -> String {
    match serde_json::to_string(message) {
        Ok(text) if text.len() <= MAX_OUTGOING_BYTES => text,
        Ok(text) => {
            warn!(
                machine = %message.machine_name,
                bytes = text.len(),
                "Replacing oversized outgoing payload"
            );
            replacement_note(message, "payload too large")
        }
        Err(e) => {
            warn!(error = %e, "Replacing unserializable outgoing payload");
            replacement_note(message, "payload serialization failed")
        }
    }
}

fn replacement_note(message: &BroadcastMessage, reason: &str) -> String {
    json!({
        "type": "error",
        "machine_name": message.machine_name,
        "payload": {
            "message": reason,
            "original_type": message.message_type,
        },
        "timestamp": message.timestamp,
    })
    .to_string()
}

/// Send one frame under the observer's budget. `Err` means the
/// connection should be dropped.
async fn send_bounded<TX>(tx: &mut TX, frame: Message, budget: Duration) -> Result<(), ()>
where
    TX: Sink<Message> + Unpin,
{
    match tokio::time::timeout(budget, tx.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(()),
        Err(_) => Err(()),
    }
}

/// Drive one observer connection until it disconnects, errors, or
/// exceeds a send budget.
pub async fn relay_connection<TX, RX>(
    mut tx: TX,
    mut rx: RX,
    mut hub: broadcast::Receiver<BroadcastMessage>,
    snapshot: Vec<MachineSnapshot>,
    settings: ObserverSettings,
    stats: Arc<RelayStats>,
    heartbeat: Heartbeat,
) where
    TX: Sink<Message> + Unpin + Send,
    RX: Stream<Item = Result<Message, axum::Error>> + Unpin + Send,
{
    stats.connections.fetch_add(1, Ordering::Relaxed);

    // Full snapshot before any incremental update.
    let initial = json!({ "type": "initial", "machines": snapshot }).to_string();
    if send_bounded(&mut tx, Message::Text(initial), settings.send_timeout)
        .await
        .is_err()
    {
        stats.dropped.fetch_add(1, Ordering::Relaxed);
        stats.connections.fetch_sub(1, Ordering::Relaxed);
        return;
    }

    let mut ping = tokio::time::interval(settings.ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; swallow it so pings start one
    // interval after connect.
    ping.tick().await;

    loop {
        tokio::select! {
            relayed = hub.recv() => match relayed {
                Ok(message) => {
                    let text = serialize_outgoing(&message);
                    if send_bounded(&mut tx, Message::Text(text), settings.send_timeout)
                        .await
                        .is_err()
                    {
                        // This observer is too slow or gone; dropping
                        // it must not affect anyone else.
                        stats.dropped.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                    stats.delivered.fetch_add(1, Ordering::Relaxed);
                    heartbeat.touch();
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    // Resync by skipping what this observer missed.
                    debug!(missed, "Observer lagged behind the hub");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = ping.tick() => {
                if send_bounded(&mut tx, Message::Ping(Vec::new()), settings.send_timeout)
                    .await
                    .is_err()
                {
                    stats.dropped.fetch_add(1, Ordering::Relaxed);
                    break;
                }
            }
            incoming = rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if is_client_ping(&text)
                        && send_bounded(
                            &mut tx,
                            Message::Text(json!({"type": "pong"}).to_string()),
                            settings.send_timeout,
                        )
                        .await
                        .is_err()
                    {
                        stats.dropped.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "Observer receive error");
                    break;
                }
            }
        }
    }

    stats.connections.fetch_sub(1, Ordering::Relaxed);
}

fn is_client_ping(text: &str) -> bool {
    if text == "ping" {
        return true;
    }
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(|t| t == "ping"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_payload_passes_through() {
        let message = BroadcastMessage::activity_log("m1", "hello");
        let text = serialize_outgoing(&message);
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["type"], "activity_log");
        assert_eq!(parsed["payload"]["message"], "hello");
    }

    #[test]
    fn oversized_payload_is_replaced_not_dropped() {
        let message = BroadcastMessage::activity_log("m1", &"x".repeat(MAX_OUTGOING_BYTES + 1));
        let text = serialize_outgoing(&message);
        assert!(text.len() < MAX_OUTGOING_BYTES);

        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["type"], "error");
        assert_eq!(parsed["machine_name"], "m1");
        assert_eq!(parsed["payload"]["original_type"], "activity_log");
    }

    #[test]
    fn client_ping_detection() {
        assert!(is_client_ping("ping"));
        assert!(is_client_ping(r#"{"type":"ping"}"#));
        assert!(!is_client_ping(r#"{"type":"pong"}"#));
        assert!(!is_client_ping("anything else"));
    }
}
