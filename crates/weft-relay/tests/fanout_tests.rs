//! Fan-out isolation tests
//!
//! The core correctness property of the relay: one stalled observer is
//! dropped on its own budget and never delays delivery to the others.

use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::ws::Message;
use futures::channel::mpsc;
use futures::{stream, Sink, StreamExt};
use serde_json::Value;
use tokio::sync::broadcast;

use weft_core::domain::repository::memory::MemoryMachineStateRepository;
use weft_core::{BroadcastMessage, MachineSnapshot, MachineStateRepository};
use weft_relay::{relay_connection, Heartbeat, ObserverSettings, RelayStats};

/// Sink that accepts a fixed number of frames, then stalls forever
struct StallAfter {
    allowed: usize,
    sent: usize,
}

impl StallAfter {
    fn new(allowed: usize) -> Self {
        Self { allowed, sent: 0 }
    }
}

impl Sink<Message> for StallAfter {
    type Error = std::convert::Infallible;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.sent < self.allowed {
            Poll::Ready(Ok(()))
        } else {
            // Never wakes; the relay's per-send budget is what gets
            // the connection unstuck (by dropping it).
            Poll::Pending
        }
    }

    fn start_send(self: Pin<&mut Self>, _item: Message) -> Result<(), Self::Error> {
        self.get_mut().sent += 1;
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

fn settings() -> ObserverSettings {
    ObserverSettings {
        send_timeout: Duration::from_millis(500),
        ping_interval: Duration::from_secs(60),
    }
}

fn snapshot_m1(state: &str) -> Vec<MachineSnapshot> {
    vec![MachineSnapshot {
        machine_name: "m1".to_string(),
        current_state: state.to_string(),
        last_activity: chrono::Utc::now(),
        pid: None,
        metadata: Value::Null,
    }]
}

async fn next_text(rx: &mut mpsc::Receiver<Message>) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), rx.next())
            .await
            .expect("observer starved")
            .expect("observer closed");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).expect("valid json");
        }
    }
}

#[tokio::test]
async fn stalled_observer_does_not_starve_healthy_ones() {
    let (hub, _) = broadcast::channel::<BroadcastMessage>(64);
    let stats = Arc::new(RelayStats::default());
    let heartbeat = Heartbeat::new();

    // One observer that takes its initial snapshot and then stalls
    // permanently.
    let stalled = tokio::spawn(relay_connection(
        StallAfter::new(1),
        stream::pending(),
        hub.subscribe(),
        snapshot_m1("waiting"),
        settings(),
        stats.clone(),
        heartbeat.clone(),
    ));

    // Three healthy observers.
    let mut healthy = Vec::new();
    for _ in 0..3 {
        let (tx, rx) = mpsc::channel::<Message>(64);
        tokio::spawn(relay_connection(
            tx,
            stream::pending(),
            hub.subscribe(),
            snapshot_m1("waiting"),
            settings(),
            stats.clone(),
            heartbeat.clone(),
        ));
        healthy.push(rx);
    }

    // Every observer (stalled included) received its initial message;
    // now the stall has begun. Emit a broadcast.
    for rx in &mut healthy {
        let initial = next_text(rx).await;
        assert_eq!(initial["type"], "initial");
        assert_eq!(initial["machines"][0]["machine_name"], "m1");
    }
    hub.send(BroadcastMessage::state_change("m1", "waiting", "processing", "new_job"))
        .unwrap();

    // All healthy observers see it within normal latency.
    for rx in &mut healthy {
        let relayed = next_text(rx).await;
        assert_eq!(relayed["type"], "state_change");
        assert_eq!(relayed["payload"]["to_state"], "processing");
    }

    // The stalled connection is dropped on its own budget, alone.
    tokio::time::timeout(Duration::from_secs(3), stalled)
        .await
        .expect("stalled connection should have been dropped")
        .unwrap();
    assert_eq!(stats.dropped.load(Ordering::Relaxed), 1);
    assert_eq!(stats.connections.load(Ordering::Relaxed), 3);
}

#[tokio::test]
async fn observer_gets_initial_before_any_increment() {
    let (hub, _) = broadcast::channel::<BroadcastMessage>(64);
    let (tx, mut rx) = mpsc::channel::<Message>(64);

    tokio::spawn(relay_connection(
        tx,
        stream::pending(),
        hub.subscribe(),
        snapshot_m1("waiting"),
        settings(),
        Arc::new(RelayStats::default()),
        Heartbeat::new(),
    ));

    let first = next_text(&mut rx).await;
    assert_eq!(first["type"], "initial");
}

#[tokio::test]
async fn client_ping_is_answered_with_pong() {
    let (hub, _) = broadcast::channel::<BroadcastMessage>(64);
    let (tx, mut rx) = mpsc::channel::<Message>(64);

    let incoming = stream::iter(vec![Ok::<Message, axum::Error>(Message::Text(
        r#"{"type":"ping"}"#.to_string(),
    ))])
    .chain(stream::pending());

    tokio::spawn(relay_connection(
        tx,
        incoming,
        hub.subscribe(),
        Vec::new(),
        settings(),
        Arc::new(RelayStats::default()),
        Heartbeat::new(),
    ));

    let initial = next_text(&mut rx).await;
    assert_eq!(initial["type"], "initial");
    let pong = next_text(&mut rx).await;
    assert_eq!(pong["type"], "pong");
}

#[tokio::test]
async fn state_change_replay_matches_fresh_snapshot() {
    // An observer that missed a state_change and reconnects must see
    // the same (machine_name, current_state) in its initial snapshot
    // as one that applied the broadcast.
    let repo = MemoryMachineStateRepository::new();
    let mut snapshot = snapshot_m1("waiting").remove(0);
    repo.upsert(&snapshot).await.unwrap();

    let change = BroadcastMessage::state_change("m1", "waiting", "processing", "new_job");

    // Observer A: applies the broadcast to its view.
    let mut view = std::collections::HashMap::new();
    for machine in repo.list().await.unwrap() {
        view.insert(machine.machine_name.clone(), machine.current_state.clone());
    }
    view.insert(
        change.machine_name.clone(),
        change.payload["to_state"].as_str().unwrap().to_string(),
    );

    // The engine persists the same transition; observer B reads it
    // fresh from the snapshot store.
    snapshot.current_state = "processing".to_string();
    repo.upsert(&snapshot).await.unwrap();
    let fresh: std::collections::HashMap<String, String> = repo
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|m| (m.machine_name, m.current_state))
        .collect();

    assert_eq!(view, fresh);
}
