//! Relay server implementation
//!
//! Bridges the UDP broadcast channel (and, when it goes quiet, the
//! persisted realtime buffer) into an in-process fan-out hub, and
//! serves observer WebSocket connections off that hub.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use futures::StreamExt;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{info, warn};

use weft_core::{BroadcastMessage, MachineStateRepository, RealtimeEventRepository};
use weft_transport::BroadcastReceiver;

use crate::config::RelayConfig;
use crate::connection::{relay_connection, ObserverSettings};
use crate::error::RelayResult;
use crate::watchdog::{Heartbeat, RelayStats, Watchdog};

/// Bound for one bridge poll of the UDP socket
const BRIDGE_POLL: Duration = Duration::from_millis(250);

/// How many fallback rows one drain moves
const FALLBACK_BATCH: u32 = 100;

/// Shared state behind the HTTP handlers and background duties
pub struct AppState {
    /// Fan-out hub feeding every observer
    pub hub: broadcast::Sender<BroadcastMessage>,

    /// Snapshot cache read for `initial` messages
    pub machine_state: Arc<dyn MachineStateRepository>,

    /// Fallback source when the broadcast channel is quiet
    pub realtime_events: Arc<dyn RealtimeEventRepository>,

    /// Liveness heartbeat
    pub heartbeat: Heartbeat,

    /// Counters for the watchdog and health endpoint
    pub stats: Arc<RelayStats>,

    /// Per-observer loop settings
    pub observer_settings: ObserverSettings,

    /// Quiet window before the fallback poller runs
    pub quiet_window: Duration,

    /// Staleness bound reported by the health endpoint
    pub stale_after: Duration,
}

/// The relay server
pub struct RelayServer {
    config: RelayConfig,
    state: Arc<AppState>,
}

impl RelayServer {
    /// Create a relay server over the given stores
    pub fn new(
        config: RelayConfig,
        machine_state: Arc<dyn MachineStateRepository>,
        realtime_events: Arc<dyn RealtimeEventRepository>,
    ) -> Self {
        let (hub, _) = broadcast::channel(1024);
        let state = Arc::new(AppState {
            hub,
            machine_state,
            realtime_events,
            heartbeat: Heartbeat::new(),
            stats: Arc::new(RelayStats::default()),
            observer_settings: ObserverSettings {
                send_timeout: Duration::from_millis(config.send_timeout_ms),
                ping_interval: Duration::from_secs(config.ping_interval_secs),
            },
            quiet_window: Duration::from_millis(config.quiet_window_ms),
            stale_after: Duration::from_secs(config.watchdog_stale_secs),
        });
        Self { config, state }
    }

    /// The fan-out hub, for tests and embedding
    pub fn hub(&self) -> broadcast::Sender<BroadcastMessage> {
        self.state.hub.clone()
    }

    /// Bind the configured address and run until cancelled
    pub async fn run(self) -> RelayResult<()> {
        let address = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&address).await?;
        info!(%address, "Relay server listening");
        self.run_on(listener).await
    }

    /// Run on an already-bound listener
    pub async fn run_on(self, listener: TcpListener) -> RelayResult<()> {
        let receiver = BroadcastReceiver::bind(self.config.broadcast_port).await?;
        info!(port = receiver.port(), "Bridging broadcast channel");

        tokio::spawn(bridge_broadcasts(receiver, self.state.clone()));

        let watchdog = Watchdog::new(
            self.state.heartbeat.clone(),
            self.state.stats.clone(),
            self.state.stale_after,
            self.config.diagnostics_path.clone(),
        );
        tokio::spawn(watchdog.run());

        let app = router(self.state.clone());
        axum::serve(listener, app)
            .await
            .map_err(|e| crate::error::RelayError::InternalError(e.to_string()))?;
        Ok(())
    }
}

/// Build the HTTP router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Bridge UDP broadcast traffic into the hub; when the channel is
/// quiet, drain the persisted fallback buffer instead.
pub async fn bridge_broadcasts(receiver: BroadcastReceiver, state: Arc<AppState>) {
    let mut last_traffic = Instant::now();
    loop {
        match receiver.recv_timeout(BRIDGE_POLL).await {
            Ok(Some(message)) => {
                state.heartbeat.touch();
                last_traffic = Instant::now();
                state.stats.bridged.fetch_add(1, Ordering::Relaxed);
                // A send error only means no observer is connected.
                let _ = state.hub.send(message);
            }
            Ok(None) => {
                state.heartbeat.touch();
                tokio::task::yield_now().await;
                if last_traffic.elapsed() >= state.quiet_window {
                    drain_fallback(&state).await;
                    last_traffic = Instant::now();
                }
            }
            Err(e) => {
                warn!(error = %e, "Broadcast bridge receive failed");
                tokio::time::sleep(BRIDGE_POLL).await;
            }
        }
    }
}

/// Move unconsumed realtime rows into the hub
async fn drain_fallback(state: &Arc<AppState>) {
    let rows = match state.realtime_events.fetch_unconsumed(FALLBACK_BATCH).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!(error = %e, "Fallback fetch failed");
            return;
        }
    };
    if rows.is_empty() {
        return;
    }

    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    for row in &rows {
        state.stats.bridged.fetch_add(1, Ordering::Relaxed);
        let _ = state.hub.send(row.to_broadcast());
    }
    if let Err(e) = state.realtime_events.mark_consumed(&ids).await {
        warn!(error = %e, "Failed to mark fallback rows consumed");
    }
    state.heartbeat.touch();
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let age = state.heartbeat.age_secs();
    let status = if age <= state.stale_after.as_secs() as i64 {
        "ok"
    } else {
        "stale"
    };
    Json(json!({
        "status": status,
        "heartbeat_age_secs": age,
        "connections": state.stats.connections.load(Ordering::Relaxed),
        "bridged": state.stats.bridged.load(Ordering::Relaxed),
        "delivered": state.stats.delivered.load(Ordering::Relaxed),
        "dropped": state.stats.dropped.load(Ordering::Relaxed),
    }))
}

async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let snapshot = match state.machine_state.list().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // Degrade to an empty snapshot rather than refusing
                // the observer.
                warn!(error = %e, "Snapshot read failed for new observer");
                Vec::new()
            }
        };
        let (tx, rx) = socket.split();
        relay_connection(
            tx,
            rx,
            state.hub.subscribe(),
            snapshot,
            state.observer_settings.clone(),
            state.stats.clone(),
            state.heartbeat.clone(),
        )
        .await;
    })
}
