//! Hang self-diagnosis
//!
//! The relay touches a shared heartbeat at every significant step. An
//! independent watchdog task checks its age; when it exceeds the
//! staleness bound, diagnostic state is appended to a plain file on a
//! path independent of the primary logger, so a wedged logging stack
//! cannot hide a wedged relay.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::warn;

/// Shared epoch-seconds heartbeat
#[derive(Clone, Default)]
pub struct Heartbeat {
    last_touch: Arc<AtomicI64>,
}

impl Heartbeat {
    /// Create a heartbeat touched at construction
    pub fn new() -> Self {
        let heartbeat = Self {
            last_touch: Arc::new(AtomicI64::new(0)),
        };
        heartbeat.touch();
        heartbeat
    }

    /// Record liveness now
    pub fn touch(&self) {
        self.last_touch.store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    /// Seconds since the last touch
    pub fn age_secs(&self) -> i64 {
        Utc::now().timestamp() - self.last_touch.load(Ordering::Relaxed)
    }
}

/// Counters the watchdog captures alongside staleness
#[derive(Default)]
pub struct RelayStats {
    /// Currently connected observers
    pub connections: AtomicUsize,

    /// Messages pushed into the fan-out hub since startup
    pub bridged: AtomicU64,

    /// Messages delivered to observers since startup
    pub delivered: AtomicU64,

    /// Observer connections dropped over a send budget
    pub dropped: AtomicU64,
}

/// Independent staleness monitor
pub struct Watchdog {
    heartbeat: Heartbeat,
    stats: Arc<RelayStats>,
    stale_after: Duration,
    diagnostics_path: PathBuf,
}

impl Watchdog {
    /// Create a watchdog over the given heartbeat and counters
    pub fn new(
        heartbeat: Heartbeat,
        stats: Arc<RelayStats>,
        stale_after: Duration,
        diagnostics_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            heartbeat,
            stats,
            stale_after,
            diagnostics_path: diagnostics_path.into(),
        }
    }

    /// Run the check loop forever. Escalation is diagnostic capture
    /// only, never auto-remediation.
    pub async fn run(self) {
        let check_every = (self.stale_after / 3).max(Duration::from_secs(1));
        loop {
            tokio::time::sleep(check_every).await;
            self.check_once();
        }
    }

    /// One staleness check; split out for tests
    pub fn check_once(&self) -> bool {
        let age = self.heartbeat.age_secs();
        if age <= self.stale_after.as_secs() as i64 {
            return false;
        }

        warn!(age_secs = age, "Relay heartbeat is stale");
        self.capture_diagnostics(age);
        true
    }

    fn capture_diagnostics(&self, age_secs: i64) {
        let line = format!(
            "{} STALE heartbeat_age={}s connections={} bridged={} delivered={} dropped={}\n",
            Utc::now().to_rfc3339(),
            age_secs,
            self.stats.connections.load(Ordering::Relaxed),
            self.stats.bridged.load(Ordering::Relaxed),
            self.stats.delivered.load(Ordering::Relaxed),
            self.stats.dropped.load(Ordering::Relaxed),
        );

        // Plain file append; a failure here must not take anything
        // else down with it.
        let written = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.diagnostics_path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(e) = written {
            eprintln!("watchdog: failed to write diagnostics: {} ({})", e, line.trim());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_heartbeat_is_not_stale() {
        let heartbeat = Heartbeat::new();
        let watchdog = Watchdog::new(
            heartbeat,
            Arc::new(RelayStats::default()),
            Duration::from_secs(15),
            "unused.log",
        );
        assert!(!watchdog.check_once());
    }

    #[test]
    fn stale_heartbeat_writes_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("diag.log");

        let heartbeat = Heartbeat::new();
        // Back-date the heartbeat past the bound.
        heartbeat
            .last_touch
            .store(Utc::now().timestamp() - 60, Ordering::Relaxed);

        let stats = Arc::new(RelayStats::default());
        stats.connections.store(3, Ordering::Relaxed);

        let watchdog = Watchdog::new(heartbeat, stats, Duration::from_secs(15), &path);
        assert!(watchdog.check_once());

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("STALE"));
        assert!(contents.contains("connections=3"));
    }

    #[test]
    fn touch_resets_age() {
        let heartbeat = Heartbeat::new();
        heartbeat
            .last_touch
            .store(Utc::now().timestamp() - 60, Ordering::Relaxed);
        assert!(heartbeat.age_secs() >= 60);
        heartbeat.touch();
        assert!(heartbeat.age_secs() <= 1);
    }
}
