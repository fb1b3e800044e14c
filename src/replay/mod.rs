// src/replay/mod.rs

//! Deterministic re-execution of captured traffic.
//!
//! Records are sorted by timestamp and fed to a fresh limiter whose clock is a
//! [`VirtualClock`] moved to each record's timestamp before its check. The
//! live limiters are never touched.
//!
//! Cancellation: a run stops issuing checks as soon as its `cancel` receiver
//! reads `true` and returns [`GatewayError::ReplayCancelled`]; no partial
//! summary is produced.

pub mod request;
pub mod state;

pub use request::ReplayRequest;
pub use state::ReplayState;

use chrono::{DateTime, Utc};
use prettytable::{row, Table};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::algorithms::build_limiter;
use crate::clock::VirtualClock;
use crate::config::{LimiterSettings, MemoryStoreConfig};
use crate::error::{GatewayError, Result};
use crate::recording::TrafficRecord;

/// Limiter and filters to replay with
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayOptions {
    pub settings: LimiterSettings,

    /// Playback speed multiplier; 0 replays without pauses
    pub speed: f64,

    /// Only replay these client keys; empty means all
    pub keys: Vec<String>,

    /// Only replay these endpoints; empty means all
    pub endpoints: Vec<String>,
}

impl ReplayOptions {
    pub fn new(settings: LimiterSettings) -> Self {
        Self {
            settings,
            speed: 0.0,
            keys: Vec::new(),
            endpoints: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.settings.validate()?;
        if !self.speed.is_finite() || self.speed < 0.0 {
            return Err(GatewayError::ReplayInput(format!(
                "speed must be >= 0, got {}",
                self.speed
            )));
        }
        Ok(())
    }

    fn matches(&self, record: &TrafficRecord) -> bool {
        (self.keys.is_empty() || self.keys.iter().any(|k| *k == record.key))
            && (self.endpoints.is_empty() || self.endpoints.iter().any(|e| *e == record.endpoint))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySummary {
    pub allowed: usize,
    pub denied: usize,
}

/// Outcome of one replay run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Records supplied, before filtering
    pub total_records: usize,
    pub replayed: usize,
    pub allowed: usize,
    pub denied: usize,
    pub per_key: BTreeMap<String, KeySummary>,
}

impl Summary {
    fn tally(&mut self, key: &str, allowed: bool) {
        self.replayed += 1;
        let entry = self.per_key.entry(key.to_string()).or_default();
        if allowed {
            self.allowed += 1;
            entry.allowed += 1;
        } else {
            self.denied += 1;
            entry.denied += 1;
        }
    }

    /// Per-key counts as a table, keys in order
    pub fn table(&self) -> Table {
        let mut table = Table::new();
        table.set_titles(row!["Key", "Allowed", "Denied"]);
        for (key, counts) in &self.per_key {
            table.add_row(row![key, counts.allowed, counts.denied]);
        }
        table
    }
}

/// A receiver that never reports cancellation
pub fn no_cancel() -> watch::Receiver<bool> {
    watch::channel(false).1
}

// Replay stores live only as long as one run
fn replay_store() -> MemoryStoreConfig {
    MemoryStoreConfig {
        max_entries: usize::MAX,
        use_background_task: false,
        ..Default::default()
    }
}

/// Replays `records` through a limiter built from `options`
pub async fn run(
    records: Vec<TrafficRecord>,
    options: &ReplayOptions,
    mut cancel: watch::Receiver<bool>,
) -> Result<Summary> {
    if records.is_empty() {
        return Err(GatewayError::ReplayInput("no records provided".to_string()));
    }
    options.validate()?;

    let total = records.len();
    let mut sorted = records;
    sorted.sort_by_key(|record| record.timestamp);

    let start = sorted[0].timestamp;
    let clock = Arc::new(VirtualClock::new(start));
    let limiter = build_limiter(&options.settings, &replay_store(), clock.clone())?;
    info!(
        total,
        algorithm = limiter.name(),
        speed = options.speed,
        "replay started"
    );

    let mut summary = Summary {
        total_records: total,
        ..Default::default()
    };
    let cancelled = |summary: &Summary| GatewayError::ReplayCancelled {
        replayed: summary.replayed,
        total,
    };

    // Pacing starts at the first record that passes the filters
    let mut previous: Option<DateTime<Utc>> = None;
    for record in sorted.iter().filter(|record| options.matches(record)) {
        if *cancel.borrow() {
            return Err(cancelled(&summary));
        }
        if let Some(previous) = previous.filter(|_| options.speed > 0.0) {
            let gap = (record.timestamp - previous).to_std().unwrap_or_default();
            if !gap.is_zero() && pace(scaled(gap, options.speed), &mut cancel).await {
                return Err(cancelled(&summary));
            }
        }

        let at = clock.advance_to(record.timestamp);
        let decision = limiter.check(&record.key).await?;
        debug!(key = %record.key, at = %at, allowed = decision.allowed, "replayed record");
        summary.tally(&record.key, decision.allowed);
        previous = Some(at);
    }

    info!(
        replayed = summary.replayed,
        allowed = summary.allowed,
        denied = summary.denied,
        "replay finished"
    );
    Ok(summary)
}

/// Loads a JSON export from `path` and replays it
pub async fn run_file(
    path: &Path,
    options: &ReplayOptions,
    cancel: watch::Receiver<bool>,
) -> Result<Summary> {
    let records = TrafficRecord::load_file(path)?;
    run(records, options, cancel).await
}

fn scaled(gap: Duration, speed: f64) -> Duration {
    Duration::try_from_secs_f64(gap.as_secs_f64() / speed).unwrap_or(Duration::MAX)
}

/// Sleeps for `delay`; returns true when cancelled first
async fn pace(delay: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return *cancel.borrow(),
            changed = cancel.changed() => match changed {
                Ok(()) if *cancel.borrow() => return true,
                Ok(()) => continue,
                // Sender gone: nobody can cancel any more
                Err(_) => {
                    (&mut sleep).await;
                    return false;
                }
            },
        }
    }
}
