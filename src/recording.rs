// src/recording.rs

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::error::{GatewayError, Result};

/// One captured request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficRecord {
    pub timestamp: DateTime<Utc>,

    /// Client key the limiter saw
    pub key: String,

    /// `"METHOD /path"`
    pub endpoint: String,
}

impl TrafficRecord {
    /// Reads a JSON array of records, as written by [`TrafficRecorder::export_json`]
    pub fn load_json<R: Read>(reader: R) -> Result<Vec<TrafficRecord>> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn load_file(path: &Path) -> Result<Vec<TrafficRecord>> {
        let file = std::fs::File::open(path)?;
        Self::load_json(std::io::BufReader::new(file))
    }
}

/// Append-only buffer with a fixed capacity
#[derive(Debug)]
pub struct TrafficRecorder {
    records: Mutex<Vec<TrafficRecord>>,
    capacity: usize,
}

impl TrafficRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Appends `record`, failing once the buffer holds `capacity` entries
    pub fn record(&self, record: TrafficRecord) -> Result<()> {
        let mut records = self.records.lock();
        if records.len() >= self.capacity {
            return Err(GatewayError::Recording(format!(
                "recorder is full ({} records)",
                self.capacity
            )));
        }
        records.push(record);
        Ok(())
    }

    pub fn records(&self) -> Vec<TrafficRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn export_json<W: Write>(&self, writer: W) -> Result<()> {
        let snapshot = self.records();
        serde_json::to_writer(writer, &snapshot)?;
        Ok(())
    }
}

#[derive(Debug)]
struct Active {
    enabled: bool,
    recorder: Arc<TrafficRecorder>,
}

/// Toggleable recorder shared by every request handler.
///
/// The enabled flag and the active buffer sit behind one lock, so a record
/// can never land in a buffer that a concurrent `stop` already handed out.
#[derive(Debug)]
pub struct RecordingState {
    active: RwLock<Active>,
    capacity: usize,
}

impl RecordingState {
    pub fn new(capacity: usize, enabled: bool) -> Self {
        Self {
            active: RwLock::new(Active {
                enabled,
                recorder: Arc::new(TrafficRecorder::new(capacity)),
            }),
            capacity,
        }
    }

    /// Discards the previous buffer and starts recording into a fresh one
    pub fn start(&self) {
        let mut active = self.active.write();
        active.recorder = Arc::new(TrafficRecorder::new(self.capacity));
        active.enabled = true;
        info!("traffic recording started");
    }

    /// Stops recording and returns what was captured since the last start.
    /// The buffer stays exportable until the next start.
    pub fn stop(&self) -> Vec<TrafficRecord> {
        let mut active = self.active.write();
        active.enabled = false;
        let records = active.recorder.records();
        info!(count = records.len(), "traffic recording stopped");
        records
    }

    pub fn is_enabled(&self) -> bool {
        self.active.read().enabled
    }

    /// No-op while disabled
    pub fn record(&self, record: TrafficRecord) -> Result<()> {
        let active = self.active.read();
        if !active.enabled {
            return Ok(());
        }
        active.recorder.record(record)
    }

    fn recorder(&self) -> Arc<TrafficRecorder> {
        self.active.read().recorder.clone()
    }

    /// Writes the current buffer, whether or not recording is on
    pub fn export_json<W: Write>(&self, writer: W) -> Result<()> {
        self.recorder().export_json(writer)
    }

    pub fn records(&self) -> Vec<TrafficRecord> {
        self.recorder().records()
    }

    pub fn len(&self) -> usize {
        self.recorder().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::record;

    #[test]
    fn test_disabled_state_ignores_records() {
        let state = RecordingState::new(10, false);
        state.record(record(0, "k1", "GET /api/profile")).unwrap();
        assert!(state.is_empty());
        assert!(!state.is_enabled());
    }

    #[test]
    fn test_start_stop_lifecycle() {
        let state = RecordingState::new(10, true);
        state.record(record(0, "stale", "GET /api/profile")).unwrap();

        state.start();
        assert_eq!(state.len(), 0, "start discards the previous buffer");

        state.record(record(1, "k1", "GET /api/profile")).unwrap();
        state.record(record(2, "k2", "POST /api/orders")).unwrap();
        assert_eq!(state.len(), 2);

        let stopped = state.stop();
        assert_eq!(stopped.len(), 2);
        assert_eq!(stopped[1].endpoint, "POST /api/orders");

        state.record(record(3, "k1", "GET /api/profile")).unwrap();
        assert_eq!(state.len(), 2, "records after stop are dropped");
        assert_eq!(state.records(), stopped, "stopped buffer is still exportable");
    }

    #[test]
    fn test_full_recorder_rejects_entries() {
        let state = RecordingState::new(1, true);
        state.record(record(0, "k1", "GET /a")).unwrap();

        let err = state.record(record(1, "k1", "GET /a")).unwrap_err();
        assert!(matches!(err, GatewayError::Recording(_)));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_export_and_load_json() {
        let state = RecordingState::new(10, true);
        state.record(record(5, "k1", "GET /api/profile")).unwrap();

        let mut buffer = Vec::new();
        state.export_json(&mut buffer).unwrap();
        let exported: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(exported[0]["timestamp"], "2026-02-08T10:00:05Z");
        assert_eq!(exported[0]["endpoint"], "GET /api/profile");

        let loaded = TrafficRecord::load_json(buffer.as_slice()).unwrap();
        assert_eq!(loaded, state.records());

        assert!(TrafficRecord::load_json(&b"{not json"[..]).is_err());
    }

    #[tokio::test]
    async fn test_concurrent_records_are_all_kept() {
        let state = Arc::new(RecordingState::new(1_000, true));

        let writers = (0..8).map(|worker| {
            let state = state.clone();
            tokio::spawn(async move {
                for i in 0..25 {
                    state
                        .record(record(i, &format!("worker-{}", worker), "GET /api/profile"))
                        .unwrap();
                }
            })
        });
        for writer in futures::future::join_all(writers).await {
            writer.unwrap();
        }

        assert_eq!(state.stop().len(), 200);
    }
}
