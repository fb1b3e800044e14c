// src/replay/state.rs

use parking_lot::RwLock;

use crate::replay::Summary;

/// Most recent replay summary.
///
/// Summaries are cloned on the way in and on the way out, so neither the
/// caller that stored one nor any reader can change the cached copy.
#[derive(Debug, Default)]
pub struct ReplayState {
    last: RwLock<Option<Summary>>,
}

impl ReplayState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, summary: &Summary) {
        *self.last.write() = Some(summary.clone());
    }

    /// `None` until the first replay finishes
    pub fn get(&self) -> Option<Summary> {
        self.last.read().clone()
    }
}
