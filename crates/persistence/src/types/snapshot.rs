//! Persisted, ordered result sets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::key::ResourceKey;

/// A named, ordered list of version keys.
///
/// Snapshots let a caller page through a result set that was computed once,
/// even while newer versions are being written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Snapshot id.
    pub id: String,
    /// Version keys in result order.
    pub keys: Vec<ResourceKey>,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
    /// Number of matches the result set had when taken.
    pub match_count: usize,
}

impl Snapshot {
    /// Creates a snapshot with a fresh id.
    pub fn new(keys: Vec<ResourceKey>) -> Self {
        let match_count = keys.len();
        Self {
            id: Uuid::new_v4().to_string(),
            keys,
            created_at: Utc::now(),
            match_count,
        }
    }

    /// Overrides the match count (e.g. when `keys` was truncated).
    pub fn with_match_count(mut self, match_count: usize) -> Self {
        self.match_count = match_count;
        self
    }

    /// Returns `count` keys starting at `offset`.
    pub fn page(&self, offset: usize, count: usize) -> &[ResourceKey] {
        let start = offset.min(self.keys.len());
        let end = start.saturating_add(count).min(self.keys.len());
        &self.keys[start..end]
    }
}
