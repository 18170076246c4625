// One-shot duplicate suppression for hub deliveries.
//
// The hub tends to push a freshly published video twice in quick succession
// (once on publish, again when processing settles). When a notification's
// `updated` is within five minutes of `published`, its video id is recorded
// as pending; the next delivery of that id is swallowed and the id is
// forgotten. Ids that never repeat stay in the list.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// Notifications updated less than this long after publishing count as fresh.
pub const FRESHNESS_WINDOW_MS: i64 = 300_000;

/// Tracks fresh notification ids awaiting their redelivery.
#[derive(Debug, Default)]
pub struct DedupTracker {
    pending: Mutex<Vec<String>>,
}

impl DedupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether this delivery is a repeat that should be dropped.
    ///
    /// The membership check and the insert/remove happen under one lock, so
    /// two concurrent deliveries of the same id can't both pass as new.
    pub fn should_suppress(
        &self,
        id: &str,
        published: DateTime<Utc>,
        updated: DateTime<Utc>,
    ) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(pos) = pending.iter().position(|p| p == id) {
            pending.remove(pos);
            return true;
        }

        if (updated - published).num_milliseconds() < FRESHNESS_WINDOW_MS {
            pending.push(id.to_string());
        }
        false
    }

    /// Whether `id` is currently waiting for its redelivery.
    pub fn is_pending(&self, id: &str) -> bool {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.iter().any(|p| p == id)
    }

    /// Number of ids currently recorded.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
