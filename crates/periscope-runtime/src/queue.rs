//! Per-Plugin Message Backlog
//!
//! Keyed store of pending envelopes for plugins that are not currently
//! draining: `PluginKey → ordered list`. Append order is delivery order
//! (FIFO per key). Capacity is bounded; sustained overflow drops the
//! oldest entries and keeps the most recent.

use dashmap::DashMap;
use periscope_types::{Envelope, PluginKey};

/// Default backlog capacity per plugin key
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 5000;

/// Keyed FIFO backlog of undelivered envelopes.
///
/// Owned by the host store and shared by `Arc`; the session flush and the
/// [`crate::QueueProcessor`] are the only writers for any given key, never
/// concurrently.
#[derive(Default)]
pub struct MessageQueue {
    queues: DashMap<PluginKey, Vec<Envelope>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append envelopes for a key, creating the entry if absent.
    ///
    /// When the backlog exceeds `max_size` it is truncated from the front
    /// down to `ceil(0.9 * max_size) + 1` entries. Truncating to exactly
    /// `max_size` would re-trigger eviction on every subsequent append
    /// under sustained overflow.
    pub fn append(&self, key: &PluginKey, envelopes: Vec<Envelope>, max_size: usize) {
        if envelopes.is_empty() {
            return;
        }
        let mut backlog = self.queues.entry(key.clone()).or_default();
        backlog.extend(envelopes);

        if backlog.len() > max_size {
            let keep = (max_size * 9).div_ceil(10) + 1;
            let dropped = backlog.len() - keep;
            backlog.drain(..dropped);
            tracing::warn!(
                key = %key,
                dropped,
                retained = keep,
                "message backlog overflow, dropped oldest entries"
            );
        }
    }

    /// Remove a key's entry entirely.
    ///
    /// Distinct from leaving an empty list behind: callers testing "does
    /// this plugin have a pending backlog" use [`Self::has_backlog`], which
    /// reports entry presence, not length.
    pub fn clear(&self, key: &PluginKey) {
        if self.queues.remove(key).is_some() {
            tracing::debug!(key = %key, "cleared message backlog");
        }
    }

    /// Whether an entry (possibly empty) exists for the key
    pub fn has_backlog(&self, key: &PluginKey) -> bool {
        self.queues.contains_key(key)
    }

    /// Number of queued envelopes for the key (0 when absent)
    pub fn len(&self, key: &PluginKey) -> usize {
        self.queues.get(key).map(|q| q.len()).unwrap_or(0)
    }

    /// Whether no envelopes are queued for the key
    pub fn is_empty(&self, key: &PluginKey) -> bool {
        self.len(key) == 0
    }

    /// Read the head envelope without removing it
    pub fn peek_front(&self, key: &PluginKey) -> Option<Envelope> {
        self.queues.get(key).and_then(|q| q.first().cloned())
    }

    /// Remove the head envelope after it has been dispatched
    pub fn ack_front(&self, key: &PluginKey) {
        if let Some(mut backlog) = self.queues.get_mut(key) {
            if !backlog.is_empty() {
                backlog.remove(0);
            }
        }
    }

    /// All keys currently holding an entry
    pub fn keys(&self) -> Vec<PluginKey> {
        self.queues.iter().map(|e| e.key().clone()).collect()
    }

    /// Copy of the backlog for a key (empty when absent)
    pub fn snapshot(&self, key: &PluginKey) -> Vec<Envelope> {
        self.queues.get(key).map(|q| q.clone()).unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
