//! Incremental Backlog Drain
//!
//! Feeds a plugin instance its queued backlog one envelope at a time,
//! yielding under [`Idler`] control so a deep backlog never starves the
//! host. At most one drain is in flight per plugin key.

use std::sync::Arc;

use dashmap::DashMap;
use periscope_types::PluginKey;

use crate::{Idler, MessageQueue, PluginInstance};

/// Drives per-key backlog drains with re-entry protection.
#[derive(Default)]
pub struct QueueProcessor {
    in_flight: DashMap<PluginKey, ()>,
}

impl QueueProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a drain is currently running for the key
    pub fn is_draining(&self, key: &PluginKey) -> bool {
        self.in_flight.contains_key(key)
    }

    /// Drain the backlog for one plugin key, dispatching to `instance`.
    ///
    /// The queue length is re-read every iteration, so envelopes appended
    /// concurrently by a session flush are picked up at the tail rather
    /// than skipped. Each envelope is removed only after its dispatch
    /// succeeds; a failed dispatch or a cancellation leaves the remainder
    /// queued for a later drain. Re-entrant calls for a key already being
    /// drained return immediately with 0.
    ///
    /// Returns the number of envelopes delivered.
    pub async fn process_queue(
        &self,
        instance: &Arc<PluginInstance>,
        key: &PluginKey,
        queue: &MessageQueue,
        idler: Option<&dyn Idler>,
    ) -> usize {
        if self.in_flight.insert(key.clone(), ()).is_some() {
            tracing::trace!(key = %key, "drain already in flight");
            return 0;
        }
        let _guard = DrainGuard {
            processor: self,
            key,
        };

        let mut processed = 0;
        loop {
            if let Some(idler) = idler {
                if idler.is_cancelled() {
                    break;
                }
                if idler.should_idle() {
                    idler.idle().await;
                    if idler.is_cancelled() {
                        break;
                    }
                }
            }

            let Some(envelope) = queue.peek_front(key) else {
                break;
            };

            match instance.dispatch(&envelope).await {
                Ok(()) => {
                    queue.ack_front(key);
                    processed += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        key = %key,
                        method = %envelope.method,
                        error = %e,
                        "backlog dispatch failed, leaving envelope queued"
                    );
                    break;
                }
            }
        }

        if processed > 0 {
            tracing::debug!(key = %key, processed, remaining = queue.len(key), "backlog drained");
        }
        processed
    }
}

struct DrainGuard<'a> {
    processor: &'a QueueProcessor,
    key: &'a PluginKey,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.processor.in_flight.remove(self.key);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Plugin, PluginContext, PluginDescriptor, PluginError, PluginResult, SteppedIdler};
    use parking_lot::Mutex;
    use periscope_types::Envelope;
    use serde_json::Value;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct CollectingPlugin {
        seen: Arc<Mutex<Vec<u64>>>,
        fail_on: Option<u64>,
        // Ask the idler to pause once this envelope has been handled, so
        // tests can park the drain at a deterministic point.
        pause_after: Option<(u64, Arc<SteppedIdler>)>,
    }

    #[async_trait::async_trait]
    impl Plugin for CollectingPlugin {
        fn descriptor(&self) -> PluginDescriptor {
            PluginDescriptor::client("collector", "Collector")
        }

        async fn on_message(
            &self,
            _ctx: &PluginContext,
            _method: &str,
            params: Value,
        ) -> PluginResult<()> {
            let i = params["i"].as_u64().unwrap_or(0);
            if self.fail_on == Some(i) {
                return Err(PluginError::Handler(format!("rejecting {i}")));
            }
            self.seen.lock().push(i);
            if let Some((after, idler)) = &self.pause_after {
                if *after == i {
                    idler.request_pause();
                }
            }
            Ok(())
        }
    }

    fn setup(plugin: CollectingPlugin) -> (Arc<PluginInstance>, PluginKey, Arc<Mutex<Vec<u64>>>) {
        let seen = Arc::clone(&plugin.seen);
        let key = PluginKey::for_app("com.example", "collector");
        let (tx, _rx) = mpsc::channel(8);
        let instance = PluginInstance::new(Arc::new(plugin), key.clone(), tx);
        (instance, key, seen)
    }

    fn envelope(i: u64) -> Envelope {
        Envelope::new("collector", "item", serde_json::json!({ "i": i }))
    }

    #[tokio::test]
    async fn test_drain_preserves_send_order() {
        let (instance, key, seen) = setup(CollectingPlugin::default());
        let queue = MessageQueue::new();
        queue.append(&key, (1..=5).map(envelope).collect(), 100);

        let processor = QueueProcessor::new();
        let processed = processor.process_queue(&instance, &key, &queue, None).await;

        assert_eq!(processed, 5);
        assert_eq!(*seen.lock(), vec![1, 2, 3, 4, 5]);
        assert!(queue.is_empty(&key));
    }

    #[tokio::test]
    async fn test_cancellation_leaves_remainder_queued() {
        let idler = Arc::new(SteppedIdler::new());
        let (instance, key, seen) = setup(CollectingPlugin {
            pause_after: Some((2, Arc::clone(&idler))),
            ..CollectingPlugin::default()
        });
        let queue = Arc::new(MessageQueue::new());
        queue.append(&key, (1..=5).map(envelope).collect(), 100);

        let processor = Arc::new(QueueProcessor::new());
        let drain = {
            let instance = Arc::clone(&instance);
            let key = key.clone();
            let queue = Arc::clone(&queue);
            let idler = Arc::clone(&idler);
            let processor = Arc::clone(&processor);
            tokio::spawn(async move {
                processor
                    .process_queue(&instance, &key, &queue, Some(idler.as_ref()))
                    .await
            })
        };

        // The drain parks at its yield point after the second envelope;
        // cancel it there.
        while seen.lock().len() < 2 {
            tokio::task::yield_now().await;
        }
        idler.cancel();

        let processed = drain.await.unwrap();
        assert_eq!(processed, 2);
        assert_eq!(queue.len(&key), 3);

        // A fresh drain delivers exactly the remainder, in original order.
        let processed = processor.process_queue(&instance, &key, &queue, None).await;
        assert_eq!(processed, 3);
        assert_eq!(*seen.lock(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_reentrant_drain_is_a_noop() {
        let (instance, key, _seen) = setup(CollectingPlugin::default());
        let queue = Arc::new(MessageQueue::new());
        queue.append(&key, (1..=3).map(envelope).collect(), 100);

        let idler = Arc::new(SteppedIdler::new());
        idler.request_pause();

        let processor = Arc::new(QueueProcessor::new());
        let parked = {
            let instance = Arc::clone(&instance);
            let key = key.clone();
            let queue = Arc::clone(&queue);
            let idler = Arc::clone(&idler);
            let processor = Arc::clone(&processor);
            tokio::spawn(async move {
                processor
                    .process_queue(&instance, &key, &queue, Some(idler.as_ref()))
                    .await
            })
        };

        // Wait until the first drain has claimed the key.
        while !processor.is_draining(&key) {
            tokio::task::yield_now().await;
        }
        let second = processor.process_queue(&instance, &key, &queue, None).await;
        assert_eq!(second, 0);

        idler.resume();
        let first = tokio::time::timeout(Duration::from_secs(1), parked)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, 3);
    }

    #[tokio::test]
    async fn test_mid_drain_appends_are_not_skipped() {
        let idler = Arc::new(SteppedIdler::new());
        let (instance, key, seen) = setup(CollectingPlugin {
            pause_after: Some((1, Arc::clone(&idler))),
            ..CollectingPlugin::default()
        });
        let queue = Arc::new(MessageQueue::new());
        queue.append(&key, (1..=2).map(envelope).collect(), 100);

        let processor = Arc::new(QueueProcessor::new());
        let drain = {
            let instance = Arc::clone(&instance);
            let key = key.clone();
            let queue = Arc::clone(&queue);
            let idler = Arc::clone(&idler);
            let processor = Arc::clone(&processor);
            tokio::spawn(async move {
                processor
                    .process_queue(&instance, &key, &queue, Some(idler.as_ref()))
                    .await
            })
        };

        // The drain parks after the first envelope; append at the tail,
        // then resume.
        while seen.lock().is_empty() {
            tokio::task::yield_now().await;
        }
        queue.append(&key, vec![envelope(3)], 100);
        idler.resume();

        let processed = tokio::time::timeout(Duration::from_secs(1), drain)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(processed, 3);
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_failed_dispatch_keeps_envelope_at_head() {
        let (instance, key, seen) = setup(CollectingPlugin {
            fail_on: Some(2),
            ..CollectingPlugin::default()
        });
        let queue = MessageQueue::new();
        queue.append(&key, (1..=3).map(envelope).collect(), 100);

        let processor = QueueProcessor::new();
        let processed = processor.process_queue(&instance, &key, &queue, None).await;

        assert_eq!(processed, 1);
        assert_eq!(*seen.lock(), vec![1]);
        // The failing envelope is still at the head for a later retry.
        assert_eq!(queue.len(&key), 2);
        assert_eq!(queue.peek_front(&key).unwrap().params["i"], 2);
    }
}
