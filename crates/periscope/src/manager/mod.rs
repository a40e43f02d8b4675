//! Plugin Manager
//!
//! Serializes plugin lifecycle commands against the host store. Commands
//! are applied strictly in submission order by a single drain loop, even
//! though each application may itself await session- or device-scoped
//! async work; a command enqueued while a drain is in progress is picked
//! up by the same loop. One failing command is logged and acknowledged so
//! it can never wedge the queue.

mod command;

pub use command::*;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use periscope_runtime::PluginKind;

use crate::store::{HostStore, StoreEvent};
use crate::types::{Error, Result};

/// FIFO lifecycle command queue with a serial consumer
#[derive(Clone)]
pub struct PluginManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    store: HostStore,
    pending: Mutex<VecDeque<PluginCommand>>,
    draining: AtomicBool,
}

impl PluginManager {
    pub fn new(store: HostStore) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                store,
                pending: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
            }),
        }
    }

    /// Submit a command (fire-and-forget). Callers needing completion poll
    /// [`Self::is_idle`] rather than receiving a per-command callback.
    pub fn enqueue(&self, command: PluginCommand) {
        tracing::debug!(command = %command, "plugin command enqueued");
        self.inner.pending.lock().push_back(command);

        if self
            .inner
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let manager = self.clone();
            tokio::spawn(async move { manager.drain().await });
        }
    }

    /// Whether the queue is empty and no drain is running
    pub fn is_idle(&self) -> bool {
        !self.inner.draining.load(Ordering::SeqCst) && self.inner.pending.lock().is_empty()
    }

    /// Block until the queue has fully drained
    pub async fn wait_idle(&self) {
        while !self.is_idle() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    /// The serial drain loop. Snapshots the current queue contents without
    /// removing them, applies each command in order, then acknowledges
    /// exactly the number processed; commands that arrived mid-drain are
    /// observed on the next pass.
    async fn drain(&self) {
        loop {
            let batch: Vec<PluginCommand> = {
                let pending = self.inner.pending.lock();
                pending.iter().cloned().collect()
            };

            if !batch.is_empty() {
                for command in &batch {
                    if let Err(e) = self.apply(command.clone()).await {
                        tracing::error!(command = %command, error = %e, "plugin command failed");
                    }
                }
                self.inner.pending.lock().drain(..batch.len());
                continue;
            }

            // Clear the in-flight flag, then re-check: a command enqueued
            // between the last snapshot and the flag store must not be
            // stranded.
            self.inner.draining.store(false, Ordering::SeqCst);
            if self.inner.pending.lock().is_empty() {
                break;
            }
            if self
                .inner
                .draining
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                // Another drain claimed the late arrivals.
                break;
            }
        }
    }

    async fn apply(&self, command: PluginCommand) -> Result<()> {
        match command {
            PluginCommand::Switch {
                plugin_id,
                app,
                enable,
            } => self.apply_switch(&plugin_id, app.as_deref(), enable).await,
            PluginCommand::Load { plugin_id } => self.apply_load(&plugin_id).await,
            PluginCommand::Uninstall { plugin_id } => self.apply_uninstall(&plugin_id).await,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Command semantics
    // ─────────────────────────────────────────────────────────────────────

    async fn apply_switch(&self, plugin_id: &str, app: Option<&str>, enable: bool) -> Result<()> {
        let store = &self.inner.store;
        let descriptor = store
            .catalog()
            .descriptor(plugin_id)
            .ok_or_else(|| Error::NotFound(format!("plugin '{plugin_id}'")))?;

        match descriptor.kind {
            PluginKind::Client => {
                for session in store.connected_sessions() {
                    let session_app = session.query().app.clone();
                    if app.is_some_and(|app| app != session_app) {
                        continue;
                    }
                    if enable {
                        store
                            .catalog()
                            .set_enabled(plugin_id, Some(&session_app), true)?;
                        if session.instance(plugin_id).is_some() || !session.supports(plugin_id) {
                            continue;
                        }
                        let plugin = store.catalog().instantiate(plugin_id)?;
                        // A failed activation leaves this session without
                        // an instance but otherwise healthy.
                        if let Err(e) = session.enable_plugin(plugin).await {
                            tracing::error!(
                                plugin_id,
                                session_id = %session.id(),
                                error = %e,
                                "enable failed on session"
                            );
                        }
                    } else {
                        store
                            .catalog()
                            .set_enabled(plugin_id, Some(&session_app), false)?;
                        session.disable_plugin(plugin_id).await;
                    }
                }
                // Disabling without a scope also clears apps that are not
                // currently connected.
                if !enable && app.is_none() {
                    store.catalog().set_enabled(plugin_id, None, false)?;
                }
            }
            PluginKind::Device => {
                store.catalog().set_enabled(plugin_id, None, enable)?;
                for device in store.connected_devices() {
                    if enable {
                        if device.instance(plugin_id).is_some() {
                            continue;
                        }
                        let plugin = store.catalog().instantiate(plugin_id)?;
                        if let Err(e) = device.enable_plugin(plugin).await {
                            tracing::error!(
                                plugin_id,
                                serial = %device.serial(),
                                error = %e,
                                "enable failed on device"
                            );
                        }
                    } else {
                        device.disable_plugin(plugin_id).await;
                    }
                }
            }
        }

        let event = if enable {
            StoreEvent::PluginEnabled {
                plugin_id: plugin_id.to_string(),
                app: app.map(str::to_string),
            }
        } else {
            self.inner
                .store
                .clear_active_plugin(plugin_id);
            StoreEvent::PluginDisabled {
                plugin_id: plugin_id.to_string(),
                app: app.map(str::to_string),
            }
        };
        store.emit(event);
        Ok(())
    }

    /// Resolve a plugin to a runnable module, then run the enable path.
    /// Failures are surfaced as a notification, never propagated.
    async fn apply_load(&self, plugin_id: &str) -> Result<()> {
        let store = &self.inner.store;

        let result = match store.catalog().instantiate(plugin_id) {
            Ok(_) => self.apply_switch(plugin_id, None, true).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(plugin_id, error = %e, "plugin load failed");
            store.emit(StoreEvent::PluginLoadFailed {
                plugin_id: plugin_id.to_string(),
                reason: e.to_string(),
            });
        }
        Ok(())
    }

    /// Stop the plugin on every connected session and device, then mark
    /// it uninstalled in the catalog
    async fn apply_uninstall(&self, plugin_id: &str) -> Result<()> {
        let store = &self.inner.store;

        for session in store.connected_sessions() {
            session.disable_plugin(plugin_id).await;
        }
        for device in store.connected_devices() {
            device.disable_plugin(plugin_id).await;
        }

        store.catalog().mark_uninstalled(plugin_id);
        store.clear_active_plugin(plugin_id);
        store.emit(StoreEvent::PluginUninstalled {
            plugin_id: plugin_id.to_string(),
        });
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    use async_trait::async_trait;
    use periscope_runtime::{Plugin, PluginContext, PluginDescriptor, PluginResult};
    use serde_json::Value;
    use tokio::sync::mpsc;

    use crate::config::HostConfig;
    use crate::session::Session;
    use periscope_types::AppQuery;

    struct SlowPlugin {
        descriptor: PluginDescriptor,
        delay: Duration,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Plugin for SlowPlugin {
        fn descriptor(&self) -> PluginDescriptor {
            self.descriptor.clone()
        }

        async fn on_connect(&self, _ctx: &PluginContext) -> PluginResult<()> {
            self.log.lock().push(format!("{}:start", self.descriptor.id));
            tokio::time::sleep(self.delay).await;
            self.log.lock().push(format!("{}:done", self.descriptor.id));
            Ok(())
        }

        async fn on_message(
            &self,
            _ctx: &PluginContext,
            _method: &str,
            _params: Value,
        ) -> PluginResult<()> {
            Ok(())
        }
    }

    fn register_slow(
        store: &HostStore,
        plugin_id: &str,
        delay: Duration,
        log: &Arc<Mutex<Vec<String>>>,
    ) {
        let descriptor = PluginDescriptor::client(plugin_id, plugin_id).background(true);
        let log = Arc::clone(log);
        let id = plugin_id.to_string();
        store.catalog().register(
            descriptor,
            Arc::new(move || {
                Arc::new(SlowPlugin {
                    descriptor: PluginDescriptor::client(&id, &id).background(true),
                    delay,
                    log: Arc::clone(&log),
                }) as Arc<dyn Plugin>
            }),
        );
    }

    fn setup() -> (HostStore, PluginManager, Session) {
        let store = HostStore::new(HostConfig::default());
        let manager = PluginManager::new(store.clone());
        let (tx, _rx) = mpsc::channel(64);
        let session = store.register_session(
            AppQuery {
                app: "com.shop".into(),
                os: "android".into(),
                device: "Pixel 8".into(),
                device_id: "SER-1".into(),
                sdk_version: 4,
            },
            HashSet::new(),
            tx,
        );
        (store, manager, session)
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_apply_strictly_in_order() {
        let (store, manager, session) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        register_slow(&store, "alpha", Duration::from_millis(250), &log);
        register_slow(&store, "beta", Duration::ZERO, &log);

        manager.enqueue(PluginCommand::Switch {
            plugin_id: "alpha".into(),
            app: None,
            enable: true,
        });
        manager.enqueue(PluginCommand::Switch {
            plugin_id: "beta".into(),
            app: None,
            enable: true,
        });
        manager.wait_idle().await;

        // Alpha's full side effects complete before beta's begin, even
        // though alpha's application awaited.
        assert_eq!(
            *log.lock(),
            vec!["alpha:start", "alpha:done", "beta:start", "beta:done"]
        );
        assert!(session.instance("alpha").is_some());
        assert!(session.instance("beta").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mid_drain_enqueue_is_observed_by_same_loop() {
        let (store, manager, session) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        register_slow(&store, "alpha", Duration::from_millis(250), &log);
        register_slow(&store, "beta", Duration::ZERO, &log);

        manager.enqueue(PluginCommand::Switch {
            plugin_id: "alpha".into(),
            app: None,
            enable: true,
        });
        // Arrives while alpha's application is awaiting.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!manager.is_idle());
        manager.enqueue(PluginCommand::Switch {
            plugin_id: "beta".into(),
            app: None,
            enable: true,
        });

        manager.wait_idle().await;
        assert!(session.instance("alpha").is_some());
        assert!(session.instance("beta").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_clears_session_state() {
        let (store, manager, session) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        register_slow(&store, "alpha", Duration::ZERO, &log);

        manager.enqueue(PluginCommand::Switch {
            plugin_id: "alpha".into(),
            app: Some("com.shop".into()),
            enable: true,
        });
        manager.wait_idle().await;
        let instance = session.instance("alpha").unwrap();
        let key = instance.key().clone();
        assert!(store.catalog().is_enabled("alpha", Some("com.shop")));

        manager.enqueue(PluginCommand::Switch {
            plugin_id: "alpha".into(),
            app: Some("com.shop".into()),
            enable: false,
        });
        manager.wait_idle().await;

        assert!(session.instance("alpha").is_none());
        assert!(!store.catalog().is_enabled("alpha", Some("com.shop")));
        assert!(!store.queue().has_backlog(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_failure_is_a_notification_not_a_wedge() {
        let (store, manager, session) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        register_slow(&store, "alpha", Duration::ZERO, &log);
        let mut events = store.subscribe_events();

        manager.enqueue(PluginCommand::Load {
            plugin_id: "missing".into(),
        });
        manager.enqueue(PluginCommand::Switch {
            plugin_id: "alpha".into(),
            app: None,
            enable: true,
        });
        manager.wait_idle().await;

        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, StoreEvent::PluginLoadFailed { plugin_id, .. } if plugin_id == "missing")
            {
                saw_failure = true;
            }
        }
        assert!(saw_failure);
        // The bad command did not stall the queue.
        assert!(session.instance("alpha").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_uninstall_stops_plugin_everywhere() {
        let (store, manager, session) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        register_slow(&store, "alpha", Duration::ZERO, &log);

        manager.enqueue(PluginCommand::Load {
            plugin_id: "alpha".into(),
        });
        manager.wait_idle().await;
        assert!(session.instance("alpha").is_some());

        manager.enqueue(PluginCommand::Uninstall {
            plugin_id: "alpha".into(),
        });
        manager.wait_idle().await;

        assert!(session.instance("alpha").is_none());
        assert!(!store.catalog().is_installed("alpha"));
        assert!(store.catalog().instantiate("alpha").is_err());
    }
}
