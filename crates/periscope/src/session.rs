//! Client Session
//!
//! Represents one connected remote application instance. The session owns
//! the routing decision for every inbound envelope: synchronous broadcast
//! subscribers run first, then the envelope is accumulated in the message
//! buffer and flushed (debounced) into the shared per-plugin backlog,
//! where the queue processor drains it to active plugin instances.
//!
//! The session object and its plugin instances survive a disconnect, so
//! in-memory plugin state is preserved until an explicit destroy.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use uuid::Uuid;
use wildmatch::WildMatch;

use periscope_runtime::{
    Debouncer, MessageQueue, Plugin, PluginInstance, QueueProcessor, TimeBudgetIdler,
};
use periscope_types::{AppQuery, ConnectionState, DeviceIdentity, Envelope, PluginKey, plugin_key};

use crate::config::HostConfig;
use crate::types::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Message Buffer
// ─────────────────────────────────────────────────────────────────────────────

/// Accumulated messages for one plugin key, created lazily on the first
/// buffered message and cleared wholesale on flush
struct BufferEntry {
    instance: Arc<PluginInstance>,
    messages: Vec<Envelope>,
}

/// A registered broadcast subscription
struct Subscription {
    api: String,
    method: WildMatch,
    callback: Arc<dyn Fn(&Envelope) + Send + Sync>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// One connected remote application instance
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: Uuid,
    query: AppQuery,
    state: AtomicU8,

    /// Plugin ids the remote app announced support for; empty means
    /// unrestricted
    supported_plugins: RwLock<HashSet<String>>,

    /// Started plugin instances by plugin id
    instances: DashMap<String, Arc<PluginInstance>>,

    /// Buffered-but-unflushed messages by plugin key
    buffer: Mutex<HashMap<PluginKey, BufferEntry>>,

    subscriptions: RwLock<Vec<Subscription>>,

    queue: Arc<MessageQueue>,
    processor: Arc<QueueProcessor>,
    outbound: mpsc::Sender<Envelope>,

    max_queue_size: usize,
    idle_budget: Duration,

    /// Set once at construction; wired with a weak reference back to this
    /// session so the timer task cannot keep the session alive
    debouncer: OnceLock<Debouncer>,
}

impl Session {
    /// Create a session for a completed connection handshake
    pub fn new(
        query: AppQuery,
        supported_plugins: HashSet<String>,
        config: &HostConfig,
        queue: Arc<MessageQueue>,
        processor: Arc<QueueProcessor>,
        outbound: mpsc::Sender<Envelope>,
    ) -> Self {
        let session = Self {
            inner: Arc::new(SessionInner {
                id: Uuid::new_v4(),
                query,
                state: AtomicU8::new(ConnectionState::Connected as u8),
                supported_plugins: RwLock::new(supported_plugins),
                instances: DashMap::new(),
                buffer: Mutex::new(HashMap::new()),
                subscriptions: RwLock::new(Vec::new()),
                queue,
                processor,
                outbound,
                max_queue_size: config.max_queue_size,
                idle_budget: config.idle_budget(),
                debouncer: OnceLock::new(),
            }),
        };

        let weak = Arc::downgrade(&session.inner);
        let debouncer = Debouncer::new(config.debounce(), move || {
            if let Some(inner) = weak.upgrade() {
                Session { inner }.flush_buffer();
            }
        });
        let _ = session.inner.debouncer.set(debouncer);

        session
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn query(&self) -> &AppQuery {
        &self.inner.query
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Replace the set of plugin ids the remote app supports
    pub fn set_supported_plugins(&self, plugins: HashSet<String>) {
        *self.inner.supported_plugins.write() = plugins;
    }

    /// Whether the remote app supports the given plugin id
    pub fn supports(&self, plugin_id: &str) -> bool {
        let supported = self.inner.supported_plugins.read();
        supported.is_empty() || supported.contains(plugin_id)
    }

    pub fn supported_plugins(&self) -> HashSet<String> {
        self.inner.supported_plugins.read().clone()
    }

    /// The key addressing (this session, plugin) in queues and registries
    pub fn key_for(&self, plugin_id: &str) -> PluginKey {
        let query = &self.inner.query;
        let device = DeviceIdentity::new(&query.os, &query.device, &query.device_id);
        plugin_key(Some(&query.app), Some(&device), plugin_id)
    }

    /// The started instance for a plugin id, if any
    pub fn instance(&self, plugin_id: &str) -> Option<Arc<PluginInstance>> {
        self.inner
            .instances
            .get(plugin_id)
            .map(|e| Arc::clone(e.value()))
    }

    /// Ids of all started plugin instances
    pub fn plugin_ids(&self) -> Vec<String> {
        self.inner
            .instances
            .iter()
            .map(|e| e.key().clone())
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Inbound routing
    // ─────────────────────────────────────────────────────────────────────

    /// Register a broadcast subscription for (api, method pattern).
    ///
    /// Matching envelopes invoke the callback synchronously on receipt, in
    /// addition to (not instead of) the buffered delivery path; this
    /// exists for cross-plugin notifications that must not wait for a
    /// debounce window. Method patterns support `*` wildcards.
    pub fn subscribe(
        &self,
        api: impl Into<String>,
        method: &str,
        callback: impl Fn(&Envelope) + Send + Sync + 'static,
    ) {
        self.inner.subscriptions.write().push(Subscription {
            api: api.into(),
            method: WildMatch::new(method),
            callback: Arc::new(callback),
        });
    }

    /// Route one parsed inbound envelope.
    ///
    /// Broadcast subscribers run first. The envelope is then appended to
    /// the message buffer under its plugin key (creating the entry with
    /// the current instance captured) and a debounced flush is scheduled;
    /// all delivery goes through this same path to guarantee per-key
    /// ordering. Envelopes for an unsupported plugin are rejected;
    /// envelopes for a supported-but-disabled plugin are dropped.
    pub fn receive(&self, envelope: Envelope) -> Result<()> {
        self.notify_subscribers(&envelope);

        let Some(instance) = self.instance(&envelope.api) else {
            if self.supports(&envelope.api) {
                tracing::trace!(
                    session_id = %self.inner.id,
                    api = %envelope.api,
                    method = %envelope.method,
                    "dropping message for disabled plugin"
                );
                return Ok(());
            }
            return Err(Error::UnsupportedPlugin(envelope.api));
        };

        {
            let mut buffer = self.inner.buffer.lock();
            let entry = buffer
                .entry(instance.key().clone())
                .or_insert_with(|| BufferEntry {
                    instance: Arc::clone(&instance),
                    messages: Vec::new(),
                });
            entry.messages.push(envelope);
        }

        if let Some(debouncer) = self.inner.debouncer.get() {
            debouncer.schedule();
        }
        Ok(())
    }

    fn notify_subscribers(&self, envelope: &Envelope) {
        let subscriptions = self.inner.subscriptions.read();
        for subscription in subscriptions.iter() {
            if subscription.api == envelope.api && subscription.method.matches(&envelope.method) {
                (subscription.callback)(envelope);
            }
        }
    }

    /// Move every buffered entry into the shared backlog and kick a drain
    /// for each active instance. All-or-nothing per call: the buffer is
    /// taken wholesale, so no key's backlog is silently dropped.
    fn flush_buffer(&self) {
        let drained: Vec<(PluginKey, BufferEntry)> = {
            let mut buffer = self.inner.buffer.lock();
            buffer.drain().collect()
        };

        for (key, entry) in drained {
            let count = entry.messages.len();
            self.inner
                .queue
                .append(&key, entry.messages, self.inner.max_queue_size);
            tracing::trace!(session_id = %self.inner.id, key = %key, count, "session buffer flushed");

            if entry.instance.is_active() {
                self.spawn_drain(entry.instance);
            }
        }
    }

    fn spawn_drain(&self, instance: Arc<PluginInstance>) {
        let processor = Arc::clone(&self.inner.processor);
        let queue = Arc::clone(&self.inner.queue);
        let idle_budget = self.inner.idle_budget;
        tokio::spawn(async move {
            let idler = TimeBudgetIdler::new(idle_budget);
            let key = instance.key().clone();
            processor
                .process_queue(&instance, &key, &queue, Some(&idler))
                .await;
        });
    }

    async fn drain_backlog(&self, instance: &Arc<PluginInstance>) -> usize {
        let idler = TimeBudgetIdler::new(self.inner.idle_budget);
        self.inner
            .processor
            .process_queue(instance, instance.key(), &self.inner.queue, Some(&idler))
            .await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Plugin lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Start a plugin instance on this session.
    ///
    /// Background-eligible plugins activate immediately and drain any
    /// existing backlog; others stay inactive until the user selects them.
    /// An activation failure is logged and leaves no instance behind.
    pub async fn enable_plugin(&self, plugin: Arc<dyn Plugin>) -> Result<Arc<PluginInstance>> {
        let descriptor = plugin.descriptor();
        let key = self.key_for(&descriptor.id);
        let instance = PluginInstance::new(plugin, key, self.inner.outbound.clone());

        if descriptor.background {
            if let Err(e) = instance.activate().await {
                tracing::error!(
                    session_id = %self.inner.id,
                    plugin_id = %descriptor.id,
                    error = %e,
                    "plugin activation failed"
                );
                return Err(e.into());
            }
        }

        self.inner
            .instances
            .insert(descriptor.id.clone(), Arc::clone(&instance));
        tracing::info!(
            session_id = %self.inner.id,
            plugin_id = %descriptor.id,
            background = descriptor.background,
            "plugin enabled"
        );

        if instance.is_active() {
            self.drain_backlog(&instance).await;
        }
        Ok(instance)
    }

    /// Activate a started instance (user selected the plugin) and drain
    /// its backlog. Returns the number of backlog envelopes delivered.
    pub async fn activate_plugin(&self, plugin_id: &str) -> Result<usize> {
        let instance = self
            .instance(plugin_id)
            .ok_or_else(|| Error::NotFound(format!("plugin '{plugin_id}' not started")))?;

        if let Err(e) = instance.activate().await {
            tracing::error!(
                session_id = %self.inner.id,
                plugin_id,
                error = %e,
                "plugin activation failed"
            );
            self.inner.instances.remove(plugin_id);
            return Err(e.into());
        }
        Ok(self.drain_backlog(&instance).await)
    }

    /// Deactivate a started instance (user navigated away)
    pub async fn deactivate_plugin(&self, plugin_id: &str) {
        if let Some(instance) = self.instance(plugin_id) {
            instance.deactivate().await;
        }
    }

    /// Stop a plugin on this session: the instance is destroyed and both
    /// its buffered-but-unflushed messages and its queued backlog are
    /// cleared, so no stale messages resurface if the plugin is later
    /// re-enabled with a different instance.
    pub async fn disable_plugin(&self, plugin_id: &str) {
        let Some((_, instance)) = self.inner.instances.remove(plugin_id) else {
            return;
        };
        let key = instance.key().clone();
        self.inner.buffer.lock().remove(&key);
        self.inner.queue.clear(&key);
        instance.destroy().await;
        tracing::info!(session_id = %self.inner.id, plugin_id, "plugin disabled");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Connection lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Mark the connection lost. Pending buffered messages are flushed to
    /// the backlog and instances are deactivated, but the session and its
    /// plugin state persist until [`Self::destroy`].
    pub async fn set_disconnected(&self) {
        if self.state().is_terminal() {
            return;
        }
        self.inner
            .state
            .store(ConnectionState::Disconnected as u8, Ordering::SeqCst);

        if let Some(debouncer) = self.inner.debouncer.get() {
            debouncer.flush_now();
        }

        let instances: Vec<_> = self
            .inner
            .instances
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        for instance in instances {
            instance.deactivate().await;
        }
        tracing::info!(session_id = %self.inner.id, app = %self.inner.query.app, "session disconnected");
    }

    /// Tear the session down: all plugin instances are destroyed and the
    /// buffer and backlogs are dropped. Terminal.
    pub async fn destroy(&self) {
        let previous = self
            .inner
            .state
            .swap(ConnectionState::Destroyed as u8, Ordering::SeqCst);
        if ConnectionState::from_u8(previous) == ConnectionState::Destroyed {
            return;
        }

        if let Some(debouncer) = self.inner.debouncer.get() {
            debouncer.cancel();
        }
        self.inner.buffer.lock().clear();

        let instances: Vec<_> = self
            .inner
            .instances
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        self.inner.instances.clear();

        for instance in instances {
            self.inner.queue.clear(instance.key());
            instance.destroy().await;
        }
        tracing::info!(session_id = %self.inner.id, app = %self.inner.query.app, "session destroyed");
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("app", &self.inner.query.app)
            .field("state", &self.state())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
