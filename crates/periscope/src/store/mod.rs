//! Host Store
//!
//! The explicitly-owned registry of everything the host knows: connected
//! devices and sessions, the plugin catalog, the shared message backlog,
//! and the active selection. Built once at host startup and passed by
//! handle into the components that need it; torn down at shutdown.

mod catalog;
mod device;
mod selection;

pub use catalog::*;
pub use device::*;
pub use selection::*;

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use periscope_runtime::{MessageQueue, QueueProcessor};
use periscope_types::{AppQuery, ConnectionState, DeviceIdentity, DeviceType, Envelope};

use crate::config::HostConfig;
use crate::session::Session;
use crate::types::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Store Events
// ─────────────────────────────────────────────────────────────────────────────

/// Registry-change notifications for the UI layer
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StoreEvent {
    DeviceRegistered { serial: String },
    DeviceDisconnected { serial: String },
    SessionConnected { session_id: Uuid, app: String },
    SessionDisconnected { session_id: Uuid },
    SessionDestroyed { session_id: Uuid },
    PluginEnabled { plugin_id: String, app: Option<String> },
    PluginDisabled { plugin_id: String, app: Option<String> },
    PluginLoadFailed { plugin_id: String, reason: String },
    PluginUninstalled { plugin_id: String },
    SelectionChanged,
}

// ─────────────────────────────────────────────────────────────────────────────
// Host Store
// ─────────────────────────────────────────────────────────────────────────────

/// Shared host registry
#[derive(Clone)]
pub struct HostStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    config: HostConfig,

    /// Known devices by serial
    devices: DashMap<String, Arc<Device>>,

    /// Sessions by id; retained across disconnect until destroyed
    sessions: DashMap<Uuid, Session>,

    catalog: PluginCatalog,

    /// Process-wide backlog, owned here and shared by handle
    queue: Arc<MessageQueue>,
    processor: Arc<QueueProcessor>,

    selection: Mutex<Selection>,

    /// Broadcast channel for registry-change notifications
    events_tx: broadcast::Sender<StoreEvent>,
}

impl HostStore {
    /// Create the store for one host process
    pub fn new(config: HostConfig) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(StoreInner {
                config,
                devices: DashMap::new(),
                sessions: DashMap::new(),
                catalog: PluginCatalog::new(),
                queue: Arc::new(MessageQueue::new()),
                processor: Arc::new(QueueProcessor::new()),
                selection: Mutex::new(Selection::default()),
                events_tx,
            }),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.inner.config
    }

    pub fn catalog(&self) -> &PluginCatalog {
        &self.inner.catalog
    }

    pub fn queue(&self) -> &Arc<MessageQueue> {
        &self.inner.queue
    }

    pub fn processor(&self) -> &Arc<QueueProcessor> {
        &self.inner.processor
    }

    /// Subscribe to registry-change notifications
    pub fn subscribe_events(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events_tx.subscribe()
    }

    pub(crate) fn emit(&self, event: StoreEvent) {
        let _ = self.inner.events_tx.send(event);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Devices
    // ─────────────────────────────────────────────────────────────────────

    /// Register a newly connected device.
    ///
    /// Registering a serial that is still connected is a hard error:
    /// silently replacing a live connection would corrupt plugin state,
    /// so the caller must resolve the conflict before retrying. A
    /// disconnected predecessor is destroyed and replaced.
    pub async fn register_device(
        &self,
        identity: DeviceIdentity,
        device_type: DeviceType,
        outbound: mpsc::Sender<Envelope>,
    ) -> Result<Arc<Device>> {
        let serial = identity.serial.clone();

        if let Some(existing) = self.inner.devices.get(&serial) {
            if existing.is_connected() {
                return Err(Error::DeviceConflict(serial));
            }
        }
        if let Some((_, stale)) = self.inner.devices.remove(&serial) {
            stale.destroy().await;
        }

        let device = Device::new(
            identity,
            device_type,
            Arc::clone(&self.inner.queue),
            Arc::clone(&self.inner.processor),
            outbound,
            self.inner.config.max_queue_size,
            self.inner.config.idle_budget(),
        );
        self.inner.devices.insert(serial.clone(), Arc::clone(&device));
        tracing::info!(serial = %serial, "device registered");

        self.emit(StoreEvent::DeviceRegistered {
            serial: serial.clone(),
        });
        self.auto_select();
        Ok(device)
    }

    /// Mark a device disconnected
    pub async fn disconnect_device(&self, serial: &str) -> Result<()> {
        let device = self
            .inner
            .devices
            .get(serial)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| Error::NotFound(format!("device '{serial}'")))?;

        device.set_disconnected().await;
        self.emit(StoreEvent::DeviceDisconnected {
            serial: serial.to_string(),
        });
        self.auto_select();
        Ok(())
    }

    pub fn device(&self, serial: &str) -> Option<Arc<Device>> {
        self.inner.devices.get(serial).map(|e| Arc::clone(e.value()))
    }

    pub fn connected_devices(&self) -> Vec<Arc<Device>> {
        self.inner
            .devices
            .iter()
            .filter(|e| e.is_connected())
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────

    /// Create and register a session for a completed handshake
    pub fn register_session(
        &self,
        query: AppQuery,
        supported_plugins: HashSet<String>,
        outbound: mpsc::Sender<Envelope>,
    ) -> Session {
        let session = Session::new(
            query,
            supported_plugins,
            &self.inner.config,
            Arc::clone(&self.inner.queue),
            Arc::clone(&self.inner.processor),
            outbound,
        );
        self.inner.sessions.insert(session.id(), session.clone());
        tracing::info!(session_id = %session.id(), app = %session.query().app, "session registered");

        self.emit(StoreEvent::SessionConnected {
            session_id: session.id(),
            app: session.query().app.clone(),
        });
        self.auto_select();
        session
    }

    /// Mark a session disconnected; it persists until destroyed
    pub async fn session_disconnected(&self, session_id: Uuid) {
        if let Some(session) = self.session(session_id) {
            session.set_disconnected().await;
            self.emit(StoreEvent::SessionDisconnected { session_id });
            self.auto_select();
        }
    }

    /// Destroy a session and forget it
    pub async fn destroy_session(&self, session_id: Uuid) {
        if let Some((_, session)) = self.inner.sessions.remove(&session_id) {
            session.destroy().await;
            self.emit(StoreEvent::SessionDestroyed { session_id });
            self.auto_select();
        }
    }

    pub fn session(&self, session_id: Uuid) -> Option<Session> {
        self.inner
            .sessions
            .get(&session_id)
            .map(|e| e.value().clone())
    }

    pub fn connected_sessions(&self) -> Vec<Session> {
        self.inner
            .sessions
            .iter()
            .filter(|e| e.is_connected())
            .map(|e| e.value().clone())
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Selection
    // ─────────────────────────────────────────────────────────────────────

    pub fn active_device(&self) -> Option<Arc<Device>> {
        let serial = self.inner.selection.lock().active_device()?.to_string();
        self.device(&serial)
    }

    pub fn active_session(&self) -> Option<Session> {
        let session_id = self.inner.selection.lock().active_session()?;
        self.session(session_id)
    }

    pub fn active_plugin(&self) -> Option<String> {
        self.inner
            .selection
            .lock()
            .active_plugin()
            .map(str::to_string)
    }

    /// Explicit user choice of a device
    pub fn user_select_device(&self, serial: &str) -> Result<()> {
        if self.device(serial).is_none() {
            return Err(Error::NotFound(format!("device '{serial}'")));
        }
        self.inner.selection.lock().user_select_device(serial);
        self.emit(StoreEvent::SelectionChanged);
        Ok(())
    }

    /// Explicit user choice of a session
    pub fn user_select_session(&self, session_id: Uuid) -> Result<()> {
        let session = self
            .session(session_id)
            .ok_or_else(|| Error::NotFound(format!("session '{session_id}'")))?;
        self.inner
            .selection
            .lock()
            .user_select_session(session_id, &session.query().app);
        self.emit(StoreEvent::SelectionChanged);
        Ok(())
    }

    /// Explicit user choice of a plugin: deactivates the previously
    /// selected non-background plugin on the active session, activates
    /// the chosen one and drains its backlog.
    pub async fn user_select_plugin(&self, plugin_id: &str) -> Result<()> {
        let previous = self.inner.selection.lock().user_select_plugin(plugin_id);

        if let Some(session) = self.active_session() {
            if let Some(previous) = previous.filter(|p| p != plugin_id) {
                if let Some(instance) = session.instance(&previous) {
                    if !instance.descriptor().background {
                        instance.deactivate().await;
                    }
                }
            }
            if session.instance(plugin_id).is_some() {
                session.activate_plugin(plugin_id).await?;
            }
        }
        self.emit(StoreEvent::SelectionChanged);
        Ok(())
    }

    /// Drop the active plugin if it matches (the plugin was disabled or
    /// uninstalled); the remembered preference is untouched
    pub(crate) fn clear_active_plugin(&self, plugin_id: &str) {
        self.inner.selection.lock().clear_active_plugin(plugin_id);
    }

    /// Re-evaluate the automatic selection after a connectivity change
    fn auto_select(&self) {
        let devices: Vec<String> = self
            .connected_devices()
            .iter()
            .map(|d| d.serial().to_string())
            .collect();
        let sessions: Vec<(Uuid, String)> = self
            .connected_sessions()
            .iter()
            .map(|s| (s.id(), s.query().app.clone()))
            .collect();

        let mut selection = self.inner.selection.lock();
        selection.auto_select_device(&devices);
        selection.auto_select_session(&sessions);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────

    /// Plugin lists for a scope; when `app` names a connected session its
    /// announced supported set filters the client plugins
    pub fn plugin_lists(&self, app: Option<&str>) -> PluginLists {
        let supported = app.and_then(|app| {
            self.inner
                .sessions
                .iter()
                .find(|s| s.query().app == app && s.is_connected())
                .map(|s| s.supported_plugins())
        });
        self.inner.catalog.lists(app, supported.as_ref())
    }

    /// Snapshot of the registry for the status surface
    pub fn status_snapshot(&self) -> StatusSnapshot {
        let devices = self
            .inner
            .devices
            .iter()
            .map(|entry| DeviceStatus {
                serial: entry.serial().to_string(),
                os: entry.identity().os.clone(),
                title: entry.identity().title.clone(),
                device_type: entry.device_type(),
                state: entry.state(),
                registered_at: entry.registered_at(),
                plugins: entry.plugin_ids(),
            })
            .collect();
        let sessions = self
            .inner
            .sessions
            .iter()
            .map(|entry| SessionStatus {
                session_id: entry.id(),
                app: entry.query().app.clone(),
                os: entry.query().os.clone(),
                device: entry.query().device.clone(),
                state: entry.state(),
                plugins: entry.plugin_ids(),
            })
            .collect();

        let selection = self.inner.selection.lock();
        StatusSnapshot {
            devices,
            sessions,
            active_device: selection.active_device().map(str::to_string),
            active_session: selection.active_session(),
            active_plugin: selection.active_plugin().map(str::to_string),
        }
    }

    /// Tear down every session and device at host shutdown
    pub async fn shutdown(&self) {
        let session_ids: Vec<Uuid> = self.inner.sessions.iter().map(|e| e.id()).collect();
        for session_id in session_ids {
            self.destroy_session(session_id).await;
        }

        let serials: Vec<String> = self
            .inner
            .devices
            .iter()
            .map(|e| e.serial().to_string())
            .collect();
        for serial in serials {
            if let Some((_, device)) = self.inner.devices.remove(&serial) {
                device.destroy().await;
            }
        }
        tracing::info!("host store shut down");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Status Types
// ─────────────────────────────────────────────────────────────────────────────

/// Registry snapshot served to the (out-of-scope) shell
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub devices: Vec<DeviceStatus>,
    pub sessions: Vec<SessionStatus>,
    pub active_device: Option<String>,
    pub active_session: Option<Uuid>,
    pub active_plugin: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub serial: String,
    pub os: String,
    pub title: String,
    pub device_type: DeviceType,
    pub state: ConnectionState,
    pub registered_at: chrono::DateTime<chrono::Utc>,
    pub plugins: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: Uuid,
    pub app: String,
    pub os: String,
    pub device: String,
    pub state: ConnectionState,
    pub plugins: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
