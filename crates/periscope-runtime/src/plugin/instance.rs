//! Plugin Instance
//!
//! The per-(scope, plugin) handle created when a plugin is activated for a
//! device or session. Owns the plugin-local context and the lifecycle
//! state machine; destroyed exactly once, either explicitly on unload or
//! transitively when the owning device/session is destroyed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use periscope_types::{ConnectionState, Envelope, PluginKey};
use serde_json::Value;
use tokio::sync::mpsc;

use super::{Plugin, PluginDescriptor, PluginError, PluginResult};

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Context
// ─────────────────────────────────────────────────────────────────────────────

/// Context handed to every plugin hook: identity plus the outbound path
/// back to the remote app.
pub struct PluginContext {
    plugin_id: String,
    key: PluginKey,
    outbound: mpsc::Sender<Envelope>,
}

impl PluginContext {
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn key(&self) -> &PluginKey {
        &self.key
    }

    /// Send an outbound call to the remote app (fire-and-forget)
    pub fn send(&self, method: impl Into<String>, params: Value) -> PluginResult<()> {
        let envelope = Envelope::new(&self.plugin_id, method, params);
        self.outbound
            .try_send(envelope)
            .map_err(|_| PluginError::ChannelClosed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Instance
// ─────────────────────────────────────────────────────────────────────────────

/// A running plugin bound to one scope.
pub struct PluginInstance {
    descriptor: PluginDescriptor,
    plugin: Arc<dyn Plugin>,
    ctx: PluginContext,
    state: AtomicU8,
}

impl PluginInstance {
    /// Create an inactive instance for the given scope key
    pub fn new(
        plugin: Arc<dyn Plugin>,
        key: PluginKey,
        outbound: mpsc::Sender<Envelope>,
    ) -> Arc<Self> {
        let descriptor = plugin.descriptor();
        Arc::new(Self {
            ctx: PluginContext {
                plugin_id: descriptor.id.clone(),
                key,
                outbound,
            },
            descriptor,
            plugin,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
        })
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    pub fn key(&self) -> &PluginKey {
        &self.ctx.key
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Whether the instance is active (connected and receiving drains)
    pub fn is_active(&self) -> bool {
        self.state().is_connected()
    }

    /// Activate the instance, running the plugin's `on_connect` hook.
    ///
    /// Idempotent while active. On hook failure the instance stays in its
    /// previous state and the error propagates so the caller can drop the
    /// instance rather than keep it half-constructed.
    pub async fn activate(&self) -> PluginResult<()> {
        match self.state() {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Destroyed => return Err(PluginError::Destroyed),
            ConnectionState::Connecting | ConnectionState::Disconnected => {}
        }

        self.plugin.on_connect(&self.ctx).await?;
        self.state
            .store(ConnectionState::Connected as u8, Ordering::SeqCst);
        tracing::debug!(plugin_id = %self.descriptor.id, key = %self.ctx.key, "plugin activated");
        Ok(())
    }

    /// Deactivate the instance, running `on_disconnect`. No-op unless
    /// currently active.
    pub async fn deactivate(&self) {
        if !self.is_active() {
            return;
        }
        if let Err(e) = self.plugin.on_disconnect(&self.ctx).await {
            tracing::warn!(
                plugin_id = %self.descriptor.id,
                error = %e,
                "plugin on_disconnect failed"
            );
        }
        self.state
            .store(ConnectionState::Disconnected as u8, Ordering::SeqCst);
    }

    /// Tear the instance down. Runs `on_disconnect` (if active) and
    /// `on_destroy` exactly once; later calls are no-ops.
    pub async fn destroy(&self) {
        let previous = self
            .state
            .swap(ConnectionState::Destroyed as u8, Ordering::SeqCst);
        if ConnectionState::from_u8(previous) == ConnectionState::Destroyed {
            return;
        }

        if ConnectionState::from_u8(previous) == ConnectionState::Connected {
            if let Err(e) = self.plugin.on_disconnect(&self.ctx).await {
                tracing::warn!(
                    plugin_id = %self.descriptor.id,
                    error = %e,
                    "plugin on_disconnect failed during destroy"
                );
            }
        }
        if let Err(e) = self.plugin.on_destroy(&self.ctx).await {
            tracing::warn!(
                plugin_id = %self.descriptor.id,
                error = %e,
                "plugin on_destroy failed"
            );
        }
        tracing::debug!(plugin_id = %self.descriptor.id, key = %self.ctx.key, "plugin destroyed");
    }

    /// Dispatch one envelope to the plugin's message handler
    pub async fn dispatch(&self, envelope: &Envelope) -> PluginResult<()> {
        if self.state() == ConnectionState::Destroyed {
            return Err(PluginError::Destroyed);
        }
        self.plugin
            .on_message(&self.ctx, &envelope.method, envelope.params.clone())
            .await
    }
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginInstance")
            .field("plugin_id", &self.descriptor.id)
            .field("key", &self.ctx.key)
            .field("state", &self.state())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
