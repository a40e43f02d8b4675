//! Plugin Abstraction
//!
//! The contract a feature module implements to consume envelopes for its
//! `api` name, plus the per-(scope, plugin) instance handle the host
//! manages.
//!
//! # Lifecycle
//!
//! A plugin instance moves through the shared connection state machine:
//! created (`Connecting`), activated (`Connected`, `on_connect` ran),
//! deactivated (`Disconnected`, `on_disconnect` ran) and destroyed
//! (terminal, `on_destroy` ran exactly once).

mod instance;

pub use instance::*;

use async_trait::async_trait;
use serde_json::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised by plugin lifecycle hooks and message dispatch
#[derive(Debug, Clone, thiserror::Error)]
pub enum PluginError {
    #[error("plugin construction failed: {0}")]
    Construction(String),

    #[error("plugin rejected method '{0}'")]
    UnsupportedMethod(String),

    #[error("plugin handler failed: {0}")]
    Handler(String),

    #[error("plugin instance destroyed")]
    Destroyed,

    #[error("outbound channel closed")]
    ChannelClosed,
}

/// Result type for plugin operations
pub type PluginResult<T> = Result<T, PluginError>;

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Descriptor
// ─────────────────────────────────────────────────────────────────────────────

/// How a plugin binds to the registry: to a whole device or to one
/// connected app. Resolved once at registration; downstream code switches
/// on this tag, never on runtime shape inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    Device,
    Client,
}

/// Static description of a plugin
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    /// Unique plugin identifier; doubles as the envelope `api` name
    pub id: String,

    /// Human-readable title
    pub title: String,

    /// Device-wide or per-app binding
    pub kind: PluginKind,

    /// Background-eligible plugins activate immediately when enabled;
    /// others activate lazily when the user selects them
    pub background: bool,
}

impl PluginDescriptor {
    /// Describe a client (per-app) plugin
    pub fn client(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            kind: PluginKind::Client,
            background: false,
        }
    }

    /// Describe a device-wide plugin
    pub fn device(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            kind: PluginKind::Device,
            background: false,
        }
    }

    /// Set background eligibility
    pub fn background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Trait
// ─────────────────────────────────────────────────────────────────────────────

/// The activation contract exposed to plugin modules.
///
/// Hooks default to no-ops except `on_message`, which every plugin must
/// implement to consume its envelopes. Hook errors are caught and logged
/// by the host; they never take down the owning session or device.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Static description of this plugin
    fn descriptor(&self) -> PluginDescriptor;

    /// Called when the instance becomes active for its scope
    async fn on_connect(&self, _ctx: &PluginContext) -> PluginResult<()> {
        Ok(())
    }

    /// Called when the instance deactivates (connection lost or the user
    /// navigated away from a non-background plugin)
    async fn on_disconnect(&self, _ctx: &PluginContext) -> PluginResult<()> {
        Ok(())
    }

    /// Called exactly once when the instance is torn down
    async fn on_destroy(&self, _ctx: &PluginContext) -> PluginResult<()> {
        Ok(())
    }

    /// Dispatch one inbound envelope addressed to this plugin
    async fn on_message(
        &self,
        ctx: &PluginContext,
        method: &str,
        params: Value,
    ) -> PluginResult<()>;
}
