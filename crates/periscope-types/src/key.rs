//! Plugin Keys
//!
//! The addressing scheme for all message queues and instance registries:
//! a stable string derived from (owning scope, plugin id).

use serde::{Deserialize, Serialize};

use crate::DeviceIdentity;

/// Stable address combining (session-or-device identity, plugin id).
///
/// The same logical (scope, plugin) pair always maps to the same key and
/// two different pairs never collide. Consumers must treat the value as an
/// opaque string and never parse it back into parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginKey(String);

impl PluginKey {
    /// Key for a plugin scoped to one connected app session
    pub fn for_app(app_id: &str, plugin_id: &str) -> Self {
        Self(format!("{app_id}#{plugin_id}"))
    }

    /// Key for a plugin scoped to a whole device
    pub fn for_device(device: &DeviceIdentity, plugin_id: &str) -> Self {
        Self(format!(
            "{}#{}#{}#{}",
            device.os, device.title, device.serial, plugin_id
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Derive the key for an arbitrary scope, preferring the session scope when
/// both a session and a device are known.
pub fn plugin_key(
    app_id: Option<&str>,
    device: Option<&DeviceIdentity>,
    plugin_id: &str,
) -> PluginKey {
    match (app_id, device) {
        (Some(app), Some(device)) => PluginKey(format!(
            "{app}#{}#{}#{}#{plugin_id}",
            device.os, device.title, device.serial
        )),
        (Some(app), None) => PluginKey::for_app(app, plugin_id),
        (None, Some(device)) => PluginKey::for_device(device, plugin_id),
        (None, None) => PluginKey(format!("unknown#{plugin_id}")),
    }
}

impl std::fmt::Display for PluginKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
