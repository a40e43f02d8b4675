//! Active Selection
//!
//! Tracks which device, session and plugin the UI is focused on, with the
//! preference-retention rule: an explicit user action always updates the
//! remembered preference, while an automatic re-selection (a new
//! connection arriving, the selected one disconnecting) never overwrites
//! it and prefers a connection matching the remembered preference.

use uuid::Uuid;

/// What the user last explicitly chose
#[derive(Debug, Clone, Default)]
pub struct Preference {
    pub device_serial: Option<String>,
    pub app: Option<String>,
    pub plugin_id: Option<String>,
}

/// Current selection state
#[derive(Debug, Default)]
pub struct Selection {
    preferred: Preference,
    active_device: Option<String>,
    active_session: Option<Uuid>,
    active_plugin: Option<String>,
}

impl Selection {
    pub fn preferred(&self) -> &Preference {
        &self.preferred
    }

    pub fn active_device(&self) -> Option<&str> {
        self.active_device.as_deref()
    }

    pub fn active_session(&self) -> Option<Uuid> {
        self.active_session
    }

    pub fn active_plugin(&self) -> Option<&str> {
        self.active_plugin.as_deref()
    }

    // ─────────────────────────────────────────────────────────────────────
    // User actions (update the remembered preference)
    // ─────────────────────────────────────────────────────────────────────

    pub fn user_select_device(&mut self, serial: &str) {
        self.preferred.device_serial = Some(serial.to_string());
        self.active_device = Some(serial.to_string());
    }

    pub fn user_select_session(&mut self, session_id: Uuid, app: &str) {
        self.preferred.app = Some(app.to_string());
        self.active_session = Some(session_id);
    }

    pub fn user_select_plugin(&mut self, plugin_id: &str) -> Option<String> {
        let previous = self.active_plugin.take();
        self.preferred.plugin_id = Some(plugin_id.to_string());
        self.active_plugin = Some(plugin_id.to_string());
        previous
    }

    // ─────────────────────────────────────────────────────────────────────
    // Automatic re-selection (never touches the preference)
    // ─────────────────────────────────────────────────────────────────────

    /// Re-evaluate the active device against the connected set
    pub fn auto_select_device(&mut self, connected: &[String]) {
        if let Some(active) = &self.active_device {
            if connected.contains(active) {
                return;
            }
        }
        self.active_device = self
            .preferred
            .device_serial
            .as_ref()
            .filter(|preferred| connected.contains(preferred))
            .cloned()
            .or_else(|| connected.first().cloned());
    }

    /// Re-evaluate the active session against connected (id, app) pairs
    pub fn auto_select_session(&mut self, connected: &[(Uuid, String)]) {
        if let Some(active) = self.active_session {
            if connected.iter().any(|(id, _)| *id == active) {
                return;
            }
        }
        self.active_session = self
            .preferred
            .app
            .as_ref()
            .and_then(|app| connected.iter().find(|(_, a)| a == app))
            .or_else(|| connected.first())
            .map(|(id, _)| *id);
    }

    /// Drop the active plugin if it matches (plugin was disabled)
    pub fn clear_active_plugin(&mut self, plugin_id: &str) {
        if self.active_plugin.as_deref() == Some(plugin_id) {
            self.active_plugin = None;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
