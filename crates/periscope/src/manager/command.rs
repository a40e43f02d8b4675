//! Plugin Lifecycle Commands
//!
//! Lifecycle changes are never applied in place; they are described as
//! commands and pushed onto the manager's queue, which applies them one
//! at a time in submission order.

/// One queued lifecycle operation
#[derive(Debug, Clone)]
pub enum PluginCommand {
    /// Resolve a plugin to a runnable module and enable it
    Load { plugin_id: String },

    /// Stop the plugin everywhere and mark it uninstalled
    Uninstall { plugin_id: String },

    /// Toggle the enabled flag for a scope: device-wide for device
    /// plugins, per-app for client plugins (`app: None` targets every
    /// connected session)
    Switch {
        plugin_id: String,
        app: Option<String>,
        enable: bool,
    },
}

impl PluginCommand {
    /// Short label for logging
    pub fn label(&self) -> String {
        match self {
            PluginCommand::Load { plugin_id } => format!("load({plugin_id})"),
            PluginCommand::Uninstall { plugin_id } => format!("uninstall({plugin_id})"),
            PluginCommand::Switch {
                plugin_id, enable, ..
            } => {
                if *enable {
                    format!("enable({plugin_id})")
                } else {
                    format!("disable({plugin_id})")
                }
            }
        }
    }
}

impl std::fmt::Display for PluginCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}
