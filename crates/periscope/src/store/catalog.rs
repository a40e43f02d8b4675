//! Plugin Catalog
//!
//! The set of plugins the host knows about: installed modules with their
//! instance factories, enable state per scope, and entries that are known
//! but not installed (downloadable). The binding kind is resolved once at
//! registration into the closed `PluginKind` tag; enable state is stored
//! in a matching variant so device plugins cannot grow per-app state or
//! vice versa.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use periscope_runtime::{Plugin, PluginDescriptor, PluginKind};

use crate::types::{Error, Result};

/// Factory producing a fresh plugin object per instance
pub type PluginFactory = Arc<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>;

/// Enable state, shaped by the plugin's binding kind
enum EnabledScope {
    /// Device plugins toggle device-wide
    Device(bool),
    /// Client plugins toggle per app name
    Client(HashSet<String>),
}

struct CatalogEntry {
    descriptor: PluginDescriptor,
    factory: Option<PluginFactory>,
    installed: bool,
    enabled: EnabledScope,
}

/// Plugin lists exposed to the registry query interface
#[derive(Debug, Clone, Default, Serialize)]
pub struct PluginLists {
    /// Installed, enabled for the scope, supported by the session
    pub enabled: Vec<String>,
    /// Installed and supported but not enabled
    pub disabled: Vec<String>,
    /// Installed but not supported by the queried session
    pub unavailable: Vec<String>,
    /// Known but not installed
    pub downloadable: Vec<String>,
}

/// Registry of known plugins
#[derive(Default)]
pub struct PluginCatalog {
    entries: DashMap<String, CatalogEntry>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register) an installed plugin with its factory
    pub fn register(&self, descriptor: PluginDescriptor, factory: PluginFactory) {
        let enabled = match descriptor.kind {
            PluginKind::Device => EnabledScope::Device(false),
            PluginKind::Client => EnabledScope::Client(HashSet::new()),
        };
        tracing::info!(plugin_id = %descriptor.id, kind = ?descriptor.kind, "plugin registered");
        self.entries.insert(
            descriptor.id.clone(),
            CatalogEntry {
                descriptor,
                factory: Some(factory),
                installed: true,
                enabled,
            },
        );
    }

    /// Record a plugin that exists in the marketplace but is not installed
    pub fn register_downloadable(&self, descriptor: PluginDescriptor) {
        let enabled = match descriptor.kind {
            PluginKind::Device => EnabledScope::Device(false),
            PluginKind::Client => EnabledScope::Client(HashSet::new()),
        };
        let id = descriptor.id.clone();
        self.entries.entry(id).or_insert(CatalogEntry {
            descriptor,
            factory: None,
            installed: false,
            enabled,
        });
    }

    pub fn descriptor(&self, plugin_id: &str) -> Option<PluginDescriptor> {
        self.entries.get(plugin_id).map(|e| e.descriptor.clone())
    }

    pub fn is_installed(&self, plugin_id: &str) -> bool {
        self.entries
            .get(plugin_id)
            .map(|e| e.installed)
            .unwrap_or(false)
    }

    /// Resolve an installed plugin to a runnable module
    pub fn instantiate(&self, plugin_id: &str) -> Result<Arc<dyn Plugin>> {
        let entry = self
            .entries
            .get(plugin_id)
            .ok_or_else(|| Error::NotFound(format!("plugin '{plugin_id}' not in catalog")))?;
        if !entry.installed {
            return Err(Error::NotFound(format!(
                "plugin '{plugin_id}' is not installed"
            )));
        }
        let factory = entry
            .factory
            .as_ref()
            .ok_or_else(|| Error::NotFound(format!("plugin '{plugin_id}' has no module")))?;
        Ok(factory())
    }

    /// Mark a plugin uninstalled; the entry stays as downloadable
    pub fn mark_uninstalled(&self, plugin_id: &str) {
        if let Some(mut entry) = self.entries.get_mut(plugin_id) {
            entry.installed = false;
            entry.enabled = match entry.descriptor.kind {
                PluginKind::Device => EnabledScope::Device(false),
                PluginKind::Client => EnabledScope::Client(HashSet::new()),
            };
            tracing::info!(plugin_id, "plugin uninstalled");
        }
    }

    /// Flip the enabled flag for a scope. `app` must be given for client
    /// plugins and is ignored for device plugins.
    pub fn set_enabled(&self, plugin_id: &str, app: Option<&str>, enable: bool) -> Result<()> {
        let mut entry = self
            .entries
            .get_mut(plugin_id)
            .ok_or_else(|| Error::NotFound(format!("plugin '{plugin_id}' not in catalog")))?;

        match &mut entry.enabled {
            EnabledScope::Device(flag) => *flag = enable,
            EnabledScope::Client(apps) => match app {
                Some(app) if enable => {
                    apps.insert(app.to_string());
                }
                Some(app) => {
                    apps.remove(app);
                }
                // No app scope: disabling clears every app
                None if !enable => apps.clear(),
                None => {
                    return Err(Error::InvalidScope(format!(
                        "client plugin '{plugin_id}' needs an app scope to enable"
                    )));
                }
            },
        }
        Ok(())
    }

    /// Whether a plugin is enabled for the given scope
    pub fn is_enabled(&self, plugin_id: &str, app: Option<&str>) -> bool {
        self.entries
            .get(plugin_id)
            .map(|entry| match &entry.enabled {
                EnabledScope::Device(flag) => *flag,
                EnabledScope::Client(apps) => app.map(|a| apps.contains(a)).unwrap_or(false),
            })
            .unwrap_or(false)
    }

    /// Build the plugin lists for a scope. `supported` filters client
    /// plugins to the set the queried session announced (None means no
    /// filtering).
    pub fn lists(&self, app: Option<&str>, supported: Option<&HashSet<String>>) -> PluginLists {
        let mut lists = PluginLists::default();
        for entry in self.entries.iter() {
            let id = entry.descriptor.id.clone();
            if !entry.installed {
                lists.downloadable.push(id);
                continue;
            }
            let is_supported = match entry.descriptor.kind {
                PluginKind::Device => true,
                PluginKind::Client => supported
                    .map(|set| set.is_empty() || set.contains(&id))
                    .unwrap_or(true),
            };
            let enabled = match &entry.enabled {
                EnabledScope::Device(flag) => *flag,
                EnabledScope::Client(apps) => app.map(|a| apps.contains(a)).unwrap_or(false),
            };
            if !is_supported {
                lists.unavailable.push(id);
            } else if enabled {
                lists.enabled.push(id);
            } else {
                lists.disabled.push(id);
            }
        }
        lists.enabled.sort();
        lists.disabled.sort();
        lists.unavailable.sort();
        lists.downloadable.sort();
        lists
    }

    /// Ids of all installed plugins of one kind
    pub fn installed_ids(&self, kind: PluginKind) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.installed && e.descriptor.kind == kind)
            .map(|e| e.descriptor.id.clone())
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use periscope_runtime::{PluginContext, PluginResult};
    use serde_json::Value;

    struct NullPlugin {
        descriptor: PluginDescriptor,
    }

    #[async_trait]
    impl Plugin for NullPlugin {
        fn descriptor(&self) -> PluginDescriptor {
            self.descriptor.clone()
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

    fn factory(descriptor: PluginDescriptor) -> PluginFactory {
        Arc::new(move || {
            Arc::new(NullPlugin {
                descriptor: descriptor.clone(),
            }) as Arc<dyn Plugin>
        })
    }

    #[test]
    fn test_client_enable_is_per_app() {
        let catalog = PluginCatalog::new();
        let descriptor = PluginDescriptor::client("db", "Database");
        catalog.register(descriptor.clone(), factory(descriptor));

        catalog.set_enabled("db", Some("com.shop"), true).unwrap();
        assert!(catalog.is_enabled("db", Some("com.shop")));
        assert!(!catalog.is_enabled("db", Some("com.mail")));

        catalog.set_enabled("db", Some("com.shop"), false).unwrap();
        assert!(!catalog.is_enabled("db", Some("com.shop")));
    }

    #[test]
    fn test_device_enable_is_device_wide() {
        let catalog = PluginCatalog::new();
        let descriptor = PluginDescriptor::device("logcat", "Device Logs");
        catalog.register(descriptor.clone(), factory(descriptor));

        catalog.set_enabled("logcat", None, true).unwrap();
        assert!(catalog.is_enabled("logcat", None));
        assert!(catalog.is_enabled("logcat", Some("com.shop")));
    }

    #[test]
    fn test_uninstall_moves_to_downloadable() {
        let catalog = PluginCatalog::new();
        let descriptor = PluginDescriptor::client("db", "Database");
        catalog.register(descriptor.clone(), factory(descriptor));
        catalog.set_enabled("db", Some("com.shop"), true).unwrap();

        catalog.mark_uninstalled("db");
        assert!(!catalog.is_installed("db"));
        assert!(!catalog.is_enabled("db", Some("com.shop")));
        assert!(catalog.instantiate("db").is_err());

        let lists = catalog.lists(Some("com.shop"), None);
        assert_eq!(lists.downloadable, vec!["db".to_string()]);
    }

    #[test]
    fn test_lists_partition() {
        let catalog = PluginCatalog::new();
        for (id, kind_client) in [("db", true), ("net", true), ("ui", true)] {
            let descriptor = if kind_client {
                PluginDescriptor::client(id, id)
            } else {
                PluginDescriptor::device(id, id)
            };
            catalog.register(descriptor.clone(), factory(descriptor));
        }
        catalog.register_downloadable(PluginDescriptor::client("market", "Marketplace"));
        catalog.set_enabled("db", Some("com.shop"), true).unwrap();

        let supported = HashSet::from(["db".to_string(), "net".to_string()]);
        let lists = catalog.lists(Some("com.shop"), Some(&supported));

        assert_eq!(lists.enabled, vec!["db".to_string()]);
        assert_eq!(lists.disabled, vec!["net".to_string()]);
        assert_eq!(lists.unavailable, vec!["ui".to_string()]);
        assert_eq!(lists.downloadable, vec!["market".to_string()]);
    }
}
