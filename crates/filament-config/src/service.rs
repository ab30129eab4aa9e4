//! Runtime configuration service
//!
//! Holds the live config and notifies listeners synchronously on any
//! mutation. The instrumentation facade registers itself here and keeps its
//! own cached copies of the hot fields, so config reads never happen on the
//! instrumented path.

use crate::types::{AdvancedConfig, GeneralConfig, PluginConfig};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Callback invoked synchronously whenever configuration changes.
pub trait ConfigListener: Send + Sync {
    fn on_change(&self);
}

#[derive(Default)]
struct ConfigState {
    general: GeneralConfig,
    advanced: AdvancedConfig,
    plugins: HashMap<String, PluginConfig>,
}

/// In-memory configuration service with synchronous change listeners.
#[derive(Default)]
pub struct ConfigService {
    state: RwLock<ConfigState>,
    listeners: Mutex<Vec<Arc<dyn ConfigListener>>>,
    plugin_listeners: Mutex<HashMap<String, Vec<Arc<dyn ConfigListener>>>>,
}

impl std::fmt::Debug for ConfigService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigService")
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

impl ConfigService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a service pre-populated with plugin configs.
    pub fn with_plugins(plugins: impl IntoIterator<Item = PluginConfig>) -> Self {
        let service = Self::new();
        {
            let mut state = service.state.write();
            for plugin in plugins {
                state.plugins.insert(plugin.id.clone(), plugin);
            }
        }
        service
    }

    pub fn general_config(&self) -> GeneralConfig {
        self.state.read().general.clone()
    }

    pub fn advanced_config(&self) -> AdvancedConfig {
        self.state.read().advanced.clone()
    }

    pub fn plugin_config(&self, plugin_id: &str) -> Option<PluginConfig> {
        self.state.read().plugins.get(plugin_id).cloned()
    }

    /// Ids of all registered plugins, for diagnostics.
    pub fn plugin_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.read().plugins.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn add_config_listener(&self, listener: Arc<dyn ConfigListener>) {
        self.listeners.lock().push(listener);
    }

    pub fn add_plugin_config_listener(&self, plugin_id: &str, listener: Arc<dyn ConfigListener>) {
        self.plugin_listeners
            .lock()
            .entry(plugin_id.to_string())
            .or_default()
            .push(listener);
    }

    pub fn update_general_config(&self, general: GeneralConfig) {
        debug!(enabled = general.enabled, "general config updated");
        self.state.write().general = general;
        self.notify_listeners();
    }

    pub fn update_advanced_config(&self, advanced: AdvancedConfig) {
        self.state.write().advanced = advanced;
        self.notify_listeners();
    }

    /// Replace one plugin's config and notify its listeners.
    pub fn update_plugin_config(&self, plugin: PluginConfig) {
        let plugin_id = plugin.id.clone();
        self.state.write().plugins.insert(plugin_id.clone(), plugin);
        self.notify_plugin_listeners(&plugin_id);
    }

    fn notify_listeners(&self) {
        let listeners: Vec<_> = self.listeners.lock().clone();
        for listener in listeners {
            listener.on_change();
        }
    }

    fn notify_plugin_listeners(&self, plugin_id: &str) {
        let listeners: Vec<_> = self
            .plugin_listeners
            .lock()
            .get(plugin_id)
            .cloned()
            .unwrap_or_default();
        for listener in listeners {
            listener.on_change();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener(AtomicUsize);

    impl ConfigListener for CountingListener {
        fn on_change(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_general_update_notifies_global_listeners() {
        let service = ConfigService::new();
        let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
        service.add_config_listener(listener.clone());
        service.update_general_config(GeneralConfig { enabled: false });
        assert_eq!(listener.0.load(Ordering::SeqCst), 1);
        assert!(!service.general_config().enabled);
    }

    #[test]
    fn test_plugin_update_notifies_only_that_plugin() {
        let service =
            ConfigService::with_plugins([PluginConfig::new("jdbc"), PluginConfig::new("servlet")]);
        let jdbc = Arc::new(CountingListener(AtomicUsize::new(0)));
        let servlet = Arc::new(CountingListener(AtomicUsize::new(0)));
        service.add_plugin_config_listener("jdbc", jdbc.clone());
        service.add_plugin_config_listener("servlet", servlet.clone());

        let mut config = service.plugin_config("jdbc").unwrap();
        config.enabled = false;
        service.update_plugin_config(config);

        assert_eq!(jdbc.0.load(Ordering::SeqCst), 1);
        assert_eq!(servlet.0.load(Ordering::SeqCst), 0);
        assert!(!service.plugin_config("jdbc").unwrap().enabled);
    }

    #[test]
    fn test_unknown_plugin_is_none() {
        let service = ConfigService::new();
        assert!(service.plugin_config("nope").is_none());
    }

    #[test]
    fn test_plugin_ids_sorted() {
        let service =
            ConfigService::with_plugins([PluginConfig::new("servlet"), PluginConfig::new("jdbc")]);
        assert_eq!(service.plugin_ids(), vec!["jdbc", "servlet"]);
    }
}
