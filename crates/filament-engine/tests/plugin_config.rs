//! Facade behavior around plugin bindings and config-change propagation.

use filament_config::{ConfigListener, ConfigService, GeneralConfig, PluginConfig, PropertyValue};
use filament_testing::{test_harness_with, test_harness_with_plugin};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn bound_plugin_exposes_properties() {
    let harness = test_harness_with_plugin(
        PluginConfig::new("servlet")
            .with_property("sessionAttribute", PropertyValue::String("userId".into()))
            .with_property("traceUserAgent", PropertyValue::Boolean(true))
            .with_property("slowThreshold", PropertyValue::Double(2.5)),
    );
    assert!(harness.services.is_enabled());
    assert_eq!(
        harness.services.get_string_property("sessionAttribute"),
        "userId"
    );
    assert!(harness.services.get_boolean_property("traceUserAgent"));
    assert_eq!(harness.services.get_double_property("slowThreshold"), Some(2.5));
    assert_eq!(harness.services.get_string_property("missing"), "");
}

#[test]
fn plugin_disable_turns_facade_off() {
    let harness = test_harness_with_plugin(PluginConfig::new("jdbc"));
    assert!(harness.services.is_enabled());

    let mut plugin = harness.config.plugin_config("jdbc").unwrap();
    plugin.enabled = false;
    harness.config.update_plugin_config(plugin);
    assert!(!harness.services.is_enabled());

    // general disable dominates as well
    let mut plugin = harness.config.plugin_config("jdbc").unwrap();
    plugin.enabled = true;
    harness.config.update_plugin_config(plugin);
    harness
        .config
        .update_general_config(GeneralConfig { enabled: false });
    assert!(!harness.services.is_enabled());
}

#[test]
fn unknown_plugin_id_downgrades_to_unbound() {
    let harness = test_harness_with(ConfigService::new(), Some("no-such-plugin"));
    // unbound mode: engine-level enablement, no plugin properties
    assert!(harness.services.is_enabled());
    assert_eq!(harness.services.get_string_property("anything"), "");
    assert!(!harness.services.get_boolean_property("anything"));
    assert_eq!(harness.services.get_double_property("anything"), None);
}

#[test]
fn empty_property_name_falls_back() {
    let harness = test_harness_with_plugin(PluginConfig::new("jdbc"));
    assert_eq!(harness.services.get_string_property(""), "");
    assert!(!harness.services.get_boolean_property(""));
    assert_eq!(harness.services.get_double_property(""), None);
}

struct CountingListener(AtomicUsize);

impl ConfigListener for CountingListener {
    fn on_change(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn registered_listener_sees_plugin_changes() {
    let harness = test_harness_with_plugin(PluginConfig::new("jdbc"));
    let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
    harness.services.register_config_listener(listener.clone());

    let plugin = harness.config.plugin_config("jdbc").unwrap();
    harness.config.update_plugin_config(plugin);
    assert_eq!(listener.0.load(Ordering::SeqCst), 1);
}

#[test]
fn register_listener_without_plugin_is_noop() {
    let harness = test_harness_with(ConfigService::new(), None);
    let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
    harness.services.register_config_listener(listener.clone());
    harness
        .config
        .update_general_config(GeneralConfig { enabled: true });
    // never wired into plugin notifications
    assert_eq!(listener.0.load(Ordering::SeqCst), 0);
}

#[test]
fn max_entries_refreshes_on_advanced_change() {
    let harness = test_harness_with(ConfigService::new(), None);
    let t1 = harness.services.get_timer_name("http request");
    harness.config.update_advanced_config(filament_config::AdvancedConfig {
        max_trace_entries_per_transaction: 1,
        ..Default::default()
    });
    let root = harness.services.start_transaction(
        "Web",
        "GET /",
        filament_core::constant_message("GET /"),
        &t1,
    );
    let entry = harness
        .services
        .start_trace_entry(filament_core::constant_message("child"), &t1);
    assert!(matches!(entry, filament_engine::EntryHandle::Dummy(_)));
    entry.end();
    root.end();
}
