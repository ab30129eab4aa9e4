//! Configuration types for the tracing engine
//!
//! Three layers: general (the master enablement switch), advanced (caps and
//! probe toggles) and per-plugin (enablement plus a typed property bag).
//! Parsing config files is a host concern; these are the in-memory types the
//! engine consumes.

use crate::constants::{
    DEFAULT_CAPTURE_GC_INFO, DEFAULT_CAPTURE_THREAD_INFO,
    DEFAULT_MAX_TRACE_ENTRIES_PER_TRANSACTION,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-level engine switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig { enabled: true }
    }
}

/// Caps and probe toggles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvancedConfig {
    #[serde(default = "default_max_trace_entries")]
    pub max_trace_entries_per_transaction: usize,
    #[serde(default = "default_true")]
    pub capture_thread_info: bool,
    #[serde(default = "default_true")]
    pub capture_gc_info: bool,
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        AdvancedConfig {
            max_trace_entries_per_transaction: DEFAULT_MAX_TRACE_ENTRIES_PER_TRANSACTION,
            capture_thread_info: DEFAULT_CAPTURE_THREAD_INFO,
            capture_gc_info: DEFAULT_CAPTURE_GC_INFO,
        }
    }
}

/// A typed plugin property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Boolean(bool),
    Double(f64),
    String(String),
}

/// Per-plugin configuration: enablement plus a property bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

impl PluginConfig {
    pub fn new(id: impl Into<String>) -> Self {
        PluginConfig {
            id: id.into(),
            enabled: true,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    /// String property; empty string when absent or differently typed.
    pub fn string_property(&self, name: &str) -> String {
        match self.properties.get(name) {
            Some(PropertyValue::String(value)) => value.clone(),
            _ => String::new(),
        }
    }

    /// Boolean property; false when absent or differently typed.
    pub fn boolean_property(&self, name: &str) -> bool {
        matches!(self.properties.get(name), Some(PropertyValue::Boolean(true)))
    }

    /// Double property; `None` when absent or differently typed.
    pub fn double_property(&self, name: &str) -> Option<f64> {
        match self.properties.get(name) {
            Some(PropertyValue::Double(value)) => Some(*value),
            _ => None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_trace_entries() -> usize {
    DEFAULT_MAX_TRACE_ENTRIES_PER_TRANSACTION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert!(GeneralConfig::default().enabled);
        let advanced = AdvancedConfig::default();
        assert_eq!(advanced.max_trace_entries_per_transaction, 2000);
        assert!(advanced.capture_thread_info);
        assert!(advanced.capture_gc_info);
    }

    #[test]
    fn test_plugin_property_accessors() {
        let config = PluginConfig::new("servlet")
            .with_property("traceUserAgent", PropertyValue::Boolean(true))
            .with_property("sessionAttribute", PropertyValue::String("userId".into()))
            .with_property("slowThreshold", PropertyValue::Double(1.5));
        assert!(config.boolean_property("traceUserAgent"));
        assert_eq!(config.string_property("sessionAttribute"), "userId");
        assert_eq!(config.double_property("slowThreshold"), Some(1.5));
        // absent or differently typed fall back
        assert!(!config.boolean_property("missing"));
        assert_eq!(config.string_property("slowThreshold"), "");
        assert_eq!(config.double_property("sessionAttribute"), None);
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = PluginConfig::new("jdbc")
            .with_property("captureBindParameters", PropertyValue::Boolean(true));
        let json = serde_json::to_string(&config).unwrap();
        let back: PluginConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
