//! Configuration model and runtime config service for Filament
//!
//! The engine consumes three config layers: general (master switch),
//! advanced (caps, probe toggles) and per-plugin (enablement + typed
//! properties). [`ConfigService`] holds the live values and notifies
//! registered listeners synchronously on every mutation; the facade caches
//! the hot fields and refreshes them from its listener callback.

pub mod constants;
mod service;
mod types;

pub use constants::DEFAULT_MAX_TRACE_ENTRIES_PER_TRANSACTION;
pub use service::{ConfigListener, ConfigService};
pub use types::{AdvancedConfig, GeneralConfig, PluginConfig, PropertyValue};
