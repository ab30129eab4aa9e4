//! # Filament Engine
//!
//! The application layer of the tracing engine: the registry of live
//! transactions and the instrumentation facade that instrumentation points
//! call on enter/return/throw/after.
//!
//! ## Principles
//!
//! 1. **Never throw into instrumented code**: invalid arguments log and
//!    return no-op sentinels.
//! 2. **Bounded time on the hot path**: no I/O, no locks held across user
//!    code, config reads served from an atomic cache.
//! 3. **Domain types only**: the facade accepts and returns types from
//!    `filament-core`; collectors and schedulers are reached through
//!    `filament-ports` traits.

pub mod facade;
pub mod registry;

pub use facade::{DummyEntry, EntryHandle, LiveEntry, LiveTimer, PluginServices, TimerHandle};
pub use registry::TransactionRegistry;
