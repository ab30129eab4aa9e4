//! Timer model - named accumulators forming a per-transaction tree
//!
//! Timers nest more finely than trace entries, so the tree keeps its own
//! "current" pointer independent of the entry stack. Nested starts of an
//! already-running timer increment a nesting level on the existing node
//! instead of creating a duplicate sibling; children are keyed by name in an
//! ordered map so merged aggregate trees come out deterministic.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Interned handle identifying one named measurement site.
///
/// Cheap to clone and compare; interned by [`TimerNameCache`] keyed on the
/// identity of the instrumentation advice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerName {
    name: Arc<str>,
    /// Extended timers are secondary measurements a plugin layers on top of
    /// another plugin's entry.
    extended: bool,
}

impl TimerName {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        TimerName {
            name: name.into(),
            extended: false,
        }
    }

    pub fn extended(name: impl Into<Arc<str>>) -> Self {
        TimerName {
            name: name.into(),
            extended: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }
}

impl fmt::Display for TimerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Dedup cache mapping advice identity to its interned [`TimerName`].
#[derive(Debug, Default)]
pub struct TimerNameCache {
    names: DashMap<&'static str, TimerName>,
}

impl TimerNameCache {
    pub fn new() -> Self {
        Self {
            names: DashMap::new(),
        }
    }

    /// Interned timer name for an advice identity. The advice key doubles as
    /// the timer's display name.
    pub fn name_for(&self, advice: &'static str) -> TimerName {
        self.names
            .entry(advice)
            .or_insert_with(|| TimerName::new(advice))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Index of a timer node within its transaction's timer tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub(crate) u32);

#[derive(Debug)]
struct TimerNode {
    name: TimerName,
    total_nanos: u64,
    count: u64,
    /// Tick of the currently running slice; `None` when not running.
    self_start_tick: Option<u64>,
    /// Outstanding starts; slices only close when this returns to zero.
    nesting: u32,
    parent: Option<TimerId>,
    children: BTreeMap<String, TimerId>,
}

/// Per-transaction timer tree.
///
/// Mutated only by the transaction's owning thread; read by snapshot threads
/// under the transaction's lock.
#[derive(Debug)]
pub struct TimerTree {
    nodes: Vec<TimerNode>,
    current: TimerId,
}

const ROOT: TimerId = TimerId(0);

impl TimerTree {
    /// Create the tree with its root timer already running.
    pub fn new(root_name: TimerName, start_tick: u64) -> Self {
        TimerTree {
            nodes: vec![TimerNode {
                name: root_name,
                total_nanos: 0,
                count: 0,
                self_start_tick: Some(start_tick),
                nesting: 1,
                parent: None,
                children: BTreeMap::new(),
            }],
            current: ROOT,
        }
    }

    /// Innermost live timer.
    pub fn current(&self) -> TimerId {
        self.current
    }

    pub fn root(&self) -> TimerId {
        ROOT
    }

    /// Start a timer nested under the current one.
    ///
    /// A child with the same name is reused: if it is already running its
    /// nesting level goes up instead of opening a second slice.
    pub fn start_nested(&mut self, name: &TimerName, start_tick: u64) -> TimerId {
        let parent = self.current;
        // re-entrant start of the timer that is already innermost: bump its
        // nesting level instead of hanging a same-named child off it
        if self.nodes[parent.0 as usize].name.name() == name.name()
            && self.nodes[parent.0 as usize].self_start_tick.is_some()
        {
            self.nodes[parent.0 as usize].nesting += 1;
            return parent;
        }
        let existing = self.nodes[parent.0 as usize]
            .children
            .get(name.name())
            .copied();
        let id = match existing {
            Some(id) => id,
            None => {
                let id = TimerId(self.nodes.len() as u32);
                self.nodes.push(TimerNode {
                    name: name.clone(),
                    total_nanos: 0,
                    count: 0,
                    self_start_tick: None,
                    nesting: 0,
                    parent: Some(parent),
                    children: BTreeMap::new(),
                });
                self.nodes[parent.0 as usize]
                    .children
                    .insert(name.name().to_string(), id);
                id
            }
        };
        let node = &mut self.nodes[id.0 as usize];
        node.nesting += 1;
        if node.nesting == 1 {
            node.self_start_tick = Some(start_tick);
        }
        self.current = id;
        id
    }

    /// Stop a timer slice. The outermost stop of a nested run closes the
    /// slice, accumulates the total and bumps the count.
    pub fn stop(&mut self, id: TimerId, end_tick: u64) {
        let node = &mut self.nodes[id.0 as usize];
        if node.nesting == 0 {
            warn!(timer = %node.name, "stop called on timer that is not running");
            return;
        }
        node.nesting -= 1;
        if node.nesting == 0 {
            if let Some(start) = node.self_start_tick.take() {
                node.total_nanos += end_tick.saturating_sub(start);
            }
            node.count += 1;
            self.current = node.parent.unwrap_or(id);
        }
    }

    /// Stop the root timer at transaction completion. Its total then equals
    /// the transaction duration.
    pub fn stop_root(&mut self, end_tick: u64) {
        self.stop(ROOT, end_tick);
        self.current = ROOT;
    }

    pub fn total_nanos(&self, id: TimerId) -> u64 {
        self.nodes[id.0 as usize].total_nanos
    }

    pub fn count(&self, id: TimerId) -> u64 {
        self.nodes[id.0 as usize].count
    }

    /// Immutable view of the tree.
    ///
    /// With a capture tick, running slices are extended to that tick and
    /// flagged active; this is how snapshots of in-flight transactions
    /// present a consistent picture without stopping anything.
    pub fn snapshot(&self, capture_tick: Option<u64>) -> TimerSnapshot {
        self.snapshot_node(ROOT, capture_tick)
    }

    fn snapshot_node(&self, id: TimerId, capture_tick: Option<u64>) -> TimerSnapshot {
        let node = &self.nodes[id.0 as usize];
        let mut total_nanos = node.total_nanos;
        let mut count = node.count;
        let mut active = false;
        if let (Some(start), Some(capture)) = (node.self_start_tick, capture_tick) {
            total_nanos += capture.saturating_sub(start);
            count += 1;
            active = true;
        }
        TimerSnapshot {
            name: node.name.name().to_string(),
            extended: node.name.is_extended(),
            total_nanos,
            count,
            active,
            nested_timers: node
                .children
                .values()
                .map(|child| self.snapshot_node(*child, capture_tick))
                .collect(),
        }
    }
}

/// Serialized form of one timer node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerSnapshot {
    pub name: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub extended: bool,
    pub total_nanos: u64,
    pub count: u64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nested_timers: Vec<TimerSnapshot>,
}

fn is_false(value: &bool) -> bool {
    !*value
}
