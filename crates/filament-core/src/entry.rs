//! Trace entry model - the per-transaction tree of recorded operations
//!
//! Entries live in an arena owned by the transaction and are addressed by
//! index, so the tree carries no reference cycles. A parallel stack tracks
//! the open entries; pushes and pops are LIFO from the owning thread.

use crate::message::{ErrorMessage, Message, MessageSupplier};
use crate::stack_trace::CapturedStackTrace;
use crate::timer::TimerId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Index of an entry within its transaction's entry arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(pub(crate) u32);

struct EntryData {
    start_tick: u64,
    end_tick: Option<u64>,
    message: Option<Arc<dyn MessageSupplier>>,
    error: Option<ErrorMessage>,
    stack_trace: Option<CapturedStackTrace>,
    /// Timer owned by this entry, stopped when the entry is popped. Flat
    /// entries (errors, cap-exceeded stragglers) own no timer.
    timer: Option<TimerId>,
    limit_exceeded_marker: bool,
    children: Vec<EntryId>,
}

/// Outcome of a pop, reported back to the facade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopOutcome {
    /// The popped entry was the transaction's root entry.
    pub was_root: bool,
    /// Timer of the popped entry, for the facade to stop.
    pub timer: Option<TimerId>,
    /// Timers of open entries force-ended because the pop was out of order,
    /// innermost first.
    pub forced_timers: Vec<TimerId>,
}

/// Entry arena plus the stack of currently open entries.
pub struct EntryTree {
    entries: Vec<EntryData>,
    /// Open entries, root at the bottom. Empty once the root is popped.
    stack: Vec<EntryId>,
    marker_added: bool,
}

const ROOT: EntryId = EntryId(0);

impl EntryTree {
    /// Create the tree with the transaction's opening entry pushed.
    pub fn new(start_tick: u64, message: Arc<dyn MessageSupplier>, timer: TimerId) -> Self {
        EntryTree {
            entries: vec![EntryData {
                start_tick,
                end_tick: None,
                message: Some(message),
                error: None,
                stack_trace: None,
                timer: Some(timer),
                limit_exceeded_marker: false,
                children: Vec::new(),
            }],
            stack: vec![ROOT],
            marker_added: false,
        }
    }

    pub fn root(&self) -> EntryId {
        ROOT
    }

    /// Depth of the open-entry stack.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Push a new open entry as a child of the innermost open entry.
    pub fn push(
        &mut self,
        start_tick: u64,
        message: Arc<dyn MessageSupplier>,
        timer: TimerId,
    ) -> EntryId {
        let id = EntryId(self.entries.len() as u32);
        self.entries.push(EntryData {
            start_tick,
            end_tick: None,
            message: Some(message),
            error: None,
            stack_trace: None,
            timer: Some(timer),
            limit_exceeded_marker: false,
            children: Vec::new(),
        });
        if let Some(parent) = self.stack.last().copied() {
            self.entries[parent.0 as usize].children.push(id);
        }
        self.stack.push(id);
        id
    }

    /// Pop an open entry, setting its end tick and optional error.
    ///
    /// Pops are expected in LIFO order. When the target is not innermost the
    /// intervening open entries are force-ended at the same tick and a warn
    /// is logged; the stack stays well-formed either way. A pop of an entry
    /// that is not open at all is ignored with a warn.
    pub fn pop(&mut self, id: EntryId, end_tick: u64, error: Option<ErrorMessage>) -> PopOutcome {
        let Some(position) = self.stack.iter().rposition(|open| *open == id) else {
            warn!("end called on entry that is not open");
            return PopOutcome {
                was_root: false,
                timer: None,
                forced_timers: Vec::new(),
            };
        };
        let mut forced_timers = Vec::new();
        if position + 1 < self.stack.len() {
            warn!(
                forced = self.stack.len() - position - 1,
                "entry ended out of order; closing intervening entries"
            );
            while self.stack.len() > position + 1 {
                let intervening = self.stack.pop().expect("stack length checked above");
                let entry = &mut self.entries[intervening.0 as usize];
                entry.end_tick = Some(end_tick);
                forced_timers.extend(entry.timer);
            }
        }
        self.stack.pop();
        let entry = &mut self.entries[id.0 as usize];
        entry.end_tick = Some(end_tick);
        entry.error = error;
        PopOutcome {
            was_root: id == ROOT,
            timer: entry.timer,
            forced_timers,
        }
    }

    /// Append a closed entry under the innermost open entry without touching
    /// the stack. Used for error entries and cap-exceeded stragglers, which
    /// are not necessarily nested properly.
    pub fn add_flat(
        &mut self,
        start_tick: u64,
        end_tick: u64,
        message: Option<Arc<dyn MessageSupplier>>,
        error: Option<ErrorMessage>,
    ) -> EntryId {
        let id = EntryId(self.entries.len() as u32);
        self.entries.push(EntryData {
            start_tick,
            end_tick: Some(end_tick),
            message,
            error,
            stack_trace: None,
            timer: None,
            limit_exceeded_marker: false,
            children: Vec::new(),
        });
        let parent = self.stack.last().copied().unwrap_or(ROOT);
        self.entries[parent.0 as usize].children.push(id);
        id
    }

    /// Add the single limit-exceeded marker entry. Idempotent; returns
    /// whether the marker was added by this call.
    pub fn add_limit_exceeded_marker(&mut self, tick: u64) -> bool {
        if self.marker_added {
            return false;
        }
        self.marker_added = true;
        let id = self.add_flat(tick, tick, None, None);
        self.entries[id.0 as usize].limit_exceeded_marker = true;
        true
    }

    pub fn set_stack_trace(&mut self, id: EntryId, stack_trace: CapturedStackTrace) {
        self.entries[id.0 as usize].stack_trace = Some(stack_trace);
    }

    pub fn start_tick(&self, id: EntryId) -> u64 {
        self.entries[id.0 as usize].start_tick
    }

    pub fn message(&self, id: EntryId) -> Option<Arc<dyn MessageSupplier>> {
        self.entries[id.0 as usize].message.clone()
    }

    /// Total entries in the arena, markers included.
    pub fn stored_count(&self) -> usize {
        self.entries.len()
    }

    /// Immutable view of the tree; message suppliers are evaluated here,
    /// never earlier.
    pub fn snapshot(&self) -> EntrySnapshot {
        self.snapshot_node(ROOT)
    }

    fn snapshot_node(&self, id: EntryId) -> EntrySnapshot {
        let entry = &self.entries[id.0 as usize];
        EntrySnapshot {
            start_tick: entry.start_tick,
            end_tick: entry.end_tick,
            message: entry.message.as_ref().map(|supplier| supplier.get()),
            error: entry.error.clone(),
            stack_trace: entry.stack_trace.clone(),
            limit_exceeded_marker: entry.limit_exceeded_marker,
            children: entry
                .children
                .iter()
                .map(|child| self.snapshot_node(*child))
                .collect(),
        }
    }
}

/// Serialized form of one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySnapshot {
    pub start_tick: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_tick: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<CapturedStackTrace>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub limit_exceeded_marker: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<EntrySnapshot>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl EntrySnapshot {
    /// Entries in this subtree, self included.
    pub fn total_count(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(EntrySnapshot::total_count)
            .sum::<usize>()
    }
}
