//! Stack-sampling profile trees
//!
//! A profile is a tree of stack frames with sample counts, built by the
//! user-profile scheduler sampling a transaction's thread and merged into
//! aggregates by frame identity.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One node in a profile tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileNode {
    pub sample_count: u64,
    children: BTreeMap<String, ProfileNode>,
}

impl ProfileNode {
    pub fn children(&self) -> impl Iterator<Item = (&str, &ProfileNode)> {
        self.children
            .iter()
            .map(|(frame, node)| (frame.as_str(), node))
    }
}

/// A stack-sampling profile rooted at a synthetic node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    root: ProfileNode,
    sample_count: u64,
}

impl Profile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn root(&self) -> &ProfileNode {
        &self.root
    }

    /// Fold one sampled stack into the tree, outermost frame first.
    pub fn add_sample<S: AsRef<str>>(&mut self, stack: &[S]) {
        self.sample_count += 1;
        self.root.sample_count += 1;
        let mut node = &mut self.root;
        for frame in stack {
            node = node
                .children
                .entry(frame.as_ref().to_string())
                .or_default();
            node.sample_count += 1;
        }
    }

    /// Merge another profile into this one by frame identity.
    pub fn merge(&mut self, other: &Profile) {
        self.sample_count += other.sample_count;
        merge_node(&mut self.root, &other.root);
    }

    /// Serializable view of the tree.
    pub fn snapshot(&self) -> ProfileSnapshot {
        snapshot_node("", &self.root)
    }
}

fn merge_node(target: &mut ProfileNode, source: &ProfileNode) {
    target.sample_count += source.sample_count;
    for (frame, child) in &source.children {
        merge_node(target.children.entry(frame.clone()).or_default(), child);
    }
}

fn snapshot_node(frame: &str, node: &ProfileNode) -> ProfileSnapshot {
    ProfileSnapshot {
        frame: frame.to_string(),
        sample_count: node.sample_count,
        children: node
            .children
            .iter()
            .map(|(child_frame, child)| snapshot_node(child_frame, child))
            .collect(),
    }
}

/// Serialized form of a profile node; the root carries an empty frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    pub frame: String,
    pub sample_count: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ProfileSnapshot>,
}
