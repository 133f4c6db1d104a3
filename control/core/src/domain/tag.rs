// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Tags and Effects
//!
//! A tag is a string label many-to-many associated with nodes; the tag
//! *value* has a lifetime independent of any single node. An [`Effect`]
//! binds a tag value to a configuration unit and applies to every node
//! currently carrying that tag.
//!
//! A tag value left with zero referencing nodes after a drop is a **wild
//! tag**; wild-tag collection removes every Effect bound to it in the same
//! logical operation as the drop.

use serde::{Deserialize, Serialize};

use super::node::NodeId;
use super::task::UnitId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagKind {
    /// Assigned at registration (address, OS, architecture); never updated,
    /// removed only when the owning node is dropped.
    Lifelong,
    /// Operator-managed, may come and go during the node's life.
    Ephemeral,
}

impl TagKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TagKind::Lifelong => "lifelong",
            TagKind::Ephemeral => "ephemeral",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "lifelong" => Some(TagKind::Lifelong),
            "ephemeral" => Some(TagKind::Ephemeral),
            _ => None,
        }
    }
}

/// One `(tag value, node)` association row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeTag {
    pub tag: String,
    pub node_id: NodeId,
    pub kind: TagKind,
}

impl NodeTag {
    pub fn lifelong(tag: impl Into<String>, node_id: NodeId) -> Self {
        Self {
            tag: tag.into(),
            node_id,
            kind: TagKind::Lifelong,
        }
    }
}

/// The lifelong tag set minted at registration: the canonical address plus,
/// when non-empty, the OS and architecture values.
pub fn lifelong_tags(node_id: NodeId, addr: &str, os: &str, arch: &str) -> Vec<NodeTag> {
    let mut tags = Vec::with_capacity(3);
    tags.push(NodeTag::lifelong(addr, node_id));
    if !os.is_empty() {
        tags.push(NodeTag::lifelong(os, node_id));
    }
    if !arch.is_empty() {
        tags.push(NodeTag::lifelong(arch, node_id));
    }
    tags
}

/// Binding from a tag value to a configuration unit, applied to every node
/// carrying the tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Effect {
    pub id: i64,
    pub tag: String,
    pub unit_id: UnitId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifelong_set_includes_only_non_empty_values() {
        let node = NodeId(7);
        let tags = lifelong_tags(node, "10.1.2.3", "linux", "amd64");
        assert_eq!(tags.len(), 3);
        assert!(tags.iter().all(|t| t.kind == TagKind::Lifelong));
        assert!(tags.iter().all(|t| t.node_id == node));

        let tags = lifelong_tags(node, "10.1.2.3", "", "");
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].tag, "10.1.2.3");

        let tags = lifelong_tags(node, "10.1.2.3", "linux", "");
        assert_eq!(tags.len(), 2);
    }
}
