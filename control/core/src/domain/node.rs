// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Node Aggregate (Fleet Context)
//!
//! Defines the managed node ("minion") aggregate and its lifecycle state
//! machine:
//!
//! - [`Node`] — aggregate root, one row per managed endpoint agent.
//! - [`NodeId`] / [`BrokerId`] — opaque integer identity newtypes.
//! - [`NodeStatus`] — `Offline → Online → Inactive`, any of which may be
//!   bulk-marked `Delete`; row removal is only reachable from `Delete`.
//! - [`NodeSelector`] — set-based filter for bulk status transitions.
//!
//! A node references its relay gateway by [`BrokerId`] value only; it never
//! owns the connection, so a relay disconnecting cannot dangle a node row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};

/// Unique identifier for a managed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub i64);

/// Identity of a relay gateway ("broker") in the external connection
/// registry. `BrokerId(0)` means the node has no assigned relay yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BrokerId(pub i64);

impl BrokerId {
    pub const UNASSIGNED: BrokerId = BrokerId(0);

    pub fn is_unassigned(self) -> bool {
        self.0 == 0
    }
}

/// Lifecycle states of a node. `Delete` is a tombstone: the row still exists
/// and can be retried until it is dropped for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Offline,
    Online,
    Inactive,
    Delete,
}

impl NodeStatus {
    /// Whether relay-facing operations (upgrade, command, unload) may target
    /// a node in this state.
    pub fn is_operable(self) -> bool {
        !matches!(self, NodeStatus::Delete | NodeStatus::Inactive)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Offline => "offline",
            NodeStatus::Online => "online",
            NodeStatus::Inactive => "inactive",
            NodeStatus::Delete => "delete",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "offline" => Some(NodeStatus::Offline),
            "online" => Some(NodeStatus::Online),
            "inactive" => Some(NodeStatus::Inactive),
            "delete" => Some(NodeStatus::Delete),
            _ => None,
        }
    }
}

/// Aggregate root for a managed endpoint agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Canonical unicast address, globally unique among non-dropped nodes.
    pub addr: String,
    pub os: String,
    pub arch: String,
    pub status: NodeStatus,
    /// When set, the relay withholds task material from this node.
    pub unload: bool,
    pub broker_id: BrokerId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Registration input for a new node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCreate {
    pub addr: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub arch: String,
}

/// Set-based node filter used by bulk operations.
///
/// An empty selector matches nothing on purpose: unconditioned bulk deletes
/// are rejected before any row is touched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeSelector {
    #[serde(default)]
    pub ids: Vec<NodeId>,
    #[serde(default)]
    pub statuses: Vec<NodeStatus>,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub arch: Option<String>,
    /// Matches nodes carrying this tag value.
    #[serde(default)]
    pub tag: Option<String>,
    /// Prefix match on the canonical address.
    #[serde(default)]
    pub addr_prefix: Option<String>,
}

impl NodeSelector {
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
            && self.statuses.is_empty()
            && self.os.is_none()
            && self.arch.is_none()
            && self.tag.is_none()
            && self.addr_prefix.is_none()
    }
}

/// Parse and canonicalize a node address.
///
/// Returns `None` for anything that is not a routable unicast address:
/// unparseable input, loopback, the unspecified address, and the IPv4
/// broadcast address.
pub fn canonical_addr(raw: &str) -> Option<String> {
    let ip: IpAddr = raw.trim().parse().ok()?;
    if ip.is_loopback() || ip.is_unspecified() || ip == IpAddr::V4(Ipv4Addr::BROADCAST) {
        return None;
    }
    Some(ip.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_addr_accepts_routable_unicast() {
        assert_eq!(canonical_addr("192.168.1.2"), Some("192.168.1.2".to_string()));
        assert_eq!(canonical_addr(" 10.0.0.7 "), Some("10.0.0.7".to_string()));
        assert_eq!(
            canonical_addr("2001:db8::1"),
            Some("2001:db8::1".to_string())
        );
    }

    #[test]
    fn canonical_addr_rejects_special_addresses() {
        assert_eq!(canonical_addr("127.0.0.1"), None);
        assert_eq!(canonical_addr("::1"), None);
        assert_eq!(canonical_addr("0.0.0.0"), None);
        assert_eq!(canonical_addr("::"), None);
        assert_eq!(canonical_addr("255.255.255.255"), None);
        assert_eq!(canonical_addr("not-an-ip"), None);
        assert_eq!(canonical_addr(""), None);
    }

    #[test]
    fn canonical_addr_normalizes_ipv6_form() {
        assert_eq!(
            canonical_addr("2001:0db8:0000:0000:0000:0000:0000:0001"),
            Some("2001:db8::1".to_string())
        );
    }

    #[test]
    fn empty_selector_is_detected() {
        assert!(NodeSelector::default().is_empty());
        let sel = NodeSelector {
            os: Some("linux".to_string()),
            ..NodeSelector::default()
        };
        assert!(!sel.is_empty());
    }

    #[test]
    fn operable_states() {
        assert!(NodeStatus::Offline.is_operable());
        assert!(NodeStatus::Online.is_operable());
        assert!(!NodeStatus::Inactive.is_operable());
        assert!(!NodeStatus::Delete.is_operable());
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            NodeStatus::Offline,
            NodeStatus::Online,
            NodeStatus::Inactive,
            NodeStatus::Delete,
        ] {
            assert_eq!(NodeStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(NodeStatus::from_str("dropped"), None);
    }
}
