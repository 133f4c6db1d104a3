// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Dispatch Contracts
//!
//! Typed contracts between the control plane and the external relay
//! connection registry:
//!
//! - [`Opcode`] — closed enumeration of every operation the control plane
//!   may push to a relay. One fixed value per operation; no reflective
//!   dispatch anywhere.
//! - Request payloads — serde structs paired with their opcode.
//! - [`Frame`] — `(opcode, opaque payload)` unit handed to the registry.
//!   The wire encoding beyond this pair is the transport's business.
//! - [`BrokerRegistry`] — the port the registry must implement. The
//!   registry owns connections and heartbeats; this crate only holds
//!   [`BrokerId`](super::node::BrokerId) values.
//! - [`DispatchOutcome`] — transient per-target fan-out result, consumed
//!   once by the command dispatcher.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::node::{BrokerId, NodeId};
use super::task::{TaskId, UnitId};

/// Every operation a relay can receive, checked exhaustively at compile
/// time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Opcode {
    /// Fan out a task assignment table; the only opcode with durable
    /// per-target bookkeeping.
    TaskTable,
    /// Ask one relay to resynchronize its view of a node's task set.
    TaskSync,
    /// Ask one relay to reload a single configuration unit on a node.
    TaskDiff,
    Startup,
    Upgrade,
    Command,
    CacheReset,
    SearchReset,
    StoreReset,
    NotifierReset,
    ExtensionDiff,
}

impl Opcode {
    pub fn as_str(self) -> &'static str {
        match self {
            Opcode::TaskTable => "task.table",
            Opcode::TaskSync => "task.sync",
            Opcode::TaskDiff => "task.diff",
            Opcode::Startup => "node.startup",
            Opcode::Upgrade => "node.upgrade",
            Opcode::Command => "node.command",
            Opcode::CacheReset => "reset.cache",
            Opcode::SearchReset => "reset.search",
            Opcode::StoreReset => "reset.store",
            Opcode::NotifierReset => "reset.notifier",
            Opcode::ExtensionDiff => "extension.diff",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTableRequest {
    pub task_id: TaskId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSyncRequest {
    pub node_id: NodeId,
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDiffRequest {
    pub node_id: NodeId,
    pub unit_id: UnitId,
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupRequest {
    pub node_id: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeRequest {
    pub node_id: NodeId,
    pub semver: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub node_id: NodeId,
    pub cmd: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreResetRequest {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionEvent {
    Update,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionDiffRequest {
    pub name: String,
    pub event: ExtensionEvent,
}

/// One dispatch unit: an opcode plus its already-encoded payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub opcode: Opcode,
    pub payload: serde_json::Value,
}

impl Frame {
    pub fn new<T: Serialize>(opcode: Opcode, payload: &T) -> Result<Self, DeliveryError> {
        let payload = serde_json::to_value(payload)
            .map_err(|e| DeliveryError::Encoding(e.to_string()))?;
        Ok(Self { opcode, payload })
    }

    /// Frame with no payload body (the reset broadcasts).
    pub fn empty(opcode: Opcode) -> Self {
        Self {
            opcode,
            payload: serde_json::Value::Null,
        }
    }
}

/// Per-target delivery failure. Never fatal to the dispatching operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("broker is not connected")]
    NotConnected,

    #[error("delivery timed out")]
    Timeout,

    #[error("payload encoding failed: {0}")]
    Encoding(String),

    #[error("broker reported failure: {0}")]
    Remote(String),
}

/// Transient per-target fan-out result. Produced by the dispatch gateway,
/// consumed exactly once by the command dispatcher; never persisted as-is.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub broker_id: BrokerId,
    pub error: Option<DeliveryError>,
}

impl DispatchOutcome {
    pub fn ok(broker_id: BrokerId) -> Self {
        Self {
            broker_id,
            error: None,
        }
    }

    pub fn failed(broker_id: BrokerId, error: DeliveryError) -> Self {
        Self {
            broker_id,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Port onto the external relay connection registry.
///
/// Implementations own the live connections; membership may change
/// concurrently with in-flight dispatch. `deliver` resolves once the relay
/// acknowledged the frame or the connection failed — it must not block
/// forever on a target that disconnects mid-flight.
#[async_trait]
pub trait BrokerRegistry: Send + Sync {
    fn contains(&self, id: BrokerId) -> bool;

    /// Snapshot of the currently connected relay identities.
    fn connected(&self) -> Vec<BrokerId>;

    async fn deliver(&self, id: BrokerId, frame: Frame) -> Result<(), DeliveryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_wire_names_are_distinct() {
        let all = [
            Opcode::TaskTable,
            Opcode::TaskSync,
            Opcode::TaskDiff,
            Opcode::Startup,
            Opcode::Upgrade,
            Opcode::Command,
            Opcode::CacheReset,
            Opcode::SearchReset,
            Opcode::StoreReset,
            Opcode::NotifierReset,
            Opcode::ExtensionDiff,
        ];
        let names: std::collections::HashSet<_> = all.iter().map(|o| o.as_str()).collect();
        assert_eq!(names.len(), all.len());
    }

    #[test]
    fn frame_encodes_typed_payloads() {
        let frame = Frame::new(
            Opcode::TaskSync,
            &TaskSyncRequest {
                node_id: NodeId(5),
                addr: "10.0.0.5".to_string(),
            },
        )
        .unwrap();
        assert_eq!(frame.opcode, Opcode::TaskSync);
        assert_eq!(frame.payload["addr"], "10.0.0.5");
        assert_eq!(frame.payload["node_id"], 5);
    }
}
