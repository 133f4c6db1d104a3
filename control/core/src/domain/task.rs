// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Task Records
//!
//! A task record is the durable per-`(task, broker)` outcome row of a
//! fan-out attempt, kept for audit and operator-driven retry. Delivery
//! failures are captured here rather than surfaced to the dispatching
//! caller.

use serde::{Deserialize, Serialize};

use super::node::BrokerId;

/// Identifier of one fan-out task (a config/assignment push).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub i64);

/// Identifier of a configuration unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitId(pub i64);

/// Durable delivery-outcome row, keyed by `(task_id, broker_id)`.
///
/// Invariants: `failed == true` implies a non-empty `reason`; `executed`
/// is monotonic and never reset to `false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub broker_id: BrokerId,
    pub executed: bool,
    pub failed: bool,
    pub reason: String,
}

impl TaskRecord {
    /// Fresh record for a pending fan-out target.
    pub fn pending(task_id: TaskId, broker_id: BrokerId) -> Self {
        Self {
            task_id,
            broker_id,
            executed: false,
            failed: false,
            reason: String::new(),
        }
    }
}
