// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for the fleet aggregates, one repository per
//! aggregate root, interface defined here and implemented in
//! `crate::infrastructure::repositories`.
//!
//! | Trait | Rows | Implementations |
//! |-------|------|-----------------|
//! | `NodeRepository` | `nodes` | `InMemoryNodeRepository`, `PostgresNodeRepository` |
//! | `TagRepository` | `node_tags` | `InMemoryTagRepository`, `PostgresTagRepository` |
//! | `EffectRepository` | `effects` | `InMemoryEffectRepository`, `PostgresEffectRepository` |
//! | `TaskRepository` | `task_records` | `InMemoryTaskRepository`, `PostgresTaskRepository` |
//! | `DerivedStore` | denormalized mirrors | `InMemoryDerivedStore`, `PostgresDerivedStore` |
//!
//! Storage handles are passed explicitly into every implementation — there
//! is no process-wide default store, so every operation can be run against
//! a test double.

use async_trait::async_trait;

use super::inventory::InventoryRecord;
use super::node::{BrokerId, Node, NodeCreate, NodeId, NodeSelector, NodeStatus};
use super::tag::NodeTag;
use super::task::{TaskId, TaskRecord};

/// Repository interface for node aggregates.
#[async_trait]
pub trait NodeRepository: Send + Sync {
    /// Insert a new node with `Offline` status and no assigned relay.
    /// The store assigns the identity.
    async fn insert(&self, create: &NodeCreate) -> Result<NodeId, RepositoryError>;

    async fn find(&self, id: NodeId) -> Result<Option<Node>, RepositoryError>;

    /// Whether a non-dropped node already holds this canonical address.
    async fn addr_in_use(&self, addr: &str) -> Result<bool, RepositoryError>;

    /// Select up to `limit` node identities matching `selector` whose status
    /// is not `exclude`, in ascending id order.
    async fn select_ids(
        &self,
        selector: &NodeSelector,
        exclude: NodeStatus,
        limit: u32,
    ) -> Result<Vec<NodeId>, RepositoryError>;

    /// Bulk status write over an explicit id batch, skipping rows already
    /// in `exclude`. Returns the number of rows changed.
    async fn mark_status(
        &self,
        ids: &[NodeId],
        status: NodeStatus,
        exclude: NodeStatus,
    ) -> Result<u64, RepositoryError>;

    async fn set_unload(&self, id: NodeId, unload: bool) -> Result<(), RepositoryError>;

    /// Delete the node's primary consistency set — its tag rows, its
    /// configuration-unit bindings, and the node row itself — in one atomic
    /// unit of work. Either everything is gone or nothing is.
    async fn drop_primary_set(&self, id: NodeId) -> Result<(), RepositoryError>;
}

/// Repository interface for tag rows.
#[async_trait]
pub trait TagRepository: Send + Sync {
    async fn insert_all(&self, tags: &[NodeTag]) -> Result<(), RepositoryError>;

    /// Distinct tag values held by one node.
    async fn tags_of(&self, node_id: NodeId) -> Result<Vec<String>, RepositoryError>;

    /// Which of `tags` are still referenced by any remaining node.
    async fn referenced(&self, tags: &[String]) -> Result<Vec<String>, RepositoryError>;
}

/// Repository interface for tag-keyed configuration bindings.
#[async_trait]
pub trait EffectRepository: Send + Sync {
    /// Remove every Effect bound to one of the given (wild) tag values.
    /// Returns the number of bindings removed.
    async fn delete_by_tags(&self, tags: &[String]) -> Result<u64, RepositoryError>;
}

/// Repository interface for durable fan-out outcome rows.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Seed pending records for a fan-out, one per target. Existing rows
    /// are left untouched (`executed` is monotonic).
    async fn insert_pending(&self, records: &[TaskRecord]) -> Result<(), RepositoryError>;

    /// Record a delivery failure: sets `executed = true`, `failed = true`
    /// and the reason on the `(task, broker)` row.
    async fn mark_failed(
        &self,
        task_id: TaskId,
        broker_id: BrokerId,
        reason: &str,
    ) -> Result<(), RepositoryError>;

    async fn find_by_task(&self, task_id: TaskId) -> Result<Vec<TaskRecord>, RepositoryError>;
}

/// Store for denormalized rows derived from node data: the inventory
/// mirror, process/listener/account/group snapshots, historical events and
/// risk findings, task history, and component/vulnerability snapshots.
///
/// These are caches of primary data. `purge` is deliberately infallible:
/// each underlying table is cleaned independently and failures are logged,
/// never propagated — late or partial cleanup costs staleness, not
/// correctness.
#[async_trait]
pub trait DerivedStore: Send + Sync {
    async fn save_inventory(
        &self,
        node_id: NodeId,
        record: &InventoryRecord,
    ) -> Result<(), RepositoryError>;

    /// Best-effort removal of every derived row referencing the node.
    async fn purge(&self, node_id: NodeId);
}

/// Repository errors.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
