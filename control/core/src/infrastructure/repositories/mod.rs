// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the persistence ports defined in the
//! domain layer.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve fleet aggregates
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! PostgreSQL repositories (production) live in the `postgres_*` modules;
//! the `InMemory*` implementations below are thread-safe `HashMap`-backed
//! stores for development and testing.
//!
//! The in-memory node repository shares state with the in-memory tag
//! repository so that tag-based selection and the primary-set drop behave
//! like their relational counterparts.

pub mod postgres_derived;
pub mod postgres_effect;
pub mod postgres_node;
pub mod postgres_tag;
pub mod postgres_task;

pub use postgres_derived::PostgresDerivedStore;
pub use postgres_effect::PostgresEffectRepository;
pub use postgres_node::PostgresNodeRepository;
pub use postgres_tag::PostgresTagRepository;
pub use postgres_task::PostgresTaskRepository;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use crate::domain::inventory::InventoryRecord;
use crate::domain::node::{BrokerId, Node, NodeCreate, NodeId, NodeSelector, NodeStatus};
use crate::domain::repository::{
    DerivedStore, EffectRepository, NodeRepository, RepositoryError, TagRepository,
    TaskRepository,
};
use crate::domain::tag::{Effect, NodeTag};
use crate::domain::task::{TaskId, TaskRecord, UnitId};

#[derive(Clone, Default)]
pub struct InMemoryTagRepository {
    tags: Arc<RwLock<Vec<NodeTag>>>,
}

impl InMemoryTagRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<NodeTag> {
        self.tags.read().unwrap().clone()
    }

    fn remove_node(&self, node_id: NodeId) {
        self.tags.write().unwrap().retain(|t| t.node_id != node_id);
    }

    fn nodes_with_tag(&self, tag: &str) -> HashSet<NodeId> {
        self.tags
            .read()
            .unwrap()
            .iter()
            .filter(|t| t.tag == tag)
            .map(|t| t.node_id)
            .collect()
    }
}

#[async_trait]
impl TagRepository for InMemoryTagRepository {
    async fn insert_all(&self, tags: &[NodeTag]) -> Result<(), RepositoryError> {
        self.tags.write().unwrap().extend_from_slice(tags);
        Ok(())
    }

    async fn tags_of(&self, node_id: NodeId) -> Result<Vec<String>, RepositoryError> {
        let tags = self.tags.read().unwrap();
        let mut seen = HashSet::new();
        Ok(tags
            .iter()
            .filter(|t| t.node_id == node_id)
            .filter(|t| seen.insert(t.tag.clone()))
            .map(|t| t.tag.clone())
            .collect())
    }

    async fn referenced(&self, wanted: &[String]) -> Result<Vec<String>, RepositoryError> {
        let tags = self.tags.read().unwrap();
        let wanted: HashSet<&String> = wanted.iter().collect();
        let mut seen = HashSet::new();
        Ok(tags
            .iter()
            .filter(|t| wanted.contains(&t.tag))
            .filter(|t| seen.insert(t.tag.clone()))
            .map(|t| t.tag.clone())
            .collect())
    }
}

#[derive(Clone)]
pub struct InMemoryNodeRepository {
    nodes: Arc<RwLock<HashMap<NodeId, Node>>>,
    units: Arc<RwLock<HashMap<UnitId, NodeId>>>,
    tags: InMemoryTagRepository,
    next_id: Arc<AtomicI64>,
}

impl InMemoryNodeRepository {
    /// The tag repository is shared so that tag selection and the
    /// primary-set drop see the same rows a relational store would.
    pub fn new(tags: InMemoryTagRepository) -> Self {
        Self {
            nodes: Arc::new(RwLock::new(HashMap::new())),
            units: Arc::new(RwLock::new(HashMap::new())),
            tags,
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }

    pub fn set_status(&self, id: NodeId, status: NodeStatus) {
        if let Some(node) = self.nodes.write().unwrap().get_mut(&id) {
            node.status = status;
            node.updated_at = Utc::now();
        }
    }

    pub fn assign_broker(&self, id: NodeId, broker: BrokerId) {
        if let Some(node) = self.nodes.write().unwrap().get_mut(&id) {
            node.broker_id = broker;
            node.updated_at = Utc::now();
        }
    }

    pub fn bind_unit(&self, unit: UnitId, node: NodeId) {
        self.units.write().unwrap().insert(unit, node);
    }

    pub fn unit_bound(&self, unit: UnitId) -> bool {
        self.units.read().unwrap().contains_key(&unit)
    }

    fn matches(&self, node: &Node, selector: &NodeSelector) -> bool {
        if !selector.ids.is_empty() && !selector.ids.contains(&node.id) {
            return false;
        }
        if !selector.statuses.is_empty() && !selector.statuses.contains(&node.status) {
            return false;
        }
        if let Some(os) = &selector.os {
            if &node.os != os {
                return false;
            }
        }
        if let Some(arch) = &selector.arch {
            if &node.arch != arch {
                return false;
            }
        }
        if let Some(prefix) = &selector.addr_prefix {
            if !node.addr.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(tag) = &selector.tag {
            if !self.tags.nodes_with_tag(tag).contains(&node.id) {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl NodeRepository for InMemoryNodeRepository {
    async fn insert(&self, create: &NodeCreate) -> Result<NodeId, RepositoryError> {
        let id = NodeId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let now = Utc::now();
        let node = Node {
            id,
            addr: create.addr.clone(),
            os: create.os.clone(),
            arch: create.arch.clone(),
            status: NodeStatus::Offline,
            unload: false,
            broker_id: BrokerId::UNASSIGNED,
            created_at: now,
            updated_at: now,
        };
        self.nodes.write().unwrap().insert(id, node);
        Ok(id)
    }

    async fn find(&self, id: NodeId) -> Result<Option<Node>, RepositoryError> {
        Ok(self.nodes.read().unwrap().get(&id).cloned())
    }

    async fn addr_in_use(&self, addr: &str) -> Result<bool, RepositoryError> {
        Ok(self
            .nodes
            .read()
            .unwrap()
            .values()
            .any(|n| n.addr == addr))
    }

    async fn select_ids(
        &self,
        selector: &NodeSelector,
        exclude: NodeStatus,
        limit: u32,
    ) -> Result<Vec<NodeId>, RepositoryError> {
        let nodes = self.nodes.read().unwrap();
        let mut ids: Vec<NodeId> = nodes
            .values()
            .filter(|n| n.status != exclude)
            .filter(|n| self.matches(n, selector))
            .map(|n| n.id)
            .collect();
        ids.sort();
        ids.truncate(limit as usize);
        Ok(ids)
    }

    async fn mark_status(
        &self,
        ids: &[NodeId],
        status: NodeStatus,
        exclude: NodeStatus,
    ) -> Result<u64, RepositoryError> {
        let mut nodes = self.nodes.write().unwrap();
        let mut changed = 0;
        for id in ids {
            if let Some(node) = nodes.get_mut(id) {
                if node.status != exclude {
                    node.status = status;
                    node.updated_at = Utc::now();
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn set_unload(&self, id: NodeId, unload: bool) -> Result<(), RepositoryError> {
        let mut nodes = self.nodes.write().unwrap();
        let node = nodes
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("node {}", id.0)))?;
        node.unload = unload;
        node.updated_at = Utc::now();
        Ok(())
    }

    async fn drop_primary_set(&self, id: NodeId) -> Result<(), RepositoryError> {
        let mut nodes = self.nodes.write().unwrap();
        if nodes.remove(&id).is_none() {
            return Err(RepositoryError::NotFound(format!("node {}", id.0)));
        }
        self.units.write().unwrap().retain(|_, n| *n != id);
        self.tags.remove_node(id);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryEffectRepository {
    effects: Arc<RwLock<Vec<Effect>>>,
}

impl InMemoryEffectRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, effect: Effect) {
        self.effects.write().unwrap().push(effect);
    }

    pub fn all(&self) -> Vec<Effect> {
        self.effects.read().unwrap().clone()
    }
}

#[async_trait]
impl EffectRepository for InMemoryEffectRepository {
    async fn delete_by_tags(&self, tags: &[String]) -> Result<u64, RepositoryError> {
        let wanted: HashSet<&String> = tags.iter().collect();
        let mut effects = self.effects.write().unwrap();
        let before = effects.len();
        effects.retain(|e| !wanted.contains(&e.tag));
        Ok((before - effects.len()) as u64)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryTaskRepository {
    records: Arc<RwLock<HashMap<(i64, i64), TaskRecord>>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn insert_pending(&self, records: &[TaskRecord]) -> Result<(), RepositoryError> {
        let mut map = self.records.write().unwrap();
        for record in records {
            map.entry((record.task_id.0, record.broker_id.0))
                .or_insert_with(|| record.clone());
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        task_id: TaskId,
        broker_id: BrokerId,
        reason: &str,
    ) -> Result<(), RepositoryError> {
        let mut map = self.records.write().unwrap();
        let record = map
            .entry((task_id.0, broker_id.0))
            .or_insert_with(|| TaskRecord::pending(task_id, broker_id));
        record.executed = true;
        record.failed = true;
        record.reason = reason.to_string();
        Ok(())
    }

    async fn find_by_task(&self, task_id: TaskId) -> Result<Vec<TaskRecord>, RepositoryError> {
        let map = self.records.read().unwrap();
        let mut records: Vec<TaskRecord> = map
            .values()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.broker_id.0);
        Ok(records)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryDerivedStore {
    inventory: Arc<RwLock<HashMap<NodeId, InventoryRecord>>>,
    snapshots: Arc<RwLock<HashSet<NodeId>>>,
}

impl InMemoryDerivedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed fake derived rows for a node (tests).
    pub fn seed_snapshot(&self, node_id: NodeId) {
        self.snapshots.write().unwrap().insert(node_id);
    }

    pub fn has_data(&self, node_id: NodeId) -> bool {
        self.snapshots.read().unwrap().contains(&node_id)
            || self.inventory.read().unwrap().contains_key(&node_id)
    }

    pub fn inventory_of(&self, node_id: NodeId) -> Option<InventoryRecord> {
        self.inventory.read().unwrap().get(&node_id).cloned()
    }
}

#[async_trait]
impl DerivedStore for InMemoryDerivedStore {
    async fn save_inventory(
        &self,
        node_id: NodeId,
        record: &InventoryRecord,
    ) -> Result<(), RepositoryError> {
        self.inventory
            .write()
            .unwrap()
            .insert(node_id, record.clone());
        Ok(())
    }

    async fn purge(&self, node_id: NodeId) {
        self.inventory.write().unwrap().remove(&node_id);
        self.snapshots.write().unwrap().remove(&node_id);
    }
}
