// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Node Lifecycle Engine
//!
//! Owns the minion state machine: registration, bounded bulk soft-delete,
//! the cascading drop with wild-tag collection, and the status-gated relay
//! operations. Calls the command dispatcher to notify relays of relevant
//! transitions.
//!
//! ## Drop consistency model
//!
//! `drop_node` deletes the primary consistency set (tag rows, unit
//! bindings, node row) in one atomic unit of work; everything after that —
//! derived-row cleanup and wild-tag collection — runs outside the
//! transaction and is individually best-effort. A crash between the
//! primary delete and the secondary passes leaves only stale denormalized
//! rows, never an orphaned primary record.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::error::LifecycleError;
use crate::domain::inventory::InventorySource;
use crate::domain::node::{canonical_addr, NodeCreate, NodeId, NodeSelector, NodeStatus};
use crate::domain::repository::{
    DerivedStore, EffectRepository, NodeRepository, TagRepository,
};
use crate::domain::tag::lifelong_tags;

use super::pusher::Pusher;

/// Row cap per soft-delete round.
const SOFT_DELETE_BATCH: u32 = 100;
/// Round cap per soft-delete invocation; together with the batch size this
/// bounds one call at 10,000 rows.
const SOFT_DELETE_ROUNDS: u32 = 100;

#[async_trait]
pub trait NodeLifecycleService: Send + Sync {
    /// Register a node. On success the node is `Offline`, unassigned, and
    /// carries its lifelong tags.
    async fn create(&self, req: NodeCreate) -> Result<NodeId, LifecycleError>;

    /// Mark every node matching `selector` as `Delete`, in rounds of at
    /// most 100 rows, stopping after 100 rounds. Not transactional across
    /// rounds; partial progress on breaker exhaustion is fine and the
    /// caller may re-invoke. Returns the number of rows transitioned.
    async fn soft_delete(&self, selector: NodeSelector) -> Result<u64, LifecycleError>;

    /// Hard-remove a node previously marked `Delete`, cascading over its
    /// primary set, derived rows, and wild tags.
    async fn drop_node(&self, id: NodeId) -> Result<(), LifecycleError>;

    async fn upgrade(&self, id: NodeId, semver: &str) -> Result<(), LifecycleError>;

    async fn command(&self, id: NodeId, cmd: &str) -> Result<(), LifecycleError>;

    /// Persist the unload flag and, only on a genuine flip, ask the
    /// assigned relay to resynchronize the node's task set. Requesting the
    /// current value is a successful no-op with no dispatch.
    async fn unload(&self, id: NodeId, unload: bool) -> Result<(), LifecycleError>;
}

pub struct StandardNodeLifecycleService {
    nodes: Arc<dyn NodeRepository>,
    tags: Arc<dyn TagRepository>,
    effects: Arc<dyn EffectRepository>,
    derived: Arc<dyn DerivedStore>,
    pusher: Arc<dyn Pusher>,
    inventory: Arc<dyn InventorySource>,
}

impl StandardNodeLifecycleService {
    pub fn new(
        nodes: Arc<dyn NodeRepository>,
        tags: Arc<dyn TagRepository>,
        effects: Arc<dyn EffectRepository>,
        derived: Arc<dyn DerivedStore>,
        pusher: Arc<dyn Pusher>,
        inventory: Arc<dyn InventorySource>,
    ) -> Self {
        Self {
            nodes,
            tags,
            effects,
            derived,
            pusher,
            inventory,
        }
    }

    /// Wild-tag collection: of the tag values the node held before the
    /// drop, delete every Effect bound to a value no remaining node
    /// references. Runs outside the primary transaction; failures are
    /// logged and swallowed — Effects only ever reference derived
    /// applicability, so a missed pass costs staleness, not correctness.
    async fn collect_wild_tags(&self, id: NodeId, held: Vec<String>) {
        if held.is_empty() {
            return;
        }
        let still = match self.tags.referenced(&held).await {
            Ok(still) => still,
            Err(e) => {
                warn!(node = id.0, error = %e, "wild tag scan failed");
                return;
            }
        };
        let still: HashSet<String> = still.into_iter().collect();
        let wild: Vec<String> = held.into_iter().filter(|t| !still.contains(t)).collect();
        if wild.is_empty() {
            return;
        }
        match self.effects.delete_by_tags(&wild).await {
            Ok(n) => info!(node = id.0, wild = wild.len(), effects = n, "wild tags collected"),
            Err(e) => warn!(node = id.0, error = %e, "wild tag effect cleanup failed"),
        }
    }
}

#[async_trait]
impl NodeLifecycleService for StandardNodeLifecycleService {
    async fn create(&self, req: NodeCreate) -> Result<NodeId, LifecycleError> {
        let addr = canonical_addr(&req.addr).ok_or(LifecycleError::InvalidAddress)?;
        if self.nodes.addr_in_use(&addr).await? {
            return Err(LifecycleError::AddressExists(addr));
        }

        let create = NodeCreate {
            addr: addr.clone(),
            os: req.os,
            arch: req.arch,
        };
        let id = self.nodes.insert(&create).await?;

        let tags = lifelong_tags(id, &create.addr, &create.os, &create.arch);
        if let Err(e) = self.tags.insert_all(&tags).await {
            warn!(node = id.0, error = %e, "lifelong tag creation failed");
        }

        // Enrichment is fire-and-forget: the registration result must not
        // depend on the external inventory service.
        let inventory = Arc::clone(&self.inventory);
        let derived = Arc::clone(&self.derived);
        tokio::spawn(async move {
            match inventory.fetch(&addr).await {
                Ok(record) => {
                    if let Err(e) = derived.save_inventory(id, &record).await {
                        debug!(node = id.0, error = %e, "inventory mirror write failed");
                    }
                }
                Err(e) => debug!(node = id.0, error = %e, "inventory lookup failed"),
            }
        });

        info!(node = id.0, addr = %create.addr, "node registered");
        Ok(id)
    }

    async fn soft_delete(&self, selector: NodeSelector) -> Result<u64, LifecycleError> {
        if selector.is_empty() {
            return Err(LifecycleError::MissingSelector);
        }

        let mut total = 0u64;
        for _ in 0..SOFT_DELETE_ROUNDS {
            let ids = self
                .nodes
                .select_ids(&selector, NodeStatus::Delete, SOFT_DELETE_BATCH)
                .await?;
            if ids.is_empty() {
                break;
            }
            total += self
                .nodes
                .mark_status(&ids, NodeStatus::Delete, NodeStatus::Delete)
                .await?;
            // TODO: notify the assigned relays that this batch went offline.
        }

        info!(rows = total, "bulk soft delete finished");
        Ok(total)
    }

    async fn drop_node(&self, id: NodeId) -> Result<(), LifecycleError> {
        let node = self.nodes.find(id).await?.ok_or(LifecycleError::NotFound)?;
        if node.status != NodeStatus::Delete {
            return Err(LifecycleError::InvalidState);
        }

        // Snapshot the held tag values before they go away with the
        // primary set.
        let held = self.tags.tags_of(id).await?;

        self.nodes.drop_primary_set(id).await?;

        self.derived.purge(id).await;
        self.collect_wild_tags(id, held).await;

        info!(node = id.0, addr = %node.addr, "node dropped");
        Ok(())
    }

    async fn upgrade(&self, id: NodeId, semver: &str) -> Result<(), LifecycleError> {
        let node = self.nodes.find(id).await?.ok_or(LifecycleError::NotFound)?;
        if !node.status.is_operable() {
            return Err(LifecycleError::InvalidState);
        }
        self.pusher.upgrade(node.broker_id, id, semver).await;
        Ok(())
    }

    async fn command(&self, id: NodeId, cmd: &str) -> Result<(), LifecycleError> {
        let node = self.nodes.find(id).await?.ok_or(LifecycleError::NotFound)?;
        if !node.status.is_operable() {
            return Err(LifecycleError::InvalidState);
        }
        self.pusher.command(node.broker_id, id, cmd).await;
        Ok(())
    }

    async fn unload(&self, id: NodeId, unload: bool) -> Result<(), LifecycleError> {
        let node = self.nodes.find(id).await?.ok_or(LifecycleError::NotFound)?;
        if !node.status.is_operable() {
            return Err(LifecycleError::InvalidState);
        }
        if node.unload == unload {
            return Ok(());
        }

        self.nodes.set_unload(id, unload).await?;
        self.pusher.task_sync(node.broker_id, id, &node.addr).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::inventory::InventoryRecord;
    use crate::domain::node::BrokerId;
    use crate::domain::tag::{Effect, TagKind};
    use crate::domain::task::{TaskId, UnitId};
    use crate::infrastructure::repositories::{
        InMemoryDerivedStore, InMemoryEffectRepository, InMemoryNodeRepository,
        InMemoryTagRepository, InMemoryTaskRepository,
    };
    use std::sync::Mutex;

    /// Records every dispatch instead of touching a gateway.
    #[derive(Default)]
    struct RecordingPusher {
        task_syncs: Mutex<Vec<(BrokerId, NodeId, String)>>,
        upgrades: Mutex<Vec<(BrokerId, NodeId, String)>>,
        commands: Mutex<Vec<(BrokerId, NodeId, String)>>,
    }

    #[async_trait]
    impl Pusher for RecordingPusher {
        async fn task_table(&self, _task_id: TaskId, _brokers: Vec<BrokerId>) {}

        async fn task_sync(&self, broker: BrokerId, node: NodeId, addr: &str) {
            self.task_syncs
                .lock()
                .unwrap()
                .push((broker, node, addr.to_string()));
        }

        async fn task_diff(&self, _broker: BrokerId, _node: NodeId, _unit: UnitId, _addr: &str) {}

        async fn startup(&self, _broker: BrokerId, _node: NodeId) {}

        async fn upgrade(&self, broker: BrokerId, node: NodeId, semver: &str) {
            self.upgrades
                .lock()
                .unwrap()
                .push((broker, node, semver.to_string()));
        }

        async fn command(&self, broker: BrokerId, node: NodeId, cmd: &str) {
            self.commands
                .lock()
                .unwrap()
                .push((broker, node, cmd.to_string()));
        }

        async fn cache_reset(&self) {}
        async fn search_reset(&self) {}
        async fn store_reset(&self, _id: &str) {}
        async fn notifier_reset(&self) {}
        async fn extension_update(&self, _name: &str) {}
        async fn extension_delete(&self, _name: &str) {}
    }

    struct NullInventory;

    #[async_trait]
    impl InventorySource for NullInventory {
        async fn fetch(&self, _addr: &str) -> anyhow::Result<InventoryRecord> {
            Ok(InventoryRecord::default())
        }
    }

    struct Fixture {
        service: StandardNodeLifecycleService,
        nodes: Arc<InMemoryNodeRepository>,
        tags: InMemoryTagRepository,
        effects: Arc<InMemoryEffectRepository>,
        derived: Arc<InMemoryDerivedStore>,
        pusher: Arc<RecordingPusher>,
    }

    fn fixture() -> Fixture {
        let tags = InMemoryTagRepository::new();
        let nodes = Arc::new(InMemoryNodeRepository::new(tags.clone()));
        let effects = Arc::new(InMemoryEffectRepository::new());
        let derived = Arc::new(InMemoryDerivedStore::new());
        let pusher = Arc::new(RecordingPusher::default());
        let service = StandardNodeLifecycleService::new(
            nodes.clone(),
            Arc::new(tags.clone()),
            effects.clone(),
            derived.clone(),
            pusher.clone(),
            Arc::new(NullInventory),
        );
        Fixture {
            service,
            nodes,
            tags,
            effects,
            derived,
            pusher,
        }
    }

    fn create_req(addr: &str) -> NodeCreate {
        NodeCreate {
            addr: addr.to_string(),
            os: "linux".to_string(),
            arch: "amd64".to_string(),
        }
    }

    #[tokio::test]
    async fn create_rejects_special_addresses_without_inserting() {
        let fx = fixture();
        for addr in ["127.0.0.1", "0.0.0.0", "255.255.255.255", "::1", "::", "nope"] {
            let err = fx.service.create(create_req(addr)).await.unwrap_err();
            assert!(matches!(err, LifecycleError::InvalidAddress), "{addr}");
        }
        assert!(fx.tags.all().is_empty());
    }

    #[tokio::test]
    async fn create_mints_three_lifelong_tags() {
        let fx = fixture();
        let id = fx.service.create(create_req("10.9.8.7")).await.unwrap();

        let tags = fx.tags.all();
        assert_eq!(tags.len(), 3);
        assert!(tags.iter().all(|t| t.kind == TagKind::Lifelong && t.node_id == id));
        let values: Vec<&str> = tags.iter().map(|t| t.tag.as_str()).collect();
        assert!(values.contains(&"10.9.8.7"));
        assert!(values.contains(&"linux"));
        assert!(values.contains(&"amd64"));

        let node = fx.nodes.find(id).await.unwrap().unwrap();
        assert_eq!(node.status, NodeStatus::Offline);
        assert!(!node.unload);
        assert!(node.broker_id.is_unassigned());
    }

    #[tokio::test]
    async fn create_skips_empty_os_and_arch_tags() {
        let fx = fixture();
        let req = NodeCreate {
            addr: "10.0.0.1".to_string(),
            os: String::new(),
            arch: String::new(),
        };
        fx.service.create(req).await.unwrap();
        assert_eq!(fx.tags.all().len(), 1);
    }

    #[tokio::test]
    async fn create_rejects_duplicate_address() {
        let fx = fixture();
        fx.service.create(create_req("10.0.0.2")).await.unwrap();
        let err = fx.service.create(create_req("10.0.0.2")).await.unwrap_err();
        assert!(matches!(err, LifecycleError::AddressExists(a) if a == "10.0.0.2"));
        // No duplicate row or tags.
        assert_eq!(fx.tags.all().len(), 3);
    }

    #[tokio::test]
    async fn soft_delete_requires_a_selector() {
        let fx = fixture();
        let err = fx.service.soft_delete(NodeSelector::default()).await.unwrap_err();
        assert!(matches!(err, LifecycleError::MissingSelector));
    }

    #[tokio::test]
    async fn soft_delete_marks_matching_rows_across_rounds() {
        let fx = fixture();
        let mut ids = Vec::new();
        for i in 0..250 {
            let id = fx
                .service
                .create(create_req(&format!("10.1.{}.{}", i / 250 + 1, i % 250 + 1)))
                .await
                .unwrap();
            ids.push(id);
        }

        let selector = NodeSelector {
            os: Some("linux".to_string()),
            ..NodeSelector::default()
        };
        let marked = fx.service.soft_delete(selector).await.unwrap();
        assert_eq!(marked, 250);

        for id in ids {
            let node = fx.nodes.find(id).await.unwrap().unwrap();
            assert_eq!(node.status, NodeStatus::Delete);
        }
    }

    #[tokio::test]
    async fn soft_delete_circuit_breaker_caps_one_invocation() {
        let fx = fixture();
        // 10,050 eligible rows: one invocation may touch at most
        // 100 rounds x 100 rows.
        for i in 0..10_050u32 {
            let addr = format!("10.{}.{}.{}", i / 62_500 + 1, (i / 250) % 250, i % 250 + 1);
            fx.service.create(create_req(&addr)).await.unwrap();
        }

        let selector = NodeSelector {
            os: Some("linux".to_string()),
            ..NodeSelector::default()
        };
        let marked = fx.service.soft_delete(selector.clone()).await.unwrap();
        assert_eq!(marked, 10_000);

        // The caller re-invokes for the remainder.
        let marked = fx.service.soft_delete(selector).await.unwrap();
        assert_eq!(marked, 50);
    }

    #[tokio::test]
    async fn drop_requires_delete_status() {
        let fx = fixture();
        let id = fx.service.create(create_req("10.2.0.1")).await.unwrap();

        let err = fx.service.drop_node(id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidState));

        let err = fx.service.drop_node(NodeId(999)).await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound));
    }

    #[tokio::test]
    async fn drop_removes_the_primary_set_and_derived_rows() {
        let fx = fixture();
        let id = fx.service.create(create_req("10.2.0.2")).await.unwrap();
        fx.nodes.bind_unit(UnitId(31), id);
        fx.derived.seed_snapshot(id);
        fx.nodes.set_status(id, NodeStatus::Delete);

        fx.service.drop_node(id).await.unwrap();

        assert!(fx.nodes.find(id).await.unwrap().is_none());
        assert!(fx.tags.all().iter().all(|t| t.node_id != id));
        assert!(!fx.nodes.unit_bound(UnitId(31)));
        assert!(!fx.derived.has_data(id));
    }

    #[tokio::test]
    async fn drop_collects_wild_tags_only_when_last_holder_goes() {
        let fx = fixture();
        // Two nodes share the "linux" and "amd64" tags; addresses differ.
        let a = fx.service.create(create_req("10.3.0.1")).await.unwrap();
        let b = fx.service.create(create_req("10.3.0.2")).await.unwrap();
        // An extra shared tag value plus effects bound to it.
        fx.tags
            .insert_all(&[
                crate::domain::tag::NodeTag {
                    tag: "x".to_string(),
                    node_id: a,
                    kind: TagKind::Ephemeral,
                },
                crate::domain::tag::NodeTag {
                    tag: "x".to_string(),
                    node_id: b,
                    kind: TagKind::Ephemeral,
                },
            ])
            .await
            .unwrap();
        fx.effects.insert(Effect {
            id: 1,
            tag: "x".to_string(),
            unit_id: UnitId(5),
        });
        fx.effects.insert(Effect {
            id: 2,
            tag: "10.3.0.1".to_string(),
            unit_id: UnitId(6),
        });

        fx.nodes.set_status(a, NodeStatus::Delete);
        fx.service.drop_node(a).await.unwrap();

        // "x" is still held by B, so its effect survives; A's address tag
        // went wild and its effect is gone.
        let remaining = fx.effects.all();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].tag, "x");

        fx.nodes.set_status(b, NodeStatus::Delete);
        fx.service.drop_node(b).await.unwrap();
        assert!(fx.effects.all().is_empty());
    }

    #[tokio::test]
    async fn unload_flip_syncs_the_assigned_relay_exactly_once() {
        let fx = fixture();
        let id = fx.service.create(create_req("10.4.0.1")).await.unwrap();
        fx.nodes.assign_broker(id, BrokerId(6));

        fx.service.unload(id, true).await.unwrap();
        fx.service.unload(id, true).await.unwrap();

        let syncs = fx.pusher.task_syncs.lock().unwrap();
        assert_eq!(syncs.len(), 1);
        assert_eq!(syncs[0], (BrokerId(6), id, "10.4.0.1".to_string()));
        drop(syncs);

        let node = fx.nodes.find(id).await.unwrap().unwrap();
        assert!(node.unload);
    }

    #[tokio::test]
    async fn status_gated_operations_reject_delete_and_inactive() {
        let fx = fixture();
        let id = fx.service.create(create_req("10.5.0.1")).await.unwrap();

        for status in [NodeStatus::Delete, NodeStatus::Inactive] {
            fx.nodes.set_status(id, status);
            assert!(matches!(
                fx.service.upgrade(id, "1.2.3").await.unwrap_err(),
                LifecycleError::InvalidState
            ));
            assert!(matches!(
                fx.service.command(id, "restart").await.unwrap_err(),
                LifecycleError::InvalidState
            ));
            assert!(matches!(
                fx.service.unload(id, true).await.unwrap_err(),
                LifecycleError::InvalidState
            ));
        }
        assert!(fx.pusher.upgrades.lock().unwrap().is_empty());
        assert!(fx.pusher.commands.lock().unwrap().is_empty());
        assert!(fx.pusher.task_syncs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn upgrade_and_command_notify_the_assigned_relay() {
        let fx = fixture();
        let id = fx.service.create(create_req("10.6.0.1")).await.unwrap();
        fx.nodes.assign_broker(id, BrokerId(2));
        fx.nodes.set_status(id, NodeStatus::Online);

        fx.service.upgrade(id, "2.0.1").await.unwrap();
        fx.service.command(id, "profile").await.unwrap();

        assert_eq!(
            fx.pusher.upgrades.lock().unwrap()[0],
            (BrokerId(2), id, "2.0.1".to_string())
        );
        assert_eq!(
            fx.pusher.commands.lock().unwrap()[0],
            (BrokerId(2), id, "profile".to_string())
        );
    }
}
