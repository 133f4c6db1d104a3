// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Command Dispatcher ("Pusher")
//!
//! Translates domain events into dispatch-gateway calls and reconciles
//! multicast outcomes into persisted task records.
//!
//! | Operation | Delivery | Bookkeeping |
//! |-----------|----------|-------------|
//! | `task_table` | multicast | failing targets recorded on the task row |
//! | `task_sync` / `task_diff` / `startup` / `upgrade` / `command` | unicast | none |
//! | resets / `extension_*` | broadcast | none |
//!
//! Unicast calls referencing an incompletely provisioned node (zero or
//! empty identifiers) are dropped before any network attempt — a cheap
//! short-circuit, not an error. Everything except `task_table` is a
//! transient notification with no retry contract: a relay that missed one
//! re-requests state on its own.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::dispatch::{
    CommandRequest, ExtensionDiffRequest, ExtensionEvent, Opcode, StartupRequest,
    StoreResetRequest, TaskDiffRequest, TaskSyncRequest, TaskTableRequest, UpgradeRequest,
};
use crate::domain::node::{BrokerId, NodeId};
use crate::domain::repository::TaskRepository;
use crate::domain::task::{TaskId, UnitId};
use crate::infrastructure::gateway::DispatchGateway;

#[async_trait]
pub trait Pusher: Send + Sync {
    /// Fan a task assignment table out to `brokers` and record every
    /// failing target on its `(task, broker)` row.
    async fn task_table(&self, task_id: TaskId, brokers: Vec<BrokerId>);

    async fn task_sync(&self, broker: BrokerId, node: NodeId, addr: &str);

    async fn task_diff(&self, broker: BrokerId, node: NodeId, unit: UnitId, addr: &str);

    async fn startup(&self, broker: BrokerId, node: NodeId);

    async fn upgrade(&self, broker: BrokerId, node: NodeId, semver: &str);

    async fn command(&self, broker: BrokerId, node: NodeId, cmd: &str);

    async fn cache_reset(&self);

    async fn search_reset(&self);

    async fn store_reset(&self, id: &str);

    async fn notifier_reset(&self);

    async fn extension_update(&self, name: &str);

    async fn extension_delete(&self, name: &str);
}

pub struct StandardPusher {
    gateway: DispatchGateway,
    tasks: Arc<dyn TaskRepository>,
}

impl StandardPusher {
    pub fn new(gateway: DispatchGateway, tasks: Arc<dyn TaskRepository>) -> Self {
        Self { gateway, tasks }
    }

    async fn extension_diff(&self, name: &str, event: ExtensionEvent) {
        let req = ExtensionDiffRequest {
            name: name.to_string(),
            event,
        };
        self.gateway.broadcast(Opcode::ExtensionDiff, &req);
    }
}

#[async_trait]
impl Pusher for StandardPusher {
    async fn task_table(&self, task_id: TaskId, brokers: Vec<BrokerId>) {
        if brokers.is_empty() {
            return;
        }
        let req = TaskTableRequest { task_id };
        let mut results = self.gateway.multicast(brokers, Opcode::TaskTable, &req);
        while let Some(outcome) = results.next().await {
            let Some(error) = outcome.error else {
                continue;
            };
            warn!(
                task = task_id.0,
                broker = outcome.broker_id.0,
                error = %error,
                "task table delivery failed"
            );
            if let Err(e) = self
                .tasks
                .mark_failed(task_id, outcome.broker_id, &error.to_string())
                .await
            {
                warn!(
                    task = task_id.0,
                    broker = outcome.broker_id.0,
                    error = %e,
                    "failed to record task delivery failure"
                );
            }
        }
    }

    async fn task_sync(&self, broker: BrokerId, node: NodeId, addr: &str) {
        if broker.is_unassigned() || node.0 == 0 || addr.is_empty() {
            debug!(broker = broker.0, node = node.0, "task sync skipped, node not fully provisioned");
            return;
        }
        let req = TaskSyncRequest {
            node_id: node,
            addr: addr.to_string(),
        };
        self.gateway.unicast(broker, Opcode::TaskSync, &req);
    }

    async fn task_diff(&self, broker: BrokerId, node: NodeId, unit: UnitId, addr: &str) {
        if broker.is_unassigned() || node.0 == 0 || unit.0 == 0 || addr.is_empty() {
            debug!(broker = broker.0, node = node.0, "task diff skipped, node not fully provisioned");
            return;
        }
        let req = TaskDiffRequest {
            node_id: node,
            unit_id: unit,
            addr: addr.to_string(),
        };
        self.gateway.unicast(broker, Opcode::TaskDiff, &req);
    }

    async fn startup(&self, broker: BrokerId, node: NodeId) {
        self.gateway
            .unicast(broker, Opcode::Startup, &StartupRequest { node_id: node });
    }

    async fn upgrade(&self, broker: BrokerId, node: NodeId, semver: &str) {
        let req = UpgradeRequest {
            node_id: node,
            semver: semver.to_string(),
        };
        self.gateway.unicast(broker, Opcode::Upgrade, &req);
    }

    async fn command(&self, broker: BrokerId, node: NodeId, cmd: &str) {
        let req = CommandRequest {
            node_id: node,
            cmd: cmd.to_string(),
        };
        self.gateway.unicast(broker, Opcode::Command, &req);
    }

    async fn cache_reset(&self) {
        self.gateway
            .broadcast(Opcode::CacheReset, &serde_json::Value::Null);
    }

    async fn search_reset(&self) {
        self.gateway
            .broadcast(Opcode::SearchReset, &serde_json::Value::Null);
    }

    async fn store_reset(&self, id: &str) {
        let req = StoreResetRequest { id: id.to_string() };
        self.gateway.broadcast(Opcode::StoreReset, &req);
    }

    async fn notifier_reset(&self) {
        self.gateway
            .broadcast(Opcode::NotifierReset, &serde_json::Value::Null);
    }

    async fn extension_update(&self, name: &str) {
        self.extension_diff(name, ExtensionEvent::Update).await;
    }

    async fn extension_delete(&self, name: &str) {
        self.extension_diff(name, ExtensionEvent::Delete).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dispatch::{BrokerRegistry, DeliveryError, Frame};
    use crate::domain::repository::RepositoryError;
    use crate::domain::task::TaskRecord;
    use crate::infrastructure::repositories::InMemoryTaskRepository;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedRegistry {
        behaviors: HashMap<BrokerId, Behavior>,
        delivered: Mutex<Vec<(BrokerId, Frame)>>,
    }

    #[derive(Clone)]
    enum Behavior {
        Ack,
        AckAfter(Duration),
        Fail(String),
    }

    impl ScriptedRegistry {
        fn new(behaviors: Vec<(BrokerId, Behavior)>) -> Self {
            Self {
                behaviors: behaviors.into_iter().collect(),
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl BrokerRegistry for ScriptedRegistry {
        fn contains(&self, id: BrokerId) -> bool {
            self.behaviors.contains_key(&id)
        }

        fn connected(&self) -> Vec<BrokerId> {
            self.behaviors.keys().copied().collect()
        }

        async fn deliver(&self, id: BrokerId, frame: Frame) -> Result<(), DeliveryError> {
            let behavior = self.behaviors.get(&id).cloned().unwrap_or(Behavior::Ack);
            match behavior {
                Behavior::Ack => {}
                Behavior::AckAfter(delay) => tokio::time::sleep(delay).await,
                Behavior::Fail(msg) => return Err(DeliveryError::Remote(msg)),
            }
            self.delivered.lock().unwrap().push((id, frame));
            Ok(())
        }
    }

    fn pusher_with(
        behaviors: Vec<(BrokerId, Behavior)>,
    ) -> (StandardPusher, Arc<InMemoryTaskRepository>, Arc<ScriptedRegistry>) {
        let registry = Arc::new(ScriptedRegistry::new(behaviors));
        let tasks = Arc::new(InMemoryTaskRepository::new());
        let gateway = DispatchGateway::new(registry.clone(), Duration::from_secs(5));
        (
            StandardPusher::new(gateway, tasks.clone()),
            tasks,
            registry,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn task_table_records_only_failing_targets() {
        let task_id = TaskId(42);
        let (pusher, tasks, _registry) = pusher_with(vec![
            (BrokerId(1), Behavior::Ack),
            // Broker 2 absent: synthetic NotConnected.
            (BrokerId(3), Behavior::AckAfter(Duration::from_secs(60))),
        ]);
        tasks
            .insert_pending(&[
                TaskRecord::pending(task_id, BrokerId(1)),
                TaskRecord::pending(task_id, BrokerId(2)),
                TaskRecord::pending(task_id, BrokerId(3)),
            ])
            .await
            .unwrap();

        pusher
            .task_table(task_id, vec![BrokerId(1), BrokerId(2), BrokerId(3)])
            .await;

        let records = tasks.find_by_task(task_id).await.unwrap();
        let by_id = |id: i64| records.iter().find(|r| r.broker_id == BrokerId(id)).unwrap();

        let ok = by_id(1);
        assert!(!ok.failed);
        assert!(ok.reason.is_empty());

        let not_connected = by_id(2);
        assert!(not_connected.executed);
        assert!(not_connected.failed);
        assert_eq!(not_connected.reason, DeliveryError::NotConnected.to_string());

        let timed_out = by_id(3);
        assert!(timed_out.executed);
        assert!(timed_out.failed);
        assert_eq!(timed_out.reason, DeliveryError::Timeout.to_string());
    }

    #[tokio::test(start_paused = true)]
    async fn task_table_records_remote_errors_verbatim() {
        let task_id = TaskId(7);
        let (pusher, tasks, _registry) = pusher_with(vec![(
            BrokerId(5),
            Behavior::Fail("disk full".to_string()),
        )]);
        tasks
            .insert_pending(&[TaskRecord::pending(task_id, BrokerId(5))])
            .await
            .unwrap();

        pusher.task_table(task_id, vec![BrokerId(5)]).await;

        let records = tasks.find_by_task(task_id).await.unwrap();
        assert!(records[0].failed);
        assert!(records[0].reason.contains("disk full"));
    }

    #[tokio::test(start_paused = true)]
    async fn task_table_with_no_targets_is_a_noop() {
        let (pusher, tasks, _registry) = pusher_with(vec![]);
        pusher.task_table(TaskId(1), vec![]).await;
        assert!(tasks.find_by_task(TaskId(1)).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn task_sync_drops_incomplete_nodes_silently() {
        let (pusher, _tasks, registry) = pusher_with(vec![(BrokerId(1), Behavior::Ack)]);

        pusher.task_sync(BrokerId::UNASSIGNED, NodeId(1), "10.0.0.1").await;
        pusher.task_sync(BrokerId(1), NodeId(0), "10.0.0.1").await;
        pusher.task_sync(BrokerId(1), NodeId(1), "").await;
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert!(registry.delivered.lock().unwrap().is_empty());

        pusher.task_sync(BrokerId(1), NodeId(1), "10.0.0.1").await;
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        let delivered = registry.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].1.opcode, Opcode::TaskSync);
    }

    #[tokio::test(start_paused = true)]
    async fn extension_events_broadcast_to_all_connected() {
        let (pusher, _tasks, registry) = pusher_with(vec![
            (BrokerId(1), Behavior::Ack),
            (BrokerId(2), Behavior::Ack),
        ]);

        pusher.extension_update("scanner").await;
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        let delivered = registry.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 2);
        assert!(delivered
            .iter()
            .all(|(_, f)| f.opcode == Opcode::ExtensionDiff && f.payload["event"] == "update"));
    }

    #[tokio::test(start_paused = true)]
    async fn mark_failed_errors_do_not_escape_task_table() {
        struct FailingTasks;

        #[async_trait]
        impl TaskRepository for FailingTasks {
            async fn insert_pending(&self, _records: &[TaskRecord]) -> Result<(), RepositoryError> {
                Ok(())
            }

            async fn mark_failed(
                &self,
                _task_id: TaskId,
                _broker_id: BrokerId,
                _reason: &str,
            ) -> Result<(), RepositoryError> {
                Err(RepositoryError::Database("gone".to_string()))
            }

            async fn find_by_task(
                &self,
                _task_id: TaskId,
            ) -> Result<Vec<TaskRecord>, RepositoryError> {
                Ok(Vec::new())
            }
        }

        let registry = Arc::new(ScriptedRegistry::new(vec![]));
        let gateway = DispatchGateway::new(registry, Duration::from_secs(1));
        let pusher = StandardPusher::new(gateway, Arc::new(FailingTasks));

        // Broker 9 is not connected, so the failure path runs into the
        // broken repository; the call must still complete quietly.
        pusher.task_table(TaskId(3), vec![BrokerId(9)]).await;
    }
}
