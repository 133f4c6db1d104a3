// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL `DerivedStore` over the denormalized node mirrors.
//!
//! Every table here is a cache of primary data: the inventory mirror plus
//! the process/listener/account/group snapshots, historical events, risk
//! findings, task history, and component/vulnerability snapshots. `purge`
//! cleans each table independently and concurrently; a failed delete is
//! logged and skipped, never propagated.

use async_trait::async_trait;
use futures::future::join_all;
use sqlx::postgres::PgPool;
use tracing::warn;

use crate::domain::inventory::InventoryRecord;
use crate::domain::node::NodeId;
use crate::domain::repository::{DerivedStore, RepositoryError};

/// Derived tables keyed by `node_id`.
const DERIVED_TABLES: &[&str] = &[
    "node_inventory",
    "node_processes",
    "node_listeners",
    "node_accounts",
    "node_groups",
    "node_events",
    "node_risks",
    "node_task_history",
    "node_components",
    "node_vulnerabilities",
];

pub struct PostgresDerivedStore {
    pool: PgPool,
}

impl PostgresDerivedStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DerivedStore for PostgresDerivedStore {
    async fn save_inventory(
        &self,
        node_id: NodeId,
        record: &InventoryRecord,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO node_inventory (node_id, hostname, datacenter, business_unit, owner)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (node_id)
            DO UPDATE SET hostname = EXCLUDED.hostname,
                          datacenter = EXCLUDED.datacenter,
                          business_unit = EXCLUDED.business_unit,
                          owner = EXCLUDED.owner
            "#,
        )
        .bind(node_id.0)
        .bind(&record.hostname)
        .bind(&record.datacenter)
        .bind(&record.business_unit)
        .bind(&record.owner)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn purge(&self, node_id: NodeId) {
        let deletes = DERIVED_TABLES.iter().map(|table| {
            let table = *table;
            let pool = self.pool.clone();
            async move {
                let sql = format!("DELETE FROM {table} WHERE node_id = $1");
                if let Err(e) = sqlx::query(&sql).bind(node_id.0).execute(&pool).await {
                    warn!(table, node = node_id.0, error = %e, "derived row cleanup failed");
                }
            }
        });
        join_all(deletes).await;
    }
}
