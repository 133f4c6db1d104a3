// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Node Repository
//!
//! Production `NodeRepository` implementation backed by the `nodes`,
//! `node_tags` and `config_units` tables via `sqlx`.
//!
//! The primary-set drop is the one place a single transaction spans all
//! three tables: either the tag rows, the unit bindings and the node row
//! all go, or none of them do.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPool;
use sqlx::{QueryBuilder, Row};

use crate::domain::node::{BrokerId, Node, NodeCreate, NodeId, NodeSelector, NodeStatus};
use crate::domain::repository::{NodeRepository, RepositoryError};

pub struct PostgresNodeRepository {
    pool: PgPool,
}

impl PostgresNodeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn node_from_row(row: &sqlx::postgres::PgRow) -> Node {
        let status: String = row.get("status");
        Node {
            id: NodeId(row.get("id")),
            addr: row.get("addr"),
            os: row.get("os"),
            arch: row.get("arch"),
            status: NodeStatus::from_str(&status).unwrap_or(NodeStatus::Offline),
            unload: row.get("unload"),
            broker_id: BrokerId(row.get("broker_id")),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl NodeRepository for PostgresNodeRepository {
    async fn insert(&self, create: &NodeCreate) -> Result<NodeId, RepositoryError> {
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO nodes (addr, os, arch, status, unload, broker_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, FALSE, 0, $5, $5)
            RETURNING id
            "#,
        )
        .bind(&create.addr)
        .bind(&create.os)
        .bind(&create.arch)
        .bind(NodeStatus::Offline.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(NodeId(row.get("id")))
    }

    async fn find(&self, id: NodeId) -> Result<Option<Node>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, addr, os, arch, status, unload, broker_id, created_at, updated_at
            FROM nodes
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(Self::node_from_row))
    }

    async fn addr_in_use(&self, addr: &str) -> Result<bool, RepositoryError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM nodes WHERE addr = $1")
            .bind(addr)
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.get("n");
        Ok(count != 0)
    }

    async fn select_ids(
        &self,
        selector: &NodeSelector,
        exclude: NodeStatus,
        limit: u32,
    ) -> Result<Vec<NodeId>, RepositoryError> {
        let mut qb = QueryBuilder::new("SELECT DISTINCT n.id FROM nodes n");
        if selector.tag.is_some() {
            qb.push(" JOIN node_tags t ON t.node_id = n.id");
        }
        qb.push(" WHERE n.status <> ");
        qb.push_bind(exclude.as_str());

        if !selector.ids.is_empty() {
            qb.push(" AND n.id IN (");
            let mut sep = qb.separated(", ");
            for id in &selector.ids {
                sep.push_bind(id.0);
            }
            qb.push(")");
        }
        if !selector.statuses.is_empty() {
            qb.push(" AND n.status IN (");
            let mut sep = qb.separated(", ");
            for status in &selector.statuses {
                sep.push_bind(status.as_str());
            }
            qb.push(")");
        }
        if let Some(os) = &selector.os {
            qb.push(" AND n.os = ");
            qb.push_bind(os);
        }
        if let Some(arch) = &selector.arch {
            qb.push(" AND n.arch = ");
            qb.push_bind(arch);
        }
        if let Some(prefix) = &selector.addr_prefix {
            qb.push(" AND n.addr LIKE ");
            qb.push_bind(format!("{prefix}%"));
        }
        if let Some(tag) = &selector.tag {
            qb.push(" AND t.tag = ");
            qb.push_bind(tag);
        }

        qb.push(" ORDER BY n.id LIMIT ");
        qb.push_bind(limit as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(|r| NodeId(r.get("id"))).collect())
    }

    async fn mark_status(
        &self,
        ids: &[NodeId],
        status: NodeStatus,
        exclude: NodeStatus,
    ) -> Result<u64, RepositoryError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let raw: Vec<i64> = ids.iter().map(|id| id.0).collect();
        let result = sqlx::query(
            r#"
            UPDATE nodes
            SET status = $1, updated_at = $2
            WHERE status <> $3 AND id = ANY($4)
            "#,
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(exclude.as_str())
        .bind(&raw)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn set_unload(&self, id: NodeId, unload: bool) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE nodes SET unload = $1, updated_at = $2 WHERE id = $3")
            .bind(unload)
            .bind(Utc::now())
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("node {}", id.0)));
        }
        Ok(())
    }

    async fn drop_primary_set(&self, id: NodeId) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM node_tags WHERE node_id = $1")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM config_units WHERE node_id = $1")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM nodes WHERE id = $1")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(RepositoryError::NotFound(format!("node {}", id.0)));
        }

        tx.commit().await?;
        Ok(())
    }
}
