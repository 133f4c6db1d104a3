// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL `TaskRepository` over the `task_records` table, keyed by
//! `(task_id, broker_id)`.
//!
//! `mark_failed` upserts so a delivery failure is always auditable even if
//! the pending row was never seeded; `executed` only ever moves to `TRUE`.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::{QueryBuilder, Row};

use crate::domain::node::BrokerId;
use crate::domain::repository::{RepositoryError, TaskRepository};
use crate::domain::task::{TaskId, TaskRecord};

pub struct PostgresTaskRepository {
    pool: PgPool,
}

impl PostgresTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    async fn insert_pending(&self, records: &[TaskRecord]) -> Result<(), RepositoryError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut qb = QueryBuilder::new(
            "INSERT INTO task_records (task_id, broker_id, executed, failed, reason) ",
        );
        qb.push_values(records, |mut b, record| {
            b.push_bind(record.task_id.0)
                .push_bind(record.broker_id.0)
                .push_bind(record.executed)
                .push_bind(record.failed)
                .push_bind(&record.reason);
        });
        qb.push(" ON CONFLICT (task_id, broker_id) DO NOTHING");
        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        task_id: TaskId,
        broker_id: BrokerId,
        reason: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO task_records (task_id, broker_id, executed, failed, reason)
            VALUES ($1, $2, TRUE, TRUE, $3)
            ON CONFLICT (task_id, broker_id)
            DO UPDATE SET executed = TRUE, failed = TRUE, reason = EXCLUDED.reason
            "#,
        )
        .bind(task_id.0)
        .bind(broker_id.0)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_task(&self, task_id: TaskId) -> Result<Vec<TaskRecord>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT task_id, broker_id, executed, failed, reason
            FROM task_records
            WHERE task_id = $1
            ORDER BY broker_id
            "#,
        )
        .bind(task_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| TaskRecord {
                task_id: TaskId(row.get("task_id")),
                broker_id: BrokerId(row.get("broker_id")),
                executed: row.get("executed"),
                failed: row.get("failed"),
                reason: row.get("reason"),
            })
            .collect())
    }
}
