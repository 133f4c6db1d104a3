// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL `EffectRepository` over the `effects` table.

use async_trait::async_trait;
use sqlx::postgres::PgPool;

use crate::domain::repository::{EffectRepository, RepositoryError};

pub struct PostgresEffectRepository {
    pool: PgPool,
}

impl PostgresEffectRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EffectRepository for PostgresEffectRepository {
    async fn delete_by_tags(&self, tags: &[String]) -> Result<u64, RepositoryError> {
        if tags.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM effects WHERE tag = ANY($1)")
            .bind(tags)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
