// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL `TagRepository` over the `node_tags` table.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::{QueryBuilder, Row};

use crate::domain::node::NodeId;
use crate::domain::repository::{RepositoryError, TagRepository};
use crate::domain::tag::NodeTag;

pub struct PostgresTagRepository {
    pool: PgPool,
}

impl PostgresTagRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TagRepository for PostgresTagRepository {
    async fn insert_all(&self, tags: &[NodeTag]) -> Result<(), RepositoryError> {
        if tags.is_empty() {
            return Ok(());
        }
        let mut qb = QueryBuilder::new("INSERT INTO node_tags (tag, node_id, kind) ");
        qb.push_values(tags, |mut b, tag| {
            b.push_bind(&tag.tag)
                .push_bind(tag.node_id.0)
                .push_bind(tag.kind.as_str());
        });
        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn tags_of(&self, node_id: NodeId) -> Result<Vec<String>, RepositoryError> {
        let rows = sqlx::query("SELECT DISTINCT tag FROM node_tags WHERE node_id = $1")
            .bind(node_id.0)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("tag")).collect())
    }

    async fn referenced(&self, tags: &[String]) -> Result<Vec<String>, RepositoryError> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("SELECT DISTINCT tag FROM node_tags WHERE tag = ANY($1)")
            .bind(tags)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("tag")).collect())
    }
}
