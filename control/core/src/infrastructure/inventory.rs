// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Inventory Enrichment Client
//!
//! HTTP implementation of the [`InventorySource`] port against the
//! external asset-inventory (CMDB) service.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Look up asset attributes for newly registered nodes
//! - **Integration:** External HTTP API → inventory mirror table
//!
//! Lookups are best-effort by contract: callers fire them from a detached
//! task and only log failures.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::domain::inventory::{InventoryRecord, InventorySource};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HttpInventorySource {
    base_url: String,
    client: Client,
}

impl HttpInventorySource {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into(),
            client,
        }
    }
}

#[async_trait]
impl InventorySource for HttpInventorySource {
    async fn fetch(&self, addr: &str) -> Result<InventoryRecord> {
        let url = format!("{}/assets", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("addr", addr)])
            .send()
            .await
            .context("inventory request failed")?
            .error_for_status()
            .context("inventory service rejected the lookup")?;

        let record = response
            .json::<InventoryRecord>()
            .await
            .context("inventory response was not decodable")?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_decodes_asset_attributes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/assets")
            .match_query(mockito::Matcher::UrlEncoded(
                "addr".into(),
                "10.0.0.9".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"hostname":"web-9","datacenter":"eu-1","owner":"infra"}"#)
            .create_async()
            .await;

        let source = HttpInventorySource::new(server.url());
        let record = source.fetch("10.0.0.9").await.unwrap();

        mock.assert_async().await;
        assert_eq!(record.hostname.as_deref(), Some("web-9"));
        assert_eq!(record.datacenter.as_deref(), Some("eu-1"));
        assert_eq!(record.business_unit, None);
        assert_eq!(record.owner.as_deref(), Some("infra"));
    }

    #[tokio::test]
    async fn fetch_surfaces_service_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/assets")
            .with_status(502)
            .create_async()
            .await;

        let source = HttpInventorySource::new(server.url());
        assert!(source.fetch("10.0.0.9").await.is_err());
    }
}
