// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! External inventory enrichment port. Lookups are best-effort: a failed or
//! slow fetch never affects the node registration that triggered it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Asset attributes mirrored from the external inventory service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub datacenter: Option<String>,
    #[serde(default)]
    pub business_unit: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
}

#[async_trait]
pub trait InventorySource: Send + Sync {
    /// Look up asset attributes by node address.
    async fn fetch(&self, addr: &str) -> anyhow::Result<InventoryRecord>;
}
