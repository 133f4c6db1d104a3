// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Marshal Control Plane Daemon
//!
//! The `marshal` binary is the composition root of the fleet control
//! plane: it loads configuration, connects the store, wires the dispatch
//! gateway and lifecycle services together, and serves the HTTP surface.
//!
//! The relay transport attaches through the in-process broker registry;
//! everything below it (sockets, authentication, heartbeats) lives outside
//! this binary's concern.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod registry;

use config::Config;
use registry::InProcessBrokerRegistry;

use marshal_core::application::{StandardNodeLifecycleService, StandardPusher};
use marshal_core::domain::inventory::{InventoryRecord, InventorySource};
use marshal_core::infrastructure::db::Database;
use marshal_core::infrastructure::inventory::HttpInventorySource;
use marshal_core::infrastructure::repositories::{
    PostgresDerivedStore, PostgresEffectRepository, PostgresNodeRepository,
    PostgresTagRepository, PostgresTaskRepository,
};
use marshal_core::infrastructure::DispatchGateway;
use marshal_core::presentation::api;

/// Marshal fleet control plane.
#[derive(Parser)]
#[command(name = "marshal")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = "MARSHAL_CONFIG_PATH", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen address override (e.g. 0.0.0.0:8700).
    #[arg(long, env = "MARSHAL_LISTEN")]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "MARSHAL_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Stand-in used when no inventory integration is configured.
struct DisabledInventorySource;

#[async_trait::async_trait]
impl InventorySource for DisabledInventorySource {
    async fn fetch(&self, _addr: &str) -> Result<InventoryRecord> {
        Ok(InventoryRecord::default())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cfg = Config::load(cli.config.as_deref())?;
    let listen = cli.listen.unwrap_or_else(|| cfg.server.listen.clone());

    let db = Database::new(&cfg.database.url)
        .await
        .context("failed to connect to the database")?;
    let pool = db.get_pool().clone();
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run database migrations")?;

    let nodes = Arc::new(PostgresNodeRepository::new(pool.clone()));
    let tags = Arc::new(PostgresTagRepository::new(pool.clone()));
    let effects = Arc::new(PostgresEffectRepository::new(pool.clone()));
    let derived = Arc::new(PostgresDerivedStore::new(pool.clone()));
    let tasks = Arc::new(PostgresTaskRepository::new(pool));

    let broker_registry = Arc::new(InProcessBrokerRegistry::new());
    let gateway = DispatchGateway::new(
        broker_registry,
        Duration::from_millis(cfg.dispatch.deadline_ms),
    );
    let pusher = Arc::new(StandardPusher::new(gateway, tasks.clone()));

    let inventory: Arc<dyn InventorySource> = match &cfg.inventory.base_url {
        Some(base_url) => Arc::new(HttpInventorySource::new(base_url.clone())),
        None => Arc::new(DisabledInventorySource),
    };

    let lifecycle = Arc::new(StandardNodeLifecycleService::new(
        nodes,
        tags,
        effects,
        derived,
        pusher.clone(),
        inventory,
    ));

    let app = api::app(lifecycle, pusher, tasks).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    info!(listen = %listen, "marshal control plane listening");
    axum::serve(listener, app).await?;

    Ok(())
}
