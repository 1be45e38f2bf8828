//! OrderDesk — multi-tenant commerce admin console backend.
//!
//! Main entry point that wires the tier catalog, subscription lifecycle,
//! invoice workflow, and enforcement gate together and starts the server.

use chrono::Utc;
use clap::Parser;
use orderdesk_api::ApiServer;
use orderdesk_billing::{
    EnforcementGate, InvoiceWorkflow, LifecyclePolicy, SubscriptionEngine, TierCatalog,
    UsageStores,
};
use orderdesk_core::config::AppConfig;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "orderdesk")]
#[command(about = "Multi-tenant commerce admin console backend")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "ORDERDESK__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "ORDERDESK__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Seed demo tiers and a demo trial tenant
    #[arg(long, default_value_t = false)]
    seed_demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "orderdesk=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("OrderDesk starting up");

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        metrics_port = config.metrics.port,
        "Configuration loaded"
    );

    // Build the engines
    let catalog = Arc::new(TierCatalog::new());
    let policy = LifecyclePolicy::from_config(&config.billing);
    let lifecycle = Arc::new(SubscriptionEngine::new(Arc::clone(&catalog), policy));
    let workflow = Arc::new(InvoiceWorkflow::new(
        Arc::clone(&lifecycle),
        Arc::clone(&catalog),
    ));
    let usage = Arc::new(UsageStores::new());
    let gate = Arc::new(EnforcementGate::new(
        Arc::clone(&lifecycle),
        Arc::clone(&catalog),
        Arc::clone(&usage),
    ));

    if cli.seed_demo {
        catalog.seed_demo_tiers();
        let demo_tenant = Uuid::new_v4();
        lifecycle.start_trial(demo_tenant, "AE", Utc::now())?;
        info!(tenant_id = %demo_tenant, "Seeded demo trial tenant");
    }

    let server = ApiServer::new(config, lifecycle, workflow, gate, catalog);

    if let Err(e) = server.start_metrics().await {
        error!(error = %e, "Failed to start metrics exporter");
    }

    server.start_http().await
}
