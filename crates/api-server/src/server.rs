//! API server — router assembly and HTTP/metrics startup.

use crate::rest::{self, AppState};
use axum::routing::{get, post};
use axum::Router;
use orderdesk_billing::{EnforcementGate, InvoiceWorkflow, SubscriptionEngine, TierCatalog};
use orderdesk_core::config::AppConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// HTTP server exposing the subscription and enforcement surface.
pub struct ApiServer {
    config: AppConfig,
    lifecycle: Arc<SubscriptionEngine>,
    workflow: Arc<InvoiceWorkflow>,
    gate: Arc<EnforcementGate>,
    catalog: Arc<TierCatalog>,
}

impl ApiServer {
    pub fn new(
        config: AppConfig,
        lifecycle: Arc<SubscriptionEngine>,
        workflow: Arc<InvoiceWorkflow>,
        gate: Arc<EnforcementGate>,
        catalog: Arc<TierCatalog>,
    ) -> Self {
        Self {
            config,
            lifecycle,
            workflow,
            gate,
            catalog,
        }
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            lifecycle: Arc::clone(&self.lifecycle),
            workflow: Arc::clone(&self.workflow),
            gate: Arc::clone(&self.gate),
            catalog: Arc::clone(&self.catalog),
            node_id: self.config.node_id.clone(),
            start_time: Instant::now(),
        };

        Router::new()
            // Subscription lifecycle
            .route("/v1/tenants/:id/subscription", get(rest::subscription_status))
            .route("/v1/tenants/:id/tier-change", post(rest::request_tier_change))
            .route("/v1/tenants/:id/pause", post(rest::pause_tenant))
            .route("/v1/tenants/:id/resume", post(rest::resume_tenant))
            .route("/v1/tenants/:id/cancel", post(rest::cancel_tenant))
            // Payment workflow
            .route("/v1/invoices/:id/payment", post(rest::submit_payment))
            .route("/v1/invoices/:id/review", post(rest::review_invoice))
            .route("/v1/invoices/review-queue", get(rest::review_queue))
            // Enforcement gate
            .route(
                "/v1/tenants/:id/enforcement/products",
                get(rest::can_add_product),
            )
            .route(
                "/v1/tenants/:id/enforcement/orders",
                get(rest::can_add_order),
            )
            .route(
                "/v1/tenants/:id/enforcement/order-intake",
                get(rest::can_process_orders),
            )
            // Tier catalog
            .route("/v1/tiers", get(rest::list_tiers))
            // Operational endpoints
            .route("/health", get(rest::health_check))
            .route("/ready", get(rest::readiness))
            .route("/live", get(rest::liveness))
            // Middleware
            .layer(CompressionLayer::new())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Start the HTTP REST server.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = self.router();
        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Start the Prometheus metrics exporter on a separate port.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        let handle = builder
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install_recorder()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");

        // Keep the handle alive
        std::mem::forget(handle);
        Ok(())
    }
}
