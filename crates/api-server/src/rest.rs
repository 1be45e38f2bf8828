//! REST API handlers for the subscription, invoice, and enforcement surface.
//!
//! This is an internal service boundary consumed by the admin and tenant
//! consoles, not a public protocol: structured request/response bodies with
//! explicit error kinds.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use orderdesk_billing::{
    BillingError, EnforcementGate, Invoice, InvoiceWorkflow, LimitDecision, OrderIntakeDecision,
    ReviewDecision, StatusReport, SubscriptionEngine, Tenant, Tier, TierCatalog,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;
use uuid::Uuid;

/// Maximum length for free-text fields (receipt refs, reasons).
const MAX_FIELD_LEN: usize = 512;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<SubscriptionEngine>,
    pub workflow: Arc<InvoiceWorkflow>,
    pub gate: Arc<EnforcementGate>,
    pub catalog: Arc<TierCatalog>,
    pub node_id: String,
    pub start_time: Instant,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Map engine errors onto HTTP status codes and stable error kinds.
fn into_api_error(err: BillingError) -> ApiError {
    let (status, kind) = match &err {
        BillingError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        BillingError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
        BillingError::ConflictingInvoice { .. } => (StatusCode::CONFLICT, "conflicting_invoice"),
        BillingError::InvalidState { .. } => (StatusCode::CONFLICT, "invalid_state"),
        BillingError::MissingReason => (StatusCode::UNPROCESSABLE_ENTITY, "missing_reason"),
        BillingError::LimitExceeded { .. } => (StatusCode::CONFLICT, "limit_exceeded"),
        BillingError::InactiveSubscription { .. } => {
            (StatusCode::FORBIDDEN, "subscription_inactive")
        }
    };
    if status.is_server_error() {
        metrics::counter!("api.errors").increment(1);
    }
    (
        status,
        Json(ErrorResponse {
            error: kind,
            message: err.to_string(),
        }),
    )
}

fn bad_request(message: &str) -> ApiError {
    metrics::counter!("api.validation_errors").increment(1);
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: "invalid_request",
            message: message.to_string(),
        }),
    )
}

// ---------------------------------------------------------------------------
// Subscription status
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct SubscriptionEnvelope {
    #[serde(flatten)]
    pub report: StatusReport,
    pub pending_invoices: Vec<Invoice>,
}

/// GET /v1/tenants/:id/subscription — derived lifecycle view plus any
/// invoices still moving through the payment pipeline.
pub async fn subscription_status(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<SubscriptionEnvelope>, ApiError> {
    let report = state
        .lifecycle
        .status_report(tenant_id, Utc::now())
        .map_err(into_api_error)?;
    let pending_invoices = state
        .workflow
        .list_for_tenant(tenant_id)
        .into_iter()
        .filter(|i| i.status.is_open())
        .collect();
    Ok(Json(SubscriptionEnvelope {
        report,
        pending_invoices,
    }))
}

// ---------------------------------------------------------------------------
// Tier changes & payment workflow
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct TierChangeRequest {
    pub tier_id: Uuid,
}

/// POST /v1/tenants/:id/tier-change — open a billing invoice for a tier
/// change or renewal.
pub async fn request_tier_change(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
    Json(request): Json<TierChangeRequest>,
) -> Result<Json<Invoice>, ApiError> {
    let invoice = state
        .workflow
        .request_tier_change(tenant_id, request.tier_id, Utc::now())
        .map_err(into_api_error)?;
    metrics::counter!("billing.api.tier_changes").increment(1);
    Ok(Json(invoice))
}

#[derive(Deserialize)]
pub struct PaymentProofRequest {
    pub receipt_ref: String,
}

/// POST /v1/invoices/:id/payment — attach a payment receipt reference.
pub async fn submit_payment(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    Json(request): Json<PaymentProofRequest>,
) -> Result<Json<Invoice>, ApiError> {
    let receipt_ref = request.receipt_ref.trim();
    if receipt_ref.is_empty() {
        return Err(bad_request("'receipt_ref' must not be empty"));
    }
    if receipt_ref.len() > MAX_FIELD_LEN {
        return Err(bad_request("'receipt_ref' exceeds maximum length"));
    }

    let invoice = state
        .workflow
        .submit_payment_proof(invoice_id, receipt_ref, Utc::now())
        .map_err(into_api_error)?;
    metrics::counter!("billing.api.payment_submissions").increment(1);
    Ok(Json(invoice))
}

#[derive(Deserialize)]
pub struct ReviewRequest {
    pub decision: ReviewDecision,
    #[serde(default)]
    pub reason: Option<String>,
}

/// POST /v1/invoices/:id/review — admin approval or rejection.
pub async fn review_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    Json(request): Json<ReviewRequest>,
) -> Result<Json<Invoice>, ApiError> {
    if let Some(reason) = &request.reason {
        if reason.len() > MAX_FIELD_LEN {
            return Err(bad_request("'reason' exceeds maximum length"));
        }
    }
    let invoice = state
        .workflow
        .review(invoice_id, request.decision, request.reason, Utc::now())
        .map_err(|e| {
            warn!(invoice_id = %invoice_id, error = %e, "Invoice review refused");
            into_api_error(e)
        })?;
    metrics::counter!(
        "billing.api.reviews",
        "decision" => match request.decision {
            ReviewDecision::Approve => "approve",
            ReviewDecision::Reject => "reject",
        }
    )
    .increment(1);
    Ok(Json(invoice))
}

/// GET /v1/invoices/review-queue — submitted invoices awaiting an admin.
pub async fn review_queue(State(state): State<AppState>) -> Json<Vec<Invoice>> {
    Json(state.workflow.pending_for_review())
}

// ---------------------------------------------------------------------------
// Lifecycle commands
// ---------------------------------------------------------------------------

/// POST /v1/tenants/:id/pause
pub async fn pause_tenant(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<Tenant>, ApiError> {
    let tenant = state
        .lifecycle
        .pause(tenant_id, Utc::now())
        .map_err(into_api_error)?;
    Ok(Json(tenant))
}

/// POST /v1/tenants/:id/resume
pub async fn resume_tenant(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<Tenant>, ApiError> {
    let tenant = state
        .lifecycle
        .resume(tenant_id, Utc::now())
        .map_err(into_api_error)?;
    Ok(Json(tenant))
}

#[derive(Deserialize, Default)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// POST /v1/tenants/:id/cancel
pub async fn cancel_tenant(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<Tenant>, ApiError> {
    if let Some(reason) = &request.reason {
        if reason.len() > MAX_FIELD_LEN {
            return Err(bad_request("'reason' exceeds maximum length"));
        }
    }
    let tenant = state
        .lifecycle
        .cancel(tenant_id, request.reason, Utc::now())
        .map_err(into_api_error)?;
    metrics::counter!("billing.api.cancellations").increment(1);
    Ok(Json(tenant))
}

// ---------------------------------------------------------------------------
// Enforcement gate
// ---------------------------------------------------------------------------

/// GET /v1/tenants/:id/enforcement/products
pub async fn can_add_product(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<LimitDecision>, ApiError> {
    let decision = state
        .gate
        .can_add_product(tenant_id)
        .map_err(into_api_error)?;
    Ok(Json(decision))
}

/// GET /v1/tenants/:id/enforcement/orders
pub async fn can_add_order(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<LimitDecision>, ApiError> {
    let decision = state
        .gate
        .can_add_order_this_month(tenant_id, Utc::now())
        .map_err(into_api_error)?;
    Ok(Json(decision))
}

/// GET /v1/tenants/:id/enforcement/order-intake
pub async fn can_process_orders(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<OrderIntakeDecision>, ApiError> {
    let decision = state
        .gate
        .can_process_orders(tenant_id, Utc::now())
        .map_err(into_api_error)?;
    Ok(Json(decision))
}

// ---------------------------------------------------------------------------
// Tier catalog
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct TierQuery {
    pub country: String,
}

/// GET /v1/tiers?country=AE — active tiers for a market, cheapest first.
pub async fn list_tiers(
    State(state): State<AppState>,
    Query(query): Query<TierQuery>,
) -> Json<Vec<Tier>> {
    Json(state.catalog.list_for_country(&query.country))
}

// ---------------------------------------------------------------------------
// Operational endpoints
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub node_id: String,
    pub uptime_secs: u64,
}

/// GET /health — Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready — Readiness probe.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.start_time.elapsed().as_secs() > 0 {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /live — Liveness probe.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
