use thiserror::Error;
use uuid::Uuid;

use crate::invoices::InvoiceStatus;
use crate::lifecycle::TenantStatus;

pub type BillingResult<T> = Result<T, BillingError>;

/// Error taxonomy for the subscription and billing engine.
///
/// Every mutating operation fails closed: on a guard violation or a lost
/// concurrent write the operation rejects and leaves state unchanged.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("`{command}` is not a valid transition from {from}")]
    InvalidTransition {
        from: TenantStatus,
        command: &'static str,
    },

    #[error("tenant already has open invoice {number} ({invoice_id})")]
    ConflictingInvoice { invoice_id: Uuid, number: String },

    #[error("invoice is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: InvoiceStatus,
    },

    #[error("a non-empty rejection reason is required")]
    MissingReason,

    #[error("limit exceeded: {current} of {limit} used")]
    LimitExceeded { limit: i64, current: i64 },

    #[error("subscription inactive: tenant is {status}")]
    InactiveSubscription { status: TenantStatus },

    #[error("{kind} `{id}` not found")]
    NotFound { kind: &'static str, id: Uuid },
}
