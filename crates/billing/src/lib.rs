//! Tenant subscription lifecycle and billing-enforcement engine for the
//! OrderDesk admin console.
//!
//! Decides, per tenant, whether it may create products, accept orders, or
//! must be blocked — from trial/paid status, tier limits, invoice state,
//! and payment-proof review outcomes. Data stored in DashMap
//! (development); swap to PostgreSQL for production.

pub mod enforcement;
pub mod error;
pub mod invoices;
pub mod lifecycle;
pub mod tiers;
pub mod usage;

pub use enforcement::{EnforcementGate, LimitDecision, OrderIntakeDecision};
pub use error::{BillingError, BillingResult};
pub use invoices::{Invoice, InvoiceStatus, InvoiceType, InvoiceWorkflow, ReviewDecision};
pub use lifecycle::{
    LifecyclePolicy, StatusReport, SubscriptionEngine, Tenant, TenantStatus,
};
pub use tiers::{Tier, TierCatalog, UNLIMITED};
pub use usage::{FileRecord, OrderRecord, ProductRecord, UsageSnapshot, UsageStores};
