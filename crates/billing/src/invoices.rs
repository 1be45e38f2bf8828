//! Invoice and payment workflow — creates billing invoices for trial
//! conversion, renewal, upgrade, and downgrade, accepts payment-proof
//! submissions, and carries them through the admin review pipeline.
//!
//! Invoices are stored per tenant, and every mutation runs under that
//! tenant's entry lock: the "at most one open invoice per tenant" invariant
//! is checked and the new row inserted in one atomic step, so two racing
//! tier-change requests cannot both get an invoice. A rejected invoice is
//! resubmittable in place (same id, same number), keeping a single source
//! of truth per billing cycle.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::lifecycle::{SubscriptionEngine, TenantStatus};
use crate::tiers::TierCatalog;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The billing event an invoice pays for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceType {
    TrialConversion,
    Renewal,
    Upgrade,
    Downgrade,
}

/// Invoice review pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Submitted,
    UnderReview,
    Approved,
    Rejected,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::UnderReview => "under_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// An open invoice blocks further tier-change requests.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Submitted | Self::UnderReview)
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admin review outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

/// One billing event for a tenant. Never deleted; rejected invoices stay
/// open for resubmission under the same id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    /// Human-readable sequential number, `INV-000042`. Never reused.
    pub number: String,
    pub tenant_id: Uuid,
    pub tier_id: Uuid,
    pub invoice_type: InvoiceType,
    pub amount: f64,
    pub currency: String,
    pub status: InvoiceStatus,
    /// Opaque reference to the uploaded receipt; set on submission.
    pub receipt_ref: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub due_date: DateTime<Utc>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    /// When set, approval replaces the tenant's renewal clock with
    /// `period_end` even for upgrades/downgrades.
    pub reset_billing_period: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// In-memory invoice workflow backed by `DashMap`, keyed by tenant.
pub struct InvoiceWorkflow {
    /// Tenant id -> that tenant's invoices, oldest first.
    invoices: Arc<DashMap<Uuid, Vec<Invoice>>>,
    /// Invoice id -> owning tenant. Written once at creation.
    index: Arc<DashMap<Uuid, Uuid>>,
    sequence: AtomicU64,
    lifecycle: Arc<SubscriptionEngine>,
    catalog: Arc<TierCatalog>,
}

impl InvoiceWorkflow {
    pub fn new(lifecycle: Arc<SubscriptionEngine>, catalog: Arc<TierCatalog>) -> Self {
        Self {
            invoices: Arc::new(DashMap::new()),
            index: Arc::new(DashMap::new()),
            sequence: AtomicU64::new(1),
            lifecycle,
            catalog,
        }
    }

    /// Open a billing invoice for a tier change (or renewal of the current
    /// tier). Rejected with `ConflictingInvoice` while another invoice is
    /// still pending, submitted, or under review for this tenant.
    pub fn request_tier_change(
        &self,
        tenant_id: Uuid,
        tier_id: Uuid,
        now: DateTime<Utc>,
    ) -> BillingResult<Invoice> {
        let tenant = self.lifecycle.get(tenant_id)?;
        let status = self.lifecycle.effective_status(&tenant, now);
        if !matches!(status, TenantStatus::Trial | TenantStatus::Active) {
            return Err(BillingError::InvalidTransition {
                from: status,
                command: "request_tier_change",
            });
        }

        let tier = self
            .catalog
            .get(tier_id)
            .filter(|t| t.active && t.country == tenant.country)
            .ok_or(BillingError::NotFound {
                kind: "tier",
                id: tier_id,
            })?;

        let invoice_type = match tenant.current_tier_id {
            None => InvoiceType::TrialConversion,
            Some(current_id) if current_id == tier_id => InvoiceType::Renewal,
            Some(current_id) => {
                let current_price = self
                    .catalog
                    .get(current_id)
                    .map(|t| t.monthly_price)
                    .unwrap_or(0.0);
                if tier.monthly_price < current_price {
                    InvoiceType::Downgrade
                } else {
                    InvoiceType::Upgrade
                }
            }
        };

        let policy = self.lifecycle.policy();

        // Uniqueness check and insert are one atomic step under the
        // tenant's entry lock.
        let mut entry = self.invoices.entry(tenant_id).or_default();
        if let Some(open) = entry.iter().find(|i| i.status.is_open()) {
            return Err(BillingError::ConflictingInvoice {
                invoice_id: open.id,
                number: open.number.clone(),
            });
        }

        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let invoice = Invoice {
            id: Uuid::new_v4(),
            number: format!("INV-{seq:06}"),
            tenant_id,
            tier_id,
            invoice_type,
            amount: tier.monthly_price,
            currency: tier.currency.clone(),
            status: InvoiceStatus::Pending,
            receipt_ref: None,
            submitted_at: None,
            reviewed_at: None,
            rejection_reason: None,
            due_date: now + Duration::days(policy.invoice_due_days),
            period_start: now,
            period_end: now + Duration::days(policy.billing_period_days),
            reset_billing_period: false,
            created_at: now,
        };
        entry.push(invoice.clone());
        drop(entry);
        self.index.insert(invoice.id, tenant_id);

        info!(
            tenant_id = %tenant_id,
            invoice = %invoice.number,
            invoice_type = ?invoice_type,
            amount = invoice.amount,
            "Invoice created"
        );
        Ok(invoice)
    }

    /// Attach a payment receipt to a pending or rejected invoice and hand
    /// it to the review queue. Resubmission reuses the same invoice row and
    /// clears the previous rejection reason.
    pub fn submit_payment_proof(
        &self,
        invoice_id: Uuid,
        receipt_ref: &str,
        now: DateTime<Utc>,
    ) -> BillingResult<Invoice> {
        self.mutate(invoice_id, |invoice, siblings| {
            match invoice.status {
                InvoiceStatus::Pending | InvoiceStatus::Rejected => {}
                actual => {
                    return Err(BillingError::InvalidState {
                        expected: "pending or rejected",
                        actual,
                    })
                }
            }
            // A rejected invoice must not re-enter the queue if a newer
            // invoice was opened for the tenant in the meantime.
            if let Some(open) = siblings.iter().find(|i| i.status.is_open()) {
                return Err(BillingError::ConflictingInvoice {
                    invoice_id: open.id,
                    number: open.number.clone(),
                });
            }
            invoice.status = InvoiceStatus::Submitted;
            invoice.receipt_ref = Some(receipt_ref.to_string());
            invoice.submitted_at = Some(now);
            invoice.rejection_reason = None;
            Ok(())
        })
    }

    /// Optional intermediate marker: an admin has picked the invoice up.
    pub fn begin_review(&self, invoice_id: Uuid) -> BillingResult<Invoice> {
        self.mutate(invoice_id, |invoice, _| match invoice.status {
            InvoiceStatus::Submitted => {
                invoice.status = InvoiceStatus::UnderReview;
                Ok(())
            }
            InvoiceStatus::UnderReview => Ok(()),
            actual => Err(BillingError::InvalidState {
                expected: "submitted",
                actual,
            }),
        })
    }

    /// Admin review. Approval feeds the outcome into the subscription
    /// state machine before the invoice is marked approved; if the
    /// lifecycle rejects the application, the invoice stays reviewable.
    /// Re-approving an approved invoice (or re-rejecting a rejected one)
    /// is a no-op so reviewers may retry safely.
    pub fn review(
        &self,
        invoice_id: Uuid,
        decision: ReviewDecision,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> BillingResult<Invoice> {
        let lifecycle = Arc::clone(&self.lifecycle);
        self.mutate(invoice_id, |invoice, _| {
            // Idempotent retries.
            match (invoice.status, decision) {
                (InvoiceStatus::Approved, ReviewDecision::Approve)
                | (InvoiceStatus::Rejected, ReviewDecision::Reject) => return Ok(()),
                _ => {}
            }

            match invoice.status {
                InvoiceStatus::Submitted | InvoiceStatus::UnderReview => {}
                actual => {
                    return Err(BillingError::InvalidState {
                        expected: "submitted or under review",
                        actual,
                    })
                }
            }

            match decision {
                ReviewDecision::Approve => {
                    let mut approved = invoice.clone();
                    approved.status = InvoiceStatus::Approved;
                    approved.reviewed_at = Some(now);
                    // Fail closed: the tenant transition happens first and
                    // the invoice is only marked approved if it succeeds.
                    lifecycle.apply_approved_invoice(&approved, now)?;
                    *invoice = approved;
                    info!(invoice = %invoice.number, "Invoice approved");
                    Ok(())
                }
                ReviewDecision::Reject => {
                    let reason = reason
                        .as_deref()
                        .map(str::trim)
                        .filter(|r| !r.is_empty())
                        .ok_or(BillingError::MissingReason)?;
                    invoice.status = InvoiceStatus::Rejected;
                    invoice.rejection_reason = Some(reason.to_string());
                    invoice.reviewed_at = Some(now);
                    info!(invoice = %invoice.number, reason = reason, "Invoice rejected");
                    Ok(())
                }
            }
        })
    }

    pub fn get(&self, invoice_id: Uuid) -> BillingResult<Invoice> {
        let tenant_id = self.tenant_of(invoice_id)?;
        let entry = self.invoices.get(&tenant_id).ok_or(BillingError::NotFound {
            kind: "invoice",
            id: invoice_id,
        })?;
        entry
            .iter()
            .find(|i| i.id == invoice_id)
            .cloned()
            .ok_or(BillingError::NotFound {
                kind: "invoice",
                id: invoice_id,
            })
    }

    /// The tenant's current open invoice, if any.
    pub fn open_invoice_for(&self, tenant_id: Uuid) -> Option<Invoice> {
        self.invoices
            .get(&tenant_id)
            .and_then(|v| v.iter().find(|i| i.status.is_open()).cloned())
    }

    pub fn list_for_tenant(&self, tenant_id: Uuid) -> Vec<Invoice> {
        self.invoices
            .get(&tenant_id)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Admin queue: submitted / under-review invoices, oldest submission first.
    pub fn pending_for_review(&self) -> Vec<Invoice> {
        let mut queue: Vec<Invoice> = self
            .invoices
            .iter()
            .flat_map(|e| {
                e.value()
                    .iter()
                    .filter(|i| {
                        matches!(
                            i.status,
                            InvoiceStatus::Submitted | InvoiceStatus::UnderReview
                        )
                    })
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        queue.sort_by_key(|i| i.submitted_at);
        queue
    }

    /// Apply `f` to one invoice under its tenant's entry lock. `f` also
    /// sees the tenant's other invoices for cross-row guards.
    fn mutate<F>(&self, invoice_id: Uuid, f: F) -> BillingResult<Invoice>
    where
        F: FnOnce(&mut Invoice, &[Invoice]) -> BillingResult<()>,
    {
        let tenant_id = self.tenant_of(invoice_id)?;
        let mut entry = self
            .invoices
            .get_mut(&tenant_id)
            .ok_or(BillingError::NotFound {
                kind: "invoice",
                id: invoice_id,
            })?;

        let pos = entry
            .iter()
            .position(|i| i.id == invoice_id)
            .ok_or(BillingError::NotFound {
                kind: "invoice",
                id: invoice_id,
            })?;

        let (before, rest) = entry.split_at_mut(pos);
        let (invoice, after) = rest.split_first_mut().expect("position is in bounds");
        let siblings: Vec<Invoice> = before.iter().chain(after.iter()).cloned().collect();

        f(invoice, &siblings)?;
        Ok(invoice.clone())
    }

    fn tenant_of(&self, invoice_id: Uuid) -> BillingResult<Uuid> {
        self.index
            .get(&invoice_id)
            .map(|t| *t)
            .ok_or(BillingError::NotFound {
                kind: "invoice",
                id: invoice_id,
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
