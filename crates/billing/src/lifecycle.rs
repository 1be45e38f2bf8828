//! Subscription state machine — owns each tenant's lifecycle status and its
//! time boundaries, and is the only writer of tenant billing state.
//!
//! Time-based transitions (trial lapse, period lapse, grace-window
//! suspension) are never driven by a background clock: they are derived on
//! every read and re-checked inside every command guard, so a query answer
//! can never report a stale flag. Each command runs its guard and effect
//! under the tenant's `DashMap` entry lock, which gives the
//! compare-and-swap semantics the concurrency model requires: a losing
//! concurrent writer observes the new state and gets `InvalidTransition`.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use orderdesk_core::config::BillingConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::invoices::{Invoice, InvoiceType};
use crate::tiers::{Tier, TierCatalog};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Tenant lifecycle state. Exactly one at any time; CANCELLED is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Trial,
    Active,
    Overdue,
    Suspended,
    Paused,
    Cancelled,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trial => "trial",
            Self::Active => "active",
            Self::Overdue => "overdue",
            Self::Suspended => "suspended",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One business account governed by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub country: String,
    pub status: TenantStatus,
    pub current_tier_id: Option<Uuid>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub subscription_starts_at: Option<DateTime<Utc>>,
    pub subscription_ends_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle policy constants, sourced from `BillingConfig`.
#[derive(Debug, Clone)]
pub struct LifecyclePolicy {
    pub trial_days: i64,
    pub billing_period_days: i64,
    pub grace_days: i64,
    pub ending_soon_days: i64,
    pub ending_urgent_days: i64,
    pub invoice_due_days: i64,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self::from_config(&BillingConfig::default())
    }
}

impl LifecyclePolicy {
    pub fn from_config(cfg: &BillingConfig) -> Self {
        Self {
            trial_days: cfg.trial_days,
            billing_period_days: cfg.billing_period_days,
            grace_days: cfg.grace_days,
            ending_soon_days: cfg.ending_soon_days,
            ending_urgent_days: cfg.ending_urgent_days,
            invoice_due_days: cfg.invoice_due_days,
        }
    }
}

/// Derived, read-only view of a tenant's subscription. Recomputed on every
/// query, never stored.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub tenant_id: Uuid,
    pub status: TenantStatus,
    pub tier: Option<Tier>,
    pub trial_days_remaining: i64,
    pub subscription_days_remaining: i64,
    pub ending_soon: bool,
    pub ending_urgent: bool,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// In-memory tenant lifecycle engine backed by `DashMap`.
pub struct SubscriptionEngine {
    tenants: Arc<DashMap<Uuid, Tenant>>,
    catalog: Arc<TierCatalog>,
    policy: LifecyclePolicy,
}

impl SubscriptionEngine {
    pub fn new(catalog: Arc<TierCatalog>, policy: LifecyclePolicy) -> Self {
        Self {
            tenants: Arc::new(DashMap::new()),
            catalog,
            policy,
        }
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    /// Register a tenant at signup and start its trial clock.
    pub fn start_trial(&self, tenant_id: Uuid, country: &str, now: DateTime<Utc>) -> BillingResult<Tenant> {
        if self.tenants.contains_key(&tenant_id) {
            let from = self.effective_status_of(tenant_id, now)?;
            return Err(BillingError::InvalidTransition {
                from,
                command: "start_trial",
            });
        }
        let tenant = Tenant {
            id: tenant_id,
            country: country.to_string(),
            status: TenantStatus::Trial,
            current_tier_id: None,
            trial_ends_at: Some(now + Duration::days(self.policy.trial_days)),
            subscription_starts_at: None,
            subscription_ends_at: None,
            paused_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            created_at: now,
        };
        self.tenants.insert(tenant_id, tenant.clone());
        info!(tenant_id = %tenant_id, country = country, "Tenant trial started");
        Ok(tenant)
    }

    /// Import an existing tenant record (seeding, signup migration, tests).
    pub fn insert(&self, tenant: Tenant) {
        self.tenants.insert(tenant.id, tenant);
    }

    pub fn get(&self, tenant_id: Uuid) -> BillingResult<Tenant> {
        self.tenants
            .get(&tenant_id)
            .map(|t| t.clone())
            .ok_or(BillingError::NotFound {
                kind: "tenant",
                id: tenant_id,
            })
    }

    /// The status a tenant is effectively in at `now`, applying the passive
    /// time-based transitions to the persisted status:
    ///
    /// - TRIAL past `trial_ends_at` is OVERDUE
    /// - ACTIVE past `subscription_ends_at` is OVERDUE
    /// - OVERDUE for longer than the grace window is SUSPENDED
    pub fn effective_status(&self, tenant: &Tenant, now: DateTime<Utc>) -> TenantStatus {
        let deadline = match tenant.status {
            TenantStatus::Trial => tenant.trial_ends_at,
            TenantStatus::Active => tenant.subscription_ends_at,
            // Persisted OVERDUE keeps counting from whichever boundary lapsed.
            TenantStatus::Overdue => tenant.subscription_ends_at.or(tenant.trial_ends_at),
            TenantStatus::Suspended | TenantStatus::Paused | TenantStatus::Cancelled => {
                return tenant.status
            }
        };
        match deadline {
            Some(deadline) if deadline < now => {
                if now > deadline + Duration::days(self.policy.grace_days) {
                    TenantStatus::Suspended
                } else {
                    TenantStatus::Overdue
                }
            }
            _ => match tenant.status {
                // OVERDUE with no lapsed deadline should not occur; keep it.
                TenantStatus::Overdue => TenantStatus::Overdue,
                other => other,
            },
        }
    }

    pub fn effective_status_of(&self, tenant_id: Uuid, now: DateTime<Utc>) -> BillingResult<TenantStatus> {
        let tenant = self.get(tenant_id)?;
        Ok(self.effective_status(&tenant, now))
    }

    /// Pause an active subscription. Time spent paused does not consume
    /// billing period; `resume` shifts `subscription_ends_at` accordingly.
    pub fn pause(&self, tenant_id: Uuid, now: DateTime<Utc>) -> BillingResult<Tenant> {
        self.transition(tenant_id, "pause", now, |tenant, status, _policy| {
            if status != TenantStatus::Active {
                return Err(BillingError::InvalidTransition {
                    from: status,
                    command: "pause",
                });
            }
            tenant.status = TenantStatus::Paused;
            tenant.paused_at = Some(now);
            Ok(())
        })
    }

    /// Resume a paused subscription, extending the billing period by the
    /// elapsed pause duration.
    pub fn resume(&self, tenant_id: Uuid, now: DateTime<Utc>) -> BillingResult<Tenant> {
        self.transition(tenant_id, "resume", now, |tenant, status, _policy| {
            if status != TenantStatus::Paused {
                return Err(BillingError::InvalidTransition {
                    from: status,
                    command: "resume",
                });
            }
            let paused_at = tenant.paused_at.unwrap_or(now);
            let paused_for = now - paused_at;
            if let Some(ends_at) = tenant.subscription_ends_at {
                tenant.subscription_ends_at = Some(ends_at + paused_for);
            }
            tenant.status = TenantStatus::Active;
            tenant.paused_at = None;
            Ok(())
        })
    }

    /// Cancel a subscription. Terminal; the record is retained.
    pub fn cancel(
        &self,
        tenant_id: Uuid,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> BillingResult<Tenant> {
        self.transition(tenant_id, "cancel", now, |tenant, status, _policy| {
            match status {
                TenantStatus::Trial
                | TenantStatus::Active
                | TenantStatus::Overdue
                | TenantStatus::Paused => {}
                TenantStatus::Suspended | TenantStatus::Cancelled => {
                    return Err(BillingError::InvalidTransition {
                        from: status,
                        command: "cancel",
                    })
                }
            }
            tenant.status = TenantStatus::Cancelled;
            tenant.cancelled_at = Some(now);
            tenant.cancellation_reason = reason;
            Ok(())
        })
    }

    /// Apply an approved invoice to the tenant, called by the invoice
    /// workflow under its review lock.
    ///
    /// Trial conversions and renewals activate a fresh billing period —
    /// payment rescues an overdue or suspended tenant. Upgrades and
    /// downgrades swap the tier on an already-active tenant and leave the
    /// renewal clock untouched unless the invoice explicitly carries a new
    /// billing period.
    pub fn apply_approved_invoice(&self, invoice: &Invoice, now: DateTime<Utc>) -> BillingResult<Tenant> {
        self.transition(invoice.tenant_id, "approve_invoice", now, |tenant, status, policy| {
            match invoice.invoice_type {
                InvoiceType::TrialConversion | InvoiceType::Renewal => {
                    if status == TenantStatus::Cancelled {
                        return Err(BillingError::InvalidTransition {
                            from: status,
                            command: "approve_invoice",
                        });
                    }
                    tenant.status = TenantStatus::Active;
                    tenant.current_tier_id = Some(invoice.tier_id);
                    tenant.subscription_starts_at = Some(now);
                    tenant.subscription_ends_at =
                        Some(now + Duration::days(policy.billing_period_days));
                    tenant.paused_at = None;
                }
                InvoiceType::Upgrade | InvoiceType::Downgrade => {
                    if status != TenantStatus::Active {
                        return Err(BillingError::InvalidTransition {
                            from: status,
                            command: "approve_invoice",
                        });
                    }
                    tenant.current_tier_id = Some(invoice.tier_id);
                    if invoice.reset_billing_period {
                        tenant.subscription_ends_at = Some(invoice.period_end);
                    }
                }
            }
            Ok(())
        })
    }

    /// Full derived view for the status query surface.
    pub fn status_report(&self, tenant_id: Uuid, now: DateTime<Utc>) -> BillingResult<StatusReport> {
        let tenant = self.get(tenant_id)?;
        let status = self.effective_status(&tenant, now);

        let trial_days_remaining = days_remaining(tenant.trial_ends_at, now);
        let subscription_days_remaining = days_remaining(tenant.subscription_ends_at, now);

        // Whichever clock applies to the current status drives the
        // ending-soon styling.
        let relevant_days = match status {
            TenantStatus::Trial => Some(trial_days_remaining),
            TenantStatus::Active | TenantStatus::Paused => Some(subscription_days_remaining),
            _ => None,
        };
        let ending_soon = relevant_days.is_some_and(|d| d <= self.policy.ending_soon_days);
        let ending_urgent = relevant_days.is_some_and(|d| d <= self.policy.ending_urgent_days);

        let tier = tenant.current_tier_id.and_then(|id| self.catalog.get(id));

        Ok(StatusReport {
            tenant_id,
            status,
            tier,
            trial_days_remaining,
            subscription_days_remaining,
            ending_soon,
            ending_urgent,
        })
    }

    /// Run a command as a single atomic update: refresh the passive
    /// time-based status, check the guard, and apply the effect, all under
    /// the tenant's entry lock. On a guard failure nothing is mutated.
    fn transition<F>(
        &self,
        tenant_id: Uuid,
        command: &'static str,
        now: DateTime<Utc>,
        apply: F,
    ) -> BillingResult<Tenant>
    where
        F: FnOnce(&mut Tenant, TenantStatus, &LifecyclePolicy) -> BillingResult<()>,
    {
        let mut entry = self
            .tenants
            .get_mut(&tenant_id)
            .ok_or(BillingError::NotFound {
                kind: "tenant",
                id: tenant_id,
            })?;

        let status = self.effective_status(&entry, now);
        // Opportunistic persistence of a derived flip; we hold the lock.
        entry.status = status;

        apply(&mut entry, status, &self.policy)?;
        let updated = entry.clone();
        drop(entry);

        info!(
            tenant_id = %tenant_id,
            command = command,
            from = %status,
            to = %updated.status,
            "Tenant transition applied"
        );
        Ok(updated)
    }
}

/// Whole days until `deadline`, rounded up, floored at zero.
fn days_remaining(deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> i64 {
    match deadline {
        Some(deadline) => {
            let secs = (deadline - now).num_seconds();
            if secs <= 0 {
                0
            } else {
                (secs + 86_399) / 86_400
            }
        }
        None => 0,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 10, 9, 0, 0).unwrap()
    }

    fn engine() -> SubscriptionEngine {
        let catalog = Arc::new(TierCatalog::new());
        catalog.seed_demo_tiers();
        SubscriptionEngine::new(catalog, LifecyclePolicy::default())
    }

    fn active_tenant(engine: &SubscriptionEngine, now: DateTime<Utc>) -> Tenant {
        let tenant = Tenant {
            id: Uuid::new_v4(),
            country: "AE".into(),
            status: TenantStatus::Active,
            current_tier_id: None,
            trial_ends_at: None,
            subscription_starts_at: Some(now - Duration::days(5)),
            subscription_ends_at: Some(now + Duration::days(25)),
            paused_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            created_at: now - Duration::days(5),
        };
        engine.insert(tenant.clone());
        tenant
    }

    #[test]
    fn test_start_trial_sets_clock() {
        let engine = engine();
        let now = now();
        let tenant = engine.start_trial(Uuid::new_v4(), "AE", now).unwrap();

        assert_eq!(tenant.status, TenantStatus::Trial);
        assert_eq!(tenant.trial_ends_at, Some(now + Duration::days(14)));
        assert!(tenant.current_tier_id.is_none());

        // Signup is not repeatable.
        let err = engine.start_trial(tenant.id, "AE", now).unwrap_err();
        assert!(matches!(err, BillingError::InvalidTransition { .. }));
    }

    #[test]
    fn test_lapsed_trial_reports_overdue() {
        let engine = engine();
        let now = now();
        let tenant = engine
            .start_trial(Uuid::new_v4(), "AE", now - Duration::days(15))
            .unwrap();

        let report = engine.status_report(tenant.id, now).unwrap();
        assert_eq!(report.status, TenantStatus::Overdue);
        assert_eq!(report.trial_days_remaining, 0);

        // Persisted status is untouched by the read.
        assert_eq!(engine.get(tenant.id).unwrap().status, TenantStatus::Trial);
    }

    #[test]
    fn test_overdue_past_grace_is_suspended() {
        let engine = engine();
        let now = now();
        // Trial ended 8 days ago; grace window is 7.
        let tenant = engine
            .start_trial(Uuid::new_v4(), "AE", now - Duration::days(22))
            .unwrap();

        let report = engine.status_report(tenant.id, now).unwrap();
        assert_eq!(report.status, TenantStatus::Suspended);

        // One day inside the grace window it was still overdue.
        let earlier = now - Duration::days(2);
        assert_eq!(
            engine.effective_status_of(tenant.id, earlier).unwrap(),
            TenantStatus::Overdue
        );
    }

    #[test]
    fn test_pause_resume_extends_period() {
        let engine = engine();
        let now = now();
        let tenant = active_tenant(&engine, now);
        let original_end = tenant.subscription_ends_at.unwrap();

        let paused = engine.pause(tenant.id, now).unwrap();
        assert_eq!(paused.status, TenantStatus::Paused);
        assert_eq!(paused.paused_at, Some(now));

        let resumed = engine.resume(tenant.id, now + Duration::days(3)).unwrap();
        assert_eq!(resumed.status, TenantStatus::Active);
        assert!(resumed.paused_at.is_none());
        assert_eq!(
            resumed.subscription_ends_at,
            Some(original_end + Duration::days(3))
        );
    }

    #[test]
    fn test_pause_requires_active() {
        let engine = engine();
        let now = now();
        let trial = engine.start_trial(Uuid::new_v4(), "AE", now).unwrap();

        let err = engine.pause(trial.id, now).unwrap_err();
        assert!(matches!(
            err,
            BillingError::InvalidTransition {
                from: TenantStatus::Trial,
                command: "pause"
            }
        ));

        // Guard failure leaves the tenant unchanged.
        assert_eq!(engine.get(trial.id).unwrap().status, TenantStatus::Trial);
    }

    #[test]
    fn test_cancel_is_terminal() {
        let engine = engine();
        let now = now();
        let tenant = active_tenant(&engine, now);

        let cancelled = engine
            .cancel(tenant.id, Some("closing down".into()), now)
            .unwrap();
        assert_eq!(cancelled.status, TenantStatus::Cancelled);
        assert_eq!(cancelled.cancellation_reason.as_deref(), Some("closing down"));
        assert_eq!(cancelled.cancelled_at, Some(now));

        // No transition leaves CANCELLED.
        assert!(engine.pause(tenant.id, now).is_err());
        assert!(engine.resume(tenant.id, now).is_err());
        assert!(engine.cancel(tenant.id, None, now).is_err());
        assert_eq!(
            engine.effective_status_of(tenant.id, now + Duration::days(400)).unwrap(),
            TenantStatus::Cancelled
        );
    }

    #[test]
    fn test_suspended_cannot_cancel() {
        let engine = engine();
        let now = now();
        let tenant = engine
            .start_trial(Uuid::new_v4(), "AE", now - Duration::days(30))
            .unwrap();
        assert_eq!(
            engine.effective_status_of(tenant.id, now).unwrap(),
            TenantStatus::Suspended
        );
        let err = engine.cancel(tenant.id, None, now).unwrap_err();
        assert!(matches!(
            err,
            BillingError::InvalidTransition {
                from: TenantStatus::Suspended,
                ..
            }
        ));
    }

    #[test]
    fn test_ending_soon_flags() {
        let engine = engine();
        let now = now();
        let mut tenant = active_tenant(&engine, now);
        tenant.subscription_ends_at = Some(now + Duration::days(4));
        engine.insert(tenant.clone());

        let report = engine.status_report(tenant.id, now).unwrap();
        assert_eq!(report.subscription_days_remaining, 4);
        assert!(report.ending_soon);
        assert!(!report.ending_urgent);

        tenant.subscription_ends_at = Some(now + Duration::hours(30));
        engine.insert(tenant.clone());
        let report = engine.status_report(tenant.id, now).unwrap();
        assert_eq!(report.subscription_days_remaining, 2);
        assert!(report.ending_urgent);
    }

    #[test]
    fn test_days_remaining_rounds_up() {
        let now = now();
        assert_eq!(days_remaining(Some(now + Duration::hours(1)), now), 1);
        assert_eq!(days_remaining(Some(now + Duration::days(5)), now), 5);
        assert_eq!(days_remaining(Some(now - Duration::hours(1)), now), 0);
        assert_eq!(days_remaining(None, now), 0);
    }

    #[test]
    fn test_unknown_tenant_not_found() {
        let engine = engine();
        let err = engine.get(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, BillingError::NotFound { kind: "tenant", .. }));
    }
}
