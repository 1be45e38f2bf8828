//! Enforcement gate — the query surface order intake and product creation
//! consult before any limited action.
//!
//! Decisions combine the tenant's effective lifecycle status with live
//! usage counters against tier limits. Nothing is cached: a decision is
//! valid for the moment it was computed, and callers that are about to
//! write should use the `try_*` variants, which re-check the counter
//! inside the same per-tenant lock that performs the insert.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::lifecycle::{SubscriptionEngine, Tenant, TenantStatus};
use crate::tiers::{Tier, TierCatalog, UNLIMITED};
use crate::usage::{OrderRecord, ProductRecord, UsageStores};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Outcome of a counted-resource check. `limit` and `remaining` are `-1`
/// for unlimited tiers, matching the tier sentinel.
#[derive(Debug, Clone, Serialize)]
pub struct LimitDecision {
    pub allowed: bool,
    pub limit: i64,
    pub current: i64,
    pub remaining: i64,
}

impl LimitDecision {
    fn check(limit: i64, current: i64) -> Self {
        if limit == UNLIMITED {
            return Self {
                allowed: true,
                limit: UNLIMITED,
                current,
                remaining: UNLIMITED,
            };
        }
        Self {
            allowed: current < limit,
            limit,
            current,
            remaining: (limit - current).max(0),
        }
    }
}

/// Outcome of the order-intake status gate.
#[derive(Debug, Clone, Serialize)]
pub struct OrderIntakeDecision {
    pub allowed: bool,
    pub status: TenantStatus,
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

pub struct EnforcementGate {
    lifecycle: Arc<SubscriptionEngine>,
    catalog: Arc<TierCatalog>,
    usage: Arc<UsageStores>,
}

impl EnforcementGate {
    pub fn new(
        lifecycle: Arc<SubscriptionEngine>,
        catalog: Arc<TierCatalog>,
        usage: Arc<UsageStores>,
    ) -> Self {
        Self {
            lifecycle,
            catalog,
            usage,
        }
    }

    /// May this tenant create another product right now?
    pub fn can_add_product(&self, tenant_id: Uuid) -> BillingResult<LimitDecision> {
        let tenant = self.lifecycle.get(tenant_id)?;
        let tier = self.tier_for(&tenant)?;
        Ok(LimitDecision::check(
            tier.product_limit,
            self.usage.product_count(tenant_id),
        ))
    }

    /// May this tenant accept another order this calendar month?
    pub fn can_add_order_this_month(
        &self,
        tenant_id: Uuid,
        now: DateTime<Utc>,
    ) -> BillingResult<LimitDecision> {
        let tenant = self.lifecycle.get(tenant_id)?;
        let tier = self.tier_for(&tenant)?;
        Ok(LimitDecision::check(
            tier.order_limit_per_month,
            self.usage.orders_this_month(tenant_id, now),
        ))
    }

    /// May this tenant process orders at all? False for overdue, suspended,
    /// and cancelled tenants. Paused tenants are also blocked: a paused
    /// billing clock should not accrue order volume (policy decision, see
    /// DESIGN.md).
    pub fn can_process_orders(
        &self,
        tenant_id: Uuid,
        now: DateTime<Utc>,
    ) -> BillingResult<OrderIntakeDecision> {
        let status = self.lifecycle.effective_status_of(tenant_id, now)?;
        let allowed = match status {
            TenantStatus::Trial | TenantStatus::Active => true,
            TenantStatus::Overdue
            | TenantStatus::Suspended
            | TenantStatus::Paused
            | TenantStatus::Cancelled => false,
        };
        Ok(OrderIntakeDecision { allowed, status })
    }

    /// Fail-fast guard for the order-intake path: `Err(InactiveSubscription)`
    /// instead of a silent denial.
    pub fn ensure_order_intake(&self, tenant_id: Uuid, now: DateTime<Utc>) -> BillingResult<()> {
        let decision = self.can_process_orders(tenant_id, now)?;
        if !decision.allowed {
            return Err(BillingError::InactiveSubscription {
                status: decision.status,
            });
        }
        Ok(())
    }

    /// Create a product record, re-checking the limit inside the store's
    /// per-tenant lock. The loser of a race on the last slot gets
    /// `LimitExceeded`.
    pub fn try_add_product(&self, tenant_id: Uuid, product_id: Uuid) -> BillingResult<()> {
        let tenant = self.lifecycle.get(tenant_id)?;
        let tier = self.tier_for(&tenant)?;
        let record = ProductRecord {
            id: product_id,
            tenant_id,
            active: true,
        };
        self.usage
            .insert_product_guarded(record, tier.product_limit)
            .map_err(|current| BillingError::LimitExceeded {
                limit: tier.product_limit,
                current,
            })
    }

    /// Place an order: status gate first, then the guarded monthly counter.
    pub fn try_place_order(
        &self,
        tenant_id: Uuid,
        order_id: Uuid,
        now: DateTime<Utc>,
    ) -> BillingResult<()> {
        self.ensure_order_intake(tenant_id, now)?;
        let tenant = self.lifecycle.get(tenant_id)?;
        let tier = self.tier_for(&tenant)?;
        let record = OrderRecord {
            id: order_id,
            tenant_id,
            cancelled: false,
            created_at: now,
        };
        self.usage
            .insert_order_guarded(record, tier.order_limit_per_month, now)
            .map_err(|current| BillingError::LimitExceeded {
                limit: tier.order_limit_per_month,
                current,
            })
    }

    /// The tier whose limits apply to a tenant. Trial tenants without a
    /// tier of their own get the entry-level tier for their country.
    fn tier_for(&self, tenant: &Tenant) -> BillingResult<Tier> {
        if let Some(tier_id) = tenant.current_tier_id {
            return self.catalog.get(tier_id).ok_or(BillingError::NotFound {
                kind: "tier",
                id: tier_id,
            });
        }
        self.catalog
            .cheapest_for_country(&tenant.country)
            .ok_or(BillingError::NotFound {
                kind: "tier",
                id: tenant.id,
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecyclePolicy;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 10, 9, 0, 0).unwrap()
    }

    struct Fixture {
        catalog: Arc<TierCatalog>,
        lifecycle: Arc<SubscriptionEngine>,
        usage: Arc<UsageStores>,
        gate: EnforcementGate,
    }

    fn fixture() -> Fixture {
        let catalog = Arc::new(TierCatalog::new());
        catalog.seed_demo_tiers();
        let lifecycle = Arc::new(SubscriptionEngine::new(
            Arc::clone(&catalog),
            LifecyclePolicy::default(),
        ));
        let usage = Arc::new(UsageStores::new());
        let gate = EnforcementGate::new(
            Arc::clone(&lifecycle),
            Arc::clone(&catalog),
            Arc::clone(&usage),
        );
        Fixture {
            catalog,
            lifecycle,
            usage,
            gate,
        }
    }

    /// Tenant on a named AE tier, mid-subscription.
    fn tenant_on(fx: &Fixture, tier_name: &str) -> Uuid {
        let tier = fx
            .catalog
            .list_for_country("AE")
            .into_iter()
            .find(|t| t.name == tier_name)
            .unwrap();
        let id = Uuid::new_v4();
        fx.lifecycle.insert(Tenant {
            id,
            country: "AE".into(),
            status: TenantStatus::Active,
            current_tier_id: Some(tier.id),
            trial_ends_at: None,
            subscription_starts_at: Some(now() - Duration::days(5)),
            subscription_ends_at: Some(now() + Duration::days(25)),
            paused_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            created_at: now() - Duration::days(5),
        });
        id
    }

    #[test]
    fn test_product_limit_boundary() {
        let fx = fixture();
        // AE Starter: product_limit = 10.
        let tenant = tenant_on(&fx, "Starter");

        for _ in 0..9 {
            fx.usage.add_product(ProductRecord {
                id: Uuid::new_v4(),
                tenant_id: tenant,
                active: true,
            });
        }

        let decision = fx.gate.can_add_product(tenant).unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);

        fx.usage.add_product(ProductRecord {
            id: Uuid::new_v4(),
            tenant_id: tenant,
            active: true,
        });

        let decision = fx.gate.can_add_product(tenant).unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.limit, 10);
        assert_eq!(decision.current, 10);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn test_unlimited_tier_always_allows() {
        let fx = fixture();
        // AE Pro: unlimited products and orders.
        let tenant = tenant_on(&fx, "Pro");

        for _ in 0..50 {
            fx.usage.add_product(ProductRecord {
                id: Uuid::new_v4(),
                tenant_id: tenant,
                active: true,
            });
        }

        let decision = fx.gate.can_add_product(tenant).unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.limit, UNLIMITED);
        assert_eq!(decision.remaining, UNLIMITED);
        assert_eq!(decision.current, 50);
    }

    #[test]
    fn test_trial_tenant_uses_entry_tier_limits() {
        let fx = fixture();
        let tenant = Uuid::new_v4();
        fx.lifecycle.start_trial(tenant, "AE", now()).unwrap();

        // Entry AE tier is Starter with product_limit 10.
        let decision = fx.gate.can_add_product(tenant).unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.limit, 10);
    }

    #[test]
    fn test_order_gate_per_status() {
        let fx = fixture();
        let now = now();

        let active = tenant_on(&fx, "Starter");
        assert!(fx.gate.can_process_orders(active, now).unwrap().allowed);

        let trial = Uuid::new_v4();
        fx.lifecycle.start_trial(trial, "AE", now).unwrap();
        assert!(fx.gate.can_process_orders(trial, now).unwrap().allowed);

        let overdue = Uuid::new_v4();
        fx.lifecycle
            .start_trial(overdue, "AE", now - Duration::days(16))
            .unwrap();
        let decision = fx.gate.can_process_orders(overdue, now).unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.status, TenantStatus::Overdue);

        let suspended = Uuid::new_v4();
        fx.lifecycle
            .start_trial(suspended, "AE", now - Duration::days(40))
            .unwrap();
        assert!(!fx.gate.can_process_orders(suspended, now).unwrap().allowed);

        let paused = tenant_on(&fx, "Starter");
        fx.lifecycle.pause(paused, now).unwrap();
        assert!(!fx.gate.can_process_orders(paused, now).unwrap().allowed);

        let cancelled = tenant_on(&fx, "Starter");
        fx.lifecycle.cancel(cancelled, None, now).unwrap();
        assert!(!fx.gate.can_process_orders(cancelled, now).unwrap().allowed);

        // The fail-fast variant names the blocking status.
        let err = fx.gate.ensure_order_intake(overdue, now).unwrap_err();
        assert!(matches!(
            err,
            BillingError::InactiveSubscription {
                status: TenantStatus::Overdue
            }
        ));
    }

    #[test]
    fn test_try_add_product_guards_the_last_slot() {
        let fx = fixture();
        let tenant = tenant_on(&fx, "Starter");

        for _ in 0..10 {
            fx.gate
                .try_add_product(tenant, Uuid::new_v4())
                .unwrap();
        }
        let err = fx
            .gate
            .try_add_product(tenant, Uuid::new_v4())
            .unwrap_err();
        assert!(matches!(
            err,
            BillingError::LimitExceeded {
                limit: 10,
                current: 10
            }
        ));
        assert_eq!(fx.usage.product_count(tenant), 10);
    }

    #[test]
    fn test_try_place_order_checks_status_then_limit() {
        let fx = fixture();
        let now = now();
        let tenant = tenant_on(&fx, "Starter");

        fx.gate.try_place_order(tenant, Uuid::new_v4(), now).unwrap();
        assert_eq!(fx.usage.orders_this_month(tenant, now), 1);

        let decision = fx.gate.can_add_order_this_month(tenant, now).unwrap();
        assert_eq!(decision.current, 1);
        assert_eq!(decision.remaining, 99);

        // A suspended tenant is refused before any counter is touched.
        let suspended = Uuid::new_v4();
        fx.lifecycle
            .start_trial(suspended, "AE", now - Duration::days(40))
            .unwrap();
        let err = fx
            .gate
            .try_place_order(suspended, Uuid::new_v4(), now)
            .unwrap_err();
        assert!(matches!(err, BillingError::InactiveSubscription { .. }));
        assert_eq!(fx.usage.orders_this_month(suspended, now), 0);
    }

    #[test]
    fn test_concurrent_creations_cannot_both_take_last_slot() {
        let fx = fixture();
        let tenant = tenant_on(&fx, "Starter");
        for _ in 0..9 {
            fx.gate
                .try_add_product(tenant, Uuid::new_v4())
                .unwrap();
        }

        let gate = Arc::new(fx.gate);
        let results: Vec<bool> = std::thread::scope(|s| {
            (0..4)
                .map(|_| {
                    let gate = Arc::clone(&gate);
                    s.spawn(move || gate.try_add_product(tenant, Uuid::new_v4()).is_ok())
                })
                .collect::<Vec<_>>()
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect()
        });

        assert_eq!(results.iter().filter(|ok| **ok).count(), 1);
        assert_eq!(fx.usage.product_count(tenant), 10);
    }
}
