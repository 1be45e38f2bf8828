//! Tier catalog — read-only subscription plans scoped by tenant country.
//!
//! Tiers are looked up by the lifecycle engine, invoice workflow, and
//! enforcement gate; nothing in this crate ever mutates a tier after it is
//! registered. Backed by DashMap for development; swap to PostgreSQL for
//! production.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Sentinel meaning "no limit" in any tier limit field.
pub const UNLIMITED: i64 = -1;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A subscription plan with price and resource limits. Immutable per version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tier {
    pub id: Uuid,
    pub country: String,
    pub name: String,
    pub currency: String,
    pub monthly_price: f64,
    /// Maximum active products; `-1` for unlimited.
    pub product_limit: i64,
    /// Maximum non-cancelled orders per calendar month; `-1` for unlimited.
    pub order_limit_per_month: i64,
    /// Storage allowance in MB; `-1` for unlimited.
    pub storage_limit_mb: i64,
    pub active: bool,
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// In-memory tier catalog backed by `DashMap`.
pub struct TierCatalog {
    tiers: Arc<DashMap<Uuid, Tier>>,
}

impl Default for TierCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl TierCatalog {
    pub fn new() -> Self {
        Self {
            tiers: Arc::new(DashMap::new()),
        }
    }

    /// Register a tier. Called at startup / by catalog administration,
    /// never by the engine itself.
    pub fn insert(&self, tier: Tier) {
        self.tiers.insert(tier.id, tier);
    }

    pub fn get(&self, id: Uuid) -> Option<Tier> {
        self.tiers.get(&id).map(|t| t.clone())
    }

    /// Active tiers available in a country, cheapest first.
    pub fn list_for_country(&self, country: &str) -> Vec<Tier> {
        let mut tiers: Vec<Tier> = self
            .tiers
            .iter()
            .filter(|e| e.value().active && e.value().country == country)
            .map(|e| e.value().clone())
            .collect();
        tiers.sort_by(|a, b| a.monthly_price.total_cmp(&b.monthly_price));
        tiers
    }

    /// The entry-level tier for a country. Trial tenants without a tier of
    /// their own are enforced against this one.
    pub fn cheapest_for_country(&self, country: &str) -> Option<Tier> {
        self.list_for_country(country).into_iter().next()
    }

    /// Seed demo tiers for two markets.
    pub fn seed_demo_tiers(&self) {
        let mk = |country: &str, name: &str, currency: &str, price: f64, products: i64, orders: i64, storage: i64| Tier {
            id: Uuid::new_v4(),
            country: country.into(),
            name: name.into(),
            currency: currency.into(),
            monthly_price: price,
            product_limit: products,
            order_limit_per_month: orders,
            storage_limit_mb: storage,
            active: true,
        };

        self.insert(mk("AE", "Starter", "AED", 49.0, 10, 100, 500));
        self.insert(mk("AE", "Growth", "AED", 99.0, 100, 1_000, 2_048));
        self.insert(mk("AE", "Pro", "AED", 199.0, UNLIMITED, UNLIMITED, 10_240));

        self.insert(mk("US", "Starter", "USD", 19.0, 10, 100, 500));
        self.insert(mk("US", "Growth", "USD", 49.0, 100, 1_000, 2_048));
        self.insert(mk("US", "Pro", "USD", 99.0, UNLIMITED, UNLIMITED, 10_240));

        info!("Seeded demo tier catalog: 3 tiers x 2 countries");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_for_country_sorted_and_filtered() {
        let catalog = TierCatalog::new();
        catalog.seed_demo_tiers();

        let ae = catalog.list_for_country("AE");
        assert_eq!(ae.len(), 3);
        assert_eq!(ae[0].name, "Starter");
        assert_eq!(ae[2].name, "Pro");
        assert!(ae.iter().all(|t| t.currency == "AED"));

        let cheapest = catalog.cheapest_for_country("AE").unwrap();
        assert_eq!(cheapest.monthly_price, 49.0);

        assert!(catalog.list_for_country("FR").is_empty());
    }

    #[test]
    fn test_inactive_tiers_hidden() {
        let catalog = TierCatalog::new();
        let mut tier = Tier {
            id: Uuid::new_v4(),
            country: "AE".into(),
            name: "Legacy".into(),
            currency: "AED".into(),
            monthly_price: 29.0,
            product_limit: 5,
            order_limit_per_month: 50,
            storage_limit_mb: 100,
            active: false,
        };
        catalog.insert(tier.clone());
        assert!(catalog.list_for_country("AE").is_empty());
        // Still resolvable by id for tenants already on it.
        assert!(catalog.get(tier.id).is_some());

        tier.active = true;
        catalog.insert(tier);
        assert_eq!(catalog.list_for_country("AE").len(), 1);
    }
}
