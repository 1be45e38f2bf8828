//! Usage counters — per-tenant consumption derived on demand from the
//! product, order, and file record stores.
//!
//! Nothing here is cached beyond a single enforcement check: counts are
//! recomputed from the records every time, so a limit decision never acts
//! on a stale snapshot. The write helpers exist for the CRUD collaborators
//! (and tests); the engine itself only reads.

use chrono::{DateTime, Datelike, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub cancelled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub size_bytes: u64,
}

/// Point-in-time consumption for one tenant. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct UsageSnapshot {
    pub product_count: i64,
    pub orders_this_month: i64,
    pub storage_used_mb: f64,
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

/// In-memory product/order/file record stores, keyed by tenant.
pub struct UsageStores {
    products: Arc<DashMap<Uuid, Vec<ProductRecord>>>,
    orders: Arc<DashMap<Uuid, Vec<OrderRecord>>>,
    files: Arc<DashMap<Uuid, Vec<FileRecord>>>,
}

impl Default for UsageStores {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageStores {
    pub fn new() -> Self {
        Self {
            products: Arc::new(DashMap::new()),
            orders: Arc::new(DashMap::new()),
            files: Arc::new(DashMap::new()),
        }
    }

    // --- write side (collaborators) ---

    pub fn add_product(&self, record: ProductRecord) {
        self.products.entry(record.tenant_id).or_default().push(record);
    }

    pub fn deactivate_product(&self, tenant_id: Uuid, product_id: Uuid) {
        if let Some(mut records) = self.products.get_mut(&tenant_id) {
            if let Some(p) = records.iter_mut().find(|p| p.id == product_id) {
                p.active = false;
            }
        }
    }

    pub fn add_order(&self, record: OrderRecord) {
        self.orders.entry(record.tenant_id).or_default().push(record);
    }

    pub fn cancel_order(&self, tenant_id: Uuid, order_id: Uuid) {
        if let Some(mut records) = self.orders.get_mut(&tenant_id) {
            if let Some(o) = records.iter_mut().find(|o| o.id == order_id) {
                o.cancelled = true;
            }
        }
    }

    pub fn add_file(&self, record: FileRecord) {
        self.files.entry(record.tenant_id).or_default().push(record);
    }

    // --- guarded write side (enforcement) ---

    /// Insert a product only if the active count stays within `limit`.
    ///
    /// The count and the insert happen under the same entry lock, so two
    /// racing creations cannot both pass a nearly-full limit. Returns the
    /// active count at the time of the check on refusal.
    pub fn insert_product_guarded(&self, record: ProductRecord, limit: i64) -> Result<(), i64> {
        let mut entry = self.products.entry(record.tenant_id).or_default();
        let current = entry.iter().filter(|p| p.active).count() as i64;
        if limit != crate::tiers::UNLIMITED && current >= limit {
            return Err(current);
        }
        entry.push(record);
        Ok(())
    }

    /// Insert an order only if this month's non-cancelled count stays
    /// within `limit`. Same serialization guarantee as products.
    pub fn insert_order_guarded(
        &self,
        record: OrderRecord,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<(), i64> {
        let mut entry = self.orders.entry(record.tenant_id).or_default();
        let current = entry
            .iter()
            .filter(|o| !o.cancelled && same_month(o.created_at, now))
            .count() as i64;
        if limit != crate::tiers::UNLIMITED && current >= limit {
            return Err(current);
        }
        entry.push(record);
        Ok(())
    }

    // --- read side (the engine) ---

    /// Count of active products for a tenant.
    pub fn product_count(&self, tenant_id: Uuid) -> i64 {
        self.products
            .get(&tenant_id)
            .map(|records| records.iter().filter(|p| p.active).count() as i64)
            .unwrap_or(0)
    }

    /// Count of non-cancelled orders created in `now`'s calendar month.
    pub fn orders_this_month(&self, tenant_id: Uuid, now: DateTime<Utc>) -> i64 {
        self.orders
            .get(&tenant_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|o| !o.cancelled && same_month(o.created_at, now))
                    .count() as i64
            })
            .unwrap_or(0)
    }

    /// Total uploaded asset size in MB.
    pub fn storage_used_mb(&self, tenant_id: Uuid) -> f64 {
        let bytes: u64 = self
            .files
            .get(&tenant_id)
            .map(|records| records.iter().map(|f| f.size_bytes).sum())
            .unwrap_or(0);
        bytes as f64 / (1024.0 * 1024.0)
    }

    pub fn snapshot(&self, tenant_id: Uuid, now: DateTime<Utc>) -> UsageSnapshot {
        UsageSnapshot {
            product_count: self.product_count(tenant_id),
            orders_this_month: self.orders_this_month(tenant_id, now),
            storage_used_mb: self.storage_used_mb(tenant_id),
        }
    }
}

fn same_month(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.year() == b.year() && a.month() == b.month()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
