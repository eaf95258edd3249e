//! Metrics collection for observability
//!
//! Prometheus counters and gauges for monitoring marketplace activity:
//!
//! - `marketplace_collections_created_total`
//! - `marketplace_tokens_minted_total`
//! - `marketplace_listings_created_total`
//! - `marketplace_purchases_total`
//! - `marketplace_withdrawals_total`
//! - `marketplace_active_listings`

use prometheus::{IntCounter, IntGauge, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Total collections created
    pub collections_created: IntCounter,

    /// Total tokens minted
    pub tokens_minted: IntCounter,

    /// Total listings created
    pub listings_created: IntCounter,

    /// Total successful purchases
    pub purchases: IntCounter,

    /// Total successful withdrawals
    pub withdrawals: IntCounter,

    /// Currently active listings
    pub active_listings: IntGauge,

    registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let collections_created = IntCounter::new(
            "marketplace_collections_created_total",
            "Total collections created",
        )?;
        registry.register(Box::new(collections_created.clone()))?;

        let tokens_minted = IntCounter::new(
            "marketplace_tokens_minted_total",
            "Total tokens minted",
        )?;
        registry.register(Box::new(tokens_minted.clone()))?;

        let listings_created = IntCounter::new(
            "marketplace_listings_created_total",
            "Total listings created",
        )?;
        registry.register(Box::new(listings_created.clone()))?;

        let purchases = IntCounter::new(
            "marketplace_purchases_total",
            "Total successful purchases",
        )?;
        registry.register(Box::new(purchases.clone()))?;

        let withdrawals = IntCounter::new(
            "marketplace_withdrawals_total",
            "Total successful withdrawals",
        )?;
        registry.register(Box::new(withdrawals.clone()))?;

        let active_listings = IntGauge::new(
            "marketplace_active_listings",
            "Currently active listings",
        )?;
        registry.register(Box::new(active_listings.clone()))?;

        Ok(Self {
            collections_created,
            tokens_minted,
            listings_created,
            purchases,
            withdrawals,
            active_listings,
            registry,
        })
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
