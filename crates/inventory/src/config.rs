//! Stock ledger configuration.

use std::time::Duration;

use crate::reservation::StockReservation;

/// Tunables for the stock ledger and expiry sweeper.
#[derive(Debug, Clone)]
pub struct StockConfig {
    /// How long a reservation holds stock before the sweeper reclaims it.
    /// Clamped to the 1–60 minute bound at reservation time.
    pub reservation_ttl: Duration,

    /// How long to wait for a contended per-product lock.
    pub lock_wait: Duration,

    /// Lease granted on an acquired lock; released explicitly, the lease is
    /// a crash backstop.
    pub lock_lease: Duration,

    /// Interval between expiry sweeps.
    pub sweep_interval: Duration,

    /// Threshold for low-stock alerts on newly registered products.
    pub default_low_stock_threshold: u32,
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            reservation_ttl: StockReservation::DEFAULT_TTL,
            lock_wait: Duration::from_secs(3),
            lock_lease: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(60),
            default_low_stock_threshold: 10,
        }
    }
}

impl StockConfig {
    /// Loads configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            reservation_ttl: env_secs("STOCK_RESERVATION_TTL_SECS")
                .unwrap_or(defaults.reservation_ttl),
            lock_wait: env_secs("STOCK_LOCK_WAIT_SECS").unwrap_or(defaults.lock_wait),
            lock_lease: env_secs("STOCK_LOCK_LEASE_SECS").unwrap_or(defaults.lock_lease),
            sweep_interval: env_secs("STOCK_SWEEP_INTERVAL_SECS")
                .unwrap_or(defaults.sweep_interval),
            default_low_stock_threshold: std::env::var("STOCK_LOW_STOCK_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.default_low_stock_threshold),
        }
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
}
