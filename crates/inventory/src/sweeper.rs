//! Background reclamation of expired reservations.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::ledger::StockLedger;

/// Periodically reclaims reservations that were never confirmed or
/// released.
///
/// Each sweep walks every product under its own lock, so the sweeper
/// competes fairly with foreground operations. Expiry is functionally
/// identical to a release; a reservation confirmed between sweeps is left
/// alone.
pub struct ExpirySweeper {
    ledger: Arc<StockLedger>,
}

impl ExpirySweeper {
    /// Creates a sweeper over the given ledger.
    pub fn new(ledger: Arc<StockLedger>) -> Self {
        Self { ledger }
    }

    /// Runs one sweep across all products. Returns the reclaimed count.
    ///
    /// A failure on one product is logged and the sweep moves on; the next
    /// cycle retries it.
    pub async fn sweep_once(&self) -> usize {
        let now = Utc::now();
        let mut reclaimed = 0;
        for product_id in self.ledger.product_ids().await {
            match self.ledger.sweep_product(&product_id, now).await {
                Ok(count) => reclaimed += count,
                Err(e) => {
                    tracing::warn!(%product_id, error = %e, "expiry sweep failed for product");
                }
            }
        }
        if reclaimed > 0 {
            tracing::info!(reclaimed, "expiry sweep reclaimed reservations");
        }
        counter!("expiry_sweeps_total").increment(1);
        reclaimed
    }

    /// Spawns the sweep loop. Send on the returned channel to stop it.
    pub fn spawn(self) -> (watch::Sender<bool>, JoinHandle<()>) {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let interval = self.ledger.config().sweep_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep_once().await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("expiry sweeper shutting down");
                            break;
                        }
                    }
                }
            }
        });
        (shutdown_tx, handle)
    }
}
