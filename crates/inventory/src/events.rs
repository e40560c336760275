//! Domain events emitted by the product aggregate.

use chrono::{DateTime, Utc};
use common::{OrderId, ProductId, ReservationId, WireEvent};
use serde::{Deserialize, Serialize};

/// Events appended to a product's pending queue by mutating operations.
///
/// The caller persists the aggregate, drains this queue exactly once, and
/// publishes the drained events (at-least-once). All stock events partition
/// by product ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StockEvent {
    /// Quantity was moved from available to reserved.
    StockReserved(StockReservedData),

    /// A reservation was cancelled or expired and its quantity returned.
    StockReleased(StockReleasedData),

    /// Quantity was permanently deducted from total stock.
    StockDeducted(StockDeductedData),

    /// Total stock was increased or reset by an operator.
    StockAdjusted(StockAdjustedData),

    /// Available quantity dropped below the configured threshold.
    LowStockAlert(LowStockAlertData),
}

impl WireEvent for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::StockReserved(_) => "StockReserved",
            StockEvent::StockReleased(_) => "StockReleased",
            StockEvent::StockDeducted(_) => "StockDeducted",
            StockEvent::StockAdjusted(_) => "StockAdjusted",
            StockEvent::LowStockAlert(_) => "LowStockAlert",
        }
    }

    fn aggregate_key(&self) -> String {
        match self {
            StockEvent::StockReserved(d) => d.product_id.to_string(),
            StockEvent::StockReleased(d) => d.product_id.to_string(),
            StockEvent::StockDeducted(d) => d.product_id.to_string(),
            StockEvent::StockAdjusted(d) => d.product_id.to_string(),
            StockEvent::LowStockAlert(d) => d.product_id.to_string(),
        }
    }
}

/// Data for StockReserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockReservedData {
    pub product_id: ProductId,
    pub product_name: String,
    pub reservation_id: ReservationId,
    pub order_id: OrderId,
    pub quantity: u32,
    pub available_after: u32,
    pub expires_at: DateTime<Utc>,
}

/// Data for StockReleased.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockReleasedData {
    pub product_id: ProductId,
    pub reservation_id: ReservationId,
    pub order_id: OrderId,
    pub quantity: u32,
    pub available_after: u32,
    pub reason: String,
}

/// Data for StockDeducted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockDeductedData {
    pub product_id: ProductId,
    /// Absent for direct (reservation-less) deductions.
    pub reservation_id: Option<ReservationId>,
    pub order_id: Option<OrderId>,
    pub quantity: u32,
    pub remaining_total: u32,
}

/// Data for StockAdjusted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockAdjustedData {
    pub product_id: ProductId,
    pub previous_total: u32,
    pub new_total: u32,
    pub reason: String,
}

/// Data for LowStockAlert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LowStockAlertData {
    pub product_id: ProductId,
    pub product_name: String,
    pub available: u32,
    pub threshold: u32,
}
