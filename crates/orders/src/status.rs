//! Order status and the validated transition table.

use serde::{Deserialize, Serialize};

/// The lifecycle state of an order.
///
/// Transitions are one-directional except for explicit compensations; the
/// table in [`OrderStatus::can_transition_to`] is the single source of
/// truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Just created; items may still be changed.
    Pending,

    /// Items locked in; awaiting stock reservation.
    Confirmed,

    /// Stock reserved; awaiting payment initiation.
    PaymentPending,

    /// Payment in flight.
    PaymentProcessing,

    /// Payment captured.
    Paid,

    /// Stock deducted; being prepared for shipment.
    Preparing,

    /// Handed to the carrier.
    Shipped,

    /// Received by the customer.
    Delivered,

    /// Fulfilled and closed.
    Completed,

    /// Cancelled before fulfillment (terminal).
    Cancelled,

    /// Failed irrecoverably, e.g. payment initiation error (terminal).
    Failed,

    /// Refund in flight.
    Refunding,

    /// Refund settled (terminal).
    Refunded,
}

impl OrderStatus {
    /// Returns true if `self -> target` is an allowed transition.
    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, target),
            (Pending, Confirmed | Cancelled | Failed)
                | (Confirmed, PaymentPending | Cancelled)
                | (PaymentPending, PaymentProcessing | Cancelled | Failed)
                | (PaymentProcessing, Paid | Failed | Cancelled)
                | (Paid, Preparing | Refunding)
                | (Preparing, Shipped | Cancelled)
                | (Shipped, Delivered)
                | (Delivered, Completed | Refunding)
                | (Completed, Refunding)
                | (Refunding, Refunded)
        )
    }

    /// Returns true if the customer may still cancel from this status.
    ///
    /// Note this is a policy gate on top of the transition table: `Paid` is
    /// cancellable in principle but has no direct edge to `Cancelled`, so a
    /// paid order must go through the refund path instead.
    pub fn is_cancellable(&self) -> bool {
        use OrderStatus::*;
        matches!(
            self,
            Pending | Confirmed | PaymentPending | PaymentProcessing | Paid | Preparing
        )
    }

    /// Returns true if a refund may be initiated from this status.
    pub fn is_refundable(&self) -> bool {
        self.can_transition_to(OrderStatus::Refunding)
    }

    /// Returns true if payment has settled (this status or any later one).
    pub fn is_paid(&self) -> bool {
        use OrderStatus::*;
        matches!(
            self,
            Paid | Preparing | Shipped | Delivered | Completed | Refunding | Refunded
        )
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        use OrderStatus::*;
        matches!(self, Cancelled | Failed | Refunded)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Confirmed => "Confirmed",
            OrderStatus::PaymentPending => "PaymentPending",
            OrderStatus::PaymentProcessing => "PaymentProcessing",
            OrderStatus::Paid => "Paid",
            OrderStatus::Preparing => "Preparing",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Completed => "Completed",
            OrderStatus::Cancelled => "Cancelled",
            OrderStatus::Failed => "Failed",
            OrderStatus::Refunding => "Refunding",
            OrderStatus::Refunded => "Refunded",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus::*;

    const ALL: [OrderStatus; 13] = [
        Pending,
        Confirmed,
        PaymentPending,
        PaymentProcessing,
        Paid,
        Preparing,
        Shipped,
        Delivered,
        Completed,
        Cancelled,
        Failed,
        Refunding,
        Refunded,
    ];

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            Pending,
            Confirmed,
            PaymentPending,
            PaymentProcessing,
            Paid,
            Preparing,
            Shipped,
            Delivered,
            Completed,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} should be allowed",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_pending_cannot_jump_to_paid() {
        assert!(!Pending.can_transition_to(Paid));
    }

    #[test]
    fn test_shipped_cannot_be_cancelled() {
        assert!(!Shipped.can_transition_to(Cancelled));
        assert!(!Shipped.is_cancellable());
    }

    #[test]
    fn test_terminal_states_have_no_outgoing_edges() {
        for terminal in [Cancelled, Failed, Refunded] {
            assert!(terminal.is_terminal());
            for target in ALL {
                assert!(
                    !terminal.can_transition_to(target),
                    "{terminal} -> {target} should be forbidden"
                );
            }
        }
    }

    #[test]
    fn test_refund_path() {
        for refundable in [Paid, Delivered, Completed] {
            assert!(refundable.is_refundable());
            assert!(refundable.can_transition_to(Refunding));
        }
        assert!(Refunding.can_transition_to(Refunded));
        assert!(!Pending.is_refundable());
        assert!(!Shipped.is_refundable());
    }

    #[test]
    fn test_cancellable_range() {
        for cancellable in [Pending, Confirmed, PaymentPending, PaymentProcessing, Paid, Preparing]
        {
            assert!(cancellable.is_cancellable());
        }
        for not_cancellable in [Shipped, Delivered, Completed, Cancelled, Failed, Refunding, Refunded]
        {
            assert!(!not_cancellable.is_cancellable());
        }
    }

    #[test]
    fn test_is_paid_covers_settlement_and_later() {
        assert!(!PaymentProcessing.is_paid());
        assert!(Paid.is_paid());
        assert!(Shipped.is_paid());
        assert!(Refunded.is_paid());
        assert!(!Cancelled.is_paid());
    }

    #[test]
    fn test_paid_has_no_direct_cancel_edge() {
        // Cancellable by policy, but only via the refund path.
        assert!(Paid.is_cancellable());
        assert!(!Paid.can_transition_to(Cancelled));
    }
}
