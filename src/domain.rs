//! Order lifecycle state machine.
//!
//! Every status change, whether requested by the owning user or by an
//! administrator, goes through [`apply_transition`]. The payment status is a
//! coupled secondary state: COD orders become `paid` on delivery, and paid
//! orders become `refunded` on cancellation.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.as_str() == s)
    }

    /// Users may only cancel orders that have not entered fulfilment.
    pub fn is_cancellable_by_owner(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Confirmed)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            PaymentStatus::Pending,
            PaymentStatus::Paid,
            PaymentStatus::Refunded,
        ]
        .into_iter()
        .find(|v| v.as_str() == s)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cod,
    Card,
    Upi,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cod => "cod",
            PaymentMethod::Card => "card",
            PaymentMethod::Upi => "upi",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [PaymentMethod::Cod, PaymentMethod::Card, PaymentMethod::Upi]
            .into_iter()
            .find(|v| v.as_str() == s)
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Upcoming,
    Ongoing,
    Completed,
    Cancelled,
}

impl EventStatus {
    pub const ALL: [EventStatus; 4] = [
        EventStatus::Upcoming,
        EventStatus::Ongoing,
        EventStatus::Completed,
        EventStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Upcoming => "upcoming",
            EventStatus::Ongoing => "ongoing",
            EventStatus::Completed => "completed",
            EventStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.as_str() == s)
    }

    /// Attendees can only join events that have not ended or been cancelled.
    pub fn accepts_registrations(&self) -> bool {
        matches!(self, EventStatus::Upcoming | EventStatus::Ongoing)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is asking for the transition. Owners are restricted to cancellation of
/// not-yet-fulfilled orders; administrators may set any of the six statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Owner,
    Admin,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Order can only be cancelled when pending or confirmed (current status: {0})")]
    NotCancellable(OrderStatus),

    #[error("Only cancellation can be requested on your own order")]
    OwnerRestricted,
}

/// Compute the `(status, payment_status)` pair after a requested transition.
///
/// No mutation happens here; callers persist the returned pair under a
/// per-order lock.
pub fn apply_transition(
    current: OrderStatus,
    payment: PaymentStatus,
    requested: OrderStatus,
    method: PaymentMethod,
    actor: Actor,
) -> Result<(OrderStatus, PaymentStatus), TransitionError> {
    if actor == Actor::Owner {
        if requested != OrderStatus::Cancelled {
            return Err(TransitionError::OwnerRestricted);
        }
        if !current.is_cancellable_by_owner() {
            return Err(TransitionError::NotCancellable(current));
        }
    }

    let new_payment = match requested {
        OrderStatus::Delivered if method == PaymentMethod::Cod => PaymentStatus::Paid,
        OrderStatus::Cancelled if payment == PaymentStatus::Paid => PaymentStatus::Refunded,
        _ => payment,
    };

    Ok((requested, new_payment))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_cancels_pending_order() {
        let result = apply_transition(
            OrderStatus::Pending,
            PaymentStatus::Pending,
            OrderStatus::Cancelled,
            PaymentMethod::Cod,
            Actor::Owner,
        );
        assert_eq!(result, Ok((OrderStatus::Cancelled, PaymentStatus::Pending)));
    }

    #[test]
    fn owner_cancel_of_paid_confirmed_order_refunds() {
        let result = apply_transition(
            OrderStatus::Confirmed,
            PaymentStatus::Paid,
            OrderStatus::Cancelled,
            PaymentMethod::Card,
            Actor::Owner,
        );
        assert_eq!(
            result,
            Ok((OrderStatus::Cancelled, PaymentStatus::Refunded))
        );
    }

    #[test]
    fn owner_cannot_cancel_shipped_order() {
        let result = apply_transition(
            OrderStatus::Shipped,
            PaymentStatus::Paid,
            OrderStatus::Cancelled,
            PaymentMethod::Card,
            Actor::Owner,
        );
        assert_eq!(
            result,
            Err(TransitionError::NotCancellable(OrderStatus::Shipped))
        );
    }

    #[test]
    fn owner_cannot_request_forward_transitions() {
        let result = apply_transition(
            OrderStatus::Pending,
            PaymentStatus::Pending,
            OrderStatus::Shipped,
            PaymentMethod::Cod,
            Actor::Owner,
        );
        assert_eq!(result, Err(TransitionError::OwnerRestricted));
    }

    #[test]
    fn cod_delivery_marks_payment_paid() {
        let result = apply_transition(
            OrderStatus::Shipped,
            PaymentStatus::Pending,
            OrderStatus::Delivered,
            PaymentMethod::Cod,
            Actor::Admin,
        );
        assert_eq!(result, Ok((OrderStatus::Delivered, PaymentStatus::Paid)));
    }

    #[test]
    fn card_delivery_leaves_payment_untouched() {
        let result = apply_transition(
            OrderStatus::Shipped,
            PaymentStatus::Paid,
            OrderStatus::Delivered,
            PaymentMethod::Card,
            Actor::Admin,
        );
        assert_eq!(result, Ok((OrderStatus::Delivered, PaymentStatus::Paid)));

        let unpaid = apply_transition(
            OrderStatus::Shipped,
            PaymentStatus::Pending,
            OrderStatus::Delivered,
            PaymentMethod::Upi,
            Actor::Admin,
        );
        assert_eq!(unpaid, Ok((OrderStatus::Delivered, PaymentStatus::Pending)));
    }

    #[test]
    fn admin_cancellation_refunds_paid_orders_only() {
        let paid = apply_transition(
            OrderStatus::Processing,
            PaymentStatus::Paid,
            OrderStatus::Cancelled,
            PaymentMethod::Upi,
            Actor::Admin,
        );
        assert_eq!(paid, Ok((OrderStatus::Cancelled, PaymentStatus::Refunded)));

        let unpaid = apply_transition(
            OrderStatus::Processing,
            PaymentStatus::Pending,
            OrderStatus::Cancelled,
            PaymentMethod::Upi,
            Actor::Admin,
        );
        assert_eq!(
            unpaid,
            Ok((OrderStatus::Cancelled, PaymentStatus::Pending))
        );
    }

    #[test]
    fn admin_may_move_any_direction() {
        // No ordering guard on admin transitions; delivered -> pending is allowed.
        let result = apply_transition(
            OrderStatus::Delivered,
            PaymentStatus::Paid,
            OrderStatus::Pending,
            PaymentMethod::Card,
            Actor::Admin,
        );
        assert_eq!(result, Ok((OrderStatus::Pending, PaymentStatus::Paid)));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in OrderStatus::ALL {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("unknown"), None);
        assert_eq!(PaymentMethod::parse("cod"), Some(PaymentMethod::Cod));
        assert_eq!(PaymentStatus::parse("refunded"), Some(PaymentStatus::Refunded));
    }
}
