//! Error taxonomy for booking, payment and settlement operations.

use crate::booking::BookingStatus;
use crate::environment::{GatewayError, StoreError};
use crate::types::{BookingId, Money};
use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Every failure a caller of the engine can observe.
///
/// Variants are grouped by the component that raises them. Use
/// [`EngineError::reason`] for the user-visible message,
/// [`EngineError::is_fatal`] to decide whether to page someone and
/// [`EngineError::is_retryable`] to decide whether to try again.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    // ═══════════════════════════════════════════════════════════
    // Inventory
    // ═══════════════════════════════════════════════════════════

    /// Not enough free places on the requested segment.
    #[error("No capacity: requested {requested}, available {available}")]
    CapacityExhausted {
        /// Places requested
        requested: u32,
        /// Places free at the time of the request
        available: u32,
    },

    /// A requested seat is already held or sold on an overlapping segment.
    #[error("Seat {seat} is already taken")]
    SeatConflict {
        /// The contested seat
        seat: String,
    },

    /// The inventory hold behind a booking has lapsed.
    #[error("Hold has expired")]
    HoldExpired,

    // ═══════════════════════════════════════════════════════════
    // Payment
    // ═══════════════════════════════════════════════════════════

    /// The payment attempt failed.
    #[error("Payment failed: {reason}")]
    PaymentFailed {
        /// Failure reason
        reason: String,
    },

    /// A receipt was rejected during verification.
    #[error("Receipt rejected: {reason}")]
    VerificationRejected {
        /// Rejection reason
        reason: String,
    },

    /// The agent's prepaid credit does not cover the booking.
    #[error("Insufficient credit: required {required}, available {available}")]
    InsufficientCredit {
        /// Booking total
        required: Money,
        /// Credit available
        available: Money,
    },

    /// A gateway event that was already applied, or is older than the current state.
    #[error("Duplicate gateway event for {reference}")]
    DuplicateEvent {
        /// Gateway reference
        reference: String,
    },

    /// A signature did not verify.
    #[error("Invalid signature on {context}")]
    InvalidSignature {
        /// What carried the signature
        context: &'static str,
    },

    // ═══════════════════════════════════════════════════════════
    // Ledger
    // ═══════════════════════════════════════════════════════════

    /// A transaction's debits and credits differ.
    #[error("Ledger imbalance: debit {debit} != credit {credit}")]
    LedgerImbalance {
        /// Sum of debits (minor units)
        debit: u128,
        /// Sum of credits (minor units)
        credit: u128,
    },

    /// Payment succeeded but settlement could not be completed yet.
    #[error("Confirmation of booking {booking_id} is pending")]
    ConfirmationPending {
        /// The paid booking
        booking_id: BookingId,
    },

    // ═══════════════════════════════════════════════════════════
    // Requests
    // ═══════════════════════════════════════════════════════════

    /// Something the request refers to does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of thing looked up
        entity: &'static str,
        /// Identifier used
        id: String,
    },

    /// The booking's current status does not allow the action.
    #[error("Cannot {action} a booking in status {from}")]
    InvalidTransition {
        /// Current status
        from: BookingStatus,
        /// Attempted action
        action: &'static str,
    },

    /// The request is malformed.
    #[error("Validation failed: {0}")]
    Validation(String),

    // ═══════════════════════════════════════════════════════════
    // Collaborators
    // ═══════════════════════════════════════════════════════════

    /// The ledger store failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The payment gateway failed.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

impl EngineError {
    /// Shorthand for [`EngineError::NotFound`].
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Message safe to show to the person who made the request.
    ///
    /// Internal details (store failures, imbalance figures) are not exposed.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::CapacityExhausted { .. } => "Not enough seats left on this sailing".to_string(),
            Self::SeatConflict { seat } => format!("Seat {seat} is no longer available"),
            Self::HoldExpired => "Your reservation has expired".to_string(),
            Self::PaymentFailed { reason } => format!("Payment failed: {reason}"),
            Self::VerificationRejected { reason } => format!("Receipt rejected: {reason}"),
            Self::InsufficientCredit { .. } => "Insufficient credit balance".to_string(),
            Self::DuplicateEvent { .. } => "Already processed".to_string(),
            Self::InvalidSignature { .. } => "Invalid signature".to_string(),
            Self::LedgerImbalance { .. } | Self::Store(_) => {
                "Internal accounting error, please contact support".to_string()
            }
            Self::ConfirmationPending { .. } => {
                "Payment received, confirmation is in progress".to_string()
            }
            Self::NotFound { entity, .. } => format!("{entity} not found"),
            Self::InvalidTransition { from, action } => {
                format!("Cannot {action} a booking that is {}", from.as_str().to_lowercase())
            }
            Self::Validation(message) => message.clone(),
            Self::Gateway(_) => "Payment provider unavailable, please retry".to_string(),
        }
    }

    /// Returns `true` for errors that indicate corruption or tampering.
    ///
    /// # Examples
    ///
    /// ```
    /// # use ferry_core::EngineError;
    /// assert!(EngineError::LedgerImbalance { debit: 10, credit: 9 }.is_fatal());
    /// assert!(!EngineError::HoldExpired.is_fatal());
    /// ```
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::LedgerImbalance { .. }
                | Self::InvalidSignature { .. }
                | Self::Store(StoreError::Corrupted(_))
        )
    }

    /// Returns `true` for transient failures worth retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Store(err) => err.is_transient(),
            Self::Gateway(err) => err.is_transient(),
            Self::ConfirmationPending { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors() {
        assert!(EngineError::InvalidSignature { context: "webhook" }.is_fatal());
        assert!(EngineError::from(StoreError::Unavailable("down".into())).is_retryable());
        assert!(!EngineError::from(StoreError::Unavailable("down".into())).is_fatal());
        assert!(EngineError::from(GatewayError::Timeout).is_retryable());
        assert!(!EngineError::CapacityExhausted { requested: 2, available: 1 }.is_retryable());
    }

    #[test]
    fn reasons_hide_internals() {
        let err = EngineError::LedgerImbalance { debit: 100, credit: 99 };
        assert!(!err.reason().contains("100"));
        assert_eq!(
            EngineError::InvalidTransition { from: BookingStatus::Confirmed, action: "cancel" }
                .reason(),
            "Cannot cancel a booking that is confirmed"
        );
    }
}
