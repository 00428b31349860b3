//! Booking state machine.
//!
//! ```text
//! HOLDING ──select method──▶ RESERVED ──payment succeeded──▶ (PAID) ──confirm──▶ CONFIRMED
//!    │                          │
//!    └──── expire / cancel ─────┴──▶ EXPIRED | CANCELLED
//! ```
//!
//! The reducer only decides. Inventory, ledger, gateway and ticket work is
//! described as [`BookingEffect`]s that the booking service carries out.

use chrono::{DateTime, Utc};
use ferry_core::booking::{Booking, BookingStatus, PaymentMethod, PaymentStatus};
use ferry_core::environment::Clock;
use ferry_core::error::EngineError;
use ferry_core::reducer::Reducer;
use ferry_core::{SmallVec, smallvec};
use std::sync::Arc;
use thiserror::Error;

/// Commands and payment outcomes applied to a booking
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BookingAction {
    /// Choose how the booking will be paid
    SelectPaymentMethod {
        /// Method chosen
        method: PaymentMethod,
        /// New hold expiry for methods with a payment window
        hold_until: Option<DateTime<Utc>>,
    },
    /// Money was received
    PaymentSucceeded,
    /// Settlement completed; the booking is final
    Confirm,
    /// The hold lapsed
    Expire,
    /// Cancelled by a caller
    Cancel {
        /// Why
        reason: String,
    },
    /// The payment attempt failed for good
    PaymentFailed {
        /// Why
        reason: String,
    },
    /// Money arrived after the booking was closed; it is owed back
    PaymentCapturedAfterClose,
}

impl BookingAction {
    const fn name(&self) -> &'static str {
        match self {
            Self::SelectPaymentMethod { .. } => "select a payment method for",
            Self::PaymentSucceeded => "record a payment for",
            Self::Confirm => "confirm",
            Self::Expire => "expire",
            Self::Cancel { .. } => "cancel",
            Self::PaymentFailed { .. } => "fail the payment of",
            Self::PaymentCapturedAfterClose => "owe a late payment back for",
        }
    }
}

/// Work the booking service must carry out after a transition
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BookingEffect {
    /// Move the inventory hold's expiry
    ExtendHold {
        /// New expiry
        until: DateTime<Utc>,
    },
    /// Post the booking's revenue to the ledger
    PostRevenue,
    /// Turn the inventory hold into a sale
    CommitInventory,
    /// Mint boarding tickets
    IssueTickets,
    /// Undo a revenue posting
    ReverseRevenue,
    /// Give the held places back
    ReleaseInventory,
    /// Cancel unfinished card attempts
    AbandonPayment,
}

/// The action is not allowed in the booking's current state
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("Cannot {action} a booking in status {from}")]
pub struct TransitionError {
    /// Status the booking was in
    pub from: BookingStatus,
    /// What was attempted
    pub action: &'static str,
}

impl From<TransitionError> for EngineError {
    fn from(err: TransitionError) -> Self {
        Self::InvalidTransition {
            from: err.from,
            action: err.action,
        }
    }
}

/// Dependencies of the booking reducer
#[derive(Clone)]
pub struct BookingEnvironment {
    /// Time source for transition timestamps
    pub clock: Arc<dyn Clock>,
}

impl BookingEnvironment {
    /// Creates an environment
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

/// Transition rules of the booking aggregate
#[derive(Clone, Copy, Debug, Default)]
pub struct BookingReducer;

impl BookingReducer {
    /// Creates the reducer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Work that turns a paid booking into a confirmed one, in order
    #[must_use]
    pub fn settlement_effects() -> SmallVec<[BookingEffect; 4]> {
        smallvec![
            BookingEffect::PostRevenue,
            BookingEffect::CommitInventory,
            BookingEffect::IssueTickets,
        ]
    }
}

type Effects = SmallVec<[BookingEffect; 4]>;

impl Reducer for BookingReducer {
    type State = Booking;
    type Action = BookingAction;
    type Environment = BookingEnvironment;
    type Effect = BookingEffect;
    type Error = TransitionError;

    fn reduce(
        &self,
        booking: &mut Booking,
        action: BookingAction,
        env: &BookingEnvironment,
    ) -> Result<Effects, TransitionError> {
        let refuse = TransitionError {
            from: booking.status,
            action: action.name(),
        };
        let now = env.clock.now();
        let paid = booking.payment_status == PaymentStatus::Paid;

        let effects = match action {
            BookingAction::SelectPaymentMethod { method, hold_until } => {
                let switching = booking.status == BookingStatus::Reserved && !paid;
                if booking.status != BookingStatus::Holding && !switching {
                    return Err(refuse);
                }
                booking.status = BookingStatus::Reserved;
                booking.payment_method = Some(method);
                booking.payment_status = PaymentStatus::Pending;
                match hold_until {
                    Some(until) if until > booking.hold_expires_at => {
                        booking.hold_expires_at = until;
                        smallvec![BookingEffect::ExtendHold { until }]
                    }
                    _ => SmallVec::new(),
                }
            }

            BookingAction::PaymentSucceeded => {
                if booking.status != BookingStatus::Reserved || paid {
                    return Err(refuse);
                }
                booking.payment_status = PaymentStatus::Paid;
                Self::settlement_effects()
            }

            BookingAction::Confirm => match booking.status {
                BookingStatus::Confirmed => SmallVec::new(),
                BookingStatus::Reserved if paid => {
                    booking.status = BookingStatus::Confirmed;
                    booking.confirmed_at = Some(now);
                    SmallVec::new()
                }
                _ => return Err(refuse),
            },

            BookingAction::Expire => {
                if !matches!(booking.status, BookingStatus::Holding | BookingStatus::Reserved) {
                    return Err(refuse);
                }
                booking.status = BookingStatus::Expired;
                if paid {
                    booking.payment_status = PaymentStatus::RefundDue;
                    booking.failure_reason = Some("hold lapsed after payment".to_string());
                    smallvec![BookingEffect::ReverseRevenue, BookingEffect::ReleaseInventory]
                } else {
                    booking.failure_reason = Some("hold expired".to_string());
                    smallvec![BookingEffect::ReleaseInventory, BookingEffect::AbandonPayment]
                }
            }

            BookingAction::Cancel { reason } => {
                if !matches!(booking.status, BookingStatus::Holding | BookingStatus::Reserved) || paid {
                    return Err(refuse);
                }
                booking.status = BookingStatus::Cancelled;
                booking.failure_reason = Some(reason);
                smallvec![BookingEffect::ReleaseInventory, BookingEffect::AbandonPayment]
            }

            BookingAction::PaymentFailed { reason } => {
                if booking.status != BookingStatus::Reserved || paid {
                    return Err(refuse);
                }
                booking.status = BookingStatus::Cancelled;
                booking.payment_status = PaymentStatus::Failed;
                booking.failure_reason = Some(reason);
                smallvec![BookingEffect::ReleaseInventory]
            }

            BookingAction::PaymentCapturedAfterClose => {
                if !booking.status.is_terminal() || paid {
                    return Err(refuse);
                }
                booking.payment_status = PaymentStatus::RefundDue;
                SmallVec::new()
            }
        };

        booking.updated_at = now;
        Ok(effects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ferry_core::types::Money;
    use ferry_testing::fixtures::{capacity_sailing, priced_booking};
    use ferry_testing::{ReducerTest, test_clock};

    fn env() -> BookingEnvironment {
        BookingEnvironment::new(Arc::new(test_clock()))
    }

    fn holding() -> Booking {
        Booking {
            status: BookingStatus::Holding,
            payment_status: PaymentStatus::Unpaid,
            ..priced_booking(&capacity_sailing(10, 1), Money::from_cents(10_000), Money::ZERO)
        }
    }

    fn paid() -> Booking {
        Booking {
            payment_method: Some(PaymentMethod::Card),
            payment_status: PaymentStatus::Paid,
            ..priced_booking(&capacity_sailing(10, 1), Money::from_cents(10_000), Money::ZERO)
        }
    }

    #[test]
    fn test_cash_selection_extends_the_hold() {
        let until = test_clock().now() + Duration::hours(2);
        ReducerTest::new(BookingReducer::new(), env())
            .given(holding())
            .when(BookingAction::SelectPaymentMethod {
                method: PaymentMethod::Cash,
                hold_until: Some(until),
            })
            .expect_state(move |booking| {
                assert_eq!(booking.status, BookingStatus::Reserved);
                assert_eq!(booking.payment_status, PaymentStatus::Pending);
                assert_eq!(booking.hold_expires_at, until);
            })
            .expect_effects([BookingEffect::ExtendHold { until }])
            .run();
    }

    #[test]
    fn test_payment_success_settles_in_order() {
        ReducerTest::new(BookingReducer::new(), env())
            .given(priced_booking(
                &capacity_sailing(10, 1),
                Money::from_cents(10_000),
                Money::ZERO,
            ))
            .when(BookingAction::PaymentSucceeded)
            .expect_state(|booking| {
                assert_eq!(booking.status, BookingStatus::Reserved);
                assert_eq!(booking.payment_status, PaymentStatus::Paid);
            })
            .expect_effects([
                BookingEffect::PostRevenue,
                BookingEffect::CommitInventory,
                BookingEffect::IssueTickets,
            ])
            .run();
    }

    #[test]
    fn test_confirm_requires_payment() {
        ReducerTest::new(BookingReducer::new(), env())
            .given(holding())
            .when(BookingAction::Confirm)
            .expect_refusal(|err| {
                assert_eq!(err.from, BookingStatus::Holding);
                assert_eq!(err.action, "confirm");
            })
            .run();
    }

    #[test]
    fn test_confirm_is_idempotent() {
        let confirmed = ReducerTest::new(BookingReducer::new(), env())
            .given(paid())
            .when(BookingAction::Confirm)
            .expect_effects([])
            .run();
        assert_eq!(confirmed.status, BookingStatus::Confirmed);
        assert_eq!(confirmed.confirmed_at, Some(test_clock().now()));

        ReducerTest::new(BookingReducer::new(), env())
            .given(confirmed.clone())
            .when(BookingAction::Confirm)
            .expect_effects([])
            .expect_state(move |again| assert_eq!(again, &confirmed))
            .run();
    }

    #[test]
    fn test_lapse_after_payment_reverses_and_owes_refund() {
        ReducerTest::new(BookingReducer::new(), env())
            .given(paid())
            .when(BookingAction::Expire)
            .expect_state(|booking| {
                assert_eq!(booking.status, BookingStatus::Expired);
                assert_eq!(booking.payment_status, PaymentStatus::RefundDue);
            })
            .expect_effects([BookingEffect::ReverseRevenue, BookingEffect::ReleaseInventory])
            .run();
    }

    #[test]
    fn test_paid_booking_cannot_be_cancelled() {
        ReducerTest::new(BookingReducer::new(), env())
            .given(paid())
            .when(BookingAction::Cancel {
                reason: "changed plans".to_string(),
            })
            .expect_refusal(|err| assert_eq!(err.action, "cancel"))
            .run();
    }

    #[test]
    fn test_terminal_states_are_immutable() {
        let expired = Booking {
            status: BookingStatus::Expired,
            ..holding()
        };
        ReducerTest::new(BookingReducer::new(), env())
            .given(expired)
            .when(BookingAction::Cancel {
                reason: "too late".to_string(),
            })
            .expect_refusal(|err| assert_eq!(err.from, BookingStatus::Expired))
            .run();
    }

    #[test]
    fn test_gateway_failure_cancels_and_releases() {
        ReducerTest::new(BookingReducer::new(), env())
            .given(priced_booking(
                &capacity_sailing(10, 1),
                Money::from_cents(10_000),
                Money::ZERO,
            ))
            .when(BookingAction::PaymentFailed {
                reason: "card declined".to_string(),
            })
            .expect_state(|booking| {
                assert_eq!(booking.status, BookingStatus::Cancelled);
                assert_eq!(booking.payment_status, PaymentStatus::Failed);
                assert_eq!(booking.failure_reason.as_deref(), Some("card declined"));
            })
            .expect_effects([BookingEffect::ReleaseInventory])
            .run();
    }

    #[test]
    fn test_capture_after_expiry_is_owed_back() {
        let expired = Booking {
            status: BookingStatus::Expired,
            payment_method: Some(PaymentMethod::Card),
            payment_status: PaymentStatus::Pending,
            ..holding()
        };
        ReducerTest::new(BookingReducer::new(), env())
            .given(expired)
            .when(BookingAction::PaymentCapturedAfterClose)
            .expect_effects([])
            .expect_state(|booking| {
                assert_eq!(booking.status, BookingStatus::Expired);
                assert_eq!(booking.payment_status, PaymentStatus::RefundDue);
                assert_eq!(booking.updated_at, test_clock().now());
            })
            .run();
    }

    #[test]
    fn test_late_capture_needs_a_closed_booking() {
        ReducerTest::new(BookingReducer::new(), env())
            .given(holding())
            .when(BookingAction::PaymentCapturedAfterClose)
            .expect_refusal(|err| {
                assert_eq!(err.from, BookingStatus::Holding);
                assert_eq!(err.action, "owe a late payment back for");
            })
            .run();
    }
}
