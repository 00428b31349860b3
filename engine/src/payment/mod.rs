//! Payment orchestrator: the per-method payment state machines.
//!
//! | Method         | On selection                          | Completes when                 |
//! |----------------|---------------------------------------|--------------------------------|
//! | Cash           | receipt RECORDED, hold extended       | counter staff mark it paid     |
//! | Card           | gateway attempt INITIATED, redirect   | a signed CAPTURED webhook      |
//! | Bank transfer  | receipt RECORDED, hold extended       | receipt verified (auto/manual) |
//! | Agent credit   | nothing                               | credit debited with posting    |
//!
//! The orchestrator owns gateway attempts and receipts. What a payment outcome
//! means for the booking is decided by the booking service.
//!
//! # Gateway events
//!
//! Events move an attempt forward only: INITIATED → AUTHORIZED → terminal.
//! An event that does not advance the attempt (a redelivery, or an
//! AUTHORIZED arriving after CAPTURED) is a [`EngineError::DuplicateEvent`].
//! Events for one attempt are serialized by a per-attempt lock.

mod gateway;
mod receipt;
pub mod webhook;

pub use gateway::SandboxGateway;
pub use receipt::{InMemoryAttachmentStore, TextReceiptExtractor, assess};

use crate::config::PaymentConfig;
use crate::metrics;
use chrono::{DateTime, Utc};
use ferry_core::booking::{Booking, PaymentMethod};
use ferry_core::environment::{
    AttachmentStore, Clock, GatewayRequest, PaymentGateway, ReceiptExtractor,
};
use ferry_core::error::{EngineError, EngineResult};
use ferry_core::payment::{
    GatewayEvent, GatewayStatus, GatewayTransaction, PaymentReceipt, ReceiptStatus, ReviewFlag,
};
use ferry_core::types::{BookingId, GatewayTransactionId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// What the caller must do after choosing a payment method
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentInitiation {
    /// Wait for an out-of-band outcome; the hold is kept until `hold_until` if set
    Pending {
        /// New hold expiry
        hold_until: Option<DateTime<Utc>>,
    },
    /// The customer must complete the payment on the gateway's page
    RequiresAction {
        /// Gateway reference of the attempt
        gateway_ref: String,
        /// Page to send the customer to
        redirect_url: Option<String>,
    },
}

/// What a gateway event means for its booking
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// Funds are authorized and capture was requested; wait for CAPTURED
    Authorized {
        /// Booking paid
        booking_id: BookingId,
    },
    /// Funds are captured; the booking can be confirmed
    Succeeded {
        /// Booking paid
        booking_id: BookingId,
    },
    /// The attempt failed or was cancelled
    Failed {
        /// Booking concerned
        booking_id: BookingId,
        /// Why
        reason: String,
    },
    /// An attempt the booking no longer waits on failed; the booking is unaffected
    Superseded {
        /// Booking concerned
        booking_id: BookingId,
        /// Reference of the stale attempt
        gateway_ref: String,
    },
}

/// Drives payments for every method
pub struct PaymentOrchestrator {
    gateway: Arc<dyn PaymentGateway>,
    extractor: Arc<dyn ReceiptExtractor>,
    attachments: Arc<dyn AttachmentStore>,
    config: PaymentConfig,
    clock: Arc<dyn Clock>,
    attempts: RwLock<HashMap<String, Arc<Mutex<GatewayTransaction>>>>,
    current: RwLock<HashMap<BookingId, String>>,
    receipts: RwLock<HashMap<BookingId, PaymentReceipt>>,
}

/// `now + window`, `None` when the window does not fit a timestamp
fn extended(now: DateTime<Utc>, window: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|window| now.checked_add_signed(window))
}

impl PaymentOrchestrator {
    /// Creates an orchestrator
    #[must_use]
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        extractor: Arc<dyn ReceiptExtractor>,
        attachments: Arc<dyn AttachmentStore>,
        config: PaymentConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gateway,
            extractor,
            attachments,
            config,
            clock,
            attempts: RwLock::new(HashMap::new()),
            current: RwLock::new(HashMap::new()),
            receipts: RwLock::new(HashMap::new()),
        }
    }

    /// Payment configuration in use
    #[must_use]
    pub const fn config(&self) -> &PaymentConfig {
        &self.config
    }

    /// Starts the payment flow of `method` for a booking
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Gateway`] if the card gateway refuses to start
    /// the attempt.
    pub async fn initiate(
        &self,
        booking: &Booking,
        method: PaymentMethod,
    ) -> EngineResult<PaymentInitiation> {
        let now = self.clock.now();
        match method {
            PaymentMethod::Cash => {
                self.record_receipt(booking, method, now).await;
                Ok(PaymentInitiation::Pending {
                    hold_until: extended(now, self.config.cash_window),
                })
            }
            PaymentMethod::BankTransfer => {
                self.record_receipt(booking, method, now).await;
                Ok(PaymentInitiation::Pending {
                    hold_until: extended(now, self.config.bank_transfer_window),
                })
            }
            PaymentMethod::Credit => Ok(PaymentInitiation::Pending { hold_until: None }),
            PaymentMethod::Card => self.initiate_card(booking, now).await,
        }
    }

    async fn record_receipt(&self, booking: &Booking, method: PaymentMethod, now: DateTime<Utc>) {
        let receipt = PaymentReceipt::recorded(booking.id, method, booking.total, booking.currency.clone(), now);
        tracing::info!(
            booking_id = %booking.id,
            receipt_id = %receipt.id,
            method = %method,
            amount = %booking.total,
            "Payment receipt recorded"
        );
        self.receipts.write().await.insert(booking.id, receipt);
    }

    async fn initiate_card(&self, booking: &Booking, now: DateTime<Utc>) -> EngineResult<PaymentInitiation> {
        let initiation = self
            .gateway
            .initiate(GatewayRequest {
                booking_id: booking.id,
                amount: booking.total,
                currency: booking.currency.clone(),
                description: format!("Ferry booking {}", booking.code),
            })
            .await?;

        let attempt = GatewayTransaction {
            id: GatewayTransactionId::new(),
            booking_id: booking.id,
            gateway_ref: initiation.gateway_ref.clone(),
            amount: booking.total,
            currency: booking.currency.clone(),
            status: GatewayStatus::Initiated,
            redirect_url: initiation.redirect_url.clone(),
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        tracing::info!(
            booking_id = %booking.id,
            gateway_ref = %attempt.gateway_ref,
            amount = %attempt.amount,
            "Card payment initiated"
        );
        self.current
            .write()
            .await
            .insert(booking.id, attempt.gateway_ref.clone());
        self.attempts
            .write()
            .await
            .insert(attempt.gateway_ref.clone(), Arc::new(Mutex::new(attempt)));

        Ok(PaymentInitiation::RequiresAction {
            gateway_ref: initiation.gateway_ref,
            redirect_url: initiation.redirect_url,
        })
    }

    /// Applies a signed gateway event to its attempt
    ///
    /// An AUTHORIZED event triggers capture of the authorized amount.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidSignature`] if the signature does not verify
    /// - [`EngineError::Validation`] for an unknown status
    /// - [`EngineError::NotFound`] for an unknown reference
    /// - [`EngineError::DuplicateEvent`] if the event does not advance the attempt
    /// - [`EngineError::Gateway`] if a transient capture failure should be redelivered
    pub async fn on_gateway_event(&self, event: &GatewayEvent) -> EngineResult<PaymentOutcome> {
        webhook::verify_event(&self.config.webhook_secret, event)?;

        let status = GatewayStatus::parse(&event.status).ok_or_else(|| {
            metrics::record_gateway_event("rejected");
            EngineError::Validation(format!("unknown gateway status '{}'", event.status))
        })?;
        let attempt = self
            .attempts
            .read()
            .await
            .get(&event.gateway_ref)
            .cloned()
            .ok_or_else(|| {
                metrics::record_gateway_event("rejected");
                tracing::warn!(gateway_ref = %event.gateway_ref, "Gateway event for unknown reference");
                EngineError::not_found("Gateway transaction", &event.gateway_ref)
            })?;

        let mut attempt = attempt.lock().await;
        if status.rank() <= attempt.status.rank() {
            metrics::record_gateway_event("duplicate");
            tracing::info!(
                gateway_ref = %attempt.gateway_ref,
                current = %attempt.status,
                received = %status,
                "Gateway event does not advance the attempt, ignoring"
            );
            return Err(EngineError::DuplicateEvent {
                reference: attempt.gateway_ref.clone(),
            });
        }

        let booking_id = attempt.booking_id;
        let outcome = match status {
            GatewayStatus::Authorized => {
                match self.gateway.capture(&attempt.gateway_ref, attempt.amount).await {
                    Ok(()) => PaymentOutcome::Authorized { booking_id },
                    Err(err) if err.is_transient() => {
                        tracing::warn!(gateway_ref = %attempt.gateway_ref, error = %err, "Capture failed, awaiting redelivery");
                        return Err(err.into());
                    }
                    Err(err) => {
                        attempt.failure_reason = Some(err.to_string());
                        attempt.status = GatewayStatus::Failed;
                        attempt.updated_at = self.clock.now();
                        metrics::record_gateway_event("applied");
                        return Ok(self.failure(&attempt, err.to_string()).await);
                    }
                }
            }
            GatewayStatus::Captured => PaymentOutcome::Succeeded { booking_id },
            GatewayStatus::Failed | GatewayStatus::Cancelled => {
                let reason = format!("card payment {}", status.as_str().to_lowercase());
                attempt.failure_reason = Some(reason.clone());
                self.failure(&attempt, reason).await
            }
            // INITIATED never outranks a stored attempt
            GatewayStatus::Initiated => {
                return Err(EngineError::DuplicateEvent {
                    reference: attempt.gateway_ref.clone(),
                });
            }
        };

        attempt.status = status;
        attempt.updated_at = self.clock.now();
        metrics::record_gateway_event("applied");
        tracing::info!(
            gateway_ref = %attempt.gateway_ref,
            booking_id = %booking_id,
            status = %status,
            "Gateway event applied"
        );
        Ok(outcome)
    }

    /// Failure of the booking's current attempt fails the booking; any other is superseded
    async fn failure(&self, attempt: &GatewayTransaction, reason: String) -> PaymentOutcome {
        let current = self.current.read().await.get(&attempt.booking_id) == Some(&attempt.gateway_ref);
        if current {
            return PaymentOutcome::Failed {
                booking_id: attempt.booking_id,
                reason,
            };
        }
        tracing::info!(
            gateway_ref = %attempt.gateway_ref,
            booking_id = %attempt.booking_id,
            reason = %reason,
            "Superseded card attempt failed, booking unaffected"
        );
        PaymentOutcome::Superseded {
            booking_id: attempt.booking_id,
            gateway_ref: attempt.gateway_ref.clone(),
        }
    }

    /// Stores a bank-transfer receipt, extracts its details and flags discrepancies
    ///
    /// A receipt with no flags is verified on the spot.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotFound`] if the booking has no receipt awaiting proof
    /// - [`EngineError::Validation`] if the booking is not paid by bank transfer
    ///   or the receipt was already decided
    /// - [`EngineError::Store`] if the attachment cannot be stored
    pub async fn upload_receipt(
        &self,
        booking: &Booking,
        content: Arc<[u8]>,
    ) -> EngineResult<PaymentReceipt> {
        let mut receipt = self.open_receipt(booking.id).await?;
        if receipt.method != PaymentMethod::BankTransfer {
            return Err(EngineError::Validation(
                "receipts can only be uploaded for bank transfers".to_string(),
            ));
        }

        receipt.attachment = Some(self.attachments.put(receipt.id, Arc::clone(&content)).await?);
        match self.extractor.extract(content).await {
            Ok(extraction) => {
                receipt.flags = assess(&extraction, booking.total, &booking.currency, &self.config);
                receipt.extraction = Some(extraction);
            }
            Err(err) => {
                tracing::warn!(booking_id = %booking.id, error = %err, "Receipt could not be read");
                receipt.extraction = None;
                receipt.flags = vec![ReviewFlag::Unreadable];
            }
        }

        if receipt.flags.is_empty() {
            receipt.status = ReceiptStatus::Verified;
            receipt.decided_at = Some(self.clock.now());
            tracing::info!(booking_id = %booking.id, receipt_id = %receipt.id, "Receipt auto-verified");
        } else {
            tracing::info!(
                booking_id = %booking.id,
                receipt_id = %receipt.id,
                flags = ?receipt.flags,
                "Receipt flagged for manual review"
            );
        }

        self.receipts.write().await.insert(booking.id, receipt.clone());
        Ok(receipt)
    }

    /// Marks a booking's receipt as verified; verifying twice is a no-op
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the booking has no receipt and
    /// [`EngineError::VerificationRejected`] if it was rejected.
    pub async fn verify_receipt(&self, booking_id: BookingId) -> EngineResult<PaymentReceipt> {
        let mut receipts = self.receipts.write().await;
        let receipt = receipts
            .get_mut(&booking_id)
            .ok_or_else(|| EngineError::not_found("Payment receipt", booking_id))?;

        match receipt.status {
            ReceiptStatus::Verified => {}
            ReceiptStatus::Rejected => {
                return Err(EngineError::VerificationRejected {
                    reason: receipt.rejection_reason.clone().unwrap_or_default(),
                });
            }
            ReceiptStatus::Recorded => {
                receipt.status = ReceiptStatus::Verified;
                receipt.decided_at = Some(self.clock.now());
                tracing::info!(booking_id = %booking_id, receipt_id = %receipt.id, method = %receipt.method, "Receipt verified");
            }
        }
        Ok(receipt.clone())
    }

    /// Rejects a booking's receipt
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the booking has no receipt and
    /// [`EngineError::Validation`] if it was already decided.
    pub async fn reject_receipt(&self, booking_id: BookingId, reason: &str) -> EngineResult<PaymentReceipt> {
        let mut receipts = self.receipts.write().await;
        let receipt = receipts
            .get_mut(&booking_id)
            .ok_or_else(|| EngineError::not_found("Payment receipt", booking_id))?;
        if receipt.status != ReceiptStatus::Recorded {
            return Err(EngineError::Validation(
                "receipt has already been decided".to_string(),
            ));
        }

        receipt.status = ReceiptStatus::Rejected;
        receipt.rejection_reason = Some(reason.to_string());
        receipt.decided_at = Some(self.clock.now());
        tracing::info!(booking_id = %booking_id, receipt_id = %receipt.id, reason = %reason, "Receipt rejected");
        Ok(receipt.clone())
    }

    /// Cancels the card attempts of a booking that the customer has not yet authorized
    ///
    /// Authorized attempts are left alone: their capture is already under way
    /// and its outcome must still be reported. None of the booking's attempts
    /// stays current, so a later failure of one of them is superseded.
    pub async fn abandon(&self, booking_id: BookingId, reason: &str) {
        self.current.write().await.remove(&booking_id);
        let attempts: Vec<_> = self.attempts.read().await.values().cloned().collect();
        for attempt in attempts {
            let mut attempt = attempt.lock().await;
            if attempt.booking_id == booking_id && attempt.status == GatewayStatus::Initiated {
                attempt.status = GatewayStatus::Cancelled;
                attempt.failure_reason = Some(reason.to_string());
                attempt.updated_at = self.clock.now();
                tracing::info!(gateway_ref = %attempt.gateway_ref, booking_id = %booking_id, "Card attempt abandoned");
            }
        }
    }

    /// The receipt of a booking, if any
    pub async fn receipt(&self, booking_id: BookingId) -> Option<PaymentReceipt> {
        self.receipts.read().await.get(&booking_id).cloned()
    }

    /// Card attempts of a booking, oldest first
    pub async fn gateway_transactions(&self, booking_id: BookingId) -> Vec<GatewayTransaction> {
        let attempts: Vec<_> = self.attempts.read().await.values().cloned().collect();
        let mut found = Vec::new();
        for attempt in attempts {
            let attempt = attempt.lock().await;
            if attempt.booking_id == booking_id {
                found.push(attempt.clone());
            }
        }
        found.sort_by_key(|attempt| attempt.created_at);
        found
    }

    async fn open_receipt(&self, booking_id: BookingId) -> EngineResult<PaymentReceipt> {
        let receipt = self
            .receipts
            .read()
            .await
            .get(&booking_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("Payment receipt", booking_id))?;
        if receipt.status != ReceiptStatus::Recorded {
            return Err(EngineError::Validation(
                "receipt has already been decided".to_string(),
            ));
        }
        Ok(receipt)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use ferry_core::environment::GatewayError;
    use ferry_core::types::Money;
    use ferry_testing::fixtures::{capacity_sailing, priced_booking};
    use ferry_testing::{ScriptedGateway, StaticExtractor, test_clock};

    fn orchestrator(gateway: ScriptedGateway) -> PaymentOrchestrator {
        PaymentOrchestrator::new(
            Arc::new(gateway),
            Arc::new(StaticExtractor::failing(
                ferry_core::environment::ExtractionError::Unreadable("blank".to_string()),
            )),
            Arc::new(InMemoryAttachmentStore::new()),
            PaymentConfig::default(),
            Arc::new(test_clock()),
        )
    }

    fn booking() -> Booking {
        priced_booking(&capacity_sailing(10, 1), Money::from_cents(10_000), Money::ZERO)
    }

    #[tokio::test]
    async fn test_cash_extends_hold_by_cash_window() {
        let orchestrator = orchestrator(ScriptedGateway::new());
        let booking = booking();

        let initiation = orchestrator.initiate(&booking, PaymentMethod::Cash).await.unwrap();

        assert_eq!(
            initiation,
            PaymentInitiation::Pending {
                hold_until: Some(test_clock().now() + chrono::Duration::hours(2))
            }
        );
        let receipt = orchestrator.receipt(booking.id).await.unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Recorded);
        assert_eq!(receipt.amount, booking.total);
    }

    #[tokio::test]
    async fn test_transient_capture_failure_allows_redelivery() {
        let gateway = ScriptedGateway::new();
        let orchestrator = orchestrator(gateway.clone());
        let booking = booking();
        let PaymentInitiation::RequiresAction { gateway_ref, .. } =
            orchestrator.initiate(&booking, PaymentMethod::Card).await.unwrap()
        else {
            panic!("card payments redirect");
        };
        let secret = &PaymentConfig::default().webhook_secret;
        let event = webhook::sign_event(secret, &gateway_ref, "AUTHORIZED").unwrap();

        gateway.fail_capture(GatewayError::Timeout).await;
        assert!(matches!(orchestrator.on_gateway_event(&event).await, Err(EngineError::Gateway(_))));

        let attempts = orchestrator.gateway_transactions(booking.id).await;
        assert_eq!(attempts[0].status, GatewayStatus::Initiated);
    }

    #[tokio::test]
    async fn test_failure_of_a_replaced_attempt_is_superseded() {
        let gateway = ScriptedGateway::new();
        let orchestrator = orchestrator(gateway.clone());
        let booking = booking();
        let secret = &PaymentConfig::default().webhook_secret;
        let PaymentInitiation::RequiresAction { gateway_ref: first, .. } =
            orchestrator.initiate(&booking, PaymentMethod::Card).await.unwrap()
        else {
            panic!("card payments redirect");
        };
        let authorized = webhook::sign_event(secret, &first, "AUTHORIZED").unwrap();
        orchestrator.on_gateway_event(&authorized).await.unwrap();

        orchestrator.abandon(booking.id, "retrying").await;
        let PaymentInitiation::RequiresAction { gateway_ref: second, .. } =
            orchestrator.initiate(&booking, PaymentMethod::Card).await.unwrap()
        else {
            panic!("card payments redirect");
        };

        let stale = webhook::sign_event(secret, &first, "FAILED").unwrap();
        assert_eq!(
            orchestrator.on_gateway_event(&stale).await.unwrap(),
            PaymentOutcome::Superseded {
                booking_id: booking.id,
                gateway_ref: first,
            }
        );
        let live = webhook::sign_event(secret, &second, "FAILED").unwrap();
        assert!(matches!(
            orchestrator.on_gateway_event(&live).await.unwrap(),
            PaymentOutcome::Failed { .. }
        ));
    }

    #[test]
    fn test_window_past_the_calendar_is_dropped() {
        assert_eq!(extended(test_clock().now(), Duration::from_secs(u64::MAX / 2)), None);
        assert!(extended(test_clock().now(), Duration::from_secs(60)).is_some());
    }

    #[tokio::test]
    async fn test_unreadable_receipt_is_flagged() {
        let orchestrator = orchestrator(ScriptedGateway::new());
        let booking = booking();
        orchestrator.initiate(&booking, PaymentMethod::BankTransfer).await.unwrap();

        let receipt = orchestrator
            .upload_receipt(&booking, Arc::from(&b"???"[..]))
            .await
            .unwrap();

        assert_eq!(receipt.status, ReceiptStatus::Recorded);
        assert_eq!(receipt.flags, vec![ReviewFlag::Unreadable]);
        assert!(receipt.attachment.is_some());

        let rejected = orchestrator.reject_receipt(booking.id, "blurry").await.unwrap();
        assert_eq!(rejected.status, ReceiptStatus::Rejected);
        assert!(matches!(
            orchestrator.verify_receipt(booking.id).await,
            Err(EngineError::VerificationRejected { .. })
        ));
    }
}
