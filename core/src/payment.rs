//! Card-gateway attempts and bank-transfer receipts.

use crate::booking::PaymentMethod;
use crate::types::{BookingId, Currency, GatewayTransactionId, Money, ReceiptId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Card gateway
// ============================================================================

/// Status of one gateway attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayStatus {
    /// Sent to the gateway, customer redirected
    Initiated,
    /// Funds authorized, not yet captured
    Authorized,
    /// Funds captured
    Captured,
    /// Declined or errored
    Failed,
    /// Abandoned by the customer
    Cancelled,
}

impl GatewayStatus {
    /// Wire name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "INITIATED",
            Self::Authorized => "AUTHORIZED",
            Self::Captured => "CAPTURED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parses a wire name, case-insensitively
    #[must_use]
    pub fn parse(status: &str) -> Option<Self> {
        match status.trim().to_ascii_uppercase().as_str() {
            "INITIATED" => Some(Self::Initiated),
            "AUTHORIZED" => Some(Self::Authorized),
            "CAPTURED" => Some(Self::Captured),
            "FAILED" => Some(Self::Failed),
            "CANCELLED" | "CANCELED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Position in the forward order; events that do not advance are stale
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::Initiated => 0,
            Self::Authorized => 1,
            Self::Captured | Self::Failed | Self::Cancelled => 2,
        }
    }

    /// Terminal statuses never change again
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.rank() == 2
    }
}

impl fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attempt to pay a booking through the card gateway
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayTransaction {
    /// Attempt identifier
    pub id: GatewayTransactionId,
    /// Booking paid for
    pub booking_id: BookingId,
    /// Gateway's reference for the attempt
    pub gateway_ref: String,
    /// Amount requested
    pub amount: Money,
    /// Currency
    pub currency: Currency,
    /// Current status
    pub status: GatewayStatus,
    /// Redirect handed to the customer
    pub redirect_url: Option<String>,
    /// Last failure message
    pub failure_reason: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

/// A callback from the card gateway
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayEvent {
    /// Gateway's reference for the attempt
    pub gateway_ref: String,
    /// Reported status, as sent
    pub status: String,
    /// Hex HMAC-SHA256 over the signed fields
    pub signature: String,
}

impl GatewayEvent {
    /// The signed `key=value` fields of this event, in canonical order
    #[must_use]
    pub fn signed_fields(&self) -> BTreeMap<&'static str, &str> {
        BTreeMap::from([
            ("gatewayRef", self.gateway_ref.as_str()),
            ("status", self.status.as_str()),
        ])
    }
}

// ============================================================================
// Receipts
// ============================================================================

/// Verification status of a receipt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReceiptStatus {
    /// Awaiting payment or verification
    Recorded,
    /// Accepted, booking paid
    Verified,
    /// Refused
    Rejected,
}

/// Status printed on a bank transfer slip
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    /// Transfer completed
    Success,
    /// Transfer failed
    Failed,
    /// Transfer still processing
    Pending,
}

/// Fields read off a receipt image
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrExtraction {
    /// Amount, if found
    pub amount: Option<Money>,
    /// Currency, if found
    pub currency: Option<Currency>,
    /// Recipient account name, if found
    pub account: Option<String>,
    /// Bank reference, if found
    pub reference: Option<String>,
    /// Transfer status, if found
    pub transfer_status: Option<TransferStatus>,
    /// Extraction confidence in `[0, 1]`
    pub confidence: f64,
}

/// Why a receipt needs a human look
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewFlag {
    /// Confidence under the threshold
    LowConfidence,
    /// Amount outside tolerance
    AmountMismatch,
    /// Currency differs from the booking
    CurrencyMismatch,
    /// Recipient is not the configured account
    AccountMismatch,
    /// No bank reference found
    ReferenceMissing,
    /// Slip does not show a successful transfer
    TransferNotSuccessful,
    /// Extraction failed altogether
    Unreadable,
}

/// A payment receipt (cash or bank transfer)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    /// Receipt identifier
    pub id: ReceiptId,
    /// Booking paid for
    pub booking_id: BookingId,
    /// Payment method
    pub method: PaymentMethod,
    /// Amount expected
    pub amount: Money,
    /// Currency expected
    pub currency: Currency,
    /// Verification status
    pub status: ReceiptStatus,
    /// Stored attachment path
    pub attachment: Option<String>,
    /// Extraction result
    pub extraction: Option<OcrExtraction>,
    /// Review flags
    pub flags: Vec<ReviewFlag>,
    /// Rejection reason
    pub rejection_reason: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Verification or rejection time
    pub decided_at: Option<DateTime<Utc>>,
}

impl PaymentReceipt {
    /// A fresh RECORDED receipt
    #[must_use]
    pub fn recorded(
        booking_id: BookingId,
        method: PaymentMethod,
        amount: Money,
        currency: Currency,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReceiptId::new(),
            booking_id,
            method,
            amount,
            currency,
            status: ReceiptStatus::Recorded,
            attachment: None,
            extraction: None,
            flags: Vec::new(),
            rejection_reason: None,
            created_at: now,
            decided_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_status_parses_and_ranks() {
        assert_eq!(GatewayStatus::parse("authorized"), Some(GatewayStatus::Authorized));
        assert_eq!(GatewayStatus::parse("CANCELED"), Some(GatewayStatus::Cancelled));
        assert_eq!(GatewayStatus::parse("refunded"), None);
        assert!(GatewayStatus::Captured.rank() > GatewayStatus::Authorized.rank());
        assert!(GatewayStatus::Failed.is_terminal());
    }

    #[test]
    fn signed_fields_are_sorted() {
        let event = GatewayEvent {
            gateway_ref: "ref-1".to_string(),
            status: "CAPTURED".to_string(),
            signature: String::new(),
        };
        let keys: Vec<_> = event.signed_fields().into_keys().collect();
        assert_eq!(keys, vec!["gatewayRef", "status"]);
    }
}
