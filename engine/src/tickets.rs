//! Boarding ticket issuance and token validation.
//!
//! A token is the unpadded base64url encoding of the ticket's payload as
//! canonical JSON (keys sorted), a `.`, and the hex HMAC-SHA256 of that JSON:
//!
//! ```text
//! eyJib29raW5nX2lkIjoi....3f9a0c...e1
//! ```
//!
//! Validation needs nothing but the signing secret, so a boarding scanner can
//! check tickets without reaching the engine.

use crate::config::TicketConfig;
use crate::metrics;
use crate::signing;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use ferry_core::booking::{Booking, BookingStatus, PaymentStatus};
use ferry_core::environment::Clock;
use ferry_core::error::{EngineError, EngineResult};
use ferry_core::ticket::{Ticket, TicketStatus, TokenPayload};
use ferry_core::types::{BookingId, TicketId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

/// Why a token does not validate
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Not a `payload.signature` pair, or the payload does not decode
    #[error("Malformed token: {0}")]
    Malformed(String),
    /// The signature does not match the payload
    #[error("Token signature mismatch")]
    SignatureMismatch,
    /// Signed longer ago than the freshness window
    #[error("Token signed at {signed_at} is stale")]
    Stale {
        /// When the token was signed
        signed_at: DateTime<Utc>,
    },
}

impl From<TokenError> for EngineError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::SignatureMismatch => Self::InvalidSignature {
                context: "boarding token",
            },
            TokenError::Malformed(_) | TokenError::Stale { .. } => Self::Validation(err.to_string()),
        }
    }
}

/// Canonical JSON of a payload
///
/// Going through [`serde_json::Value`] sorts object keys, so the bytes do not
/// depend on struct field order.
fn canonical_json(payload: &TokenPayload) -> EngineResult<String> {
    serde_json::to_value(payload)
        .and_then(|value| serde_json::to_string(&value))
        .map_err(|err| EngineError::Validation(format!("token payload: {err}")))
}

/// Signs a payload into a boarding token
///
/// # Errors
///
/// Returns [`EngineError::Validation`] if the payload cannot be serialized or
/// the key is rejected.
pub fn sign_token(secret: &str, payload: &TokenPayload) -> EngineResult<String> {
    let json = canonical_json(payload)?;
    let signature = signing::sign_hex(secret, json.as_bytes())?;
    Ok(format!("{}.{signature}", URL_SAFE_NO_PAD.encode(json.as_bytes())))
}

/// Mints and validates boarding tickets
pub struct TicketIssuer {
    secret: String,
    freshness: Duration,
    clock: Arc<dyn Clock>,
    tickets: RwLock<HashMap<BookingId, Vec<Ticket>>>,
}

impl TicketIssuer {
    /// Creates an issuer
    #[must_use]
    pub fn new(config: &TicketConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            secret: config.signing_secret.clone(),
            freshness: config.freshness,
            clock,
            tickets: RwLock::new(HashMap::new()),
        }
    }

    /// Issues one ticket per passenger; issuing again returns the same tickets
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] if the booking is not paid or a
    /// token cannot be signed.
    pub async fn issue(&self, booking: &Booking) -> EngineResult<Vec<Ticket>> {
        if booking.status != BookingStatus::Confirmed && booking.payment_status != PaymentStatus::Paid {
            return Err(EngineError::Validation(format!(
                "booking {} is not paid",
                booking.code
            )));
        }

        let mut tickets = self.tickets.write().await;
        if let Some(existing) = tickets.get(&booking.id) {
            return Ok(existing.clone());
        }

        let now = self.clock.now();
        let mut issued = Vec::new();
        for index in 0..booking.passenger_count() {
            let seat = usize::try_from(index)
                .ok()
                .and_then(|index| booking.seats.get(index))
                .cloned();
            let payload = TokenPayload {
                ticket_id: TicketId::new(),
                booking_id: booking.id,
                owner_id: booking.owner_id,
                sailing_id: booking.sailing_id,
                segment_key: booking.segment,
                seat_id: seat.clone(),
                timestamp: now,
            };
            issued.push(Ticket {
                id: payload.ticket_id,
                booking_id: booking.id,
                passenger_index: index + 1,
                seat,
                token: sign_token(&self.secret, &payload)?,
                status: TicketStatus::Issued,
                issued_at: now,
                updated_at: now,
            });
        }

        tracing::info!(
            booking_id = %booking.id,
            code = %booking.code,
            tickets = issued.len(),
            "Tickets issued"
        );
        tickets.insert(booking.id, issued.clone());
        Ok(issued)
    }

    /// Checks a token's signature and freshness and returns its payload
    ///
    /// # Errors
    ///
    /// Returns the [`TokenError`] describing why the token is invalid. A
    /// signature mismatch is logged and counted as an alert.
    pub fn validate(&self, token: &str) -> Result<TokenPayload, TokenError> {
        let (encoded, signature) = token
            .split_once('.')
            .ok_or_else(|| TokenError::Malformed("missing signature".to_string()))?;
        let json = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|err| TokenError::Malformed(err.to_string()))?;

        if !signing::verify_hex(&self.secret, &json, signature) {
            tracing::error!("ALERT: boarding token signature mismatch");
            metrics::record_alert("token_signature");
            return Err(TokenError::SignatureMismatch);
        }

        let payload: TokenPayload =
            serde_json::from_slice(&json).map_err(|err| TokenError::Malformed(err.to_string()))?;

        let age = self.clock.now().signed_duration_since(payload.timestamp);
        let stale = chrono::Duration::from_std(self.freshness).is_ok_and(|window| age > window);
        if stale {
            tracing::debug!(ticket_id = %payload.ticket_id, signed_at = %payload.timestamp, "Stale boarding token");
            return Err(TokenError::Stale {
                signed_at: payload.timestamp,
            });
        }
        Ok(payload)
    }

    /// Tickets of a booking
    pub async fn tickets(&self, booking_id: BookingId) -> Vec<Ticket> {
        self.tickets
            .read()
            .await
            .get(&booking_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Marks a ticket as scanned at boarding
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown ticket and
    /// [`EngineError::Validation`] unless it is ISSUED.
    pub async fn mark_used(&self, ticket_id: TicketId) -> EngineResult<Ticket> {
        self.change_status(ticket_id, TicketStatus::Used).await
    }

    /// Voids a ticket
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown ticket and
    /// [`EngineError::Validation`] unless it is ISSUED.
    pub async fn void(&self, ticket_id: TicketId) -> EngineResult<Ticket> {
        self.change_status(ticket_id, TicketStatus::Void).await
    }

    async fn change_status(&self, ticket_id: TicketId, status: TicketStatus) -> EngineResult<Ticket> {
        let mut tickets = self.tickets.write().await;
        let ticket = tickets
            .values_mut()
            .flat_map(|tickets| tickets.iter_mut())
            .find(|ticket| ticket.id == ticket_id)
            .ok_or_else(|| EngineError::not_found("Ticket", ticket_id))?;

        if ticket.status != TicketStatus::Issued {
            return Err(EngineError::Validation(format!(
                "ticket {ticket_id} is {:?}",
                ticket.status
            )));
        }
        ticket.status = status;
        ticket.updated_at = self.clock.now();
        tracing::info!(ticket_id = %ticket_id, status = ?status, "Ticket status changed");
        Ok(ticket.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ferry_core::types::Money;
    use ferry_testing::fixtures::{capacity_sailing, priced_booking};
    use ferry_testing::{ManualClock, test_clock};

    fn paid_booking(passengers: u32) -> Booking {
        Booking {
            payment_status: PaymentStatus::Paid,
            seat_count: passengers,
            ..priced_booking(&capacity_sailing(10, 2), Money::from_cents(10_000), Money::ZERO)
        }
    }

    #[tokio::test]
    async fn test_issues_one_ticket_per_passenger_once() {
        let issuer = TicketIssuer::new(&TicketConfig::default(), Arc::new(test_clock()));
        let booking = paid_booking(3);

        let first = issuer.issue(&booking).await.unwrap();
        let second = issuer.issue(&booking).await.unwrap();

        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
        assert_eq!(
            first.iter().map(|t| t.passenger_index).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        let payload = issuer.validate(&first[0].token).unwrap();
        assert_eq!(payload.booking_id, booking.id);
        assert_eq!(payload.segment_key.to_string(), "0-2");
    }

    #[tokio::test]
    async fn test_unpaid_booking_gets_no_tickets() {
        let issuer = TicketIssuer::new(&TicketConfig::default(), Arc::new(test_clock()));
        let booking = priced_booking(&capacity_sailing(10, 1), Money::from_cents(500), Money::ZERO);

        assert!(matches!(issuer.issue(&booking).await, Err(EngineError::Validation(_))));
    }

    #[tokio::test]
    async fn test_token_goes_stale() {
        let clock = ManualClock::starting_at_test_epoch();
        let issuer = TicketIssuer::new(&TicketConfig::default(), Arc::new(clock.clone()));
        let ticket = issuer.issue(&paid_booking(1)).await.unwrap().remove(0);

        clock.advance(chrono::Duration::hours(24));
        assert!(issuer.validate(&ticket.token).is_ok());

        clock.advance(chrono::Duration::seconds(1));
        assert!(matches!(issuer.validate(&ticket.token), Err(TokenError::Stale { .. })));
    }

    #[tokio::test]
    async fn test_used_ticket_cannot_be_voided() {
        let issuer = TicketIssuer::new(&TicketConfig::default(), Arc::new(test_clock()));
        let ticket = issuer.issue(&paid_booking(1)).await.unwrap().remove(0);

        let used = issuer.mark_used(ticket.id).await.unwrap();
        assert_eq!(used.status, TicketStatus::Used);
        assert!(matches!(issuer.void(ticket.id).await, Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let issuer = TicketIssuer::new(&TicketConfig::default(), Arc::new(test_clock()));
        assert!(matches!(issuer.validate("no-dot-here"), Err(TokenError::Malformed(_))));
        assert!(matches!(issuer.validate("!!!.abcd"), Err(TokenError::Malformed(_))));
    }
}
