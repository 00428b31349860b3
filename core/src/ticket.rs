//! Boarding tickets and their signed payloads.

use crate::types::{BookingId, OwnerId, SailingId, SeatNumber, SegmentKey, TicketId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ticket lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    /// Valid for boarding
    Issued,
    /// Scanned at boarding
    Used,
    /// Cancelled by the operator
    Void,
    /// Refunded to the customer
    Refunded,
}

/// Claims carried by a boarding token
///
/// Field order is irrelevant: tokens sign the canonical (sorted-key) JSON form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    /// Ticket
    pub ticket_id: TicketId,
    /// Booking
    pub booking_id: BookingId,
    /// Operator
    pub owner_id: OwnerId,
    /// Sailing
    pub sailing_id: SailingId,
    /// Segment travelled
    pub segment_key: SegmentKey,
    /// Seat, in seat-map mode
    pub seat_id: Option<SeatNumber>,
    /// Signing time
    pub timestamp: DateTime<Utc>,
}

/// One boarding ticket per passenger
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket identifier
    pub id: TicketId,
    /// Booking the ticket belongs to
    pub booking_id: BookingId,
    /// Passenger position within the booking, starting at 1
    pub passenger_index: u32,
    /// Seat, in seat-map mode
    pub seat: Option<SeatNumber>,
    /// Signed boarding token
    pub token: String,
    /// Status
    pub status: TicketStatus,
    /// Issue time
    pub issued_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}
