//! Sailings, fares and the booking aggregate.

use crate::types::{
    AgentId, BookingId, Channel, Creator, Currency, HoldId, Money, OwnerId, Rate, SailingId,
    SeatNumber, SegmentKey, TicketTypeId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ============================================================================
// Sailing (external: schedule + boat)
// ============================================================================

/// One departure of one boat, as registered by the scheduling side
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sailing {
    /// Sailing identifier
    pub id: SailingId,
    /// Operator owning the boat
    pub owner_id: OwnerId,
    /// Scheduled departure
    pub departure: DateTime<Utc>,
    /// Passenger capacity ceiling
    pub capacity: u32,
    /// Number of legs on the route (stops minus one)
    pub legs: u16,
    /// Named seats; `None` sells by capacity only
    pub seat_layout: Option<Vec<SeatNumber>>,
    /// Fare catalogue for this sailing
    pub fares: Vec<Fare>,
    /// Tax profile applied at pricing time
    pub tax_profile: Option<TaxProfile>,
    /// Currency all fares are quoted in
    pub currency: Currency,
}

impl Sailing {
    /// Seat-map or capacity mode
    #[must_use]
    pub const fn seat_mode(&self) -> SeatMode {
        if self.seat_layout.is_some() {
            SeatMode::SeatMap
        } else {
            SeatMode::Capacity
        }
    }

    /// Looks up the fare for a ticket type
    #[must_use]
    pub fn fare(&self, ticket_type_id: TicketTypeId) -> Option<&Fare> {
        self.fares.iter().find(|fare| fare.ticket_type_id == ticket_type_id)
    }
}

/// A ticket type enabled on a sailing, with schedule-level modifiers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fare {
    /// Ticket type
    pub ticket_type_id: TicketTypeId,
    /// Display name (e.g. "ECO", "VIP", "Child")
    pub name: String,
    /// Base price of the ticket type
    pub base_price: Money,
    /// Schedule surcharge added to the base price
    pub surcharge: Money,
    /// Schedule discount subtracted from the base price
    pub discount: Money,
}

impl Fare {
    /// Unit price after schedule modifiers, `None` if the discount exceeds the price
    #[must_use]
    pub fn unit_price(&self) -> Option<Money> {
        self.base_price
            .checked_add(self.surcharge)?
            .checked_sub(self.discount)
    }
}

/// Tax configuration of an operator
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxProfile {
    /// Display name (e.g. "Domestic GST 8% + Green Tax")
    pub name: String,
    /// Tax lines, applied in order
    pub lines: Vec<TaxLine>,
    /// How the total is rounded to the minor unit
    pub rounding: TaxRounding,
}

/// One tax line of a profile
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxLine {
    /// Percentage or fixed amount
    pub kind: TaxKind,
    /// What a percentage line is charged on
    pub applies_to: TaxBase,
    /// Inactive lines are skipped
    pub active: bool,
}

/// Tax line kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaxKind {
    /// Percentage of the base
    Percent(Rate),
    /// Fixed amount per booking
    Fixed(Money),
}

/// Base of a percentage tax line
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaxBase {
    /// The fare after discounts
    Fare,
    /// The fare plus tax accumulated by earlier lines
    Total,
}

/// Rounding rule for the tax total
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaxRounding {
    /// Round up to the next minor unit
    #[default]
    RoundUp,
    /// Truncate to the minor unit
    RoundDown,
    /// Round half up
    RoundNearest,
}

// ============================================================================
// Hold requests
// ============================================================================

/// How a booking claims inventory
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatMode {
    /// Specific named seats
    SeatMap,
    /// A count against an aggregate limit
    Capacity,
}

/// Seats or a count to hold
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeatRequest {
    /// Specific seats (seat-map mode)
    Seats(Vec<SeatNumber>),
    /// Any N places (capacity mode, or auto-assigned seats)
    Count(u32),
}

impl SeatRequest {
    /// Number of passengers this request covers
    #[must_use]
    pub fn passenger_count(&self) -> u32 {
        match self {
            Self::Seats(seats) => u32::try_from(seats.len()).unwrap_or(u32::MAX),
            Self::Count(count) => *count,
        }
    }
}

/// A ticket type and how many passengers travel on it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FareSelection {
    /// Ticket type
    pub ticket_type_id: TicketTypeId,
    /// Passengers on this ticket type
    pub quantity: u32,
}

/// Request to create a booking in HOLDING state
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldRequest {
    /// Who is booking
    pub creator: Creator,
    /// Sailing to book
    pub sailing_id: SailingId,
    /// Part of the route travelled
    pub segment: SegmentKey,
    /// Seats or count
    pub seats: SeatRequest,
    /// Fare breakdown; quantities must add up to the passenger count
    pub fares: Vec<FareSelection>,
    /// Sales channel
    pub channel: Channel,
    /// Selling agent, required on the AGENT channel
    pub agent_id: Option<AgentId>,
    /// Hold lease; the configured default when `None`
    pub ttl: Option<Duration>,
}

// ============================================================================
// Booking aggregate
// ============================================================================

/// Priced, immutable line item taken at booking time
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingItem {
    /// Ticket type
    pub ticket_type_id: TicketTypeId,
    /// Passengers on this line
    pub quantity: u32,
    /// Unit price after schedule modifiers
    pub unit_price: Money,
    /// Tax allocated to this line
    pub tax: Money,
    /// Line total including tax, after channel discount
    pub total: Money,
}

/// Booking lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    /// Inventory held, no payment intent yet
    Holding,
    /// A valid payment intent exists
    Reserved,
    /// Paid, posted, committed and ticketed
    Confirmed,
    /// The hold lapsed
    Expired,
    /// Cancelled by a caller or by a payment failure
    Cancelled,
}

impl BookingStatus {
    /// Terminal states are immutable
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Expired | Self::Cancelled)
    }

    /// Wire name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Holding => "HOLDING",
            Self::Reserved => "RESERVED",
            Self::Confirmed => "CONFIRMED",
            Self::Expired => "EXPIRED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment progress of a booking
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// No payment method selected
    Unpaid,
    /// Waiting for the payment to complete
    Pending,
    /// Money received
    Paid,
    /// Payment attempt failed
    Failed,
    /// Money received for a booking that could not be honoured
    RefundDue,
}

/// Payment method chosen for a booking
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// Paid at the counter
    Cash,
    /// External card gateway
    Card,
    /// Bank transfer with receipt verification
    BankTransfer,
    /// Agent prepaid credit
    Credit,
}

impl PaymentMethod {
    /// Wire name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "CASH",
            Self::Card => "CARD",
            Self::BankTransfer => "BANK_TRANSFER",
            Self::Credit => "CREDIT",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The booking aggregate root
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Booking identifier
    pub id: BookingId,
    /// Six-character human code
    pub code: String,
    /// Who created the booking
    pub creator: Creator,
    /// Operator of the sailing
    pub owner_id: OwnerId,
    /// Selling agent, if any
    pub agent_id: Option<AgentId>,
    /// Sailing booked
    pub sailing_id: SailingId,
    /// Segment travelled
    pub segment: SegmentKey,
    /// Seat-map or capacity
    pub seat_mode: SeatMode,
    /// Seats held (seat-map mode)
    pub seats: Vec<SeatNumber>,
    /// Places held
    pub seat_count: u32,
    /// Line items
    pub items: Vec<BookingItem>,
    /// Fare subtotal before discount and tax
    pub subtotal: Money,
    /// Channel discount
    pub discount: Money,
    /// Tax
    pub tax: Money,
    /// Amount payable
    pub total: Money,
    /// Currency
    pub currency: Currency,
    /// Sales channel
    pub channel: Channel,
    /// Selected payment method
    pub payment_method: Option<PaymentMethod>,
    /// Lifecycle status
    pub status: BookingStatus,
    /// Payment status
    pub payment_status: PaymentStatus,
    /// Inventory hold backing this booking
    pub hold_id: HoldId,
    /// When the hold lapses
    pub hold_expires_at: DateTime<Utc>,
    /// Why the booking failed, for terminal failures
    pub failure_reason: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
    /// Confirmation time
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl Booking {
    /// Whether the booking is in a terminal state
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether a read at `now` must treat this booking as expired
    #[must_use]
    pub fn is_lapsed_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, BookingStatus::Holding | BookingStatus::Reserved)
            && now >= self.hold_expires_at
    }

    /// Number of passengers
    #[must_use]
    pub const fn passenger_count(&self) -> u32 {
        self.seat_count
    }
}
