//! Value objects shared across the engine.
//!
//! Identifiers are UUID newtypes, money is integer minor units and rates are
//! basis points, so every amount the ledger sees is exact.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a sailing (one departure of one boat)
    SailingId
);
uuid_id!(
    /// Unique identifier for a boat operator
    OwnerId
);
uuid_id!(
    /// Unique identifier for a travel agent
    AgentId
);
uuid_id!(
    /// Unique identifier for a user of the caller surface
    UserId
);
uuid_id!(
    /// Unique identifier for a booking
    BookingId
);
uuid_id!(
    /// Unique identifier for an inventory hold
    HoldId
);
uuid_id!(
    /// Unique identifier for a ticket
    TicketId
);
uuid_id!(
    /// Unique identifier for a ticket type (fare class)
    TicketTypeId
);
uuid_id!(
    /// Unique identifier for a financial transaction
    TransactionId
);
uuid_id!(
    /// Unique identifier for a ledger entry
    EntryId
);
uuid_id!(
    /// Unique identifier for a commission rule
    CommissionId
);
uuid_id!(
    /// Unique identifier for a payment receipt
    ReceiptId
);
uuid_id!(
    /// Unique identifier for one card-gateway attempt
    GatewayTransactionId
);

// ============================================================================
// Money Value Object (minor units to avoid floating point errors)
// ============================================================================

/// Represents money in minor units (cents, laari) to avoid floating-point errors
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Zero
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from minor units
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Creates a `Money` value from major units with overflow checking
    #[must_use]
    pub const fn checked_from_major(major: u64) -> Option<Self> {
        let Some(cents) = major.checked_mul(100) else {
            return None;
        };
        Some(Self(cents))
    }

    /// Returns the amount in minor units
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Returns the whole major units (rounded down)
    #[must_use]
    pub const fn major(&self) -> u64 {
        self.0 / 100
    }

    /// `true` for a zero amount
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Sum, `None` on overflow
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        let Some(sum) = self.0.checked_add(other.0) else {
            return None;
        };
        Some(Self(sum))
    }

    /// Difference, `None` when `other` is larger; amounts never go negative
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        let Some(rest) = self.0.checked_sub(other.0) else {
            return None;
        };
        Some(Self(rest))
    }

    /// Difference, floored at zero
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Price of `quantity` units, `None` on overflow
    #[must_use]
    pub const fn checked_multiply(self, quantity: u32) -> Option<Self> {
        let Some(product) = self.0.checked_mul(quantity as u64) else {
            return None;
        };
        Some(Self(product))
    }

    /// Sums an iterator of amounts, `None` on overflow
    #[must_use]
    pub fn checked_sum<I: IntoIterator<Item = Self>>(amounts: I) -> Option<Self> {
        amounts
            .into_iter()
            .try_fold(Self::ZERO, Self::checked_add)
    }

    /// Absolute difference between two amounts
    #[must_use]
    pub const fn abs_diff(self, other: Self) -> Self {
        Self(self.0.abs_diff(other.0))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.major(), self.0 % 100)
    }
}

/// A rate in basis points (1 bp = 0.01 %)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rate(u32);

impl Rate {
    /// One hundred percent
    pub const FULL: Self = Self(10_000);

    /// Creates a rate from basis points
    #[must_use]
    pub const fn from_bps(bps: u32) -> Self {
        Self(bps)
    }

    /// Creates a rate from whole percent
    #[must_use]
    pub const fn from_percent(percent: u32) -> Self {
        Self(percent.saturating_mul(100))
    }

    /// Returns the rate in basis points
    #[must_use]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Applies the rate to an amount, rounding half up to the minor unit
    #[must_use]
    pub fn apply(self, amount: Money) -> Option<Money> {
        let scaled = u128::from(amount.cents()) * u128::from(self.0) + 5_000;
        u64::try_from(scaled / 10_000).ok().map(Money::from_cents)
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}

/// ISO-4217 style currency code
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Currency(String);

impl Currency {
    /// Creates a currency code (upper-cased)
    #[must_use]
    pub fn new(code: &str) -> Self {
        Self(code.trim().to_ascii_uppercase())
    }

    /// Maldivian rufiyaa, the marketplace default
    #[must_use]
    pub fn mvr() -> Self {
        Self::new("MVR")
    }

    /// Returns the code
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self::mvr()
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Seats and Segments
// ============================================================================

/// A named seat on a boat's seat map (e.g. "A-12")
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeatNumber(String);

impl SeatNumber {
    /// Creates a new `SeatNumber`
    #[must_use]
    pub fn new(number: impl Into<String>) -> Self {
        Self(number.into())
    }

    /// Returns the seat number as a string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SeatNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The stretch of a route a passenger travels: stops `from` (inclusive) to `to`
///
/// Written as `"<from>-<to>"`. A segment occupies legs `from..to`; two segments
/// compete for capacity only if their leg ranges overlap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentKey {
    from: u16,
    to: u16,
}

impl SegmentKey {
    /// Creates a segment, `None` unless `from < to`
    #[must_use]
    pub const fn new(from: u16, to: u16) -> Option<Self> {
        if from < to {
            Some(Self { from, to })
        } else {
            None
        }
    }

    /// The whole route of a sailing with `legs` legs
    #[must_use]
    pub const fn full_route(legs: u16) -> Option<Self> {
        Self::new(0, legs)
    }

    /// Boarding stop index
    #[must_use]
    pub const fn from(&self) -> u16 {
        self.from
    }

    /// Alighting stop index
    #[must_use]
    pub const fn to(&self) -> u16 {
        self.to
    }

    /// Leg indices this segment occupies
    #[must_use]
    pub fn legs(&self) -> Range<usize> {
        usize::from(self.from)..usize::from(self.to)
    }

    /// Whether two segments share at least one leg
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.from < other.to && other.from < self.to
    }

    /// Whether the segment fits a sailing with `legs` legs
    #[must_use]
    pub const fn fits(&self, legs: u16) -> bool {
        self.to <= legs
    }
}

impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.from, self.to)
    }
}

impl FromStr for SegmentKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (from, to) = s
            .split_once('-')
            .ok_or_else(|| format!("segment key '{s}' must look like '<from>-<to>'"))?;
        let from: u16 = from
            .trim()
            .parse()
            .map_err(|_| format!("invalid boarding stop in segment key '{s}'"))?;
        let to: u16 = to
            .trim()
            .parse()
            .map_err(|_| format!("invalid alighting stop in segment key '{s}'"))?;
        Self::new(from, to).ok_or_else(|| format!("segment key '{s}' must board before it alights"))
    }
}

// ============================================================================
// Channels and Actors
// ============================================================================

/// Sales channel a booking was made through
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    /// Public customer app
    Public,
    /// Travel agent
    Agent,
    /// Boat operator selling its own seats
    Owner,
}

impl Channel {
    /// Wire name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "PUBLIC",
            Self::Agent => "AGENT",
            Self::Owner => "OWNER",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of whoever created a booking
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// End customer
    Customer,
    /// Travel agent
    Agent,
    /// Boat operator or its staff
    Owner,
    /// Platform administrator
    Admin,
}

/// Who created a booking
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Creator {
    /// Role at creation time
    pub role: Role,
    /// User identifier
    pub user_id: UserId,
}

impl Creator {
    /// Creates a new `Creator`
    #[must_use]
    pub const fn new(role: Role, user_id: UserId) -> Self {
        Self { role, user_id }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn rate_rounds_half_up() {
        // 5% of 10.10 = 0.505 -> 0.51
        assert_eq!(
            Rate::from_percent(5).apply(Money::from_cents(1_010)),
            Some(Money::from_cents(51))
        );
        // 3% of 10.00 = 0.30 exactly
        assert_eq!(
            Rate::from_percent(3).apply(Money::from_cents(1_000)),
            Some(Money::from_cents(30))
        );
    }

    #[test]
    fn segment_key_parses_and_overlaps() {
        let outbound: SegmentKey = "0-2".parse().unwrap();
        let tail: SegmentKey = "2-3".parse().unwrap();
        let middle = SegmentKey::new(1, 3);

        assert_eq!(outbound.to_string(), "0-2");
        assert!(!outbound.overlaps(&tail));
        assert!(middle.is_some_and(|m| m.overlaps(&outbound) && m.overlaps(&tail)));
        assert!("3-1".parse::<SegmentKey>().is_err());
        assert!("x".parse::<SegmentKey>().is_err());
    }

    #[test]
    fn money_checked_arithmetic() {
        let a = Money::from_cents(150);
        assert_eq!(a.checked_sub(Money::from_cents(200)), None);
        assert_eq!(a.saturating_sub(Money::from_cents(200)), Money::ZERO);
        assert_eq!(
            Money::checked_sum([a, a, Money::from_cents(1)]),
            Some(Money::from_cents(301))
        );
        assert_eq!(Money::from_cents(u64::MAX).checked_add(a), None);
        assert_eq!(a.to_string(), "1.50");
    }
}
