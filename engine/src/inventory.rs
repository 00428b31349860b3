//! Inventory ledger: atomic seat and capacity holds with time-bounded leases.
//!
//! This component is the only authority on whether a seat or place is free.
//!
//! **Concurrency Strategy**: every sailing has its own async mutex guarding its
//! authoritative hold set. Check-and-reserve runs entirely under that lock, so
//! two callers can never both see the last place as free. Different sailings
//! never contend. Each record carries a version stamp bumped on every mutation.
//!
//! Holds are leases. Expired holds are reclaimed on every access to their
//! sailing, and optionally by a background sweeper ([`InventoryLedger::spawn_sweeper`]).
//! Commit checks and clears the expiry under the same lock, so a hold can never
//! be committed and reclaimed at the same instant.

use crate::metrics;
use chrono::{DateTime, Utc};
use ferry_core::booking::{Sailing, SeatMode, SeatRequest};
use ferry_core::environment::Clock;
use ferry_core::error::EngineError;
use ferry_core::types::{HoldId, SailingId, SeatNumber, SegmentKey};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by the inventory ledger
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InventoryError {
    /// The sailing was never registered
    #[error("Unknown sailing {0}")]
    UnknownSailing(SailingId),

    /// Not enough free places on every leg of the segment
    #[error("No capacity: requested {requested}, available {available}")]
    NoCapacity {
        /// Places requested
        requested: u32,
        /// Places free
        available: u32,
    },

    /// A requested seat is held or sold on an overlapping segment
    #[error("Seat {seat} is already held")]
    SeatAlreadyHeld {
        /// The contested seat
        seat: SeatNumber,
    },

    /// A requested seat is not on the boat's seat map
    #[error("Seat {seat} does not exist on this sailing")]
    UnknownSeat {
        /// The requested seat
        seat: SeatNumber,
    },

    /// The hold's lease has lapsed
    #[error("Hold {0} has expired")]
    HoldExpired(HoldId),

    /// The hold was released before the call
    #[error("Hold {0} was released")]
    HoldReleased(HoldId),

    /// The hold was never taken on this sailing
    #[error("Unknown hold {0}")]
    UnknownHold(HoldId),

    /// The segment does not fit the route
    #[error("Segment {segment} does not fit a route of {legs} legs")]
    InvalidSegment {
        /// Requested segment
        segment: SegmentKey,
        /// Legs on the route
        legs: u16,
    },

    /// The request is malformed
    #[error("Invalid inventory request: {0}")]
    InvalidRequest(String),
}

impl From<InventoryError> for EngineError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::NoCapacity {
                requested,
                available,
            } => Self::CapacityExhausted {
                requested,
                available,
            },
            InventoryError::SeatAlreadyHeld { seat } => Self::SeatConflict {
                seat: seat.to_string(),
            },
            InventoryError::HoldExpired(_) | InventoryError::HoldReleased(_) => Self::HoldExpired,
            InventoryError::UnknownSailing(id) => Self::not_found("Sailing", id),
            InventoryError::UnknownHold(id) => Self::not_found("Hold", id),
            other @ (InventoryError::UnknownSeat { .. }
            | InventoryError::InvalidSegment { .. }
            | InventoryError::InvalidRequest(_)) => Self::Validation(other.to_string()),
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// Proof of a hold, handed back to commit, release or extend it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldToken {
    /// Hold identifier
    pub hold_id: HoldId,
    /// Sailing held on
    pub sailing_id: SailingId,
    /// Segment held
    pub segment: SegmentKey,
    /// Seats held (seat-map mode)
    pub seats: Vec<SeatNumber>,
    /// Places held
    pub count: u32,
    /// When the lease lapses
    pub expires_at: DateTime<Utc>,
}

/// Result of a release
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The places are free again
    Released,
    /// Nothing to do: the hold had already lapsed or been released
    AlreadyReleased,
}

/// Free places on a segment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    /// Capacity ceiling
    pub capacity: u32,
    /// Places free on every leg of the segment
    pub free: u32,
    /// Free seats, in seat-map mode
    pub free_seats: Option<Vec<SeatNumber>>,
    /// Version of the sailing record
    pub version: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HoldState {
    Held { expires_at: DateTime<Utc> },
    Committed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Closure {
    Released,
    Expired,
}

/// Hours a closed hold id is remembered for precise errors
const CLOSED_RETENTION_HOURS: i64 = 24;

#[derive(Clone, Debug)]
struct HoldRecord {
    segment: SegmentKey,
    seats: Vec<SeatNumber>,
    count: u32,
    state: HoldState,
}

/// Authoritative hold set of one sailing
#[derive(Debug)]
struct SailingInventory {
    capacity: u32,
    legs: u16,
    seat_layout: Option<Vec<SeatNumber>>,
    holds: HashMap<HoldId, HoldRecord>,
    closed: HashMap<HoldId, (Closure, DateTime<Utc>)>,
    version: u64,
}

impl SailingInventory {
    fn new(sailing: &Sailing) -> Self {
        Self {
            capacity: sailing.capacity,
            legs: sailing.legs,
            seat_layout: sailing.seat_layout.clone(),
            holds: HashMap::new(),
            closed: HashMap::new(),
            version: 0,
        }
    }

    const fn mode(&self) -> SeatMode {
        if self.seat_layout.is_some() {
            SeatMode::SeatMap
        } else {
            SeatMode::Capacity
        }
    }

    /// Moves lapsed holds to `closed` and forgets old closures; returns how many were reclaimed
    fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let lapsed: Vec<HoldId> = self
            .holds
            .iter()
            .filter(|(_, hold)| matches!(hold.state, HoldState::Held { expires_at } if expires_at <= now))
            .map(|(id, _)| *id)
            .collect();

        for hold_id in &lapsed {
            self.holds.remove(hold_id);
            self.closed.insert(*hold_id, (Closure::Expired, now));
            tracing::debug!(hold_id = %hold_id, "Hold lapsed, places reclaimed");
        }
        if let Some(horizon) = now.checked_sub_signed(chrono::Duration::hours(CLOSED_RETENTION_HOURS)) {
            self.closed.retain(|_, (_, closed_at)| *closed_at > horizon);
        }
        if !lapsed.is_empty() {
            self.version += 1;
        }
        lapsed.len()
    }

    /// Places occupied on the busiest leg of `segment`
    fn peak_occupancy(&self, segment: SegmentKey) -> u32 {
        segment
            .legs()
            .map(|leg| {
                self.holds
                    .values()
                    .filter(|hold| hold.segment.legs().contains(&leg))
                    .map(|hold| hold.count)
                    .sum::<u32>()
            })
            .max()
            .unwrap_or(0)
    }

    fn free_places(&self, segment: SegmentKey) -> u32 {
        self.capacity.saturating_sub(self.peak_occupancy(segment))
    }

    fn taken_seats(&self, segment: SegmentKey) -> HashSet<&SeatNumber> {
        self.holds
            .values()
            .filter(|hold| hold.segment.overlaps(&segment))
            .flat_map(|hold| hold.seats.iter())
            .collect()
    }

    fn free_seats(&self, segment: SegmentKey) -> Option<Vec<SeatNumber>> {
        let layout = self.seat_layout.as_ref()?;
        let taken = self.taken_seats(segment);
        Some(
            layout
                .iter()
                .filter(|seat| !taken.contains(seat))
                .cloned()
                .collect(),
        )
    }

    fn validate_hold(
        &self,
        segment: SegmentKey,
        request: &SeatRequest,
    ) -> Result<Vec<SeatNumber>, InventoryError> {
        if !segment.fits(self.legs) {
            return Err(InventoryError::InvalidSegment {
                segment,
                legs: self.legs,
            });
        }

        let requested = request.passenger_count();
        if requested == 0 {
            return Err(InventoryError::InvalidRequest(
                "at least one place must be requested".to_string(),
            ));
        }

        let available = self.free_places(segment);
        if available < requested {
            return Err(InventoryError::NoCapacity {
                requested,
                available,
            });
        }

        match (self.mode(), request) {
            (SeatMode::Capacity, SeatRequest::Count(_)) => Ok(Vec::new()),
            (SeatMode::Capacity, SeatRequest::Seats(_)) => Err(InventoryError::InvalidRequest(
                "this sailing sells by capacity, seats cannot be chosen".to_string(),
            )),
            (SeatMode::SeatMap, SeatRequest::Seats(seats)) => self.validate_seats(segment, seats),
            (SeatMode::SeatMap, SeatRequest::Count(count)) => {
                let free = self.free_seats(segment).unwrap_or_default();
                let wanted = usize::try_from(*count).unwrap_or(usize::MAX);
                if free.len() < wanted {
                    return Err(InventoryError::NoCapacity {
                        requested,
                        available: u32::try_from(free.len()).unwrap_or(u32::MAX),
                    });
                }
                Ok(free.into_iter().take(wanted).collect())
            }
        }
    }

    fn validate_seats(
        &self,
        segment: SegmentKey,
        seats: &[SeatNumber],
    ) -> Result<Vec<SeatNumber>, InventoryError> {
        let layout = self.seat_layout.as_deref().unwrap_or_default();
        let taken = self.taken_seats(segment);
        let mut seen = HashSet::new();

        for seat in seats {
            if !layout.contains(seat) {
                return Err(InventoryError::UnknownSeat { seat: seat.clone() });
            }
            if !seen.insert(seat) {
                return Err(InventoryError::InvalidRequest(format!(
                    "seat {seat} requested twice"
                )));
            }
            if taken.contains(seat) {
                return Err(InventoryError::SeatAlreadyHeld { seat: seat.clone() });
            }
        }
        Ok(seats.to_vec())
    }

    /// Why `token` is no longer live; a forgotten closure past the lease counts as lapsed
    fn closed_error(&self, token: &HoldToken, now: DateTime<Utc>) -> InventoryError {
        match self.closed.get(&token.hold_id) {
            Some((Closure::Expired, _)) => InventoryError::HoldExpired(token.hold_id),
            Some((Closure::Released, _)) => InventoryError::HoldReleased(token.hold_id),
            None if token.expires_at <= now => InventoryError::HoldExpired(token.hold_id),
            None => InventoryError::UnknownHold(token.hold_id),
        }
    }
}

// ============================================================================
// Ledger
// ============================================================================

/// Atomic hold-and-commit over every registered sailing
pub struct InventoryLedger {
    sailings: RwLock<HashMap<SailingId, Arc<Mutex<SailingInventory>>>>,
    clock: Arc<dyn Clock>,
}

impl InventoryLedger {
    /// Creates an empty ledger
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            sailings: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Registers a sailing's capacity; re-registering an existing sailing is a no-op
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::InvalidRequest`] if the sailing has no legs or
    /// its seat map is larger than its capacity.
    pub async fn register(&self, sailing: &Sailing) -> Result<(), InventoryError> {
        if sailing.legs == 0 {
            return Err(InventoryError::InvalidRequest(
                "a sailing needs at least one leg".to_string(),
            ));
        }
        if let Some(layout) = &sailing.seat_layout {
            let unique: HashSet<_> = layout.iter().collect();
            if unique.len() != layout.len() {
                return Err(InventoryError::InvalidRequest(
                    "seat map lists a seat twice".to_string(),
                ));
            }
        }

        let mut sailings = self.sailings.write().await;
        sailings
            .entry(sailing.id)
            .or_insert_with(|| Arc::new(Mutex::new(SailingInventory::new(sailing))));

        tracing::info!(
            sailing_id = %sailing.id,
            capacity = sailing.capacity,
            legs = sailing.legs,
            seat_map = sailing.seat_layout.is_some(),
            "Sailing registered with inventory"
        );
        Ok(())
    }

    async fn record(
        &self,
        sailing_id: SailingId,
    ) -> Result<Arc<Mutex<SailingInventory>>, InventoryError> {
        self.sailings
            .read()
            .await
            .get(&sailing_id)
            .cloned()
            .ok_or(InventoryError::UnknownSailing(sailing_id))
    }

    /// Holds seats or places on a segment for `ttl`
    ///
    /// # Errors
    ///
    /// - [`InventoryError::NoCapacity`] if the segment cannot take the passengers
    /// - [`InventoryError::SeatAlreadyHeld`] if a chosen seat is taken
    /// - [`InventoryError::UnknownSailing`], [`InventoryError::UnknownSeat`],
    ///   [`InventoryError::InvalidSegment`], [`InventoryError::InvalidRequest`]
    ///   for malformed requests
    pub async fn hold(
        &self,
        sailing_id: SailingId,
        segment: SegmentKey,
        request: &SeatRequest,
        ttl: Duration,
    ) -> Result<HoldToken, InventoryError> {
        let ttl = chrono::Duration::from_std(ttl)
            .ok()
            .filter(|ttl| *ttl > chrono::Duration::zero())
            .ok_or_else(|| InventoryError::InvalidRequest("hold ttl must be positive".to_string()))?;

        let record = self.record(sailing_id).await?;
        let mut inventory = record.lock().await;
        let now = self.clock.now();
        inventory.sweep(now);

        let expires_at = now.checked_add_signed(ttl).ok_or_else(|| {
            InventoryError::InvalidRequest("hold ttl runs past the end of the calendar".to_string())
        })?;

        let seats = match inventory.validate_hold(segment, request) {
            Ok(seats) => seats,
            Err(err) => {
                let outcome = match err {
                    InventoryError::NoCapacity { .. } => "no_capacity",
                    InventoryError::SeatAlreadyHeld { .. } => "seat_conflict",
                    _ => "rejected",
                };
                metrics::record_hold(outcome);
                tracing::debug!(sailing_id = %sailing_id, segment = %segment, error = %err, "Hold refused");
                return Err(err);
            }
        };

        let token = HoldToken {
            hold_id: HoldId::new(),
            sailing_id,
            segment,
            count: request.passenger_count(),
            seats: seats.clone(),
            expires_at,
        };
        inventory.holds.insert(
            token.hold_id,
            HoldRecord {
                segment,
                seats,
                count: token.count,
                state: HoldState::Held {
                    expires_at: token.expires_at,
                },
            },
        );
        inventory.version += 1;
        metrics::record_hold("held");

        tracing::info!(
            hold_id = %token.hold_id,
            sailing_id = %sailing_id,
            segment = %segment,
            count = token.count,
            expires_at = %token.expires_at,
            version = inventory.version,
            "Inventory held"
        );
        Ok(token)
    }

    /// Turns a live hold into a sale; committing twice is a no-op
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::HoldExpired`] if the lease has lapsed and
    /// [`InventoryError::HoldReleased`] if the hold was released.
    pub async fn commit(&self, token: &HoldToken) -> Result<(), InventoryError> {
        let record = self.record(token.sailing_id).await?;
        let mut inventory = record.lock().await;
        let now = self.clock.now();
        inventory.sweep(now);

        let Some(hold) = inventory.holds.get_mut(&token.hold_id) else {
            return Err(inventory.closed_error(token, now));
        };
        if hold.state == HoldState::Committed {
            tracing::debug!(hold_id = %token.hold_id, "Hold already committed");
            return Ok(());
        }
        hold.state = HoldState::Committed;
        inventory.version += 1;

        tracing::info!(
            hold_id = %token.hold_id,
            sailing_id = %token.sailing_id,
            version = inventory.version,
            "Hold committed"
        );
        Ok(())
    }

    /// Frees a hold's places; releasing a lapsed or released hold is a no-op
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::InvalidRequest`] for a committed hold.
    pub async fn release(&self, token: &HoldToken) -> Result<ReleaseOutcome, InventoryError> {
        let record = self.record(token.sailing_id).await?;
        let mut inventory = record.lock().await;
        let now = self.clock.now();
        inventory.sweep(now);

        match inventory.holds.get(&token.hold_id).map(|hold| hold.state) {
            None => {
                tracing::debug!(hold_id = %token.hold_id, "Hold already released");
                Ok(ReleaseOutcome::AlreadyReleased)
            }
            Some(HoldState::Committed) => Err(InventoryError::InvalidRequest(format!(
                "hold {} is committed and cannot be released",
                token.hold_id
            ))),
            Some(HoldState::Held { .. }) => {
                inventory.holds.remove(&token.hold_id);
                inventory.closed.insert(token.hold_id, (Closure::Released, now));
                inventory.version += 1;
                tracing::info!(
                    hold_id = %token.hold_id,
                    sailing_id = %token.sailing_id,
                    version = inventory.version,
                    "Hold released"
                );
                Ok(ReleaseOutcome::Released)
            }
        }
    }

    /// Moves a live hold's expiry to `until`
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::HoldExpired`] if the lease already lapsed,
    /// [`InventoryError::InvalidRequest`] if `until` is not in the future or
    /// the hold is committed.
    pub async fn extend(
        &self,
        token: &HoldToken,
        until: DateTime<Utc>,
    ) -> Result<HoldToken, InventoryError> {
        let record = self.record(token.sailing_id).await?;
        let mut inventory = record.lock().await;
        let now = self.clock.now();
        inventory.sweep(now);

        if until <= now {
            return Err(InventoryError::InvalidRequest(
                "a hold can only be extended into the future".to_string(),
            ));
        }
        let Some(hold) = inventory.holds.get_mut(&token.hold_id) else {
            return Err(inventory.closed_error(token, now));
        };
        if hold.state == HoldState::Committed {
            return Err(InventoryError::InvalidRequest(format!(
                "hold {} is committed",
                token.hold_id
            )));
        }
        hold.state = HoldState::Held { expires_at: until };
        inventory.version += 1;

        tracing::debug!(hold_id = %token.hold_id, expires_at = %until, "Hold extended");
        Ok(HoldToken {
            expires_at: until,
            ..token.clone()
        })
    }

    /// Free places on a segment
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::UnknownSailing`] or
    /// [`InventoryError::InvalidSegment`].
    pub async fn availability(
        &self,
        sailing_id: SailingId,
        segment: SegmentKey,
    ) -> Result<Availability, InventoryError> {
        let record = self.record(sailing_id).await?;
        let mut inventory = record.lock().await;
        inventory.sweep(self.clock.now());

        if !segment.fits(inventory.legs) {
            return Err(InventoryError::InvalidSegment {
                segment,
                legs: inventory.legs,
            });
        }
        let free_seats = inventory.free_seats(segment);
        let free = inventory.free_places(segment);
        Ok(Availability {
            capacity: inventory.capacity,
            free: free_seats
                .as_ref()
                .map_or(free, |seats| free.min(u32::try_from(seats.len()).unwrap_or(u32::MAX))),
            free_seats,
            version: inventory.version,
        })
    }

    /// Reclaims every lapsed hold on every sailing; returns how many were reclaimed
    pub async fn sweep(&self) -> usize {
        let records: Vec<_> = self.sailings.read().await.values().cloned().collect();
        let now = self.clock.now();
        let mut reclaimed = 0;
        for record in records {
            reclaimed += record.lock().await.sweep(now);
        }
        if reclaimed > 0 {
            tracing::info!(reclaimed, "Sweep reclaimed lapsed holds");
        }
        reclaimed
    }

    /// Runs [`InventoryLedger::sweep`] every `interval` until the handle is aborted
    #[must_use]
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }
}
