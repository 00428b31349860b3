//! # Ferry Testing
//!
//! Testing utilities and helpers for the ferry booking engine.
//!
//! This crate provides:
//! - Mock implementations of Environment traits (clocks, gateway, receipt
//!   extraction, a ledger store that fails on demand)
//! - Fixtures for sailings, fares and creators
//! - Property-based testing strategies
//! - A Given-When-Then harness for reducers
//!
//! ## Example
//!
//! ```ignore
//! use ferry_testing::{fixtures, ManualClock};
//!
//! #[tokio::test]
//! async fn hold_lapses() {
//!     let clock = ManualClock::starting_at_test_epoch();
//!     let inventory = InventoryLedger::new(Arc::new(clock.clone()));
//!     inventory.register(&fixtures::capacity_sailing(10, 1)).await;
//!     // ...
//!     clock.advance(chrono::Duration::minutes(16));
//! }
//! ```

use chrono::{DateTime, Utc};
use ferry_core::environment::Clock;

pub mod reducer_test;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use ferry_core::environment::{
        BoxFuture, CommitOutcome, ExtractionError, GatewayError, GatewayInitiation,
        GatewayRequest, LedgerCommit, LedgerStore, PaymentGateway, ReceiptExtractor, StoreError,
    };
    use ferry_core::ledger::{CreditBalance, FinancialTransaction, OwnerFeeBalance};
    use ferry_core::payment::OcrExtraction;
    use ferry_core::types::{AgentId, Money, OwnerId};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
    use tokio::sync::Mutex;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use ferry_testing::mocks::FixedClock;
    /// use ferry_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }

    /// 2025-01-01 00:00:00 UTC
    #[must_use]
    pub fn test_epoch() -> DateTime<Utc> {
        DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }

    /// Clock that only moves when told to
    ///
    /// Clones share the same time, so a test can keep one handle and give
    /// another to the services under test.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        millis: Arc<AtomicI64>,
    }

    impl ManualClock {
        /// Create a clock reading `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                millis: Arc::new(AtomicI64::new(time.timestamp_millis())),
            }
        }

        /// Create a clock reading [`test_epoch`]
        #[must_use]
        pub fn starting_at_test_epoch() -> Self {
            Self::new(test_epoch())
        }

        /// Move time forward
        pub fn advance(&self, by: chrono::Duration) {
            self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
        }

        /// Jump to `time`
        pub fn set(&self, time: DateTime<Utc>) {
            self.millis.store(time.timestamp_millis(), Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
        }
    }

    /// A call the scripted gateway received
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum GatewayCall {
        /// `initiate`
        Initiate(GatewayRequest),
        /// `capture`
        Capture {
            /// Reference captured
            gateway_ref: String,
            /// Amount captured
            amount: Money,
        },
    }

    /// Payment gateway that records calls and fails on request
    #[derive(Debug, Clone, Default)]
    pub struct ScriptedGateway {
        calls: Arc<Mutex<Vec<GatewayCall>>>,
        initiate_failure: Arc<Mutex<Option<GatewayError>>>,
        capture_failure: Arc<Mutex<Option<GatewayError>>>,
        issued: Arc<AtomicU32>,
    }

    impl ScriptedGateway {
        /// Creates a gateway that accepts everything
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every following `initiate` fail with `error`
        pub async fn fail_initiate(&self, error: GatewayError) {
            *self.initiate_failure.lock().await = Some(error);
        }

        /// Make every following `capture` fail with `error`
        pub async fn fail_capture(&self, error: GatewayError) {
            *self.capture_failure.lock().await = Some(error);
        }

        /// Calls received so far
        pub async fn calls(&self) -> Vec<GatewayCall> {
            self.calls.lock().await.clone()
        }

        /// Number of `capture` calls received so far
        pub async fn capture_count(&self) -> usize {
            self.calls
                .lock()
                .await
                .iter()
                .filter(|call| matches!(call, GatewayCall::Capture { .. }))
                .count()
        }
    }

    impl PaymentGateway for ScriptedGateway {
        fn initiate(
            &self,
            request: GatewayRequest,
        ) -> BoxFuture<'_, Result<GatewayInitiation, GatewayError>> {
            Box::pin(async move {
                self.calls.lock().await.push(GatewayCall::Initiate(request));
                if let Some(error) = self.initiate_failure.lock().await.clone() {
                    return Err(error);
                }
                let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
                let gateway_ref = format!("scripted-{n}");
                Ok(GatewayInitiation {
                    redirect_url: Some(format!("https://gateway.test/pay/{gateway_ref}")),
                    gateway_ref,
                })
            })
        }

        fn capture<'a>(
            &'a self,
            gateway_ref: &'a str,
            amount: Money,
        ) -> BoxFuture<'a, Result<(), GatewayError>> {
            Box::pin(async move {
                self.calls.lock().await.push(GatewayCall::Capture {
                    gateway_ref: gateway_ref.to_string(),
                    amount,
                });
                match self.capture_failure.lock().await.clone() {
                    Some(error) => Err(error),
                    None => Ok(()),
                }
            })
        }
    }

    /// Receipt extractor returning a canned result
    #[derive(Debug, Clone)]
    pub struct StaticExtractor {
        result: Result<OcrExtraction, ExtractionError>,
    }

    impl StaticExtractor {
        /// Always returns `extraction`
        #[must_use]
        pub const fn returning(extraction: OcrExtraction) -> Self {
            Self {
                result: Ok(extraction),
            }
        }

        /// Always fails with `error`
        #[must_use]
        pub const fn failing(error: ExtractionError) -> Self {
            Self { result: Err(error) }
        }
    }

    impl ReceiptExtractor for StaticExtractor {
        fn extract(
            &self,
            _content: Arc<[u8]>,
        ) -> BoxFuture<'_, Result<OcrExtraction, ExtractionError>> {
            let result = self.result.clone();
            Box::pin(async move { result })
        }
    }

    /// Ledger store wrapper whose commits fail while armed
    ///
    /// Reads always pass through to the wrapped store.
    #[derive(Clone)]
    pub struct FlakyLedgerStore {
        inner: Arc<dyn LedgerStore>,
        failures_left: Arc<AtomicU32>,
        attempts: Arc<AtomicU32>,
    }

    impl FlakyLedgerStore {
        /// Wrap `inner`
        #[must_use]
        pub fn wrap(inner: Arc<dyn LedgerStore>) -> Self {
            Self {
                inner,
                failures_left: Arc::new(AtomicU32::new(0)),
                attempts: Arc::new(AtomicU32::new(0)),
            }
        }

        /// Fail the next `n` commits with [`StoreError::Unavailable`]
        pub fn fail_next_commits(&self, n: u32) {
            self.failures_left.store(n, Ordering::SeqCst);
        }

        /// Commits attempted so far, failed ones included
        #[must_use]
        pub fn commit_attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    impl LedgerStore for FlakyLedgerStore {
        fn commit(&self, commit: LedgerCommit) -> BoxFuture<'_, Result<CommitOutcome, StoreError>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let armed = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if armed {
                return Box::pin(async {
                    Err(StoreError::Unavailable("injected failure".to_string()))
                });
            }
            self.inner.commit(commit)
        }

        fn find<'a>(
            &'a self,
            key: &'a str,
        ) -> BoxFuture<'a, Result<Option<FinancialTransaction>, StoreError>> {
            self.inner.find(key)
        }

        fn transactions(&self) -> BoxFuture<'_, Result<Vec<FinancialTransaction>, StoreError>> {
            self.inner.transactions()
        }

        fn owner_balance(
            &self,
            owner_id: OwnerId,
        ) -> BoxFuture<'_, Result<OwnerFeeBalance, StoreError>> {
            self.inner.owner_balance(owner_id)
        }

        fn credit_balance(
            &self,
            agent_id: AgentId,
        ) -> BoxFuture<'_, Result<CreditBalance, StoreError>> {
            self.inner.credit_balance(agent_id)
        }
    }
}

/// Fixtures for sailings, fares and the people who book them
pub mod fixtures {
    use super::mocks::test_epoch;
    use chrono::Duration;
    use ferry_core::booking::{
        Booking, BookingItem, BookingStatus, Fare, FareSelection, HoldRequest, PaymentStatus,
        Sailing, SeatRequest, TaxBase, TaxKind, TaxLine, TaxProfile, TaxRounding,
    };
    use ferry_core::types::{
        AgentId, BookingId, Channel, Creator, Currency, HoldId, Money, OwnerId, Rate, Role,
        SailingId, SeatNumber, SegmentKey, TicketTypeId, UserId,
    };

    /// Fare with a 100.00 base price and no schedule modifiers
    #[must_use]
    pub fn standard_fare() -> Fare {
        Fare {
            ticket_type_id: TicketTypeId::new(),
            name: "ECO".to_string(),
            base_price: Money::from_cents(10_000),
            surcharge: Money::ZERO,
            discount: Money::ZERO,
        }
    }

    /// Capacity-mode sailing departing a day after the test epoch
    #[must_use]
    pub fn capacity_sailing(capacity: u32, legs: u16) -> Sailing {
        Sailing {
            id: SailingId::new(),
            owner_id: OwnerId::new(),
            departure: test_epoch() + Duration::days(1),
            capacity,
            legs,
            seat_layout: None,
            fares: vec![standard_fare()],
            tax_profile: None,
            currency: Currency::mvr(),
        }
    }

    /// Seat-map sailing with seats `A-1` .. `A-n`
    #[must_use]
    pub fn seat_map_sailing(seats: u32, legs: u16) -> Sailing {
        Sailing {
            seat_layout: Some((1..=seats).map(|n| SeatNumber::new(format!("A-{n}"))).collect()),
            ..capacity_sailing(seats, legs)
        }
    }

    /// 8 % GST on the fare, rounded up
    #[must_use]
    pub fn gst_profile() -> TaxProfile {
        TaxProfile {
            name: "GST 8%".to_string(),
            lines: vec![TaxLine {
                kind: TaxKind::Percent(Rate::from_percent(8)),
                applies_to: TaxBase::Fare,
                active: true,
            }],
            rounding: TaxRounding::RoundUp,
        }
    }

    /// A customer
    #[must_use]
    pub fn customer() -> Creator {
        Creator::new(Role::Customer, UserId::new())
    }

    /// An agent user
    #[must_use]
    pub fn agent_user() -> Creator {
        Creator::new(Role::Agent, UserId::new())
    }

    /// Public-channel request for `count` places on the whole route
    #[must_use]
    pub fn hold_request(sailing: &Sailing, count: u32) -> HoldRequest {
        hold_request_on(sailing, segment(0, sailing.legs), count)
    }

    /// Public-channel request for `count` places on `segment`
    #[must_use]
    pub fn hold_request_on(sailing: &Sailing, segment: SegmentKey, count: u32) -> HoldRequest {
        HoldRequest {
            creator: customer(),
            sailing_id: sailing.id,
            segment,
            seats: SeatRequest::Count(count),
            fares: sailing
                .fares
                .first()
                .map(|fare| FareSelection {
                    ticket_type_id: fare.ticket_type_id,
                    quantity: count,
                })
                .into_iter()
                .collect(),
            channel: Channel::Public,
            agent_id: None,
            ttl: None,
        }
    }

    /// Agent-channel request for `count` places on the whole route
    #[must_use]
    pub fn agent_hold_request(sailing: &Sailing, agent_id: AgentId, count: u32) -> HoldRequest {
        HoldRequest {
            creator: agent_user(),
            channel: Channel::Agent,
            agent_id: Some(agent_id),
            ..hold_request(sailing, count)
        }
    }

    /// RESERVED public booking of one passenger on `sailing` for `total`, `tax` included
    #[must_use]
    pub fn priced_booking(sailing: &Sailing, total: Money, tax: Money) -> Booking {
        let now = test_epoch();
        let ticket_type_id = sailing
            .fares
            .first()
            .map_or_else(TicketTypeId::new, |fare| fare.ticket_type_id);
        Booking {
            id: BookingId::new(),
            code: "TEST42".to_string(),
            creator: customer(),
            owner_id: sailing.owner_id,
            agent_id: None,
            sailing_id: sailing.id,
            segment: segment(0, sailing.legs),
            seat_mode: sailing.seat_mode(),
            seats: Vec::new(),
            seat_count: 1,
            items: vec![BookingItem {
                ticket_type_id,
                quantity: 1,
                unit_price: total.saturating_sub(tax),
                tax,
                total,
            }],
            subtotal: total.saturating_sub(tax),
            discount: Money::ZERO,
            tax,
            total,
            currency: sailing.currency.clone(),
            channel: Channel::Public,
            payment_method: None,
            status: BookingStatus::Reserved,
            payment_status: PaymentStatus::Pending,
            hold_id: HoldId::new(),
            hold_expires_at: now + Duration::minutes(10),
            failure_reason: None,
            created_at: now,
            updated_at: now,
            confirmed_at: None,
        }
    }

    /// Builds a segment key
    ///
    /// # Panics
    ///
    /// Panics unless `from < to`.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn segment(from: u16, to: u16) -> SegmentKey {
        SegmentKey::new(from, to).expect("fixture segments board before they alight")
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use ferry_core::types::{Money, Rate};
    use proptest::prelude::*;

    /// Amounts up to one million major units
    pub fn money() -> impl Strategy<Value = Money> {
        (0u64..=100_000_000).prop_map(Money::from_cents)
    }

    /// Non-zero amounts up to one million major units
    pub fn positive_money() -> impl Strategy<Value = Money> {
        (1u64..=100_000_000).prop_map(Money::from_cents)
    }

    /// Rates from 0 % to 100 %
    pub fn rate() -> impl Strategy<Value = Rate> {
        (0u32..=10_000).prop_map(Rate::from_bps)
    }
}

/// Installs a `tracing` subscriber honouring `RUST_LOG`, once per process
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{
    FixedClock, FlakyLedgerStore, ManualClock, ScriptedGateway, StaticExtractor, test_clock,
    test_epoch,
};
pub use reducer_test::ReducerTest;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn test_manual_clock_advances_shared_time() {
        let clock = ManualClock::starting_at_test_epoch();
        let handle = clock.clone();
        handle.advance(chrono::Duration::minutes(15));
        assert_eq!(clock.now(), test_epoch() + chrono::Duration::minutes(15));
    }

    #[tokio::test]
    async fn test_scripted_gateway_records_calls() {
        use ferry_core::environment::{GatewayRequest, PaymentGateway};
        use ferry_core::types::{BookingId, Currency, Money};

        let gateway = ScriptedGateway::new();
        let initiation = gateway
            .initiate(GatewayRequest {
                booking_id: BookingId::new(),
                amount: Money::from_cents(500),
                currency: Currency::mvr(),
                description: "test".to_string(),
            })
            .await;
        assert!(initiation.is_ok());
        assert!(gateway.capture("scripted-1", Money::from_cents(500)).await.is_ok());
        assert_eq!(gateway.capture_count().await, 1);
    }
}
