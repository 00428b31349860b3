//! Booking service: the caller-facing surface of the engine.
//!
//! Every operation locks one booking, runs the [`BookingReducer`] on a draft
//! copy, carries out the returned effects and stores the draft only when all
//! of them succeeded. A refused or failed operation leaves the stored booking
//! as it was.
//!
//! Payment is the one exception: once money is received the booking is stored
//! as RESERVED/PAID before settlement (posting, inventory commit, tickets)
//! runs, so a settlement that fails half-way can be replayed instead of losing
//! the payment.
//!
//! # Expiry
//!
//! Any access to an unpaid HOLDING or RESERVED booking past its hold expiry
//! expires it, releasing its inventory, before anything else happens.

pub mod pending;
pub mod reducer;

use crate::accounting::{AccountingEngine, InMemoryLedgerStore};
use crate::commission::CommissionResolver;
use crate::config::EngineConfig;
use crate::inventory::{Availability, HoldToken, InventoryLedger, ReleaseOutcome};
use crate::metrics;
use crate::payment::{
    InMemoryAttachmentStore, PaymentInitiation, PaymentOrchestrator, PaymentOutcome,
    SandboxGateway, TextReceiptExtractor,
};
use crate::pricing;
use crate::retry::{RetryPolicy, retry_with_predicate};
use crate::tickets::{TicketIssuer, TokenError};
use ferry_core::booking::{
    Booking, BookingStatus, HoldRequest, PaymentMethod, PaymentStatus, Sailing,
};
use ferry_core::environment::{
    AttachmentStore, Clock, LedgerStore, PaymentGateway, ReceiptExtractor, SystemClock,
};
use ferry_core::error::{EngineError, EngineResult};
use ferry_core::ledger::FinancialTransaction;
use ferry_core::payment::{GatewayEvent, PaymentReceipt, ReceiptStatus};
use ferry_core::reducer::Reducer;
use ferry_core::ticket::{Ticket, TokenPayload};
use ferry_core::types::{BookingId, Channel, SailingId, SegmentKey};
use ferry_core::SmallVec;
use pending::PendingConfirmationQueue;
use rand::Rng;
use reducer::{BookingAction, BookingEffect, BookingEnvironment, BookingReducer};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 6;

/// Six characters from an alphabet without look-alikes (no I, L, O, 0, 1)
fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LENGTH)
        .map(|_| char::from(CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())]))
        .collect()
}

struct BookingRecord {
    booking: Booking,
    hold: HoldToken,
}

/// Result of choosing a payment method
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentSelection {
    /// The booking after selection
    pub booking: Booking,
    /// What the customer must do next
    pub initiation: PaymentInitiation,
}

/// Outcome of a replay pass over the pending-confirmation queue
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Bookings confirmed by this pass
    pub resolved: usize,
    /// Bookings that still could not be confirmed
    pub still_pending: usize,
    /// Bookings that can no longer be confirmed
    pub discarded: usize,
}

/// Builder for [`BookingService`]
///
/// Every collaborator has an in-process default: system clock, sandbox
/// gateway, text receipt extractor, in-memory attachment and ledger stores.
#[derive(Default)]
pub struct BookingServiceBuilder {
    config: EngineConfig,
    clock: Option<Arc<dyn Clock>>,
    gateway: Option<Arc<dyn PaymentGateway>>,
    extractor: Option<Arc<dyn ReceiptExtractor>>,
    attachments: Option<Arc<dyn AttachmentStore>>,
    ledger_store: Option<Arc<dyn LedgerStore>>,
}

impl BookingServiceBuilder {
    /// Starts from `config`
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Time source
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Card gateway
    #[must_use]
    pub fn gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Receipt extractor
    #[must_use]
    pub fn extractor(mut self, extractor: Arc<dyn ReceiptExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Attachment store
    #[must_use]
    pub fn attachments(mut self, attachments: Arc<dyn AttachmentStore>) -> Self {
        self.attachments = Some(attachments);
        self
    }

    /// Ledger store
    #[must_use]
    pub fn ledger_store(mut self, store: Arc<dyn LedgerStore>) -> Self {
        self.ledger_store = Some(store);
        self
    }

    /// Wires the engine's components
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] if the default receipt extractor
    /// cannot be built.
    pub fn build(self) -> EngineResult<BookingService> {
        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let extractor: Arc<dyn ReceiptExtractor> = match self.extractor {
            Some(extractor) => extractor,
            None => Arc::new(
                TextReceiptExtractor::new()
                    .map_err(|err| EngineError::Validation(err.to_string()))?,
            ),
        };
        let gateway = self.gateway.unwrap_or_else(SandboxGateway::shared);
        let attachments = self
            .attachments
            .unwrap_or_else(|| Arc::new(InMemoryAttachmentStore::new()));
        let store = self
            .ledger_store
            .unwrap_or_else(|| Arc::new(InMemoryLedgerStore::new()));

        let resolver = Arc::new(CommissionResolver::new(config.commission, Arc::clone(&clock)));
        let accounting = Arc::new(AccountingEngine::new(
            store,
            resolver,
            config.fees,
            Arc::clone(&clock),
        ));
        let payments = Arc::new(PaymentOrchestrator::new(
            gateway,
            extractor,
            attachments,
            config.payment.clone(),
            Arc::clone(&clock),
        ));

        tracing::info!(
            hold_ttl_secs = config.inventory.hold_ttl.as_secs(),
            max_retries = config.retry.max_retries,
            "Booking service built"
        );
        Ok(BookingService {
            inventory: Arc::new(InventoryLedger::new(Arc::clone(&clock))),
            accounting,
            payments,
            tickets: Arc::new(TicketIssuer::new(&config.tickets, Arc::clone(&clock))),
            pending: Arc::new(PendingConfirmationQueue::new(Arc::clone(&clock))),
            reducer: BookingReducer::new(),
            env: BookingEnvironment::new(Arc::clone(&clock)),
            retry: config.retry.policy(),
            clock,
            config,
            sailings: RwLock::new(HashMap::new()),
            bookings: RwLock::new(HashMap::new()),
            codes: Mutex::new(HashSet::new()),
        })
    }
}

/// Books seats, takes payments and settles them
pub struct BookingService {
    inventory: Arc<InventoryLedger>,
    accounting: Arc<AccountingEngine>,
    payments: Arc<PaymentOrchestrator>,
    tickets: Arc<TicketIssuer>,
    pending: Arc<PendingConfirmationQueue>,
    reducer: BookingReducer,
    env: BookingEnvironment,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    sailings: RwLock<HashMap<SailingId, Sailing>>,
    bookings: RwLock<HashMap<BookingId, Arc<Mutex<BookingRecord>>>>,
    codes: Mutex<HashSet<String>>,
}

impl BookingService {
    /// Builder with every collaborator defaulted
    #[must_use]
    pub fn builder(config: EngineConfig) -> BookingServiceBuilder {
        BookingServiceBuilder::new(config)
    }

    // ========================================================================
    // Sailings and holds
    // ========================================================================

    /// Makes a sailing bookable
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] if the sailing's layout is invalid.
    pub async fn register_sailing(&self, sailing: Sailing) -> EngineResult<()> {
        self.inventory.register(&sailing).await?;
        tracing::info!(sailing_id = %sailing.id, capacity = sailing.capacity, legs = sailing.legs, "Sailing registered");
        self.sailings.write().await.insert(sailing.id, sailing);
        Ok(())
    }

    /// Free places on a segment of a sailing
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown sailing and
    /// [`EngineError::Validation`] for a segment off the route.
    pub async fn availability(&self, sailing_id: SailingId, segment: SegmentKey) -> EngineResult<Availability> {
        Ok(self.inventory.availability(sailing_id, segment).await?)
    }

    /// Prices the request, holds the inventory and creates a HOLDING booking
    ///
    /// # Errors
    ///
    /// - [`EngineError::CapacityExhausted`] or [`EngineError::SeatConflict`]
    ///   if the inventory cannot be held
    /// - [`EngineError::NotFound`] for an unknown sailing
    /// - [`EngineError::Validation`] for inconsistent requests
    pub async fn create_hold(&self, request: HoldRequest) -> EngineResult<Booking> {
        let sailing = self
            .sailings
            .read()
            .await
            .get(&request.sailing_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("Sailing", request.sailing_id))?;

        validate_request(&request)?;
        let quote = pricing::quote(
            &sailing,
            &request.fares,
            request.channel,
            self.config.pricing.owner_channel_discount,
        )?;

        let ttl = request.ttl.unwrap_or(self.config.inventory.hold_ttl);
        let hold = self
            .inventory
            .hold(sailing.id, request.segment, &request.seats, ttl)
            .await?;

        let now = self.clock.now();
        let booking = Booking {
            id: BookingId::new(),
            code: self.unique_code().await,
            creator: request.creator,
            owner_id: sailing.owner_id,
            agent_id: request.agent_id,
            sailing_id: sailing.id,
            segment: request.segment,
            seat_mode: sailing.seat_mode(),
            seats: hold.seats.clone(),
            seat_count: hold.count,
            items: quote.items,
            subtotal: quote.subtotal,
            discount: quote.discount,
            tax: quote.tax,
            total: quote.total,
            currency: quote.currency,
            channel: request.channel,
            payment_method: None,
            status: BookingStatus::Holding,
            payment_status: PaymentStatus::Unpaid,
            hold_id: hold.hold_id,
            hold_expires_at: hold.expires_at,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            confirmed_at: None,
        };

        tracing::info!(
            booking_id = %booking.id,
            code = %booking.code,
            sailing_id = %booking.sailing_id,
            segment = %booking.segment,
            passengers = booking.seat_count,
            total = %booking.total,
            expires_at = %booking.hold_expires_at,
            "Booking created"
        );
        metrics::record_booking(BookingStatus::Holding.as_str());
        self.bookings.write().await.insert(
            booking.id,
            Arc::new(Mutex::new(BookingRecord {
                booking: booking.clone(),
                hold,
            })),
        );
        Ok(booking)
    }

    async fn unique_code(&self) -> String {
        let mut codes = self.codes.lock().await;
        loop {
            let code = generate_code();
            if codes.insert(code.clone()) {
                return code;
            }
        }
    }

    // ========================================================================
    // Payment
    // ========================================================================

    /// Chooses how a booking will be paid and starts that payment flow
    ///
    /// Cash and bank transfer extend the hold to their payment window; card
    /// returns the gateway redirect. Leaving card, or starting a fresh card
    /// attempt, abandons the unfinished one.
    ///
    /// # Errors
    ///
    /// - [`EngineError::HoldExpired`] if the hold lapsed
    /// - [`EngineError::InvalidTransition`] if the booking is paid or final
    /// - [`EngineError::Validation`] for credit on a booking without an agent
    /// - [`EngineError::Gateway`] if the card gateway fails
    pub async fn select_payment_method(
        &self,
        booking_id: BookingId,
        method: PaymentMethod,
    ) -> EngineResult<PaymentSelection> {
        let record = self.record(booking_id).await?;
        let mut record = record.lock().await;
        self.ensure_live(&mut record).await?;

        if method == PaymentMethod::Credit && record.booking.agent_id.is_none() {
            return Err(EngineError::Validation(
                "only agent bookings can be paid by credit".to_string(),
            ));
        }
        // Refuse before touching the gateway
        let mut trial = record.booking.clone();
        self.reducer.reduce(
            &mut trial,
            BookingAction::SelectPaymentMethod { method, hold_until: None },
            &self.env,
        )?;

        if record.booking.payment_method == Some(PaymentMethod::Card) {
            self.payments.abandon(booking_id, "payment method changed").await;
        }
        let initiation = self.payments.initiate(&record.booking, method).await?;
        let hold_until = match &initiation {
            PaymentInitiation::Pending { hold_until } => *hold_until,
            PaymentInitiation::RequiresAction { .. } => None,
        };

        self.transition(&mut record, BookingAction::SelectPaymentMethod { method, hold_until })
            .await?;
        Ok(PaymentSelection {
            booking: record.booking.clone(),
            initiation,
        })
    }

    /// Attaches a bank-transfer receipt; a clean receipt confirms the booking
    ///
    /// # Errors
    ///
    /// - [`EngineError::HoldExpired`] if the transfer window lapsed
    /// - [`EngineError::Validation`] if the booking is not awaiting a transfer
    /// - settlement errors when the receipt is auto-verified, see
    ///   [`BookingService::confirm_booking`]
    pub async fn upload_receipt(
        &self,
        booking_id: BookingId,
        content: Arc<[u8]>,
    ) -> EngineResult<PaymentReceipt> {
        let record = self.record(booking_id).await?;
        let mut record = record.lock().await;
        self.ensure_live(&mut record).await?;
        expect_method(&record.booking, PaymentMethod::BankTransfer)?;

        let receipt = self.payments.upload_receipt(&record.booking, content).await?;
        if receipt.status == ReceiptStatus::Verified {
            self.settle(&mut record).await?;
        }
        Ok(receipt)
    }

    /// Accepts a flagged bank-transfer receipt after manual review
    ///
    /// # Errors
    ///
    /// See [`BookingService::confirm_booking`]; also
    /// [`EngineError::VerificationRejected`] for a rejected receipt.
    pub async fn verify_receipt(&self, booking_id: BookingId) -> EngineResult<Booking> {
        let record = self.record(booking_id).await?;
        let mut record = record.lock().await;
        self.ensure_live(&mut record).await?;
        expect_method(&record.booking, PaymentMethod::BankTransfer)?;

        self.payments.verify_receipt(booking_id).await?;
        self.settle(&mut record).await
    }

    /// Rejects a bank-transfer receipt; the booking is cancelled and its seats released
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] if the receipt was already decided.
    pub async fn reject_receipt(&self, booking_id: BookingId, reason: &str) -> EngineResult<Booking> {
        let record = self.record(booking_id).await?;
        let mut record = record.lock().await;
        self.ensure_live(&mut record).await?;
        expect_method(&record.booking, PaymentMethod::BankTransfer)?;

        self.payments.reject_receipt(booking_id, reason).await?;
        self.transition(
            &mut record,
            BookingAction::PaymentFailed {
                reason: format!("receipt rejected: {reason}"),
            },
        )
        .await?;
        Ok(record.booking.clone())
    }

    /// Records cash taken at the counter and confirms the booking
    ///
    /// # Errors
    ///
    /// See [`BookingService::confirm_booking`].
    pub async fn mark_cash_paid(&self, booking_id: BookingId) -> EngineResult<Booking> {
        let record = self.record(booking_id).await?;
        let mut record = record.lock().await;
        self.ensure_live(&mut record).await?;
        expect_method(&record.booking, PaymentMethod::Cash)?;

        self.payments.verify_receipt(booking_id).await?;
        self.settle(&mut record).await
    }

    /// Pays an agent booking from the agent's prepaid credit and confirms it
    ///
    /// The credit debit and the revenue posting are one ledger commit. When
    /// the credit does not cover the total nothing changes.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InsufficientCredit`] if the credit does not cover the total
    /// - [`EngineError::Validation`] for a booking without an agent
    /// - see [`BookingService::confirm_booking`]
    pub async fn use_credit(&self, booking_id: BookingId) -> EngineResult<Booking> {
        let record = self.record(booking_id).await?;
        let mut record = record.lock().await;
        self.ensure_live(&mut record).await?;

        let mut draft = record.booking.clone();
        if draft.status == BookingStatus::Holding {
            self.reducer.reduce(
                &mut draft,
                BookingAction::SelectPaymentMethod {
                    method: PaymentMethod::Credit,
                    hold_until: None,
                },
                &self.env,
            )?;
        }
        expect_method(&draft, PaymentMethod::Credit)?;
        let effects = self
            .reducer
            .reduce(&mut draft, BookingAction::PaymentSucceeded, &self.env)?;

        let posting = self.accounting.post_revenue_with_credit(&draft).await?;
        tracing::info!(
            booking_id = %booking_id,
            transaction_id = %posting.id,
            amount = %draft.total,
            "Agent credit debited"
        );
        record.booking = draft;
        self.run_settlement(&mut record, effects).await
    }

    /// Applies a signed card-gateway webhook
    ///
    /// Returns the booking as the event left it.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidSignature`] for a bad signature
    /// - [`EngineError::DuplicateEvent`] for a redelivered or stale event
    /// - [`EngineError::NotFound`] for an unknown gateway reference
    /// - [`EngineError::HoldExpired`] if money was captured after the hold lapsed
    /// - see [`BookingService::confirm_booking`]
    pub async fn handle_gateway_event(&self, event: &GatewayEvent) -> EngineResult<Booking> {
        match self.payments.on_gateway_event(event).await? {
            PaymentOutcome::Authorized { booking_id } => self.get_booking_status(booking_id).await,
            PaymentOutcome::Succeeded { booking_id } => {
                let record = self.record(booking_id).await?;
                let mut record = record.lock().await;
                if record.booking.status.is_terminal() && record.booking.payment_status != PaymentStatus::Paid {
                    return self.captured_too_late(&mut record).await;
                }
                self.settle(&mut record).await
            }
            PaymentOutcome::Failed { booking_id, reason } => {
                let record = self.record(booking_id).await?;
                let mut record = record.lock().await;
                if record.booking.status == BookingStatus::Reserved
                    && record.booking.payment_status != PaymentStatus::Paid
                {
                    self.transition(&mut record, BookingAction::PaymentFailed { reason })
                        .await?;
                } else {
                    tracing::info!(booking_id = %booking_id, status = %record.booking.status, "Payment failure for a settled booking ignored");
                }
                Ok(record.booking.clone())
            }
            PaymentOutcome::Superseded { booking_id, .. } => self.get_booking_status(booking_id).await,
        }
    }

    async fn captured_too_late(&self, record: &mut BookingRecord) -> EngineResult<Booking> {
        self.transition(record, BookingAction::PaymentCapturedAfterClose).await?;
        tracing::error!(
            booking_id = %record.booking.id,
            status = %record.booking.status,
            amount = %record.booking.total,
            "ALERT: card payment captured for a booking that can no longer be honoured, refund due"
        );
        metrics::record_alert("refund_due");
        Err(EngineError::HoldExpired)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Completes settlement of a paid booking; confirming twice returns the booking
    ///
    /// Settlement posts revenue, commits the inventory and issues tickets, in
    /// that order. Each step is idempotent, so a booking left RESERVED/PAID
    /// by an earlier failure can be confirmed again.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidTransition`] if the booking is not paid
    /// - [`EngineError::ConfirmationPending`] if posting kept failing; the
    ///   booking is parked for [`BookingService::retry_pending_confirmations`]
    /// - [`EngineError::HoldExpired`] if the hold lapsed before the commit; the
    ///   posting is reversed and the payment is marked REFUND_DUE
    pub async fn confirm_booking(&self, booking_id: BookingId) -> EngineResult<Booking> {
        let record = self.record(booking_id).await?;
        let mut record = record.lock().await;
        match (record.booking.status, record.booking.payment_status) {
            (BookingStatus::Confirmed, _) => Ok(record.booking.clone()),
            (BookingStatus::Reserved, PaymentStatus::Paid) => {
                self.run_settlement(&mut record, BookingReducer::settlement_effects())
                    .await
            }
            (from, _) => Err(EngineError::InvalidTransition {
                from,
                action: "confirm",
            }),
        }
    }

    /// Cancels an unpaid booking and releases its inventory
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidTransition`] for paid or final bookings.
    pub async fn cancel_booking(&self, booking_id: BookingId, reason: &str) -> EngineResult<Booking> {
        let record = self.record(booking_id).await?;
        let mut record = record.lock().await;
        self.expire_if_lapsed(&mut record).await?;
        self.transition(
            &mut record,
            BookingAction::Cancel {
                reason: reason.to_string(),
            },
        )
        .await?;
        Ok(record.booking.clone())
    }

    /// Current state of a booking, expiring it first if its hold lapsed
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown booking.
    pub async fn get_booking_status(&self, booking_id: BookingId) -> EngineResult<Booking> {
        let record = self.record(booking_id).await?;
        let mut record = record.lock().await;
        self.expire_if_lapsed(&mut record).await?;
        Ok(record.booking.clone())
    }

    /// Expires every lapsed unpaid booking; returns how many expired
    pub async fn expire_overdue(&self) -> usize {
        let records: Vec<_> = self.bookings.read().await.values().cloned().collect();
        let mut expired = 0;
        for record in records {
            let mut record = record.lock().await;
            match self.expire_if_lapsed(&mut record).await {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(booking_id = %record.booking.id, error = %err, "Could not expire booking");
                }
            }
        }
        if expired > 0 {
            tracing::info!(expired, "Overdue bookings expired");
        }
        expired
    }

    /// Replays up to `limit` parked confirmations
    pub async fn retry_pending_confirmations(&self, limit: usize) -> ReplaySummary {
        let mut summary = ReplaySummary::default();
        for entry in self.pending.list_pending(limit).await {
            if !self.pending.mark_processing(entry.id).await {
                continue;
            }
            match self.confirm_booking(entry.booking_id).await {
                Ok(booking) => {
                    self.pending
                        .mark_resolved(booking.id, "confirmed on replay")
                        .await;
                    summary.resolved += 1;
                }
                Err(EngineError::ConfirmationPending { .. }) => summary.still_pending += 1,
                Err(err) if err.is_retryable() => {
                    self.pending.add_entry(entry.booking_id, &err.to_string(), 1).await;
                    summary.still_pending += 1;
                }
                Err(err) => {
                    self.pending
                        .mark_discarded(entry.booking_id, &err.to_string())
                        .await;
                    summary.discarded += 1;
                }
            }
        }
        tracing::info!(
            resolved = summary.resolved,
            still_pending = summary.still_pending,
            discarded = summary.discarded,
            "Pending confirmations replayed"
        );
        summary
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Tickets of a booking
    pub async fn tickets(&self, booking_id: BookingId) -> Vec<Ticket> {
        self.tickets.tickets(booking_id).await
    }

    /// Validates a boarding token
    ///
    /// # Errors
    ///
    /// Returns the [`TokenError`] describing why the token is invalid.
    pub fn validate_ticket(&self, token: &str) -> Result<TokenPayload, TokenError> {
        self.tickets.validate(token)
    }

    /// Revenue posting of a booking, if any
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the ledger store fails.
    pub async fn revenue_posting(&self, booking_id: BookingId) -> EngineResult<Option<FinancialTransaction>> {
        self.accounting.transaction_for_booking(booking_id).await
    }

    /// Inventory ledger
    #[must_use]
    pub const fn inventory(&self) -> &Arc<InventoryLedger> {
        &self.inventory
    }

    /// Accounting engine
    #[must_use]
    pub const fn accounting(&self) -> &Arc<AccountingEngine> {
        &self.accounting
    }

    /// Commission rules
    #[must_use]
    pub fn commission(&self) -> &Arc<CommissionResolver> {
        self.accounting.resolver()
    }

    /// Payment orchestrator
    #[must_use]
    pub const fn payments(&self) -> &Arc<PaymentOrchestrator> {
        &self.payments
    }

    /// Ticket issuer
    #[must_use]
    pub const fn ticket_issuer(&self) -> &Arc<TicketIssuer> {
        &self.tickets
    }

    /// Pending-confirmation queue
    #[must_use]
    pub const fn pending_confirmations(&self) -> &Arc<PendingConfirmationQueue> {
        &self.pending
    }

    /// Configuration in use
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn record(&self, booking_id: BookingId) -> EngineResult<Arc<Mutex<BookingRecord>>> {
        self.bookings
            .read()
            .await
            .get(&booking_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("Booking", booking_id))
    }

    /// Expires an unpaid booking whose hold lapsed; `true` if it expired now
    async fn expire_if_lapsed(&self, record: &mut BookingRecord) -> EngineResult<bool> {
        let booking = &record.booking;
        if !booking.is_lapsed_at(self.clock.now()) || booking.payment_status == PaymentStatus::Paid {
            return Ok(false);
        }
        self.transition(record, BookingAction::Expire).await?;
        Ok(true)
    }

    /// Expires a lapsed booking and refuses to go on with it
    async fn ensure_live(&self, record: &mut BookingRecord) -> EngineResult<()> {
        if self.expire_if_lapsed(record).await? {
            return Err(EngineError::HoldExpired);
        }
        Ok(())
    }

    /// Runs one action on a draft and stores it once every effect succeeded
    async fn transition(&self, record: &mut BookingRecord, action: BookingAction) -> EngineResult<()> {
        let mut draft = record.booking.clone();
        let effects = self.reducer.reduce(&mut draft, action, &self.env)?;

        let mut hold = record.hold.clone();
        for effect in effects {
            self.execute(&draft, &mut hold, effect).await?;
        }

        if draft.status != record.booking.status {
            tracing::info!(
                booking_id = %draft.id,
                from = %record.booking.status,
                to = %draft.status,
                payment_status = ?draft.payment_status,
                "Booking transitioned"
            );
            metrics::record_booking(draft.status.as_str());
        }
        record.booking = draft;
        record.hold = hold;
        Ok(())
    }

    /// Records the payment and settles the booking
    async fn settle(&self, record: &mut BookingRecord) -> EngineResult<Booking> {
        if record.booking.payment_status == PaymentStatus::Paid {
            return self
                .run_settlement(record, BookingReducer::settlement_effects())
                .await;
        }
        let mut draft = record.booking.clone();
        let effects = self
            .reducer
            .reduce(&mut draft, BookingAction::PaymentSucceeded, &self.env)?;
        tracing::info!(
            booking_id = %draft.id,
            method = ?draft.payment_method,
            amount = %draft.total,
            "Payment received"
        );
        record.booking = draft;
        self.run_settlement(record, effects).await
    }

    async fn run_settlement(
        &self,
        record: &mut BookingRecord,
        effects: SmallVec<[BookingEffect; 4]>,
    ) -> EngineResult<Booking> {
        let booking = record.booking.clone();
        let mut hold = record.hold.clone();
        for effect in effects {
            match self.execute(&booking, &mut hold, effect).await {
                Ok(()) => {}
                Err(EngineError::HoldExpired) => return self.lapse_after_payment(record).await,
                Err(err) => return Err(err),
            }
        }
        record.hold = hold;

        self.transition(record, BookingAction::Confirm).await?;
        self.pending.mark_resolved(booking.id, "confirmed").await;
        Ok(record.booking.clone())
    }

    async fn lapse_after_payment(&self, record: &mut BookingRecord) -> EngineResult<Booking> {
        self.transition(record, BookingAction::Expire).await?;
        self.pending
            .mark_discarded(record.booking.id, "hold lapsed after payment, refund due")
            .await;
        tracing::error!(
            booking_id = %record.booking.id,
            amount = %record.booking.total,
            "ALERT: hold lapsed after payment, revenue reversed and refund due"
        );
        metrics::record_alert("refund_due");
        Err(EngineError::HoldExpired)
    }

    async fn execute(&self, booking: &Booking, hold: &mut HoldToken, effect: BookingEffect) -> EngineResult<()> {
        match effect {
            BookingEffect::ExtendHold { until } => {
                *hold = self.inventory.extend(hold, until).await?;
            }
            BookingEffect::PostRevenue => {
                self.post_revenue(booking).await?;
            }
            BookingEffect::CommitInventory => self.inventory.commit(hold).await?,
            BookingEffect::IssueTickets => {
                self.tickets.issue(booking).await?;
            }
            BookingEffect::ReverseRevenue => match self.accounting.reverse(booking.id).await {
                Ok(_) | Err(EngineError::NotFound { .. }) => {}
                Err(err) => return Err(err),
            },
            BookingEffect::ReleaseInventory => {
                if self.inventory.release(hold).await? == ReleaseOutcome::AlreadyReleased {
                    tracing::debug!(booking_id = %booking.id, "Inventory was already released");
                }
            }
            BookingEffect::AbandonPayment => {
                self.payments.abandon(booking.id, "booking closed").await;
            }
        }
        Ok(())
    }

    /// Posts with backoff; parks the booking once retries run out
    async fn post_revenue(&self, booking: &Booking) -> EngineResult<FinancialTransaction> {
        let result = retry_with_predicate(
            &self.retry,
            || self.accounting.post_revenue(booking),
            EngineError::is_retryable,
        )
        .await;

        match result {
            Err(err) if err.is_retryable() => {
                self.pending
                    .add_entry(booking.id, &err.to_string(), self.retry.attempts())
                    .await;
                Err(EngineError::ConfirmationPending {
                    booking_id: booking.id,
                })
            }
            other => other,
        }
    }
}

fn validate_request(request: &HoldRequest) -> EngineResult<()> {
    let passengers = request.seats.passenger_count();
    if passengers == 0 {
        return Err(EngineError::Validation(
            "a booking needs at least one passenger".to_string(),
        ));
    }
    let priced = request
        .fares
        .iter()
        .try_fold(0u32, |sum, fare| sum.checked_add(fare.quantity));
    if priced != Some(passengers) {
        return Err(EngineError::Validation(format!(
            "fare quantities must add up to {passengers} passengers"
        )));
    }
    match (request.channel, request.agent_id) {
        (Channel::Agent, None) => Err(EngineError::Validation(
            "agent bookings need an agent".to_string(),
        )),
        (Channel::Public | Channel::Owner, Some(_)) => Err(EngineError::Validation(
            "only agent bookings carry an agent".to_string(),
        )),
        _ => Ok(()),
    }
}

fn expect_method(booking: &Booking, method: PaymentMethod) -> EngineResult<()> {
    if booking.payment_method == Some(method) {
        return Ok(());
    }
    Err(EngineError::Validation(format!(
        "booking {} is not paid by {method}",
        booking.code
    )))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ferry_testing::fixtures::{capacity_sailing, hold_request};

    #[test]
    fn test_codes_avoid_look_alikes() {
        for _ in 0..200 {
            let code = generate_code();
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code.bytes().all(|c| CODE_ALPHABET.contains(&c)));
            assert!(!code.contains(['I', 'L', 'O', '0', '1']));
        }
    }

    #[test]
    fn test_fare_quantities_must_match_passengers() {
        let sailing = capacity_sailing(10, 1);
        let mut request = hold_request(&sailing, 2);
        assert!(validate_request(&request).is_ok());

        request.fares[0].quantity = 3;
        assert!(matches!(validate_request(&request), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_agent_channel_requires_agent() {
        let sailing = capacity_sailing(10, 1);
        let request = HoldRequest {
            channel: Channel::Agent,
            ..hold_request(&sailing, 1)
        };
        assert!(matches!(validate_request(&request), Err(EngineError::Validation(_))));
    }
}
