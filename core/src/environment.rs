//! Environment traits for dependency injection.
//!
//! Services receive their collaborators through these traits so that tests can
//! swap in deterministic implementations (fixed clocks, scripted gateways,
//! failing stores) without touching the services themselves.

use crate::ledger::{CreditBalance, FinancialTransaction, OwnerFeeBalance};
use crate::payment::OcrExtraction;
use crate::types::{AgentId, BookingId, Currency, Money, OwnerId, ReceiptId};
use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Boxed, sendable future returned by environment traits
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ============================================================================
// Clock
// ============================================================================

/// Clock trait - abstracts time operations for testability
///
/// # Examples
///
/// ```ignore
/// // Production - uses system clock
/// let clock: Arc<dyn Clock> = Arc::new(SystemClock);
///
/// // Test - fixed time for deterministic tests
/// let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ============================================================================
// Payment gateway
// ============================================================================

/// Payment gateway error
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The gateway refused the payment
    #[error("Declined: {reason}")]
    Declined {
        /// Decline reason
        reason: String,
    },
    /// The gateway did not answer in time
    #[error("Gateway timeout")]
    Timeout,
    /// The gateway could not be reached
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),
    /// The gateway does not know the reference
    #[error("Unknown gateway reference: {0}")]
    UnknownReference(String),
}

impl GatewayError {
    /// Whether the call may succeed if repeated
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable(_))
    }
}

/// Request to start a card payment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayRequest {
    /// Booking being paid
    pub booking_id: BookingId,
    /// Amount to charge
    pub amount: Money,
    /// Currency
    pub currency: Currency,
    /// Text shown on the gateway page
    pub description: String,
}

/// What the gateway returned for a new payment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayInitiation {
    /// Gateway's reference for the attempt
    pub gateway_ref: String,
    /// Page the customer must visit, if any
    pub redirect_url: Option<String>,
}

/// Payment gateway trait
///
/// Abstraction over the card processor. Outcomes arrive asynchronously as
/// signed webhook events, so `initiate` only starts the attempt.
pub trait PaymentGateway: Send + Sync {
    /// Start a payment attempt
    ///
    /// # Errors
    ///
    /// Returns error if the gateway refuses or cannot be reached
    fn initiate(&self, request: GatewayRequest) -> BoxFuture<'_, Result<GatewayInitiation, GatewayError>>;

    /// Capture previously authorized funds
    ///
    /// # Errors
    ///
    /// Returns error if the capture fails
    fn capture<'a>(&'a self, gateway_ref: &'a str, amount: Money) -> BoxFuture<'a, Result<(), GatewayError>>;
}

// ============================================================================
// Receipts
// ============================================================================

/// Receipt extraction error
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    /// Nothing usable could be read
    #[error("Unreadable receipt: {0}")]
    Unreadable(String),
    /// The extraction service failed
    #[error("Extraction unavailable: {0}")]
    Unavailable(String),
}

/// Reads payment details off an uploaded receipt
pub trait ReceiptExtractor: Send + Sync {
    /// Extract fields from the receipt content
    ///
    /// # Errors
    ///
    /// Returns error if the content cannot be processed
    fn extract(&self, content: Arc<[u8]>) -> BoxFuture<'_, Result<OcrExtraction, ExtractionError>>;
}

/// Durable storage for receipt attachments
pub trait AttachmentStore: Send + Sync {
    /// Store the content and return its path
    ///
    /// # Errors
    ///
    /// Returns error if the content cannot be stored
    fn put(&self, receipt_id: ReceiptId, content: Arc<[u8]>) -> BoxFuture<'_, Result<String, StoreError>>;
}

// ============================================================================
// Ledger store
// ============================================================================

/// Errors raised by stores
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    /// A balance adjustment would go below zero
    #[error("Insufficient balance on {balance}: available {available}, requested {requested}")]
    InsufficientBalance {
        /// Balance that would go negative
        balance: BalanceField,
        /// Amount on the balance
        available: Money,
        /// Amount requested
        requested: Money,
    },
    /// Stored data violates an invariant
    #[error("Store corrupted: {0}")]
    Corrupted(String),
}

impl StoreError {
    /// Whether the operation may succeed if repeated
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// A running balance the ledger store maintains
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BalanceField {
    /// Platform commission accrued against an operator
    OwnerFeesAccrued(OwnerId),
    /// Net revenue payable to an operator
    OwnerNetPayable(OwnerId),
    /// Agent prepaid credit
    AgentCredit(AgentId),
    /// Agent commission earned
    AgentCommission(AgentId),
}

impl fmt::Display for BalanceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OwnerFeesAccrued(id) => write!(f, "owner {id} fees accrued"),
            Self::OwnerNetPayable(id) => write!(f, "owner {id} net payable"),
            Self::AgentCredit(id) => write!(f, "agent {id} credit"),
            Self::AgentCommission(id) => write!(f, "agent {id} commission"),
        }
    }
}

/// Direction and size of a balance change
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Adjustment {
    /// Add to the balance
    Increase(Money),
    /// Take from the balance; fails rather than going negative
    Decrease(Money),
}

/// One running-balance change committed with a transaction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BalanceAdjustment {
    /// Balance changed
    pub field: BalanceField,
    /// Change
    pub adjustment: Adjustment,
}

impl BalanceAdjustment {
    /// An increase
    #[must_use]
    pub const fn increase(field: BalanceField, amount: Money) -> Self {
        Self {
            field,
            adjustment: Adjustment::Increase(amount),
        }
    }

    /// A decrease
    #[must_use]
    pub const fn decrease(field: BalanceField, amount: Money) -> Self {
        Self {
            field,
            adjustment: Adjustment::Decrease(amount),
        }
    }

    /// The adjustment that undoes this one
    #[must_use]
    pub const fn inverted(&self) -> Self {
        let adjustment = match self.adjustment {
            Adjustment::Increase(amount) => Adjustment::Decrease(amount),
            Adjustment::Decrease(amount) => Adjustment::Increase(amount),
        };
        Self {
            field: self.field,
            adjustment,
        }
    }
}

/// Everything written by one atomic ledger commit
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerCommit {
    /// Transaction and its rows
    pub transaction: FinancialTransaction,
    /// Uniqueness key; a second commit with the same key is not applied
    pub idempotency_key: Option<String>,
    /// Running-balance changes justified by the rows
    pub adjustments: Vec<BalanceAdjustment>,
}

/// Result of a commit
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Written now
    Committed(FinancialTransaction),
    /// The key was already used; the earlier transaction is returned
    AlreadyCommitted(FinancialTransaction),
}

impl CommitOutcome {
    /// The transaction on record
    #[must_use]
    pub fn into_transaction(self) -> FinancialTransaction {
        match self {
            Self::Committed(txn) | Self::AlreadyCommitted(txn) => txn,
        }
    }
}

/// Persistent ledger storage
///
/// A commit is atomic: the transaction, its rows and every balance adjustment
/// become visible together or not at all, and no balance may go negative.
pub trait LedgerStore: Send + Sync {
    /// Commit a transaction with its balance adjustments
    ///
    /// # Errors
    ///
    /// Returns error if the store fails or a balance would go negative
    fn commit(&self, commit: LedgerCommit) -> BoxFuture<'_, Result<CommitOutcome, StoreError>>;

    /// Look up the transaction recorded under an idempotency key
    ///
    /// # Errors
    ///
    /// Returns error if the store fails
    fn find<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<FinancialTransaction>, StoreError>>;

    /// Every committed transaction, in commit order
    ///
    /// # Errors
    ///
    /// Returns error if the store fails
    fn transactions(&self) -> BoxFuture<'_, Result<Vec<FinancialTransaction>, StoreError>>;

    /// Running balance of an operator
    ///
    /// # Errors
    ///
    /// Returns error if the store fails
    fn owner_balance(&self, owner_id: OwnerId) -> BoxFuture<'_, Result<OwnerFeeBalance, StoreError>>;

    /// Running balance of an agent
    ///
    /// # Errors
    ///
    /// Returns error if the store fails
    fn credit_balance(&self, agent_id: AgentId) -> BoxFuture<'_, Result<CreditBalance, StoreError>>;
}
