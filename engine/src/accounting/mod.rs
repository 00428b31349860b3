//! Accounting engine: revenue breakdowns and balanced double-entry postings.
//!
//! Every economic event becomes one [`FinancialTransaction`]. Its rows are
//! checked to balance before anything is written, and the running balances
//! they justify are committed in the same store call.
//!
//! # Revenue posting
//!
//! ```text
//! DR  RECEIVABLE          gross         platform (agent when paid by credit)
//! CR  owner REVENUE       fare revenue
//! CR  platform TAX        tax
//! DR  owner REVENUE       fare revenue  (distribution)
//! CR  platform COMMISSION platform commission
//! CR  agent COMMISSION    agent commission
//! CR  platform PAYABLE    processing fees
//! CR  owner PAYABLE       owner net
//! ```

mod store;

pub use store::InMemoryLedgerStore;

use crate::commission::CommissionResolver;
use crate::config::ProcessingFees;
use crate::metrics;
use ferry_core::booking::{Booking, PaymentMethod};
use ferry_core::environment::{
    Adjustment, BalanceAdjustment, BalanceField, Clock, CommitOutcome, LedgerCommit, LedgerStore, StoreError,
};
use ferry_core::error::{EngineError, EngineResult};
use ferry_core::ledger::{
    AccountType, CreditBalance, EntityRef, EntityType, FinancialTransaction, LedgerEntry,
    OwnerFeeBalance, RevenueBreakdown, TransactionKind,
};
use ferry_core::types::{AgentId, BookingId, Currency, Money, OwnerId, TransactionId};
use std::collections::HashMap;
use std::sync::Arc;

fn revenue_key(booking_id: BookingId) -> String {
    format!("booking-revenue:{booking_id}")
}

fn reversal_key(booking_id: BookingId) -> String {
    format!("reversal:{booking_id}")
}

fn top_up_key(reference: &str) -> String {
    format!("credit-top-up:{reference}")
}

/// Result of a full ledger audit
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuditReport {
    /// Transactions examined
    pub transactions: usize,
    /// Transactions whose debits and credits differ
    pub unbalanced: Vec<TransactionId>,
    /// Running balances that do not match their rows
    pub balance_mismatches: Vec<BalanceField>,
}

impl AuditReport {
    /// Whether the ledger is consistent
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.unbalanced.is_empty() && self.balance_mismatches.is_empty()
    }
}

/// Checks that a transaction balances
///
/// # Errors
///
/// Returns [`EngineError::LedgerImbalance`] if debits and credits differ. The
/// condition is logged as an alert and never corrected automatically.
pub fn verify_balanced(transaction: &FinancialTransaction) -> EngineResult<()> {
    let debit = transaction.total_debit();
    let credit = transaction.total_credit();
    if debit == credit {
        return Ok(());
    }
    tracing::error!(
        transaction_id = %transaction.id,
        kind = ?transaction.kind,
        booking_id = ?transaction.booking_id,
        debit,
        credit,
        "ALERT: ledger transaction does not balance"
    );
    metrics::record_alert("ledger_imbalance");
    Err(EngineError::LedgerImbalance { debit, credit })
}

/// Running-balance changes justified by a transaction's rows
#[must_use]
pub fn balance_adjustments(transaction: &FinancialTransaction) -> Vec<BalanceAdjustment> {
    let owner = transaction.entries.iter().find_map(|entry| match entry.entity {
        EntityRef::Owner(id) => Some(id),
        EntityRef::Platform | EntityRef::Agent(_) => None,
    });

    transaction
        .entries
        .iter()
        .filter_map(|entry| {
            let field = match (entry.entity, entry.account) {
                (EntityRef::Owner(id), AccountType::Payable) => BalanceField::OwnerNetPayable(id),
                (EntityRef::Platform, AccountType::Commission) => {
                    BalanceField::OwnerFeesAccrued(owner?)
                }
                (EntityRef::Agent(id), AccountType::Commission) => BalanceField::AgentCommission(id),
                (EntityRef::Agent(id), AccountType::Payable | AccountType::Receivable) => {
                    BalanceField::AgentCredit(id)
                }
                _ => return None,
            };
            if !entry.credit.is_zero() {
                Some(BalanceAdjustment::increase(field, entry.credit))
            } else if !entry.debit.is_zero() {
                Some(BalanceAdjustment::decrease(field, entry.debit))
            } else {
                None
            }
        })
        .collect()
}

/// Computes revenue splits and posts them to the ledger
pub struct AccountingEngine {
    store: Arc<dyn LedgerStore>,
    resolver: Arc<CommissionResolver>,
    fees: ProcessingFees,
    clock: Arc<dyn Clock>,
}

impl AccountingEngine {
    /// Creates an engine over `store`
    #[must_use]
    pub fn new(
        store: Arc<dyn LedgerStore>,
        resolver: Arc<CommissionResolver>,
        fees: ProcessingFees,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            resolver,
            fees,
            clock,
        }
    }

    /// The commission resolver postings use
    #[must_use]
    pub fn resolver(&self) -> &Arc<CommissionResolver> {
        &self.resolver
    }

    /// Splits a booking's total between operator, platform, agent and tax
    ///
    /// Commission rules are resolved at the booking's creation time. Fees,
    /// platform commission and agent commission are capped in that order so
    /// the operator's net never goes below zero.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] if a commission overflows.
    pub async fn compute_breakdown(&self, booking: &Booking) -> EngineResult<RevenueBreakdown> {
        let gross = booking.total;
        let tax = booking.tax.min(gross);
        let fare = gross.saturating_sub(tax);
        let overflow = || EngineError::Validation("commission amount overflowed".to_string());

        let fees = self
            .fees
            .for_method(booking.payment_method)
            .apply(gross)
            .ok_or_else(overflow)?
            .min(fare);

        let platform_rule = self
            .resolver
            .resolve(
                EntityType::Platform,
                Some(*booking.owner_id.as_uuid()),
                booking.channel,
                booking.created_at,
            )
            .await;
        let platform_commission = platform_rule
            .amount_for(fare)
            .ok_or_else(overflow)?
            .min(fare.saturating_sub(fees));

        let agent_commission = match booking.agent_id {
            Some(agent_id) => self
                .resolver
                .resolve(
                    EntityType::Agent,
                    Some(*agent_id.as_uuid()),
                    booking.channel,
                    booking.created_at,
                )
                .await
                .amount_for(fare)
                .ok_or_else(overflow)?
                .min(fare.saturating_sub(fees).saturating_sub(platform_commission)),
            None => Money::ZERO,
        };

        let owner_net = fare
            .saturating_sub(fees)
            .saturating_sub(platform_commission)
            .saturating_sub(agent_commission);

        Ok(RevenueBreakdown {
            gross,
            platform_commission,
            agent_commission,
            owner_net,
            tax,
            fees,
        })
    }

    /// Posts a confirmed booking's revenue; posting twice returns the first transaction
    ///
    /// # Errors
    ///
    /// - [`EngineError::LedgerImbalance`] if the rows do not balance
    /// - [`EngineError::InsufficientCredit`] if a credit-paid booking exceeds the agent's credit
    /// - [`EngineError::Store`] if the store fails
    pub async fn post_revenue(&self, booking: &Booking) -> EngineResult<FinancialTransaction> {
        let receivable = match (booking.payment_method, booking.agent_id) {
            (Some(PaymentMethod::Credit), Some(agent_id)) => EntityRef::Agent(agent_id),
            _ => EntityRef::Platform,
        };
        self.post(booking, receivable).await
    }

    /// Debits the agent's credit and posts the revenue in one atomic commit
    ///
    /// # Errors
    ///
    /// - [`EngineError::Validation`] if the booking has no agent
    /// - [`EngineError::InsufficientCredit`] if the credit does not cover the total;
    ///   nothing is written in that case
    pub async fn post_revenue_with_credit(
        &self,
        booking: &Booking,
    ) -> EngineResult<FinancialTransaction> {
        let agent_id = booking.agent_id.ok_or_else(|| {
            EngineError::Validation("only agent bookings can be paid by credit".to_string())
        })?;
        self.post(booking, EntityRef::Agent(agent_id)).await
    }

    async fn post(
        &self,
        booking: &Booking,
        receivable: EntityRef,
    ) -> EngineResult<FinancialTransaction> {
        let key = revenue_key(booking.id);
        if let Some(existing) = self.store.find(&key).await? {
            tracing::debug!(booking_id = %booking.id, transaction_id = %existing.id, "Revenue already posted");
            return Ok(existing);
        }

        let breakdown = self.compute_breakdown(booking).await?;
        let transaction = self.revenue_transaction(booking, receivable, &breakdown);
        verify_balanced(&transaction)?;

        let adjustments = balance_adjustments(&transaction);
        let outcome = self
            .store
            .commit(LedgerCommit {
                transaction,
                idempotency_key: Some(key),
                adjustments,
            })
            .await
            .map_err(|err| credit_error(err, booking.total))?;

        let transaction = match outcome {
            CommitOutcome::Committed(transaction) => {
                metrics::record_posting("booking_revenue");
                tracing::info!(
                    booking_id = %booking.id,
                    transaction_id = %transaction.id,
                    gross = %breakdown.gross,
                    platform_commission = %breakdown.platform_commission,
                    agent_commission = %breakdown.agent_commission,
                    owner_net = %breakdown.owner_net,
                    tax = %breakdown.tax,
                    fees = %breakdown.fees,
                    "Booking revenue posted"
                );
                transaction
            }
            CommitOutcome::AlreadyCommitted(transaction) => transaction,
        };
        Ok(transaction)
    }

    fn revenue_transaction(
        &self,
        booking: &Booking,
        receivable: EntityRef,
        breakdown: &RevenueBreakdown,
    ) -> FinancialTransaction {
        let id = TransactionId::new();
        let owner = EntityRef::Owner(booking.owner_id);
        let fare = breakdown.fare_revenue();
        let code = &booking.code;

        let mut entries = vec![
            LedgerEntry::debit(id, receivable, AccountType::Receivable, breakdown.gross, format!("{code}: amount due")),
            LedgerEntry::credit(id, owner, AccountType::Revenue, fare, format!("{code}: fare revenue")),
            LedgerEntry::credit(id, EntityRef::Platform, AccountType::Tax, breakdown.tax, format!("{code}: tax collected")),
            LedgerEntry::debit(id, owner, AccountType::Revenue, fare, format!("{code}: fare distribution")),
            LedgerEntry::credit(id, EntityRef::Platform, AccountType::Commission, breakdown.platform_commission, format!("{code}: platform commission")),
        ];
        if let Some(agent_id) = booking.agent_id {
            entries.push(LedgerEntry::credit(
                id,
                EntityRef::Agent(agent_id),
                AccountType::Commission,
                breakdown.agent_commission,
                format!("{code}: agent commission"),
            ));
        }
        entries.push(LedgerEntry::credit(id, EntityRef::Platform, AccountType::Payable, breakdown.fees, format!("{code}: processing fees")));
        entries.push(LedgerEntry::credit(id, owner, AccountType::Payable, breakdown.owner_net, format!("{code}: net payable")));
        entries.retain(|entry| !entry.debit.is_zero() || !entry.credit.is_zero());

        FinancialTransaction {
            id,
            kind: TransactionKind::BookingRevenue,
            booking_id: Some(booking.id),
            currency: booking.currency.clone(),
            entries,
            reverses: None,
            created_at: self.clock.now(),
        }
    }

    /// Undoes a booking's revenue posting with a mirror transaction
    ///
    /// Reversing twice returns the first reversal.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if no revenue was posted for the booking.
    pub async fn reverse(&self, booking_id: BookingId) -> EngineResult<FinancialTransaction> {
        let original = self
            .store
            .find(&revenue_key(booking_id))
            .await?
            .ok_or_else(|| EngineError::not_found("Revenue posting", booking_id))?;

        let id = TransactionId::new();
        let transaction = FinancialTransaction {
            id,
            kind: TransactionKind::Reversal,
            booking_id: Some(booking_id),
            currency: original.currency.clone(),
            entries: original.entries.iter().map(|entry| entry.mirrored(id)).collect(),
            reverses: Some(original.id),
            created_at: self.clock.now(),
        };
        verify_balanced(&transaction)?;

        let adjustments = balance_adjustments(&transaction);
        let outcome = self
            .store
            .commit(LedgerCommit {
                transaction,
                idempotency_key: Some(reversal_key(booking_id)),
                adjustments,
            })
            .await?;

        if let CommitOutcome::Committed(transaction) = &outcome {
            metrics::record_posting("reversal");
            tracing::warn!(
                booking_id = %booking_id,
                transaction_id = %transaction.id,
                reverses = %original.id,
                "Booking revenue reversed"
            );
        }
        Ok(outcome.into_transaction())
    }

    /// Adds prepaid credit to an agent; `reference` makes the top-up idempotent
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] for a zero amount or blank reference.
    pub async fn top_up_credit(
        &self,
        agent_id: AgentId,
        amount: Money,
        currency: Currency,
        reference: &str,
    ) -> EngineResult<FinancialTransaction> {
        if amount.is_zero() {
            return Err(EngineError::Validation("top-up amount must be positive".to_string()));
        }
        if reference.trim().is_empty() {
            return Err(EngineError::Validation("top-up reference is required".to_string()));
        }

        let id = TransactionId::new();
        let transaction = FinancialTransaction {
            id,
            kind: TransactionKind::CreditTopUp,
            booking_id: None,
            currency,
            entries: vec![
                LedgerEntry::debit(id, EntityRef::Platform, AccountType::Receivable, amount, format!("top-up {reference}: payment received")),
                LedgerEntry::credit(id, EntityRef::Agent(agent_id), AccountType::Payable, amount, format!("top-up {reference}: credit issued")),
            ],
            reverses: None,
            created_at: self.clock.now(),
        };
        verify_balanced(&transaction)?;

        let adjustments = balance_adjustments(&transaction);
        let outcome = self
            .store
            .commit(LedgerCommit {
                transaction,
                idempotency_key: Some(top_up_key(reference)),
                adjustments,
            })
            .await?;

        if let CommitOutcome::Committed(transaction) = &outcome {
            metrics::record_posting("credit_top_up");
            tracing::info!(agent_id = %agent_id, amount = %amount, transaction_id = %transaction.id, "Agent credit topped up");
        }
        Ok(outcome.into_transaction())
    }

    /// Running balance of an operator
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the store fails.
    pub async fn owner_balance(&self, owner_id: OwnerId) -> EngineResult<OwnerFeeBalance> {
        Ok(self.store.owner_balance(owner_id).await?)
    }

    /// Running balance of an agent
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the store fails.
    pub async fn credit_balance(&self, agent_id: AgentId) -> EngineResult<CreditBalance> {
        Ok(self.store.credit_balance(agent_id).await?)
    }

    /// The revenue posting of a booking, if any
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the store fails.
    pub async fn transaction_for_booking(
        &self,
        booking_id: BookingId,
    ) -> EngineResult<Option<FinancialTransaction>> {
        Ok(self.store.find(&revenue_key(booking_id)).await?)
    }

    /// Every committed transaction, in commit order
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the store fails.
    pub async fn transactions(&self) -> EngineResult<Vec<FinancialTransaction>> {
        Ok(self.store.transactions().await?)
    }

    /// Re-checks every transaction and recomputes every running balance from the rows
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the store fails.
    pub async fn audit(&self) -> EngineResult<AuditReport> {
        let transactions = self.store.transactions().await?;
        let mut report = AuditReport {
            transactions: transactions.len(),
            ..AuditReport::default()
        };
        let mut expected: HashMap<BalanceField, i128> = HashMap::new();

        for transaction in &transactions {
            if !transaction.is_balanced() {
                report.unbalanced.push(transaction.id);
            }
            for change in balance_adjustments(transaction) {
                let delta = match change.adjustment {
                    Adjustment::Increase(amount) => i128::from(amount.cents()),
                    Adjustment::Decrease(amount) => -i128::from(amount.cents()),
                };
                *expected.entry(change.field).or_default() += delta;
            }
        }

        for (field, value) in expected {
            let stored = match field {
                BalanceField::OwnerFeesAccrued(id) => self.store.owner_balance(id).await?.fees_accrued,
                BalanceField::OwnerNetPayable(id) => self.store.owner_balance(id).await?.net_payable,
                BalanceField::AgentCredit(id) => self.store.credit_balance(id).await?.available,
                BalanceField::AgentCommission(id) => self.store.credit_balance(id).await?.commission_earned,
            };
            if i128::from(stored.cents()) != value {
                report.balance_mismatches.push(field);
            }
        }

        if report.is_clean() {
            tracing::info!(transactions = report.transactions, "Ledger audit clean");
        } else {
            tracing::error!(
                unbalanced = report.unbalanced.len(),
                balance_mismatches = report.balance_mismatches.len(),
                "ALERT: ledger audit found inconsistencies"
            );
            metrics::record_alert("audit_failure");
        }
        Ok(report)
    }
}

fn credit_error(err: StoreError, required: Money) -> EngineError {
    match err {
        StoreError::InsufficientBalance {
            balance: BalanceField::AgentCredit(agent_id),
            available,
            ..
        } => {
            tracing::info!(agent_id = %agent_id, required = %required, available = %available, "Agent credit insufficient");
            EngineError::InsufficientCredit {
                required,
                available,
            }
        }
        other => EngineError::Store(other),
    }
}
