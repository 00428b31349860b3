//! Double-entry ledger rows, transactions and running balances.

use crate::types::{AgentId, BookingId, Currency, EntryId, Money, OwnerId, TransactionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Account a ledger row is booked against
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    /// Fare revenue
    Revenue,
    /// Commission earned
    Commission,
    /// Tax collected on behalf of the authority
    Tax,
    /// Amounts owed to someone
    Payable,
    /// Amounts owed by someone
    Receivable,
}

impl AccountType {
    /// Wire name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Revenue => "REVENUE",
            Self::Commission => "COMMISSION",
            Self::Tax => "TAX",
            Self::Payable => "PAYABLE",
            Self::Receivable => "RECEIVABLE",
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of party a rule or row is scoped to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    /// The marketplace itself
    Platform,
    /// A boat operator
    Owner,
    /// A travel agent
    Agent,
}

/// A concrete party a ledger row is scoped to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityRef {
    /// The marketplace
    Platform,
    /// An operator
    Owner(OwnerId),
    /// An agent
    Agent(AgentId),
}

impl EntityRef {
    /// Kind of this party
    #[must_use]
    pub const fn entity_type(&self) -> EntityType {
        match self {
            Self::Platform => EntityType::Platform,
            Self::Owner(_) => EntityType::Owner,
            Self::Agent(_) => EntityType::Agent,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Platform => f.write_str("platform"),
            Self::Owner(id) => write!(f, "owner:{id}"),
            Self::Agent(id) => write!(f, "agent:{id}"),
        }
    }
}

/// One debit-or-credit row
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Row identifier
    pub id: EntryId,
    /// Owning transaction
    pub transaction_id: TransactionId,
    /// Party the row is scoped to
    pub entity: EntityRef,
    /// Account
    pub account: AccountType,
    /// Debit side (zero on credit rows)
    pub debit: Money,
    /// Credit side (zero on debit rows)
    pub credit: Money,
    /// Free-text description
    pub memo: String,
}

impl LedgerEntry {
    /// A debit row
    #[must_use]
    pub fn debit(
        transaction_id: TransactionId,
        entity: EntityRef,
        account: AccountType,
        amount: Money,
        memo: impl Into<String>,
    ) -> Self {
        Self {
            id: EntryId::new(),
            transaction_id,
            entity,
            account,
            debit: amount,
            credit: Money::ZERO,
            memo: memo.into(),
        }
    }

    /// A credit row
    #[must_use]
    pub fn credit(
        transaction_id: TransactionId,
        entity: EntityRef,
        account: AccountType,
        amount: Money,
        memo: impl Into<String>,
    ) -> Self {
        Self {
            id: EntryId::new(),
            transaction_id,
            entity,
            account,
            debit: Money::ZERO,
            credit: amount,
            memo: memo.into(),
        }
    }

    /// The same row on the opposite side, attached to another transaction
    #[must_use]
    pub fn mirrored(&self, transaction_id: TransactionId) -> Self {
        Self {
            id: EntryId::new(),
            transaction_id,
            entity: self.entity,
            account: self.account,
            debit: self.credit,
            credit: self.debit,
            memo: format!("reversal: {}", self.memo),
        }
    }
}

/// Economic event kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    /// Revenue recognised on confirmation
    BookingRevenue,
    /// Mirror of an earlier transaction
    Reversal,
    /// Agent prepaid credit purchase
    CreditTopUp,
    /// Reserved: refund payout
    Refund,
    /// Reserved: commission payout to an agent
    CommissionPayout,
}

/// One economic event and its rows
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialTransaction {
    /// Transaction identifier
    pub id: TransactionId,
    /// Kind of event
    pub kind: TransactionKind,
    /// Booking this event belongs to, if any
    pub booking_id: Option<BookingId>,
    /// Currency of every row
    pub currency: Currency,
    /// Ledger rows
    pub entries: Vec<LedgerEntry>,
    /// Transaction this one reverses
    pub reverses: Option<TransactionId>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl FinancialTransaction {
    /// Sum of debit rows (u128 so no row set can overflow it)
    #[must_use]
    pub fn total_debit(&self) -> u128 {
        self.entries.iter().map(|e| u128::from(e.debit.cents())).sum()
    }

    /// Sum of credit rows
    #[must_use]
    pub fn total_credit(&self) -> u128 {
        self.entries.iter().map(|e| u128::from(e.credit.cents())).sum()
    }

    /// Whether debits equal credits
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.total_debit() == self.total_credit()
    }

    /// Rows scoped to one party and account
    pub fn entries_for(
        &self,
        entity: EntityRef,
        account: AccountType,
    ) -> impl Iterator<Item = &LedgerEntry> {
        self.entries
            .iter()
            .filter(move |e| e.entity == entity && e.account == account)
    }
}

/// Operator running balance
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerFeeBalance {
    /// Platform commission accrued against this operator
    pub fees_accrued: Money,
    /// Net revenue payable to this operator
    pub net_payable: Money,
}

/// Agent running balance
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditBalance {
    /// Prepaid credit available for bookings
    pub available: Money,
    /// Commission earned on bookings
    pub commission_earned: Money,
}

/// Money split of one booking
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueBreakdown {
    /// Amount paid by the customer
    pub gross: Money,
    /// Platform commission on the fare
    pub platform_commission: Money,
    /// Agent commission on the fare
    pub agent_commission: Money,
    /// What the operator keeps
    pub owner_net: Money,
    /// Tax collected
    pub tax: Money,
    /// Payment processing fees
    pub fees: Money,
}

impl RevenueBreakdown {
    /// Fare revenue (gross less tax)
    #[must_use]
    pub const fn fare_revenue(&self) -> Money {
        self.gross.saturating_sub(self.tax)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirrored_rows_keep_a_transaction_balanced() {
        let original = TransactionId::new();
        let reversal = TransactionId::new();
        let owner = EntityRef::Owner(OwnerId::new());
        let rows = [
            LedgerEntry::debit(original, EntityRef::Platform, AccountType::Receivable, Money::from_cents(1_000), "gross"),
            LedgerEntry::credit(original, owner, AccountType::Payable, Money::from_cents(1_000), "net"),
        ];

        let txn = FinancialTransaction {
            id: reversal,
            kind: TransactionKind::Reversal,
            booking_id: None,
            currency: Currency::mvr(),
            entries: rows.iter().map(|r| r.mirrored(reversal)).collect(),
            reverses: Some(original),
            created_at: Utc::now(),
        };

        assert!(txn.is_balanced());
        assert_eq!(txn.total_debit(), 1_000);
        assert_eq!(
            txn.entries_for(owner, AccountType::Payable).map(|e| e.debit).next(),
            Some(Money::from_cents(1_000))
        );
    }
}
