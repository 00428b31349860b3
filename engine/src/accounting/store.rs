//! In-memory ledger store.
//!
//! Holds transactions, idempotency keys and running balances behind one async
//! mutex, so a commit is applied completely or not at all.

use ferry_core::environment::{
    Adjustment, BalanceField, BoxFuture, CommitOutcome, LedgerCommit, LedgerStore, StoreError,
};
use ferry_core::ledger::{CreditBalance, FinancialTransaction, OwnerFeeBalance};
use ferry_core::types::{AgentId, Money, OwnerId};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct Inner {
    transactions: Vec<FinancialTransaction>,
    keys: HashMap<String, usize>,
    owners: HashMap<OwnerId, OwnerFeeBalance>,
    agents: HashMap<AgentId, CreditBalance>,
}

impl Inner {
    fn balance(&self, field: BalanceField) -> Money {
        match field {
            BalanceField::OwnerFeesAccrued(id) => {
                self.owners.get(&id).map_or(Money::ZERO, |b| b.fees_accrued)
            }
            BalanceField::OwnerNetPayable(id) => {
                self.owners.get(&id).map_or(Money::ZERO, |b| b.net_payable)
            }
            BalanceField::AgentCredit(id) => self.agents.get(&id).map_or(Money::ZERO, |b| b.available),
            BalanceField::AgentCommission(id) => {
                self.agents.get(&id).map_or(Money::ZERO, |b| b.commission_earned)
            }
        }
    }

    fn set(&mut self, field: BalanceField, value: Money) {
        match field {
            BalanceField::OwnerFeesAccrued(id) => self.owners.entry(id).or_default().fees_accrued = value,
            BalanceField::OwnerNetPayable(id) => self.owners.entry(id).or_default().net_payable = value,
            BalanceField::AgentCredit(id) => self.agents.entry(id).or_default().available = value,
            BalanceField::AgentCommission(id) => {
                self.agents.entry(id).or_default().commission_earned = value;
            }
        }
    }

    /// Computes every new balance without touching the stored ones
    fn stage(
        &self,
        commit: &LedgerCommit,
    ) -> Result<HashMap<BalanceField, Money>, StoreError> {
        let mut staged: HashMap<BalanceField, Money> = HashMap::new();
        for change in &commit.adjustments {
            let current = staged
                .get(&change.field)
                .copied()
                .unwrap_or_else(|| self.balance(change.field));
            let next = match change.adjustment {
                Adjustment::Increase(amount) => current.checked_add(amount).ok_or_else(|| {
                    StoreError::Corrupted(format!("{} overflowed", change.field))
                })?,
                Adjustment::Decrease(amount) => current.checked_sub(amount).ok_or(
                    StoreError::InsufficientBalance {
                        balance: change.field,
                        available: current,
                        requested: amount,
                    },
                )?,
            };
            staged.insert(change.field, next);
        }
        Ok(staged)
    }
}

/// Ledger store kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    inner: Mutex<Inner>,
}

impl InMemoryLedgerStore {
    /// Creates an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn commit(&self, commit: LedgerCommit) -> BoxFuture<'_, Result<CommitOutcome, StoreError>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;

            if let Some(key) = &commit.idempotency_key {
                if let Some(&index) = inner.keys.get(key) {
                    let existing = inner.transactions.get(index).cloned().ok_or_else(|| {
                        StoreError::Corrupted(format!("key {key} points at a missing transaction"))
                    })?;
                    tracing::debug!(key = %key, transaction_id = %existing.id, "Idempotency key already used");
                    return Ok(CommitOutcome::AlreadyCommitted(existing));
                }
            }

            if !commit.transaction.is_balanced() {
                return Err(StoreError::Corrupted(format!(
                    "transaction {} does not balance",
                    commit.transaction.id
                )));
            }

            let staged = inner.stage(&commit)?;
            for (field, value) in staged {
                inner.set(field, value);
            }

            let index = inner.transactions.len();
            inner.transactions.push(commit.transaction.clone());
            if let Some(key) = commit.idempotency_key {
                inner.keys.insert(key, index);
            }
            Ok(CommitOutcome::Committed(commit.transaction))
        })
    }

    fn find<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<FinancialTransaction>, StoreError>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            Ok(inner
                .keys
                .get(key)
                .and_then(|&index| inner.transactions.get(index))
                .cloned())
        })
    }

    fn transactions(&self) -> BoxFuture<'_, Result<Vec<FinancialTransaction>, StoreError>> {
        Box::pin(async move { Ok(self.inner.lock().await.transactions.clone()) })
    }

    fn owner_balance(
        &self,
        owner_id: OwnerId,
    ) -> BoxFuture<'_, Result<OwnerFeeBalance, StoreError>> {
        Box::pin(async move {
            Ok(self
                .inner
                .lock()
                .await
                .owners
                .get(&owner_id)
                .copied()
                .unwrap_or_default())
        })
    }

    fn credit_balance(
        &self,
        agent_id: AgentId,
    ) -> BoxFuture<'_, Result<CreditBalance, StoreError>> {
        Box::pin(async move {
            Ok(self
                .inner
                .lock()
                .await
                .agents
                .get(&agent_id)
                .copied()
                .unwrap_or_default())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ferry_core::environment::BalanceAdjustment;
    use ferry_core::ledger::{AccountType, EntityRef, LedgerEntry, TransactionKind};
    use ferry_core::types::{Currency, TransactionId};

    fn top_up(agent: AgentId, cents: u64) -> FinancialTransaction {
        let id = TransactionId::new();
        let amount = Money::from_cents(cents);
        FinancialTransaction {
            id,
            kind: TransactionKind::CreditTopUp,
            booking_id: None,
            currency: Currency::mvr(),
            entries: vec![
                LedgerEntry::debit(id, EntityRef::Platform, AccountType::Receivable, amount, "cash in"),
                LedgerEntry::credit(id, EntityRef::Agent(agent), AccountType::Payable, amount, "credit"),
            ],
            reverses: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_rejected_commit_changes_nothing() {
        let store = InMemoryLedgerStore::new();
        let agent = AgentId::new();
        let owner = OwnerId::new();

        let commit = LedgerCommit {
            transaction: top_up(agent, 500),
            idempotency_key: Some("k1".to_string()),
            adjustments: vec![
                BalanceAdjustment::increase(BalanceField::OwnerNetPayable(owner), Money::from_cents(500)),
                BalanceAdjustment::decrease(BalanceField::AgentCredit(agent), Money::from_cents(500)),
            ],
        };
        let err = store.commit(commit).await.unwrap_err();

        assert!(matches!(err, StoreError::InsufficientBalance { .. }));
        assert_eq!(store.owner_balance(owner).await.unwrap(), OwnerFeeBalance::default());
        assert!(store.transactions().await.unwrap().is_empty());
        assert!(store.find("k1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_idempotency_key_returns_first_transaction() {
        let store = InMemoryLedgerStore::new();
        let agent = AgentId::new();
        let commit = |txn| LedgerCommit {
            transaction: txn,
            idempotency_key: Some("top-up-1".to_string()),
            adjustments: vec![BalanceAdjustment::increase(
                BalanceField::AgentCredit(agent),
                Money::from_cents(1_000),
            )],
        };

        let first = store.commit(commit(top_up(agent, 1_000))).await.unwrap();
        let second = store.commit(commit(top_up(agent, 1_000))).await.unwrap();

        assert!(matches!(first, CommitOutcome::Committed(_)));
        assert!(matches!(second, CommitOutcome::AlreadyCommitted(_)));
        assert_eq!(first.into_transaction().id, second.into_transaction().id);
        assert_eq!(store.credit_balance(agent).await.unwrap().available, Money::from_cents(1_000));
    }
}
