//! Integration tests for revenue settlement
//!
//! Covers versioned commission rules, prepaid agent credit and the
//! double-entry invariant of every posting.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use chrono::Duration;
use ferry_core::booking::{BookingStatus, PaymentMethod, PaymentStatus};
use ferry_core::commission::{ChannelScope, CommissionStructure, CommissionType};
use ferry_core::environment::Clock;
use ferry_core::error::EngineError;
use ferry_core::ledger::{AccountType, EntityRef, EntityType, TransactionKind};
use ferry_core::types::{AgentId, Channel, CommissionId, Currency, Money, Rate};
use ferry_engine::accounting::{AccountingEngine, InMemoryLedgerStore, verify_balanced};
use ferry_engine::booking::BookingService;
use ferry_engine::commission::CommissionResolver;
use ferry_engine::config::{CommissionDefaults, EngineConfig, ProcessingFees};
use ferry_testing::fixtures::{agent_hold_request, capacity_sailing, priced_booking};
use ferry_testing::{ManualClock, properties, test_clock, test_epoch};
use proptest::prelude::*;
use std::sync::Arc;

// ============================================================================
// Test Fixtures
// ============================================================================

fn service(clock: &ManualClock) -> BookingService {
    BookingService::builder(EngineConfig::default())
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap()
}

fn agent_rule(
    agent: AgentId,
    percent: u32,
    from: chrono::DateTime<chrono::Utc>,
    until: Option<chrono::DateTime<chrono::Utc>>,
) -> CommissionStructure {
    CommissionStructure {
        id: CommissionId::new(),
        entity_type: EntityType::Agent,
        entity_id: Some(*agent.as_uuid()),
        channel: ChannelScope::Any,
        commission: CommissionType::Percentage(Rate::from_percent(percent)),
        minimum: None,
        maximum: None,
        effective_from: from,
        effective_until: until,
        created_at: test_epoch(),
    }
}

// ============================================================================
// Commission versioning
// ============================================================================

#[tokio::test]
async fn commission_follows_the_rule_in_force_at_booking_time() {
    let clock = ManualClock::starting_at_test_epoch();
    let service = service(&clock);
    let sailing = capacity_sailing(20, 1);
    service.register_sailing(sailing.clone()).await.unwrap();

    let agent = AgentId::new();
    let switch_over = test_epoch() + Duration::days(5);
    service
        .commission()
        .insert(agent_rule(agent, 4, test_epoch() - Duration::days(30), Some(switch_over)))
        .await
        .unwrap();
    service
        .commission()
        .insert(agent_rule(agent, 3, switch_over, None))
        .await
        .unwrap();
    service
        .accounting()
        .top_up_credit(agent, Money::from_cents(100_000), Currency::mvr(), "TOPUP-1")
        .await
        .unwrap();

    clock.advance(Duration::days(4));
    let before = service
        .create_hold(agent_hold_request(&sailing, agent, 1))
        .await
        .unwrap();
    service.use_credit(before.id).await.unwrap();
    assert_eq!(
        service.accounting().credit_balance(agent).await.unwrap().commission_earned,
        Money::from_cents(400)
    );

    clock.advance(Duration::days(2));
    let after = service
        .create_hold(agent_hold_request(&sailing, agent, 1))
        .await
        .unwrap();
    service.use_credit(after.id).await.unwrap();

    let balance = service.accounting().credit_balance(agent).await.unwrap();
    assert_eq!(balance.commission_earned, Money::from_cents(700));
    assert_eq!(balance.available, Money::from_cents(80_000));

    // A booking made before the switch keeps its rate even when settled later
    let breakdown = service.accounting().compute_breakdown(&before).await.unwrap();
    assert_eq!(breakdown.agent_commission, Money::from_cents(400));
}

#[tokio::test]
async fn built_in_rates_apply_without_stored_rules() {
    let clock = Arc::new(test_clock());
    let resolver = CommissionResolver::new(CommissionDefaults::default(), clock.clone());
    let resolved = resolver
        .resolve(EntityType::Platform, None, Channel::Public, clock.now())
        .await;

    assert_eq!(resolved.amount_for(Money::from_cents(10_000)), Some(Money::from_cents(500)));
}

// ============================================================================
// Agent credit
// ============================================================================

#[tokio::test]
async fn insufficient_credit_changes_nothing() {
    let clock = ManualClock::starting_at_test_epoch();
    let service = service(&clock);
    let sailing = capacity_sailing(20, 1);
    service.register_sailing(sailing.clone()).await.unwrap();

    let agent = AgentId::new();
    service
        .accounting()
        .top_up_credit(agent, Money::from_cents(5_000), Currency::mvr(), "TOPUP-SMALL")
        .await
        .unwrap();
    let booking = service
        .create_hold(agent_hold_request(&sailing, agent, 1))
        .await
        .unwrap();

    let result = service.use_credit(booking.id).await;
    assert_eq!(
        result,
        Err(EngineError::InsufficientCredit {
            required: Money::from_cents(10_000),
            available: Money::from_cents(5_000),
        })
    );

    let unchanged = service.get_booking_status(booking.id).await.unwrap();
    assert_eq!(unchanged.status, BookingStatus::Holding);
    assert_eq!(unchanged.payment_status, PaymentStatus::Unpaid);
    assert!(service.revenue_posting(booking.id).await.unwrap().is_none());
    assert_eq!(
        service.accounting().credit_balance(agent).await.unwrap().available,
        Money::from_cents(5_000)
    );
    assert_eq!(service.accounting().transactions().await.unwrap().len(), 1);

    // Topping up lets the same booking through
    service
        .accounting()
        .top_up_credit(agent, Money::from_cents(5_000), Currency::mvr(), "TOPUP-REST")
        .await
        .unwrap();
    let confirmed = service.use_credit(booking.id).await.unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
    assert_eq!(confirmed.payment_method, Some(PaymentMethod::Credit));
    assert_eq!(
        service.accounting().credit_balance(agent).await.unwrap().available,
        Money::ZERO
    );
}

#[tokio::test]
async fn credit_posting_debits_the_agent_in_the_same_transaction() {
    let clock = ManualClock::starting_at_test_epoch();
    let service = service(&clock);
    let sailing = capacity_sailing(20, 1);
    service.register_sailing(sailing.clone()).await.unwrap();

    let agent = AgentId::new();
    service
        .accounting()
        .top_up_credit(agent, Money::from_cents(50_000), Currency::mvr(), "TOPUP-1")
        .await
        .unwrap();
    let booking = service
        .create_hold(agent_hold_request(&sailing, agent, 2))
        .await
        .unwrap();
    service.use_credit(booking.id).await.unwrap();

    let posting = service.revenue_posting(booking.id).await.unwrap().unwrap();
    assert_eq!(posting.kind, TransactionKind::BookingRevenue);
    assert!(posting.is_balanced());
    let receivable = posting
        .entries
        .iter()
        .find(|entry| entry.account == AccountType::Receivable)
        .unwrap();
    assert_eq!(receivable.entity, EntityRef::Agent(agent));
    assert_eq!(receivable.debit, Money::from_cents(20_000));

    let owner = service.accounting().owner_balance(sailing.owner_id).await.unwrap();
    assert_eq!(owner.fees_accrued, Money::from_cents(1_000));
    assert_eq!(owner.net_payable, Money::from_cents(18_400));
    assert!(service.accounting().audit().await.unwrap().is_clean());
}

#[tokio::test]
async fn posting_twice_returns_the_first_transaction() {
    let clock: Arc<dyn Clock> = Arc::new(test_clock());
    let engine = AccountingEngine::new(
        Arc::new(InMemoryLedgerStore::new()),
        Arc::new(CommissionResolver::new(CommissionDefaults::default(), Arc::clone(&clock))),
        ProcessingFees::default(),
        clock,
    );
    let booking = priced_booking(&capacity_sailing(10, 1), Money::from_cents(10_800), Money::from_cents(800));

    let first = engine.post_revenue(&booking).await.unwrap();
    let second = engine.post_revenue(&booking).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(engine.transactions().await.unwrap().len(), 1);

    let reversal = engine.reverse(booking.id).await.unwrap();
    assert_eq!(reversal.reverses, Some(first.id));
    assert_eq!(engine.reverse(booking.id).await.unwrap().id, reversal.id);
    let owner = engine.owner_balance(booking.owner_id).await.unwrap();
    assert_eq!(owner.net_payable, Money::ZERO);
    assert_eq!(owner.fees_accrued, Money::ZERO);
}

// ============================================================================
// Double-entry invariant
// ============================================================================

proptest! {
    #[test]
    fn every_revenue_posting_balances(
        fare in properties::positive_money(),
        tax in properties::money(),
        fee in properties::rate(),
        platform in properties::rate(),
        agent_rate in properties::rate(),
        through_agent in any::<bool>(),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let clock: Arc<dyn Clock> = Arc::new(test_clock());
            let defaults = CommissionDefaults {
                platform,
                agent: agent_rate,
                owner: Rate::from_bps(0),
            };
            let fees = ProcessingFees { cash: fee, card: fee, bank_transfer: fee, credit: fee };
            let engine = AccountingEngine::new(
                Arc::new(InMemoryLedgerStore::new()),
                Arc::new(CommissionResolver::new(defaults, Arc::clone(&clock))),
                fees,
                clock,
            );

            let total = fare.checked_add(tax).unwrap();
            let mut booking = priced_booking(&capacity_sailing(10, 1), total, tax);
            booking.payment_method = Some(PaymentMethod::Cash);
            if through_agent {
                booking.channel = Channel::Agent;
                booking.agent_id = Some(AgentId::new());
            }

            let breakdown = engine.compute_breakdown(&booking).await.unwrap();
            let split = [
                breakdown.owner_net,
                breakdown.platform_commission,
                breakdown.agent_commission,
                breakdown.fees,
                breakdown.tax,
            ];
            prop_assert_eq!(Money::checked_sum(split), Some(total));

            let posting = engine.post_revenue(&booking).await.unwrap();
            prop_assert!(verify_balanced(&posting).is_ok());
            prop_assert!(engine.audit().await.unwrap().is_clean());
            Ok(())
        })?;
    }
}
