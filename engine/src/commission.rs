//! Commission rule resolver.
//!
//! Rules are append-only. Resolution prefers, in order:
//!
//! 1. a rule naming the party over the default rule for its kind,
//! 2. a rule scoped to the booking's channel over an any-channel rule,
//! 3. the rule with the latest `effective_from` in force at the given time.
//!
//! When nothing matches, the configured built-in rate applies.

use crate::config::CommissionDefaults;
use chrono::{DateTime, Utc};
use ferry_core::commission::{
    ChannelScope, CommissionStructure, CommissionType, ResolvedCommission, RuleSource,
};
use ferry_core::environment::Clock;
use ferry_core::error::{EngineError, EngineResult};
use ferry_core::ledger::EntityType;
use ferry_core::types::{Channel, CommissionId, Rate};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Resolves which commission rule applies to a party at a point in time
pub struct CommissionResolver {
    rules: RwLock<Vec<CommissionStructure>>,
    defaults: CommissionDefaults,
    clock: Arc<dyn Clock>,
}

impl CommissionResolver {
    /// Creates a resolver with no stored rules
    #[must_use]
    pub fn new(defaults: CommissionDefaults, clock: Arc<dyn Clock>) -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            defaults,
            clock,
        }
    }

    /// Stores a new rule
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] if the percentage exceeds 100 %,
    /// the clamp is inverted, the effective window is empty or the id is taken.
    pub async fn insert(&self, rule: CommissionStructure) -> EngineResult<()> {
        if let CommissionType::Percentage(rate) = rule.commission {
            if rate > Rate::FULL {
                return Err(EngineError::Validation(format!(
                    "commission rate {rate} exceeds 100%"
                )));
            }
        }
        if let (Some(min), Some(max)) = (rule.minimum, rule.maximum) {
            if min > max {
                return Err(EngineError::Validation(format!(
                    "commission minimum {min} exceeds maximum {max}"
                )));
            }
        }
        if rule
            .effective_until
            .is_some_and(|until| until <= rule.effective_from)
        {
            return Err(EngineError::Validation(
                "commission window must end after it starts".to_string(),
            ));
        }

        let mut rules = self.rules.write().await;
        if rules.iter().any(|existing| existing.id == rule.id) {
            return Err(EngineError::Validation(format!(
                "commission rule {} already exists",
                rule.id
            )));
        }

        tracing::info!(
            rule_id = %rule.id,
            entity_type = ?rule.entity_type,
            entity_id = ?rule.entity_id,
            channel = ?rule.channel,
            effective_from = %rule.effective_from,
            "Commission rule stored"
        );
        rules.push(rule);
        Ok(())
    }

    /// The rule in force for a party on a channel at `at`
    pub async fn resolve(
        &self,
        entity_type: EntityType,
        entity_id: Option<Uuid>,
        channel: Channel,
        at: DateTime<Utc>,
    ) -> ResolvedCommission {
        let rules = self.rules.read().await;

        let best = rules
            .iter()
            .filter(|rule| rule.entity_type == entity_type)
            .filter(|rule| rule.entity_id.is_none() || rule.entity_id == entity_id)
            .filter(|rule| rule.channel.covers(channel))
            .filter(|rule| rule.is_effective_at(at))
            .max_by_key(|rule| {
                (
                    rule.entity_id.is_some(),
                    rule.channel.is_specific(),
                    rule.effective_from,
                    rule.created_at,
                )
            });

        match best {
            Some(rule) => {
                let source = if rule.entity_id.is_some() {
                    RuleSource::Entity
                } else {
                    RuleSource::Default
                };
                tracing::debug!(
                    rule_id = %rule.id,
                    entity_type = ?entity_type,
                    source = ?source,
                    "Commission rule resolved"
                );
                ResolvedCommission {
                    rule: rule.clone(),
                    source,
                }
            }
            None => self.built_in(entity_type, at),
        }
    }

    fn built_in(&self, entity_type: EntityType, at: DateTime<Utc>) -> ResolvedCommission {
        let rate = self.defaults.for_entity(entity_type);
        tracing::debug!(entity_type = ?entity_type, rate = %rate, "No stored commission rule, using built-in rate");
        ResolvedCommission {
            rule: CommissionStructure {
                id: CommissionId::from_uuid(Uuid::nil()),
                entity_type,
                entity_id: None,
                channel: ChannelScope::Any,
                commission: CommissionType::Percentage(rate),
                minimum: None,
                maximum: None,
                effective_from: at,
                effective_until: None,
                created_at: self.clock.now(),
            },
            source: RuleSource::BuiltIn,
        }
    }

    /// Every stored rule, in insertion order
    pub async fn rules(&self) -> Vec<CommissionStructure> {
        self.rules.read().await.clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ferry_core::types::{AgentId, Money};
    use ferry_testing::{test_clock, test_epoch};

    fn resolver() -> CommissionResolver {
        CommissionResolver::new(CommissionDefaults::default(), Arc::new(test_clock()))
    }

    fn agent_rule(entity_id: Option<Uuid>, channel: ChannelScope, percent: u32) -> CommissionStructure {
        CommissionStructure {
            id: CommissionId::new(),
            entity_type: EntityType::Agent,
            entity_id,
            channel,
            commission: CommissionType::Percentage(Rate::from_percent(percent)),
            minimum: None,
            maximum: None,
            effective_from: test_epoch() - Duration::days(30),
            effective_until: None,
            created_at: test_epoch() - Duration::days(30),
        }
    }

    #[tokio::test]
    async fn test_falls_back_to_built_in_rate() {
        let resolved = resolver()
            .resolve(EntityType::Platform, None, Channel::Public, test_epoch())
            .await;

        assert_eq!(resolved.source, RuleSource::BuiltIn);
        assert_eq!(resolved.amount_for(Money::from_cents(10_000)), Some(Money::from_cents(500)));
    }

    #[tokio::test]
    async fn test_entity_rule_beats_channel_specific_default() {
        let resolver = resolver();
        let agent = AgentId::new();
        resolver
            .insert(agent_rule(None, ChannelScope::Only(Channel::Agent), 6))
            .await
            .unwrap();
        resolver
            .insert(agent_rule(Some(*agent.as_uuid()), ChannelScope::Any, 4))
            .await
            .unwrap();

        let mine = resolver
            .resolve(EntityType::Agent, Some(*agent.as_uuid()), Channel::Agent, test_epoch())
            .await;
        let other = resolver
            .resolve(EntityType::Agent, Some(*AgentId::new().as_uuid()), Channel::Agent, test_epoch())
            .await;

        assert_eq!(mine.source, RuleSource::Entity);
        assert_eq!(mine.rule.commission, CommissionType::Percentage(Rate::from_percent(4)));
        assert_eq!(other.source, RuleSource::Default);
        assert_eq!(other.rule.commission, CommissionType::Percentage(Rate::from_percent(6)));
    }

    #[tokio::test]
    async fn test_rejects_malformed_rules() {
        let resolver = resolver();

        let over = agent_rule(None, ChannelScope::Any, 101);
        assert!(matches!(resolver.insert(over).await, Err(EngineError::Validation(_))));

        let mut inverted = agent_rule(None, ChannelScope::Any, 5);
        inverted.minimum = Some(Money::from_cents(900));
        inverted.maximum = Some(Money::from_cents(100));
        assert!(matches!(resolver.insert(inverted).await, Err(EngineError::Validation(_))));

        let mut empty = agent_rule(None, ChannelScope::Any, 5);
        empty.effective_until = Some(empty.effective_from);
        assert!(matches!(resolver.insert(empty).await, Err(EngineError::Validation(_))));

        let rule = agent_rule(None, ChannelScope::Any, 5);
        resolver.insert(rule.clone()).await.unwrap();
        assert!(matches!(resolver.insert(rule).await, Err(EngineError::Validation(_))));
        assert_eq!(resolver.rules().await.len(), 1);
    }
}
