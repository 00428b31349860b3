//! Versioned commission rules.

use crate::ledger::EntityType;
use crate::types::{Channel, CommissionId, Money, Rate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a commission is computed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommissionType {
    /// Percentage of the base amount
    Percentage(Rate),
    /// Fixed amount per booking
    Fixed(Money),
}

/// Channels a rule applies to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelScope {
    /// Every channel
    Any,
    /// One channel only
    Only(Channel),
}

impl ChannelScope {
    /// Whether the scope covers `channel`
    #[must_use]
    pub fn covers(&self, channel: Channel) -> bool {
        match self {
            Self::Any => true,
            Self::Only(scoped) => *scoped == channel,
        }
    }

    /// Whether the scope names a channel explicitly
    #[must_use]
    pub const fn is_specific(&self) -> bool {
        matches!(self, Self::Only(_))
    }
}

/// An immutable, versioned commission rule
///
/// Rules are never edited in place: a newer rule with a later
/// `effective_from` supersedes an older one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionStructure {
    /// Rule identifier
    pub id: CommissionId,
    /// Kind of party the rule applies to
    pub entity_type: EntityType,
    /// Specific party, or `None` for the default rule of that kind
    pub entity_id: Option<Uuid>,
    /// Channel scope
    pub channel: ChannelScope,
    /// Rate or fixed amount
    pub commission: CommissionType,
    /// Lower clamp
    pub minimum: Option<Money>,
    /// Upper clamp
    pub maximum: Option<Money>,
    /// Start of the effective window (inclusive)
    pub effective_from: DateTime<Utc>,
    /// End of the effective window (exclusive), open-ended if `None`
    pub effective_until: Option<DateTime<Utc>>,
    /// Insert time
    pub created_at: DateTime<Utc>,
}

impl CommissionStructure {
    /// Whether the rule is in force at `at`
    #[must_use]
    pub fn is_effective_at(&self, at: DateTime<Utc>) -> bool {
        self.effective_from <= at && self.effective_until.is_none_or(|until| until > at)
    }

    /// Commission on `base`, clamped to `[minimum, maximum]`
    ///
    /// Returns `None` only if the percentage overflows.
    #[must_use]
    pub fn amount_for(&self, base: Money) -> Option<Money> {
        let raw = match self.commission {
            CommissionType::Percentage(rate) => rate.apply(base)?,
            CommissionType::Fixed(amount) => amount,
        };
        let floored = self.minimum.map_or(raw, |min| raw.max(min));
        Some(self.maximum.map_or(floored, |max| floored.min(max)))
    }
}

/// Where a resolved rule came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleSource {
    /// A rule naming the party
    Entity,
    /// The default rule for the party's kind
    Default,
    /// The configured fallback, no stored rule matched
    BuiltIn,
}

/// A rule together with how it was chosen
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedCommission {
    /// The rule in force
    pub rule: CommissionStructure,
    /// How it was chosen
    pub source: RuleSource,
}

impl ResolvedCommission {
    /// Commission on `base`
    #[must_use]
    pub fn amount_for(&self, base: Money) -> Option<Money> {
        self.rule.amount_for(base)
    }
}
