//! Engine configuration.
//!
//! Loads configuration from environment variables with the documented
//! defaults. Binaries load a `.env` file first (see `bin/demo.rs`).

use crate::retry::RetryPolicy;
use ferry_core::booking::PaymentMethod;
use ferry_core::ledger::EntityType;
use ferry_core::types::{Money, Rate};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Inventory holds
    pub inventory: InventoryConfig,
    /// Payment windows and receipt verification
    pub payment: PaymentConfig,
    /// Processing fees per payment method
    pub fees: ProcessingFees,
    /// Built-in commission rates
    pub commission: CommissionDefaults,
    /// Channel pricing
    pub pricing: PricingConfig,
    /// Boarding tokens
    pub tickets: TicketConfig,
    /// Ledger posting retries
    pub retry: RetryConfig,
}

/// Inventory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryConfig {
    /// Lease of a fresh hold (default: 10 minutes)
    pub hold_ttl: Duration,
    /// Period of the background sweeper (default: 30 seconds)
    pub sweep_interval: Duration,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            hold_ttl: Duration::from_secs(10 * 60),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Payment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfig {
    /// Hold window for counter payment (default: 2 hours)
    pub cash_window: Duration,
    /// Hold window for bank transfers (default: 24 hours)
    pub bank_transfer_window: Duration,
    /// Minimum extraction confidence for auto-verification (default: 0.80)
    pub ocr_confidence_threshold: f64,
    /// Largest accepted difference between receipt and booking amount (default: 1 minor unit)
    pub amount_tolerance: Money,
    /// Recipient account name expected on bank receipts, unchecked if unset
    pub bank_account_name: Option<String>,
    /// Shared secret for gateway webhook signatures
    pub webhook_secret: String,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            cash_window: Duration::from_secs(2 * 60 * 60),
            bank_transfer_window: Duration::from_secs(24 * 60 * 60),
            ocr_confidence_threshold: 0.80,
            amount_tolerance: Money::from_cents(1),
            bank_account_name: None,
            webhook_secret: "dev-webhook-secret".to_string(),
        }
    }
}

/// Processing fee rate per payment method (default: none)
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProcessingFees {
    /// Counter payments
    pub cash: Rate,
    /// Card gateway
    pub card: Rate,
    /// Bank transfers
    pub bank_transfer: Rate,
    /// Agent credit
    pub credit: Rate,
}

impl ProcessingFees {
    /// Fee rate charged for `method`
    #[must_use]
    pub const fn for_method(&self, method: Option<PaymentMethod>) -> Rate {
        match method {
            Some(PaymentMethod::Cash) => self.cash,
            Some(PaymentMethod::Card) => self.card,
            Some(PaymentMethod::BankTransfer) => self.bank_transfer,
            Some(PaymentMethod::Credit) => self.credit,
            None => Rate::from_bps(0),
        }
    }
}

/// Commission rates used when no stored rule matches
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CommissionDefaults {
    /// Platform cut (default: 5%)
    pub platform: Rate,
    /// Agent cut (default: 3%)
    pub agent: Rate,
    /// Operator cut (default: 0%)
    pub owner: Rate,
}

impl Default for CommissionDefaults {
    fn default() -> Self {
        Self {
            platform: Rate::from_percent(5),
            agent: Rate::from_percent(3),
            owner: Rate::from_percent(0),
        }
    }
}

impl CommissionDefaults {
    /// Built-in rate for a kind of party
    #[must_use]
    pub const fn for_entity(&self, entity_type: EntityType) -> Rate {
        match entity_type {
            EntityType::Platform => self.platform,
            EntityType::Agent => self.agent,
            EntityType::Owner => self.owner,
        }
    }
}

/// Channel pricing configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Discount on bookings an operator makes for its own boats (default: 10%)
    pub owner_channel_discount: Rate,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            owner_channel_discount: Rate::from_percent(10),
        }
    }
}

/// Boarding token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketConfig {
    /// HMAC key for boarding tokens
    pub signing_secret: String,
    /// Age after which a token no longer validates (default: 24 hours)
    pub freshness: Duration,
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self {
            signing_secret: "dev-ticket-secret".to_string(),
            freshness: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Ledger posting retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts after the first (default: 3)
    pub max_retries: usize,
    /// First backoff delay (default: 100ms)
    pub initial_delay: Duration,
    /// Backoff cap (default: 5 seconds)
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Backoff policy for ledger postings
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.initial_delay, self.max_delay)
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables fall back to their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup` instead of the process environment.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            parsed(&lookup, key).map_or(default, Duration::from_secs)
        };
        let millis = |key: &str, default: Duration| {
            parsed(&lookup, key).map_or(default, Duration::from_millis)
        };
        let bps = |key: &str, default: Rate| parsed(&lookup, key).map_or(default, Rate::from_bps);

        Self {
            inventory: InventoryConfig {
                hold_ttl: secs("FERRY_HOLD_TTL_SECS", defaults.inventory.hold_ttl),
                sweep_interval: secs("FERRY_SWEEP_INTERVAL_SECS", defaults.inventory.sweep_interval),
            },
            payment: PaymentConfig {
                cash_window: secs("FERRY_CASH_WINDOW_SECS", defaults.payment.cash_window),
                bank_transfer_window: secs(
                    "FERRY_BANK_TRANSFER_WINDOW_SECS",
                    defaults.payment.bank_transfer_window,
                ),
                ocr_confidence_threshold: parsed::<f64, _>(&lookup, "FERRY_OCR_CONFIDENCE_THRESHOLD")
                    .filter(|threshold| (0.0..=1.0).contains(threshold))
                    .unwrap_or(defaults.payment.ocr_confidence_threshold),
                amount_tolerance: parsed(&lookup, "FERRY_AMOUNT_TOLERANCE_CENTS")
                    .map_or(defaults.payment.amount_tolerance, Money::from_cents),
                bank_account_name: lookup("FERRY_BANK_ACCOUNT_NAME")
                    .map(|name| name.trim().to_string())
                    .filter(|name| !name.is_empty()),
                webhook_secret: lookup("FERRY_WEBHOOK_SECRET")
                    .unwrap_or(defaults.payment.webhook_secret),
            },
            fees: ProcessingFees {
                cash: bps("FERRY_FEE_CASH_BPS", defaults.fees.cash),
                card: bps("FERRY_FEE_CARD_BPS", defaults.fees.card),
                bank_transfer: bps("FERRY_FEE_BANK_TRANSFER_BPS", defaults.fees.bank_transfer),
                credit: bps("FERRY_FEE_CREDIT_BPS", defaults.fees.credit),
            },
            commission: CommissionDefaults {
                platform: bps("FERRY_PLATFORM_COMMISSION_BPS", defaults.commission.platform),
                agent: bps("FERRY_AGENT_COMMISSION_BPS", defaults.commission.agent),
                owner: bps("FERRY_OWNER_COMMISSION_BPS", defaults.commission.owner),
            },
            pricing: PricingConfig {
                owner_channel_discount: bps(
                    "FERRY_OWNER_DISCOUNT_BPS",
                    defaults.pricing.owner_channel_discount,
                ),
            },
            tickets: TicketConfig {
                signing_secret: lookup("FERRY_TICKET_SECRET")
                    .unwrap_or(defaults.tickets.signing_secret),
                freshness: secs("FERRY_TICKET_FRESHNESS_SECS", defaults.tickets.freshness),
            },
            retry: RetryConfig {
                max_retries: parsed(&lookup, "FERRY_RETRY_MAX").unwrap_or(defaults.retry.max_retries),
                initial_delay: millis("FERRY_RETRY_INITIAL_DELAY_MS", defaults.retry.initial_delay),
                max_delay: millis("FERRY_RETRY_MAX_DELAY_MS", defaults.retry.max_delay),
            },
        }
    }
}

fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|raw| raw.trim().parse().ok())
}
