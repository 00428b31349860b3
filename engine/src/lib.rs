//! # Ferry Engine
//!
//! Booking reservation and financial settlement for a ferry ticket marketplace.
//!
//! The engine holds finite seat inventory under concurrent demand, drives each
//! booking through a payment-method-specific state machine, posts balanced
//! double-entry ledger records and mints signed boarding tokens.
//!
//! # Architecture
//!
//! ```text
//!                      ┌────────────────────────┐
//!   callers ─────────▶ │     BookingService     │  (booking state machine)
//!                      └────────────────────────┘
//!                        │      │       │      │
//!          ┌─────────────┘      │       │      └──────────────┐
//!          ▼                    ▼       ▼                     ▼
//! ┌─────────────────┐ ┌──────────────┐ ┌─────────────────┐ ┌──────────────┐
//! │ InventoryLedger │ │   Payment    │ │ AccountingEngine│ │ TicketIssuer │
//! │ (holds, leases) │ │ Orchestrator │ │ (double entry)  │ │ (HMAC tokens)│
//! └─────────────────┘ └──────────────┘ └─────────────────┘ └──────────────┘
//!                                         │          │
//!                                         ▼          ▼
//!                              CommissionResolver   LedgerStore
//! ```
//!
//! # Key Features
//!
//! ## 1. No Double Sale
//!
//! Check-and-reserve runs under a per-sailing lock, so two concurrent requests
//! for the last seat produce exactly one hold. Holds are leases that lapse.
//!
//! ## 2. Balanced Ledger
//!
//! Every financial transaction is verified to balance before it is committed,
//! and running balances change in the same atomic commit as their rows.
//!
//! ## 3. Idempotent Settlement
//!
//! Revenue is posted at most once per booking, duplicate webhooks are
//! swallowed, and a confirmation whose posting keeps failing is parked for
//! replay instead of being lost.

pub mod accounting;
pub mod booking;
pub mod commission;
pub mod config;
pub mod inventory;
pub mod metrics;
pub mod payment;
pub mod pricing;
pub mod retry;
pub mod signing;
pub mod tickets;

pub use accounting::{AccountingEngine, AuditReport, InMemoryLedgerStore};
pub use booking::{BookingService, BookingServiceBuilder};
pub use commission::CommissionResolver;
pub use config::EngineConfig;
pub use inventory::{HoldToken, InventoryError, InventoryLedger};
pub use payment::{PaymentOrchestrator, SandboxGateway, TextReceiptExtractor};
pub use pricing::PriceQuote;
pub use tickets::{TicketIssuer, TokenError};
