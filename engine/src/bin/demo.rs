//! Walks one booking through each payment method against in-process collaborators.
//!
//! ```text
//! RUST_LOG=ferry_engine=debug cargo run --bin ferry-demo
//! ```

use anyhow::Context;
use chrono::{Duration, Utc};
use ferry_core::booking::{
    Fare, FareSelection, HoldRequest, PaymentMethod, Sailing, SeatRequest, TaxBase, TaxKind,
    TaxLine, TaxProfile, TaxRounding,
};
use ferry_core::payment::GatewayEvent;
use ferry_core::types::{
    AgentId, Channel, Creator, Currency, Money, OwnerId, Rate, Role, SailingId, SegmentKey,
    TicketTypeId, UserId,
};
use ferry_engine::booking::BookingService;
use ferry_engine::config::EngineConfig;
use ferry_engine::metrics;
use ferry_engine::payment::{PaymentInitiation, webhook};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn sailing() -> Sailing {
    Sailing {
        id: SailingId::new(),
        owner_id: OwnerId::new(),
        departure: Utc::now() + Duration::days(2),
        capacity: 40,
        legs: 2,
        seat_layout: None,
        fares: vec![Fare {
            ticket_type_id: TicketTypeId::new(),
            name: "ECO".to_string(),
            base_price: Money::from_cents(35_000),
            surcharge: Money::ZERO,
            discount: Money::ZERO,
        }],
        tax_profile: Some(TaxProfile {
            name: "Domestic GST 8%".to_string(),
            lines: vec![TaxLine {
                kind: TaxKind::Percent(Rate::from_percent(8)),
                applies_to: TaxBase::Fare,
                active: true,
            }],
            rounding: TaxRounding::RoundUp,
        }),
        currency: Currency::mvr(),
    }
}

fn request(
    sailing: &Sailing,
    passengers: u32,
    channel: Channel,
    agent_id: Option<AgentId>,
) -> anyhow::Result<HoldRequest> {
    let fare = sailing.fares.first().context("sailing sells no fares")?;
    let role = if agent_id.is_some() { Role::Agent } else { Role::Customer };
    Ok(HoldRequest {
        creator: Creator::new(role, UserId::new()),
        sailing_id: sailing.id,
        segment: SegmentKey::full_route(sailing.legs).context("sailing has no legs")?,
        seats: SeatRequest::Count(passengers),
        fares: vec![FareSelection {
            ticket_type_id: fare.ticket_type_id,
            quantity: passengers,
        }],
        channel,
        agent_id,
        ttl: None,
    })
}

fn signed(config: &EngineConfig, gateway_ref: &str, status: &str) -> anyhow::Result<GatewayEvent> {
    Ok(webhook::sign_event(&config.payment.webhook_secret, gateway_ref, status)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry_engine=info,ferry_demo=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
    metrics::register_engine_metrics();

    let config = EngineConfig::from_env();
    let service = BookingService::builder(config.clone()).build()?;
    let sweeper = Arc::clone(service.inventory()).spawn_sweeper(config.inventory.sweep_interval);

    let sailing = sailing();
    service.register_sailing(sailing.clone()).await?;

    // Cash at the counter
    let booking = service.create_hold(request(&sailing, 2, Channel::Public, None)?).await?;
    service
        .select_payment_method(booking.id, PaymentMethod::Cash)
        .await?;
    let booking = service.mark_cash_paid(booking.id).await?;
    info!(code = %booking.code, status = %booking.status, total = %booking.total, "Cash booking settled");
    for ticket in service.tickets(booking.id).await {
        let payload = service.validate_ticket(&ticket.token)?;
        info!(ticket_id = %payload.ticket_id, segment = %payload.segment_key, "Boarding token validated");
    }

    // Card through the gateway, with a redelivered webhook
    let booking = service.create_hold(request(&sailing, 1, Channel::Public, None)?).await?;
    let selection = service
        .select_payment_method(booking.id, PaymentMethod::Card)
        .await?;
    if let PaymentInitiation::RequiresAction { gateway_ref, redirect_url } = selection.initiation {
        info!(redirect = ?redirect_url, "Customer redirected to the gateway");
        service.handle_gateway_event(&signed(&config, &gateway_ref, "AUTHORIZED")?).await?;
        if let Err(err) = service.handle_gateway_event(&signed(&config, &gateway_ref, "AUTHORIZED")?).await {
            info!(error = %err, "Redelivered webhook swallowed");
        }
        let booking = service.handle_gateway_event(&signed(&config, &gateway_ref, "CAPTURED")?).await?;
        info!(code = %booking.code, status = %booking.status, "Card booking settled");
    }

    // Bank transfer with a receipt
    let booking = service.create_hold(request(&sailing, 1, Channel::Public, None)?).await?;
    service
        .select_payment_method(booking.id, PaymentMethod::BankTransfer)
        .await?;
    let receipt_text = format!(
        "Transfer SUCCESS\n{} MVR\nTo: {}\nReference BLAZ202501011234\n",
        booking.total,
        config.payment.bank_account_name.as_deref().unwrap_or("FERRY LINES"),
    );
    let receipt = service
        .upload_receipt(booking.id, Arc::from(receipt_text.into_bytes()))
        .await?;
    let booking = service.get_booking_status(booking.id).await?;
    info!(receipt = ?receipt.status, flags = ?receipt.flags, status = %booking.status, "Bank transfer processed");

    // Agent prepaid credit
    let agent = AgentId::new();
    service
        .accounting()
        .top_up_credit(agent, Money::from_cents(200_000), Currency::mvr(), "DEMO-TOPUP-1")
        .await?;
    let booking = service
        .create_hold(request(&sailing, 3, Channel::Agent, Some(agent))?)
        .await?;
    let booking = service.use_credit(booking.id).await?;
    let credit = service.accounting().credit_balance(agent).await?;
    info!(
        code = %booking.code,
        status = %booking.status,
        credit_left = %credit.available,
        commission_earned = %credit.commission_earned,
        "Agent booking settled"
    );

    let owner = service.accounting().owner_balance(sailing.owner_id).await?;
    let audit = service.accounting().audit().await?;
    info!(
        fees_accrued = %owner.fees_accrued,
        net_payable = %owner.net_payable,
        transactions = audit.transactions,
        clean = audit.is_clean(),
        "Ledger audited"
    );

    sweeper.abort();
    Ok(())
}
