//! Fare pricing: snapshots fares, channel discount and tax into booking items.
//!
//! Tax is accumulated exactly in ten-thousandths of a minor unit and rounded
//! once, with the profile's rounding rule, when the total is known.

use ferry_core::booking::{BookingItem, FareSelection, Sailing, TaxBase, TaxKind, TaxRounding};
use ferry_core::error::{EngineError, EngineResult};
use ferry_core::types::{Channel, Currency, Money, Rate};
use serde::{Deserialize, Serialize};

const SCALE: u128 = 10_000;

/// Priced booking snapshot
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    /// One line per ticket type
    pub items: Vec<BookingItem>,
    /// Fare subtotal before discount and tax
    pub subtotal: Money,
    /// Channel discount
    pub discount: Money,
    /// Tax
    pub tax: Money,
    /// Amount payable
    pub total: Money,
    /// Currency of every amount
    pub currency: Currency,
}

fn overflow() -> EngineError {
    EngineError::Validation("booking amount is too large".to_string())
}

fn to_money(cents: u128) -> EngineResult<Money> {
    u64::try_from(cents).map(Money::from_cents).map_err(|_| overflow())
}

/// Prices `selections` on `sailing` for `channel`
///
/// The OWNER channel receives `owner_discount` on the fare subtotal.
///
/// # Errors
///
/// Returns [`EngineError::Validation`] for empty selections, zero quantities,
/// ticket types the sailing does not sell, or amounts that overflow.
pub fn quote(
    sailing: &Sailing,
    selections: &[FareSelection],
    channel: Channel,
    owner_discount: Rate,
) -> EngineResult<PriceQuote> {
    if selections.is_empty() {
        return Err(EngineError::Validation(
            "at least one fare must be selected".to_string(),
        ));
    }

    let mut lines = Vec::with_capacity(selections.len());
    for selection in selections {
        if selection.quantity == 0 {
            return Err(EngineError::Validation(
                "fare quantities must be positive".to_string(),
            ));
        }
        let fare = sailing.fare(selection.ticket_type_id).ok_or_else(|| {
            EngineError::Validation(format!(
                "ticket type {} is not sold on this sailing",
                selection.ticket_type_id
            ))
        })?;
        let unit_price = fare.unit_price().ok_or_else(|| {
            EngineError::Validation(format!("fare {} is discounted below zero", fare.name))
        })?;
        let gross = unit_price
            .checked_multiply(selection.quantity)
            .ok_or_else(overflow)?;
        lines.push((selection, unit_price, gross));
    }

    let subtotal = Money::checked_sum(lines.iter().map(|(_, _, gross)| *gross)).ok_or_else(overflow)?;
    let discount = match channel {
        Channel::Owner => owner_discount.apply(subtotal).ok_or_else(overflow)?.min(subtotal),
        Channel::Public | Channel::Agent => Money::ZERO,
    };
    let discounted = subtotal.saturating_sub(discount);
    let tax = compute_tax(sailing, discounted)?;
    let total = discounted.checked_add(tax).ok_or_else(overflow)?;

    let gross: Vec<Money> = lines.iter().map(|(_, _, gross)| *gross).collect();
    let discounts = allocate(discount, &gross);
    let nets: Vec<Money> = gross
        .iter()
        .zip(&discounts)
        .map(|(gross, discount)| gross.saturating_sub(*discount))
        .collect();
    let taxes = allocate(tax, &nets);

    let items = lines
        .iter()
        .zip(nets.iter().zip(&taxes))
        .map(|((selection, unit_price, _), (net, tax))| {
            Ok(BookingItem {
                ticket_type_id: selection.ticket_type_id,
                quantity: selection.quantity,
                unit_price: *unit_price,
                tax: *tax,
                total: net.checked_add(*tax).ok_or_else(overflow)?,
            })
        })
        .collect::<EngineResult<Vec<_>>>()?;

    tracing::debug!(
        sailing_id = %sailing.id,
        channel = %channel,
        subtotal = %subtotal,
        discount = %discount,
        tax = %tax,
        total = %total,
        "Booking priced"
    );

    Ok(PriceQuote {
        items,
        subtotal,
        discount,
        tax,
        total,
        currency: sailing.currency.clone(),
    })
}

fn compute_tax(sailing: &Sailing, fare: Money) -> EngineResult<Money> {
    let Some(profile) = &sailing.tax_profile else {
        return Ok(Money::ZERO);
    };

    let fare_scaled = u128::from(fare.cents()) * SCALE;
    let mut accrued: u128 = 0;
    for line in profile.lines.iter().filter(|line| line.active) {
        accrued += match (line.kind, line.applies_to) {
            (TaxKind::Percent(rate), TaxBase::Fare) => fare_scaled * u128::from(rate.bps()) / SCALE,
            (TaxKind::Percent(rate), TaxBase::Total) => {
                (fare_scaled + accrued) * u128::from(rate.bps()) / SCALE
            }
            (TaxKind::Fixed(amount), _) => u128::from(amount.cents()) * SCALE,
        };
    }

    let cents = match profile.rounding {
        TaxRounding::RoundUp => accrued.div_ceil(SCALE),
        TaxRounding::RoundDown => accrued / SCALE,
        TaxRounding::RoundNearest => (accrued + SCALE / 2) / SCALE,
    };
    to_money(cents)
}

/// Splits `amount` across `weights` proportionally; the last share takes the remainder
fn allocate(amount: Money, weights: &[Money]) -> Vec<Money> {
    let total: u128 = weights.iter().map(|w| u128::from(w.cents())).sum();
    if weights.is_empty() {
        return Vec::new();
    }
    if total == 0 {
        let mut shares = vec![Money::ZERO; weights.len()];
        if let Some(last) = shares.last_mut() {
            *last = amount;
        }
        return shares;
    }

    let mut remaining = amount;
    let last = weights.len() - 1;
    weights
        .iter()
        .enumerate()
        .map(|(index, weight)| {
            if index == last {
                return remaining;
            }
            let share = u128::from(amount.cents()) * u128::from(weight.cents()) / total;
            let share = Money::from_cents(u64::try_from(share).unwrap_or(u64::MAX)).min(remaining);
            remaining = remaining.saturating_sub(share);
            share
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ferry_core::booking::{Fare, TaxLine, TaxProfile};
    use ferry_core::types::TicketTypeId;
    use ferry_testing::fixtures::{capacity_sailing, gst_profile, standard_fare};

    fn select(fare: &Fare, quantity: u32) -> FareSelection {
        FareSelection {
            ticket_type_id: fare.ticket_type_id,
            quantity,
        }
    }

    #[test]
    fn test_public_fare_with_gst() {
        let mut sailing = capacity_sailing(10, 1);
        sailing.tax_profile = Some(gst_profile());
        let fare = sailing.fares[0].clone();

        let quote = quote(&sailing, &[select(&fare, 2)], Channel::Public, Rate::from_percent(10)).unwrap();

        assert_eq!(quote.subtotal, Money::from_cents(20_000));
        assert_eq!(quote.discount, Money::ZERO);
        assert_eq!(quote.tax, Money::from_cents(1_600));
        assert_eq!(quote.total, Money::from_cents(21_600));
        assert_eq!(quote.items[0].total, quote.total);
    }

    #[test]
    fn test_owner_channel_discount_applies_before_tax() {
        let mut sailing = capacity_sailing(10, 1);
        sailing.tax_profile = Some(gst_profile());
        let fare = sailing.fares[0].clone();

        let quote = quote(&sailing, &[select(&fare, 1)], Channel::Owner, Rate::from_percent(10)).unwrap();

        assert_eq!(quote.discount, Money::from_cents(1_000));
        assert_eq!(quote.tax, Money::from_cents(720));
        assert_eq!(quote.total, Money::from_cents(9_720));
    }

    #[test]
    fn test_compound_tax_and_rounding_modes() {
        let mut sailing = capacity_sailing(10, 1);
        sailing.fares[0].base_price = Money::from_cents(1_001);
        let fare = sailing.fares[0].clone();
        let profile = |rounding| TaxProfile {
            name: "GST + service".to_string(),
            lines: vec![
                TaxLine {
                    kind: TaxKind::Percent(Rate::from_bps(1_000)),
                    applies_to: TaxBase::Fare,
                    active: true,
                },
                TaxLine {
                    kind: TaxKind::Percent(Rate::from_bps(500)),
                    applies_to: TaxBase::Total,
                    active: true,
                },
                TaxLine {
                    kind: TaxKind::Fixed(Money::from_cents(300)),
                    applies_to: TaxBase::Fare,
                    active: false,
                },
            ],
            rounding,
        };

        // 10% of 10.01 = 1.001; 5% of 11.011 = 0.55055; total 1.55155
        sailing.tax_profile = Some(profile(TaxRounding::RoundUp));
        assert_eq!(quote(&sailing, &[select(&fare, 1)], Channel::Public, Rate::default()).unwrap().tax, Money::from_cents(156));
        sailing.tax_profile = Some(profile(TaxRounding::RoundDown));
        assert_eq!(quote(&sailing, &[select(&fare, 1)], Channel::Public, Rate::default()).unwrap().tax, Money::from_cents(155));
        sailing.tax_profile = Some(profile(TaxRounding::RoundNearest));
        assert_eq!(quote(&sailing, &[select(&fare, 1)], Channel::Public, Rate::default()).unwrap().tax, Money::from_cents(155));
    }

    #[test]
    fn test_tax_allocation_leaves_remainder_on_last_item() {
        let mut sailing = capacity_sailing(10, 1);
        let child = Fare {
            ticket_type_id: TicketTypeId::new(),
            name: "Child".to_string(),
            base_price: Money::from_cents(5_000),
            ..standard_fare()
        };
        sailing.fares.push(child.clone());
        sailing.tax_profile = Some(TaxProfile {
            name: "Flat".to_string(),
            lines: vec![TaxLine {
                kind: TaxKind::Fixed(Money::from_cents(100)),
                applies_to: TaxBase::Fare,
                active: true,
            }],
            rounding: TaxRounding::RoundUp,
        });
        let adult = sailing.fares[0].clone();

        let quote = quote(&sailing, &[select(&adult, 1), select(&child, 1)], Channel::Public, Rate::default()).unwrap();

        assert_eq!(quote.items[0].tax, Money::from_cents(66));
        assert_eq!(quote.items[1].tax, Money::from_cents(34));
        let items_total = Money::checked_sum(quote.items.iter().map(|item| item.total));
        assert_eq!(items_total, Some(quote.total));
    }

    #[test]
    fn test_rejects_unknown_ticket_type_and_zero_quantity() {
        let sailing = capacity_sailing(10, 1);
        let stranger = Fare {
            ticket_type_id: TicketTypeId::new(),
            ..standard_fare()
        };

        assert!(quote(&sailing, &[select(&stranger, 1)], Channel::Public, Rate::default()).is_err());
        assert!(quote(&sailing, &[select(&sailing.fares[0], 0)], Channel::Public, Rate::default()).is_err());
        assert!(quote(&sailing, &[], Channel::Public, Rate::default()).is_err());
    }
}
