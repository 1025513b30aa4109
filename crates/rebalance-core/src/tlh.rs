//! Tax-Loss Harvesting Identifier (§4.7).
//!
//! Runs before the main solve and proposes harvest quantities that are
//! injected into the LP as pinning equalities. Direct-indexing harvests
//! per-identifier; pairs harvests per-asset-class and pins a paired
//! replacement buy.

use crate::model::{DriftRow, GainLossRow, MarketSnapshot, Target, TlhConfig, TlhTrade};
use crate::reports::drift_for_identifier;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use tax_optimizer::substitutes::SubstituteUniverse;

/// A lot is eligible to be harvested only if: its basis is trustworthy, it is
/// at a loss beyond the configured threshold, and it is not already excluded
/// from selling (held too short, or wash-sale blocked at the lot level —
/// neither of those constraints is modeled per-lot here; callers filter
/// `restricted_lots` before invoking the identifier).
fn eligible_lots<'a>(
    gain_loss: &'a [GainLossRow],
    identifier: &str,
    min_loss_threshold: Decimal,
    restricted_lots: &BTreeSet<String>,
) -> Vec<&'a GainLossRow> {
    let mut lots: Vec<&GainLossRow> = gain_loss
        .iter()
        .filter(|row| row.identifier == identifier)
        .filter(|row| row.is_tlh_eligible(min_loss_threshold))
        .filter(|row| !restricted_lots.contains(&row.lot_id))
        .collect();
    // Most negative per_share_tax_liability first (the biggest benefit).
    lots.sort_by(|a, b| a.per_share_tax_liability.cmp(&b.per_share_tax_liability));
    lots
}

fn round_down(qty: Decimal, places: u32) -> Decimal {
    qty.round_dp_with_strategy(places, rust_decimal::RoundingStrategy::ToZero)
}

/// Greedily assigns harvest quantity across `lots` in priority order,
/// stopping once `max_harvest_value` is exhausted or a lot's harvested value
/// would fall below `min_notional`. Returns `(lot_id, quantity, loss_pct,
/// tax_savings, priority_rank)` tuples plus total dollars harvested.
fn greedy_harvest(
    lots: &[&GainLossRow],
    market: &MarketSnapshot,
    mut remaining_value: Decimal,
    min_notional: Decimal,
    trade_rounding: u32,
) -> (Vec<(String, Decimal, Decimal, Decimal, usize)>, Decimal) {
    let mut harvested = Vec::new();
    let mut total_value = Decimal::ZERO;

    for (priority, row) in lots.iter().enumerate() {
        if remaining_value <= Decimal::ZERO {
            break;
        }
        let price = match market.price(&row.identifier) {
            Some(p) if p > Decimal::ZERO => p,
            _ => continue,
        };

        let max_qty_by_value = remaining_value / price;
        let qty = round_down(max_qty_by_value.min(row.quantity), trade_rounding);
        if qty <= Decimal::ZERO {
            continue;
        }

        let value = qty * price;
        if value < min_notional {
            continue;
        }

        let tax_savings = -(row.per_share_tax_liability * qty);
        harvested.push((row.lot_id.clone(), qty, row.tax_gain_loss_percentage, tax_savings, priority));
        total_value += value;
        remaining_value -= value;
    }

    (harvested, total_value)
}

fn min_tlh_size(min_tlh_size_bps: Decimal, position_value: Decimal, min_notional: Decimal) -> Decimal {
    let bps_floor = position_value * min_tlh_size_bps / Decimal::new(10_000, 0);
    bps_floor.max(min_notional)
}

/// Direct-indexing TLH (§4.7, variant 1): harvests within a single
/// identifier down to a soft-min weight floor, across every eligible lot in
/// priority order (the optimizer needs a pin for each harvested lot).
pub fn direct_indexing_harvests(
    identifier: &str,
    gain_loss: &[GainLossRow],
    drift_rows: &[DriftRow],
    targets: &[Target],
    market: &MarketSnapshot,
    portfolio_value: Decimal,
    config: &TlhConfig,
    min_notional: Decimal,
    trade_rounding: u32,
    restricted_lots: &BTreeSet<String>,
) -> Vec<TlhTrade> {
    let drift = match drift_for_identifier(drift_rows, targets, identifier) {
        Some(d) => d,
        None => return Vec::new(),
    };
    let current_weight = drift.actual_weight;
    let target_weight = drift.target_weight;

    let hard_min = target_weight * config.range_min_weight_multiplier;
    let soft_min = target_weight - Decimal::new(9, 1) * (target_weight - hard_min);
    if current_weight <= soft_min {
        return Vec::new();
    }

    let max_harvest_value = (current_weight - soft_min) * portfolio_value;
    let lots = eligible_lots(gain_loss, identifier, config.tlh_min_loss_threshold, restricted_lots);
    if lots.is_empty() {
        return Vec::new();
    }

    let position_value = current_weight * portfolio_value;
    let floor = min_tlh_size(config.min_tlh_size_bps, position_value, min_notional);

    let (harvested, total_value) =
        greedy_harvest(&lots, market, max_harvest_value, min_notional, trade_rounding);
    if harvested.is_empty() || total_value < floor {
        return Vec::new();
    }

    let post_harvest_weight = current_weight - total_value / portfolio_value;
    if post_harvest_weight < hard_min {
        return Vec::new();
    }

    harvested
        .into_iter()
        .map(|(lot_id, qty, loss_pct, savings, priority)| TlhTrade {
            tax_lot_id: lot_id,
            identifier: identifier.to_string(),
            harvest_quantity: qty,
            loss_percentage: loss_pct,
            potential_tax_savings: savings,
            target_weight,
            current_weight,
            lot_priority: priority,
            replacement_buys: None,
        })
        .collect()
}

/// Pairs TLH (§4.7, variant 2): finds the identifier in `class_identifiers`
/// with the largest harvestable benefit, and a substantially-different
/// replacement within the same class, then pins a dollar-neutral swap.
pub fn pairs_harvest(
    asset_class: &str,
    class_identifiers: &[String],
    class_target_weight: Decimal,
    gain_loss: &[GainLossRow],
    actual_weights: &BTreeMap<String, Decimal>,
    market: &MarketSnapshot,
    portfolio_value: Decimal,
    config: &TlhConfig,
    min_notional: Decimal,
    trade_rounding: u32,
    restricted_sell_lots: &BTreeSet<String>,
    restricted_buy_identifiers: &BTreeSet<String>,
    substitutes: &dyn SubstituteUniverse,
) -> Vec<TlhTrade> {
    if class_identifiers.len() < 2 {
        return Vec::new();
    }

    // Per-identifier target within the class, as the asset-class target
    // split evenly across its members (§4.7 step 3).
    let per_identifier_target = class_target_weight / Decimal::from(class_identifiers.len() as u64);

    // Benefit is the realized dollar loss each identifier's eligible lots would
    // give up (market_value below cost_basis), not the tax-rate-weighted
    // liability: within one asset class every candidate is taxed identically,
    // and using the raw loss keeps selection meaningful even when the caller
    // hasn't resolved tax rates for every gain type.
    let mut best: Option<(&str, Decimal)> = None;
    for id in class_identifiers {
        let lots = eligible_lots(gain_loss, id, config.tlh_min_loss_threshold, restricted_sell_lots);
        let benefit: Decimal = lots.iter().map(|r| r.cost_basis - r.market_value).sum();
        if benefit > Decimal::ZERO && best.as_ref().is_none_or(|(_, b)| benefit > *b) {
            best = Some((id.as_str(), benefit));
        }
    }

    let losing_id = match best {
        Some((id, _)) => id,
        None => return Vec::new(),
    };

    let replacement = class_identifiers.iter().find(|candidate| {
        candidate.as_str() != losing_id
            && !restricted_buy_identifiers.contains(candidate.as_str())
            && !substitutes.is_substantially_identical(losing_id, candidate)
    });
    let replacement = match replacement {
        Some(r) => r.clone(),
        None => return Vec::new(),
    };

    let current_weight = actual_weights.get(losing_id).copied().unwrap_or(Decimal::ZERO);
    let hard_min = per_identifier_target * config.range_min_weight_multiplier;
    let soft_min = per_identifier_target - Decimal::new(9, 1) * (per_identifier_target - hard_min);
    if current_weight <= soft_min {
        return Vec::new();
    }

    let max_harvest_value = (current_weight - soft_min) * portfolio_value;
    let lots = eligible_lots(gain_loss, losing_id, config.tlh_min_loss_threshold, restricted_sell_lots);
    if lots.is_empty() {
        return Vec::new();
    }

    let position_value = current_weight * portfolio_value;
    let floor = min_tlh_size(config.min_tlh_size_bps, position_value, min_notional);

    let (harvested, total_value) =
        greedy_harvest(&lots, market, max_harvest_value, min_notional, trade_rounding);
    if harvested.is_empty() || total_value < floor {
        return Vec::new();
    }

    let mut replacement_buys = BTreeMap::new();
    replacement_buys.insert(replacement.clone(), total_value);

    harvested
        .into_iter()
        .map(|(lot_id, qty, loss_pct, savings, priority)| TlhTrade {
            tax_lot_id: lot_id,
            identifier: losing_id.to_string(),
            harvest_quantity: qty,
            loss_percentage: loss_pct,
            potential_tax_savings: savings,
            target_weight: per_identifier_target,
            current_weight,
            lot_priority: priority,
            replacement_buys: Some(replacement_buys.clone()),
        })
        .collect()
}

/// Identifiers that should have `buy[id] = 0` pinned because they were just
/// harvested and are not themselves a pairs replacement target (§4.7 final
/// paragraph: "A same-identifier rebuy is simultaneously forbidden").
pub fn forced_buy_zero_identifiers(harvests: &[TlhTrade]) -> BTreeSet<String> {
    let replacement_targets: BTreeSet<&str> = harvests
        .iter()
        .filter_map(|h| h.replacement_buys.as_ref())
        .flat_map(|m| m.keys().map(|s| s.as_str()))
        .collect();

    harvests
        .iter()
        .map(|h| h.identifier.clone())
        .filter(|id| !replacement_targets.contains(id.as_str()))
        .collect()
}

/// Identifiers allowed to be bought despite a same-optimization loss sale,
/// because they are a pairs-TLH replacement target (§8 invariant 3 corner
/// case).
pub fn allowed_rebuy_identifiers(harvests: &[TlhTrade]) -> BTreeSet<String> {
    harvests
        .iter()
        .filter_map(|h| h.replacement_buys.as_ref())
        .flat_map(|m| m.keys().cloned())
        .collect()
}

/// Aggregate dollar value each pairs-TLH replacement identifier must be
/// bought at, summed across every harvest that pins it (§4.7 final
/// paragraph; §8 invariant 10 dollar-neutrality). The optimizer pins
/// `buy[id] * price == dollars` so the replacement purchase tracks the
/// harvested proceeds exactly rather than only by coincidence of the cash
/// floor.
pub fn replacement_buy_dollars(harvests: &[TlhTrade]) -> BTreeMap<String, Decimal> {
    let mut totals: BTreeMap<String, Decimal> = BTreeMap::new();
    for h in harvests {
        if let Some(map) = &h.replacement_buys {
            for (id, dollars) in map {
                *totals.entry(id.clone()).or_insert(Decimal::ZERO) += *dollars;
            }
        }
    }
    totals
}
