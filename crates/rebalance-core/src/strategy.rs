//! Two-phase solve driver (§4.6) and the public entry point.
//!
//! Orchestrates initializers → reports → TLH identifier → constraint/
//! objective assembly → solve, across the no-trade baseline, full
//! optimization, and buy-only fallback scenarios, and extracts/applies the
//! winning scenario's trades.

use crate::constraints::{self, ConstraintContext};
use crate::decision_vars::{build_decision_vars, DecisionVars};
use crate::errors::{OptimizerError, Result};
use crate::initializers;
use crate::lp::{self, SolveStatus, SolvedScenario};
use crate::model::{
    DriftRow, GainLossRow, MarketSnapshot, Strategy, StrategyType, TaxLot, Target, CASH,
};
use crate::objective::{self, ObjectiveContext};
use crate::oracle::Oracle;
use crate::reports::{actuals_report, drift_report, gain_loss_report, total_value};
use crate::tlh;
use crate::trade::{apply_trades, extract_trades, PostTradeStrategy, Trade};
use good_lp::{constraint, ProblemVariables};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Scenario {
    NoTrade,
    Full,
    BuyOnly,
}

/// Enumerated reason a no-trade result was returned (§7).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum NoTradeReason {
    BelowRebalanceThreshold,
    Infeasible,
    SolverFailure,
    NotEnoughCashToBuyOnly,
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct ObjectiveDecomposition {
    pub tax: Decimal,
    pub drift: Decimal,
    pub transaction: Decimal,
    pub factor: Decimal,
    pub cash_drag: Decimal,
    pub overall: Decimal,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Improvements {
    pub full_improvement: Decimal,
    pub rebalance_threshold: Option<Decimal>,
    pub buy_only_improvement: Option<Decimal>,
    pub buy_threshold: Option<Decimal>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TradeSummary {
    pub trades: Vec<Trade>,
    pub should_trade: bool,
    pub scenario: Scenario,
    pub status: SolveStatus,
    pub before: ObjectiveDecomposition,
    pub after: ObjectiveDecomposition,
    pub improvements: Improvements,
    pub no_trade_reason: Option<NoTradeReason>,
    pub tlh_trades: Vec<crate::model::TlhTrade>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ComparisonReports {
    pub pre_trade_drift: Vec<DriftRow>,
    pub post_trade_drift: Vec<DriftRow>,
    pub pre_trade_gain_loss: Vec<GainLossRow>,
    pub post_trade_gain_loss: Vec<GainLossRow>,
}

pub struct OptimizationResult {
    pub summary: TradeSummary,
    pub post_trade: PostTradeStrategy,
    pub reports: ComparisonReports,
}

fn to_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

/// Derives `lot_id -> priority rank` in ascending `per_share_tax_liability`
/// order (most tax-preferred to sell first), reused by both the objective's
/// rank-penalty term and TLH's greedy harvest ordering (§4.5, §4.7).
fn rank_lots(gain_loss: &[GainLossRow]) -> BTreeMap<String, usize> {
    let mut sorted: Vec<&GainLossRow> = gain_loss.iter().collect();
    sorted.sort_by(|a, b| a.per_share_tax_liability.cmp(&b.per_share_tax_liability));
    sorted
        .into_iter()
        .enumerate()
        .map(|(rank, row)| (row.lot_id.clone(), rank))
        .collect()
}

/// Recomputes the exact objective decomposition from a solved scenario's
/// buy/sell values, rather than reading back the LP's epigraph auxiliaries
/// (see objective.rs's header comment).
#[allow(clippy::too_many_arguments)]
fn decompose(
    decision: &DecisionVars,
    solved: &SolvedScenario,
    lots: &[TaxLot],
    gain_loss: &[GainLossRow],
    market: &MarketSnapshot,
    spreads: &BTreeMap<String, Decimal>,
    targets: &[Target],
    total_value: Decimal,
    cash_target_weight: Decimal,
    starting_cash: Decimal,
    factor_model: Option<&crate::model::FactorModel>,
) -> ObjectiveDecomposition {
    let sell_qty = |lot_id: &str| -> Decimal {
        decision
            .sell
            .get(lot_id)
            .map(|&v| Decimal::from_f64_retain(solved.value(v)).unwrap_or(Decimal::ZERO))
            .unwrap_or(Decimal::ZERO)
    };
    let buy_qty = |id: &str| -> Decimal {
        decision
            .buy
            .get(id)
            .map(|&v| Decimal::from_f64_retain(solved.value(v)).unwrap_or(Decimal::ZERO))
            .unwrap_or(Decimal::ZERO)
    };

    let mut tax = Decimal::ZERO;
    for row in gain_loss {
        tax += sell_qty(&row.lot_id) * row.per_share_tax_liability;
    }

    let mut transaction = Decimal::ZERO;
    for lot in lots {
        let hs = spreads.get(&lot.identifier).copied().unwrap_or(Decimal::ZERO);
        let p = market.price(&lot.identifier).unwrap_or(Decimal::ZERO);
        transaction += sell_qty(&lot.lot_id) * p * hs;
    }
    for (id, _) in &decision.buy {
        let hs = spreads.get(id).copied().unwrap_or(Decimal::ZERO);
        let p = market.price(id).unwrap_or(Decimal::ZERO);
        transaction += buy_qty(id) * p * hs;
    }

    let mut ending_cash = starting_cash;
    for lot in lots {
        let hs = spreads.get(&lot.identifier).copied().unwrap_or(Decimal::ZERO);
        let p = market.price(&lot.identifier).unwrap_or(Decimal::ZERO);
        ending_cash += sell_qty(&lot.lot_id) * p * (Decimal::ONE - hs);
    }
    for (id, _) in &decision.buy {
        let hs = spreads.get(id).copied().unwrap_or(Decimal::ZERO);
        let p = market.price(id).unwrap_or(Decimal::ZERO);
        ending_cash -= buy_qty(id) * p * (Decimal::ONE + hs);
    }
    let cash_drag = (ending_cash - cash_target_weight * total_value).max(Decimal::ZERO);

    let mut drift = Decimal::ZERO;
    if !total_value.is_zero() {
        let target_by_id: BTreeMap<&str, Decimal> = targets
            .iter()
            .flat_map(|t| t.identifiers.iter().map(move |id| (id.as_str(), t.target_weight)))
            .collect();
        let mut ids: BTreeSet<&str> = decision.buy.keys().map(|s| s.as_str()).collect();
        ids.extend(lots.iter().map(|l| l.identifier.as_str()));
        for id in ids {
            let current_qty: Decimal = lots.iter().filter(|l| l.identifier == id).map(|l| l.quantity).sum();
            let price = market.price(id).unwrap_or(Decimal::ZERO);
            let sold: Decimal = lots
                .iter()
                .filter(|l| l.identifier == id)
                .map(|l| sell_qty(&l.lot_id))
                .sum();
            let post_qty = current_qty - sold + buy_qty(id);
            let post_value = post_qty * price;
            let target = target_by_id.get(id).copied().unwrap_or(Decimal::ZERO);
            drift += (post_value / total_value - target).abs();
        }
    }

    // Factor-model cost: |post_trade_exposure[f] - target_exposure[f]| per
    // factor, unnormalized (mirrors objective.rs's epigraph terms before the
    // normalization constant and weight are applied).
    let mut factor = Decimal::ZERO;
    if let Some(factor_model) = factor_model {
        if !total_value.is_zero() {
            for (factor_name, target_exposure) in &factor_model.target_exposure {
                let mut exposure = Decimal::ZERO;
                for (id, _) in &decision.buy {
                    let loading = factor_model
                        .loadings
                        .get(id)
                        .and_then(|row| row.get(factor_name))
                        .copied()
                        .unwrap_or(Decimal::ZERO);
                    if loading.is_zero() {
                        continue;
                    }
                    let current_qty: Decimal = lots.iter().filter(|l| &l.identifier == id).map(|l| l.quantity).sum();
                    let price = market.price(id).unwrap_or(Decimal::ZERO);
                    let sold: Decimal = lots
                        .iter()
                        .filter(|l| &l.identifier == id)
                        .map(|l| sell_qty(&l.lot_id))
                        .sum();
                    let post_value = (current_qty - sold + buy_qty(id)) * price;
                    exposure += loading * post_value / total_value;
                }
                factor += (exposure - *target_exposure).abs();
            }
        }
    }

    ObjectiveDecomposition {
        tax,
        drift,
        transaction,
        factor,
        cash_drag,
        overall: tax + drift + transaction + factor + cash_drag,
    }
}

struct ScenarioOutcome {
    status: SolveStatus,
    decision: DecisionVars,
    solved: SolvedScenario,
    decomposition: ObjectiveDecomposition,
}

#[allow(clippy::too_many_arguments)]
fn solve_scenario(
    buy_universe: &[String],
    lots: &[TaxLot],
    market: &MarketSnapshot,
    spreads: &BTreeMap<String, Decimal>,
    starting_cash: Decimal,
    cstrategy: &Strategy,
    merged_targets: &[Target],
    gain_loss: &[GainLossRow],
    oracle: &Oracle<'_>,
    min_cash: Decimal,
    total_value: Decimal,
    cash_target_weight: Decimal,
    rank_of_lot: &BTreeMap<String, usize>,
    tlh_forced_buy_zero: &BTreeSet<String>,
    allow_rebuy_despite_loss: &BTreeSet<String>,
    tlh_pins: &[(String, Decimal)],
    tlh_buy_pins: &[(String, Decimal)],
    lock_buys: bool,
    lock_sells: bool,
) -> ScenarioOutcome {
    let min_notional_active = cstrategy.config.min_notional > Decimal::ZERO;
    let mut vars = ProblemVariables::new();
    let decision = build_decision_vars(&mut vars, buy_universe, lots, min_notional_active);

    let ctx = ConstraintContext {
        lots,
        market,
        spreads,
        starting_cash,
        config: &cstrategy.config,
        gain_loss,
        wash_sale: Some(oracle.wash_sale),
        min_cash,
        tlh_forced_buy_zero,
        allow_rebuy_despite_loss,
    };
    let mut cons = constraints::build_constraints(&mut vars, &decision, &ctx);

    if lock_buys {
        for &var in decision.buy.values() {
            cons.push(constraint!(var == 0.0));
        }
    } else {
        for (id, qty) in tlh_buy_pins {
            if let Some(&var) = decision.buy.get(id) {
                cons.push(constraint!(var == to_f64(*qty)));
            }
        }
    }
    if lock_sells {
        for &var in decision.sell.values() {
            cons.push(constraint!(var == 0.0));
        }
    } else {
        for (lot_id, qty) in tlh_pins {
            if let Some(&var) = decision.sell.get(lot_id) {
                cons.push(constraint!(var == to_f64(*qty)));
            }
        }
    }

    let obj_ctx = ObjectiveContext {
        lots,
        gain_loss,
        market,
        spreads,
        buy_universe,
        targets: merged_targets,
        total_value,
        cash_target_weight,
        factor_model: cstrategy.factor_model.as_ref(),
        weights: &cstrategy.config.weights,
        rank_of_lot,
    };
    let (objective, aux_cons) = objective::build_objective(&mut vars, &decision, &obj_ctx);
    cons.extend(aux_cons);

    let mut track: Vec<_> = decision.buy.values().copied().collect();
    track.extend(decision.sell.values().copied());

    let solved = lp::minimize(vars, objective, cons, &track);
    let decomposition = decompose(
        &decision, &solved, lots, gain_loss, market, spreads, merged_targets, total_value, cash_target_weight,
        starting_cash, cstrategy.factor_model.as_ref(),
    );

    ScenarioOutcome { status: solved.status, decision, solved, decomposition }
}

/// The public entry point: runs the full pipeline on one strategy snapshot
/// and returns its trade summary, post-trade strategy, and comparison
/// reports.
pub fn optimize(strategy: &Strategy, oracle: &Oracle<'_>) -> Result<OptimizationResult> {
    initializers::validate_lots(&strategy.lots)?;

    let gross_value = total_value(&strategy.lots, &strategy.market, strategy.cash)?;
    if strategy.config.withdrawal_amount > gross_value {
        return Err(OptimizerError::WithdrawalTooLarge {
            requested: strategy.config.withdrawal_amount.to_string(),
            available: gross_value.to_string(),
        });
    }
    if strategy.config.withdrawal_amount > Decimal::ZERO && strategy.config.strategy_type == StrategyType::Hold {
        return Err(OptimizerError::WithdrawalIncompatibleStrategy {
            strategy_type: strategy.config.strategy_type,
        });
    }

    let withdraw_fraction = if gross_value.is_zero() {
        Decimal::ZERO
    } else {
        strategy.config.withdrawal_amount / gross_value
    };
    let merged_targets =
        initializers::merge_targets(strategy.targets.clone(), strategy.config.deminimus_cash_target, withdraw_fraction)?;

    let universe = initializers::full_universe(&merged_targets, &strategy.lots);
    initializers::validate_prices(&universe, &strategy.market)?;
    let spreads = initializers::normalize_spreads(&universe, Some(&strategy.spreads));
    let buy_universe = initializers::buy_universe(&merged_targets, &strategy.lots);

    let gain_loss = gain_loss_report(&strategy.lots, &strategy.market, oracle.tax_rates)?;
    let actuals = actuals_report(&strategy.lots, &strategy.market, strategy.cash)?;
    let pre_trade_drift = drift_report(&merged_targets, &actuals);

    let cash_target_weight = merged_targets
        .iter()
        .find(|t| t.asset_class == CASH)
        .map(|t| t.target_weight)
        .unwrap_or(Decimal::ZERO);

    let deminimus_floor = strategy.config.deminimus_cash_target * gross_value;
    let target_floor = Decimal::new(975, 3) * cash_target_weight * gross_value;
    let min_cash = deminimus_floor.max(target_floor).min(strategy.cash);

    let rank_of_lot = rank_lots(&gain_loss);

    let actual_weights: BTreeMap<String, Decimal> = actuals.iter().map(|r| (r.identifier.clone(), r.weight)).collect();
    let restricted_lots: BTreeSet<String> = strategy
        .lots
        .iter()
        .filter(|l| l.age_days(strategy.market.current_date) < strategy.config.holding_time_days)
        .map(|l| l.lot_id.clone())
        .collect();

    let mut tlh_trades = Vec::new();
    if strategy.config.tlh.should_tlh {
        for target in &merged_targets {
            if target.asset_class == CASH {
                continue;
            }
            if target.identifiers.len() == 1 {
                let id = &target.identifiers[0];
                let harvests = tlh::direct_indexing_harvests(
                    id, &gain_loss, &pre_trade_drift, &merged_targets, &strategy.market, gross_value,
                    &strategy.config.tlh, strategy.config.min_notional, strategy.config.trade_rounding,
                    &restricted_lots,
                );
                tlh_trades.extend(harvests);
            } else {
                let harvests = tlh::pairs_harvest(
                    &target.asset_class, &target.identifiers, target.target_weight, &gain_loss, &actual_weights,
                    &strategy.market, gross_value, &strategy.config.tlh, strategy.config.min_notional,
                    strategy.config.trade_rounding, &restricted_lots, &BTreeSet::new(),
                    &tax_optimizer::substitutes::DefaultSubstituteUniverse::new(),
                );
                tlh_trades.extend(harvests);
            }
        }
        if !tlh_trades.is_empty() {
            info!(count = tlh_trades.len(), "tax-loss harvesting opportunities identified");
        }
    }

    let tlh_forced_buy_zero = tlh::forced_buy_zero_identifiers(&tlh_trades);
    let allow_rebuy_despite_loss = tlh::allowed_rebuy_identifiers(&tlh_trades);
    let mut tlh_pins: Vec<(String, Decimal)> = tlh_trades.iter().map(|t| (t.tax_lot_id.clone(), t.harvest_quantity)).collect();
    tlh_pins.sort();

    // Pin each pairs-TLH replacement buy to the exact share count its
    // harvested proceeds fund, so dollar-neutrality (§8 invariant 10) holds
    // structurally rather than only when the cash floor happens to agree.
    let replacement_dollars = tlh::replacement_buy_dollars(&tlh_trades);
    let mut tlh_buy_pins: Vec<(String, Decimal)> = replacement_dollars
        .into_iter()
        .filter_map(|(id, dollars)| {
            strategy.market.price(&id).filter(|p| !p.is_zero()).map(|p| (id, dollars / p))
        })
        .collect();
    tlh_buy_pins.sort();

    let no_trade = solve_scenario(
        &buy_universe, &strategy.lots, &strategy.market, &spreads, strategy.cash, strategy, &merged_targets,
        &gain_loss, oracle, min_cash, gross_value, cash_target_weight, &rank_of_lot, &BTreeSet::new(),
        &BTreeSet::new(), &[], &[], true, true,
    );

    let full = solve_scenario(
        &buy_universe, &strategy.lots, &strategy.market, &spreads, strategy.cash, strategy, &merged_targets,
        &gain_loss, oracle, min_cash, gross_value, cash_target_weight, &rank_of_lot, &tlh_forced_buy_zero,
        &allow_rebuy_despite_loss, &tlh_pins, &tlh_buy_pins, false, false,
    );

    debug!(baseline = %no_trade.decomposition.overall, full = %full.decomposition.overall, "scenario objective decompositions");

    let build_no_trade_result = |reason: NoTradeReason, improvements: Improvements| -> OptimizationResult {
        let pre_trade_gain_loss = gain_loss.clone();
        OptimizationResult {
            summary: TradeSummary {
                trades: Vec::new(),
                should_trade: false,
                scenario: Scenario::NoTrade,
                status: no_trade.status,
                before: no_trade.decomposition,
                after: no_trade.decomposition,
                improvements,
                no_trade_reason: Some(reason),
                tlh_trades: tlh_trades.clone(),
            },
            post_trade: strategy.clone(),
            reports: ComparisonReports {
                pre_trade_drift: pre_trade_drift.clone(),
                post_trade_drift: pre_trade_drift.clone(),
                pre_trade_gain_loss: pre_trade_gain_loss.clone(),
                post_trade_gain_loss: pre_trade_gain_loss,
            },
        }
    };

    if full.status != SolveStatus::Optimal {
        warn!(status = ?full.status, "full optimization did not reach an optimal solution");
        let reason = if full.status == SolveStatus::Infeasible { NoTradeReason::Infeasible } else { NoTradeReason::SolverFailure };
        let improvements = Improvements {
            full_improvement: Decimal::ZERO,
            rebalance_threshold: strategy.config.rebalance_threshold,
            buy_only_improvement: None,
            buy_threshold: strategy.config.buy_threshold,
        };
        return Ok(build_no_trade_result(reason, improvements));
    }

    let full_improvement = no_trade.decomposition.overall - full.decomposition.overall;

    let needs_fallback = match strategy.config.rebalance_threshold {
        Some(rt) => full_improvement < rt,
        None => false,
    };

    let (winning_scenario, winning_outcome, buy_only_improvement) = if needs_fallback {
        if strategy.cash < min_cash {
            info!("buy-only fallback skipped: current cash below min_cash");
            let improvements = Improvements {
                full_improvement,
                rebalance_threshold: strategy.config.rebalance_threshold,
                buy_only_improvement: None,
                buy_threshold: strategy.config.buy_threshold,
            };
            return Ok(build_no_trade_result(NoTradeReason::NotEnoughCashToBuyOnly, improvements));
        }

        let buy_only = solve_scenario(
            &buy_universe, &strategy.lots, &strategy.market, &spreads, strategy.cash, strategy, &merged_targets,
            &gain_loss, oracle, min_cash, gross_value, cash_target_weight, &rank_of_lot, &BTreeSet::new(),
            &BTreeSet::new(), &[], &[], false, true,
        );

        if buy_only.status != SolveStatus::Optimal {
            let improvements = Improvements {
                full_improvement,
                rebalance_threshold: strategy.config.rebalance_threshold,
                buy_only_improvement: None,
                buy_threshold: strategy.config.buy_threshold,
            };
            return Ok(build_no_trade_result(NoTradeReason::Infeasible, improvements));
        }

        let buy_only_improvement = no_trade.decomposition.overall - buy_only.decomposition.overall;
        let passes_buy_threshold = match strategy.config.buy_threshold {
            Some(bt) => buy_only_improvement >= bt,
            None => true,
        };
        if !passes_buy_threshold {
            let improvements = Improvements {
                full_improvement,
                rebalance_threshold: strategy.config.rebalance_threshold,
                buy_only_improvement: Some(buy_only_improvement),
                buy_threshold: strategy.config.buy_threshold,
            };
            return Ok(build_no_trade_result(NoTradeReason::BelowRebalanceThreshold, improvements));
        }

        info!(improvement = %buy_only_improvement, "accepting buy-only fallback scenario");
        (Scenario::BuyOnly, buy_only, Some(buy_only_improvement))
    } else {
        (Scenario::Full, full, None)
    };

    let scenario_kind = winning_scenario;
    let outcome = winning_outcome;
    let trades = extract_trades(
        &outcome.decision, &outcome.solved, &strategy.lots, &gain_loss, &strategy.market, strategy.config.trade_rounding,
    );

    let mut lot_seq = 0usize;
    let mut post_trade = apply_trades(strategy, &trades, |_| {
        lot_seq += 1;
        format!("TLH-{}-{}", strategy.market.current_date, lot_seq)
    });
    // A withdrawal leaves the account entirely; the cash raised to fund it
    // does not remain in the post-trade strategy's balance (§4.8).
    post_trade.cash -= strategy.config.withdrawal_amount;

    let post_actuals = actuals_report(&post_trade.lots, &post_trade.market, post_trade.cash)?;
    let post_trade_drift = drift_report(&merged_targets, &post_actuals);
    let post_trade_gain_loss = gain_loss_report(&post_trade.lots, &post_trade.market, oracle.tax_rates)?;

    let improvements = Improvements {
        full_improvement,
        rebalance_threshold: strategy.config.rebalance_threshold,
        buy_only_improvement,
        buy_threshold: strategy.config.buy_threshold,
    };

    // The winning scenario can still extract an empty trade list (e.g. the
    // accepted buy-only fallback had no cash left to deploy): every no-trade
    // outcome needs an enumerated reason (§6, §7), not a silent `None`.
    let no_trade_reason = if trades.is_empty() { Some(NoTradeReason::BelowRebalanceThreshold) } else { None };

    Ok(OptimizationResult {
        summary: TradeSummary {
            should_trade: !trades.is_empty(),
            trades,
            scenario: scenario_kind,
            status: outcome.status,
            before: no_trade.decomposition,
            after: outcome.decomposition,
            improvements,
            no_trade_reason,
            tlh_trades,
        },
        post_trade,
        reports: ComparisonReports {
            pre_trade_drift,
            post_trade_drift,
            pre_trade_gain_loss: gain_loss,
            post_trade_gain_loss,
        },
    })
}
