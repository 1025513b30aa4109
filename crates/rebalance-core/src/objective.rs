//! Objective Manager (§4.5): assembles the composite linear objective from
//! weighted tax, drift, transaction, factor-model, cash-drag, and rank
//! penalty terms.
//!
//! Absolute-value and max(0, x) terms are linearized with the standard
//! epigraph trick: introduce a non-negative auxiliary variable `aux`,
//! constrain `aux >= x` (and, for absolute value, `aux2 >= -x`), and minimize
//! `aux` (+ `aux2`). Because the objective only ever adds these auxiliaries
//! with a positive coefficient, the solver drives them down to exactly
//! `|x|`/`max(0, x)` at the optimum. Reported objective *decomposition*
//! values (for the trade summary) are recomputed directly from the solved
//! buy/sell quantities rather than read back from these auxiliaries, so
//! reporting is exact rather than solver-approximate.

use crate::decision_vars::DecisionVars;
use crate::model::{normalization, FactorModel, GainLossRow, MarketSnapshot, TaxLot, Target, Weights};
use good_lp::{constraint, Constraint, Expression, ProblemVariables, Variable};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

pub struct ObjectiveContext<'a> {
    pub lots: &'a [TaxLot],
    pub gain_loss: &'a [GainLossRow],
    pub market: &'a MarketSnapshot,
    pub spreads: &'a BTreeMap<String, Decimal>,
    pub buy_universe: &'a [String],
    pub targets: &'a [Target],
    pub total_value: Decimal,
    pub cash_target_weight: Decimal,
    pub factor_model: Option<&'a FactorModel>,
    pub weights: &'a Weights,
    /// lot_id -> priority rank (0 = most tax-preferred to sell first),
    /// derived from ascending `per_share_tax_liability` order (§4.7's lot
    /// priority, reused here for the optional rank-penalty term).
    pub rank_of_lot: &'a BTreeMap<String, usize>,
}

fn to_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

/// Builds the objective expression plus whatever auxiliary constraints its
/// linearizations need. The returned constraints must be folded into the
/// same scenario's constraint list before solving.
pub fn build_objective(
    vars: &mut ProblemVariables,
    decision: &DecisionVars,
    ctx: &ObjectiveContext,
) -> (Expression, Vec<Constraint>) {
    let mut obj = Expression::from(0.0);
    let mut cons = Vec::new();

    let tax_norm = to_f64(normalization::tax());
    let drift_norm = to_f64(normalization::drift());
    let txn_norm = to_f64(normalization::transaction());
    let factor_norm = to_f64(normalization::factor_model());
    let cash_norm = to_f64(normalization::cash_drag());

    let w_tax = to_f64(ctx.weights.tax);
    let w_drift = to_f64(ctx.weights.drift);
    let w_txn = to_f64(ctx.weights.transaction);
    let w_factor = to_f64(ctx.weights.factor_model);
    let w_cash = to_f64(ctx.weights.cash_drag);
    let w_rank = to_f64(ctx.weights.rank_penalty_factor);

    // Tax cost: Σ sell[lot] * per_share_tax_liability, scaled.
    if w_tax != 0.0 {
        for row in ctx.gain_loss {
            if let Some(&sell_var) = decision.sell.get(&row.lot_id) {
                let coeff = to_f64(row.per_share_tax_liability) * tax_norm * w_tax;
                if coeff != 0.0 {
                    obj += sell_var * coeff;
                }
            }
        }
    }

    // Transaction cost: half-spread on both buys and sells.
    if w_txn != 0.0 {
        for (id, &buy_var) in &decision.buy {
            let price = to_f64(ctx.market.price(id).unwrap_or(Decimal::ZERO));
            let hs = to_f64(ctx.spreads.get(id).copied().unwrap_or(Decimal::ZERO));
            let coeff = price * hs * txn_norm * w_txn;
            if coeff != 0.0 {
                obj += buy_var * coeff;
            }
        }
        for lot in ctx.lots {
            if let Some(&sell_var) = decision.sell.get(&lot.lot_id) {
                let price = to_f64(ctx.market.price(&lot.identifier).unwrap_or(Decimal::ZERO));
                let hs = to_f64(ctx.spreads.get(&lot.identifier).copied().unwrap_or(Decimal::ZERO));
                let coeff = price * hs * txn_norm * w_txn;
                if coeff != 0.0 {
                    obj += sell_var * coeff;
                }
            }
        }
    }

    // Drift cost: per identifier, |post_trade_weight - target_weight|.
    let total_value_f = to_f64(ctx.total_value);
    if w_drift != 0.0 && total_value_f > 0.0 {
        let target_by_id: BTreeMap<&str, f64> = ctx
            .targets
            .iter()
            .flat_map(|t| t.identifiers.iter().map(move |id| (id.as_str(), to_f64(t.target_weight))))
            .collect();

        for id in ctx.buy_universe {
            let current_qty: Decimal = ctx.lots.iter().filter(|l| &l.identifier == id).map(|l| l.quantity).sum();
            let price = to_f64(ctx.market.price(id).unwrap_or(Decimal::ZERO));
            let current_value = to_f64(current_qty) * price;
            let target = *target_by_id.get(id.as_str()).unwrap_or(&0.0);

            let sells_for_id: Expression = decision
                .sells_for_identifier(ctx.lots, id)
                .fold(Expression::from(0.0), |acc, v| acc + v);

            let mut post_weight_minus_target: Expression =
                Expression::from(current_value / total_value_f - target);
            if let Some(&buy_var) = decision.buy.get(id) {
                post_weight_minus_target += buy_var * (price / total_value_f);
            }
            post_weight_minus_target += sells_for_id * (-price / total_value_f);

            let (over, under) = add_abs_value_epigraph(vars, &mut cons, post_weight_minus_target);
            obj += over * (drift_norm * w_drift);
            obj += under * (drift_norm * w_drift);
        }
    }

    // Factor-model cost: |post_trade_exposure[f] - target_exposure[f]| per factor.
    if w_factor != 0.0 {
        if let Some(factor_model) = ctx.factor_model {
            if total_value_f > 0.0 {
                for (factor, target_exposure) in &factor_model.target_exposure {
                    let mut exposure_expr = Expression::from(0.0);
                    for id in ctx.buy_universe {
                        let loading = factor_model
                            .loadings
                            .get(id)
                            .and_then(|row| row.get(factor))
                            .copied()
                            .unwrap_or(Decimal::ZERO);
                        if loading.is_zero() {
                            continue;
                        }
                        let loading_f = to_f64(loading);
                        let current_qty: Decimal =
                            ctx.lots.iter().filter(|l| &l.identifier == id).map(|l| l.quantity).sum();
                        let price = to_f64(ctx.market.price(id).unwrap_or(Decimal::ZERO));
                        let current_value = to_f64(current_qty) * price;

                        let sells_for_id: Expression = decision
                            .sells_for_identifier(ctx.lots, id)
                            .fold(Expression::from(0.0), |acc, v| acc + v);

                        exposure_expr += Expression::from(loading_f * current_value / total_value_f);
                        if let Some(&buy_var) = decision.buy.get(id) {
                            exposure_expr += buy_var * (loading_f * price / total_value_f);
                        }
                        exposure_expr += sells_for_id * (-loading_f * price / total_value_f);
                    }

                    let diff = exposure_expr - to_f64(*target_exposure);
                    let (over, under) = add_abs_value_epigraph(vars, &mut cons, diff);
                    obj += over * (factor_norm * w_factor);
                    obj += under * (factor_norm * w_factor);
                }
            }
        }
    }

    // Cash drag: max(0, ending_cash - cash_target).
    if w_cash != 0.0 && total_value_f > 0.0 {
        let cash_target_value = to_f64(ctx.cash_target_weight) * total_value_f;
        let mut ending_cash = Expression::from(0.0);
        // Recomputed independently of the cash-floor constraint's expression
        // so this module stays decoupled from constraints.rs.
        for lot in ctx.lots {
            if let Some(&sell_var) = decision.sell.get(&lot.lot_id) {
                let price = to_f64(ctx.market.price(&lot.identifier).unwrap_or(Decimal::ZERO));
                let hs = to_f64(ctx.spreads.get(&lot.identifier).copied().unwrap_or(Decimal::ZERO));
                ending_cash += sell_var * (price * (1.0 - hs));
            }
        }
        for (id, &buy_var) in &decision.buy {
            let price = to_f64(ctx.market.price(id).unwrap_or(Decimal::ZERO));
            let hs = to_f64(ctx.spreads.get(id).copied().unwrap_or(Decimal::ZERO));
            ending_cash -= buy_var * (price * (1.0 + hs));
        }

        let excess = ending_cash - cash_target_value;
        let cash_drag_over = vars.add(good_lp::variable().min(0.0));
        cons.push(constraint!(cash_drag_over >= excess));
        obj += cash_drag_over * (cash_norm * w_cash);
    }

    // Rank penalty (optional): breaks ties toward selling tax-preferred lots
    // first; purely linear, no auxiliary variables needed.
    if w_rank != 0.0 {
        for row in ctx.gain_loss {
            if let (Some(&sell_var), Some(&rank)) =
                (decision.sell.get(&row.lot_id), ctx.rank_of_lot.get(&row.lot_id))
            {
                obj += sell_var * (w_rank * rank as f64);
            }
        }
    }

    (obj, cons)
}

/// Adds `over >= expr`, `under >= -expr`, `over, under >= 0` and returns the
/// pair; minimizing `over + under` in the caller's objective yields `|expr|`.
fn add_abs_value_epigraph(
    vars: &mut ProblemVariables,
    cons: &mut Vec<Constraint>,
    expr: Expression,
) -> (Variable, Variable) {
    let over = vars.add(good_lp::variable().min(0.0));
    let under = vars.add(good_lp::variable().min(0.0));
    cons.push(constraint!(over >= expr.clone()));
    cons.push(constraint!(under >= -expr));
    (over, under)
}
