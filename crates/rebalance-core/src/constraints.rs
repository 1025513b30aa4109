//! Constraints Manager (§4.4): cash floor, lot availability, minimum
//! notional, holding-period restriction, wash-sale prevention, and the
//! withdrawal equality.

use crate::decision_vars::DecisionVars;
use crate::model::{Configuration, GainLossRow, MarketSnapshot, StrategyType, TaxLot, CASH};
use good_lp::{constraint, variable, Constraint, Expression, ProblemVariables};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use tax_optimizer::wash_sale::{WashSaleMonitor, WashSaleStatus};

/// A conservative big-M bound on notional value, large enough never to bind
/// in realistic portfolios while keeping the min-notional disjunction sound.
const BIG_M: f64 = 1.0e9;

/// Everything the constraints manager needs to assemble one scenario's rows.
/// Constructed once per scenario by the optimizer driver (§4.6) so no-trade,
/// full, and buy-only scenarios can each pass their own variant (e.g.
/// buy-only zeroes `sell` bounds upstream in decision variable construction).
pub struct ConstraintContext<'a> {
    pub lots: &'a [TaxLot],
    pub market: &'a MarketSnapshot,
    pub spreads: &'a BTreeMap<String, Decimal>,
    pub starting_cash: Decimal,
    pub config: &'a Configuration,
    pub gain_loss: &'a [GainLossRow],
    pub wash_sale: Option<&'a WashSaleMonitor>,
    pub min_cash: Decimal,
    /// Identifiers pinned to buy[id] = 0 by TLH same-identifier rebuy
    /// prevention (§4.7), minus any identifier that is itself a pairs
    /// replacement target.
    pub tlh_forced_buy_zero: &'a BTreeSet<String>,
    /// Identifiers allowed to be bought despite a same-optimization loss sale
    /// because they are a pairs-TLH replacement target (§8 invariant 3 corner
    /// case).
    pub allow_rebuy_despite_loss: &'a BTreeSet<String>,
}

fn half_spread(spreads: &BTreeMap<String, Decimal>, identifier: &str) -> f64 {
    spreads
        .get(identifier)
        .copied()
        .unwrap_or(Decimal::ZERO)
        .to_f64()
        .unwrap_or(0.0)
}

fn price_f64(market: &MarketSnapshot, identifier: &str) -> f64 {
    market.price(identifier).unwrap_or(Decimal::ZERO).to_f64().unwrap_or(0.0)
}

pub fn build_constraints(
    problem_vars: &mut ProblemVariables,
    vars: &DecisionVars,
    ctx: &ConstraintContext,
) -> Vec<Constraint> {
    let mut cons = Vec::new();

    // 1. Cash floor: ending_cash >= min_cash.
    let mut ending_cash = Expression::from(ctx.starting_cash.to_f64().unwrap_or(0.0));
    for lot in ctx.lots {
        if let Some(&sell_var) = vars.sell.get(&lot.lot_id) {
            let p = price_f64(ctx.market, &lot.identifier);
            let hs = half_spread(ctx.spreads, &lot.identifier);
            ending_cash += sell_var * (p * (1.0 - hs));
        }
    }
    for (id, &buy_var) in &vars.buy {
        let p = price_f64(ctx.market, id);
        let hs = half_spread(ctx.spreads, id);
        ending_cash -= buy_var * (p * (1.0 + hs));
    }
    let min_cash_f = ctx.min_cash.to_f64().unwrap_or(0.0);
    cons.push(constraint!(ending_cash.clone() >= min_cash_f));

    // 2. Lot availability is enforced as each sell[lot]'s variable upper
    // bound (decision_vars.rs); no separate row is needed here.

    // 3. Minimum notional: disjunction via binary indicator + big-M, only
    // when indicators were actually constructed (config.min_notional > 0).
    if !vars.buy_indicator.is_empty() {
        let min_notional = ctx.config.min_notional.to_f64().unwrap_or(0.0);
        for (id, &buy_var) in &vars.buy {
            if let Some(&indicator) = vars.buy_indicator.get(id) {
                let p = price_f64(ctx.market, id);
                let notional = buy_var * p;
                cons.push(constraint!(notional.clone() <= BIG_M * indicator));
                cons.push(constraint!(notional >= min_notional * indicator));
            }
        }
        for id in vars.buy.keys() {
            if let Some(&indicator) = vars.sell_indicator.get(id) {
                let sells: Expression = vars
                    .sells_for_identifier(ctx.lots, id)
                    .fold(Expression::from(0.0), |acc, v| acc + v);
                let p = price_f64(ctx.market, id);
                let notional = sells * p;
                cons.push(constraint!(notional.clone() <= BIG_M * indicator));
                cons.push(constraint!(notional >= min_notional * indicator));
            }
        }
    }

    // 4. Holding-period restriction: force sell[lot] = 0 for lots younger
    // than holding_time_days.
    if ctx.config.holding_time_days > 0 {
        for lot in ctx.lots {
            if lot.age_days(ctx.market.current_date) < ctx.config.holding_time_days {
                if let Some(&sell_var) = vars.sell.get(&lot.lot_id) {
                    cons.push(constraint!(sell_var == 0.0));
                }
            }
        }
    }

    // 5. Wash-sale prevention: no BUY of an identifier whose last loss-close
    // is still within the window, and no BUY of an identifier that has a
    // loss lot actually being sold in *this* optimization, unless it is
    // whitelisted as a pairs-TLH replacement target.
    if ctx.config.enforce_wash_sale_prevention {
        if let Some(monitor) = ctx.wash_sale {
            for (id, &buy_var) in &vars.buy {
                if monitor.is_safe_to_purchase(id, ctx.market.current_date) != WashSaleStatus::Safe {
                    cons.push(constraint!(buy_var == 0.0));
                }
            }
        }

        // Block buy[X] only if a loss lot of X is actually being sold in this
        // optimization (§4.4.5), not merely held at a paper loss. "Sold at a
        // loss implies no rebuy" is an implication, not a bound, so it needs a
        // binary indicator and big-M rather than an unconditional zero.
        let mut loss_sell_by_id: BTreeMap<&str, Expression> = BTreeMap::new();
        for row in ctx.gain_loss {
            if row.cost_basis_unknown || row.tax_gain_loss_percentage >= Decimal::ZERO {
                continue;
            }
            if let Some(&sell_var) = vars.sell.get(&row.lot_id) {
                let entry = loss_sell_by_id
                    .entry(row.identifier.as_str())
                    .or_insert_with(|| Expression::from(0.0));
                *entry += sell_var * 1.0;
            }
        }
        for (id, loss_sell_expr) in loss_sell_by_id {
            if ctx.allow_rebuy_despite_loss.contains(id) {
                continue;
            }
            if let Some(&buy_var) = vars.buy.get(id) {
                let sold_at_loss = problem_vars.add(variable().min(0.0).max(1.0).integer());
                cons.push(constraint!(loss_sell_expr.clone() <= BIG_M * sold_at_loss));
                let mut rebuy_block = Expression::from(0.0);
                rebuy_block += buy_var * 1.0;
                rebuy_block += sold_at_loss * BIG_M;
                cons.push(constraint!(rebuy_block <= BIG_M));
            }
        }
    }

    for id in ctx.tlh_forced_buy_zero {
        if let Some(&buy_var) = vars.buy.get(id) {
            cons.push(constraint!(buy_var == 0.0));
        }
    }

    // 6. Withdrawal: net proceeds must equal the withdrawal target; no buys
    // are permitted except as required to rebalance within an asset-class
    // equivalence set (pairs-style strategies, which pin their own buys via
    // TLH replacement and are exempted here).
    if ctx.config.withdrawal_amount > Decimal::ZERO {
        let mut net_proceeds = Expression::from(0.0);
        for lot in ctx.lots {
            if let Some(&sell_var) = vars.sell.get(&lot.lot_id) {
                let p = price_f64(ctx.market, &lot.identifier);
                let hs = half_spread(ctx.spreads, &lot.identifier);
                net_proceeds += sell_var * (p * (1.0 - hs));
            }
        }
        for (id, &buy_var) in &vars.buy {
            let p = price_f64(ctx.market, id);
            let hs = half_spread(ctx.spreads, id);
            net_proceeds -= buy_var * (p * (1.0 + hs));
        }
        let withdrawal = ctx.config.withdrawal_amount.to_f64().unwrap_or(0.0);
        cons.push(constraint!(net_proceeds == withdrawal));

        if ctx.config.strategy_type != StrategyType::PairsTlh {
            for (id, &buy_var) in &vars.buy {
                if id != CASH {
                    cons.push(constraint!(buy_var == 0.0));
                }
            }
        }
    }

    cons
}
