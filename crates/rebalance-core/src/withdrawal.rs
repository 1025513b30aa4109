//! Max-Withdrawal Estimator (§4.9): a dedicated LP maximizing sale proceeds
//! subject to lot-availability, optional wash-sale, and optional
//! target-preservation constraints, rather than minimizing the composite
//! rebalance objective.

use crate::decision_vars::build_decision_vars;
use crate::errors::Result;
use crate::lp;
use crate::model::{GainLossRow, MarketSnapshot, Strategy, TaxLot};
use crate::trade::{extract_trades, Trade};
use good_lp::{constraint, Expression, ProblemVariables};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use tax_optimizer::wash_sale::{WashSaleMonitor, WashSaleStatus};

pub struct MaxWithdrawal {
    pub max_amount: Decimal,
    pub tax_cost: Decimal,
    pub trades: Vec<Trade>,
}

fn price_f64(market: &MarketSnapshot, identifier: &str) -> f64 {
    market.price(identifier).unwrap_or(Decimal::ZERO).to_f64().unwrap_or(0.0)
}

/// Maximizes realizable withdrawal proceeds. `preserve_drift_bound`, when
/// `Some`, caps how far any identifier's post-sale weight may fall below its
/// target (target-preservation, §4.9 clause c).
pub fn max_withdrawal(
    strategy: &Strategy,
    lots: &[TaxLot],
    gain_loss: &[GainLossRow],
    wash_sale: Option<&WashSaleMonitor>,
    preserve_drift_bound: Option<Decimal>,
) -> Result<MaxWithdrawal> {
    let mut vars = ProblemVariables::new();
    let decision = build_decision_vars(&mut vars, &[], lots, false);

    let mut proceeds = Expression::from(0.0);
    for lot in lots {
        if let Some(&sell_var) = decision.sell.get(&lot.lot_id) {
            let p = price_f64(&strategy.market, &lot.identifier);
            proceeds += sell_var * p;
        }
    }

    let mut cons = Vec::new();

    if strategy.config.holding_time_days > 0 {
        for lot in lots {
            if lot.age_days(strategy.market.current_date) < strategy.config.holding_time_days {
                if let Some(&sell_var) = decision.sell.get(&lot.lot_id) {
                    cons.push(constraint!(sell_var == 0.0));
                }
            }
        }
    }

    if strategy.config.enforce_wash_sale_prevention {
        if let Some(monitor) = wash_sale {
            let loss_lot_ids: BTreeSet<&str> = gain_loss
                .iter()
                .filter(|row| !row.cost_basis_unknown && row.tax_gain_loss_percentage < Decimal::ZERO)
                .map(|row| row.lot_id.as_str())
                .collect();
            for lot in lots {
                let identifier_blocked =
                    monitor.is_safe_to_purchase(&lot.identifier, strategy.market.current_date) != WashSaleStatus::Safe;
                if identifier_blocked && loss_lot_ids.contains(lot.lot_id.as_str()) {
                    if let Some(&sell_var) = decision.sell.get(&lot.lot_id) {
                        cons.push(constraint!(sell_var == 0.0));
                    }
                }
            }
        }
    }

    if let Some(bound) = preserve_drift_bound {
        let total_value_f = strategy
            .lots
            .iter()
            .map(|l| price_f64(&strategy.market, &l.identifier) * l.quantity.to_f64().unwrap_or(0.0))
            .sum::<f64>()
            + strategy.cash.to_f64().unwrap_or(0.0);
        if total_value_f > 0.0 {
            let mut by_identifier: std::collections::BTreeMap<&str, Expression> = std::collections::BTreeMap::new();
            for lot in lots {
                let entry = by_identifier.entry(lot.identifier.as_str()).or_insert_with(|| Expression::from(0.0));
                if let Some(&sell_var) = decision.sell.get(&lot.lot_id) {
                    let p = price_f64(&strategy.market, &lot.identifier);
                    *entry += sell_var * p;
                }
            }
            let bound_f = bound.to_f64().unwrap_or(0.0);
            for (identifier, sold_value) in by_identifier {
                let current_value: f64 = strategy
                    .lots
                    .iter()
                    .filter(|l| l.identifier == identifier)
                    .map(|l| price_f64(&strategy.market, identifier) * l.quantity.to_f64().unwrap_or(0.0))
                    .sum();
                if current_value <= 0.0 {
                    continue;
                }
                // post_weight = (current_value - sold_value) / total_value >= current_weight - bound
                let current_weight = current_value / total_value_f;
                let min_post_value = (current_weight - bound_f).max(0.0) * total_value_f;
                cons.push(constraint!(Expression::from(current_value) - sold_value >= min_post_value));
            }
        }
    }

    let track: Vec<_> = decision.sell.values().copied().collect();
    let solved = lp::maximize(vars, proceeds, cons, &track);

    if !solved.is_optimal() {
        return Ok(MaxWithdrawal {
            max_amount: Decimal::ZERO,
            tax_cost: Decimal::ZERO,
            trades: Vec::new(),
        });
    }

    let trades = extract_trades(&decision, &solved, lots, gain_loss, &strategy.market, strategy.config.trade_rounding);
    let max_amount: Decimal = trades.iter().map(|t| t.estimated_value).sum();
    let tax_cost: Decimal = trades.iter().map(|t| t.tax_impact).sum();

    Ok(MaxWithdrawal { max_amount, tax_cost, trades })
}
