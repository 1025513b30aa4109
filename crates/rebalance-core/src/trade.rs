//! Trade extraction & application (§4.8).
//!
//! Converts a solved scenario's decision-variable values into an ordered,
//! deterministic trade list, and applies that list to a pre-trade `Strategy`
//! to produce the post-trade snapshot used for comparative reporting.

use crate::decision_vars::DecisionVars;
use crate::model::{GainLossRow, MarketSnapshot, Strategy, TaxLot, CASH};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeAction {
    Buy,
    Sell,
}

/// A single emitted instruction (§6 Outputs: Trades).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub identifier: String,
    pub action: TradeAction,
    pub quantity: Decimal,
    pub estimated_price: Decimal,
    pub estimated_value: Decimal,
    pub tax_impact: Decimal,
    pub lot_id: Option<String>,
}

fn rounded_qty(raw: f64, trade_rounding: u32) -> Decimal {
    let d = Decimal::from_f64(raw).unwrap_or(Decimal::ZERO);
    d.round_dp_with_strategy(trade_rounding, rust_decimal::RoundingStrategy::ToZero)
}

/// Pulls non-zero buy/sell values out of a solved scenario, in lexicographic
/// (identifier, lot_id) order (§5, §9) so trade lists are reproducible
/// independent of hash-map iteration order.
pub fn extract_trades(
    decision: &DecisionVars,
    solved: &crate::lp::SolvedScenario,
    lots: &[TaxLot],
    gain_loss: &[GainLossRow],
    market: &MarketSnapshot,
    trade_rounding: u32,
) -> Vec<Trade> {
    let mut trades = Vec::new();

    let mut sell_lot_ids: Vec<&String> = decision.sell.keys().collect();
    sell_lot_ids.sort();
    for lot_id in sell_lot_ids {
        let &var = decision.sell.get(lot_id).unwrap();
        let qty = rounded_qty(solved.value(var), trade_rounding);
        if qty <= Decimal::ZERO {
            continue;
        }
        let lot = match lots.iter().find(|l| &l.lot_id == lot_id) {
            Some(l) => l,
            None => continue,
        };
        let price = market.price(&lot.identifier).unwrap_or(Decimal::ZERO);
        let per_share_tax = gain_loss
            .iter()
            .find(|row| &row.lot_id == lot_id)
            .map(|row| row.per_share_tax_liability)
            .unwrap_or(Decimal::ZERO);

        trades.push(Trade {
            identifier: lot.identifier.clone(),
            action: TradeAction::Sell,
            quantity: qty,
            estimated_price: price,
            estimated_value: qty * price,
            tax_impact: qty * per_share_tax,
            lot_id: Some(lot_id.clone()),
        });
    }

    let mut buy_ids: Vec<&String> = decision.buy.keys().collect();
    buy_ids.sort();
    for id in buy_ids {
        let &var = decision.buy.get(id).unwrap();
        let qty = rounded_qty(solved.value(var), trade_rounding);
        if qty <= Decimal::ZERO {
            continue;
        }
        let price = market.price(id).unwrap_or(Decimal::ZERO);
        trades.push(Trade {
            identifier: id.clone(),
            action: TradeAction::Buy,
            quantity: qty,
            estimated_price: price,
            estimated_value: qty * price,
            tax_impact: Decimal::ZERO,
            lot_id: None,
        });
    }

    trades
}

/// A full snapshot equivalent to the input strategy after applying trades
/// (§6 Outputs: PostTradeStrategy); usable as the input to a subsequent call.
pub type PostTradeStrategy = Strategy;

/// Applies `trades` to `pre_trade`: SELL decrements (and may split) lots,
/// BUY creates a new lot dated `pre_trade.market.current_date`. Cash moves by
/// net proceeds at `estimated_price`, ignoring spread (spread is already
/// priced into the objective's transaction-cost term, not into settlement).
pub fn apply_trades(pre_trade: &Strategy, trades: &[Trade], next_lot_id: impl Fn(usize) -> String) -> PostTradeStrategy {
    let mut lots = pre_trade.lots.clone();
    let mut cash = pre_trade.cash;
    let current_date = pre_trade.market.current_date;
    let mut new_lot_counter = 0usize;

    for trade in trades {
        match trade.action {
            TradeAction::Sell => {
                let lot_id = trade.lot_id.as_deref().unwrap_or_default();
                if let Some(lot) = lots.iter_mut().find(|l| l.lot_id == lot_id) {
                    let sold_fraction = if lot.quantity.is_zero() {
                        Decimal::ZERO
                    } else {
                        trade.quantity / lot.quantity
                    };
                    let basis_sold = lot.cost_basis * sold_fraction;
                    lot.quantity -= trade.quantity;
                    lot.cost_basis -= basis_sold;
                }
                cash += trade.estimated_value;
            }
            TradeAction::Buy => {
                if trade.identifier == CASH {
                    continue;
                }
                lots.push(TaxLot {
                    lot_id: next_lot_id(new_lot_counter),
                    identifier: trade.identifier.clone(),
                    quantity: trade.quantity,
                    purchase_date: current_date,
                    cost_basis: trade.estimated_value,
                    asset_type: pre_trade
                        .lots
                        .iter()
                        .find(|l| l.identifier == trade.identifier)
                        .map(|l| l.asset_type)
                        .unwrap_or(crate::model::AssetType::Equity),
                    account_id: pre_trade
                        .lots
                        .iter()
                        .find(|l| l.identifier == trade.identifier)
                        .map(|l| l.account_id.clone())
                        .unwrap_or_default(),
                    cost_basis_unknown: false,
                });
                new_lot_counter += 1;
                cash -= trade.estimated_value;
            }
        }
    }

    lots.retain(|l| l.quantity > Decimal::ZERO);

    let mut post = pre_trade.clone();
    post.lots = lots;
    post.cash = cash;
    post
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssetType, Configuration, MarketSnapshot, Target, TaxRateTable};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn base_strategy() -> Strategy {
        let mut prices = BTreeMap::new();
        prices.insert("VTI".to_string(), dec!(200));
        Strategy {
            lots: vec![TaxLot {
                lot_id: "L1".into(),
                identifier: "VTI".into(),
                quantity: dec!(100),
                purchase_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
                cost_basis: dec!(12000),
                asset_type: AssetType::Etf,
                account_id: "acct".into(),
                cost_basis_unknown: false,
            }],
            cash: dec!(0),
            targets: vec![Target {
                asset_class: "VTI".into(),
                target_weight: dec!(1.0),
                identifiers: vec!["VTI".into()],
            }],
            market: MarketSnapshot { prices, current_date: NaiveDate::from_ymd_opt(2024, 9, 1).unwrap() },
            tax_rates: TaxRateTable(BTreeMap::new()),
            spreads: BTreeMap::new(),
            factor_model: None,
            config: Configuration::default(),
        }
    }

    #[test]
    fn partial_sell_splits_lot_and_preserves_basis_proportionally() {
        let strategy = base_strategy();
        let trades = vec![Trade {
            identifier: "VTI".into(),
            action: TradeAction::Sell,
            quantity: dec!(25),
            estimated_price: dec!(200),
            estimated_value: dec!(5000),
            tax_impact: dec!(500),
            lot_id: Some("L1".into()),
        }];

        let post = apply_trades(&strategy, &trades, |i| format!("NEW{i}"));
        assert_eq!(post.cash, dec!(5000));
        let remaining = &post.lots[0];
        assert_eq!(remaining.quantity, dec!(75));
        assert_eq!(remaining.cost_basis, dec!(9000));
    }

    #[test]
    fn buy_creates_new_lot_and_debits_cash() {
        let mut strategy = base_strategy();
        strategy.cash = dec!(10000);
        let trades = vec![Trade {
            identifier: "VTI".into(),
            action: TradeAction::Buy,
            quantity: dec!(10),
            estimated_price: dec!(200),
            estimated_value: dec!(2000),
            tax_impact: dec!(0),
            lot_id: None,
        }];

        let post = apply_trades(&strategy, &trades, |i| format!("NEW{i}"));
        assert_eq!(post.cash, dec!(8000));
        assert_eq!(post.lots.len(), 2);
        assert!(post.lots.iter().any(|l| l.lot_id == "NEW0"));
    }
}
