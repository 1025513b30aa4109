//! Actuals report: aggregates lots into per-identifier market values plus the
//! CASH row, each expressed as a fraction of total portfolio value. Feeds
//! both the drift report and `total_value`.

use crate::model::{ActualRow, MarketSnapshot, TaxLot, CASH};
use crate::errors::{OptimizerError, Result};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

pub fn total_value(lots: &[TaxLot], market: &MarketSnapshot, cash: Decimal) -> Result<Decimal> {
    let mut total = cash;
    let mut seen = BTreeMap::new();
    for lot in lots {
        *seen.entry(lot.identifier.clone()).or_insert(Decimal::ZERO) += lot.quantity;
    }
    for (identifier, quantity) in seen {
        let price = market
            .price(&identifier)
            .ok_or_else(|| OptimizerError::PriceMissing(identifier.clone()))?;
        total += quantity * price;
    }
    Ok(total)
}

/// Rows are sorted by identifier, with CASH always last, to keep downstream
/// constraint emission deterministic (§5).
pub fn actuals_report(lots: &[TaxLot], market: &MarketSnapshot, cash: Decimal) -> Result<Vec<ActualRow>> {
    let mut by_identifier: BTreeMap<String, Decimal> = BTreeMap::new();
    for lot in lots {
        *by_identifier.entry(lot.identifier.clone()).or_insert(Decimal::ZERO) += lot.quantity;
    }

    let mut market_values = BTreeMap::new();
    for (identifier, quantity) in &by_identifier {
        let price = market
            .price(identifier)
            .ok_or_else(|| OptimizerError::PriceMissing(identifier.clone()))?;
        market_values.insert(identifier.clone(), *quantity * price);
    }
    market_values.insert(CASH.to_string(), cash);

    let total: Decimal = market_values.values().copied().sum();

    let mut rows: Vec<ActualRow> = market_values
        .into_iter()
        .map(|(identifier, market_value)| ActualRow {
            weight: if total.is_zero() {
                Decimal::ZERO
            } else {
                market_value / total
            },
            identifier,
            market_value,
        })
        .collect();

    rows.sort_by(|a, b| match (a.identifier.as_str(), b.identifier.as_str()) {
        (CASH, CASH) => std::cmp::Ordering::Equal,
        (CASH, _) => std::cmp::Ordering::Greater,
        (_, CASH) => std::cmp::Ordering::Less,
        (a, b) => a.cmp(b),
    });

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AssetType;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn lot(id: &str, identifier: &str, qty: Decimal) -> TaxLot {
        TaxLot {
            lot_id: id.to_string(),
            identifier: identifier.to_string(),
            quantity: qty,
            purchase_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            cost_basis: qty * dec!(100),
            asset_type: AssetType::Etf,
            account_id: "acct1".to_string(),
            cost_basis_unknown: false,
        }
    }

    #[test]
    fn weights_sum_to_one_and_cash_sorts_last() {
        let lots = vec![lot("L1", "VTI", dec!(100))];
        let mut prices = BTreeMap::new();
        prices.insert("VTI".to_string(), dec!(200));
        let market = MarketSnapshot {
            prices,
            current_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        };

        let rows = actuals_report(&lots, &market, dec!(5000)).unwrap();
        let total: Decimal = rows.iter().map(|r| r.weight).sum();
        assert_eq!(total, Decimal::ONE);
        assert_eq!(rows.last().unwrap().identifier, CASH);
    }
}
