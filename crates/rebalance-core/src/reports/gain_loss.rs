//! Gain/loss report (§4.2): one row per tax lot with unrealized gain, holding
//! period, and per-share tax liability.

use crate::errors::{OptimizerError, Result};
use crate::model::{GainLossRow, GainType, MarketSnapshot, TaxLot, TaxRateTable};
use rust_decimal::Decimal;

/// Rows are sorted by `(identifier, lot_id)` so downstream consumers (TLH
/// ranking, constraint emission) get a deterministic order without relying
/// on hash-map iteration (§5, §9).
pub fn gain_loss_report(
    lots: &[TaxLot],
    market: &MarketSnapshot,
    tax_rates: &TaxRateTable,
) -> Result<Vec<GainLossRow>> {
    let mut rows = Vec::with_capacity(lots.len());

    for lot in lots {
        let price = market
            .price(&lot.identifier)
            .ok_or_else(|| OptimizerError::PriceMissing(lot.identifier.clone()))?;

        let market_value = lot.quantity * price;
        let unrealized_gain = market_value - lot.cost_basis;
        let tax_gain_loss_percentage = if lot.cost_basis.is_zero() {
            Decimal::ZERO
        } else {
            unrealized_gain / lot.cost_basis
        };

        // A lot with unknown cost basis can't be proven to be at a loss; the
        // core treats it as long-term with unknown gain rather than silently
        // setting basis = value (resolved Open Question, §3/§11).
        let gain_type = if lot.cost_basis_unknown || lot.is_long_term(market.current_date) {
            GainType::LongTerm
        } else {
            GainType::ShortTerm
        };

        let total_rate = tax_rates
            .rate(gain_type)
            .map(|r| r.total_rate)
            .unwrap_or(Decimal::ZERO);

        let per_share_tax_liability = (price - lot.cost_basis_per_share()) * total_rate;
        let tax_liability = per_share_tax_liability * lot.quantity;

        rows.push(GainLossRow {
            lot_id: lot.lot_id.clone(),
            identifier: lot.identifier.clone(),
            quantity: lot.quantity,
            cost_basis: lot.cost_basis,
            market_value,
            tax_gain_loss_percentage,
            gain_type,
            per_share_tax_liability,
            tax_liability,
            cost_basis_unknown: lot.cost_basis_unknown,
        });
    }

    rows.sort_by(|a, b| {
        (a.identifier.as_str(), a.lot_id.as_str()).cmp(&(b.identifier.as_str(), b.lot_id.as_str()))
    });

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssetType, GainType as GT, TaxRate};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn rates() -> TaxRateTable {
        let mut map = BTreeMap::new();
        map.insert(
            GT::ShortTerm,
            TaxRate {
                gain_type: GT::ShortTerm,
                federal_rate: dec!(0.32),
                state_rate: dec!(0.05),
                total_rate: dec!(0.37),
            },
        );
        map.insert(
            GT::LongTerm,
            TaxRate {
                gain_type: GT::LongTerm,
                federal_rate: dec!(0.15),
                state_rate: dec!(0.05),
                total_rate: dec!(0.20),
            },
        );
        TaxRateTable(map)
    }

    fn market(price: Decimal, current_date: NaiveDate) -> MarketSnapshot {
        let mut prices = BTreeMap::new();
        prices.insert("AAPL".to_string(), price);
        MarketSnapshot { prices, current_date }
    }

    #[test]
    fn short_term_loss_has_negative_per_share_liability() {
        let lot = TaxLot {
            lot_id: "L1".into(),
            identifier: "AAPL".into(),
            quantity: dec!(100),
            purchase_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            cost_basis: dec!(20000),
            asset_type: AssetType::Equity,
            account_id: "acct".into(),
            cost_basis_unknown: false,
        };
        let mkt = market(dec!(150), NaiveDate::from_ymd_opt(2024, 9, 1).unwrap());

        let rows = gain_loss_report(&[lot], &mkt, &rates()).unwrap();
        let row = &rows[0];

        assert_eq!(row.gain_type, GT::ShortTerm);
        assert!(row.tax_gain_loss_percentage < Decimal::ZERO);
        assert!(row.per_share_tax_liability < Decimal::ZERO);
    }

    #[test]
    fn cost_basis_unknown_forces_long_term_regardless_of_age() {
        let lot = TaxLot {
            lot_id: "L1".into(),
            identifier: "AAPL".into(),
            quantity: dec!(10),
            purchase_date: NaiveDate::from_ymd_opt(2024, 8, 1).unwrap(),
            cost_basis: dec!(1000),
            asset_type: AssetType::Equity,
            account_id: "acct".into(),
            cost_basis_unknown: true,
        };
        let mkt = market(dec!(150), NaiveDate::from_ymd_opt(2024, 9, 1).unwrap());

        let rows = gain_loss_report(&[lot], &mkt, &rates()).unwrap();
        assert_eq!(rows[0].gain_type, GT::LongTerm);
        assert!(rows[0].cost_basis_unknown);
    }

    #[test]
    fn missing_price_is_an_error() {
        let lot = TaxLot {
            lot_id: "L1".into(),
            identifier: "MSFT".into(),
            quantity: dec!(10),
            purchase_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            cost_basis: dec!(1000),
            asset_type: AssetType::Equity,
            account_id: "acct".into(),
            cost_basis_unknown: false,
        };
        let mkt = market(dec!(150), NaiveDate::from_ymd_opt(2024, 9, 1).unwrap());

        assert!(gain_loss_report(&[lot], &mkt, &rates()).is_err());
    }
}
