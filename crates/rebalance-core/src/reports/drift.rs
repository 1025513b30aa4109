//! Drift report (§4.2): actual vs target weight per identifier, or per asset
//! class for pairs-style strategies where several identifiers share one
//! target.

use crate::model::{ActualRow, DriftKey, DriftRow, Target, CASH};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Produces one row per identifier, or one synthetic row per asset class
/// when any target groups more than one identifier (pairs-style).
pub fn drift_report(targets: &[Target], actuals: &[ActualRow]) -> Vec<DriftRow> {
    let actual_by_id: BTreeMap<&str, Decimal> = actuals
        .iter()
        .map(|r| (r.identifier.as_str(), r.weight))
        .collect();

    let is_class_style = targets.iter().any(|t| t.identifiers.len() > 1);

    let mut rows = Vec::new();
    if is_class_style {
        for t in targets {
            let actual_weight: Decimal = t
                .identifiers
                .iter()
                .map(|id| *actual_by_id.get(id.as_str()).unwrap_or(&Decimal::ZERO))
                .sum();
            rows.push(DriftRow {
                key: DriftKey::AssetClass(t.asset_class.clone()),
                actual_weight,
                target_weight: t.target_weight,
                drift: actual_weight - t.target_weight,
            });
        }
    } else {
        for t in targets {
            for id in &t.identifiers {
                let actual_weight = *actual_by_id.get(id.as_str()).unwrap_or(&Decimal::ZERO);
                rows.push(DriftRow {
                    key: DriftKey::Identifier(id.clone()),
                    actual_weight,
                    target_weight: t.target_weight,
                    drift: actual_weight - t.target_weight,
                });
            }
        }
    }

    rows.sort_by(|a, b| a.key.sort_key().cmp(b.key.sort_key()));
    rows
}

/// Looks up the drift row covering `identifier`, whether the strategy tracks
/// drift per-identifier or per-asset-class.
pub fn drift_for_identifier<'a>(
    rows: &'a [DriftRow],
    targets: &[Target],
    identifier: &str,
) -> Option<&'a DriftRow> {
    if identifier == CASH {
        return rows.iter().find(|r| r.key.sort_key() == CASH);
    }
    let class = targets
        .iter()
        .find(|t| t.identifiers.iter().any(|id| id == identifier))
        .map(|t| t.asset_class.clone());

    rows.iter().find(|r| match &r.key {
        DriftKey::Identifier(id) => id == identifier,
        DriftKey::AssetClass(class_name) => class.as_deref() == Some(class_name.as_str()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn single_identifier_targets_produce_identifier_rows() {
        let targets = vec![Target {
            asset_class: "VTI".into(),
            target_weight: dec!(1.0),
            identifiers: vec!["VTI".into()],
        }];
        let actuals = vec![ActualRow {
            identifier: "VTI".into(),
            market_value: dec!(10000),
            weight: dec!(0.9),
        }];

        let rows = drift_report(&targets, &actuals);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key, DriftKey::Identifier("VTI".into()));
        assert_eq!(rows[0].drift, dec!(-0.1));
    }

    #[test]
    fn multi_identifier_class_produces_one_aggregated_row() {
        let targets = vec![Target {
            asset_class: "S&P500".into(),
            target_weight: dec!(1.0),
            identifiers: vec!["VOO".into(), "IVV".into()],
        }];
        let actuals = vec![
            ActualRow {
                identifier: "VOO".into(),
                market_value: dec!(6000),
                weight: dec!(0.6),
            },
            ActualRow {
                identifier: "IVV".into(),
                market_value: dec!(3000),
                weight: dec!(0.3),
            },
        ];

        let rows = drift_report(&targets, &actuals);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key, DriftKey::AssetClass("S&P500".into()));
        assert_eq!(rows[0].actual_weight, dec!(0.9));
        assert_eq!(rows[0].drift, dec!(-0.1));
    }
}
