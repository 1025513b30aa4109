//! Decision variable construction (§4.3).
//!
//! One continuous non-negative `buy[id]` per identifier in the buy universe
//! (targets ∪ currently held non-cash), one continuous `sell[lot_id]` bounded
//! by lot quantity per tax lot. Binary indicators for the minimum-notional
//! disjunction are only created when `min_notional > 0`, keeping the LP
//! purely continuous in the common case.

use crate::model::TaxLot;
use good_lp::{variable, ProblemVariables, Variable};
use rust_decimal::prelude::ToPrimitive;
use std::collections::BTreeMap;

pub struct DecisionVars {
    pub buy: BTreeMap<String, Variable>,
    pub sell: BTreeMap<String, Variable>,
    /// Present only when minimum-notional enforcement is active.
    pub buy_indicator: BTreeMap<String, Variable>,
    pub sell_indicator: BTreeMap<String, Variable>,
}

impl DecisionVars {
    pub fn sells_for_identifier<'a>(
        &'a self,
        lots: &'a [TaxLot],
        identifier: &'a str,
    ) -> impl Iterator<Item = Variable> + 'a {
        lots.iter()
            .filter(move |l| l.identifier == identifier)
            .filter_map(move |l| self.sell.get(&l.lot_id).copied())
    }
}

pub fn build_decision_vars(
    vars: &mut ProblemVariables,
    buy_universe: &[String],
    lots: &[TaxLot],
    min_notional_active: bool,
) -> DecisionVars {
    let mut buy = BTreeMap::new();
    for id in buy_universe {
        buy.insert(id.clone(), vars.add(variable().min(0.0)));
    }

    let mut sell = BTreeMap::new();
    for lot in lots {
        let max_qty = lot.quantity.to_f64().unwrap_or(0.0).max(0.0);
        sell.insert(lot.lot_id.clone(), vars.add(variable().min(0.0).max(max_qty)));
    }

    let mut buy_indicator = BTreeMap::new();
    let mut sell_indicator = BTreeMap::new();
    if min_notional_active {
        for id in buy_universe {
            buy_indicator.insert(id.clone(), vars.add(variable().min(0.0).max(1.0).integer()));
            sell_indicator.insert(id.clone(), vars.add(variable().min(0.0).max(1.0).integer()));
        }
    }

    DecisionVars {
        buy,
        sell,
        buy_indicator,
        sell_indicator,
    }
}
