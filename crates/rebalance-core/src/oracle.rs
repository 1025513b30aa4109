//! Oracle context (§9): the cross-strategy shared state a Strategy consults
//! but never owns or mutates. Holds the wash-sale tracker and tax-rate table
//! by immutable reference; no back-pointer from Oracle to Strategy is kept,
//! matching the systems-language redesign recorded in §9.

use crate::model::TaxRateTable;
use tax_optimizer::wash_sale::WashSaleMonitor;

/// Read-only during a solve; multiple strategies may borrow the same Oracle
/// concurrently (§5), with wash-sale state updated serially only after all
/// solves complete.
pub struct Oracle<'a> {
    pub wash_sale: &'a WashSaleMonitor,
    pub tax_rates: &'a TaxRateTable,
}

impl<'a> Oracle<'a> {
    pub fn new(wash_sale: &'a WashSaleMonitor, tax_rates: &'a TaxRateTable) -> Self {
        Self { wash_sale, tax_rates }
    }
}
