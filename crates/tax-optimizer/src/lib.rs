//! Tax Optimizer
//!
//! Wash-sale window tracking and substitute-security lookup shared by the
//! rebalancing engine's tax-loss-harvesting logic. Jurisdiction-specific tax-rate
//! computation is not this crate's concern — callers supply realized tax rates as
//! input (see `rebalance-core`).

pub mod substitutes;
pub mod wash_sale;

pub use substitutes::{
    CorrelationScore, DefaultSubstituteUniverse, SubstituteConfig, SubstituteSecurity,
    SubstituteType, SubstituteUniverse,
};
pub use wash_sale::{
    WashSaleCalendar, WashSaleMonitor, WashSaleRules, WashSaleStatus, WashSaleSummary,
    WashSaleViolation, WashSaleWindow,
};
