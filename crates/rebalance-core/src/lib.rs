//! Tax-aware portfolio rebalancing optimization core.
//!
//! Accepts a [`model::Strategy`] snapshot and an [`oracle::Oracle`] context,
//! runs the two-phase solve (§4.6) with tax-loss-harvesting pre-processing
//! (§4.7), and returns a [`strategy::TradeSummary`] plus post-trade
//! comparison reports. See `SPEC_FULL.md` (kept alongside this crate's
//! workspace root) for the full component design.

pub mod constraints;
pub mod decision_vars;
pub mod errors;
pub mod initializers;
pub mod lp;
pub mod objective;
pub mod oracle;
pub mod model;
pub mod reports;
pub mod strategy;
pub mod tlh;
pub mod trade;
pub mod withdrawal;

pub use errors::{OptimizerError, Result};
pub use model::{
    ActualRow, AssetType, Configuration, DriftKey, DriftRow, FactorModel, GainLossRow, GainType,
    MarketSnapshot, Position, Strategy, StrategyType, Target, TaxLot, TaxRate, TaxRateTable,
    TlhConfig, TlhTrade, Weights, CASH,
};
pub use oracle::Oracle;
pub use strategy::{optimize, ComparisonReports, NoTradeReason, OptimizationResult, Scenario, TradeSummary};
pub use trade::{Trade, TradeAction};
pub use withdrawal::{max_withdrawal, MaxWithdrawal};
