//! Core data model: tax lots, targets, prices, tax rates, and the derived
//! gain/loss and drift rows built from them.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sentinel identifier for cash. Cash carries no tax lots; its market value is
/// the strategy's scalar cash balance.
pub const CASH: &str = "CASH";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetType {
    Equity,
    Etf,
    MutualFund,
    FixedIncome,
    Cash,
    Other,
}

/// An atomic parcel of shares acquired on one date at one price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxLot {
    pub lot_id: String,
    pub identifier: String,
    pub quantity: Decimal,
    pub purchase_date: NaiveDate,
    /// Total cost basis for the lot (not per-share).
    pub cost_basis: Decimal,
    pub asset_type: AssetType,
    pub account_id: String,
    /// Set by the caller when the true cost basis could not be determined
    /// upstream. Never inferred inside the core.
    pub cost_basis_unknown: bool,
}

impl TaxLot {
    pub fn cost_basis_per_share(&self) -> Decimal {
        if self.quantity.is_zero() {
            Decimal::ZERO
        } else {
            self.cost_basis / self.quantity
        }
    }

    pub fn age_days(&self, as_of: NaiveDate) -> i64 {
        (as_of - self.purchase_date).num_days()
    }

    pub fn is_long_term(&self, as_of: NaiveDate) -> bool {
        self.age_days(as_of) > 365
    }
}

/// A derived, on-demand view of all lots for one identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub identifier: String,
    pub total_quantity: Decimal,
    pub avg_cost: Decimal,
    pub current_price: Decimal,
    pub market_value: Decimal,
    pub unrealized_gain: Decimal,
}

/// A target allocation, either for one identifier or an asset class grouping
/// several identifiers considered equivalent for rebalancing purposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub asset_class: String,
    pub target_weight: Decimal,
    pub identifiers: Vec<String>,
}

/// Snapshot of identifier prices as of a given date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub prices: BTreeMap<String, Decimal>,
    pub current_date: NaiveDate,
}

impl MarketSnapshot {
    pub fn price(&self, identifier: &str) -> Option<Decimal> {
        if identifier == CASH {
            Some(Decimal::ONE)
        } else {
            self.prices.get(identifier).copied()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GainType {
    ShortTerm,
    LongTerm,
    QualifiedDividend,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TaxRate {
    pub gain_type: GainType,
    pub federal_rate: Decimal,
    pub state_rate: Decimal,
    pub total_rate: Decimal,
}

/// Resolved tax rates keyed by gain type; callers resolve these externally
/// from jurisdiction and income bracket before invoking the optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxRateTable(pub BTreeMap<GainType, TaxRate>);

impl TaxRateTable {
    pub fn rate(&self, gain_type: GainType) -> Option<&TaxRate> {
        self.0.get(&gain_type)
    }
}

/// Per-lot row produced by the gain/loss report (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GainLossRow {
    pub lot_id: String,
    pub identifier: String,
    pub quantity: Decimal,
    pub cost_basis: Decimal,
    pub market_value: Decimal,
    pub tax_gain_loss_percentage: Decimal,
    pub gain_type: GainType,
    pub per_share_tax_liability: Decimal,
    pub tax_liability: Decimal,
    pub cost_basis_unknown: bool,
}

impl GainLossRow {
    pub fn unrealized_gain(&self) -> Decimal {
        self.market_value - self.cost_basis
    }

    /// A lot is TLH-eligible only if its basis is trustworthy and it is at a
    /// loss beyond the configured threshold.
    pub fn is_tlh_eligible(&self, min_loss_threshold: Decimal) -> bool {
        !self.cost_basis_unknown && self.tax_gain_loss_percentage < -min_loss_threshold
    }
}

/// Either a single identifier or a synthetic asset-class row (used by
/// pairs-style strategies where a whole class shares one target).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriftKey {
    Identifier(String),
    AssetClass(String),
}

impl DriftKey {
    pub fn sort_key(&self) -> &str {
        match self {
            DriftKey::Identifier(id) => id,
            DriftKey::AssetClass(class) => class,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftRow {
    pub key: DriftKey,
    pub actual_weight: Decimal,
    pub target_weight: Decimal,
    pub drift: Decimal,
}

/// Per-identifier row produced by the actuals report: market value and weight
/// as a fraction of total portfolio value (including the CASH row).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActualRow {
    pub identifier: String,
    pub market_value: Decimal,
    pub weight: Decimal,
}

/// A harvest (and, for pairs, its paired replacement buy) identified before
/// the main solve and injected as pinning constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlhTrade {
    pub tax_lot_id: String,
    pub identifier: String,
    pub harvest_quantity: Decimal,
    pub loss_percentage: Decimal,
    pub potential_tax_savings: Decimal,
    pub target_weight: Decimal,
    pub current_weight: Decimal,
    pub lot_priority: usize,
    /// identifier -> dollar value of the paired replacement buy (pairs TLH only).
    pub replacement_buys: Option<BTreeMap<String, Decimal>>,
}

/// Per-identifier factor loadings plus the target exposure vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorModel {
    pub loadings: BTreeMap<String, BTreeMap<String, Decimal>>,
    pub target_exposure: BTreeMap<String, Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyType {
    TaxAware,
    PairsTlh,
    DirectIndex,
    BuyOnly,
    Hold,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Weights {
    pub tax: Decimal,
    pub drift: Decimal,
    pub transaction: Decimal,
    pub factor_model: Decimal,
    pub cash_drag: Decimal,
    pub rank_penalty_factor: Decimal,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            tax: Decimal::ONE,
            drift: Decimal::ONE,
            transaction: Decimal::ONE,
            factor_model: Decimal::ZERO,
            cash_drag: Decimal::ZERO,
            rank_penalty_factor: Decimal::ZERO,
        }
    }
}

/// TLH configuration, including the named `min_tlh_size_bps` constant that
/// replaces the original's hardcoded "50 basis points" figure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TlhConfig {
    pub should_tlh: bool,
    pub tlh_min_loss_threshold: Decimal,
    pub range_min_weight_multiplier: Decimal,
    pub range_max_weight_multiplier: Decimal,
    pub min_tlh_size_bps: Decimal,
}

impl Default for TlhConfig {
    fn default() -> Self {
        Self {
            should_tlh: false,
            tlh_min_loss_threshold: Decimal::new(15, 3), // 0.015
            range_min_weight_multiplier: Decimal::new(5, 1), // 0.5
            range_max_weight_multiplier: Decimal::new(2, 0), // 2.0
            min_tlh_size_bps: Decimal::new(50, 0),
        }
    }
}

/// Run configuration for a single optimization call (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    pub strategy_type: StrategyType,
    pub weights: Weights,
    pub rebalance_threshold: Option<Decimal>,
    pub buy_threshold: Option<Decimal>,
    pub holding_time_days: i64,
    pub min_notional: Decimal,
    pub trade_rounding: u32,
    pub enforce_wash_sale_prevention: bool,
    pub withdrawal_amount: Decimal,
    pub deminimus_cash_target: Decimal,
    pub tlh: TlhConfig,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            strategy_type: StrategyType::TaxAware,
            weights: Weights::default(),
            rebalance_threshold: None,
            buy_threshold: None,
            holding_time_days: 0,
            min_notional: Decimal::ZERO,
            trade_rounding: 4,
            enforce_wash_sale_prevention: true,
            withdrawal_amount: Decimal::ZERO,
            deminimus_cash_target: Decimal::new(3, 2), // 0.03
            tlh: TlhConfig::default(),
        }
    }
}

/// A strategy owns its own tax-lot set, cash balance, targets, and market
/// snapshot exclusively; nothing here is shared with any other strategy or
/// mutated after a solve begins (§3, §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub lots: Vec<TaxLot>,
    pub cash: Decimal,
    pub targets: Vec<Target>,
    pub market: MarketSnapshot,
    pub tax_rates: TaxRateTable,
    pub spreads: BTreeMap<String, Decimal>,
    pub factor_model: Option<FactorModel>,
    pub config: Configuration,
}

/// Normalization constants (§4.5) fixing the scale of each objective
/// component so unit-order user weights produce comparable marginal impact.
pub mod normalization {
    use rust_decimal::Decimal;

    pub fn tax() -> Decimal {
        Decimal::new(800, 0)
    }
    pub fn drift() -> Decimal {
        Decimal::new(100, 0)
    }
    pub fn transaction() -> Decimal {
        Decimal::new(1200, 0)
    }
    pub fn factor_model() -> Decimal {
        Decimal::new(60, 0)
    }
    pub fn cash_drag() -> Decimal {
        Decimal::new(50, 0)
    }
}
