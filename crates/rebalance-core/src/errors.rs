//! Typed error taxonomy (§7). The core never logs-and-swallows; every
//! non-fatal outcome is returned as a well-formed `TradeSummary` with empty
//! trades instead, see [`crate::strategy::NoTradeReason`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("duplicate tax lot id: {0}")]
    DuplicateLotId(String),

    #[error("invalid tax lot {lot_id}: {reason}")]
    InvalidTaxLot { lot_id: String, reason: String },

    #[error("target weights sum to {sum}, expected 1")]
    TargetWeightsNotNormalized { sum: String },

    #[error("missing price for identifier {0}")]
    PriceMissing(String),

    #[error("identifier {0} referenced by a target but not in any asset class")]
    UnresolvedAssetClassIdentifier(String),

    #[error("withdrawal amount {requested} exceeds portfolio value {available}")]
    WithdrawalTooLarge { requested: String, available: String },

    #[error("withdrawal is incompatible with strategy type {strategy_type:?}")]
    WithdrawalIncompatibleStrategy {
        strategy_type: crate::model::StrategyType,
    },

    #[error("solver returned no incumbent: {0}")]
    SolverFailure(String),
}

pub type Result<T> = std::result::Result<T, OptimizerError>;
