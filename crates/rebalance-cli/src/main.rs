//! rebalance-cli: demonstration binary for the tax-aware rebalancing core.
//!
//! Not part of the optimization contract (§6) — a thin driver that reads a
//! JSON-encoded `Strategy` from a file, runs the optimizer with a fresh
//! in-memory wash-sale tracker, and writes the resulting `TradeSummary` as
//! JSON to stdout.
//!
//! Usage:
//!   rebalance-cli path/to/strategy.json

use rebalance_core::model::Strategy;
use rebalance_core::{optimize, Oracle};
use tax_optimizer::wash_sale::{WashSaleMonitor, WashSaleRules};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "rebalance_core=info".into()),
        )
        .init();

    let path = std::env::args().nth(1).ok_or_else(|| anyhow::anyhow!("usage: rebalance-cli <strategy.json>"))?;
    let raw = std::fs::read_to_string(&path)?;
    let strategy: Strategy = serde_json::from_str(&raw)?;

    let wash_sale = WashSaleMonitor::new(WashSaleRules::default());
    let oracle = Oracle::new(&wash_sale, &strategy.tax_rates);

    let result = optimize(&strategy, &oracle)?;

    tracing::info!(
        trades = result.summary.trades.len(),
        scenario = ?result.summary.scenario,
        "optimization complete"
    );

    println!("{}", serde_json::to_string_pretty(&result.summary)?);
    Ok(())
}
