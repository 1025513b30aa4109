//! End-to-end scenarios exercising the optimizer entry point against hand
//! constructed portfolios. Each scenario mirrors one of the worked examples
//! used to validate the two-phase solve and the tax-loss-harvesting
//! identifier.

use chrono::NaiveDate;
use rebalance_core::model::{
    AssetType, Configuration, MarketSnapshot, Strategy, Target, TaxRateTable, TlhConfig,
};
use rebalance_core::{optimize, NoTradeReason, Oracle, StrategyType, TaxLot, Trade, TradeAction};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use tax_optimizer::wash_sale::{WashSaleMonitor, WashSaleRules};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn market(prices: &[(&str, Decimal)], current_date: NaiveDate) -> MarketSnapshot {
    let mut map = BTreeMap::new();
    for (id, price) in prices {
        map.insert(id.to_string(), *price);
    }
    MarketSnapshot { prices: map, current_date }
}

fn lot(lot_id: &str, identifier: &str, quantity: Decimal, purchase_date: NaiveDate, cost_basis: Decimal) -> TaxLot {
    TaxLot {
        lot_id: lot_id.to_string(),
        identifier: identifier.to_string(),
        quantity,
        purchase_date,
        cost_basis,
        asset_type: AssetType::Etf,
        account_id: "acct-1".to_string(),
        cost_basis_unknown: false,
    }
}

fn single_target(asset_class: &str, weight: Decimal) -> Target {
    Target { asset_class: asset_class.to_string(), target_weight: weight, identifiers: vec![asset_class.to_string()] }
}

fn buys(trades: &[Trade], identifier: &str) -> Vec<&Trade> {
    trades.iter().filter(|t| t.action == TradeAction::Buy && t.identifier == identifier).collect()
}

fn sells(trades: &[Trade], identifier: &str) -> Vec<&Trade> {
    trades.iter().filter(|t| t.action == TradeAction::Sell && t.identifier == identifier).collect()
}

/// S1: an all-cash account with a single-identifier target buys in as much as
/// the cash floor allows, landing near (not exactly at) the deminimus floor.
#[test]
fn s1_empty_portfolio_buys_into_target_and_respects_cash_floor() {
    let strategy = Strategy {
        lots: vec![],
        cash: dec!(100000),
        targets: vec![single_target("VTI", dec!(1.0))],
        market: market(&[("VTI", dec!(200))], date(2024, 9, 1)),
        tax_rates: TaxRateTable(BTreeMap::new()),
        spreads: BTreeMap::new(),
        factor_model: None,
        config: Configuration { min_notional: dec!(10), ..Configuration::default() },
    };

    let wash_sale = WashSaleMonitor::new(WashSaleRules::default());
    let oracle = Oracle::new(&wash_sale, &strategy.tax_rates);
    let result = optimize(&strategy, &oracle).unwrap();

    assert!(result.summary.should_trade);
    let vti_buys = buys(&result.summary.trades, "VTI");
    assert_eq!(vti_buys.len(), 1);
    // The cash floor (deminimus 3% of the starting $100,000) caps the buy
    // near 485 shares; allow headroom for solver-level floating precision.
    assert!(vti_buys[0].quantity > dec!(480) && vti_buys[0].quantity <= dec!(485));
    assert!(result.post_trade.cash >= dec!(2900) && result.post_trade.cash <= dec!(3100));
}

/// S2: a portfolio already sitting on its target, with a rebalance threshold
/// configured, produces no trades rather than churning for zero benefit.
#[test]
fn s2_on_target_portfolio_below_rebalance_threshold_does_not_trade() {
    let strategy = Strategy {
        lots: vec![lot("L1", "VTI", dec!(100), date(2020, 1, 1), dec!(12000))],
        cash: dec!(0),
        targets: vec![single_target("VTI", dec!(1.0))],
        market: market(&[("VTI", dec!(200))], date(2024, 9, 1)),
        tax_rates: TaxRateTable(BTreeMap::new()),
        spreads: BTreeMap::new(),
        factor_model: None,
        config: Configuration { rebalance_threshold: Some(dec!(0.01)), ..Configuration::default() },
    };

    let wash_sale = WashSaleMonitor::new(WashSaleRules::default());
    let oracle = Oracle::new(&wash_sale, &strategy.tax_rates);
    let result = optimize(&strategy, &oracle).unwrap();

    assert!(result.summary.trades.is_empty());
    assert!(!result.summary.should_trade);
    assert_eq!(result.summary.no_trade_reason, Some(NoTradeReason::BelowRebalanceThreshold));
}

/// S3: a single overweight, loss-making position is direct-indexing
/// harvested down to its soft-min weight floor and nothing is bought back.
#[test]
fn s3_direct_indexing_harvest_sells_down_to_soft_min() {
    let strategy = Strategy {
        // 100 shares @ cost basis $200/share, now $150 -> -25% loss.
        lots: vec![lot("L1", "AAPL", dec!(100), date(2020, 1, 1), dec!(20000))],
        cash: dec!(0),
        targets: vec![single_target("AAPL", dec!(1.0))],
        market: market(&[("AAPL", dec!(150))], date(2024, 9, 1)),
        tax_rates: TaxRateTable(BTreeMap::new()),
        spreads: BTreeMap::new(),
        factor_model: None,
        config: Configuration { tlh: TlhConfig { should_tlh: true, ..TlhConfig::default() }, ..Configuration::default() },
    };

    let wash_sale = WashSaleMonitor::new(WashSaleRules::default());
    let oracle = Oracle::new(&wash_sale, &strategy.tax_rates);
    let result = optimize(&strategy, &oracle).unwrap();

    assert_eq!(result.summary.tlh_trades.len(), 1);
    assert_eq!(result.summary.tlh_trades[0].harvest_quantity, dec!(45));

    let aapl_sells = sells(&result.summary.trades, "AAPL");
    assert_eq!(aapl_sells.len(), 1);
    assert_eq!(aapl_sells[0].quantity, dec!(45));
    assert!(aapl_sells[0].lot_id.as_deref() == Some("L1"));
    // Wash-sale prevention plus the same-identifier TLH pin both forbid
    // buying straight back into the identifier just harvested.
    assert!(buys(&result.summary.trades, "AAPL").is_empty());

    let remaining = result.post_trade.lots.iter().find(|l| l.lot_id == "L1").unwrap();
    assert_eq!(remaining.quantity, dec!(55));
    assert_eq!(result.post_trade.cash, dec!(6750));
}

/// S4: a pairs-style asset class harvests its losing member and pins a
/// dollar-neutral replacement buy into a substantially different security,
/// never back into the identifier that was just sold.
#[test]
fn s4_pairs_tlh_harvests_losing_identifier_and_never_rebuys_it() {
    let strategy = Strategy {
        // 50 shares AAPL @ cost basis $500/share, now $400 -> -20% loss.
        lots: vec![lot("L1", "AAPL", dec!(50), date(2020, 1, 1), dec!(25000))],
        cash: dec!(0),
        targets: vec![Target {
            asset_class: "Technology".to_string(),
            target_weight: dec!(1.0),
            identifiers: vec!["AAPL".to_string(), "MSFT".to_string()],
        }],
        market: market(&[("AAPL", dec!(400)), ("MSFT", dec!(300))], date(2024, 9, 1)),
        tax_rates: TaxRateTable(BTreeMap::new()),
        spreads: BTreeMap::new(),
        factor_model: None,
        config: Configuration { tlh: TlhConfig { should_tlh: true, ..TlhConfig::default() }, ..Configuration::default() },
    };

    let wash_sale = WashSaleMonitor::new(WashSaleRules::default());
    let oracle = Oracle::new(&wash_sale, &strategy.tax_rates);
    let result = optimize(&strategy, &oracle).unwrap();

    assert_eq!(result.summary.tlh_trades.len(), 1);
    let harvest = &result.summary.tlh_trades[0];
    assert_eq!(harvest.identifier, "AAPL");
    assert_eq!(harvest.harvest_quantity, dec!(36.25));
    let replacement = harvest.replacement_buys.as_ref().unwrap();
    assert!(replacement.contains_key("MSFT"));
    assert!(!replacement.contains_key("AAPL"));

    let aapl_sells = sells(&result.summary.trades, "AAPL");
    assert_eq!(aapl_sells.len(), 1);
    assert_eq!(aapl_sells[0].quantity, dec!(36.25));
    assert!(buys(&result.summary.trades, "AAPL").is_empty());

    // Any buy this round must be into the replacement, never the harvested
    // identifier.
    for trade in result.summary.trades.iter().filter(|t| t.action == TradeAction::Buy) {
        assert_eq!(trade.identifier, "MSFT");
    }
}

/// S5: a withdrawal request liquidates exactly enough to fund it and the
/// withdrawn cash leaves the account rather than sitting in post-trade cash.
#[test]
fn s5_withdrawal_sells_exactly_enough_and_debits_the_proceeds() {
    let strategy = Strategy {
        lots: vec![lot("L1", "VTI", dec!(100), date(2020, 1, 1), dec!(12000))],
        cash: dec!(0),
        targets: vec![single_target("VTI", dec!(1.0))],
        market: market(&[("VTI", dec!(200))], date(2024, 9, 1)),
        tax_rates: TaxRateTable(BTreeMap::new()),
        spreads: BTreeMap::new(),
        factor_model: None,
        config: Configuration { withdrawal_amount: dec!(5000), ..Configuration::default() },
    };

    let wash_sale = WashSaleMonitor::new(WashSaleRules::default());
    let oracle = Oracle::new(&wash_sale, &strategy.tax_rates);
    let result = optimize(&strategy, &oracle).unwrap();

    let vti_sells = sells(&result.summary.trades, "VTI");
    assert_eq!(vti_sells.len(), 1);
    assert_eq!(vti_sells[0].quantity, dec!(25));
    assert!(buys(&result.summary.trades, "VTI").is_empty());
    assert_eq!(result.post_trade.cash, dec!(0));
}

/// S6: an open wash-sale window blocks a rebuy that would otherwise happen,
/// demonstrated against an identical portfolio with no window open.
#[test]
fn s6_wash_sale_window_blocks_an_otherwise_executed_buy() {
    let build = |wash_sale: &WashSaleMonitor| {
        let strategy = Strategy {
            lots: vec![],
            cash: dec!(100000),
            targets: vec![single_target("MSFT", dec!(1.0))],
            market: market(&[("MSFT", dec!(300))], date(2024, 9, 1)),
            tax_rates: TaxRateTable(BTreeMap::new()),
            spreads: BTreeMap::new(),
            factor_model: None,
            config: Configuration { min_notional: dec!(10), ..Configuration::default() },
        };
        let oracle = Oracle::new(wash_sale, &strategy.tax_rates);
        optimize(&strategy, &oracle).unwrap()
    };

    let clear = WashSaleMonitor::new(WashSaleRules::default());
    let clear_result = build(&clear);
    let msft_buys = buys(&clear_result.summary.trades, "MSFT");
    assert_eq!(msft_buys.len(), 1);
    assert!(msft_buys[0].quantity > Decimal::ZERO);

    let mut blocked = WashSaleMonitor::new(WashSaleRules::default());
    blocked.record_sale("MSFT".to_string(), "sale-1".to_string(), date(2024, 8, 25), dec!(1000));
    assert_eq!(blocked.is_safe_to_purchase("MSFT", date(2024, 9, 1)), tax_optimizer::wash_sale::WashSaleStatus::InWindow);

    let blocked_result = build(&blocked);
    assert!(buys(&blocked_result.summary.trades, "MSFT").is_empty());
    assert!(!blocked_result.summary.should_trade);
}

/// Invariant: a trade that withdraws never pulls more cash out than the
/// account actually has available.
#[test]
fn withdrawal_exceeding_portfolio_value_is_rejected() {
    let strategy = Strategy {
        lots: vec![lot("L1", "VTI", dec!(10), date(2020, 1, 1), dec!(1000))],
        cash: dec!(0),
        targets: vec![single_target("VTI", dec!(1.0))],
        market: market(&[("VTI", dec!(200))], date(2024, 9, 1)),
        tax_rates: TaxRateTable(BTreeMap::new()),
        spreads: BTreeMap::new(),
        factor_model: None,
        config: Configuration { withdrawal_amount: dec!(50000), ..Configuration::default() },
    };

    let wash_sale = WashSaleMonitor::new(WashSaleRules::default());
    let oracle = Oracle::new(&wash_sale, &strategy.tax_rates);
    assert!(optimize(&strategy, &oracle).is_err());
}

/// Invariant: a withdrawal request against a Hold strategy is rejected
/// outright rather than silently ignored.
#[test]
fn withdrawal_on_hold_strategy_is_rejected() {
    let strategy = Strategy {
        lots: vec![lot("L1", "VTI", dec!(10), date(2020, 1, 1), dec!(1000))],
        cash: dec!(0),
        targets: vec![single_target("VTI", dec!(1.0))],
        market: market(&[("VTI", dec!(200))], date(2024, 9, 1)),
        tax_rates: TaxRateTable(BTreeMap::new()),
        spreads: BTreeMap::new(),
        factor_model: None,
        config: Configuration {
            withdrawal_amount: dec!(500),
            strategy_type: StrategyType::Hold,
            ..Configuration::default()
        },
    };

    let wash_sale = WashSaleMonitor::new(WashSaleRules::default());
    let oracle = Oracle::new(&wash_sale, &strategy.tax_rates);
    assert!(optimize(&strategy, &oracle).is_err());
}
