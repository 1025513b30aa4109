//! Substitute-security lookup for Pairs TLH.
//!
//! Pairs-style harvesting (spec §4.7) needs to know whether a candidate replacement
//! is "substantially different" from the identifier being harvested — a true
//! share-class twin (GOOGL/GOOG, BRK.A/BRK.B) is never an acceptable replacement even
//! though it is nominally a distinct ticker. Competing index funds that track the same
//! benchmark from different issuers (SPY/VOO/IVV) are *not* substantially identical —
//! swapping one for another is the textbook pairs-TLH trade. [`SubstituteUniverse`] is
//! the pluggable interface;
//! [`DefaultSubstituteUniverse`] is a small reference dataset used by tests and the
//! demonstration CLI, not a production security-reference source (that is an external
//! collaborator per the core's interface boundary).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubstituteType {
    SectorETF,
    Competitor,
    IndexFund,
    ShareClass,
    Leveraged,
    FixedIncome,
}

impl std::fmt::Display for SubstituteType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubstituteType::SectorETF => write!(f, "Sector ETF"),
            SubstituteType::Competitor => write!(f, "Competitor"),
            SubstituteType::IndexFund => write!(f, "Index Fund"),
            SubstituteType::ShareClass => write!(f, "Share Class"),
            SubstituteType::Leveraged => write!(f, "Leveraged"),
            SubstituteType::FixedIncome => write!(f, "Fixed Income"),
        }
    }
}

/// Composite similarity score; `overall` close to 1.0 signals "substantially identical".
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CorrelationScore {
    pub correlation: f64,
    pub beta_similarity: f64,
    pub sector_overlap: f64,
    pub overall: f64,
}

impl CorrelationScore {
    pub fn calculate(correlation: f64, beta_similarity: f64, sector_overlap: f64) -> Self {
        Self {
            correlation,
            beta_similarity,
            sector_overlap,
            overall: correlation * 0.5 + beta_similarity * 0.3 + sector_overlap * 0.2,
        }
    }

    pub fn identical() -> Self {
        Self {
            correlation: 1.0,
            beta_similarity: 1.0,
            sector_overlap: 1.0,
            overall: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubstituteSecurity {
    pub identifier: String,
    pub name: String,
    pub substitute_type: SubstituteType,
    pub correlation: CorrelationScore,
    pub expense_ratio: Option<f64>,
    pub wash_sale_safe: bool,
    pub reason: String,
    pub risk_comparison: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubstituteConfig {
    pub min_correlation: f64,
    pub max_expense_ratio: f64,
    pub include_leveraged: bool,
    pub max_substitutes: usize,
}

impl Default for SubstituteConfig {
    fn default() -> Self {
        Self {
            min_correlation: 0.7,
            max_expense_ratio: 0.50,
            include_leveraged: false,
            max_substitutes: 5,
        }
    }
}

/// A source of candidate replacement securities for TLH pairs.
pub trait SubstituteUniverse {
    fn find_substitutes(&self, identifier: &str) -> Vec<SubstituteSecurity>;

    fn is_substantially_identical(&self, a: &str, b: &str) -> bool {
        a == b
    }

    fn best_substitute(&self, identifier: &str) -> Option<SubstituteSecurity> {
        self.find_substitutes(identifier).into_iter().next()
    }
}

/// A small, hardcoded reference universe. Adequate for tests and the demonstration
/// CLI; real deployments supply their own [`SubstituteUniverse`] backed by a
/// correlation/reference-data service.
pub struct DefaultSubstituteUniverse {
    config: SubstituteConfig,
    db: SubstitutesDatabase,
}

impl DefaultSubstituteUniverse {
    pub fn new() -> Self {
        Self {
            config: SubstituteConfig::default(),
            db: SubstitutesDatabase::default(),
        }
    }

    pub fn with_config(config: SubstituteConfig) -> Self {
        Self {
            config,
            db: SubstitutesDatabase::default(),
        }
    }
}

impl Default for DefaultSubstituteUniverse {
    fn default() -> Self {
        Self::new()
    }
}

impl SubstituteUniverse for DefaultSubstituteUniverse {
    fn find_substitutes(&self, identifier: &str) -> Vec<SubstituteSecurity> {
        let mut substitutes = Vec::new();

        if let Some(predefined) = self.db.get_substitutes(identifier) {
            substitutes.extend(predefined);
        }

        if let Some(sector) = self.db.get_sector(identifier) {
            if let Some(sector_etf) = self.db.get_sector_etf(sector) {
                if sector_etf != identifier {
                    substitutes.push(SubstituteSecurity {
                        identifier: sector_etf.to_string(),
                        name: format!("{sector} Sector ETF"),
                        substitute_type: SubstituteType::SectorETF,
                        correlation: CorrelationScore::calculate(0.85, 0.80, 1.0),
                        expense_ratio: Some(0.10),
                        wash_sale_safe: true,
                        reason: format!("Broad {sector} sector exposure"),
                        risk_comparison: "Similar market risk, less single-stock risk".to_string(),
                    });
                }
            }
        }

        substitutes.retain(|s| {
            s.correlation.overall >= self.config.min_correlation
                && s.expense_ratio
                    .is_none_or(|e| e <= self.config.max_expense_ratio)
                && (self.config.include_leveraged || s.substitute_type != SubstituteType::Leveraged)
        });

        substitutes.sort_by(|a, b| {
            b.correlation
                .overall
                .partial_cmp(&a.correlation.overall)
                .unwrap()
        });
        substitutes.truncate(self.config.max_substitutes);

        substitutes
    }

    fn is_substantially_identical(&self, a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }
        self.db.are_identical(a, b)
    }
}

struct SubstitutesDatabase {
    sector_etfs: HashMap<String, String>,
    stock_sectors: HashMap<String, String>,
    substitutes: HashMap<String, Vec<SubstituteSecurity>>,
    identical_pairs: Vec<(String, String)>,
}

impl Default for SubstitutesDatabase {
    fn default() -> Self {
        let sector_etfs: HashMap<String, String> = [
            ("Technology", "XLK"),
            ("Financial", "XLF"),
            ("Healthcare", "XLV"),
            ("Consumer Discretionary", "XLY"),
            ("Consumer Staples", "XLP"),
            ("Energy", "XLE"),
            ("Industrial", "XLI"),
            ("Materials", "XLB"),
            ("Real Estate", "XLRE"),
            ("Utilities", "XLU"),
            ("Communication", "XLC"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let stock_sectors: HashMap<String, String> = [
            ("AAPL", "Technology"),
            ("MSFT", "Technology"),
            ("GOOGL", "Communication"),
            ("GOOG", "Communication"),
            ("META", "Communication"),
            ("NVDA", "Technology"),
            ("TSLA", "Consumer Discretionary"),
            ("AMZN", "Consumer Discretionary"),
            ("JPM", "Financial"),
            ("BAC", "Financial"),
            ("GS", "Financial"),
            ("MS", "Financial"),
            ("JNJ", "Healthcare"),
            ("PFE", "Healthcare"),
            ("UNH", "Healthcare"),
            ("MRK", "Healthcare"),
            ("XOM", "Energy"),
            ("CVX", "Energy"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let mut substitutes = HashMap::new();

        substitutes.insert(
            "AAPL".to_string(),
            vec![
                SubstituteSecurity {
                    identifier: "MSFT".to_string(),
                    name: "Microsoft Corporation".to_string(),
                    substitute_type: SubstituteType::Competitor,
                    correlation: CorrelationScore::calculate(0.82, 0.85, 0.9),
                    expense_ratio: None,
                    wash_sale_safe: true,
                    reason: "Large-cap tech with similar volatility profile".to_string(),
                    risk_comparison: "Similar risk profile".to_string(),
                },
                SubstituteSecurity {
                    identifier: "QQQ".to_string(),
                    name: "Invesco QQQ Trust".to_string(),
                    substitute_type: SubstituteType::IndexFund,
                    correlation: CorrelationScore::calculate(0.88, 0.90, 0.8),
                    expense_ratio: Some(0.20),
                    wash_sale_safe: true,
                    reason: "NASDAQ-100 index with AAPL as top holding".to_string(),
                    risk_comparison: "Diversified, lower single-stock risk".to_string(),
                },
            ],
        );

        substitutes.insert(
            "MSFT".to_string(),
            vec![
                SubstituteSecurity {
                    identifier: "AAPL".to_string(),
                    name: "Apple Inc.".to_string(),
                    substitute_type: SubstituteType::Competitor,
                    correlation: CorrelationScore::calculate(0.82, 0.85, 0.9),
                    expense_ratio: None,
                    wash_sale_safe: true,
                    reason: "Large-cap tech with similar volatility profile".to_string(),
                    risk_comparison: "Similar risk profile".to_string(),
                },
                SubstituteSecurity {
                    identifier: "VGT".to_string(),
                    name: "Vanguard Information Technology ETF".to_string(),
                    substitute_type: SubstituteType::SectorETF,
                    correlation: CorrelationScore::calculate(0.90, 0.88, 1.0),
                    expense_ratio: Some(0.10),
                    wash_sale_safe: true,
                    reason: "Broad tech sector with MSFT exposure".to_string(),
                    risk_comparison: "Diversified tech exposure".to_string(),
                },
            ],
        );

        substitutes.insert(
            "SPY".to_string(),
            vec![
                SubstituteSecurity {
                    identifier: "VOO".to_string(),
                    name: "Vanguard S&P 500 ETF".to_string(),
                    substitute_type: SubstituteType::IndexFund,
                    correlation: CorrelationScore::calculate(0.99, 0.99, 1.0),
                    expense_ratio: Some(0.03),
                    wash_sale_safe: true,
                    reason: "Tracks same index, different issuer, lower expense ratio".to_string(),
                    risk_comparison: "Near-identical exposure, distinct fund".to_string(),
                },
                SubstituteSecurity {
                    identifier: "IVV".to_string(),
                    name: "iShares Core S&P 500 ETF".to_string(),
                    substitute_type: SubstituteType::IndexFund,
                    correlation: CorrelationScore::calculate(0.99, 0.99, 1.0),
                    expense_ratio: Some(0.03),
                    wash_sale_safe: true,
                    reason: "Tracks same index, different issuer".to_string(),
                    risk_comparison: "Near-identical exposure, distinct fund".to_string(),
                },
                SubstituteSecurity {
                    identifier: "VTI".to_string(),
                    name: "Vanguard Total Stock Market ETF".to_string(),
                    substitute_type: SubstituteType::IndexFund,
                    correlation: CorrelationScore::calculate(0.97, 0.98, 0.85),
                    expense_ratio: Some(0.03),
                    wash_sale_safe: true,
                    reason: "Total US market, broader than S&P 500".to_string(),
                    risk_comparison: "Slightly more small-cap exposure".to_string(),
                },
            ],
        );

        // Only true share-class twins of the *same* security go here — dual-class
        // common stock, not competing index funds that merely track the same
        // benchmark. VOO and IVV are different issuers' funds and are a legitimate
        // pairs-TLH swap, not a wash sale.
        let identical_pairs = vec![
            ("GOOGL".to_string(), "GOOG".to_string()),
            ("BRK.A".to_string(), "BRK.B".to_string()),
        ];

        Self {
            sector_etfs,
            stock_sectors,
            substitutes,
            identical_pairs,
        }
    }
}

impl SubstitutesDatabase {
    fn get_substitutes(&self, identifier: &str) -> Option<Vec<SubstituteSecurity>> {
        self.substitutes.get(identifier).cloned()
    }

    fn get_sector(&self, identifier: &str) -> Option<&String> {
        self.stock_sectors.get(identifier)
    }

    fn get_sector_etf(&self, sector: &str) -> Option<&String> {
        self.sector_etfs.get(sector)
    }

    fn are_identical(&self, a: &str, b: &str) -> bool {
        self.identical_pairs
            .iter()
            .any(|(x, y)| (x == a && y == b) || (x == b && y == a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_known_substitutes() {
        let universe = DefaultSubstituteUniverse::new();
        let subs = universe.find_substitutes("AAPL");

        assert!(!subs.is_empty());
        assert!(subs.iter().any(|s| s.identifier == "MSFT" || s.identifier == "QQQ"));
    }

    #[test]
    fn identical_pairs_are_rejected_as_replacements() {
        let universe = DefaultSubstituteUniverse::new();

        assert!(universe.is_substantially_identical("SPY", "SPY"));
        assert!(universe.is_substantially_identical("GOOGL", "GOOG"));
        assert!(!universe.is_substantially_identical("AAPL", "MSFT"));
    }

    #[test]
    fn competing_index_funds_are_not_substantially_identical() {
        // VOO vs. IVV is the textbook pairs-TLH swap: same benchmark, different
        // issuer, not a wash sale.
        let universe = DefaultSubstituteUniverse::new();
        assert!(!universe.is_substantially_identical("SPY", "VOO"));
        assert!(!universe.is_substantially_identical("VOO", "IVV"));
    }

    #[test]
    fn wash_sale_safe_flag_matches_identity_relation() {
        let universe = DefaultSubstituteUniverse::new();
        let subs = universe.find_substitutes("SPY");

        let vti = subs.iter().find(|s| s.identifier == "VTI");
        assert!(vti.is_some_and(|s| s.wash_sale_safe));

        let voo = subs.iter().find(|s| s.identifier == "VOO");
        assert!(voo.is_some_and(|s| s.wash_sale_safe));
    }
}
