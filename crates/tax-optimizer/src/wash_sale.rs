//! Wash-sale window tracking.
//!
//! Maintains, per identifier, the set of 30-day windows opened by a loss-sale and
//! consulted (never mutated) while a rebalance is being solved.

use chrono::{Datelike, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Governs whether and over what span wash-sale windows are enforced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WashSaleRules {
    pub enforce: bool,
    pub window_days: i64,
}

impl Default for WashSaleRules {
    fn default() -> Self {
        Self {
            enforce: true,
            window_days: 30,
        }
    }
}

/// Status of a wash-sale check for a given identifier/date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WashSaleStatus {
    Safe,
    InWindow,
    Violated,
    Pending,
}

impl std::fmt::Display for WashSaleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WashSaleStatus::Safe => write!(f, "Safe"),
            WashSaleStatus::InWindow => write!(f, "In Window"),
            WashSaleStatus::Violated => write!(f, "Violated"),
            WashSaleStatus::Pending => write!(f, "Pending"),
        }
    }
}

/// A wash-sale window opened by a single loss-sale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WashSaleWindow {
    pub identifier: String,
    pub sale_id: String,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub loss_amount: Decimal,
    pub status: WashSaleStatus,
    pub triggered: bool,
    pub triggering_purchase_date: Option<NaiveDate>,
    pub disallowed_loss: Decimal,
}

impl WashSaleWindow {
    pub fn new(
        identifier: String,
        sale_id: String,
        sale_date: NaiveDate,
        loss_amount: Decimal,
        rules: &WashSaleRules,
    ) -> Self {
        Self {
            identifier,
            sale_id,
            window_start: sale_date - Duration::days(rules.window_days),
            window_end: sale_date + Duration::days(rules.window_days),
            loss_amount,
            status: WashSaleStatus::Pending,
            triggered: false,
            triggering_purchase_date: None,
            disallowed_loss: Decimal::ZERO,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.window_start && date <= self.window_end
    }

    pub fn is_expired(&self, as_of: NaiveDate) -> bool {
        as_of > self.window_end
    }

    pub fn days_remaining(&self, as_of: NaiveDate) -> i64 {
        (self.window_end - as_of).num_days().max(0)
    }

    pub fn trigger(&mut self, purchase_date: NaiveDate) {
        self.triggered = true;
        self.triggering_purchase_date = Some(purchase_date);
        self.status = WashSaleStatus::Violated;
        self.disallowed_loss = self.loss_amount;
    }

    pub fn update_status(&mut self, as_of: NaiveDate) {
        if self.triggered {
            self.status = WashSaleStatus::Violated;
        } else if self.is_expired(as_of) {
            self.status = WashSaleStatus::Safe;
        } else {
            self.status = WashSaleStatus::Pending;
        }
    }
}

/// A realized wash-sale violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WashSaleViolation {
    pub identifier: String,
    pub sale_date: NaiveDate,
    pub purchase_date: NaiveDate,
    pub original_loss: Decimal,
    pub disallowed_loss: Decimal,
    pub basis_adjustment: Decimal,
    pub sale_lot_id: String,
    pub purchase_lot_id: String,
}

/// Oracle-level ledger of open and historical wash-sale windows.
///
/// Read-only during a solve (§4.4 constraint 5); updated serially once trades
/// from all strategies in an Oracle have been applied.
pub struct WashSaleMonitor {
    rules: WashSaleRules,
    windows: Vec<WashSaleWindow>,
    violations: Vec<WashSaleViolation>,
}

impl WashSaleMonitor {
    pub fn new(rules: WashSaleRules) -> Self {
        Self {
            rules,
            windows: Vec::new(),
            violations: Vec::new(),
        }
    }

    /// Whether a BUY of `identifier` is permitted as of `as_of` (constraint 5, §4.4).
    pub fn is_safe_to_purchase(&self, identifier: &str, as_of: NaiveDate) -> WashSaleStatus {
        if !self.rules.enforce {
            return WashSaleStatus::Safe;
        }

        for window in &self.windows {
            if window.identifier == identifier && window.contains(as_of) && !window.triggered {
                return WashSaleStatus::InWindow;
            }
        }

        WashSaleStatus::Safe
    }

    pub fn safe_purchase_date(&self, identifier: &str, as_of: NaiveDate) -> NaiveDate {
        if !self.rules.enforce {
            return as_of;
        }

        let mut latest_window_end = as_of;
        for window in &self.windows {
            if window.identifier == identifier
                && !window.triggered
                && window.window_end > latest_window_end
            {
                latest_window_end = window.window_end;
            }
        }

        if latest_window_end > as_of {
            latest_window_end + Duration::days(1)
        } else {
            as_of
        }
    }

    /// Record an applied SELL; only loss-sales open a window.
    pub fn record_sale(
        &mut self,
        identifier: String,
        sale_id: String,
        sale_date: NaiveDate,
        loss_amount: Decimal,
    ) {
        if loss_amount <= Decimal::ZERO {
            return;
        }
        self.windows.push(WashSaleWindow::new(
            identifier, sale_id, sale_date, loss_amount, &self.rules,
        ));
    }

    /// Record an applied BUY; returns any violations it triggers.
    pub fn record_purchase(
        &mut self,
        identifier: &str,
        purchase_lot_id: &str,
        purchase_date: NaiveDate,
    ) -> Vec<WashSaleViolation> {
        let mut new_violations = Vec::new();

        for window in &mut self.windows {
            if window.identifier == identifier && window.contains(purchase_date) && !window.triggered {
                window.trigger(purchase_date);

                let violation = WashSaleViolation {
                    identifier: identifier.to_string(),
                    sale_date: window.window_start + Duration::days(self.rules.window_days),
                    purchase_date,
                    original_loss: window.loss_amount,
                    disallowed_loss: window.loss_amount,
                    basis_adjustment: window.loss_amount,
                    sale_lot_id: window.sale_id.clone(),
                    purchase_lot_id: purchase_lot_id.to_string(),
                };

                new_violations.push(violation.clone());
                self.violations.push(violation);
            }
        }

        new_violations
    }

    pub fn get_active_windows(&self, identifier: &str, as_of: NaiveDate) -> Vec<&WashSaleWindow> {
        self.windows
            .iter()
            .filter(|w| w.identifier == identifier && !w.is_expired(as_of) && !w.triggered)
            .collect()
    }

    pub fn all_windows(&self) -> &[WashSaleWindow] {
        &self.windows
    }

    pub fn all_violations(&self) -> &[WashSaleViolation] {
        &self.violations
    }

    pub fn total_disallowed(&self) -> Decimal {
        self.violations.iter().map(|v| v.disallowed_loss).sum()
    }

    /// Drop windows more than 90 days past expiry; keep recent history for reference.
    pub fn cleanup_expired(&mut self, as_of: NaiveDate) {
        for window in &mut self.windows {
            window.update_status(as_of);
        }
        let cutoff = as_of - Duration::days(90);
        self.windows.retain(|w| w.window_end > cutoff);
    }

    pub fn year_summary(&self, year: i32) -> WashSaleSummary {
        let year_violations: Vec<_> = self
            .violations
            .iter()
            .filter(|v| v.sale_date.year() == year)
            .collect();

        let total_disallowed = year_violations.iter().map(|v| v.disallowed_loss).sum();
        let affected: std::collections::HashSet<_> =
            year_violations.iter().map(|v| v.identifier.clone()).collect();

        WashSaleSummary {
            tax_year: year,
            violation_count: year_violations.len(),
            total_disallowed_loss: total_disallowed,
            affected_identifiers: affected.into_iter().collect(),
        }
    }

    pub fn get_calendar(&self, identifier: &str) -> WashSaleCalendar {
        let today = Utc::now().date_naive();
        let windows: Vec<_> = self
            .windows
            .iter()
            .filter(|w| w.identifier == identifier)
            .cloned()
            .collect();

        let next_safe = self.safe_purchase_date(identifier, today);
        let days_until_safe = (next_safe - today).num_days();

        WashSaleCalendar {
            identifier: identifier.to_string(),
            windows,
            next_safe_date: next_safe,
            days_until_safe,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WashSaleSummary {
    pub tax_year: i32,
    pub violation_count: usize,
    pub total_disallowed_loss: Decimal,
    pub affected_identifiers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WashSaleCalendar {
    pub identifier: String,
    pub windows: Vec<WashSaleWindow>,
    pub next_safe_date: NaiveDate,
    pub days_until_safe: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn window_spans_thirty_days_each_side() {
        let rules = WashSaleRules::default();
        let sale_date = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();

        let window = WashSaleWindow::new(
            "AAPL".to_string(),
            "sale1".to_string(),
            sale_date,
            dec!(500.00),
            &rules,
        );

        assert_eq!(window.window_start, NaiveDate::from_ymd_opt(2024, 5, 16).unwrap());
        assert_eq!(window.window_end, NaiveDate::from_ymd_opt(2024, 7, 15).unwrap());
    }

    #[test]
    fn purchase_inside_window_triggers_violation() {
        let mut monitor = WashSaleMonitor::new(WashSaleRules::default());

        let sale_date = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        monitor.record_sale("AAPL".to_string(), "sale1".to_string(), sale_date, dec!(500.00));

        let purchase_date = NaiveDate::from_ymd_opt(2024, 6, 20).unwrap();
        let violations = monitor.record_purchase("AAPL", "purchase1", purchase_date);

        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].disallowed_loss, dec!(500.00));
    }

    #[test]
    fn only_the_affected_identifier_is_blocked() {
        let mut monitor = WashSaleMonitor::new(WashSaleRules::default());

        let sale_date = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        monitor.record_sale("AAPL".to_string(), "sale1".to_string(), sale_date, dec!(500.00));

        let in_window = NaiveDate::from_ymd_opt(2024, 6, 20).unwrap();
        assert_eq!(monitor.is_safe_to_purchase("AAPL", in_window), WashSaleStatus::InWindow);

        let after_window = NaiveDate::from_ymd_opt(2024, 7, 20).unwrap();
        assert_eq!(monitor.is_safe_to_purchase("AAPL", after_window), WashSaleStatus::Safe);

        assert_eq!(monitor.is_safe_to_purchase("MSFT", in_window), WashSaleStatus::Safe);
    }

    #[test]
    fn disabled_rules_are_always_safe() {
        let mut monitor = WashSaleMonitor::new(WashSaleRules {
            enforce: false,
            window_days: 30,
        });
        let sale_date = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        monitor.record_sale("AAPL".to_string(), "sale1".to_string(), sale_date, dec!(500.00));

        let in_window = NaiveDate::from_ymd_opt(2024, 6, 20).unwrap();
        assert_eq!(monitor.is_safe_to_purchase("AAPL", in_window), WashSaleStatus::Safe);
    }
}
