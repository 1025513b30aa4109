pub mod actuals;
pub mod drift;
pub mod gain_loss;

pub use actuals::{actuals_report, total_value};
pub use drift::{drift_for_identifier, drift_report};
pub use gain_loss::gain_loss_report;
