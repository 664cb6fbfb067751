//! Open position and completed trade records.

use chrono::NaiveDate;
use serde::Serialize;

/// An open long position. The simulator holds at most one per asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub entry_date: NaiveDate,
    /// Execution price after slippage.
    pub entry_price: f64,
    pub shares: f64,
    /// Cash committed at entry, commission included.
    pub entry_capital: f64,
    pub entry_commission: f64,
}

impl Position {
    pub fn market_value(&self, price: f64) -> f64 {
        self.shares * price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.market_value(price) - self.entry_capital
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Probability fell to or below the confidence threshold.
    Signal,
    /// Force-closed on the final observation.
    EndOfSeries,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::Signal => f.write_str("signal"),
            ExitReason::EndOfSeries => f.write_str("end_of_series"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub entry_price: f64,
    pub exit_price: f64,
    pub shares: f64,
    /// `exit_price / entry_price - 1 - 2 * commission`.
    pub realized_return: f64,
    /// Commissions plus slippage on both legs, in currency.
    pub costs_paid: f64,
    pub pnl: f64,
    pub exit_reason: ExitReason,
}

impl Trade {
    pub fn holding_days(&self) -> i64 {
        (self.exit_date - self.entry_date).num_days()
    }

    pub fn is_win(&self) -> bool {
        self.realized_return > 0.0
    }
}
