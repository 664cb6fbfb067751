//! Risk and performance metrics.
//!
//! Every function here is pure. A formula that would divide by zero yields
//! [`Metric::Undefined`] instead of NaN or infinity, so callers can branch on it.

use serde::Serialize;
use std::fmt;

use super::portfolio::EquityPoint;
use super::position::Trade;

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Standard deviations at or below this are treated as zero variance.
const MIN_STDDEV: f64 = 1e-12;

/// A metric value, or the explicit marker that its formula is undefined for the input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(into = "Option<f64>")]
pub enum Metric {
    Value(f64),
    Undefined,
}

impl Metric {
    /// `Undefined` unless `value` is finite.
    pub fn from_f64(value: f64) -> Self {
        if value.is_finite() {
            Metric::Value(value)
        } else {
            Metric::Undefined
        }
    }

    pub fn value(self) -> Option<f64> {
        match self {
            Metric::Value(v) => Some(v),
            Metric::Undefined => None,
        }
    }

    pub fn is_defined(self) -> bool {
        matches!(self, Metric::Value(_))
    }

    pub fn unwrap_or(self, default: f64) -> f64 {
        self.value().unwrap_or(default)
    }
}

impl From<Metric> for Option<f64> {
    fn from(metric: Metric) -> Self {
        metric.value()
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Value(v) => match f.precision() {
                Some(p) => write!(f, "{v:.p$}"),
                None => write!(f, "{v}"),
            },
            Metric::Undefined => f.write_str("n/a"),
        }
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Simple day-over-day returns. A non-positive previous value yields 0.
pub fn daily_returns(equity: &[f64]) -> Vec<f64> {
    equity
        .windows(2)
        .map(|w| {
            let prev = w[0];
            if prev > 0.0 { (w[1] - prev) / prev } else { 0.0 }
        })
        .collect()
}

pub fn equity_values(curve: &[EquityPoint]) -> Vec<f64> {
    curve.iter().map(|p| p.equity).collect()
}

/// Annualized ratio of `numerator` to a standard deviation that must be positive.
fn annualized_ratio(numerator: f64, stddev: f64) -> Metric {
    if stddev > MIN_STDDEV {
        Metric::from_f64(numerator / stddev * TRADING_DAYS_PER_YEAR.sqrt())
    } else {
        Metric::Undefined
    }
}

/// mean / std * sqrt(252), zero risk-free rate.
pub fn sharpe_ratio(returns: &[f64]) -> Metric {
    match (mean(returns), std_dev(returns)) {
        (Some(m), Some(s)) => annualized_ratio(m, s),
        _ => Metric::Undefined,
    }
}

/// mean / std(negative returns) * sqrt(252).
pub fn sortino_ratio(returns: &[f64]) -> Metric {
    let Some(m) = mean(returns) else {
        return Metric::Undefined;
    };
    let negatives: Vec<f64> = returns.iter().copied().filter(|&r| r < 0.0).collect();
    match std_dev(&negatives) {
        Some(s) => annualized_ratio(m, s),
        None => Metric::Undefined,
    }
}

/// Deepest peak-to-trough decline as a non-positive fraction in [-1, 0].
///
/// An empty curve has no decline and returns 0.
pub fn max_drawdown(equity: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut max_dd = 0.0_f64;

    for &value in equity {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            let dd = (value - peak) / peak;
            if dd < max_dd {
                max_dd = dd;
            }
        }
    }

    max_dd.max(-1.0)
}

/// Longest run of observations spent below a previous peak.
pub fn max_drawdown_duration(equity: &[f64]) -> usize {
    let mut peak = f64::NEG_INFINITY;
    let mut current = 0usize;
    let mut longest = 0usize;

    for &value in equity {
        if value >= peak {
            peak = value;
            current = 0;
        } else {
            current += 1;
            longest = longest.max(current);
        }
    }

    longest
}

/// winning trades / total trades.
pub fn win_rate(trades: &[Trade]) -> Metric {
    if trades.is_empty() {
        return Metric::Undefined;
    }
    let wins = trades.iter().filter(|t| t.is_win()).count();
    Metric::Value(wins as f64 / trades.len() as f64)
}

/// (mean(strategy) - mean(benchmark)) / std(strategy - benchmark) * sqrt(252).
///
/// Series are paired by position; the longer one is truncated.
pub fn information_ratio(strategy: &[f64], benchmark: &[f64]) -> Metric {
    let n = strategy.len().min(benchmark.len());
    let strategy = &strategy[..n];
    let benchmark = &benchmark[..n];

    let active: Vec<f64> = strategy
        .iter()
        .zip(benchmark)
        .map(|(s, b)| s - b)
        .collect();

    match (mean(strategy), mean(benchmark), std_dev(&active)) {
        (Some(ms), Some(mb), Some(te)) => annualized_ratio(ms - mb, te),
        _ => Metric::Undefined,
    }
}

/// (1 + total_return)^(252 / observed_days) - 1; zero when nothing was observed.
pub fn annualized_return(total_return: f64, observed_days: usize) -> f64 {
    if observed_days == 0 || !total_return.is_finite() {
        return 0.0;
    }
    let growth = (1.0 + total_return).max(0.0);
    growth.powf(TRADING_DAYS_PER_YEAR / observed_days as f64) - 1.0
}

/// std(daily returns) * sqrt(252).
pub fn annualized_volatility(returns: &[f64]) -> Metric {
    match std_dev(returns) {
        Some(s) => Metric::from_f64(s * TRADING_DAYS_PER_YEAR.sqrt()),
        None => Metric::Undefined,
    }
}

/// Summary statistics over a trade ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeStats {
    pub total_trades: usize,
    pub trades_won: usize,
    pub trades_lost: usize,
    pub trades_breakeven: usize,
    /// Gross winning PnL over gross losing PnL.
    pub profit_factor: Metric,
    pub avg_trade_return: Metric,
    pub avg_holding_days: Metric,
    pub best_trade_return: Metric,
    pub worst_trade_return: Metric,
}

impl TradeStats {
    pub fn from_trades(trades: &[Trade]) -> Self {
        let mut trades_won = 0usize;
        let mut trades_lost = 0usize;
        let mut trades_breakeven = 0usize;
        let mut gross_win = 0.0_f64;
        let mut gross_loss = 0.0_f64;

        for trade in trades {
            if trade.realized_return > 0.0 {
                trades_won += 1;
            } else if trade.realized_return < 0.0 {
                trades_lost += 1;
            } else {
                trades_breakeven += 1;
            }
            if trade.pnl > 0.0 {
                gross_win += trade.pnl;
            } else {
                gross_loss += trade.pnl.abs();
            }
        }

        let profit_factor = if gross_loss > 0.0 {
            Metric::from_f64(gross_win / gross_loss)
        } else {
            Metric::Undefined
        };

        let returns: Vec<f64> = trades.iter().map(|t| t.realized_return).collect();
        let holding: Vec<f64> = trades.iter().map(|t| t.holding_days() as f64).collect();

        TradeStats {
            total_trades: trades.len(),
            trades_won,
            trades_lost,
            trades_breakeven,
            profit_factor,
            avg_trade_return: mean(&returns).map_or(Metric::Undefined, Metric::from_f64),
            avg_holding_days: mean(&holding).map_or(Metric::Undefined, Metric::from_f64),
            best_trade_return: returns
                .iter()
                .copied()
                .reduce(f64::max)
                .map_or(Metric::Undefined, Metric::from_f64),
            worst_trade_return: returns
                .iter()
                .copied()
                .reduce(f64::min)
                .map_or(Metric::Undefined, Metric::from_f64),
        }
    }
}
