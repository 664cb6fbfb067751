//! Long/flat portfolio simulator.
//!
//! A two-state machine (FLAT, LONG) driven by a chronological series of
//! (price, probability) observations:
//!
//! - FLAT and probability > threshold: buy with all cash.
//! - LONG and probability <= threshold: sell everything.
//! - LONG on the final observation: force-close, unless disabled.
//!
//! A cost-free buy-and-hold benchmark is simulated over the same prices.

use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;

use super::error::ProbtraderError;
use super::execution::{enter_long, exit_long, EntryResult, ExecutionConfig};
use super::metrics::{
    annualized_return, annualized_volatility, daily_returns, equity_values, information_ratio,
    max_drawdown, max_drawdown_duration, sharpe_ratio, sortino_ratio, win_rate, Metric,
    TradeStats,
};
use super::portfolio::{EquityPoint, Portfolio};
use super::position::{ExitReason, Position, Trade};
use super::series::{validate_observations, Observation};

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub confidence_threshold: f64,
    /// Fraction of traded capital charged on each leg.
    pub commission: f64,
    /// Fractional price impact on each leg.
    pub slippage: f64,
    pub initial_capital: f64,
    pub force_close_at_end: bool,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            confidence_threshold: 0.55,
            commission: 0.001,
            slippage: 0.001,
            initial_capital: 10_000.0,
            force_close_at_end: true,
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<(), ProbtraderError> {
        let t = self.confidence_threshold;
        if !t.is_finite() || !(0.0..=1.0).contains(&t) {
            return Err(ProbtraderError::configuration(format!(
                "confidence_threshold {t} outside [0, 1]"
            )));
        }
        for (name, value) in [("commission", self.commission), ("slippage", self.slippage)] {
            if !value.is_finite() || !(0.0..1.0).contains(&value) {
                return Err(ProbtraderError::configuration(format!(
                    "{name} {value} outside [0, 1)"
                )));
            }
        }
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(ProbtraderError::configuration(format!(
                "initial_capital {} must be positive",
                self.initial_capital
            )));
        }
        Ok(())
    }

    pub fn execution(&self) -> ExecutionConfig {
        ExecutionConfig {
            commission: self.commission,
            slippage: self.slippage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestResult {
    pub asset: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub observed_days: usize,
    pub initial_capital: f64,
    pub final_capital: f64,
    pub total_return: f64,
    pub annualized_return: f64,
    pub volatility: Metric,
    pub sharpe_ratio: Metric,
    pub sortino_ratio: Metric,
    pub max_drawdown: f64,
    pub max_drawdown_duration: usize,
    pub win_rate: Metric,
    pub information_ratio: Metric,
    pub benchmark_return: f64,
    pub benchmark_annualized_return: f64,
    /// total_return - benchmark_return
    pub excess_return: f64,
    pub trade_stats: TradeStats,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub benchmark_curve: Vec<EquityPoint>,
    /// Still open at the end when force-close is disabled.
    pub open_position: Option<Position>,
}

impl BacktestResult {
    pub fn trade_count(&self) -> usize {
        self.trades.len()
    }
}

/// Simulate the strategy over `observations`, which must be in strictly increasing date order.
pub fn run_backtest(
    asset: &str,
    observations: &[Observation],
    config: &BacktestConfig,
) -> Result<BacktestResult, ProbtraderError> {
    config.validate().map_err(|e| e.for_asset(asset))?;
    let (first, last) = match (observations.first(), observations.last()) {
        (Some(f), Some(l)) => (*f, *l),
        _ => {
            return Err(ProbtraderError::InsufficientData {
                asset: asset.to_string(),
                observations: 0,
                minimum: 1,
            });
        }
    };
    validate_observations(observations).map_err(|e| e.for_asset(asset))?;

    let exec = config.execution();
    let mut portfolio = Portfolio::new(config.initial_capital);
    let mut benchmark_curve = Vec::with_capacity(observations.len());
    let benchmark_shares = config.initial_capital / first.price;

    for (i, obs) in observations.iter().enumerate() {
        if portfolio.is_long() {
            if obs.probability <= config.confidence_threshold {
                exit_long(&mut portfolio, obs.price, obs.date, ExitReason::Signal, &exec);
            }
        } else if obs.probability > config.confidence_threshold {
            if let EntryResult::InsufficientCapital =
                enter_long(&mut portfolio, obs.price, obs.date, &exec)
            {
                debug!(asset, date = %obs.date, "no cash left to enter");
            }
        }

        if i + 1 == observations.len() && config.force_close_at_end && portfolio.is_long() {
            exit_long(&mut portfolio, obs.price, obs.date, ExitReason::EndOfSeries, &exec);
        }

        portfolio.record_equity(obs.date, portfolio.total_equity(obs.price));
        benchmark_curve.push(EquityPoint {
            date: obs.date,
            equity: benchmark_shares * obs.price,
        });
    }

    Ok(summarize(asset, first.date, last.date, portfolio, benchmark_curve))
}

fn summarize(
    asset: &str,
    start_date: NaiveDate,
    end_date: NaiveDate,
    portfolio: Portfolio,
    benchmark_curve: Vec<EquityPoint>,
) -> BacktestResult {
    let observed_days = portfolio.equity_curve.len();
    let initial_capital = portfolio.initial_capital;
    let final_capital = portfolio.final_equity();
    let total_return = (final_capital - initial_capital) / initial_capital;

    let equity = equity_values(&portfolio.equity_curve);
    let benchmark = equity_values(&benchmark_curve);
    let returns = daily_returns(&equity);
    let benchmark_returns = daily_returns(&benchmark);

    let benchmark_final = benchmark.last().copied().unwrap_or(initial_capital);
    let benchmark_return = (benchmark_final - initial_capital) / initial_capital;

    BacktestResult {
        asset: asset.to_string(),
        start_date,
        end_date,
        observed_days,
        initial_capital,
        final_capital,
        total_return,
        annualized_return: annualized_return(total_return, observed_days),
        volatility: annualized_volatility(&returns),
        sharpe_ratio: sharpe_ratio(&returns),
        sortino_ratio: sortino_ratio(&returns),
        max_drawdown: max_drawdown(&equity),
        max_drawdown_duration: max_drawdown_duration(&equity),
        win_rate: win_rate(&portfolio.closed_trades),
        information_ratio: information_ratio(&returns, &benchmark_returns),
        benchmark_return,
        benchmark_annualized_return: annualized_return(benchmark_return, observed_days),
        excess_return: total_return - benchmark_return,
        trade_stats: TradeStats::from_trades(&portfolio.closed_trades),
        trades: portfolio.closed_trades,
        equity_curve: portfolio.equity_curve,
        benchmark_curve,
        open_position: portfolio.position,
    }
}
