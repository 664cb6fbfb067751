//! Trade execution and fill simulation.
//!
//! Entries and exits are all-in/all-out. Slippage moves the fill price
//! against the trader; commission is a fraction of the capital traded.

use chrono::NaiveDate;

use super::portfolio::Portfolio;
use super::position::{ExitReason, Position, Trade};

/// Cost parameters, both expressed as fractions (0.001 = 10 bps).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ExecutionConfig {
    pub commission: f64,
    pub slippage: f64,
}

/// commission * capital
pub fn calculate_commission(capital: f64, config: &ExecutionConfig) -> f64 {
    capital * config.commission
}

/// Buy fill: market_price * (1 + slippage)
pub fn apply_slippage_entry(market_price: f64, slippage: f64) -> f64 {
    market_price * (1.0 + slippage)
}

/// Sell fill: market_price * (1 - slippage)
pub fn apply_slippage_exit(market_price: f64, slippage: f64) -> f64 {
    market_price * (1.0 - slippage)
}

/// Per-trade return net of costs: exit / entry - 1 - 2 * commission.
pub fn realized_return(entry_price: f64, exit_price: f64, config: &ExecutionConfig) -> f64 {
    exit_price / entry_price - 1.0 - 2.0 * config.commission
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryResult {
    Entered {
        shares: f64,
        execution_price: f64,
        commission: f64,
    },
    AlreadyLong,
    InsufficientCapital,
}

/// Enter a long position with all available cash.
///
/// 1. Deduct commission on the cash balance
/// 2. Apply entry slippage
/// 3. Buy fractional shares with the remainder
pub fn enter_long(
    portfolio: &mut Portfolio,
    market_price: f64,
    date: NaiveDate,
    config: &ExecutionConfig,
) -> EntryResult {
    if portfolio.is_long() {
        return EntryResult::AlreadyLong;
    }

    let capital = portfolio.cash;
    if capital <= 0.0 {
        return EntryResult::InsufficientCapital;
    }

    let commission = calculate_commission(capital, config);
    let execution_price = apply_slippage_entry(market_price, config.slippage);
    let shares = (capital - commission) / execution_price;

    let position = Position {
        entry_date: date,
        entry_price: execution_price,
        shares,
        entry_capital: capital,
        entry_commission: commission,
    };

    if portfolio.open_position(position).is_err() {
        return EntryResult::AlreadyLong;
    }
    portfolio.cash = 0.0;

    EntryResult::Entered {
        shares,
        execution_price,
        commission,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExitResult {
    pub shares: f64,
    pub exit_price: f64,
    pub proceeds: f64,
    pub exit_commission: f64,
    pub realized_return: f64,
    pub pnl: f64,
}

/// Close the open position and record the trade.
///
/// Returns `None` when flat.
pub fn exit_long(
    portfolio: &mut Portfolio,
    market_price: f64,
    exit_date: NaiveDate,
    reason: ExitReason,
    config: &ExecutionConfig,
) -> Option<ExitResult> {
    let position = portfolio.take_position()?;

    let exit_price = apply_slippage_exit(market_price, config.slippage);
    let proceeds = position.shares * exit_price;
    let exit_commission = calculate_commission(proceeds, config);
    portfolio.cash += proceeds - exit_commission;

    let pnl = proceeds - exit_commission - position.entry_capital;
    let realized = realized_return(position.entry_price, exit_price, config);

    let entry_slippage =
        position.shares * position.entry_price * config.slippage / (1.0 + config.slippage);
    let exit_slippage = position.shares * market_price * config.slippage;
    let costs_paid = position.entry_commission + exit_commission + entry_slippage + exit_slippage;

    portfolio.record_trade(Trade {
        entry_date: position.entry_date,
        exit_date,
        entry_price: position.entry_price,
        exit_price,
        shares: position.shares,
        realized_return: realized,
        costs_paid,
        pnl,
        exit_reason: reason,
    });

    Some(ExitResult {
        shares: position.shares,
        exit_price,
        proceeds,
        exit_commission,
        realized_return: realized,
        pnl,
    })
}
