//! Single-asset portfolio state and equity tracking.

use chrono::NaiveDate;
use serde::Serialize;

use super::position::{Position, Trade};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: f64,
}

/// Cash plus at most one open long position.
#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub cash: f64,
    pub initial_capital: f64,
    pub position: Option<Position>,
    pub closed_trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
}

impl Portfolio {
    pub fn new(initial_capital: f64) -> Self {
        Portfolio {
            cash: initial_capital,
            initial_capital,
            position: None,
            closed_trades: Vec::new(),
            equity_curve: Vec::new(),
        }
    }

    pub fn is_long(&self) -> bool {
        self.position.is_some()
    }

    /// Returns the rejected position if one is already open.
    pub fn open_position(&mut self, position: Position) -> Result<(), Position> {
        if self.position.is_some() {
            return Err(position);
        }
        self.position = Some(position);
        Ok(())
    }

    pub fn take_position(&mut self) -> Option<Position> {
        self.position.take()
    }

    pub fn record_trade(&mut self, trade: Trade) {
        self.closed_trades.push(trade);
    }

    pub fn record_equity(&mut self, date: NaiveDate, equity: f64) {
        debug_assert!(
            self.equity_curve.last().is_none_or(|p| p.date < date),
            "equity curve must be appended in date order"
        );
        self.equity_curve.push(EquityPoint { date, equity });
    }

    /// Shares at `price` while long, cash while flat.
    pub fn total_equity(&self, price: f64) -> f64 {
        match &self.position {
            Some(pos) => self.cash + pos.market_value(price),
            None => self.cash,
        }
    }

    pub fn final_equity(&self) -> f64 {
        self.equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(self.initial_capital)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn sample_position() -> Position {
        Position {
            entry_date: date(15),
            entry_price: 100.0,
            shares: 100.0,
            entry_capital: 10_000.0,
            entry_commission: 0.0,
        }
    }

    #[test]
    fn new_portfolio() {
        let portfolio = Portfolio::new(100000.0);
        assert!((portfolio.cash - 100000.0).abs() < f64::EPSILON);
        assert!((portfolio.initial_capital - 100000.0).abs() < f64::EPSILON);
        assert!(!portfolio.is_long());
        assert!(portfolio.closed_trades.is_empty());
        assert!(portfolio.equity_curve.is_empty());
    }

    #[test]
    fn open_position_rejects_second() {
        let mut portfolio = Portfolio::new(100000.0);
        assert!(portfolio.open_position(sample_position()).is_ok());
        assert!(portfolio.open_position(sample_position()).is_err());
        assert!(portfolio.is_long());
    }

    #[test]
    fn take_position_returns_to_flat() {
        let mut portfolio = Portfolio::new(100000.0);
        portfolio.open_position(sample_position()).unwrap();
        assert!(portfolio.take_position().is_some());
        assert!(!portfolio.is_long());
        assert!(portfolio.take_position().is_none());
    }

    #[test]
    fn total_equity_flat_is_cash() {
        let portfolio = Portfolio::new(100000.0);
        assert!((portfolio.total_equity(123.0) - 100000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn total_equity_long_marks_to_market() {
        let mut portfolio = Portfolio::new(10_000.0);
        portfolio.cash = 0.0;
        portfolio.open_position(sample_position()).unwrap();
        assert!((portfolio.total_equity(110.0) - 11_000.0).abs() < 1e-9);
    }

    #[test]
    fn record_equity_appends() {
        let mut portfolio = Portfolio::new(100000.0);
        portfolio.record_equity(date(15), 105000.0);
        portfolio.record_equity(date(16), 104000.0);
        assert_eq!(portfolio.equity_curve.len(), 2);
        assert_eq!(portfolio.equity_curve[0].date, date(15));
        assert!((portfolio.final_equity() - 104000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn final_equity_defaults_to_initial() {
        let portfolio = Portfolio::new(5000.0);
        assert!((portfolio.final_equity() - 5000.0).abs() < f64::EPSILON);
    }
}
