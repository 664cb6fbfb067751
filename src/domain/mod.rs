//! Core domain types and logic.

pub mod series;
pub mod position;
pub mod portfolio;
pub mod execution;
pub mod metrics;
pub mod signal;
pub mod predictor;
pub mod backtest;
pub mod batch;
pub mod universe;
pub mod config_validation;
pub mod error;
