//! Configuration validation.
//!
//! Validates every config key before a batch runs, so a bad value fails fast
//! with the section and key that caused it.

use crate::domain::batch::{DEFAULT_HORIZON, DEFAULT_MIN_OBSERVATIONS};
use crate::domain::error::ProbtraderError;
use crate::domain::signal::FusionMethod;
use crate::domain::universe::parse_assets;
use crate::ports::config_port::ConfigPort;

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), ProbtraderError> {
    validate_confidence_threshold(config)?;
    validate_cost(config, "commission")?;
    validate_cost(config, "slippage")?;
    validate_initial_capital(config)?;
    Ok(())
}

pub fn validate_signal_config(config: &dyn ConfigPort) -> Result<(), ProbtraderError> {
    validate_fusion_method(config)?;
    validate_horizon(config)?;
    validate_bounds(config, "up_threshold", 0.60, "neutral_threshold", 0.50)?;
    validate_bounds(config, "high_confidence", 0.60, "medium_confidence", 0.50)?;
    Ok(())
}

pub fn validate_batch_config(config: &dyn ConfigPort) -> Result<(), ProbtraderError> {
    validate_assets(config)?;
    validate_positive_int(config, "batch", "workers", 1)?;
    validate_positive_int(
        config,
        "batch",
        "min_observations",
        DEFAULT_MIN_OBSERVATIONS as i64,
    )?;
    validate_data_paths(config)?;
    Ok(())
}

/// Every section, in the order a run reads them.
pub fn validate_all(config: &dyn ConfigPort) -> Result<(), ProbtraderError> {
    validate_backtest_config(config)?;
    validate_signal_config(config)?;
    validate_batch_config(config)
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> ProbtraderError {
    ProbtraderError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn validate_confidence_threshold(config: &dyn ConfigPort) -> Result<(), ProbtraderError> {
    let value = config.get_double("backtest", "confidence_threshold", 0.55);
    if !(0.0..=1.0).contains(&value) {
        return Err(invalid(
            "backtest",
            "confidence_threshold",
            "confidence_threshold must be between 0 and 1",
        ));
    }
    Ok(())
}

fn validate_cost(config: &dyn ConfigPort, key: &str) -> Result<(), ProbtraderError> {
    let value = config.get_double("backtest", key, 0.001);
    if !(0.0..1.0).contains(&value) {
        return Err(invalid(
            "backtest",
            key,
            format!("{key} must be a fraction in [0, 1)"),
        ));
    }
    Ok(())
}

fn validate_initial_capital(config: &dyn ConfigPort) -> Result<(), ProbtraderError> {
    let value = config.get_double("backtest", "initial_capital", 10_000.0);
    if value <= 0.0 {
        return Err(invalid(
            "backtest",
            "initial_capital",
            "initial_capital must be positive",
        ));
    }
    Ok(())
}

fn validate_fusion_method(config: &dyn ConfigPort) -> Result<(), ProbtraderError> {
    match config.get_string("signal", "fusion_method") {
        None => Ok(()),
        Some(s) => s
            .parse::<FusionMethod>()
            .map(|_| ())
            .map_err(|_| invalid("signal", "fusion_method", format!("unknown fusion method '{s}'"))),
    }
}

fn validate_horizon(config: &dyn ConfigPort) -> Result<(), ProbtraderError> {
    validate_positive_int(config, "signal", "horizon", DEFAULT_HORIZON as i64)
}

fn validate_positive_int(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: i64,
) -> Result<(), ProbtraderError> {
    let value = config.get_int(section, key, default);
    if value < 1 {
        return Err(invalid(section, key, format!("{key} must be at least 1")));
    }
    Ok(())
}

fn validate_bounds(
    config: &dyn ConfigPort,
    upper_key: &str,
    upper_default: f64,
    lower_key: &str,
    lower_default: f64,
) -> Result<(), ProbtraderError> {
    let upper = config.get_double("signal", upper_key, upper_default);
    let lower = config.get_double("signal", lower_key, lower_default);
    for (key, value) in [(upper_key, upper), (lower_key, lower)] {
        if !(0.0..=1.0).contains(&value) {
            return Err(invalid("signal", key, format!("{key} must be between 0 and 1")));
        }
    }
    if lower > upper {
        return Err(invalid(
            "signal",
            lower_key,
            format!("{lower_key} must not exceed {upper_key}"),
        ));
    }
    Ok(())
}

fn validate_assets(config: &dyn ConfigPort) -> Result<(), ProbtraderError> {
    match config.get_string("batch", "assets") {
        Some(s) if !s.trim().is_empty() => parse_assets(&s)
            .map(|_| ())
            .map_err(|e| invalid("batch", "assets", e.to_string())),
        _ => Err(ProbtraderError::ConfigMissing {
            section: "batch".to_string(),
            key: "assets".to_string(),
        }),
    }
}

fn validate_data_paths(config: &dyn ConfigPort) -> Result<(), ProbtraderError> {
    for key in ["price_dir", "predictions"] {
        match config.get_string("data", key) {
            Some(s) if !s.trim().is_empty() => {}
            _ => {
                return Err(ProbtraderError::ConfigMissing {
                    section: "data".to_string(),
                    key: key.to_string(),
                })
            }
        }
    }
    Ok(())
}
