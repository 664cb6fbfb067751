#![allow(dead_code)]

use chrono::{Days, NaiveDate};
use probtrader::domain::batch::{AssetBacktestSummary, BatchSummary, CancelToken};
use probtrader::domain::error::ProbtraderError;
use probtrader::domain::predictor::{
    ModelFamily, ModelStats, ModelStatsTable, Predictor, RunContext, SeriesPredictor,
};
use probtrader::domain::series::{PricePoint, ProbabilityPoint, ProbabilitySeries};
use probtrader::ports::price_port::PricePort;
use probtrader::ports::report_port::ReportPort;
use std::cell::RefCell;
use std::collections::HashMap;

pub const HORIZON: u32 = 5;

pub struct MockPricePort {
    pub data: HashMap<String, Vec<PricePoint>>,
    pub errors: HashMap<String, String>,
    /// Cancels the token when the named asset is fetched.
    pub cancel_on: Option<(String, CancelToken)>,
}

impl MockPricePort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
            cancel_on: None,
        }
    }

    pub fn with_prices(mut self, asset: &str, closes: &[f64]) -> Self {
        self.data.insert(asset.to_string(), prices(closes));
        self
    }

    pub fn with_error(mut self, asset: &str, reason: &str) -> Self {
        self.errors.insert(asset.to_string(), reason.to_string());
        self
    }

    pub fn cancelling_on(mut self, asset: &str, token: CancelToken) -> Self {
        self.cancel_on = Some((asset.to_string(), token));
        self
    }
}

impl PricePort for MockPricePort {
    fn fetch_prices(&self, asset: &str) -> Result<Vec<PricePoint>, ProbtraderError> {
        if let Some((trigger, token)) = &self.cancel_on {
            if trigger == asset {
                token.cancel();
            }
        }
        if let Some(reason) = self.errors.get(asset) {
            return Err(ProbtraderError::data(reason.clone()));
        }
        Ok(self.data.get(asset).cloned().unwrap_or_default())
    }
}

/// Records what a batch hands to the report sink.
#[derive(Default)]
pub struct RecordingReportPort {
    pub assets: RefCell<Vec<String>>,
    pub batches: RefCell<usize>,
    pub fail_assets: bool,
}

impl ReportPort for RecordingReportPort {
    fn write_asset(&self, summary: &AssetBacktestSummary) -> Result<(), ProbtraderError> {
        if self.fail_assets {
            return Err(ProbtraderError::Io(std::io::Error::other("disk full")));
        }
        self.assets.borrow_mut().push(summary.asset_id.clone());
        Ok(())
    }

    fn write_batch(&self, _summary: &BatchSummary) -> Result<(), ProbtraderError> {
        *self.batches.borrow_mut() += 1;
        Ok(())
    }
}

pub fn date(i: usize) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .checked_add_days(Days::new(i as u64))
        .unwrap()
}

pub fn prices(closes: &[f64]) -> Vec<PricePoint> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| PricePoint { date: date(i), close })
        .collect()
}

/// `n` closes growing by `daily` per step from 100.
pub fn trending(n: usize, daily: f64) -> Vec<f64> {
    (0..n).map(|i| 100.0 * (1.0 + daily).powi(i as i32)).collect()
}

/// `n` closes alternating up and down around a drift.
pub fn choppy(n: usize, drift: f64) -> Vec<f64> {
    (0..n)
        .map(|i| {
            let wiggle = if i % 2 == 0 { 1.0 } else { -1.0 };
            100.0 + drift * i as f64 + wiggle
        })
        .collect()
}

pub fn series(model: &str, asset: &str, probs: &[f64]) -> ProbabilitySeries {
    let points = probs
        .iter()
        .enumerate()
        .map(|(i, &probability)| ProbabilityPoint {
            date: date(i),
            probability,
        })
        .collect();
    ProbabilitySeries::new(model, asset, HORIZON, points)
}

pub fn constant(n: usize, p: f64) -> Vec<f64> {
    vec![p; n]
}

/// Builds a predictor from `(asset, probabilities)` pairs.
pub fn predictor(name: &str, family: ModelFamily, per_asset: &[(&str, Vec<f64>)]) -> SeriesPredictor {
    per_asset
        .iter()
        .fold(SeriesPredictor::new(name, family, HORIZON), |p, (asset, probs)| {
            p.with_series(series(name, asset, probs)).unwrap()
        })
}

pub fn context(predictors: Vec<SeriesPredictor>, stats: &[(&str, f64, f64)]) -> RunContext {
    let mut table = ModelStatsTable::new();
    for (model, accuracy, std) in stats {
        table.insert(
            model,
            HORIZON,
            ModelStats {
                accuracy: *accuracy,
                std: *std,
            },
        );
    }
    RunContext::new(
        predictors
            .into_iter()
            .map(|p| Box::new(p) as Box<dyn Predictor>)
            .collect(),
        Box::new(table),
    )
}
