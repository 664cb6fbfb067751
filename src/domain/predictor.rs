//! Prediction capabilities and the per-run context that owns them.
//!
//! Model training and inference live outside this crate. The core only asks a
//! [`Predictor`] for a probability and a [`ModelStatsLookup`] for the
//! accuracy/std statistics used to weight models.

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use super::error::ProbtraderError;
use super::series::ProbabilitySeries;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFamily {
    GradientBoosting,
    RecurrentNetwork,
    Other,
}

impl FromStr for ModelFamily {
    type Err = ProbtraderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gradient_boosting" | "gbm" | "xgboost" | "lightgbm" => Ok(ModelFamily::GradientBoosting),
            "recurrent" | "rnn" | "lstm" | "gru" => Ok(ModelFamily::RecurrentNetwork),
            "other" => Ok(ModelFamily::Other),
            other => Err(ProbtraderError::configuration(format!(
                "unknown model family '{other}'"
            ))),
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelFamily::GradientBoosting => f.write_str("gradient_boosting"),
            ModelFamily::RecurrentNetwork => f.write_str("recurrent"),
            ModelFamily::Other => f.write_str("other"),
        }
    }
}

/// Source of "probability of price increase" estimates for one model.
pub trait Predictor: Send + Sync {
    fn name(&self) -> &str;

    fn family(&self) -> ModelFamily;

    fn horizon(&self) -> u32;

    /// `None` when the model has no estimate for this asset and date.
    fn predict_probability(&self, asset: &str, date: NaiveDate) -> Option<f64>;
}

/// A predictor backed by probabilities produced ahead of time.
#[derive(Debug, Clone)]
pub struct SeriesPredictor {
    name: String,
    family: ModelFamily,
    horizon: u32,
    series: HashMap<String, ProbabilitySeries>,
}

impl SeriesPredictor {
    pub fn new(name: &str, family: ModelFamily, horizon: u32) -> Self {
        Self {
            name: name.to_string(),
            family,
            horizon,
            series: HashMap::new(),
        }
    }

    /// Adds (or replaces) one asset's series. Series for another horizon are rejected.
    pub fn with_series(mut self, series: ProbabilitySeries) -> Result<Self, ProbtraderError> {
        if series.horizon != self.horizon {
            return Err(ProbtraderError::configuration(format!(
                "series for {} has horizon {}, predictor {} expects {}",
                series.asset, series.horizon, self.name, self.horizon
            )));
        }
        self.series.insert(series.asset.clone(), series);
        Ok(self)
    }

    pub fn assets(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }
}

impl Predictor for SeriesPredictor {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> ModelFamily {
        self.family
    }

    fn horizon(&self) -> u32 {
        self.horizon
    }

    fn predict_probability(&self, asset: &str, date: NaiveDate) -> Option<f64> {
        self.series.get(asset)?.get(date)
    }
}

/// Historical accuracy and its standard deviation for one model and horizon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelStats {
    pub accuracy: f64,
    pub std: f64,
}

impl ModelStats {
    /// accuracy / std, or `None` when the statistics cannot carry a weight.
    pub fn weight(&self) -> Option<f64> {
        if !self.accuracy.is_finite() || self.accuracy < 0.0 {
            return None;
        }
        if !self.std.is_finite() || self.std <= 0.0 {
            return None;
        }
        Some(self.accuracy / self.std)
    }
}

pub trait ModelStatsLookup: Send + Sync {
    fn stats(&self, model: &str, horizon: u32) -> Option<ModelStats>;
}

#[derive(Debug, Clone, Default)]
pub struct ModelStatsTable {
    entries: HashMap<(String, u32), ModelStats>,
}

impl ModelStatsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, model: &str, horizon: u32, stats: ModelStats) {
        self.entries.insert((model.to_string(), horizon), stats);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ModelStatsLookup for ModelStatsTable {
    fn stats(&self, model: &str, horizon: u32) -> Option<ModelStats> {
        self.entries.get(&(model.to_string(), horizon)).copied()
    }
}

/// Everything a batch run needs from the outside world besides prices.
///
/// Built once per run and passed explicitly; nothing here is global.
pub struct RunContext {
    predictors: Vec<Box<dyn Predictor>>,
    stats: Box<dyn ModelStatsLookup>,
}

impl RunContext {
    pub fn new(predictors: Vec<Box<dyn Predictor>>, stats: Box<dyn ModelStatsLookup>) -> Self {
        Self { predictors, stats }
    }

    pub fn predictors(&self) -> &[Box<dyn Predictor>] {
        &self.predictors
    }

    pub fn predictor(&self, name: &str) -> Option<&dyn Predictor> {
        self.predictors
            .iter()
            .find(|p| p.name() == name)
            .map(|p| p.as_ref())
    }

    /// Resolve a model selection; an empty selection means every loaded predictor.
    pub fn select(&self, models: &[String]) -> Result<Vec<&dyn Predictor>, ProbtraderError> {
        if models.is_empty() {
            if self.predictors.is_empty() {
                return Err(ProbtraderError::configuration("no predictors loaded"));
            }
            return Ok(self.predictors.iter().map(|p| p.as_ref()).collect());
        }
        models
            .iter()
            .map(|m| {
                self.predictor(m).ok_or_else(|| {
                    ProbtraderError::configuration(format!("model '{m}' is not loaded"))
                })
            })
            .collect()
    }

    /// Weight table for the given models at `horizon`; models without stats are left out.
    pub fn weights_for(&self, models: &[&dyn Predictor], horizon: u32) -> BTreeMap<String, ModelStats> {
        models
            .iter()
            .filter_map(|p| {
                self.stats
                    .stats(p.name(), horizon)
                    .map(|s| (p.name().to_string(), s))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::series::ProbabilityPoint;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, day).unwrap()
    }

    fn predictor(name: &str) -> SeriesPredictor {
        SeriesPredictor::new(name, ModelFamily::GradientBoosting, 5)
            .with_series(ProbabilitySeries::new(
                name,
                "AAPL",
                5,
                vec![ProbabilityPoint { date: d(1), probability: 0.62 }],
            ))
            .unwrap()
    }

    fn context() -> RunContext {
        let mut table = ModelStatsTable::new();
        table.insert("xgb", 5, ModelStats { accuracy: 0.58, std: 0.04 });
        RunContext::new(
            vec![Box::new(predictor("xgb")), Box::new(predictor("lstm"))],
            Box::new(table),
        )
    }

    #[test]
    fn series_predictor_looks_up_asset_and_date() {
        let p = predictor("xgb");
        assert_eq!(p.predict_probability("AAPL", d(1)), Some(0.62));
        assert_eq!(p.predict_probability("AAPL", d(2)), None);
        assert_eq!(p.predict_probability("MSFT", d(1)), None);
    }

    #[test]
    fn series_with_wrong_horizon_is_rejected() {
        let result = SeriesPredictor::new("xgb", ModelFamily::Other, 5)
            .with_series(ProbabilitySeries::new("xgb", "AAPL", 10, vec![]));
        assert!(result.is_err());
    }

    #[test]
    fn model_family_parses_aliases() {
        assert_eq!("LSTM".parse::<ModelFamily>().unwrap(), ModelFamily::RecurrentNetwork);
        assert_eq!("xgboost".parse::<ModelFamily>().unwrap(), ModelFamily::GradientBoosting);
        assert!("svm".parse::<ModelFamily>().is_err());
    }

    #[test]
    fn model_stats_weight_requires_positive_std() {
        assert_eq!(ModelStats { accuracy: 0.6, std: 0.2 }.weight(), Some(0.6 / 0.2));
        assert_eq!(ModelStats { accuracy: 0.6, std: 0.0 }.weight(), None);
        assert_eq!(ModelStats { accuracy: -0.1, std: 0.2 }.weight(), None);
    }

    #[test]
    fn select_all_when_empty() {
        let ctx = context();
        assert_eq!(ctx.select(&[]).unwrap().len(), 2);
    }

    #[test]
    fn select_unknown_model_fails() {
        let ctx = context();
        let err = ctx.select(&["gru".to_string()]).err().unwrap();
        assert!(matches!(err, ProbtraderError::Configuration { .. }));
    }

    #[test]
    fn weights_skip_models_without_stats() {
        let ctx = context();
        let selected = ctx.select(&[]).unwrap();
        let weights = ctx.weights_for(&selected, 5);
        assert_eq!(weights.len(), 1);
        assert!(weights.contains_key("xgb"));
        assert!(ctx.weights_for(&selected, 10).is_empty());
    }
}
