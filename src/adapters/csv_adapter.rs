//! CSV file data adapters.
//!
//! Prices live in one file per asset (`<STEM>.csv`, columns `date,close`),
//! where the stem is the asset id encoded by
//! [`artifact_stem`](crate::domain::universe::artifact_stem).
//! Predictions and model statistics are single long-format files loaded once
//! per run.

use crate::domain::error::ProbtraderError;
use crate::domain::predictor::{ModelFamily, ModelStats, ModelStatsTable, SeriesPredictor};
use crate::domain::series::{validate_probability, PricePoint, ProbabilityPoint, ProbabilitySeries};
use crate::domain::universe::artifact_stem;
use crate::ports::price_port::PricePort;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, asset: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", artifact_stem(asset)))
    }
}

#[derive(Debug, Deserialize)]
struct PriceRow {
    date: NaiveDate,
    close: f64,
}

impl PricePort for CsvAdapter {
    fn fetch_prices(&self, asset: &str) -> Result<Vec<PricePoint>, ProbtraderError> {
        let path = self.csv_path(asset);
        if !path.exists() {
            return Err(ProbtraderError::data(format!(
                "no price file at {}",
                path.display()
            )));
        }

        let mut rdr = csv::Reader::from_path(&path)?;
        let mut prices = Vec::new();
        for row in rdr.deserialize::<PriceRow>() {
            let row = row?;
            prices.push(PricePoint {
                date: row.date,
                close: row.close,
            });
        }

        prices.sort_by_key(|p| p.date);
        debug!(asset, rows = prices.len(), path = %path.display(), "loaded prices");
        Ok(prices)
    }
}

#[derive(Debug, Deserialize)]
struct PredictionRow {
    date: NaiveDate,
    asset: String,
    model: String,
    probability: f64,
    #[serde(default)]
    family: Option<String>,
}

/// Load a long-format prediction file (`date,asset,model,probability[,family]`)
/// into one predictor per model, all at `horizon`.
///
/// A model without a `family` column value is tagged [`ModelFamily::Other`].
pub fn load_predictions<P: AsRef<Path>>(
    path: P,
    horizon: u32,
) -> Result<Vec<SeriesPredictor>, ProbtraderError> {
    let path = path.as_ref();
    let mut rdr = csv::Reader::from_path(path)?;

    let mut families: BTreeMap<String, ModelFamily> = BTreeMap::new();
    let mut points: BTreeMap<(String, String), Vec<ProbabilityPoint>> = BTreeMap::new();

    for row in rdr.deserialize::<PredictionRow>() {
        let row = row?;
        validate_probability(row.probability).map_err(|_| {
            ProbtraderError::data(format!(
                "{} {} {}: probability {} outside [0, 1]",
                row.model, row.asset, row.date, row.probability
            ))
        })?;

        if !families.contains_key(&row.model) {
            let family = match row.family.as_deref().map(str::trim) {
                Some(f) if !f.is_empty() => f.parse()?,
                _ => ModelFamily::Other,
            };
            families.insert(row.model.clone(), family);
        }

        points
            .entry((row.model, row.asset.trim().to_uppercase()))
            .or_default()
            .push(ProbabilityPoint {
                date: row.date,
                probability: row.probability,
            });
    }

    let mut predictors: BTreeMap<String, SeriesPredictor> = families
        .iter()
        .map(|(model, family)| (model.clone(), SeriesPredictor::new(model, *family, horizon)))
        .collect();

    for ((model, asset), pts) in points {
        let series = ProbabilitySeries::new(&model, &asset, horizon, pts);
        if let Some(predictor) = predictors.remove(&model) {
            predictors.insert(model, predictor.with_series(series)?);
        }
    }

    info!(
        models = predictors.len(),
        path = %path.display(),
        "loaded predictions"
    );
    Ok(predictors.into_values().collect())
}

#[derive(Debug, Deserialize)]
struct ModelStatsRow {
    model: String,
    horizon: u32,
    accuracy: f64,
    std: f64,
}

/// Load historical model statistics (`model,horizon,accuracy,std`).
pub fn load_model_stats<P: AsRef<Path>>(path: P) -> Result<ModelStatsTable, ProbtraderError> {
    let path = path.as_ref();
    let mut rdr = csv::Reader::from_path(path)?;
    let mut table = ModelStatsTable::new();

    for row in rdr.deserialize::<ModelStatsRow>() {
        let row = row?;
        table.insert(
            &row.model,
            row.horizon,
            ModelStats {
                accuracy: row.accuracy,
                std: row.std,
            },
        );
    }

    info!(entries = table.len(), path = %path.display(), "loaded model statistics");
    Ok(table)
}
