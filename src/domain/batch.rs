//! Batch backtesting across an asset universe.
//!
//! Every asset is backtested independently: prices come from a [`PricePort`],
//! probabilities from the run context's predictors (fused when more than one
//! model is selected). A failing asset is recorded as skipped and never aborts
//! the batch. Output order depends only on the input, not on the worker count.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::backtest::{run_backtest, BacktestConfig, BacktestResult};
use super::error::ProbtraderError;
use super::metrics::{mean, median, std_dev, Metric};
use super::predictor::{ModelStats, Predictor, RunContext};
use super::series::{validate_probability, Observation, PricePoint};
use super::signal::{ClassThresholds, ConfidenceBands, FusedSignal, FusionMethod, SignalFuser};
use super::universe::AssetSpec;
use crate::ports::price_port::PricePort;
use crate::ports::report_port::ReportPort;

pub const DEFAULT_MIN_OBSERVATIONS: usize = 30;
pub const DEFAULT_HORIZON: u32 = 5;

/// Total return above which an asset is "excellent".
pub const EXCELLENT_RETURN: f64 = 0.50;
/// Lowest total return still rated "good".
pub const GOOD_RETURN: f64 = 0.20;

#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    /// Models to query; empty means every loaded predictor.
    pub models: Vec<String>,
    pub horizon: u32,
    pub fusion_method: FusionMethod,
    pub class_thresholds: ClassThresholds,
    pub confidence_bands: ConfidenceBands,
    pub backtest: BacktestConfig,
    /// Worker threads; 1 runs sequentially on the calling thread.
    pub workers: usize,
    pub min_observations: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            models: Vec::new(),
            horizon: DEFAULT_HORIZON,
            fusion_method: FusionMethod::Average,
            class_thresholds: ClassThresholds::default(),
            confidence_bands: ConfidenceBands::default(),
            backtest: BacktestConfig::default(),
            workers: 1,
            min_observations: DEFAULT_MIN_OBSERVATIONS,
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), ProbtraderError> {
        if self.horizon == 0 {
            return Err(ProbtraderError::configuration("horizon must be at least 1"));
        }
        if self.workers == 0 {
            return Err(ProbtraderError::configuration("workers must be at least 1"));
        }
        if self.min_observations == 0 {
            return Err(ProbtraderError::configuration(
                "min_observations must be at least 1",
            ));
        }
        self.fuser()?;
        self.backtest.validate()
    }

    /// The fuser every asset uses, with this config's method and bounds.
    pub fn fuser(&self) -> Result<SignalFuser, ProbtraderError> {
        SignalFuser::new(self.fusion_method)
            .with_class_thresholds(self.class_thresholds)?
            .with_confidence_bands(self.confidence_bands)
    }
}

/// Shared flag that stops a batch from starting further assets.
///
/// Clones observe the same flag. Assets already running finish normally.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceTier {
    Excellent,
    Good,
    Poor,
}

impl PerformanceTier {
    pub fn from_total_return(total_return: f64) -> Self {
        if total_return > EXCELLENT_RETURN {
            PerformanceTier::Excellent
        } else if total_return >= GOOD_RETURN {
            PerformanceTier::Good
        } else {
            PerformanceTier::Poor
        }
    }
}

impl fmt::Display for PerformanceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PerformanceTier::Excellent => f.write_str("excellent"),
            PerformanceTier::Good => f.write_str("good"),
            PerformanceTier::Poor => f.write_str("poor"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetBacktestSummary {
    pub asset_id: String,
    pub display_name: String,
    pub result: BacktestResult,
    pub tier: PerformanceTier,
    /// The labelled signal on the last backtested date.
    pub signal: FusedSignal,
    /// 1-based position in the batch ranking.
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    InsufficientObservations { observations: usize, minimum: usize },
    Failed(String),
    Cancelled,
}

impl SkipReason {
    fn from_error(err: &ProbtraderError) -> Self {
        match err.root() {
            ProbtraderError::InsufficientData {
                observations,
                minimum,
                ..
            } => SkipReason::InsufficientObservations {
                observations: *observations,
                minimum: *minimum,
            },
            other => SkipReason::Failed(other.to_string()),
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::InsufficientObservations {
                observations,
                minimum,
            } => write!(
                f,
                "insufficient data: {observations} observations, minimum {minimum}"
            ),
            SkipReason::Failed(reason) => f.write_str(reason),
            SkipReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedAsset {
    pub asset_id: String,
    pub display_name: String,
    pub reason: SkipReason,
}

/// Mean, median and population std of one metric across assets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricSummary {
    pub mean: Metric,
    pub median: Metric,
    pub std: Metric,
    /// Assets for which the metric was defined.
    pub count: usize,
}

impl MetricSummary {
    pub fn from_values(values: &[f64]) -> Self {
        let to_metric = |v: Option<f64>| v.map_or(Metric::Undefined, Metric::from_f64);
        MetricSummary {
            mean: to_metric(mean(values)),
            median: to_metric(median(values)),
            std: to_metric(std_dev(values)),
            count: values.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatchStatistics {
    pub total_return: MetricSummary,
    pub sharpe_ratio: MetricSummary,
    pub max_drawdown: MetricSummary,
    pub win_rate: MetricSummary,
}

impl BatchStatistics {
    /// Undefined per-asset values are left out of each metric's summary.
    pub fn from_summaries(summaries: &[AssetBacktestSummary]) -> Self {
        let collect = |f: fn(&BacktestResult) -> Option<f64>| -> Vec<f64> {
            summaries.iter().filter_map(|s| f(&s.result)).collect()
        };
        BatchStatistics {
            total_return: MetricSummary::from_values(&collect(|r| Some(r.total_return))),
            sharpe_ratio: MetricSummary::from_values(&collect(|r| r.sharpe_ratio.value())),
            max_drawdown: MetricSummary::from_values(&collect(|r| Some(r.max_drawdown))),
            win_rate: MetricSummary::from_values(&collect(|r| r.win_rate.value())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierCounts {
    pub excellent: usize,
    pub good: usize,
    pub poor: usize,
}

impl TierCounts {
    pub fn from_summaries(summaries: &[AssetBacktestSummary]) -> Self {
        summaries.iter().fold(TierCounts::default(), |mut counts, s| {
            match s.tier {
                PerformanceTier::Excellent => counts.excellent += 1,
                PerformanceTier::Good => counts.good += 1,
                PerformanceTier::Poor => counts.poor += 1,
            }
            counts
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    /// Successful assets, best first.
    pub ranked: Vec<AssetBacktestSummary>,
    /// Failed or cancelled assets, in input order.
    pub skipped: Vec<SkippedAsset>,
    pub statistics: BatchStatistics,
    pub tiers: TierCounts,
    pub cancelled: bool,
}

impl BatchSummary {
    pub fn processed_count(&self) -> usize {
        self.ranked.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    pub fn best(&self) -> Option<&AssetBacktestSummary> {
        self.ranked.first()
    }

    pub fn asset(&self, asset_id: &str) -> Option<&AssetBacktestSummary> {
        self.ranked.iter().find(|s| s.asset_id == asset_id)
    }
}

/// Ranking order: annualized return descending, then Sharpe descending with
/// undefined Sharpe last, then asset id ascending.
pub fn compare_for_rank(
    a: (f64, Metric, &str),
    b: (f64, Metric, &str),
) -> Ordering {
    let (a_return, a_sharpe, a_id) = a;
    let (b_return, b_sharpe, b_id) = b;
    b_return
        .total_cmp(&a_return)
        .then_with(|| match (a_sharpe.value(), b_sharpe.value()) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a_id.cmp(b_id))
}

fn rank(mut summaries: Vec<AssetBacktestSummary>) -> Vec<AssetBacktestSummary> {
    summaries.sort_by(|a, b| {
        compare_for_rank(
            (a.result.annualized_return, a.result.sharpe_ratio, a.asset_id.as_str()),
            (b.result.annualized_return, b.result.sharpe_ratio, b.asset_id.as_str()),
        )
    });
    for (i, summary) in summaries.iter_mut().enumerate() {
        summary.rank = i + 1;
    }
    summaries
}

enum AssetOutcome {
    Completed(BacktestResult, FusedSignal),
    Skipped(SkipReason),
}

/// Per-asset pipeline state shared read-only by all workers.
struct AssetWorker<'a> {
    prices: &'a dyn PricePort,
    models: Vec<&'a dyn Predictor>,
    weights: BTreeMap<String, ModelStats>,
    fuser: SignalFuser,
    backtest: &'a BacktestConfig,
    min_observations: usize,
    cancel: &'a CancelToken,
}

impl AssetWorker<'_> {
    fn process(&self, spec: &AssetSpec) -> AssetOutcome {
        if self.cancel.is_cancelled() {
            debug!(asset = %spec.asset_id, "batch cancelled, asset not started");
            return AssetOutcome::Skipped(SkipReason::Cancelled);
        }

        match self.backtest_asset(&spec.asset_id) {
            Ok((result, signal)) => {
                info!(
                    asset = %spec.asset_id,
                    total_return = result.total_return,
                    trades = result.trade_count(),
                    signal = %signal.predicted_class,
                    "backtest complete"
                );
                AssetOutcome::Completed(result, signal)
            }
            Err(err) => {
                let err = err.for_asset(&spec.asset_id);
                warn!(asset = %spec.asset_id, error = %err, "skipping asset");
                AssetOutcome::Skipped(SkipReason::from_error(&err))
            }
        }
    }

    fn backtest_asset(&self, asset: &str) -> Result<(BacktestResult, FusedSignal), ProbtraderError> {
        let prices = self.prices.fetch_prices(asset)?;
        let (observations, latest) = self.observations(asset, &prices)?;
        let signal = match latest {
            Some(signal) if observations.len() >= self.min_observations => signal,
            _ => {
                return Err(ProbtraderError::InsufficientData {
                    asset: asset.to_string(),
                    observations: observations.len(),
                    minimum: self.min_observations,
                });
            }
        };
        let result = run_backtest(asset, &observations, self.backtest)?;
        Ok((result, signal))
    }

    /// Pair each price with its probability. Dates no model covers are dropped.
    ///
    /// Also returns the labelled signal of the last kept date.
    fn observations(
        &self,
        asset: &str,
        prices: &[PricePoint],
    ) -> Result<(Vec<Observation>, Option<FusedSignal>), ProbtraderError> {
        let mut observations = Vec::with_capacity(prices.len());
        let mut latest = None;
        let mut dropped = 0usize;

        for point in prices {
            let signal = match self.models.as_slice() {
                [model] => match model.predict_probability(asset, point.date) {
                    Some(p) => {
                        validate_probability(p)?;
                        self.fuser.label(p, &[p])
                    }
                    None => {
                        dropped += 1;
                        continue;
                    }
                },
                models => {
                    let probabilities: BTreeMap<String, f64> = models
                        .iter()
                        .filter_map(|m| {
                            m.predict_probability(asset, point.date)
                                .map(|p| (m.name().to_string(), p))
                        })
                        .collect();
                    if probabilities.is_empty() {
                        dropped += 1;
                        continue;
                    }
                    self.fuser.fuse(&probabilities, &self.weights)?
                }
            };
            observations.push(Observation::new(point.date, point.close, signal.fused_probability));
            latest = Some(signal);
        }

        if dropped > 0 {
            debug!(asset, dropped, "dates without a probability dropped");
        }
        Ok((observations, latest))
    }
}

/// Runs one batch over an asset universe.
pub struct BatchRunner<'a> {
    prices: &'a dyn PricePort,
    context: &'a RunContext,
    config: BatchConfig,
    report: Option<&'a dyn ReportPort>,
    cancel: CancelToken,
}

impl<'a> BatchRunner<'a> {
    pub fn new(prices: &'a dyn PricePort, context: &'a RunContext, config: BatchConfig) -> Self {
        BatchRunner {
            prices,
            context,
            config,
            report: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_report(mut self, report: &'a dyn ReportPort) -> Self {
        self.report = Some(report);
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// A handle that cancels this runner from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Backtest every asset and aggregate the results.
    ///
    /// Errors only on batch-level configuration problems; per-asset failures
    /// end up in [`BatchSummary::skipped`].
    pub fn run(&self, assets: &[AssetSpec]) -> Result<BatchSummary, ProbtraderError> {
        self.config.validate()?;
        let worker = self.worker()?;

        info!(
            assets = assets.len(),
            models = worker.models.len(),
            method = %self.config.fusion_method,
            workers = self.config.workers,
            "starting batch"
        );

        let outcomes: Vec<AssetOutcome> = if self.config.workers <= 1 {
            assets.iter().map(|spec| worker.process(spec)).collect()
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.workers)
                .build()
                .map_err(|e| {
                    ProbtraderError::configuration(format!("failed to build worker pool: {e}"))
                })?;
            pool.install(|| assets.par_iter().map(|spec| worker.process(spec)).collect())
        };

        let mut completed = Vec::new();
        let mut skipped = Vec::new();
        for (spec, outcome) in assets.iter().zip(outcomes) {
            match outcome {
                AssetOutcome::Completed(result, signal) => completed.push(AssetBacktestSummary {
                    asset_id: spec.asset_id.clone(),
                    display_name: spec.display_name.clone(),
                    tier: PerformanceTier::from_total_return(result.total_return),
                    result,
                    signal,
                    rank: 0,
                }),
                AssetOutcome::Skipped(reason) => skipped.push(SkippedAsset {
                    asset_id: spec.asset_id.clone(),
                    display_name: spec.display_name.clone(),
                    reason,
                }),
            }
        }

        let cancelled = self.cancel.is_cancelled()
            || skipped.iter().any(|s| s.reason == SkipReason::Cancelled);
        let ranked = rank(completed);
        let summary = BatchSummary {
            statistics: BatchStatistics::from_summaries(&ranked),
            tiers: TierCounts::from_summaries(&ranked),
            ranked,
            skipped,
            cancelled,
        };

        info!(
            processed = summary.processed_count(),
            skipped = summary.skipped_count(),
            cancelled = summary.cancelled,
            "batch complete"
        );

        if let Some(report) = self.report {
            self.write_reports(report, &summary);
        }
        Ok(summary)
    }

    fn worker(&self) -> Result<AssetWorker<'_>, ProbtraderError> {
        let models = self.context.select(&self.config.models)?;
        if let Some(m) = models.iter().find(|m| m.horizon() != self.config.horizon) {
            return Err(ProbtraderError::configuration(format!(
                "model '{}' predicts horizon {}, batch horizon is {}",
                m.name(),
                m.horizon(),
                self.config.horizon
            )));
        }

        let weights = self.context.weights_for(&models, self.config.horizon);
        if self.config.fusion_method == FusionMethod::Weighted && models.len() > 1 {
            if !weights.values().any(|s| s.weight().is_some()) {
                return Err(ProbtraderError::configuration(format!(
                    "weighted fusion needs model statistics for horizon {}",
                    self.config.horizon
                )));
            }
            for m in &models {
                if weights.get(m.name()).and_then(ModelStats::weight).is_none() {
                    warn!(
                        model = m.name(),
                        horizon = self.config.horizon,
                        "no usable statistics, model excluded from weighted fusion"
                    );
                }
            }
        }

        Ok(AssetWorker {
            prices: self.prices,
            models,
            weights,
            fuser: self.config.fuser()?,
            backtest: &self.config.backtest,
            min_observations: self.config.min_observations,
            cancel: &self.cancel,
        })
    }

    fn write_reports(&self, report: &dyn ReportPort, summary: &BatchSummary) {
        for asset in &summary.ranked {
            if let Err(e) = report.write_asset(asset) {
                warn!(asset = %asset.asset_id, error = %e, "failed to write asset report");
            }
        }
        if let Err(e) = report.write_batch(summary) {
            warn!(error = %e, "failed to write batch summary");
        }
    }
}
