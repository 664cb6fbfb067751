//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::adapters::csv_adapter::{load_model_stats, load_predictions, CsvAdapter};
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::backtest::BacktestConfig;
use crate::domain::batch::{BatchConfig, BatchRunner, BatchSummary, DEFAULT_HORIZON, DEFAULT_MIN_OBSERVATIONS};
use crate::domain::config_validation::validate_all;
use crate::domain::error::ProbtraderError;
use crate::domain::predictor::{ModelStatsLookup, ModelStatsTable, Predictor, RunContext};
use crate::domain::signal::{ClassThresholds, ConfidenceBands, FusedSignal, FusionMethod, SignalFuser};
use crate::domain::universe::{parse_assets, AssetSpec};
use crate::ports::config_port::ConfigPort;

#[derive(Parser, Debug)]
#[command(name = "probtrader", about = "Probability-driven long/flat backtester")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Backtest every configured asset
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Directory for CSV artifacts (overrides [report] output_dir)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Backtest only these assets (same syntax as [batch] assets)
        #[arg(long)]
        asset: Option<String>,
        #[arg(short, long)]
        workers: Option<usize>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Fuse probabilities given on the command line
    Fuse {
        /// Fusion method (overrides [signal] fusion_method; default average)
        #[arg(short, long)]
        method: Option<String>,
        /// Read fusion method and class/confidence bounds from [signal]
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// One model estimate, as MODEL=PROBABILITY
        #[arg(short, long = "prob", value_name = "MODEL=P", required = true)]
        probs: Vec<String>,
        /// Model statistics CSV, required for weighted fusion
        #[arg(long)]
        stats: Option<PathBuf>,
        #[arg(long, default_value_t = DEFAULT_HORIZON)]
        horizon: u32,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

/// Log to stderr so stdout carries only command output. `RUST_LOG` overrides
/// the default `info` level.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub fn run(cli: Cli) -> ExitCode {
    let outcome = match cli.command {
        Command::Backtest {
            config,
            output,
            asset,
            workers,
            dry_run,
        } => {
            if dry_run {
                run_dry_run(&config, asset.as_deref())
            } else {
                run_backtest(&config, output.as_deref(), asset.as_deref(), workers)
            }
        }
        Command::Fuse {
            method,
            config,
            probs,
            stats,
            horizon,
        } => run_fuse(method.as_deref(), config.as_deref(), &probs, stats.as_deref(), horizon),
        Command::Validate { config } => run_validate(&config),
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ProbtraderError> {
    info!(path = %path.display(), "loading config");
    FileConfigAdapter::from_file(path)
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> ProbtraderError {
    ProbtraderError::ConfigInvalid {
        section: section.into(),
        key: key.into(),
        reason: reason.into(),
    }
}

fn positive_int<T: TryFrom<i64>>(
    adapter: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: i64,
) -> Result<T, ProbtraderError> {
    let value = adapter.get_int(section, key, default);
    if value < 1 {
        return Err(invalid(section, key, format!("{key} must be at least 1")));
    }
    T::try_from(value).map_err(|_| invalid(section, key, format!("{key} is out of range")))
}

pub fn build_backtest_config(adapter: &dyn ConfigPort) -> Result<BacktestConfig, ProbtraderError> {
    let defaults = BacktestConfig::default();
    let config = BacktestConfig {
        confidence_threshold: adapter.get_double(
            "backtest",
            "confidence_threshold",
            defaults.confidence_threshold,
        ),
        commission: adapter.get_double("backtest", "commission", defaults.commission),
        slippage: adapter.get_double("backtest", "slippage", defaults.slippage),
        initial_capital: adapter.get_double("backtest", "initial_capital", defaults.initial_capital),
        force_close_at_end: adapter.get_bool(
            "backtest",
            "force_close_at_end",
            defaults.force_close_at_end,
        ),
    };
    config.validate()?;
    Ok(config)
}

pub fn build_fusion_method(adapter: &dyn ConfigPort) -> Result<FusionMethod, ProbtraderError> {
    match adapter.get_string("signal", "fusion_method") {
        Some(s) => s.parse(),
        None => Ok(FusionMethod::Average),
    }
}

pub fn build_signal_fuser(adapter: &dyn ConfigPort) -> Result<SignalFuser, ProbtraderError> {
    let thresholds = ClassThresholds::default();
    let bands = ConfidenceBands::default();
    SignalFuser::new(build_fusion_method(adapter)?)
        .with_class_thresholds(ClassThresholds {
            up: adapter.get_double("signal", "up_threshold", thresholds.up),
            neutral: adapter.get_double("signal", "neutral_threshold", thresholds.neutral),
        })?
        .with_confidence_bands(ConfidenceBands {
            high: adapter.get_double("signal", "high_confidence", bands.high),
            medium: adapter.get_double("signal", "medium_confidence", bands.medium),
        })
}

pub fn build_batch_config(adapter: &dyn ConfigPort) -> Result<BatchConfig, ProbtraderError> {
    let fuser = build_signal_fuser(adapter)?;
    let config = BatchConfig {
        models: adapter.get_list("signal", "models"),
        horizon: positive_int(adapter, "signal", "horizon", DEFAULT_HORIZON as i64)?,
        fusion_method: fuser.method,
        class_thresholds: fuser.class_thresholds,
        confidence_bands: fuser.confidence_bands,
        backtest: build_backtest_config(adapter)?,
        workers: positive_int(adapter, "batch", "workers", 1)?,
        min_observations: positive_int(
            adapter,
            "batch",
            "min_observations",
            DEFAULT_MIN_OBSERVATIONS as i64,
        )?,
    };
    config.validate()?;
    Ok(config)
}

/// `--asset` wins over `[batch] assets`.
pub fn resolve_assets(
    asset_override: Option<&str>,
    config: &dyn ConfigPort,
) -> Result<Vec<AssetSpec>, ProbtraderError> {
    let (source, key) = match asset_override {
        Some(s) => (s.to_string(), "--asset"),
        None => (
            config
                .get_string("batch", "assets")
                .ok_or_else(|| ProbtraderError::ConfigMissing {
                    section: "batch".into(),
                    key: "assets".into(),
                })?,
            "assets",
        ),
    };
    parse_assets(&source).map_err(|e| invalid("batch", key, e.to_string()))
}

fn required_path(config: &dyn ConfigPort, section: &str, key: &str) -> Result<PathBuf, ProbtraderError> {
    match config.get_string(section, key) {
        Some(s) if !s.trim().is_empty() => Ok(PathBuf::from(s.trim())),
        _ => Err(ProbtraderError::ConfigMissing {
            section: section.into(),
            key: key.into(),
        }),
    }
}

/// Predictors and model statistics named by the `[data]` section.
pub fn build_run_context(config: &dyn ConfigPort, horizon: u32) -> Result<RunContext, ProbtraderError> {
    let predictions = required_path(config, "data", "predictions")?;
    let predictors: Vec<Box<dyn Predictor>> = load_predictions(&predictions, horizon)?
        .into_iter()
        .map(|p| Box::new(p) as Box<dyn Predictor>)
        .collect();

    let stats: Box<dyn ModelStatsLookup> = match config.get_string("data", "model_stats") {
        Some(path) if !path.trim().is_empty() => Box::new(load_model_stats(path.trim())?),
        _ => Box::new(ModelStatsTable::new()),
    };

    Ok(RunContext::new(predictors, stats))
}

fn run_backtest(
    config_path: &Path,
    output: Option<&Path>,
    asset_override: Option<&str>,
    workers: Option<usize>,
) -> Result<ExitCode, ProbtraderError> {
    let config = load_config(config_path)?;
    validate_all(&config)?;

    let assets = resolve_assets(asset_override, &config)?;
    let mut batch = build_batch_config(&config)?;
    if let Some(w) = workers {
        batch.workers = w;
    }

    let prices = CsvAdapter::new(required_path(&config, "data", "price_dir")?);
    let context = build_run_context(&config, batch.horizon)?;

    let output_dir = output
        .map(Path::to_path_buf)
        .or_else(|| config.get_string("report", "output_dir").map(PathBuf::from));
    let report = output_dir.map(CsvReportAdapter::new).transpose()?;

    let mut runner = BatchRunner::new(&prices, &context, batch);
    if let Some(report) = &report {
        runner = runner.with_report(report);
    }
    let summary = runner.run(&assets)?;

    print_summary(&summary);
    if let Some(report) = &report {
        println!("\nArtifacts written to: {}", report.output_dir().display());
    }

    if summary.processed_count() == 0 {
        eprintln!("error: no asset could be backtested");
        return Ok(ExitCode::from(5));
    }
    Ok(ExitCode::SUCCESS)
}

pub fn print_summary(summary: &BatchSummary) {
    println!("=== Ranked Results ===");
    println!(
        "{:>4}  {:<10} {:<24} {:<10} {:>9} {:>9} {:>7} {:>8} {:>7} {:>6}  {:<8}",
        "Rank", "Asset", "Name", "Tier", "Return", "Annual", "Sharpe", "MaxDD", "WinRate", "Trades", "Signal"
    );
    for s in &summary.ranked {
        let r = &s.result;
        println!(
            "{:>4}  {:<10} {:<24} {:<10} {:>8.2}% {:>8.2}% {:>7} {:>7.1}% {:>7} {:>6}  {:<8}",
            s.rank,
            s.asset_id,
            s.display_name,
            s.tier.to_string(),
            r.total_return * 100.0,
            r.annualized_return * 100.0,
            format!("{:.2}", r.sharpe_ratio),
            r.max_drawdown * 100.0,
            format!("{:.2}", r.win_rate),
            r.trade_count(),
            s.signal.predicted_class.to_string(),
        );
    }

    if !summary.skipped.is_empty() {
        println!("\n=== Skipped ===");
        for s in &summary.skipped {
            println!("  {}: {}", s.asset_id, s.reason);
        }
    }

    let stats = &summary.statistics;
    println!("\n=== Cross-Asset Statistics ===");
    println!("{:<14} {:>10} {:>10} {:>10}", "Metric", "Mean", "Median", "Std");
    for (name, m) in [
        ("total_return", &stats.total_return),
        ("sharpe_ratio", &stats.sharpe_ratio),
        ("max_drawdown", &stats.max_drawdown),
        ("win_rate", &stats.win_rate),
    ] {
        println!(
            "{:<14} {:>10} {:>10} {:>10}",
            name,
            format!("{:.4}", m.mean),
            format!("{:.4}", m.median),
            format!("{:.4}", m.std)
        );
    }

    println!(
        "\nProcessed: {}  Skipped: {}  Tiers: {} excellent, {} good, {} poor{}",
        summary.processed_count(),
        summary.skipped_count(),
        summary.tiers.excellent,
        summary.tiers.good,
        summary.tiers.poor,
        if summary.cancelled { "  (cancelled)" } else { "" },
    );
}

fn run_validate(config_path: &Path) -> Result<ExitCode, ProbtraderError> {
    let config = load_config(config_path)?;
    validate_all(&config)?;
    build_batch_config(&config)?;
    build_signal_fuser(&config)?;
    println!("Config validated successfully");
    Ok(ExitCode::SUCCESS)
}

pub fn run_dry_run(config_path: &Path, asset_override: Option<&str>) -> Result<ExitCode, ProbtraderError> {
    let config = load_config(config_path)?;
    validate_all(&config)?;
    let assets = resolve_assets(asset_override, &config)?;
    let batch = build_batch_config(&config)?;

    println!("Config validated successfully");
    println!("\nSignal:");
    println!("  fusion_method: {}", batch.fusion_method);
    println!("  horizon:       {}", batch.horizon);
    println!(
        "  class bounds:  up > {}, neutral > {}",
        batch.class_thresholds.up, batch.class_thresholds.neutral
    );
    println!(
        "  confidence:    high > {}, medium > {}",
        batch.confidence_bands.high, batch.confidence_bands.medium
    );
    if batch.models.is_empty() {
        println!("  models:        all loaded");
    } else {
        println!("  models:        {}", batch.models.join(", "));
    }
    println!("\nBacktest:");
    println!("  confidence_threshold: {}", batch.backtest.confidence_threshold);
    println!("  commission:           {}", batch.backtest.commission);
    println!("  slippage:             {}", batch.backtest.slippage);
    println!("  initial_capital:      {}", batch.backtest.initial_capital);
    println!("  force_close_at_end:   {}", batch.backtest.force_close_at_end);
    println!("\nUniverse ({} assets, {} workers):", assets.len(), batch.workers);
    for a in &assets {
        println!("  {} ({})", a.asset_id, a.display_name);
    }
    println!("\nDry run complete: configuration is valid");
    Ok(ExitCode::SUCCESS)
}

/// Parse `MODEL=PROBABILITY`.
pub fn parse_prob_arg(arg: &str) -> Result<(String, f64), ProbtraderError> {
    let (model, value) = arg.split_once('=').ok_or_else(|| {
        ProbtraderError::configuration(format!("expected MODEL=PROBABILITY, got '{arg}'"))
    })?;
    let model = model.trim();
    if model.is_empty() {
        return Err(ProbtraderError::configuration(format!(
            "missing model name in '{arg}'"
        )));
    }
    let p: f64 = value.trim().parse().map_err(|_| {
        ProbtraderError::data(format!("'{}' is not a probability", value.trim()))
    })?;
    Ok((model.to_string(), p))
}

/// Fuse `MODEL=P` arguments. Bounds and the default method come from
/// `config`'s `[signal]` section when given; `method` overrides the method.
pub fn fuse_probabilities(
    method: Option<&str>,
    config: Option<&dyn ConfigPort>,
    probs: &[String],
    stats_path: Option<&Path>,
    horizon: u32,
) -> Result<FusedSignal, ProbtraderError> {
    let mut fuser = match config {
        Some(config) => build_signal_fuser(config)?,
        None => SignalFuser::new(FusionMethod::Average),
    };
    if let Some(method) = method {
        fuser.method = method.parse()?;
    }

    let mut probabilities = BTreeMap::new();
    for arg in probs {
        let (model, p) = parse_prob_arg(arg)?;
        if probabilities.insert(model.clone(), p).is_some() {
            return Err(ProbtraderError::configuration(format!(
                "model '{model}' given more than once"
            )));
        }
    }

    let weights = match stats_path {
        Some(path) => {
            let table = load_model_stats(path)?;
            probabilities
                .keys()
                .filter_map(|m| table.stats(m, horizon).map(|s| (m.clone(), s)))
                .collect()
        }
        None => BTreeMap::new(),
    };

    fuser.fuse(&probabilities, &weights)
}

fn run_fuse(
    method: Option<&str>,
    config_path: Option<&Path>,
    probs: &[String],
    stats_path: Option<&Path>,
    horizon: u32,
) -> Result<ExitCode, ProbtraderError> {
    let config = config_path.map(load_config).transpose()?;
    let signal = fuse_probabilities(
        method,
        config.as_ref().map(|c| c as &dyn ConfigPort),
        probs,
        stats_path,
        horizon,
    )?;
    println!("fused_probability: {:.4}", signal.fused_probability);
    println!("predicted_class:   {}", signal.predicted_class);
    println!("confidence_tier:   {}", signal.confidence_tier);
    println!("agreement:         {:.4}", signal.agreement);
    println!("models_used:       {}", signal.models_used);
    Ok(ExitCode::SUCCESS)
}
