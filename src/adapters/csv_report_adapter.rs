//! CSV artifact writer implementing ReportPort.
//!
//! Per-asset files are prefixed with the asset id so concurrent or repeated
//! batches over different assets never overwrite each other:
//!
//! - `<ASSET>_equity.csv`: date, strategy equity, benchmark equity
//! - `<ASSET>_trades.csv`: the trade ledger
//! - `batch_summary.csv`: one ranked row per successful asset, ending with
//!   the labelled signal of its last date
//! - `batch_skipped.csv`: skipped assets and why
//! - `batch_statistics.csv`: cross-asset mean/median/std per metric

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use crate::domain::batch::{AssetBacktestSummary, BatchSummary, MetricSummary, PerformanceTier};
use crate::domain::error::ProbtraderError;
use crate::domain::metrics::Metric;
use crate::domain::position::ExitReason;
use crate::domain::signal::{ConfidenceTier, SignalClass};
use crate::domain::universe::artifact_stem;
use crate::ports::report_port::ReportPort;

pub struct CsvReportAdapter {
    output_dir: PathBuf,
}

impl CsvReportAdapter {
    /// Creates `output_dir` if it does not exist.
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Result<Self, ProbtraderError> {
        let output_dir = output_dir.as_ref().to_path_buf();
        fs::create_dir_all(&output_dir)?;
        Ok(Self { output_dir })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn equity_path(&self, asset_id: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}_equity.csv", artifact_stem(asset_id)))
    }

    pub fn trades_path(&self, asset_id: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}_trades.csv", artifact_stem(asset_id)))
    }

    fn write_rows<T: CsvRow>(&self, path: &Path, rows: &[T]) -> Result<(), ProbtraderError> {
        let mut wtr = csv::Writer::from_path(path)?;
        // serde only emits the header alongside the first record
        if rows.is_empty() {
            wtr.write_record(T::HEADER)?;
        }
        for row in rows {
            wtr.serialize(row)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// A serializable artifact row. `HEADER` lists its fields in declaration order.
trait CsvRow: Serialize {
    const HEADER: &'static [&'static str];
}

#[derive(Serialize)]
struct EquityRow {
    date: NaiveDate,
    equity: f64,
    benchmark: Option<f64>,
}

impl CsvRow for EquityRow {
    const HEADER: &'static [&'static str] = &["date", "equity", "benchmark"];
}

#[derive(Serialize)]
struct TradeRow {
    entry_date: NaiveDate,
    exit_date: NaiveDate,
    entry_price: f64,
    exit_price: f64,
    shares: f64,
    realized_return: f64,
    costs_paid: f64,
    pnl: f64,
    holding_days: i64,
    exit_reason: ExitReason,
}

impl CsvRow for TradeRow {
    const HEADER: &'static [&'static str] = &[
        "entry_date",
        "exit_date",
        "entry_price",
        "exit_price",
        "shares",
        "realized_return",
        "costs_paid",
        "pnl",
        "holding_days",
        "exit_reason",
    ];
}

#[derive(Serialize)]
struct SummaryRow<'a> {
    rank: usize,
    asset_id: &'a str,
    display_name: &'a str,
    tier: PerformanceTier,
    total_return: f64,
    annualized_return: f64,
    sharpe_ratio: Metric,
    sortino_ratio: Metric,
    max_drawdown: f64,
    win_rate: Metric,
    information_ratio: Metric,
    benchmark_return: f64,
    excess_return: f64,
    trades: usize,
    final_capital: f64,
    latest_probability: f64,
    latest_signal: SignalClass,
    latest_confidence: ConfidenceTier,
}

impl CsvRow for SummaryRow<'_> {
    const HEADER: &'static [&'static str] = &[
        "rank",
        "asset_id",
        "display_name",
        "tier",
        "total_return",
        "annualized_return",
        "sharpe_ratio",
        "sortino_ratio",
        "max_drawdown",
        "win_rate",
        "information_ratio",
        "benchmark_return",
        "excess_return",
        "trades",
        "final_capital",
        "latest_probability",
        "latest_signal",
        "latest_confidence",
    ];
}

#[derive(Serialize)]
struct SkippedRow<'a> {
    asset_id: &'a str,
    display_name: &'a str,
    reason: String,
}

impl CsvRow for SkippedRow<'_> {
    const HEADER: &'static [&'static str] = &["asset_id", "display_name", "reason"];
}

#[derive(Serialize)]
struct StatisticRow {
    metric: &'static str,
    mean: Metric,
    median: Metric,
    std: Metric,
    count: usize,
}

impl CsvRow for StatisticRow {
    const HEADER: &'static [&'static str] = &["metric", "mean", "median", "std", "count"];
}

impl StatisticRow {
    fn new(metric: &'static str, summary: &MetricSummary) -> Self {
        StatisticRow {
            metric,
            mean: summary.mean,
            median: summary.median,
            std: summary.std,
            count: summary.count,
        }
    }
}

impl ReportPort for CsvReportAdapter {
    fn write_asset(&self, summary: &AssetBacktestSummary) -> Result<(), ProbtraderError> {
        let result = &summary.result;

        let equity: Vec<EquityRow> = result
            .equity_curve
            .iter()
            .enumerate()
            .map(|(i, point)| EquityRow {
                date: point.date,
                equity: point.equity,
                benchmark: result.benchmark_curve.get(i).map(|b| b.equity),
            })
            .collect();
        self.write_rows(&self.equity_path(&summary.asset_id), &equity)?;

        let trades: Vec<TradeRow> = result
            .trades
            .iter()
            .map(|t| TradeRow {
                entry_date: t.entry_date,
                exit_date: t.exit_date,
                entry_price: t.entry_price,
                exit_price: t.exit_price,
                shares: t.shares,
                realized_return: t.realized_return,
                costs_paid: t.costs_paid,
                pnl: t.pnl,
                holding_days: t.holding_days(),
                exit_reason: t.exit_reason,
            })
            .collect();
        self.write_rows(&self.trades_path(&summary.asset_id), &trades)?;
        Ok(())
    }

    fn write_batch(&self, summary: &BatchSummary) -> Result<(), ProbtraderError> {
        let rows: Vec<SummaryRow> = summary
            .ranked
            .iter()
            .map(|s| SummaryRow {
                rank: s.rank,
                asset_id: &s.asset_id,
                display_name: &s.display_name,
                tier: s.tier,
                total_return: s.result.total_return,
                annualized_return: s.result.annualized_return,
                sharpe_ratio: s.result.sharpe_ratio,
                sortino_ratio: s.result.sortino_ratio,
                max_drawdown: s.result.max_drawdown,
                win_rate: s.result.win_rate,
                information_ratio: s.result.information_ratio,
                benchmark_return: s.result.benchmark_return,
                excess_return: s.result.excess_return,
                trades: s.result.trade_count(),
                final_capital: s.result.final_capital,
                latest_probability: s.signal.fused_probability,
                latest_signal: s.signal.predicted_class,
                latest_confidence: s.signal.confidence_tier,
            })
            .collect();
        self.write_rows(&self.output_dir.join("batch_summary.csv"), &rows)?;

        let skipped: Vec<SkippedRow> = summary
            .skipped
            .iter()
            .map(|s| SkippedRow {
                asset_id: &s.asset_id,
                display_name: &s.display_name,
                reason: s.reason.to_string(),
            })
            .collect();
        self.write_rows(&self.output_dir.join("batch_skipped.csv"), &skipped)?;

        let stats = &summary.statistics;
        let statistics = [
            StatisticRow::new("total_return", &stats.total_return),
            StatisticRow::new("sharpe_ratio", &stats.sharpe_ratio),
            StatisticRow::new("max_drawdown", &stats.max_drawdown),
            StatisticRow::new("win_rate", &stats.win_rate),
        ];
        self.write_rows(&self.output_dir.join("batch_statistics.csv"), &statistics)?;

        info!(
            dir = %self.output_dir.display(),
            assets = summary.processed_count(),
            "batch artifacts written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::backtest::{run_backtest, BacktestConfig};
    use crate::domain::batch::{BatchStatistics, SkipReason, SkippedAsset, TierCounts};
    use crate::domain::series::Observation;
    use crate::domain::signal::{FusionMethod, SignalFuser};
    use tempfile::TempDir;

    fn summary_for(asset: &str) -> AssetBacktestSummary {
        summary_with(asset, [0.30, 0.70, 0.80, 0.40, 0.30])
    }

    fn summary_with(asset: &str, probs: [f64; 5]) -> AssetBacktestSummary {
        let obs: Vec<Observation> = [100.0, 101.0, 103.0, 99.0, 98.0]
            .iter()
            .zip(probs)
            .enumerate()
            .map(|(i, (&price, prob))| {
                Observation::new(
                    NaiveDate::from_ymd_opt(2024, 3, 1 + i as u32).unwrap(),
                    price,
                    prob,
                )
            })
            .collect();
        let result = run_backtest(asset, &obs, &BacktestConfig::default()).unwrap();
        let last = probs[probs.len() - 1];
        AssetBacktestSummary {
            asset_id: asset.to_string(),
            display_name: asset.to_string(),
            tier: PerformanceTier::from_total_return(result.total_return),
            result,
            signal: SignalFuser::new(FusionMethod::Average).label(last, &[last]),
            rank: 1,
        }
    }

    #[test]
    fn write_asset_uses_asset_qualified_names() {
        let dir = TempDir::new().unwrap();
        let adapter = CsvReportAdapter::new(dir.path()).unwrap();

        adapter.write_asset(&summary_for("BTC/USD")).unwrap();

        let equity = fs::read_to_string(dir.path().join("BTC_2FUSD_equity.csv")).unwrap();
        let mut lines = equity.lines();
        assert_eq!(lines.next(), Some("date,equity,benchmark"));
        assert_eq!(lines.count(), 5);

        let trades = fs::read_to_string(dir.path().join("BTC_2FUSD_trades.csv")).unwrap();
        assert!(trades.starts_with("entry_date,exit_date,"));
        assert!(trades.contains("2024-03-02,2024-03-04"));
        assert!(trades.contains(",signal"));
    }

    #[test]
    fn write_batch_writes_summary_and_skips() {
        let dir = TempDir::new().unwrap();
        let adapter = CsvReportAdapter::new(dir.path().join("out")).unwrap();
        let ranked = vec![summary_for("AAPL")];
        let summary = BatchSummary {
            statistics: BatchStatistics::from_summaries(&ranked),
            tiers: TierCounts::from_summaries(&ranked),
            ranked,
            skipped: vec![SkippedAsset {
                asset_id: "MSFT".into(),
                display_name: "Microsoft".into(),
                reason: SkipReason::Cancelled,
            }],
            cancelled: true,
        };

        adapter.write_batch(&summary).unwrap();

        let out = dir.path().join("out");
        let rows = fs::read_to_string(out.join("batch_summary.csv")).unwrap();
        assert!(rows.starts_with("rank,asset_id,display_name,tier,"));
        let first = rows.lines().nth(1).unwrap();
        assert!(first.starts_with("1,AAPL,AAPL,poor,"));
        assert!(first.ends_with(",0.3,down,low"));

        let skipped = fs::read_to_string(out.join("batch_skipped.csv")).unwrap();
        assert!(skipped.contains("MSFT,Microsoft,cancelled"));

        let stats = fs::read_to_string(out.join("batch_statistics.csv")).unwrap();
        assert_eq!(stats.lines().count(), 5);
    }

    #[test]
    fn trade_free_asset_still_gets_a_header() {
        let dir = TempDir::new().unwrap();
        let adapter = CsvReportAdapter::new(dir.path()).unwrap();

        adapter.write_asset(&summary_with("AAPL", [0.1; 5])).unwrap();

        let trades = fs::read_to_string(adapter.trades_path("AAPL")).unwrap();
        assert_eq!(trades, format!("{}\n", TradeRow::HEADER.join(",")));
    }

    #[test]
    fn empty_batch_tables_keep_their_headers() {
        let dir = TempDir::new().unwrap();
        let adapter = CsvReportAdapter::new(dir.path()).unwrap();
        let summary = BatchSummary {
            statistics: BatchStatistics::from_summaries(&[]),
            tiers: TierCounts::from_summaries(&[]),
            ranked: Vec::new(),
            skipped: Vec::new(),
            cancelled: false,
        };

        adapter.write_batch(&summary).unwrap();

        let skipped = fs::read_to_string(dir.path().join("batch_skipped.csv")).unwrap();
        assert_eq!(skipped, "asset_id,display_name,reason\n");
        let ranked = fs::read_to_string(dir.path().join("batch_summary.csv")).unwrap();
        assert_eq!(ranked.lines().collect::<Vec<_>>(), vec![SummaryRow::HEADER.join(",")]);
    }

    #[test]
    fn declared_headers_match_serialized_headers() {
        let dir = TempDir::new().unwrap();
        let adapter = CsvReportAdapter::new(dir.path()).unwrap();
        let ranked = vec![summary_for("AAPL")];
        adapter.write_asset(&ranked[0]).unwrap();
        adapter
            .write_batch(&BatchSummary {
                statistics: BatchStatistics::from_summaries(&ranked),
                tiers: TierCounts::from_summaries(&ranked),
                ranked,
                skipped: vec![SkippedAsset {
                    asset_id: "MSFT".into(),
                    display_name: "MSFT".into(),
                    reason: SkipReason::Cancelled,
                }],
                cancelled: true,
            })
            .unwrap();

        let first_line = |name: &str| {
            fs::read_to_string(dir.path().join(name))
                .unwrap()
                .lines()
                .next()
                .unwrap()
                .to_string()
        };
        assert_eq!(first_line("AAPL_equity.csv"), EquityRow::HEADER.join(","));
        assert_eq!(first_line("AAPL_trades.csv"), TradeRow::HEADER.join(","));
        assert_eq!(first_line("batch_summary.csv"), SummaryRow::HEADER.join(","));
        assert_eq!(first_line("batch_skipped.csv"), SkippedRow::HEADER.join(","));
        assert_eq!(first_line("batch_statistics.csv"), StatisticRow::HEADER.join(","));
    }
}
