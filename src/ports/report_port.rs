//! Result artifact port trait.

use crate::domain::batch::{AssetBacktestSummary, BatchSummary};
use crate::domain::error::ProbtraderError;

/// Port for writing backtest artifacts.
pub trait ReportPort {
    /// Per-asset artifacts (equity curve, trade ledger), named after the asset.
    fn write_asset(&self, summary: &AssetBacktestSummary) -> Result<(), ProbtraderError>;

    /// Cross-asset summary, written once per batch.
    fn write_batch(&self, summary: &BatchSummary) -> Result<(), ProbtraderError>;
}
