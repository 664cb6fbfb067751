//! Price data access port trait.

use crate::domain::error::ProbtraderError;
use crate::domain::series::PricePoint;

/// Source of daily closing prices. Shared across batch workers.
pub trait PricePort: Send + Sync {
    /// Closing prices for `asset` in ascending date order.
    fn fetch_prices(&self, asset: &str) -> Result<Vec<PricePoint>, ProbtraderError>;
}
