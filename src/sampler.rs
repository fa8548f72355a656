pub mod poloniex;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::FetchError;
use crate::model::TickerSnapshot;

/// Source of ticker snapshots for a single exchange.
///
/// Uses `BoxFuture` (from `futures` crate) instead of `async fn` in trait
/// to keep the trait object-safe (`dyn Sampler`).
pub trait Sampler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fetch the current ticker for `instrument`.
    ///
    /// Performs exactly one request; retrying is left to the caller.
    fn fetch(&self, instrument: &str) -> BoxFuture<'_, Result<TickerSnapshot, Report<FetchError>>>;
}
