use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::{PriceObservation, Result, Snapshot};

/// Abstraction over the public market-data sources.
///
/// `PublicFeed` in `crates/feeds` implements this over HTTP. Everything a
/// cycle needs is fetched through this trait before the core runs, so the
/// engine itself never performs I/O.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// Spot price and funding rate for the journal date `date`.
    async fn snapshot(&self, date: NaiveDate) -> Result<Snapshot>;

    /// Price observations between `from` and `to` (inclusive), oldest first.
    async fn price_path(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PriceObservation>>;
}
