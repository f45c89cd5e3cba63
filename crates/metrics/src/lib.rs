//! Rolling-window statistics over playbook entries, and the reports built
//! from them: metrics, equity curve, journal index.

pub mod aggregator;
pub mod equity;
pub mod index;
pub mod report;

pub use aggregator::{compute, Breakdown, MetricsWindow};
pub use equity::{equity_curve, equity_svg, EquityPoint};
pub use index::{entry_link, index_markdown, latest_markdown, INDEX_ROWS};
pub use report::{DayRow, MetricsReport};
