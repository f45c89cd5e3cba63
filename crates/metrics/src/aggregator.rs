use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use common::{PlaybookEntry, Side};

/// Occurrence counts per tag.
///
/// Iteration through [`Breakdown::rows`] is ranked: descending count, then
/// ascending tag, so reports are reproducible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Breakdown {
    counts: BTreeMap<String, usize>,
}

impl Breakdown {
    fn record(&mut self, tag: impl Into<String>) {
        *self.counts.entry(tag.into()).or_insert(0) += 1;
    }

    /// Count for `tag`; zero if never observed.
    pub fn get(&self, tag: &str) -> usize {
        self.counts.get(tag).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn rows(&self) -> Vec<(&str, usize)> {
        let mut rows: Vec<(&str, usize)> =
            self.counts.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        rows
    }
}

impl Serialize for Breakdown {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let rows = self.rows();
        let mut map = serializer.serialize_map(Some(rows.len()))?;
        for (tag, count) in rows {
            map.serialize_entry(tag, &count)?;
        }
        map.end()
    }
}

/// Statistics over a window of playbook entries. Derived on every run,
/// never stored on its own.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsWindow {
    pub window_size: usize,
    pub total_r: f64,
    pub avg_r_per_day: f64,
    /// Days with a long/short side and a final exit.
    pub trade_days: usize,
    pub no_trade_days: usize,
    pub pending_count: usize,
    /// Trade days whose entry price was actually reached.
    pub filled_trades: usize,
    pub win_trades: usize,
    pub loss_trades: usize,
    /// Fraction of trade days with positive R, in `[0, 1]`.
    pub win_rate: f64,
    /// `total_r / trade_days`; zero without trade days.
    pub expectancy: f64,
    pub exit_breakdown: Breakdown,
    pub side_breakdown: Breakdown,
}

enum DayKind {
    Trade,
    NoTrade,
    Pending,
}

fn classify(entry: &PlaybookEntry) -> DayKind {
    if entry.is_pending() || entry.side == Side::Pending {
        DayKind::Pending
    } else if entry.side.is_directional() {
        DayKind::Trade
    } else {
        DayKind::NoTrade
    }
}

/// Compute window statistics over `entries`. Pure: the same input always
/// yields the same window, and an empty input yields all zeros.
pub fn compute(entries: &[PlaybookEntry]) -> MetricsWindow {
    let mut window = MetricsWindow {
        window_size: entries.len(),
        ..MetricsWindow::default()
    };

    for entry in entries {
        let r = entry.r_multiple;
        window.total_r += r;
        window.exit_breakdown.record(entry.exit.to_string());
        window.side_breakdown.record(entry.side.as_str());

        match classify(entry) {
            DayKind::Pending => window.pending_count += 1,
            DayKind::NoTrade => window.no_trade_days += 1,
            DayKind::Trade => {
                window.trade_days += 1;
                if entry.filled {
                    window.filled_trades += 1;
                }
                if r > 0.0 {
                    window.win_trades += 1;
                } else if r < 0.0 {
                    window.loss_trades += 1;
                }
            }
        }
    }

    if window.window_size > 0 {
        window.avg_r_per_day = window.total_r / window.window_size as f64;
    }
    if window.trade_days > 0 {
        window.win_rate = window.win_trades as f64 / window.trade_days as f64;
        window.expectancy = window.total_r / window.trade_days as f64;
    }
    window
}
