use std::fmt::Write as _;

use chrono::NaiveDate;
use serde::Serialize;

use common::{PlaybookEntry, Side};

use crate::aggregator::{compute, Breakdown, MetricsWindow};
use crate::equity::{equity_curve, EquityPoint};

/// One line of the recent-days table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayRow {
    pub date: NaiveDate,
    pub side: Side,
    pub filled: bool,
    pub exit: String,
    pub r_multiple: f64,
}

impl From<&PlaybookEntry> for DayRow {
    fn from(entry: &PlaybookEntry) -> Self {
        Self {
            date: entry.date,
            side: entry.side,
            filled: entry.filled,
            exit: entry.exit.to_string(),
            r_multiple: entry.r_multiple,
        }
    }
}

/// Window statistics, the equity curve over the window and the most recent
/// days, ready to be written as `METRICS.json` and `METRICS.md`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsReport {
    pub as_of: NaiveDate,
    pub window: MetricsWindow,
    pub equity: Vec<EquityPoint>,
    pub tail: Vec<DayRow>,
}

impl MetricsReport {
    /// `entries` must be in ascending date order; the tail keeps the last
    /// `tail_days` of them.
    pub fn build(as_of: NaiveDate, entries: &[PlaybookEntry], tail_days: usize) -> Self {
        let skip = entries.len().saturating_sub(tail_days);
        Self {
            as_of,
            window: compute(entries),
            equity: equity_curve(entries),
            tail: entries[skip..].iter().map(DayRow::from).collect(),
        }
    }

    pub fn to_markdown(&self) -> String {
        let w = &self.window;
        let mut md = String::new();

        // Writing into a String cannot fail.
        let _ = writeln!(md, "# Metrics (as of {})\n", self.as_of);
        if w.window_size == 0 {
            md.push_str("No journal entries found.\n");
            return md;
        }
        let _ = writeln!(md, "- Window: last **{}** days", w.window_size);
        let _ = writeln!(
            md,
            "- Total: **{}R** | Avg/day: **{}R**",
            round3(w.total_r),
            round3(w.avg_r_per_day)
        );
        let _ = writeln!(
            md,
            "- Trade days: **{}** | No-trade days: **{}** | Pending: **{}**",
            w.trade_days, w.no_trade_days, w.pending_count
        );
        let _ = writeln!(
            md,
            "- Win rate (trades): **{:.1}%** | Expectancy: **{}R/trade**",
            w.win_rate * 100.0,
            round3(w.expectancy)
        );

        breakdown_table(&mut md, "Exit breakdown", &w.exit_breakdown);
        breakdown_table(&mut md, "Side breakdown", &w.side_breakdown);

        if let (Some(first), Some(last)) = (self.equity.first(), self.equity.last()) {
            let _ = writeln!(md, "\n## Equity\n");
            let _ = writeln!(
                md,
                "Cumulative R from {} to {}: **{}R**\n",
                first.date, last.date, last.cumulative_r
            );
            md.push_str("![Equity Curve](assets/equity.svg)\n");
        }

        let _ = writeln!(md, "\n## Last days\n");
        md.push_str("| Date | Side | Filled | Exit | R |\n|---|---|---|---|---:|\n");
        for row in &self.tail {
            let _ = writeln!(
                md,
                "| {} | {} | {} | {} | {} |",
                row.date, row.side, row.filled, row.exit, row.r_multiple
            );
        }
        md
    }
}

fn breakdown_table(md: &mut String, title: &str, breakdown: &Breakdown) {
    let _ = writeln!(md, "\n## {title}\n");
    md.push_str("| Item | Count |\n|---|---:|\n");
    for (tag, count) in breakdown.rows() {
        let _ = writeln!(md, "| {tag} | {count} |");
    }
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

// ─── Tests ──────────────────────────────────────────────────
