//! Journal index and latest-day pointer, rendered as markdown.

use std::fmt::Write as _;

use chrono::NaiveDate;

use common::{Exit, PlaybookEntry};

/// Most rows the index lists.
pub const INDEX_ROWS: usize = 180;

/// Path of a day's entry relative to the journal root.
pub fn entry_link(date: NaiveDate) -> String {
    format!("{}/{}.json", date.format("%Y"), date.format("%Y-%m-%d"))
}

/// `INDEX.md`: newest day first, at most [`INDEX_ROWS`] rows.
pub fn index_markdown(entries: &[PlaybookEntry]) -> String {
    let mut md = String::new();
    md.push_str("# BTC Futures Journal Index\n\n");
    md.push_str("Auto-generated after each run.\n\n");
    md.push_str("- **Latest:** [LATEST.md](LATEST.md) | [LATEST.json](LATEST.json)\n\n");
    md.push_str("| Date | BTC Spot (USD) | OKX Funding | Result | R | File |\n");
    md.push_str("|---|---:|---:|---|---:|---|\n");

    for entry in entries.iter().rev().take(INDEX_ROWS) {
        let link = entry_link(entry.date);
        let _ = writeln!(
            md,
            "| {} | {} | {} | {} | {} | [{}.json]({link}) |",
            entry.date,
            entry.spot_price.map(|p| format!("{p:.2}")).unwrap_or_default(),
            entry.funding_rate.map(|f| format!("{f:.6}")).unwrap_or_default(),
            result(entry),
            r_cell(entry),
            entry.date,
        );
    }
    md
}

/// `LATEST.md` for the newest stored day.
pub fn latest_markdown(entry: &PlaybookEntry) -> String {
    let mut md = String::new();
    md.push_str("# Latest BTC Futures Playbook\n\n");
    let _ = writeln!(md, "- **Date:** {}", entry.date);
    if let Some(at) = entry.opened_at {
        let _ = writeln!(md, "- **Run (UTC):** {}", at.format("%Y-%m-%d %H:%M:%S"));
    }
    let _ = writeln!(md, "- **BTC Spot (USD):** {}", opt(entry.spot_price, 2));
    let _ = writeln!(md, "- **OKX fundingRate:** {}", opt(entry.funding_rate, 6));
    let _ = writeln!(md, "- **Side:** {} | **Exit:** {}", entry.side, entry.exit);
    if let Some(levels) = &entry.levels {
        let targets: Vec<String> = levels.targets.iter().map(|t| format!("{t:.2}")).collect();
        let _ = writeln!(
            md,
            "- **Entry:** {:.2} | **Stop:** {:.2} | **Targets:** {}",
            levels.entry,
            levels.stop,
            targets.join(" / ")
        );
    }
    if let Some(note) = &entry.note {
        let _ = writeln!(md, "- **Note:** {note}");
    }

    let link = entry_link(entry.date);
    let _ = writeln!(md, "\nSource JSON: [{}.json]({link})\n", entry.date);
    md.push_str("History: [INDEX.md](INDEX.md)\n");
    md
}

fn result(entry: &PlaybookEntry) -> String {
    match entry.exit {
        Exit::NoTrigger | Exit::Pending if !entry.side.is_directional() => entry.exit.to_string(),
        _ => format!("{} {}", entry.side.as_str().to_uppercase(), entry.exit),
    }
}

fn r_cell(entry: &PlaybookEntry) -> String {
    if entry.is_pending() || !entry.side.is_directional() {
        String::new()
    } else {
        format!("{:.2}R", entry.r_multiple)
    }
}

fn opt(value: Option<f64>, decimals: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.decimals$}"))
}

// ─── Tests ──────────────────────────────────────────────────
