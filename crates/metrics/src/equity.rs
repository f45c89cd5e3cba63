use std::fmt::Write as _;

use chrono::NaiveDate;
use serde::Serialize;

use common::PlaybookEntry;

const WIDTH: f64 = 1100.0;
const HEIGHT: f64 = 320.0;
const PAD: f64 = 40.0;

/// Running R total after one day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub cumulative_r: f64,
}

/// Cumulative R over `entries` (ascending), one point per day, each rounded
/// to 4 decimals. Pending and no-trade days carry the total forward.
pub fn equity_curve(entries: &[PlaybookEntry]) -> Vec<EquityPoint> {
    let mut total = 0.0;
    entries
        .iter()
        .map(|entry| {
            total += entry.r_multiple;
            EquityPoint {
                date: entry.date,
                cumulative_r: (total * 10_000.0).round() / 10_000.0,
            }
        })
        .collect()
}

/// Line chart of the curve as a standalone SVG document.
pub fn equity_svg(points: &[EquityPoint]) -> String {
    let values: Vec<f64> = if points.is_empty() {
        vec![0.0]
    } else {
        points.iter().map(|p| p.cumulative_r).collect()
    };
    let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let mut hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if hi == lo {
        hi = lo + 1.0;
    }
    let steps = (values.len() - 1).max(1) as f64;

    let polyline = values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let x = PAD + (i as f64 / steps) * (WIDTH - 2.0 * PAD);
            let y = PAD + (1.0 - (v - lo) / (hi - lo)) * (HEIGHT - 2.0 * PAD);
            format!("{x:.2},{y:.2}")
        })
        .collect::<Vec<_>>()
        .join(" ");

    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}">"#
    );
    let _ = writeln!(svg, r##"  <rect x="0" y="0" width="{WIDTH}" height="{HEIGHT}" rx="18" fill="#111827"/>"##);
    let _ = writeln!(svg, r##"  <g opacity="0.18" stroke="#ffffff" stroke-width="1">"##);
    for y in [PAD, HEIGHT / 2.0, HEIGHT - PAD] {
        let _ = writeln!(svg, r#"    <line x1="{PAD}" y1="{y}" x2="{}" y2="{y}"/>"#, WIDTH - PAD);
    }
    svg.push_str("  </g>\n");
    let _ = writeln!(
        svg,
        r##"  <polyline fill="none" stroke="#22c55e" stroke-width="3.2" points="{polyline}"/>"##
    );
    let _ = writeln!(
        svg,
        r##"  <text x="{PAD}" y="{}" fill="#e5e7eb" font-family="ui-sans-serif, system-ui" font-size="16">Equity Curve (Cumulative R)</text>"##,
        PAD - 12.0
    );
    svg.push_str("</svg>\n");
    svg
}

// ─── Tests ──────────────────────────────────────────────────
