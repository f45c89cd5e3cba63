//! Daily BTC playbook journal.
//!
//! One run per morning: snapshot the market, record today's playbook,
//! finalize yesterday's open trade against the observed price path and
//! rewrite the rolling metrics report, the journal index and the latest-day
//! pointer.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::America::New_York;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use common::{Config, MarketFeed, PlaybookEntry, PricePath};
use engine::{EngineParams, Journal};
use feeds::PublicFeed;
use metrics::{equity_svg, index_markdown, latest_markdown, MetricsReport, INDEX_ROWS};
use store::{write_json_atomic, write_text_atomic, FileStore, PlaybookStore};

const RUN_WINDOW_MINUTES: u32 = 10;

#[derive(Parser)]
#[command(name = "btc-journal", about = "Daily BTC futures playbook journal")]
struct Cli {
    /// Run even outside the 06:00-06:10 New York window.
    #[arg(long, env = "FORCE_RUN", default_value_t = false)]
    force: bool,

    /// Journal date (YYYY-MM-DD). Defaults to today in New York.
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Free-text note stored on today's entry.
    #[arg(long)]
    note: Option<String>,

    /// Only rebuild the metrics, index and latest pages from the stored journal.
    #[arg(long, default_value_t = false)]
    metrics_only: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let now_et = Utc::now().with_timezone(&New_York);
    let today = cli.date.unwrap_or_else(|| now_et.date_naive());

    if !cli.metrics_only && !cli.force && !in_run_window(now_et.time()) {
        info!(now = %now_et.format("%H:%M %Z"), "Outside run window; skipping (use --force to override)");
        return Ok(());
    }

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    let mut store = FileStore::open(&cfg.journal_dir).context("opening journal")?;

    if cli.metrics_only {
        write_metrics(&store, &cfg, today)?;
        return write_index(&store, &cfg);
    }

    let params = match &cfg.engine_config_path {
        Some(path) => EngineParams::load(path)?,
        None => EngineParams::default(),
    };
    params.validate()?;
    info!(%today, journal = %cfg.journal_dir.display(), "btc-journal starting");

    // ── Market data ───────────────────────────────────────────────────────────
    let feed: Box<dyn MarketFeed> = Box::new(PublicFeed::new(Duration::from_secs(cfg.http_timeout_secs))?);
    let snapshot = feed.snapshot(today).await.context("taking market snapshot")?;

    // ── Cycle ─────────────────────────────────────────────────────────────────
    let journal = Journal::new(params);
    let prior_path = match journal.pending_before(&store, today)? {
        Some(open) => Some(fetch_path(feed.as_ref(), &open, snapshot.timestamp).await?),
        None => None,
    };

    let outcome = journal
        .run_cycle(&mut store, &snapshot, prior_path.as_ref(), cli.note.as_deref())
        .with_context(|| format!("journal cycle for {today}"))?;

    if let Some(done) = &outcome.finalized {
        info!(date = %done.date, exit = %done.exit, r = done.r_multiple, "Yesterday scored");
    }
    info!(date = %outcome.today.date, side = %outcome.today.side, exit = %outcome.today.exit, "Today recorded");

    write_metrics(&store, &cfg, today)?;
    write_index(&store, &cfg)
}

/// Price path for an open entry, from when it was armed until `until`.
async fn fetch_path(feed: &dyn MarketFeed, open: &PlaybookEntry, until: DateTime<Utc>) -> Result<PricePath> {
    let from = match open.opened_at {
        Some(at) => at,
        None => {
            warn!(date = %open.date, "Open entry has no timestamp; replaying from 06:00 New York");
            morning_of(open.date)?
        }
    };
    let observations = feed
        .price_path(from, until)
        .await
        .with_context(|| format!("fetching price path for {}", open.date))?;
    Ok(PricePath {
        observations,
        expires_at: until,
    })
}

fn write_metrics<S: PlaybookStore>(store: &S, cfg: &Config, as_of: NaiveDate) -> Result<()> {
    let entries = store.last(cfg.metrics_days)?;
    let report = MetricsReport::build(as_of, &entries, cfg.metrics_tail_days);

    let json_path = cfg.journal_dir.join("METRICS.json");
    let md_path = cfg.journal_dir.join("METRICS.md");
    write_json_atomic(&json_path, &report)?;
    write_text_atomic(&md_path, &report.to_markdown())?;
    write_text_atomic(&cfg.journal_dir.join("assets").join("equity.svg"), &equity_svg(&report.equity))?;

    let w = &report.window;
    info!(
        days = w.window_size,
        total_r = w.total_r,
        trade_days = w.trade_days,
        pending = w.pending_count,
        win_rate = w.win_rate,
        "Metrics written"
    );
    Ok(())
}

/// `INDEX.md` over the most recent days, plus `LATEST.json` and `LATEST.md`
/// for the newest one.
fn write_index<S: PlaybookStore>(store: &S, cfg: &Config) -> Result<()> {
    let entries = store.last(INDEX_ROWS)?;
    write_text_atomic(&cfg.journal_dir.join("INDEX.md"), &index_markdown(&entries))?;

    let Some(latest) = entries.last() else {
        info!("Journal is empty; no latest entry to point at");
        return Ok(());
    };
    write_json_atomic(&cfg.journal_dir.join("LATEST.json"), latest)?;
    write_text_atomic(&cfg.journal_dir.join("LATEST.md"), &latest_markdown(latest))?;
    info!(rows = entries.len(), latest = %latest.date, "Index written");
    Ok(())
}

fn in_run_window(time_et: NaiveTime) -> bool {
    time_et.hour() == 6 && time_et.minute() < RUN_WINDOW_MINUTES
}

fn morning_of(date: NaiveDate) -> Result<DateTime<Utc>> {
    let local = date
        .and_hms_opt(6, 0, 0)
        .context("06:00 is a valid time")?;
    let at = New_York
        .from_local_datetime(&local)
        .earliest()
        .with_context(|| format!("06:00 does not exist in New York on {date}"))?;
    Ok(at.with_timezone(&Utc))
}
