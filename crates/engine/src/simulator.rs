use tracing::{debug, info};

use common::{
    Direction, Error, Exit, Levels, PlaybookEntry, PriceObservation, PricePath, Result, Side,
};

use crate::params::EngineParams;
use crate::round_to;

/// Resolves a pending day against the price path that followed it.
///
/// First touch wins, scanning observations in time order. The observation
/// that fills the entry is also checked for stop and targets, and when one
/// observation reaches both the stop and a target the stop is taken.
#[derive(Debug, Clone)]
pub struct OutcomeSimulator {
    r_decimals: u32,
    clamp_expired_close: bool,
}

impl OutcomeSimulator {
    pub fn new(params: &EngineParams) -> Self {
        Self {
            r_decimals: params.r_decimals,
            clamp_expired_close: params.clamp_expired_close,
        }
    }

    /// Finalize `entry` using `path`.
    ///
    /// Only observations at or after the entry's `opened_at` and at or before
    /// `path.expires_at` take part. Fails with [`Error::InvalidPath`] when
    /// timestamps run backwards or nothing falls inside that window; fails
    /// with [`Error::StateConflict`] when the entry is not an open trade.
    pub fn finalize(&self, entry: &PlaybookEntry, path: &PricePath) -> Result<PlaybookEntry> {
        if !entry.is_pending() {
            return Err(Error::StateConflict(format!(
                "entry {} is not pending (exit {})",
                entry.date, entry.exit
            )));
        }
        let levels = entry.levels.as_ref().ok_or_else(|| {
            Error::StateConflict(format!("pending entry {} has no levels", entry.date))
        })?;
        let risk = levels.risk();
        if risk.is_nan() || risk <= 0.0 {
            return Err(Error::StateConflict(format!(
                "pending entry {} has zero risk distance",
                entry.date
            )));
        }

        let observations = window(entry, path)?;
        let direction = levels.direction();
        let mut resolved = entry.clone();
        resolved.side = Side::from(direction);

        let Some(fill_idx) = observations
            .iter()
            .position(|o| reaches_entry(o, levels.entry, direction))
        else {
            info!(date = %entry.date, side = %direction, "Entry never reached before expiry");
            resolved.exit = Exit::NoTrigger;
            resolved.r_multiple = 0.0;
            return Ok(resolved);
        };

        resolved.filled = true;
        debug!(date = %entry.date, at = %observations[fill_idx].at, "Entry filled");

        for obs in &observations[fill_idx..] {
            if reaches_stop(obs, levels.stop, direction) {
                resolved.exit = Exit::Stopped;
                resolved.r_multiple = -1.0;
                info!(date = %entry.date, side = %direction, at = %obs.at, "Stopped out");
                return Ok(resolved);
            }
            if let Some(target) = furthest_target(obs, levels, direction) {
                resolved.exit = Exit::TpHit(target);
                resolved.r_multiple = round_to(levels.r_at(target), self.r_decimals);
                info!(date = %entry.date, side = %direction, target_price = target, r = resolved.r_multiple, "Target hit");
                return Ok(resolved);
            }
        }

        // `window` guarantees at least one observation.
        let close = observations[observations.len() - 1].close;
        resolved.exit = Exit::ExpiredClose;
        resolved.r_multiple = self.expired_r(levels, close);
        info!(date = %entry.date, side = %direction, close, r = resolved.r_multiple, "Expired open, closed at market");
        Ok(resolved)
    }

    fn expired_r(&self, levels: &Levels, close: f64) -> f64 {
        let mut r = levels.r_at(close);
        if self.clamp_expired_close {
            let ceiling = levels
                .targets
                .iter()
                .map(|t| levels.r_at(*t))
                .fold(f64::NEG_INFINITY, f64::max);
            r = r.clamp(-1.0, ceiling.max(0.0));
        }
        let r = round_to(r, self.r_decimals);
        // -1R is reserved for stopped exits.
        if r <= -1.0 {
            -1.0 + 10f64.powi(-(self.r_decimals as i32))
        } else {
            r
        }
    }
}

/// Observations inside `[opened_at, expires_at]`, after checking ordering.
fn window<'a>(entry: &PlaybookEntry, path: &'a PricePath) -> Result<&'a [PriceObservation]> {
    if let Some(pair) = path.observations.windows(2).find(|w| w[1].at < w[0].at) {
        return Err(Error::InvalidPath(format!(
            "observations out of order: {} after {}",
            pair[1].at, pair[0].at
        )));
    }
    if let Some(bad) = path
        .observations
        .iter()
        .find(|o| !(o.low.is_finite() && o.high.is_finite() && o.close.is_finite() && o.low <= o.high))
    {
        return Err(Error::InvalidPath(format!("malformed observation at {}", bad.at)));
    }

    let start = match entry.opened_at {
        Some(opened_at) => path.observations.partition_point(|o| o.at < opened_at),
        None => 0,
    };
    let end = path.observations.partition_point(|o| o.at <= path.expires_at);
    if start >= end {
        return Err(Error::InvalidPath(format!(
            "no observations for {} before expiry {}",
            entry.date, path.expires_at
        )));
    }
    Ok(&path.observations[start..end])
}

fn reaches_entry(obs: &PriceObservation, entry: f64, direction: Direction) -> bool {
    match direction {
        Direction::Long => obs.reaches_up(entry),
        Direction::Short => obs.reaches_down(entry),
    }
}

fn reaches_stop(obs: &PriceObservation, stop: f64, direction: Direction) -> bool {
    match direction {
        Direction::Long => obs.reaches_down(stop),
        Direction::Short => obs.reaches_up(stop),
    }
}

/// The furthest target reached by `obs`, if any.
fn furthest_target(obs: &PriceObservation, levels: &Levels, direction: Direction) -> Option<f64> {
    let reached = levels.targets.iter().copied().filter(|t| match direction {
        Direction::Long => obs.reaches_up(*t),
        Direction::Short => obs.reaches_down(*t),
    });
    match direction {
        Direction::Long => reached.reduce(f64::max),
        Direction::Short => reached.reduce(f64::min),
    }
}
