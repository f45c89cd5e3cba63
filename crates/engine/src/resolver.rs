use tracing::{debug, info};

use common::{Direction, Error, Exit, Levels, PlaybookEntry, Result, Side, Snapshot};

use crate::params::EngineParams;
use crate::round_to;

/// Turns today's snapshot into today's playbook entry.
///
/// Contrarian on funding: crowded longs paying shorts biases short, crowded
/// shorts biases long. A triggered day is emitted as `pending` with its
/// levels; the fill and outcome are decided by the next cycle.
#[derive(Debug, Clone)]
pub struct DayResolver {
    params: EngineParams,
}

impl DayResolver {
    const PRICE_DECIMALS: u32 = 2;

    pub fn new(params: EngineParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &EngineParams {
        &self.params
    }

    /// Directional bias implied by the funding rate, if it is strong enough.
    pub fn bias(&self, funding_rate: f64) -> Option<Direction> {
        let threshold = self.params.funding_threshold;
        if funding_rate > threshold {
            Some(Direction::Short)
        } else if funding_rate < -threshold {
            Some(Direction::Long)
        } else {
            None
        }
    }

    /// Entry, stop and targets for a trade in `direction` off `spot`.
    /// Prices are rounded to cents.
    pub fn levels(&self, spot: f64, direction: Direction) -> Levels {
        let p = &self.params;
        let price = |x: f64| round_to(x, Self::PRICE_DECIMALS);

        // +1 moves with the trade, -1 against it.
        let sign = match direction {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        };
        let entry = price(spot * (1.0 + sign * p.entry_offset_pct));
        let risk = entry * p.risk_pct;

        Levels {
            entry,
            stop: price(entry - sign * risk),
            targets: p
                .reward_multiples
                .iter()
                .map(|m| price(entry + sign * risk * m))
                .collect(),
        }
    }

    /// Resolve the day described by `snapshot`.
    ///
    /// `prior_pending` is the still-open entry from the day before, if any;
    /// the caller finalizes it with the outcome simulator. It must be
    /// pending and dated exactly one day before the snapshot, otherwise the
    /// call fails with [`Error::StateConflict`] rather than skipping a day.
    pub fn resolve(
        &self,
        snapshot: &Snapshot,
        prior_pending: Option<&PlaybookEntry>,
    ) -> Result<PlaybookEntry> {
        let funding_rate = validate_snapshot(snapshot)?;

        if let Some(prior) = prior_pending {
            if !prior.is_pending() {
                return Err(Error::StateConflict(format!(
                    "prior entry {} is already finalized ({})",
                    prior.date, prior.exit
                )));
            }
            if prior.date.succ_opt() != Some(snapshot.date) {
                return Err(Error::StateConflict(format!(
                    "open entry {} is not the day before {}; resolve the gap before opening a new day",
                    prior.date, snapshot.date
                )));
            }
            debug!(prior = %prior.date, "Prior day still open; finalized by the caller");
        }

        let mut entry = PlaybookEntry {
            opened_at: Some(snapshot.timestamp),
            spot_price: Some(snapshot.spot_price),
            funding_rate: Some(funding_rate),
            ..PlaybookEntry::no_trigger(snapshot.date)
        };

        match self.bias(funding_rate) {
            None => {
                info!(date = %snapshot.date, funding_rate, "Funding inside threshold: no trigger");
            }
            Some(direction) => {
                let levels = self.levels(snapshot.spot_price, direction);
                info!(
                    date = %snapshot.date,
                    side = %direction,
                    funding_rate,
                    entry = levels.entry,
                    stop = levels.stop,
                    "Trade armed, pending fill"
                );
                entry.side = Side::from(direction);
                entry.levels = Some(levels);
                entry.exit = Exit::Pending;
            }
        }
        Ok(entry)
    }
}

/// Returns the funding rate of a usable snapshot.
fn validate_snapshot(snapshot: &Snapshot) -> Result<f64> {
    if !(snapshot.spot_price.is_finite() && snapshot.spot_price > 0.0) {
        return Err(Error::InvalidSnapshot(format!(
            "spot price must be positive, got {}",
            snapshot.spot_price
        )));
    }
    match snapshot.funding_rate {
        Some(rate) if rate.is_finite() => Ok(rate),
        Some(rate) => Err(Error::InvalidSnapshot(format!("funding rate is not finite: {rate}"))),
        None => Err(Error::InvalidSnapshot(format!(
            "funding rate missing for {}",
            snapshot.date
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn snapshot(day: u32, spot: f64, funding: Option<f64>) -> Snapshot {
        Snapshot {
            date: NaiveDate::from_ymd_opt(2026, 1, day).unwrap(),
            spot_price: spot,
            funding_rate: funding,
            timestamp: Utc.with_ymd_and_hms(2026, 1, day, 11, 0, 0).unwrap(),
        }
    }

    fn resolver() -> DayResolver {
        DayResolver::new(EngineParams::default())
    }

    #[test]
    fn strongly_positive_funding_arms_a_short() {
        let entry = resolver().resolve(&snapshot(10, 90_000.0, Some(0.02)), None).unwrap();
        assert_eq!(entry.side, Side::Short);
        assert_eq!(entry.exit, Exit::Pending);
        assert!(!entry.filled);
        assert_eq!(entry.r_multiple, 0.0);

        let levels = entry.levels.unwrap();
        assert_eq!(levels.entry, 89_730.0);
        assert_eq!(levels.stop, 91_075.95);
        assert_eq!(levels.targets, vec![88_384.05, 87_038.1]);
    }

    #[test]
    fn strongly_negative_funding_arms_a_long() {
        let entry = resolver().resolve(&snapshot(10, 50_000.0, Some(-0.001)), None).unwrap();
        assert_eq!(entry.side, Side::Long);
        let levels = entry.levels.unwrap();
        assert_eq!(levels.entry, 50_150.0);
        assert!(levels.stop < levels.entry);
        assert!(levels.targets.iter().all(|t| *t > levels.entry));
    }

    #[test]
    fn funding_inside_threshold_is_terminal_no_trigger() {
        for funding in [0.0, 0.0003, -0.0003, 0.0001] {
            let entry = resolver().resolve(&snapshot(10, 90_000.0, Some(funding)), None).unwrap();
            assert_eq!(entry.side, Side::None);
            assert_eq!(entry.exit, Exit::NoTrigger);
            assert!(entry.levels.is_none());
            assert_eq!(entry.r_multiple, 0.0);
            assert!(entry.invariant_violation().is_none());
        }
    }

    #[test]
    fn snapshot_context_is_recorded() {
        let snap = snapshot(10, 90_000.0, Some(0.0));
        let entry = resolver().resolve(&snap, None).unwrap();
        assert_eq!(entry.opened_at, Some(snap.timestamp));
        assert_eq!(entry.spot_price, Some(90_000.0));
        assert_eq!(entry.funding_rate, Some(0.0));
    }

    #[test]
    fn bad_snapshots_are_rejected() {
        for snap in [
            snapshot(10, 0.0, Some(0.01)),
            snapshot(10, -5.0, Some(0.01)),
            snapshot(10, f64::NAN, Some(0.01)),
            snapshot(10, 90_000.0, None),
            snapshot(10, 90_000.0, Some(f64::INFINITY)),
        ] {
            assert!(matches!(resolver().resolve(&snap, None), Err(Error::InvalidSnapshot(_))));
        }
    }

    #[test]
    fn prior_pending_must_be_yesterday() {
        let r = resolver();
        let yesterday = r.resolve(&snapshot(9, 90_000.0, Some(0.01)), None).unwrap();
        assert!(r.resolve(&snapshot(10, 90_000.0, Some(0.01)), Some(&yesterday)).is_ok());

        let stale = r.resolve(&snapshot(7, 90_000.0, Some(0.01)), None).unwrap();
        let err = r.resolve(&snapshot(10, 90_000.0, Some(0.01)), Some(&stale)).unwrap_err();
        assert!(matches!(err, Error::StateConflict(_)));
    }

    #[test]
    fn finalized_prior_is_a_conflict() {
        let r = resolver();
        let done = PlaybookEntry::no_trigger(NaiveDate::from_ymd_opt(2026, 1, 9).unwrap());
        let err = r.resolve(&snapshot(10, 90_000.0, Some(0.01)), Some(&done)).unwrap_err();
        assert!(matches!(err, Error::StateConflict(_)));
    }

    #[test]
    fn level_distances_follow_reward_multiples() {
        let levels = resolver().levels(100_000.0, Direction::Long);
        for (target, m) in levels.targets.iter().zip([1.0, 2.0]) {
            assert!((levels.r_at(*target) - m).abs() < 1e-4);
        }
        assert!((levels.r_at(levels.stop) + 1.0).abs() < 1e-4);
    }
}
