use tracing::{info, warn};

use common::{Error, PlaybookEntry, PricePath, Result, Snapshot};
use store::PlaybookStore;

use crate::params::EngineParams;
use crate::resolver::DayResolver;
use crate::simulator::OutcomeSimulator;

/// What one cycle wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    /// Yesterday's entry, resolved by this cycle.
    pub finalized: Option<PlaybookEntry>,
    /// Today's entry as stored.
    pub today: PlaybookEntry,
}

/// One run-to-completion pass: resolve today, finalize the open prior day,
/// store both in one batch.
///
/// All validation and simulation happen before the write, and the batch is
/// all-or-nothing, so a failed cycle leaves the store as it found it.
#[derive(Debug, Clone)]
pub struct Journal {
    resolver: DayResolver,
    simulator: OutcomeSimulator,
}

impl Journal {
    pub fn new(params: EngineParams) -> Self {
        let simulator = OutcomeSimulator::new(&params);
        Self {
            resolver: DayResolver::new(params),
            simulator,
        }
    }

    pub fn resolver(&self) -> &DayResolver {
        &self.resolver
    }

    pub fn simulator(&self) -> &OutcomeSimulator {
        &self.simulator
    }

    /// The open entry preceding `date`, whose price path the caller must
    /// fetch before running the cycle.
    pub fn pending_before<S: PlaybookStore>(
        &self,
        store: &S,
        date: chrono::NaiveDate,
    ) -> Result<Option<PlaybookEntry>> {
        Ok(store.latest_before(date)?.filter(PlaybookEntry::is_pending))
    }

    /// Run the cycle for `snapshot`.
    ///
    /// `prior_path` is required exactly when the entry before today is still
    /// pending. `note` is stored on today's entry.
    pub fn run_cycle<S: PlaybookStore>(
        &self,
        store: &mut S,
        snapshot: &Snapshot,
        prior_path: Option<&PricePath>,
        note: Option<&str>,
    ) -> Result<CycleOutcome> {
        let date = snapshot.date;

        if let Some(existing) = store.get(date)? {
            if !existing.is_pending() {
                warn!(%date, exit = %existing.exit, "Day already finalized; refusing to re-resolve");
                return Err(Error::ImmutableEntry { date });
            }
            info!(%date, "Re-resolving pending day");
        }

        let prior = store.latest_before(date)?;
        let prior_pending = prior.as_ref().filter(|p| p.is_pending());
        if let Some(prior) = prior.as_ref().filter(|p| !p.is_pending()) {
            if prior.date.succ_opt() != Some(date) {
                warn!(last = %prior.date, %date, "Journal has missing days");
            }
        }

        let mut today = self.resolver.resolve(snapshot, prior_pending)?;
        today.note = note.map(str::to_string);

        let finalized = match prior_pending {
            Some(pending) => {
                let path = prior_path.ok_or_else(|| {
                    Error::InvalidPath(format!("no price path supplied for open day {}", pending.date))
                })?;
                Some(self.simulator.finalize(pending, path)?)
            }
            None => {
                if prior_path.is_some() {
                    warn!(%date, "Price path supplied but no day is open; ignoring it");
                }
                None
            }
        };

        let mut batch = Vec::with_capacity(2);
        batch.extend(finalized.iter().cloned());
        batch.push(today.clone());
        for entry in &batch {
            debug_assert!(entry.invariant_violation().is_none(), "{:?}", entry.invariant_violation());
        }
        store.append_all(&batch)?;

        if let Some(entry) = &finalized {
            info!(date = %entry.date, side = %entry.side, exit = %entry.exit, r = entry.r_multiple, "Prior day finalized");
        }
        info!(%date, side = %today.side, exit = %today.exit, "Day recorded");

        Ok(CycleOutcome { finalized, today })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
    use common::{Exit, PriceObservation, Side};
    use store::MemoryStore;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, d).unwrap()
    }

    fn open_time(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, d, 11, 0, 0).unwrap()
    }

    fn snapshot(d: u32, funding: f64) -> Snapshot {
        Snapshot {
            date: day(d),
            spot_price: 100_000.0,
            funding_rate: Some(funding),
            timestamp: open_time(d),
        }
    }

    fn path_until(d: u32, prices: &[f64]) -> PricePath {
        let start = open_time(d - 1);
        PricePath {
            observations: prices
                .iter()
                .enumerate()
                .map(|(i, p)| PriceObservation::tick(start + Duration::minutes(15 * (i as i64 + 1)), *p))
                .collect(),
            expires_at: open_time(d),
        }
    }

    #[test]
    fn quiet_day_is_recorded_as_no_trigger() {
        let journal = Journal::new(EngineParams::default());
        let mut store = MemoryStore::new();
        let out = journal
            .run_cycle(&mut store, &snapshot(3, 0.0001), None, Some("flat funding"))
            .unwrap();
        assert!(out.finalized.is_none());
        assert_eq!(out.today.exit, Exit::NoTrigger);
        let stored = store.get(day(3)).unwrap().unwrap();
        assert_eq!(stored.note.as_deref(), Some("flat funding"));
    }

    #[test]
    fn open_day_is_finalized_by_the_next_cycle() {
        let journal = Journal::new(EngineParams::default());
        let mut store = MemoryStore::new();
        let first = journal.run_cycle(&mut store, &snapshot(3, 0.01), None, None).unwrap();
        assert_eq!(first.today.side, Side::Short);
        assert_eq!(first.today.exit, Exit::Pending);

        // Short entry 99_700, stop 101_195.5.
        let path = path_until(4, &[99_900.0, 99_650.0, 101_300.0]);
        let pending = journal.pending_before(&store, day(4)).unwrap();
        assert_eq!(pending.map(|p| p.date), Some(day(3)));

        let second = journal
            .run_cycle(&mut store, &snapshot(4, 0.0), Some(&path), None)
            .unwrap();
        let finalized = second.finalized.unwrap();
        assert_eq!(finalized.exit, Exit::Stopped);
        assert_eq!(store.get(day(3)).unwrap().unwrap().r_multiple, -1.0);
        assert_eq!(store.get(day(4)).unwrap().unwrap().exit, Exit::NoTrigger);
    }

    /// Memory store that refuses any batch touching `fail_on`.
    struct FullDisk {
        inner: MemoryStore,
        fail_on: NaiveDate,
    }

    impl PlaybookStore for FullDisk {
        fn append(&mut self, entry: PlaybookEntry) -> Result<()> {
            self.append_all(std::slice::from_ref(&entry))
        }

        fn append_all(&mut self, entries: &[PlaybookEntry]) -> Result<()> {
            if entries.iter().any(|e| e.date == self.fail_on) {
                return Err(Error::Io(std::io::Error::other("disk full")));
            }
            self.inner.append_all(entries)
        }

        fn get(&self, date: NaiveDate) -> Result<Option<PlaybookEntry>> {
            self.inner.get(date)
        }

        fn last(&self, n: usize) -> Result<Vec<PlaybookEntry>> {
            self.inner.last(n)
        }

        fn latest_before(&self, date: NaiveDate) -> Result<Option<PlaybookEntry>> {
            self.inner.latest_before(date)
        }
    }

    #[test]
    fn failed_write_of_today_keeps_prior_day_open() {
        let journal = Journal::new(EngineParams::default());
        let mut store = FullDisk { inner: MemoryStore::new(), fail_on: day(4) };
        journal.run_cycle(&mut store, &snapshot(3, 0.01), None, None).unwrap();

        let path = path_until(4, &[99_900.0, 99_650.0, 101_300.0]);
        let err = journal
            .run_cycle(&mut store, &snapshot(4, 0.0), Some(&path), None)
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(store.get(day(3)).unwrap().unwrap().is_pending());
        assert!(store.get(day(4)).unwrap().is_none());

        // Once the disk recovers the same cycle goes through.
        store.fail_on = day(28);
        let out = journal
            .run_cycle(&mut store, &snapshot(4, 0.0), Some(&path), None)
            .unwrap();
        assert_eq!(out.finalized.map(|e| e.exit), Some(Exit::Stopped));
    }

    #[test]
    fn missing_path_for_open_day_writes_nothing() {
        let journal = Journal::new(EngineParams::default());
        let mut store = MemoryStore::new();
        journal.run_cycle(&mut store, &snapshot(3, 0.01), None, None).unwrap();

        let err = journal.run_cycle(&mut store, &snapshot(4, 0.0), None, None).unwrap_err();
        assert!(matches!(err, Error::InvalidPath(_)));
        assert!(store.get(day(3)).unwrap().unwrap().is_pending());
        assert!(store.get(day(4)).unwrap().is_none());
    }

    #[test]
    fn ambiguous_path_leaves_prior_pending() {
        let journal = Journal::new(EngineParams::default());
        let mut store = MemoryStore::new();
        journal.run_cycle(&mut store, &snapshot(3, 0.01), None, None).unwrap();

        let mut path = path_until(4, &[99_900.0, 99_650.0]);
        path.observations.reverse();
        let err = journal
            .run_cycle(&mut store, &snapshot(4, 0.0), Some(&path), None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPath(_)));
        assert_eq!(store.len(), 1);
        assert!(store.get(day(3)).unwrap().unwrap().is_pending());
    }

    #[test]
    fn open_day_with_gap_is_a_state_conflict() {
        let journal = Journal::new(EngineParams::default());
        let mut store = MemoryStore::new();
        journal.run_cycle(&mut store, &snapshot(3, 0.01), None, None).unwrap();

        let path = path_until(6, &[99_900.0]);
        let err = journal
            .run_cycle(&mut store, &snapshot(6, 0.0), Some(&path), None)
            .unwrap_err();
        assert!(matches!(err, Error::StateConflict(_)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn invalid_snapshot_writes_nothing() {
        let journal = Journal::new(EngineParams::default());
        let mut store = MemoryStore::new();
        let mut snap = snapshot(3, 0.01);
        snap.funding_rate = None;
        assert!(matches!(
            journal.run_cycle(&mut store, &snap, None, None),
            Err(Error::InvalidSnapshot(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn finalized_day_is_not_rerun() {
        let journal = Journal::new(EngineParams::default());
        let mut store = MemoryStore::new();
        journal.run_cycle(&mut store, &snapshot(3, 0.0), None, None).unwrap();
        let before = store.get(day(3)).unwrap();

        let err = journal.run_cycle(&mut store, &snapshot(3, 0.01), None, None).unwrap_err();
        assert!(matches!(err, Error::ImmutableEntry { .. }));
        assert_eq!(store.get(day(3)).unwrap(), before);
    }

    #[test]
    fn pending_day_can_be_rerun_the_same_day() {
        let journal = Journal::new(EngineParams::default());
        let mut store = MemoryStore::new();
        journal.run_cycle(&mut store, &snapshot(3, 0.01), None, None).unwrap();
        let out = journal
            .run_cycle(&mut store, &snapshot(3, -0.01), None, Some("rerun"))
            .unwrap();
        assert_eq!(out.today.side, Side::Long);
        assert_eq!(store.len(), 1);
    }
}
