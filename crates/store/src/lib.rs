//! Playbook persistence: one entry per calendar date, write-once after the
//! entry leaves `pending`.

pub mod file;
pub mod memory;

pub use file::{write_json_atomic, write_text_atomic, FileStore};
pub use memory::MemoryStore;

use chrono::NaiveDate;

use common::{Error, PlaybookEntry, Result};

/// Narrow persistence seam used by the journal cycle.
///
/// `append` takes `&mut self`: a store must be exclusively held by the
/// writer for the duration of a cycle.
pub trait PlaybookStore {
    /// Insert the entry for its date, replacing a stored entry only while
    /// that one is still pending. Fails with [`Error::ImmutableEntry`] over
    /// a finalized date and leaves the stored entry untouched.
    fn append(&mut self, entry: PlaybookEntry) -> Result<()>;

    /// Insert several entries as one unit: either every entry is stored or
    /// the store is left as it was. Each entry follows the [`append`] rule,
    /// and a batch naming the same date twice is a [`Error::StateConflict`].
    ///
    /// [`append`]: PlaybookStore::append
    fn append_all(&mut self, entries: &[PlaybookEntry]) -> Result<()>;

    fn get(&self, date: NaiveDate) -> Result<Option<PlaybookEntry>>;

    /// The most recent `n` entries by date, oldest first. Shorter when the
    /// history is shorter.
    fn last(&self, n: usize) -> Result<Vec<PlaybookEntry>>;

    /// The newest entry strictly before `date`.
    fn latest_before(&self, date: NaiveDate) -> Result<Option<PlaybookEntry>>;
}

/// Rejects a batch that names the same date twice.
pub(crate) fn ensure_distinct_dates(entries: &[PlaybookEntry]) -> Result<()> {
    let mut dates: Vec<NaiveDate> = entries.iter().map(|e| e.date).collect();
    dates.sort();
    match dates.windows(2).find(|w| w[0] == w[1]) {
        Some(dup) => Err(Error::StateConflict(format!("batch writes {} twice", dup[0]))),
        None => Ok(()),
    }
}

/// Write-once rule shared by every store implementation.
pub(crate) fn ensure_replaceable(existing: Option<&PlaybookEntry>) -> Result<()> {
    match existing {
        Some(stored) if !stored.is_pending() => {
            tracing::warn!(date = %stored.date, exit = %stored.exit, "Rejected overwrite of finalized entry");
            Err(Error::ImmutableEntry { date: stored.date })
        }
        _ => Ok(()),
    }
}
