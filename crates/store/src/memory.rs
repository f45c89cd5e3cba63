use std::collections::BTreeMap;

use chrono::NaiveDate;

use common::{PlaybookEntry, Result};

use crate::{ensure_distinct_dates, ensure_replaceable, PlaybookStore};

/// In-memory store keyed and ordered by date. Used by tests and dry runs.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: BTreeMap<NaiveDate, PlaybookEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PlaybookStore for MemoryStore {
    fn append(&mut self, entry: PlaybookEntry) -> Result<()> {
        ensure_replaceable(self.entries.get(&entry.date))?;
        self.entries.insert(entry.date, entry);
        Ok(())
    }

    fn append_all(&mut self, entries: &[PlaybookEntry]) -> Result<()> {
        ensure_distinct_dates(entries)?;
        for entry in entries {
            ensure_replaceable(self.entries.get(&entry.date))?;
        }
        for entry in entries {
            self.entries.insert(entry.date, entry.clone());
        }
        Ok(())
    }

    fn get(&self, date: NaiveDate) -> Result<Option<PlaybookEntry>> {
        Ok(self.entries.get(&date).cloned())
    }

    fn last(&self, n: usize) -> Result<Vec<PlaybookEntry>> {
        let skip = self.entries.len().saturating_sub(n);
        Ok(self.entries.values().skip(skip).cloned().collect())
    }

    fn latest_before(&self, date: NaiveDate) -> Result<Option<PlaybookEntry>> {
        Ok(self
            .entries
            .range(..date)
            .next_back()
            .map(|(_, entry)| entry.clone()))
    }
}
