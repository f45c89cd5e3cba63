use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use fs2::FileExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use common::{Error, PlaybookEntry, Result};

use crate::{ensure_distinct_dates, ensure_replaceable, PlaybookStore};

const LOCK_FILE: &str = ".journal.lock";

/// File-backed store: `<root>/<YYYY>/<YYYY-MM-DD>.json`, one entry per file.
///
/// Holds an OS advisory lock on `<root>/.journal.lock` for its whole
/// lifetime, so two writers never interleave. The kernel drops the lock when
/// the process exits, however it exits. Every write lands in a temp file that
/// is renamed over the target, so a reader sees either the old or the new
/// entry, never a partial one.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    _lock: StoreLock,
}

impl FileStore {
    /// Open (creating if needed) the journal tree and take the writer lock.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let lock = StoreLock::acquire(root.join(LOCK_FILE))?;
        info!(root = %root.display(), "Playbook store opened");
        Ok(Self { root, _lock: lock })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, date: NaiveDate) -> PathBuf {
        self.root
            .join(date.format("%Y").to_string())
            .join(format!("{}.json", date.format("%Y-%m-%d")))
    }

    /// All stored dates, ascending. Files that are not `YYYY-MM-DD.json`
    /// (reports, pointers, temp files) are ignored.
    pub fn dates(&self) -> Result<Vec<NaiveDate>> {
        let mut dates = Vec::new();
        for year_dir in fs::read_dir(&self.root)? {
            let year_dir = year_dir?;
            if !year_dir.file_type()?.is_dir() {
                continue;
            }
            for file in fs::read_dir(year_dir.path())? {
                let name = file?.file_name();
                if let Some(date) = name.to_str().and_then(parse_entry_file_name) {
                    dates.push(date);
                }
            }
        }
        dates.sort();
        dates.dedup();
        Ok(dates)
    }

    fn read(&self, date: NaiveDate) -> Result<Option<PlaybookEntry>> {
        let path = self.entry_path(date);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let entry: PlaybookEntry = serde_json::from_str(&content)?;
        if entry.date != date {
            return Err(Error::StateConflict(format!(
                "{} holds an entry dated {}",
                path.display(),
                entry.date
            )));
        }
        Ok(Some(entry))
    }
}

impl PlaybookStore for FileStore {
    fn append(&mut self, entry: PlaybookEntry) -> Result<()> {
        self.append_all(std::slice::from_ref(&entry))
    }

    /// Validates every entry, stages every temp file, then renames them in
    /// order. A failed rename restores the files already moved.
    fn append_all(&mut self, entries: &[PlaybookEntry]) -> Result<()> {
        ensure_distinct_dates(entries)?;

        let mut previous = Vec::with_capacity(entries.len());
        for entry in entries {
            let path = self.entry_path(entry.date);
            ensure_replaceable(self.read(entry.date)?.as_ref())?;
            let before = match fs::read_to_string(&path) {
                Ok(content) => Some(content),
                Err(e) if e.kind() == io::ErrorKind::NotFound => None,
                Err(e) => return Err(e.into()),
            };
            previous.push((path, before));
        }

        let mut staged: Vec<PathBuf> = Vec::with_capacity(entries.len());
        for (entry, (path, _)) in entries.iter().zip(&previous) {
            let staging = serde_json::to_string_pretty(entry)
                .map_err(Error::from)
                .and_then(|mut json| {
                    json.push('\n');
                    stage(path, &json)
                });
            match staging {
                Ok(tmp) => staged.push(tmp),
                Err(e) => {
                    discard(&staged);
                    return Err(e);
                }
            }
        }

        for (i, (tmp, (path, _))) in staged.iter().zip(&previous).enumerate() {
            if let Err(e) = fs::rename(tmp, path) {
                discard(&staged[i..]);
                restore(&previous[..i]);
                return Err(e.into());
            }
        }

        for entry in entries {
            debug!(date = %entry.date, exit = %entry.exit, "Entry written");
        }
        Ok(())
    }

    fn get(&self, date: NaiveDate) -> Result<Option<PlaybookEntry>> {
        self.read(date)
    }

    fn last(&self, n: usize) -> Result<Vec<PlaybookEntry>> {
        let dates = self.dates()?;
        let skip = dates.len().saturating_sub(n);
        let mut entries = Vec::with_capacity(dates.len() - skip);
        for date in &dates[skip..] {
            if let Some(entry) = self.read(*date)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    fn latest_before(&self, date: NaiveDate) -> Result<Option<PlaybookEntry>> {
        match self.dates()?.into_iter().filter(|d| *d < date).next_back() {
            Some(prior) => self.read(prior),
            None => Ok(None),
        }
    }
}

fn parse_entry_file_name(name: &str) -> Option<NaiveDate> {
    let stem = name.strip_suffix(".json")?;
    if stem.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
}

/// Serialize `value` as pretty JSON with a trailing newline and move it into
/// place atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut json = serde_json::to_string_pretty(value)?;
    json.push('\n');
    write_text_atomic(path, &json)
}

/// Write `content` to a dot-prefixed sibling temp file, flush it to disk and
/// rename it over `path`.
pub fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    let tmp = stage(path, content)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Write `content` next to `path` as `.<name>.tmp`, synced, and return the
/// temp path. A partly written temp file is removed.
fn stage(path: &Path, content: &str) -> Result<PathBuf> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Io(io::Error::new(io::ErrorKind::InvalidInput, "path has no file name")))?;
    let tmp = dir.join(format!(".{file_name}.tmp"));

    let written = File::create(&tmp).and_then(|mut file| {
        file.write_all(content.as_bytes())?;
        file.sync_all()
    });
    if let Err(e) = written {
        if tmp.is_file() {
            let _ = fs::remove_file(&tmp);
        }
        return Err(e.into());
    }
    Ok(tmp)
}

fn discard(staged: &[PathBuf]) {
    for tmp in staged {
        let _ = fs::remove_file(tmp);
    }
}

/// Put back what `append_all` already replaced: the old content, or no file.
fn restore(committed: &[(PathBuf, Option<String>)]) {
    for (path, before) in committed {
        let result = match before {
            Some(content) => write_text_atomic(path, content),
            None => fs::remove_file(path).map_err(Error::from),
        };
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "Failed to roll back journal file");
        }
    }
}

/// Exclusive advisory lock on the lock file, held while the file is open.
///
/// The file itself stays on disk; a leftover file from a killed run is not
/// locked by anyone and is simply taken over.
#[derive(Debug)]
struct StoreLock {
    _file: File,
}

impl StoreLock {
    fn acquire(path: PathBuf) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        if let Err(e) = file.try_lock_exclusive() {
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                return Err(Error::StoreLocked(format!(
                    "{} is held by another run",
                    path.display()
                )));
            }
            return Err(e.into());
        }
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self { _file: file })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Exit, Levels, Side};
    use tempfile::TempDir;

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    fn pending(date: NaiveDate) -> PlaybookEntry {
        PlaybookEntry {
            side: Side::Long,
            levels: Some(Levels { entry: 100.0, stop: 98.5, targets: vec![101.5, 103.0] }),
            exit: Exit::Pending,
            ..PlaybookEntry::no_trigger(date)
        }
    }

    #[test]
    fn entries_land_in_year_directories() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();
        store.append(PlaybookEntry::no_trigger(day(12, 31))).unwrap();

        let path = dir.path().join("2025").join("2025-12-31.json");
        let raw = fs::read_to_string(path).unwrap();
        assert!(raw.ends_with('\n'));
        assert!(raw.contains("\"exit\": \"no_trigger\""));
    }

    #[test]
    fn roundtrips_and_orders_by_date() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();
        store.append(pending(day(1, 3))).unwrap();
        store.append(PlaybookEntry::no_trigger(day(1, 1))).unwrap();
        store.append(PlaybookEntry::no_trigger(day(1, 2))).unwrap();

        assert_eq!(store.get(day(1, 3)).unwrap(), Some(pending(day(1, 3))));
        let dates: Vec<_> = store.last(2).unwrap().iter().map(|e| e.date).collect();
        assert_eq!(dates, vec![day(1, 2), day(1, 3)]);
        assert_eq!(store.latest_before(day(1, 3)).unwrap().unwrap().date, day(1, 2));
        assert!(store.get(day(1, 4)).unwrap().is_none());
    }

    #[test]
    fn finalized_file_is_not_rewritten() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();
        store.append(PlaybookEntry::no_trigger(day(2, 1))).unwrap();
        let path = dir.path().join("2025").join("2025-02-01.json");
        let before = fs::read_to_string(&path).unwrap();

        let err = store.append(pending(day(2, 1))).unwrap_err();
        assert!(matches!(err, Error::ImmutableEntry { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn pending_file_is_replaced() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();
        store.append(pending(day(2, 1))).unwrap();
        store.append(PlaybookEntry::no_trigger(day(2, 1))).unwrap();
        assert_eq!(store.dates().unwrap(), vec![day(2, 1)]);
        assert_eq!(store.get(day(2, 1)).unwrap().unwrap().exit, Exit::NoTrigger);
    }

    #[test]
    fn second_writer_is_locked_out_until_drop() {
        let dir = TempDir::new().unwrap();
        let first = FileStore::open(dir.path()).unwrap();
        assert!(matches!(FileStore::open(dir.path()), Err(Error::StoreLocked(_))));
        drop(first);
        assert!(FileStore::open(dir.path()).is_ok());
    }

    #[test]
    fn lock_file_left_by_a_killed_run_does_not_block() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join(LOCK_FILE);
        fs::write(&lock_path, "4242424\n").unwrap();

        let store = FileStore::open(dir.path()).unwrap();
        let pid = fs::read_to_string(&lock_path).unwrap();
        assert_eq!(pid.trim(), std::process::id().to_string());
        drop(store);
        assert!(FileStore::open(dir.path()).is_ok());
    }

    #[test]
    fn failed_batch_leaves_every_file_as_it_was() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();
        store.append(pending(day(2, 1))).unwrap();
        let first = dir.path().join("2025").join("2025-02-01.json");
        let before = fs::read_to_string(&first).unwrap();

        // A directory where the second temp file should go makes staging fail.
        fs::create_dir_all(dir.path().join("2025").join(".2025-02-02.json.tmp")).unwrap();

        let batch = [PlaybookEntry::no_trigger(day(2, 1)), pending(day(2, 2))];
        assert!(matches!(store.append_all(&batch), Err(Error::Io(_))));
        assert_eq!(fs::read_to_string(&first).unwrap(), before);
        assert!(store.get(day(2, 1)).unwrap().unwrap().is_pending());
        assert!(store.get(day(2, 2)).unwrap().is_none());
        assert!(!dir.path().join("2025").join(".2025-02-01.json.tmp").exists());
    }

    #[test]
    fn batch_over_a_finalized_date_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();
        store.append(PlaybookEntry::no_trigger(day(3, 1))).unwrap();

        let batch = [pending(day(3, 2)), pending(day(3, 1))];
        assert!(matches!(store.append_all(&batch), Err(Error::ImmutableEntry { .. })));
        assert!(store.get(day(3, 2)).unwrap().is_none());
    }

    #[test]
    fn batch_writes_both_entries() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();
        store.append(pending(day(4, 1))).unwrap();
        store
            .append_all(&[PlaybookEntry::no_trigger(day(4, 1)), pending(day(4, 2))])
            .unwrap();
        assert_eq!(store.dates().unwrap(), vec![day(4, 1), day(4, 2)]);
        assert!(!store.get(day(4, 1)).unwrap().unwrap().is_pending());
    }

    #[test]
    fn non_entry_files_are_ignored() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();
        store.append(PlaybookEntry::no_trigger(day(5, 5))).unwrap();
        write_text_atomic(&dir.path().join("METRICS.md"), "# Metrics\n").unwrap();
        fs::write(dir.path().join("2025").join("LATEST.json"), "{}").unwrap();
        fs::write(dir.path().join("2025").join(".2025-05-06.json.tmp"), "{").unwrap();

        assert_eq!(store.dates().unwrap(), vec![day(5, 5)]);
        assert_eq!(store.last(10).unwrap().len(), 1);
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("nested").join("METRICS.json");
        write_json_atomic(&target, &serde_json::json!({ "window_size": 3 })).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path().join("nested"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["METRICS.json".to_string()]);
    }
}
