//! Durable append-only event log.
//!
//! # Record format
//!
//! ```text
//! [length:u32 LE][postcard(StoredEvent):length bytes]
//! ```
//!
//! Records are appended sequentially; the id index is rebuilt by a
//! full scan on open. A truncated tail (crash mid-append) is not an
//! error: recovery stops at the last complete record and trims the
//! file back to it.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

use actigraph_types::{ActivityEvent, EventId, UserId};

use crate::{ActivityStore, Insert, StoreResult, StoredEvent};

const LENGTH_PREFIX_SIZE: usize = 4;

/// Append-only file store with an in-memory deduplication index.
pub struct EventLog {
    path: PathBuf,
    inner: Mutex<Inner>,
}

struct Inner {
    file: File,
    index: HashSet<EventId>,
    /// Byte length of the last fully written record. A failed append
    /// can leave torn bytes past this watermark; they are truncated
    /// before the next write so the recovery scan never hits them.
    committed: u64,
}

impl EventLog {
    /// Opens (or creates) the log at `path` and rebuilds the id index.
    ///
    /// An incomplete final record is discarded and the file trimmed to
    /// the last complete one.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let mut data = Vec::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut data)?;

        let mut index = HashSet::new();
        let valid_len = scan(&data, |row| {
            index.insert(row.event_id);
        });

        if valid_len < data.len() as u64 {
            warn!(
                path = %path.display(),
                valid = valid_len,
                total = data.len(),
                "trimming incomplete record from log tail"
            );
            file.set_len(valid_len)?;
        }
        file.seek(SeekFrom::End(0))?;

        Ok(Self {
            path,
            inner: Mutex::new(Inner {
                file,
                index,
                committed: valid_len,
            }),
        })
    }

    /// Returns the path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Forces buffered records to stable storage.
    ///
    /// Appends themselves are not fsynced: the delivery guarantee is
    /// "received and attempted to persist", and acks must not wait on
    /// the disk.
    pub fn sync(&self) -> StoreResult<()> {
        let inner = self.inner.lock().expect("log lock poisoned");
        inner.file.sync_data()?;
        Ok(())
    }
}

impl ActivityStore for EventLog {
    fn insert(&self, user: &UserId, event: &ActivityEvent) -> StoreResult<Insert> {
        let row = StoredEvent::from_event(user, event)?;
        let mut inner = self.inner.lock().expect("log lock poisoned");

        if inner.index.contains(&row.event_id) {
            return Ok(Insert::Duplicate);
        }

        // Anything past the watermark is the torn remains of a failed
        // append; writing after it would poison every later record.
        if inner.file.metadata()?.len() != inner.committed {
            let committed = inner.committed;
            inner.file.set_len(committed)?;
        }

        let encoded = postcard::to_allocvec(&row)?;
        let mut record = Vec::with_capacity(LENGTH_PREFIX_SIZE + encoded.len());
        record.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        record.extend_from_slice(&encoded);
        if let Err(e) = inner.file.write_all(&record) {
            let committed = inner.committed;
            let _ = inner.file.set_len(committed);
            return Err(e.into());
        }
        inner.committed += record.len() as u64;

        inner.index.insert(row.event_id);
        Ok(Insert::Stored)
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.inner.lock().expect("log lock poisoned").index.len())
    }

    fn events_for(&self, user: &UserId) -> StoreResult<Vec<StoredEvent>> {
        // Hold the lock across the scan so a concurrent append cannot
        // leave a half-written record visible to the reader.
        let _inner = self.inner.lock().expect("log lock poisoned");

        let mut data = Vec::new();
        File::open(&self.path)?.read_to_end(&mut data)?;

        let mut rows = Vec::new();
        scan(&data, |row| {
            if &row.user_id == user {
                rows.push(row);
            }
        });
        Ok(rows)
    }
}

/// Scans `data` for complete records, invoking `f` per decoded row.
///
/// Returns the byte length of the valid prefix. Scanning stops at the
/// first incomplete or undecodable record; everything before it stays.
fn scan(data: &[u8], mut f: impl FnMut(StoredEvent)) -> u64 {
    let mut pos = 0usize;
    while data.len() - pos >= LENGTH_PREFIX_SIZE {
        let len = u32::from_le_bytes(
            data[pos..pos + LENGTH_PREFIX_SIZE]
                .try_into()
                .expect("slice is exactly 4 bytes after bounds check"),
        ) as usize;

        let start = pos + LENGTH_PREFIX_SIZE;
        let Some(end) = start.checked_add(len) else {
            break;
        };
        if end > data.len() {
            break;
        }

        match postcard::from_bytes::<StoredEvent>(&data[start..end]) {
            Ok(row) => f(row),
            Err(_) => break,
        }
        pos = end;
    }
    pos as u64
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use actigraph_types::ActivitySample;
    use tempfile::tempdir;

    use super::*;

    fn key_event() -> ActivityEvent {
        ActivitySample::Key {
            keystrokes: 5,
            recent_keys: vec![1, 2, 3],
        }
        .stamp()
    }

    #[test]
    fn test_insert_and_read_back() {
        let dir = tempdir().unwrap();
        let log = EventLog::open(dir.path().join("activity.log")).unwrap();
        let user = UserId::new("u1");
        let event = key_event();

        assert_eq!(log.insert(&user, &event).unwrap(), Insert::Stored);
        let rows = log.events_for(&user).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event_id, event.event_id());
        assert_eq!(rows[0].timestamp, event.timestamp());
    }

    #[test]
    fn test_duplicate_insert_is_noop() {
        let dir = tempdir().unwrap();
        let log = EventLog::open(dir.path().join("activity.log")).unwrap();
        let user = UserId::new("u1");
        let event = key_event();

        assert_eq!(log.insert(&user, &event).unwrap(), Insert::Stored);
        assert_eq!(log.insert(&user, &event).unwrap(), Insert::Duplicate);
        assert_eq!(log.len().unwrap(), 1);
    }

    #[test]
    fn test_index_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("activity.log");
        let user = UserId::new("u1");
        let event = key_event();

        {
            let log = EventLog::open(&path).unwrap();
            log.insert(&user, &event).unwrap();
        }

        let log = EventLog::open(&path).unwrap();
        assert_eq!(log.len().unwrap(), 1);
        // Dedup works across restarts: same id is still a duplicate.
        assert_eq!(log.insert(&user, &event).unwrap(), Insert::Duplicate);
    }

    #[test]
    fn test_truncated_tail_is_trimmed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("activity.log");
        let user = UserId::new("u1");

        {
            let log = EventLog::open(&path).unwrap();
            log.insert(&user, &key_event()).unwrap();
            log.insert(&user, &key_event()).unwrap();
        }

        // Simulate a crash mid-append: a length prefix promising more
        // bytes than exist.
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&500u32.to_le_bytes()).unwrap();
            file.write_all(b"partial").unwrap();
        }

        let log = EventLog::open(&path).unwrap();
        assert_eq!(log.len().unwrap(), 2);

        // The log accepts appends again after trimming.
        let event = key_event();
        assert_eq!(log.insert(&user, &event).unwrap(), Insert::Stored);
        assert_eq!(log.events_for(&user).unwrap().len(), 3);
    }

    #[test]
    fn test_torn_append_does_not_poison_later_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("activity.log");
        let user = UserId::new("u1");

        let log = EventLog::open(&path).unwrap();
        log.insert(&user, &key_event()).unwrap();

        // Torn bytes past the committed watermark, as a failed
        // mid-append write leaves behind.
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&500u32.to_le_bytes()).unwrap();
            file.write_all(b"par").unwrap();
        }

        // The next insert through the live log must not land after the
        // torn bytes, or the recovery scan would discard it.
        assert_eq!(log.insert(&user, &key_event()).unwrap(), Insert::Stored);
        assert_eq!(log.events_for(&user).unwrap().len(), 2);

        drop(log);
        let log = EventLog::open(&path).unwrap();
        assert_eq!(log.len().unwrap(), 2);
    }
}
