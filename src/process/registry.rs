use crate::config::GlobalSettings;
use crate::process::restart::EffectivePolicy;
use crate::process::types::{name_key, ProcessRecord};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

struct Entry {
    /// Insertion order, kept across overwrites
    seq: u64,
    record: ProcessRecord,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    next_seq: u64,
}

/// Concurrent map of process name to record.
///
/// Keys are case-insensitive. Every mutation happens under a single write
/// lock so a snapshot never observes a half-applied update. The lock is
/// never held across an `.await`.
#[derive(Default)]
pub struct ProcessRegistry {
    inner: RwLock<Inner>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or overwrite a record by name, returning the previous one
    pub fn insert(&self, record: ProcessRecord) -> Option<ProcessRecord> {
        let key = record.key();
        let mut inner = self.write();

        if let Some(entry) = inner.entries.get_mut(&key) {
            return Some(std::mem::replace(&mut entry.record, record));
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(key, Entry { seq, record });
        None
    }

    pub fn remove(&self, name: &str) -> Option<ProcessRecord> {
        self.write()
            .entries
            .remove(&name_key(name))
            .map(|entry| entry.record)
    }

    pub fn get(&self, name: &str) -> Option<ProcessRecord> {
        self.read()
            .entries
            .get(&name_key(name))
            .map(|entry| entry.record.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().entries.contains_key(&name_key(name))
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    /// Point-in-time copy of every record, in insertion order
    pub fn snapshot(&self) -> Vec<ProcessRecord> {
        let inner = self.read();
        let mut entries: Vec<&Entry> = inner.entries.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| entry.record.clone()).collect()
    }

    /// Apply `f` to the named record under the write lock.
    ///
    /// Returns `None` when the record no longer exists.
    pub fn update<R>(&self, name: &str, f: impl FnOnce(&mut ProcessRecord) -> R) -> Option<R> {
        self.write()
            .entries
            .get_mut(&name_key(name))
            .map(|entry| f(&mut entry.record))
    }

    /// Apply `f` to every record under one write lock
    pub fn update_all(&self, mut f: impl FnMut(&mut ProcessRecord)) {
        for entry in self.write().entries.values_mut() {
            f(&mut entry.record);
        }
    }

    /// Replace the whole content, e.g. after loading a settings document
    pub fn replace_all(&self, records: Vec<ProcessRecord>) {
        let mut inner = self.write();
        inner.entries.clear();
        inner.next_seq = 0;

        for mut record in records {
            record.check_counter = 0;
            let key = record.key();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.entries.insert(key, Entry { seq, record });
        }
    }

    /// Advance every record's check counter by one tick and return copies of
    /// the records whose effective check interval has been reached. Their
    /// counters are reset to zero.
    pub fn collect_due(&self, global: &GlobalSettings) -> Vec<ProcessRecord> {
        let mut inner = self.write();
        let mut due: Vec<(u64, ProcessRecord)> = Vec::new();

        for entry in inner.entries.values_mut() {
            let record = &mut entry.record;
            record.check_counter += 1;

            let interval = EffectivePolicy::resolve(record, global).check_interval_secs;
            if record.check_counter >= interval {
                record.check_counter = 0;
                due.push((entry.seq, record.clone()));
            }
        }

        due.sort_by_key(|(seq, _)| *seq);
        due.into_iter().map(|(_, record)| record).collect()
    }
}
