//! Lazily opened, process-wide cache handle.
//!
//! A [`SharedCache`] is constructed once by the application and handed to
//! whoever needs the cache. The underlying [`CacheStore`] is opened on first
//! use under a mutex, so concurrent first callers share one initialization.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::warn;

use crate::store::{CacheStore, OpenOptions};
use crate::{CacheError, CacheKey, CacheResult, TimetableEntry};

/// Thread-safe, lazily opened cache store.
#[derive(Debug)]
pub struct SharedCache {
    options: OpenOptions,
    store: Mutex<Option<CacheStore>>,
    opens: AtomicUsize,
}

impl SharedCache {
    /// Creates the handle without touching storage.
    pub fn new(options: OpenOptions) -> Self {
        Self {
            options,
            store: Mutex::new(None),
            opens: AtomicUsize::new(0),
        }
    }

    /// Looks up a snapshot, opening the store first if needed.
    ///
    /// A corruption fault rebuilds the store and the lookup is retried, so
    /// the caller sees a miss instead of an error.
    pub fn get(&self, key: &CacheKey) -> CacheResult<Option<Vec<TimetableEntry>>> {
        self.with_store(|store| store.get(key))
    }

    /// Replaces the snapshot for `key`, opening the store first if needed.
    pub fn put(&self, key: &CacheKey, rows: &[TimetableEntry]) -> CacheResult<()> {
        self.with_store(|store| store.put(key, rows))
    }

    /// Runs `op` against the open store.
    pub fn with_store<T>(
        &self,
        mut op: impl FnMut(&mut CacheStore) -> CacheResult<T>,
    ) -> CacheResult<T> {
        let mut guard = self.lock();
        let store = self.ensure_open(&mut guard)?;

        match op(store) {
            Err(fault) if fault.is_corruption() => {
                warn!(error = %fault, "cache corrupted while in use; rebuilding");
                let Some(damaged) = guard.take() else {
                    return Err(fault);
                };
                let rebuilt = guard.insert(damaged.recover(&fault)?);
                self.opens.fetch_add(1, Ordering::SeqCst);
                op(rebuilt)
            }
            other => other,
        }
    }

    /// Returns `true` once the store has been opened.
    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    /// Number of times the underlying storage was opened.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Closes the store; the next access reopens it.
    pub fn close(&self) -> CacheResult<()> {
        match self.lock().take() {
            Some(store) => store.close(),
            None => Ok(()),
        }
    }

    pub fn options(&self) -> &OpenOptions {
        &self.options
    }

    fn lock(&self) -> MutexGuard<'_, Option<CacheStore>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open<'g>(
        &self,
        guard: &'g mut MutexGuard<'_, Option<CacheStore>>,
    ) -> CacheResult<&'g mut CacheStore> {
        if guard.is_none() {
            let store = CacheStore::open_with(self.options.clone())?;
            self.opens.fetch_add(1, Ordering::SeqCst);
            **guard = Some(store);
        }
        guard
            .as_mut()
            .ok_or_else(|| CacheError::StorageUnavailable("cache store not open".to_string()))
    }
}
