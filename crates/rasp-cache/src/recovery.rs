//! Corruption detection and recovery for the cache file.
//!
//! When SQLite reports a damaged file, the handle is closed, the file is
//! checked, and a file that fails the check is deleted together with its
//! journal sidecars. The opener then retries and gets a fresh, empty store.
//! Cached data is never partially repaired.

use std::io;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use tracing::{debug, warn};

use crate::{CacheError, CacheResult};

/// Suffixes of the files SQLite keeps next to a database.
const SIDECAR_SUFFIXES: [&str; 3] = ["-journal", "-wal", "-shm"];

// ---------------------------------------------------------------------------
// IntegrityProbe
// ---------------------------------------------------------------------------

/// Decides whether a cache file is intact.
pub trait IntegrityProbe: Send + Sync {
    /// Returns `true` if the file at `path` passes the check.
    fn is_intact(&self, path: &Path) -> bool;
}

/// Runs `PRAGMA quick_check` on a read-only connection.
#[derive(Debug, Default, Clone, Copy)]
pub struct QuickCheck;

impl IntegrityProbe for QuickCheck {
    fn is_intact(&self, path: &Path) -> bool {
        match integrity_check(path) {
            Ok(intact) => intact,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "integrity check could not run");
                false
            }
        }
    }
}

/// Runs `PRAGMA quick_check` against the file at `path`.
///
/// # Errors
///
/// Returns the SQLite error if the file cannot be opened or checked at all.
pub fn integrity_check(path: &Path) -> Result<bool, rusqlite::Error> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    let mut stmt = conn.prepare("PRAGMA quick_check")?;
    let messages = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(messages.len() == 1 && messages[0] == "ok")
}

// ---------------------------------------------------------------------------
// CorruptionHandler
// ---------------------------------------------------------------------------

/// What the handler did with the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// The file failed the check and was deleted.
    Deleted,
    /// The file passed the check; the fault was spurious.
    LeftInPlace,
}

/// Consumes corruption faults raised while opening or using the store.
pub struct CorruptionHandler {
    probe: Box<dyn IntegrityProbe>,
}

impl Default for CorruptionHandler {
    fn default() -> Self {
        Self::with_probe(QuickCheck)
    }
}

impl CorruptionHandler {
    pub fn with_probe(probe: impl IntegrityProbe + 'static) -> Self {
        Self {
            probe: Box::new(probe),
        }
    }

    /// Handles a corruption fault for the store at `path`.
    ///
    /// `conn` is the handle that raised the fault, if one was obtained; it is
    /// closed first and close errors are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::StorageUnavailable`] if a damaged file cannot be
    /// deleted.
    pub fn handle(
        &self,
        path: &Path,
        conn: Option<Connection>,
        fault: &CacheError,
    ) -> CacheResult<Recovery> {
        warn!(path = %path.display(), error = %fault, "cache corruption detected");
        close_quietly(conn);

        if self.probe.is_intact(path) {
            warn!(path = %path.display(), "integrity check passed; keeping cache file");
            return Ok(Recovery::LeftInPlace);
        }

        delete_store(path)?;
        warn!(path = %path.display(), "deleted corrupt cache; it will be recreated empty");
        Ok(Recovery::Deleted)
    }

    /// Deletes the store without consulting the probe. Used when a fault
    /// repeats after the file was judged intact.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::StorageUnavailable`] if the file cannot be deleted.
    pub fn discard(
        &self,
        path: &Path,
        conn: Option<Connection>,
        fault: &CacheError,
    ) -> CacheResult<Recovery> {
        warn!(path = %path.display(), error = %fault, "cache corruption persists; discarding");
        close_quietly(conn);
        delete_store(path)?;
        Ok(Recovery::Deleted)
    }
}

fn close_quietly(conn: Option<Connection>) {
    if let Some(conn) = conn {
        if let Err((_, e)) = conn.close() {
            debug!(error = %e, "ignoring close error on corrupt cache");
        }
    }
}

/// Deletes the database file and its sidecars. Missing files are fine.
///
/// # Errors
///
/// Returns [`CacheError::StorageUnavailable`] on any other I/O error.
pub fn delete_store(path: &Path) -> CacheResult<()> {
    let mut targets = vec![path.to_path_buf()];
    targets.extend(SIDECAR_SUFFIXES.iter().map(|suffix| sidecar(path, suffix)));

    for target in targets {
        match std::fs::remove_file(&target) {
            Ok(()) => debug!(path = %target.display(), "removed cache file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(CacheError::StorageUnavailable(format!(
                    "deleting corrupt cache '{}': {e}",
                    target.display()
                )))
            }
        }
    }
    Ok(())
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
