//! SQLite-backed snapshot store for timetable query results.
//!
//! A snapshot is the full list of rows cached for one [`CacheKey`]. The
//! timetable table holds the rows; a small marker table records which keys
//! hold a snapshot, so an empty snapshot is distinguishable from a miss.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::codec::RecordCodec;
use crate::config::DEFAULT_OPEN_TIMEOUT_MS;
use crate::migrate::{self, Migration};
use crate::recovery::CorruptionHandler;
use crate::schema::{SNAPSHOT_TABLE, TIMETABLE_TABLE};
use crate::{CacheError, CacheKey, CacheResult, SchemaVersion, TimetableEntry};

// ---------------------------------------------------------------------------
// OpenOptions
// ---------------------------------------------------------------------------

/// Where and how to open a [`CacheStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOptions {
    path: Option<PathBuf>,
    version: SchemaVersion,
    open_timeout: Duration,
}

impl OpenOptions {
    /// Options for a file-backed store.
    pub fn new(path: impl Into<PathBuf>, version: SchemaVersion) -> Self {
        Self {
            path: Some(path.into()),
            version,
            open_timeout: Duration::from_millis(DEFAULT_OPEN_TIMEOUT_MS),
        }
    }

    /// Options for a private in-memory store (useful for testing).
    pub fn in_memory(version: SchemaVersion) -> Self {
        Self {
            path: None,
            version,
            open_timeout: Duration::from_millis(DEFAULT_OPEN_TIMEOUT_MS),
        }
    }

    /// Bounds how long opening waits on a locked file.
    #[must_use]
    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Replaces the schema version to open at.
    #[must_use]
    pub fn with_version(mut self, version: SchemaVersion) -> Self {
        self.version = version;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn version(&self) -> SchemaVersion {
        self.version
    }
}

/// An open attempt that failed, with the handle if one was obtained.
struct OpenFailure {
    conn: Option<Connection>,
    error: CacheError,
}

// ---------------------------------------------------------------------------
// CacheStore
// ---------------------------------------------------------------------------

/// Versioned snapshot cache over one SQLite file.
pub struct CacheStore {
    conn: Connection,
    codec: RecordCodec,
    options: OpenOptions,
    migration: Migration,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("options", &self.options)
            .field("migration", &self.migration)
            .finish_non_exhaustive()
    }
}

impl CacheStore {
    /// Opens or creates the store at `path`, migrating it to `version`.
    ///
    /// A damaged file is deleted and recreated empty.
    pub fn open(path: impl Into<PathBuf>, version: SchemaVersion) -> CacheResult<Self> {
        Self::open_with(OpenOptions::new(path, version))
    }

    /// Creates an in-memory store.
    pub fn in_memory(version: SchemaVersion) -> CacheResult<Self> {
        Self::open_with(OpenOptions::in_memory(version))
    }

    /// Opens a store with the default corruption handler.
    pub fn open_with(options: OpenOptions) -> CacheResult<Self> {
        Self::open_guarded(options, &CorruptionHandler::default())
    }

    /// Opens a store, routing corruption faults through `handler`.
    ///
    /// The first fault is checked and possibly deleted; a second fault
    /// deletes the file unconditionally. Corruption never reaches the caller.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::UnsupportedVersion`], [`CacheError::Migration`]
    /// or [`CacheError::StorageUnavailable`].
    pub fn open_guarded(options: OpenOptions, handler: &CorruptionHandler) -> CacheResult<Self> {
        let Some(path) = options.path().map(Path::to_path_buf) else {
            return Self::try_open(&options).map_err(|f| f.error);
        };

        let mut faults = 0;
        loop {
            let failure = match Self::try_open(&options) {
                Ok(store) => return Ok(store),
                Err(failure) => failure,
            };
            if !failure.error.is_corruption() {
                return Err(failure.error);
            }

            faults += 1;
            match faults {
                1 => handler.handle(&path, failure.conn, &failure.error)?,
                2 => handler.discard(&path, failure.conn, &failure.error)?,
                _ => {
                    return Err(CacheError::StorageUnavailable(format!(
                        "cache '{}' still corrupt after rebuild: {}",
                        path.display(),
                        failure.error
                    )))
                }
            };
        }
    }

    fn try_open(options: &OpenOptions) -> Result<Self, OpenFailure> {
        let opened = match options.path() {
            Some(path) => {
                ensure_parent_dir(path)?;
                Connection::open(path)
            }
            None => Connection::open_in_memory(),
        };
        let mut conn = opened.map_err(|e| OpenFailure {
            conn: None,
            error: CacheError::storage("open", e),
        })?;

        if let Err(e) = conn.busy_timeout(options.open_timeout) {
            return Err(OpenFailure {
                conn: Some(conn),
                error: CacheError::storage("set busy timeout", e),
            });
        }

        match migrate::migrate(&mut conn, options.version) {
            Ok(migration) => Ok(Self {
                conn,
                codec: RecordCodec::new(options.version),
                options: options.clone(),
                migration,
            }),
            Err(error) => Err(OpenFailure {
                conn: Some(conn),
                error,
            }),
        }
    }

    /// Closes this handle and rebuilds the store after a corruption fault
    /// raised by a read or write.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::StorageUnavailable`] if the store cannot be
    /// deleted or reopened.
    pub fn recover(self, fault: &CacheError) -> CacheResult<Self> {
        let Self { conn, options, .. } = self;
        match options.path() {
            Some(path) => {
                CorruptionHandler::default().handle(path, Some(conn), fault)?;
            }
            None => drop(conn),
        }
        Self::open_with(options)
    }

    /// Looks up the snapshot stored for `key`.
    ///
    /// Returns `Ok(None)` if no snapshot was ever stored and `Ok(Some(vec![]))`
    /// for an explicitly stored empty snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Decode`] if a stored row is malformed.
    pub fn get(&self, key: &CacheKey) -> CacheResult<Option<Vec<TimetableEntry>>> {
        let date = key.date_column();
        let key_params = params![key.from_station_id, key.to_station_id, date];
        let storage = |e| CacheError::storage("get", e);

        // Read both tables under one read transaction.
        let tx = self.conn.unchecked_transaction().map_err(storage)?;

        let expected: Option<i64> = tx
            .query_row(
                &format!(
                    "SELECT row_count FROM {SNAPSHOT_TABLE}
                     WHERE from_id = ?1 AND to_id = ?2 AND date_msk = ?3"
                ),
                key_params,
                |row| row.get(0),
            )
            .optional()
            .map_err(storage)?;

        let Some(expected) = expected else {
            debug!(%key, "cache miss");
            return Ok(None);
        };

        let mut stmt = tx.prepare_cached(&self.codec.select_sql()).map_err(storage)?;
        let mut rows = stmt.query(key_params).map_err(storage)?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next().map_err(storage)? {
            entries.push(self.codec.decode(row)?);
        }

        if usize::try_from(expected).ok() != Some(entries.len()) {
            warn!(%key, expected, found = entries.len(), "snapshot row count mismatch");
        }
        debug!(%key, rows = entries.len(), "cache hit");
        Ok(Some(entries))
    }

    /// Replaces the snapshot for `key` with `rows` in one transaction.
    ///
    /// Storing the same rows twice leaves one copy.
    pub fn put(&mut self, key: &CacheKey, rows: &[TimetableEntry]) -> CacheResult<()> {
        let date = key.date_column();
        let storage = |e| CacheError::storage("put", e);

        let tx = self.conn.transaction().map_err(storage)?;
        tx.execute(
            &format!(
                "DELETE FROM {TIMETABLE_TABLE}
                 WHERE from_id = ?1 AND to_id = ?2 AND date_msk = ?3"
            ),
            params![key.from_station_id, key.to_station_id, date],
        )
        .map_err(storage)?;

        {
            let mut insert = tx.prepare_cached(&self.codec.insert_sql()).map_err(storage)?;
            for entry in rows {
                insert
                    .execute(params_from_iter(self.codec.encode(key, entry)))
                    .map_err(storage)?;
            }
        }

        tx.execute(
            &format!(
                "INSERT OR REPLACE INTO {SNAPSHOT_TABLE}
                 (from_id, to_id, date_msk, row_count, stored_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)"
            ),
            params![
                key.from_station_id,
                key.to_station_id,
                date,
                rows.len() as i64,
                chrono::Utc::now().to_rfc3339()
            ],
        )
        .map_err(storage)?;
        tx.commit().map_err(storage)?;

        debug!(%key, rows = rows.len(), "cached snapshot");
        Ok(())
    }

    /// Drops the snapshot for `key`. Returns `true` if one existed.
    pub fn remove(&mut self, key: &CacheKey) -> CacheResult<bool> {
        let date = key.date_column();
        let key_params = params![key.from_station_id, key.to_station_id, date];
        let storage = |e| CacheError::storage("remove", e);

        let tx = self.conn.transaction().map_err(storage)?;
        tx.execute(
            &format!(
                "DELETE FROM {TIMETABLE_TABLE}
                 WHERE from_id = ?1 AND to_id = ?2 AND date_msk = ?3"
            ),
            key_params,
        )
        .map_err(storage)?;
        let removed = tx
            .execute(
                &format!(
                    "DELETE FROM {SNAPSHOT_TABLE}
                     WHERE from_id = ?1 AND to_id = ?2 AND date_msk = ?3"
                ),
                key_params,
            )
            .map_err(storage)?;
        tx.commit().map_err(storage)?;

        debug!(%key, removed = removed > 0, "removed snapshot");
        Ok(removed > 0)
    }

    /// Drops every snapshot.
    pub fn clear(&mut self) -> CacheResult<()> {
        let storage = |e| CacheError::storage("clear", e);

        let tx = self.conn.transaction().map_err(storage)?;
        tx.execute_batch(&format!(
            "DELETE FROM {TIMETABLE_TABLE};
             DELETE FROM {SNAPSHOT_TABLE};"
        ))
        .map_err(storage)?;
        tx.commit().map_err(storage)?;
        debug!("cache cleared");
        Ok(())
    }

    /// Number of keys holding a snapshot, including empty ones.
    pub fn snapshot_count(&self) -> CacheResult<u64> {
        self.count(SNAPSHOT_TABLE)
    }

    /// Number of stored timetable rows across all snapshots.
    pub fn row_count(&self) -> CacheResult<u64> {
        self.count(TIMETABLE_TABLE)
    }

    fn count(&self, table: &str) -> CacheResult<u64> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
            .map_err(|e| CacheError::storage("count", e))?;
        Ok(count as u64)
    }

    /// Runs `PRAGMA quick_check` on the open handle.
    pub fn integrity_check(&self) -> CacheResult<bool> {
        let message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get(0))
            .map_err(|e| CacheError::storage("quick_check", e))?;
        Ok(message == "ok")
    }

    /// The schema version the store was opened at.
    pub fn schema_version(&self) -> SchemaVersion {
        self.codec.version()
    }

    /// What the open did to the schema.
    pub fn migration(&self) -> Migration {
        self.migration
    }

    /// Backing file, or `None` for an in-memory store.
    pub fn path(&self) -> Option<&Path> {
        self.options.path()
    }

    /// Closes the handle, reporting close errors.
    pub fn close(self) -> CacheResult<()> {
        self.conn
            .close()
            .map_err(|(_, e)| CacheError::storage("close", e))
    }
}

fn ensure_parent_dir(path: &Path) -> Result<(), OpenFailure> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
            std::fs::create_dir_all(parent).map_err(|e| OpenFailure {
                conn: None,
                error: CacheError::StorageUnavailable(format!(
                    "creating cache directory '{}': {e}",
                    parent.display()
                )),
            })
        }
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, NaiveDate};

    fn entry(route: &str, train_name: Option<&str>) -> TimetableEntry {
        TimetableEntry {
            departure_station_id: "2004000".to_string(),
            departure_station_name: "Saint Petersburg".to_string(),
            departure_time: DateTime::parse_from_rfc3339("2024-05-01T08:15:00+03:00").unwrap(),
            arrival_station_id: "2000000".to_string(),
            arrival_station_name: "Moscow".to_string(),
            arrival_time: DateTime::parse_from_rfc3339("2024-05-01T12:10:00+03:00").unwrap(),
            train_route_id: route.to_string(),
            train_name: train_name.map(str::to_string),
            route_start_station_name: "Saint Petersburg".to_string(),
            route_end_station_name: "Moscow".to_string(),
        }
    }

    fn key(day: u32) -> CacheKey {
        CacheKey::new("2004000", "2000000", NaiveDate::from_ymd_opt(2024, 5, day).unwrap())
    }

    #[test]
    fn cache_miss() {
        let store = CacheStore::in_memory(SchemaVersion::V2).unwrap();
        assert_eq!(store.get(&key(1)).unwrap(), None);
    }

    #[test]
    fn put_get_preserves_order() {
        let mut store = CacheStore::in_memory(SchemaVersion::V2).unwrap();
        let rows = vec![entry("752A", Some("Sapsan")), entry("001A", Some("Krasnaya Strela"))];

        store.put(&key(1), &rows).unwrap();

        assert_eq!(store.get(&key(1)).unwrap(), Some(rows));
        assert_eq!(store.get(&key(2)).unwrap(), None);
    }

    #[test]
    fn empty_snapshot_is_a_hit() {
        let mut store = CacheStore::in_memory(SchemaVersion::V1).unwrap();
        store.put(&key(1), &[]).unwrap();

        assert_eq!(store.get(&key(1)).unwrap(), Some(Vec::new()));
        assert_eq!(store.snapshot_count().unwrap(), 1);
        assert_eq!(store.row_count().unwrap(), 0);
    }

    #[test]
    fn put_replaces_existing_snapshot() {
        let mut store = CacheStore::in_memory(SchemaVersion::V2).unwrap();
        let rows = vec![entry("752A", None), entry("754A", None)];

        store.put(&key(1), &rows).unwrap();
        store.put(&key(1), &rows).unwrap();
        assert_eq!(store.row_count().unwrap(), 2);

        store.put(&key(1), &[entry("001A", None)]).unwrap();
        assert_eq!(store.get(&key(1)).unwrap(), Some(vec![entry("001A", None)]));
        assert_eq!(store.row_count().unwrap(), 1);
        assert_eq!(store.snapshot_count().unwrap(), 1);
    }

    #[test]
    fn v1_store_drops_train_name() {
        let mut store = CacheStore::in_memory(SchemaVersion::V1).unwrap();
        store.put(&key(1), &[entry("752A", Some("Sapsan"))]).unwrap();

        let rows = store.get(&key(1)).unwrap().unwrap();
        assert_eq!(rows, vec![entry("752A", None)]);
    }

    #[test]
    fn remove_and_clear() {
        let mut store = CacheStore::in_memory(SchemaVersion::V2).unwrap();
        store.put(&key(1), &[entry("752A", None)]).unwrap();
        store.put(&key(2), &[]).unwrap();

        assert!(store.remove(&key(1)).unwrap());
        assert!(!store.remove(&key(1)).unwrap());
        assert_eq!(store.get(&key(1)).unwrap(), None);
        assert_eq!(store.row_count().unwrap(), 0);

        store.clear().unwrap();
        assert_eq!(store.get(&key(2)).unwrap(), None);
        assert_eq!(store.snapshot_count().unwrap(), 0);
    }

    #[test]
    fn malformed_row_surfaces_decode_error() {
        let mut store = CacheStore::in_memory(SchemaVersion::V2).unwrap();
        store.put(&key(1), &[entry("752A", None)]).unwrap();
        store
            .conn
            .execute("UPDATE timetable_cache SET arrival_time = 'soon'", [])
            .unwrap();

        let err = store.get(&key(1)).unwrap_err();
        assert!(matches!(err, CacheError::Decode { column: "arrival_time", .. }));
        // Other keys are still readable.
        assert_eq!(store.get(&key(2)).unwrap(), None);
    }

    #[test]
    fn in_memory_store_reports_state() {
        let store = CacheStore::in_memory(SchemaVersion::V1).unwrap();
        assert_eq!(store.schema_version(), SchemaVersion::V1);
        assert_eq!(store.migration(), Migration::Created(SchemaVersion::V1));
        assert!(store.path().is_none());
        assert!(store.integrity_check().unwrap());
        store.close().unwrap();
    }

    struct AlwaysIntact;

    impl crate::recovery::IntegrityProbe for AlwaysIntact {
        fn is_intact(&self, _path: &Path) -> bool {
            true
        }
    }

    #[test]
    fn repeated_fault_discards_file_judged_intact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        std::fs::write(&path, vec![0x42; 8192]).unwrap();

        let handler = CorruptionHandler::with_probe(AlwaysIntact);
        let store =
            CacheStore::open_guarded(OpenOptions::new(&path, SchemaVersion::V2), &handler).unwrap();

        assert_eq!(store.migration(), Migration::Created(SchemaVersion::V2));
        assert_eq!(store.snapshot_count().unwrap(), 0);
        assert!(std::fs::read(&path).unwrap().starts_with(b"SQLite format 3\0"));
    }

    #[test]
    fn file_based_cache_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("cache.db");

        {
            let mut store = CacheStore::open(&db_path, SchemaVersion::V2).unwrap();
            store.put(&key(1), &[entry("752A", Some("Sapsan"))]).unwrap();
        }

        let store = CacheStore::open(&db_path, SchemaVersion::V2).unwrap();
        assert_eq!(store.migration(), Migration::Unchanged(SchemaVersion::V2));
        assert_eq!(
            store.get(&key(1)).unwrap(),
            Some(vec![entry("752A", Some("Sapsan"))])
        );
    }
}
