//! Schema creation and version transitions for the timetable table.
//!
//! The on-disk version lives in `PRAGMA user_version`. Every transition runs
//! inside one transaction together with the `user_version` update, so a
//! failed migration leaves the previous table and version in place.

use std::collections::HashSet;
use std::path::Path;

use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::schema::{
    self, Column, SchemaVersion, ROW_ID_COLUMN, TIMETABLE_TABLE, TIMETABLE_TABLE_REBUILD,
};
use crate::{CacheError, CacheResult};

// ---------------------------------------------------------------------------
// Migration
// ---------------------------------------------------------------------------

/// What the engine did to bring the store to the requested version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Migration {
    /// No table existed; one was created at this version.
    Created(SchemaVersion),
    /// The table was already at the requested version.
    Unchanged(SchemaVersion),
    /// Columns were added stepwise from `from` to `to`.
    Upgraded { from: SchemaVersion, to: SchemaVersion },
    /// The table was rebuilt at `to`; `from` is the raw on-disk number.
    Downgraded { from: u32, to: SchemaVersion },
}

impl Migration {
    /// The version the store is at afterwards.
    #[must_use]
    pub fn version(self) -> SchemaVersion {
        match self {
            Self::Created(v) | Self::Unchanged(v) => v,
            Self::Upgraded { to, .. } | Self::Downgraded { to, .. } => to,
        }
    }
}

/// The four steps of a downgrade rebuild, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DowngradeStep {
    CreateTemporary,
    CopyCommon,
    DropOriginal,
    RenameTemporary,
}

/// Brings the store behind `conn` to `target`, creating it if needed.
///
/// # Errors
///
/// Returns [`CacheError::Migration`] if a step fails (the transaction is
/// rolled back), [`CacheError::CorruptionDetected`] if SQLite reports a
/// damaged file, and [`CacheError::StorageUnavailable`] for other I/O faults.
pub fn migrate(conn: &mut Connection, target: SchemaVersion) -> CacheResult<Migration> {
    migrate_with(conn, target, &mut |_| Ok(()))
}

/// Like [`migrate`], calling `after_step` after each downgrade step.
/// An error from the hook aborts the downgrade like a failed step would.
pub(crate) fn migrate_with(
    conn: &mut Connection,
    target: SchemaVersion,
    after_step: &mut dyn FnMut(DowngradeStep) -> CacheResult<()>,
) -> CacheResult<Migration> {
    // Take the write lock before reading the version, so a concurrent opener
    // waits out the busy timeout and then sees the committed schema.
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| step_error(0, target, e))?;

    let stored = stored_version(&tx)?;
    let from = stored.unwrap_or(0);
    let fail = |e: rusqlite::Error| step_error(from, target, e);

    let migration = match stored {
        None => {
            tx.execute_batch(&target.create_table_sql(TIMETABLE_TABLE))
                .map_err(fail)?;
            Migration::Created(target)
        }
        Some(number) if number == target.number() => Migration::Unchanged(target),
        Some(number) if number < target.number() => {
            let current = SchemaVersion::from_number(number)?;
            upgrade(&tx, current, target).map_err(fail)?;
            Migration::Upgraded {
                from: current,
                to: target,
            }
        }
        Some(number) => {
            downgrade(&tx, target, after_step).map_err(|e| match e {
                StepError::Sqlite(e) => fail(e),
                StepError::Aborted(e) => e,
            })?;
            Migration::Downgraded {
                from: number,
                to: target,
            }
        }
    };

    tx.execute_batch(&schema::key_index_sql()).map_err(fail)?;
    tx.execute_batch(&schema::snapshot_table_sql())
        .map_err(fail)?;
    tx.pragma_update(None, "user_version", target.number())
        .map_err(fail)?;
    tx.commit().map_err(fail)?;

    match migration {
        Migration::Created(v) => info!(version = %v, "created cache schema"),
        Migration::Unchanged(v) => debug!(version = %v, "cache schema up to date"),
        Migration::Upgraded { from, to } => info!(%from, %to, "upgraded cache schema"),
        Migration::Downgraded { from, to } => {
            info!(from, %to, "downgraded cache schema; dropped columns discarded")
        }
    }

    Ok(migration)
}

/// Reads the on-disk version, or `None` for a store with no timetable table.
///
/// A table left with `user_version = 0` predates version tracking; its
/// version is inferred from its columns.
pub fn stored_version(conn: &Connection) -> CacheResult<Option<u32>> {
    let number: u32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|e| CacheError::storage("read user_version", e))?;

    let columns = table_columns(conn, TIMETABLE_TABLE)?;
    if columns.is_empty() {
        return Ok(None);
    }
    if number != 0 {
        return Ok(Some(number));
    }

    let inferred = if columns.contains(Column::TrainName.name()) {
        SchemaVersion::V2
    } else {
        SchemaVersion::V1
    };
    info!(version = %inferred, "adopting untracked cache table");
    Ok(Some(inferred.number()))
}

/// Reads the schema version of the file at `path` without modifying it.
///
/// Returns `None` for a missing file or one with no timetable table.
///
/// # Errors
///
/// Returns [`CacheError::UnsupportedVersion`] for a version this build does
/// not know, and a storage error if the file cannot be read.
pub fn read_version(path: &Path) -> CacheResult<Option<SchemaVersion>> {
    if !path.exists() {
        return Ok(None);
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| CacheError::storage("open read-only", e))?;
    stored_version(&conn)?
        .map(SchemaVersion::from_number)
        .transpose()
}

/// Returns the column names of `table`; empty if it does not exist.
pub fn table_columns(conn: &Connection, table: &str) -> CacheResult<HashSet<String>> {
    let read = || -> Result<HashSet<String>, rusqlite::Error> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
        rows.collect()
    };
    read().map_err(|e| CacheError::storage("read table_info", e))
}

fn upgrade(
    tx: &Transaction<'_>,
    from: SchemaVersion,
    to: SchemaVersion,
) -> Result<(), rusqlite::Error> {
    let mut version = from;
    while let Some(next) = version.next().filter(|v| *v <= to) {
        for column in next.introduced_columns() {
            add_column(tx, *column)?;
        }
        debug!(version = %next, "applied upgrade step");
        version = next;
    }
    Ok(())
}

/// Adds `column`, treating an already-present column as success.
fn add_column(tx: &Transaction<'_>, column: Column) -> Result<(), rusqlite::Error> {
    let sql = format!(
        "ALTER TABLE {TIMETABLE_TABLE} ADD COLUMN {} {}",
        column.name(),
        column.sql_type()
    );
    match tx.execute(&sql, []) {
        Ok(_) => Ok(()),
        Err(e) if is_duplicate_column(&e) => {
            debug!(column = column.name(), "column already present");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn is_duplicate_column(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.starts_with("duplicate column name")
    )
}

enum StepError {
    Sqlite(rusqlite::Error),
    Aborted(CacheError),
}

impl From<rusqlite::Error> for StepError {
    fn from(e: rusqlite::Error) -> Self {
        StepError::Sqlite(e)
    }
}

/// Rebuilds the table at `to`, keeping only the columns both shapes share.
///
/// Multi-version downgrades are a single projection onto the target's
/// columns, not a sequence of reverse steps.
fn downgrade(
    tx: &Transaction<'_>,
    to: SchemaVersion,
    after_step: &mut dyn FnMut(DowngradeStep) -> CacheResult<()>,
) -> Result<(), StepError> {
    let existing = table_columns(tx, TIMETABLE_TABLE).map_err(StepError::Aborted)?;
    let mut common = vec![ROW_ID_COLUMN];
    common.extend(
        to.columns()
            .into_iter()
            .map(Column::name)
            .filter(|name| existing.contains(*name)),
    );
    let common = common.join(", ");

    tx.execute_batch(&format!("DROP TABLE IF EXISTS {TIMETABLE_TABLE_REBUILD}"))?;
    tx.execute_batch(&to.create_table_sql(TIMETABLE_TABLE_REBUILD))?;
    after_step(DowngradeStep::CreateTemporary).map_err(StepError::Aborted)?;

    tx.execute_batch(&format!(
        "INSERT INTO {TIMETABLE_TABLE_REBUILD} ({common}) SELECT {common} FROM {TIMETABLE_TABLE}"
    ))?;
    after_step(DowngradeStep::CopyCommon).map_err(StepError::Aborted)?;

    tx.execute_batch(&format!("DROP TABLE {TIMETABLE_TABLE}"))?;
    after_step(DowngradeStep::DropOriginal).map_err(StepError::Aborted)?;

    tx.execute_batch(&format!(
        "ALTER TABLE {TIMETABLE_TABLE_REBUILD} RENAME TO {TIMETABLE_TABLE}"
    ))?;
    after_step(DowngradeStep::RenameTemporary).map_err(StepError::Aborted)?;

    Ok(())
}

/// Medium-level faults keep their storage classification; anything else is
/// a failed migration step.
fn step_error(from: u32, to: SchemaVersion, err: rusqlite::Error) -> CacheError {
    use rusqlite::ErrorCode;

    match err.sqlite_error_code() {
        Some(
            ErrorCode::DatabaseCorrupt
            | ErrorCode::NotADatabase
            | ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::SystemIoFailure
            | ErrorCode::CannotOpen
            | ErrorCode::DiskFull
            | ErrorCode::ReadOnly
            | ErrorCode::PermissionDenied,
        ) => CacheError::storage("migrate", err),
        _ => CacheError::Migration {
            from,
            to: to.number(),
            reason: err.to_string(),
        },
    }
}
