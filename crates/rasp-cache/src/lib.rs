//! Rasp Cache: versioned SQLite storage for timetable query results.
//!
//! Snapshots of timetable rows are keyed by route and Moscow calendar day.
//! The store owns its on-disk schema, migrates it between schema versions in
//! both directions, and rebuilds itself from scratch when the file is damaged.

pub mod codec;
pub mod config;
pub mod entry;
pub mod migrate;
pub mod recovery;
pub mod schema;
pub mod shared;
pub mod store;

pub use entry::{CacheKey, TimetableEntry};
pub use schema::SchemaVersion;
pub use shared::SharedCache;
pub use store::{CacheStore, OpenOptions};

// ---------------------------------------------------------------------------
// CacheError
// ---------------------------------------------------------------------------

/// Error type for cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The requested schema version is not one this build knows about.
    #[error("unsupported schema version: {0}")]
    UnsupportedVersion(u32),

    /// A migration step failed; the transaction was rolled back.
    #[error("schema migration {from} -> {to} failed: {reason}")]
    Migration { from: u32, to: u32, reason: String },

    /// The storage medium could not be opened, read or written.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A stored row could not be turned back into a timetable entry.
    #[error("cannot decode row {row_id} column `{column}`: {reason}")]
    Decode {
        row_id: i64,
        column: &'static str,
        reason: String,
    },

    /// The storage layer reported a damaged file. Consumed by the open path.
    #[error("cache database corrupt: {0}")]
    CorruptionDetected(String),

    /// A configuration file could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience alias for `Result<T, CacheError>`.
pub type CacheResult<T> = Result<T, CacheError>;

impl CacheError {
    /// Classifies a SQLite error raised while performing `op`.
    pub(crate) fn storage(op: &str, err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase) => {
                CacheError::CorruptionDetected(format!("{op}: {err}"))
            }
            _ => CacheError::StorageUnavailable(format!("{op}: {err}")),
        }
    }

    /// Returns `true` if this error signals a damaged storage file.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, CacheError::CorruptionDetected(_))
    }
}
