//! Schema versions and the column set each one puts on disk.
//!
//! Every version adds columns to its predecessor and never removes any, so
//! the physical column set of a version is the concatenation of the columns
//! introduced by it and every earlier version.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{CacheError, CacheResult};

/// Canonical name of the timetable row table.
pub const TIMETABLE_TABLE: &str = "timetable_cache";

/// Temporary name used while a downgrade rebuilds the table.
pub const TIMETABLE_TABLE_REBUILD: &str = "timetable_cache_rebuild";

/// Version-independent table recording which keys hold a snapshot.
pub const SNAPSHOT_TABLE: &str = "cache_snapshots";

/// Surrogate row id. Also gives rows their insertion order.
pub const ROW_ID_COLUMN: &str = "_id";

// ---------------------------------------------------------------------------
// SchemaVersion
// ---------------------------------------------------------------------------

/// Ordered schema versions of the timetable table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum SchemaVersion {
    /// Required columns only.
    V1,
    /// Adds the optional `train_name` column.
    V2,
}

impl SchemaVersion {
    /// Every known version, oldest first.
    pub const ALL: [SchemaVersion; 2] = [SchemaVersion::V1, SchemaVersion::V2];

    /// The newest version this build understands.
    pub const LATEST: SchemaVersion = SchemaVersion::V2;

    /// Returns the number stored in `PRAGMA user_version`.
    #[must_use]
    pub const fn number(self) -> u32 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }

    /// Resolves a stored or requested version number.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::UnsupportedVersion`] for numbers outside the known set.
    pub fn from_number(number: u32) -> CacheResult<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.number() == number)
            .ok_or(CacheError::UnsupportedVersion(number))
    }

    /// The version directly after this one, if any.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        match self {
            Self::V1 => Some(Self::V2),
            Self::V2 => None,
        }
    }

    /// Columns first introduced by this version.
    #[must_use]
    pub const fn introduced_columns(self) -> &'static [Column] {
        match self {
            Self::V1 => &[
                Column::FromId,
                Column::ToId,
                Column::DateMsk,
                Column::DepartureStationId,
                Column::DepartureStationName,
                Column::DepartureTime,
                Column::ArrivalStationId,
                Column::ArrivalStationName,
                Column::ArrivalTime,
                Column::TrainRouteId,
                Column::RouteStartStationName,
                Column::RouteEndStationName,
            ],
            Self::V2 => &[Column::TrainName],
        }
    }

    /// Full physical column set of this version, excluding the row id.
    #[must_use]
    pub fn columns(self) -> Vec<Column> {
        Self::ALL
            .into_iter()
            .take_while(|v| *v <= self)
            .flat_map(|v| v.introduced_columns().iter().copied())
            .collect()
    }

    /// Returns `true` if `column` exists on disk at this version.
    #[must_use]
    pub fn has_column(self, column: Column) -> bool {
        self.columns().contains(&column)
    }

    /// `CREATE TABLE` statement for this version's shape under `table`.
    #[must_use]
    pub fn create_table_sql(self, table: &str) -> String {
        let mut defs = vec![format!("{ROW_ID_COLUMN} INTEGER PRIMARY KEY AUTOINCREMENT")];
        defs.extend(
            self.columns()
                .into_iter()
                .map(|c| format!("{} {}", c.name(), c.sql_type())),
        );
        format!("CREATE TABLE {table} (\n    {}\n)", defs.join(",\n    "))
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.number())
    }
}

impl TryFrom<u32> for SchemaVersion {
    type Error = CacheError;

    fn try_from(number: u32) -> Result<Self, Self::Error> {
        Self::from_number(number)
    }
}

impl From<SchemaVersion> for u32 {
    fn from(version: SchemaVersion) -> Self {
        version.number()
    }
}

// ---------------------------------------------------------------------------
// Column
// ---------------------------------------------------------------------------

/// A physical column of the timetable table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    FromId,
    ToId,
    DateMsk,
    DepartureStationId,
    DepartureStationName,
    DepartureTime,
    ArrivalStationId,
    ArrivalStationName,
    ArrivalTime,
    TrainRouteId,
    TrainName,
    RouteStartStationName,
    RouteEndStationName,
}

impl Column {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::FromId => "from_id",
            Self::ToId => "to_id",
            Self::DateMsk => "date_msk",
            Self::DepartureStationId => "departure_station_id",
            Self::DepartureStationName => "departure_station_name",
            Self::DepartureTime => "departure_time",
            Self::ArrivalStationId => "arrival_station_id",
            Self::ArrivalStationName => "arrival_station_name",
            Self::ArrivalTime => "arrival_time",
            Self::TrainRouteId => "train_route_id",
            Self::TrainName => "train_name",
            Self::RouteStartStationName => "route_start_station_name",
            Self::RouteEndStationName => "route_end_station_name",
        }
    }

    /// Column type and constraint. Columns added by an upgrade must be
    /// nullable, since `ALTER TABLE ADD COLUMN` fills existing rows with NULL.
    #[must_use]
    pub const fn sql_type(self) -> &'static str {
        match self {
            Self::TrainName => "TEXT",
            _ => "TEXT NOT NULL",
        }
    }
}

/// Index DDL for the key lookup. Re-run after every table rebuild.
#[must_use]
pub fn key_index_sql() -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS idx_{TIMETABLE_TABLE}_key \
         ON {TIMETABLE_TABLE}(from_id, to_id, date_msk)"
    )
}

/// DDL for the snapshot marker table.
#[must_use]
pub fn snapshot_table_sql() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {SNAPSHOT_TABLE} (
            from_id TEXT NOT NULL,
            to_id TEXT NOT NULL,
            date_msk TEXT NOT NULL,
            row_count INTEGER NOT NULL,
            stored_at TEXT NOT NULL,
            PRIMARY KEY (from_id, to_id, date_msk)
        )"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn versions_are_ordered() {
        assert!(SchemaVersion::V1 < SchemaVersion::V2);
        assert_eq!(SchemaVersion::V1.next(), Some(SchemaVersion::V2));
        assert_eq!(SchemaVersion::LATEST.next(), None);
    }

    #[test]
    fn from_number_rejects_unknown() {
        assert_eq!(SchemaVersion::from_number(1).unwrap(), SchemaVersion::V1);
        assert_eq!(SchemaVersion::from_number(2).unwrap(), SchemaVersion::V2);
        assert!(matches!(
            SchemaVersion::from_number(0),
            Err(CacheError::UnsupportedVersion(0))
        ));
        assert!(matches!(
            SchemaVersion::from_number(3),
            Err(CacheError::UnsupportedVersion(3))
        ));
    }

    #[test]
    fn v2_is_superset_of_v1() {
        let v1 = SchemaVersion::V1.columns();
        let v2 = SchemaVersion::V2.columns();
        assert_eq!(v2.len(), v1.len() + 1);
        assert!(v1.iter().all(|c| v2.contains(c)));
        assert!(!SchemaVersion::V1.has_column(Column::TrainName));
        assert!(SchemaVersion::V2.has_column(Column::TrainName));
    }

    #[test]
    fn ddl_is_valid_sql() {
        let conn = Connection::open_in_memory().unwrap();
        for version in SchemaVersion::ALL {
            let table = format!("t_{}", version.number());
            conn.execute_batch(&version.create_table_sql(&table)).unwrap();
        }
        conn.execute_batch(&snapshot_table_sql()).unwrap();
        conn.execute_batch(&snapshot_table_sql()).unwrap();
    }

    #[test]
    fn version_deserializes_from_number() {
        let v: SchemaVersion = serde_yml::from_str("1").unwrap();
        assert_eq!(v, SchemaVersion::V1);
        assert!(serde_yml::from_str::<SchemaVersion>("9").is_err());
    }
}
