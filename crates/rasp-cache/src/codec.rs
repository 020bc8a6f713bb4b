//! Maps [`TimetableEntry`] values to and from the column tuple of a schema version.

use chrono::{DateTime, FixedOffset};
use rusqlite::types::Value;
use rusqlite::Row;

use crate::schema::{Column, SchemaVersion, ROW_ID_COLUMN, TIMETABLE_TABLE};
use crate::{CacheError, CacheKey, CacheResult, TimetableEntry};

/// Version-aware row codec.
///
/// Rows are selected as `_id` followed by the version's columns in
/// [`SchemaVersion::columns`] order; [`RecordCodec::select_sql`] and
/// [`RecordCodec::decode`] agree on that layout.
#[derive(Debug, Clone)]
pub struct RecordCodec {
    version: SchemaVersion,
    columns: Vec<Column>,
}

impl RecordCodec {
    pub fn new(version: SchemaVersion) -> Self {
        Self {
            version,
            columns: version.columns(),
        }
    }

    pub fn version(&self) -> SchemaVersion {
        self.version
    }

    /// Selects one snapshot's rows in insertion order. Binds `?1..?3` to the key.
    pub fn select_sql(&self) -> String {
        format!(
            "SELECT {ROW_ID_COLUMN}, {} FROM {TIMETABLE_TABLE}
             WHERE from_id = ?1 AND to_id = ?2 AND date_msk = ?3
             ORDER BY {ROW_ID_COLUMN} ASC",
            self.column_list()
        )
    }

    /// Inserts one row; parameters come from [`RecordCodec::encode`].
    pub fn insert_sql(&self) -> String {
        let placeholders: Vec<String> = (1..=self.columns.len()).map(|i| format!("?{i}")).collect();
        format!(
            "INSERT INTO {TIMETABLE_TABLE} ({}) VALUES ({})",
            self.column_list(),
            placeholders.join(", ")
        )
    }

    /// Encodes `entry` under `key`. Columns the version lacks are left out.
    pub fn encode(&self, key: &CacheKey, entry: &TimetableEntry) -> Vec<Value> {
        self.columns
            .iter()
            .map(|column| encode_column(*column, key, entry))
            .collect()
    }

    /// Decodes a row selected with [`RecordCodec::select_sql`].
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Decode`] if a column holds the wrong type, a
    /// required column is NULL, or a timestamp does not parse.
    pub fn decode(&self, row: &Row<'_>) -> CacheResult<TimetableEntry> {
        let row_id: i64 = row.get(0).map_err(|e| CacheError::Decode {
            row_id: -1,
            column: ROW_ID_COLUMN,
            reason: e.to_string(),
        })?;
        let fields = RowFields {
            row,
            row_id,
            codec: self,
        };

        let train_name = if self.version.has_column(Column::TrainName) {
            fields.optional(Column::TrainName)?
        } else {
            None
        };

        Ok(TimetableEntry {
            departure_station_id: fields.required(Column::DepartureStationId)?,
            departure_station_name: fields.required(Column::DepartureStationName)?,
            departure_time: fields.timestamp(Column::DepartureTime)?,
            arrival_station_id: fields.required(Column::ArrivalStationId)?,
            arrival_station_name: fields.required(Column::ArrivalStationName)?,
            arrival_time: fields.timestamp(Column::ArrivalTime)?,
            train_route_id: fields.required(Column::TrainRouteId)?,
            train_name,
            route_start_station_name: fields.required(Column::RouteStartStationName)?,
            route_end_station_name: fields.required(Column::RouteEndStationName)?,
        })
    }

    fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| c.name())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Position of `column` in a selected row (0 is the row id).
    fn position(&self, column: Column) -> Option<usize> {
        self.columns.iter().position(|c| *c == column).map(|i| i + 1)
    }
}

fn encode_column(column: Column, key: &CacheKey, entry: &TimetableEntry) -> Value {
    match column {
        Column::FromId => Value::Text(key.from_station_id.clone()),
        Column::ToId => Value::Text(key.to_station_id.clone()),
        Column::DateMsk => Value::Text(key.date_column()),
        Column::DepartureStationId => Value::Text(entry.departure_station_id.clone()),
        Column::DepartureStationName => Value::Text(entry.departure_station_name.clone()),
        Column::DepartureTime => Value::Text(entry.departure_time.to_rfc3339()),
        Column::ArrivalStationId => Value::Text(entry.arrival_station_id.clone()),
        Column::ArrivalStationName => Value::Text(entry.arrival_station_name.clone()),
        Column::ArrivalTime => Value::Text(entry.arrival_time.to_rfc3339()),
        Column::TrainRouteId => Value::Text(entry.train_route_id.clone()),
        Column::TrainName => entry.train_name.clone().map_or(Value::Null, Value::Text),
        Column::RouteStartStationName => Value::Text(entry.route_start_station_name.clone()),
        Column::RouteEndStationName => Value::Text(entry.route_end_station_name.clone()),
    }
}

/// Typed accessors over one selected row.
struct RowFields<'a, 'stmt> {
    row: &'a Row<'stmt>,
    row_id: i64,
    codec: &'a RecordCodec,
}

impl RowFields<'_, '_> {
    fn decode_error(&self, column: Column, reason: impl Into<String>) -> CacheError {
        CacheError::Decode {
            row_id: self.row_id,
            column: column.name(),
            reason: reason.into(),
        }
    }

    fn optional(&self, column: Column) -> CacheResult<Option<String>> {
        let idx = self
            .codec
            .position(column)
            .ok_or_else(|| self.decode_error(column, format!("not a {} column", self.codec.version)))?;
        self.row
            .get::<_, Option<String>>(idx)
            .map_err(|e| self.decode_error(column, e.to_string()))
    }

    fn required(&self, column: Column) -> CacheResult<String> {
        self.optional(column)?
            .ok_or_else(|| self.decode_error(column, "unexpected NULL"))
    }

    fn timestamp(&self, column: Column) -> CacheResult<DateTime<FixedOffset>> {
        let raw = self.required(column)?;
        DateTime::parse_from_rfc3339(&raw)
            .map_err(|e| self.decode_error(column, format!("invalid timestamp {raw:?}: {e}")))
    }
}
