//! Timetable rows and the composite key their snapshots are stored under.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};

/// Offset of the Moscow reference timezone. Fixed at UTC+03:00 since 2014.
const MSK_OFFSET_HOURS: i64 = 3;

// ---------------------------------------------------------------------------
// TimetableEntry
// ---------------------------------------------------------------------------

/// One scheduled train segment between two stations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimetableEntry {
    pub departure_station_id: String,
    pub departure_station_name: String,
    pub departure_time: DateTime<FixedOffset>,
    pub arrival_station_id: String,
    pub arrival_station_name: String,
    pub arrival_time: DateTime<FixedOffset>,
    pub train_route_id: String,
    /// Only persisted from schema version 2 onward.
    pub train_name: Option<String>,
    pub route_start_station_name: String,
    pub route_end_station_name: String,
}

// ---------------------------------------------------------------------------
// CacheKey
// ---------------------------------------------------------------------------

/// Identifies one cached snapshot: a route plus a Moscow calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub from_station_id: String,
    pub to_station_id: String,
    pub date_msk: NaiveDate,
}

impl CacheKey {
    /// Creates a key for an already-resolved Moscow calendar day.
    pub fn new(
        from_station_id: impl Into<String>,
        to_station_id: impl Into<String>,
        date_msk: NaiveDate,
    ) -> Self {
        Self {
            from_station_id: from_station_id.into(),
            to_station_id: to_station_id.into(),
            date_msk,
        }
    }

    /// Creates a key for the Moscow calendar day containing `instant`.
    pub fn for_instant<Tz: TimeZone>(
        from_station_id: impl Into<String>,
        to_station_id: impl Into<String>,
        instant: &DateTime<Tz>,
    ) -> Self {
        Self::new(from_station_id, to_station_id, msk_day(instant))
    }

    /// The day column value as stored on disk.
    pub(crate) fn date_column(&self) -> String {
        self.date_msk.format("%Y-%m-%d").to_string()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}->{}@{}",
            self.from_station_id, self.to_station_id, self.date_msk
        )
    }
}

/// Truncates an instant to its calendar day in the Moscow reference timezone.
pub fn msk_day<Tz: TimeZone>(instant: &DateTime<Tz>) -> NaiveDate {
    (instant.naive_utc() + chrono::Duration::hours(MSK_OFFSET_HOURS)).date()
}
