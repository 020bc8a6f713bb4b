//! The `get` CLI subcommand -- print one cached snapshot.

use anyhow::Context;
use chrono::NaiveDate;

use rasp_cache::{CacheKey, CacheStore, TimetableEntry};

use super::GlobalArgs;
use crate::ExitCode;

/// Print the cached timetable for a route and Moscow calendar day.
#[derive(Debug, clap::Args)]
pub struct GetArgs {
    /// Departure station id.
    pub from: String,
    /// Arrival station id.
    pub to: String,
    /// Day in the Moscow timezone (YYYY-MM-DD).
    pub date: NaiveDate,
    /// Output in JSON format.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `get` subcommand. A miss exits with [`ExitCode::NotCached`].
pub fn execute(args: GetArgs, global: &GlobalArgs) -> Result<ExitCode, anyhow::Error> {
    let options = super::open_options_as_stored(global)?;
    let store = CacheStore::open_with(options).context("failed to open cache")?;
    let key = CacheKey::new(args.from, args.to, args.date);

    let Some(rows) = store
        .get(&key)
        .with_context(|| format!("failed to read snapshot {key}"))?
    else {
        eprintln!("{key}: not cached");
        return Ok(ExitCode::NotCached);
    };

    if args.json {
        let json = serde_json::to_string_pretty(&rows).context("serializing snapshot")?;
        println!("{json}");
    } else if rows.is_empty() {
        println!("{key}: cached, no trains");
    } else {
        for row in &rows {
            println!("{}", format_row(row));
        }
    }

    Ok(ExitCode::Success)
}

fn format_row(row: &TimetableEntry) -> String {
    let train = match &row.train_name {
        Some(name) => format!("{} {name}", row.train_route_id),
        None => row.train_route_id.clone(),
    };
    format!(
        "{} {} -> {} {}  [{}] {} - {}",
        row.departure_time.format("%H:%M"),
        row.departure_station_name,
        row.arrival_time.format("%H:%M"),
        row.arrival_station_name,
        train,
        row.route_start_station_name,
        row.route_end_station_name,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use rasp_cache::SchemaVersion;

    fn args(date: NaiveDate) -> GetArgs {
        GetArgs {
            from: "2004000".to_string(),
            to: "2000000".to_string(),
            date,
            json: false,
        }
    }

    #[test]
    fn miss_then_hit() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cache.db");
        let global = GlobalArgs::isolated(path.clone());
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();

        assert_eq!(execute(args(day), &global).unwrap(), ExitCode::NotCached);

        let mut store = CacheStore::open(&path, SchemaVersion::V2).unwrap();
        store
            .put(&CacheKey::new("2004000", "2000000", day), &[])
            .unwrap();
        drop(store);

        assert_eq!(execute(args(day), &global).unwrap(), ExitCode::Success);
    }

    #[test]
    fn row_formatting_includes_train_name() {
        let row = TimetableEntry {
            departure_station_id: "2004000".to_string(),
            departure_station_name: "Saint Petersburg".to_string(),
            departure_time: DateTime::parse_from_rfc3339("2024-05-01T05:45:00+03:00").unwrap(),
            arrival_station_id: "2000000".to_string(),
            arrival_station_name: "Moscow".to_string(),
            arrival_time: DateTime::parse_from_rfc3339("2024-05-01T09:45:00+03:00").unwrap(),
            train_route_id: "752A".to_string(),
            train_name: Some("Sapsan".to_string()),
            route_start_station_name: "Saint Petersburg".to_string(),
            route_end_station_name: "Moscow".to_string(),
        };

        let line = format_row(&row);
        assert!(line.starts_with("05:45 Saint Petersburg -> 09:45 Moscow"));
        assert!(line.contains("[752A Sapsan]"));
    }
}
