//! The `clear` CLI subcommand -- drop every cached snapshot.

use anyhow::Context;

use rasp_cache::CacheStore;

use super::GlobalArgs;
use crate::ExitCode;

/// Executes the `clear` subcommand.
pub fn execute(global: &GlobalArgs) -> Result<ExitCode, anyhow::Error> {
    let options = super::open_options_as_stored(global)?;
    let mut store = CacheStore::open_with(options).context("failed to open cache")?;

    let snapshots = store.snapshot_count()?;
    store.clear().context("failed to clear cache")?;
    println!("Removed {snapshots} cached snapshot(s).");

    Ok(ExitCode::Success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rasp_cache::{CacheKey, SchemaVersion};

    #[test]
    fn clear_empties_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cache.db");
        {
            let mut store = CacheStore::open(&path, SchemaVersion::V2).unwrap();
            let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
            store.put(&CacheKey::new("a", "b", day), &[]).unwrap();
        }

        let global = GlobalArgs::isolated(path.clone());
        assert_eq!(execute(&global).unwrap(), ExitCode::Success);

        let store = CacheStore::open(&path, SchemaVersion::V2).unwrap();
        assert_eq!(store.snapshot_count().unwrap(), 0);
    }
}
