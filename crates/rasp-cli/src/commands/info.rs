//! The `info` CLI subcommand -- show cache file statistics.

use anyhow::Context;
use serde::Serialize;

use rasp_cache::CacheStore;

use super::GlobalArgs;
use crate::ExitCode;

/// Show cache location, schema version and contents.
#[derive(Debug, clap::Args)]
pub struct InfoArgs {
    /// Output in JSON format.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct CacheInfo {
    path: String,
    schema_version: u32,
    snapshots: u64,
    rows: u64,
    size_bytes: Option<u64>,
}

/// Executes the `info` subcommand.
pub fn execute(args: InfoArgs, global: &GlobalArgs) -> Result<ExitCode, anyhow::Error> {
    let options = super::open_options_as_stored(global)?;
    let store = CacheStore::open_with(options).context("failed to open cache")?;

    let path = store
        .path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| ":memory:".to_string());
    let size_bytes = store
        .path()
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.len());

    let info = CacheInfo {
        path,
        schema_version: store.schema_version().number(),
        snapshots: store.snapshot_count()?,
        rows: store.row_count()?,
        size_bytes,
    };

    if args.json {
        let json = serde_json::to_string_pretty(&info).context("serializing cache info")?;
        println!("{json}");
    } else {
        println!("Cache:          {}", info.path);
        println!("Schema version: {}", info.schema_version);
        println!("Snapshots:      {}", info.snapshots);
        println!("Rows:           {}", info.rows);
        if let Some(size) = info.size_bytes {
            println!("Size:           {size} bytes");
        }
    }

    Ok(ExitCode::Success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rasp_cache::migrate::read_version;
    use rasp_cache::SchemaVersion;

    #[test]
    fn info_creates_and_describes_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cache.db");
        let global = GlobalArgs::isolated(path.clone());

        let code = execute(InfoArgs { json: true }, &global).unwrap();
        assert_eq!(code, ExitCode::Success);
        assert!(path.exists());
    }

    #[test]
    fn info_does_not_migrate_downgraded_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cache.db");
        rasp_cache::CacheStore::open(&path, SchemaVersion::V1).unwrap();
        let global = GlobalArgs::isolated(path.clone());

        assert_eq!(execute(InfoArgs { json: false }, &global).unwrap(), ExitCode::Success);
        assert_eq!(read_version(&path).unwrap(), Some(SchemaVersion::V1));
    }
}
