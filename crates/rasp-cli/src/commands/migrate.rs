//! The `migrate` CLI subcommand -- move the cache to another schema version.

use anyhow::Context;

use rasp_cache::migrate::Migration;
use rasp_cache::{CacheStore, SchemaVersion};

use super::GlobalArgs;
use crate::ExitCode;

/// Open the cache at the given schema version, upgrading or downgrading it.
#[derive(Debug, clap::Args)]
pub struct MigrateArgs {
    /// Target schema version (1 or 2). Downgrading discards train names.
    /// Other commands open the cache at whatever version it is stored at.
    pub version: u32,
}

/// Executes the `migrate` subcommand.
pub fn execute(args: MigrateArgs, global: &GlobalArgs) -> Result<ExitCode, anyhow::Error> {
    let version = SchemaVersion::from_number(args.version)?;
    let options = super::open_options(global, Some(version))?;
    let store = CacheStore::open_with(options).context("failed to migrate cache")?;

    println!("{}", describe(store.migration()));
    store.close().context("failed to close cache")?;
    Ok(ExitCode::Success)
}

fn describe(migration: Migration) -> String {
    match migration {
        Migration::Created(v) => format!("created empty cache at schema {v}"),
        Migration::Unchanged(v) => format!("cache already at schema {v}"),
        Migration::Upgraded { from, to } => format!("upgraded cache from schema {from} to {to}"),
        Migration::Downgraded { from, to } => {
            format!("downgraded cache from schema v{from} to {to}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rasp_cache::CacheError;

    #[test]
    fn migrate_down_and_up() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cache.db");
        let global = GlobalArgs::isolated(path.clone());

        assert_eq!(
            execute(MigrateArgs { version: 2 }, &global).unwrap(),
            ExitCode::Success
        );
        assert_eq!(
            execute(MigrateArgs { version: 1 }, &global).unwrap(),
            ExitCode::Success
        );

        let store = CacheStore::open(&path, SchemaVersion::V1).unwrap();
        assert_eq!(store.migration(), Migration::Unchanged(SchemaVersion::V1));
    }

    #[test]
    fn unknown_version_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let global = GlobalArgs::isolated(tmp.path().join("cache.db"));

        let err = execute(MigrateArgs { version: 7 }, &global).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CacheError>(),
            Some(CacheError::UnsupportedVersion(7))
        ));
        assert_eq!(ExitCode::for_error(&err), ExitCode::ConfigError);
    }

    #[test]
    fn describe_mentions_versions() {
        let text = describe(Migration::Downgraded {
            from: 2,
            to: SchemaVersion::V1,
        });
        assert_eq!(text, "downgraded cache from schema v2 to v1");
    }
}
