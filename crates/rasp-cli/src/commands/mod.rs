//! CLI subcommands.

pub mod check;
pub mod clear;
pub mod config;
pub mod get;
pub mod info;
pub mod migrate;

use std::path::PathBuf;

use anyhow::Context;
use tracing::debug;

use rasp_cache::config::{load_config, CacheConfig};
use rasp_cache::migrate::read_version;
use rasp_cache::{OpenOptions, SchemaVersion};

/// Options shared by every subcommand.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct GlobalArgs {
    /// Path to the cache file (overrides configuration).
    #[arg(long, global = true, value_name = "PATH")]
    pub cache: Option<PathBuf>,

    /// Ignore `.rasp-cache.yaml` files and use built-in defaults.
    #[arg(long, global = true)]
    pub no_config: bool,
}

#[cfg(test)]
impl GlobalArgs {
    /// Arguments for a cache at `path` that ignore any config on the machine.
    pub(crate) fn isolated(path: impl Into<PathBuf>) -> Self {
        Self {
            cache: Some(path.into()),
            no_config: true,
        }
    }
}

/// Default cache location: `~/.rasp/cache.db`.
pub fn default_cache_path() -> PathBuf {
    dirs_next::home_dir()
        .map(|h| h.join(".rasp").join("cache.db"))
        .unwrap_or_else(|| PathBuf::from("cache.db"))
}

/// Loads configuration from the home and working directories.
pub fn load(global: &GlobalArgs) -> anyhow::Result<CacheConfig> {
    let mut config = if global.no_config {
        CacheConfig::default()
    } else {
        let cwd = std::env::current_dir().context("cannot determine working directory")?;
        load_config(Some(&cwd)).context("failed to load configuration")?
    };
    if let Some(path) = &global.cache {
        config.path = Some(path.to_string_lossy().into_owned());
    }
    Ok(config)
}

/// Resolves open options, optionally overriding the configured version.
pub fn open_options(
    global: &GlobalArgs,
    version: Option<SchemaVersion>,
) -> anyhow::Result<OpenOptions> {
    let mut config = load(global)?;
    if let Some(version) = version {
        config.schema_version = version.number();
    }
    Ok(config.open_options(&default_cache_path())?)
}

/// Resolves open options at the version already on disk, so inspecting or
/// clearing a cache never migrates it. A missing or unreadable file falls
/// back to the configured version.
pub fn open_options_as_stored(global: &GlobalArgs) -> anyhow::Result<OpenOptions> {
    let options = open_options(global, None)?;
    let Some(path) = options.path() else {
        return Ok(options);
    };

    match read_version(path) {
        Ok(Some(version)) => Ok(options.with_version(version)),
        Ok(None) => Ok(options),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "cannot read stored schema version");
            Ok(options)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rasp_cache::CacheStore;

    #[test]
    fn isolated_args_use_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cache.db");

        let config = load(&GlobalArgs::isolated(&path)).unwrap();
        assert_eq!(config.schema_version, SchemaVersion::LATEST.number());
        assert_eq!(config.path, Some(path.to_string_lossy().into_owned()));
    }

    #[test]
    fn stored_version_wins_over_configured() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cache.db");
        let global = GlobalArgs::isolated(&path);

        assert_eq!(
            open_options_as_stored(&global).unwrap().version(),
            SchemaVersion::V2
        );

        CacheStore::open(&path, SchemaVersion::V1).unwrap();
        assert_eq!(
            open_options_as_stored(&global).unwrap().version(),
            SchemaVersion::V1
        );
    }
}
