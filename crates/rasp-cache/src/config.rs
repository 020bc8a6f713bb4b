//! Configuration loading for the timetable cache.
//!
//! Settings resolve with project > home > defaults precedence, read from
//! `.rasp-cache.yaml` files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::store::OpenOptions;
use crate::{CacheError, CacheResult, SchemaVersion};

/// File name looked up in the home and project directories.
pub const CONFIG_FILE_NAME: &str = ".rasp-cache.yaml";

/// Default bound on waiting for a locked cache file.
pub const DEFAULT_OPEN_TIMEOUT_MS: u64 = 5_000;

// ---------------------------------------------------------------------------
// CacheConfig
// ---------------------------------------------------------------------------

/// Cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Path to the cache file. `None` lets the caller pick its default.
    pub path: Option<String>,
    /// Schema version to open the store at.
    pub schema_version: u32,
    /// How long to wait on a locked cache file before giving up.
    pub open_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            schema_version: SchemaVersion::LATEST.number(),
            open_timeout_ms: DEFAULT_OPEN_TIMEOUT_MS,
        }
    }
}

impl CacheConfig {
    /// Resolves the configured schema version.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::UnsupportedVersion`] for an unknown number.
    pub fn schema_version(&self) -> CacheResult<SchemaVersion> {
        SchemaVersion::from_number(self.schema_version)
    }

    /// Builds open options, using `fallback_path` when no path is configured.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::UnsupportedVersion`] for an unknown schema version.
    pub fn open_options(&self, fallback_path: &Path) -> CacheResult<OpenOptions> {
        let path = self
            .path
            .as_deref()
            .map_or_else(|| fallback_path.to_path_buf(), PathBuf::from);
        Ok(OpenOptions::new(path, self.schema_version()?)
            .open_timeout(Duration::from_millis(self.open_timeout_ms)))
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Load and merge configuration.
///
/// Resolution order (highest priority first):
/// 1. `.rasp-cache.yaml` in `project_dir`
/// 2. `.rasp-cache.yaml` in the user home directory
/// 3. Built-in defaults
///
/// # Errors
///
/// Returns [`CacheError::Config`] if a config file exists but is malformed.
pub fn load_config(project_dir: Option<&Path>) -> CacheResult<CacheConfig> {
    load_config_from(dirs_next::home_dir().as_deref(), project_dir)
}

/// Like [`load_config`], with the home directory given explicitly.
/// `None` skips the home layer.
pub fn load_config_from(
    home_dir: Option<&Path>,
    project_dir: Option<&Path>,
) -> CacheResult<CacheConfig> {
    let mut config = CacheConfig::default();

    if let Some(home) = home_dir {
        let home_config = home.join(CONFIG_FILE_NAME);
        if home_config.is_file() {
            debug!(path = %home_config.display(), "loading home config");
            config = merge_config(config, load_config_file(&home_config)?);
        }
    }

    if let Some(dir) = project_dir {
        let project_config = dir.join(CONFIG_FILE_NAME);
        if project_config.is_file() {
            debug!(path = %project_config.display(), "loading project config");
            config = merge_config(config, load_config_file(&project_config)?);
        }
    }

    info!("configuration loaded");
    Ok(config)
}

/// Load a single config file.
pub fn load_config_file(path: &Path) -> CacheResult<CacheConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        CacheError::Config(format!(
            "failed to read config file '{}': {e}",
            path.display()
        ))
    })?;

    serde_yml::from_str(&content).map_err(|e| {
        CacheError::Config(format!(
            "failed to parse config file '{}': {e}",
            path.display()
        ))
    })
}

/// Overlay values win, except that an unset path keeps the base path.
fn merge_config(base: CacheConfig, overlay: CacheConfig) -> CacheConfig {
    CacheConfig {
        path: overlay.path.or(base.path),
        schema_version: overlay.schema_version,
        open_timeout_ms: overlay.open_timeout_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.path, None);
        assert_eq!(config.schema_version().unwrap(), SchemaVersion::V2);
        assert_eq!(config.open_timeout_ms, 5_000);
    }

    #[test]
    fn load_config_from_yaml() {
        let tmp = tempfile::tempdir().unwrap();
        let yaml = r#"
path: /var/cache/rasp.db
schema_version: 1
open_timeout_ms: 250
"#;
        fs::write(tmp.path().join(CONFIG_FILE_NAME), yaml).unwrap();

        let config = load_config_from(None, Some(tmp.path())).unwrap();
        assert_eq!(config.path.as_deref(), Some("/var/cache/rasp.db"));
        assert_eq!(config.schema_version().unwrap(), SchemaVersion::V1);
        assert_eq!(config.open_timeout_ms, 250);
    }

    #[test]
    fn project_config_overrides_home_config() {
        let home = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        fs::write(
            home.path().join(CONFIG_FILE_NAME),
            "path: /srv/rasp/cache.db\nschema_version: 1\n",
        )
        .unwrap();
        fs::write(project.path().join(CONFIG_FILE_NAME), "open_timeout_ms: 75\n").unwrap();

        let home_only = load_config_from(Some(home.path()), None).unwrap();
        assert_eq!(home_only.schema_version().unwrap(), SchemaVersion::V1);

        let layered = load_config_from(Some(home.path()), Some(project.path())).unwrap();
        assert_eq!(layered.path.as_deref(), Some("/srv/rasp/cache.db"));
        assert_eq!(layered.open_timeout_ms, 75);
        // Fields the project file omits take their defaults, not the home values.
        assert_eq!(layered.schema_version().unwrap(), SchemaVersion::V2);
    }

    #[test]
    fn partial_yaml_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(CONFIG_FILE_NAME), "open_timeout_ms: 10\n").unwrap();

        let config = load_config_file(&tmp.path().join(CONFIG_FILE_NAME)).unwrap();
        assert_eq!(config.open_timeout_ms, 10);
        assert_eq!(config.schema_version, 2);
        assert_eq!(config.path, None);
    }

    #[test]
    fn malformed_yaml_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(CONFIG_FILE_NAME), "schema_version: [broken").unwrap();

        let err = load_config_from(None, Some(tmp.path())).unwrap_err();
        assert!(matches!(err, CacheError::Config(ref msg) if msg.contains("failed to parse")));
    }

    #[test]
    fn unknown_version_fails_at_resolution() {
        let config = CacheConfig {
            schema_version: 3,
            ..CacheConfig::default()
        };
        assert!(matches!(
            config.open_options(Path::new("cache.db")),
            Err(CacheError::UnsupportedVersion(3))
        ));
    }

    #[test]
    fn merge_keeps_base_path_when_overlay_unset() {
        let base = CacheConfig {
            path: Some("/home/user/.rasp/cache.db".to_string()),
            ..CacheConfig::default()
        };
        let overlay = CacheConfig {
            open_timeout_ms: 1,
            ..CacheConfig::default()
        };

        let merged = merge_config(base, overlay);
        assert_eq!(merged.path.as_deref(), Some("/home/user/.rasp/cache.db"));
        assert_eq!(merged.open_timeout_ms, 1);
    }

    #[test]
    fn open_options_fall_back_to_default_path() {
        let options = CacheConfig::default()
            .open_options(Path::new("/tmp/fallback.db"))
            .unwrap();
        assert_eq!(options.path(), Some(Path::new("/tmp/fallback.db")));
        assert_eq!(options.version(), SchemaVersion::V2);
    }
}
