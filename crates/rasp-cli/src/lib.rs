//! Rasp CLI -- maintenance commands for the timetable cache.
//!
//! This crate provides exit code definitions, logging setup, and the
//! subcommands used to inspect, migrate, check and clear a cache file.

use std::fmt;

use rasp_cache::CacheError;

pub mod commands;

// ---------------------------------------------------------------------------
// Exit Codes
// ---------------------------------------------------------------------------

/// Process exit codes.
///
/// | Code | Meaning                                     |
/// |------|---------------------------------------------|
/// | 0    | Command completed                           |
/// | 1    | Requested key is not cached                 |
/// | 2    | Cache file failed its integrity check       |
/// | 3    | Storage error (open, read, write, migrate)  |
/// | 4    | Configuration error                         |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExitCode {
    /// Command completed.
    Success = 0,
    /// Requested key is not cached.
    NotCached = 1,
    /// Cache file failed its integrity check.
    Damaged = 2,
    /// Storage error.
    StorageError = 3,
    /// Configuration error (invalid YAML, unsupported schema version).
    ConfigError = 4,
}

impl ExitCode {
    /// Returns the numeric exit code as a `u8`.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns a human-readable description of this exit code.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Success => "command completed",
            Self::NotCached => "key not cached",
            Self::Damaged => "cache file damaged",
            Self::StorageError => "storage error",
            Self::ConfigError => "configuration error",
        }
    }

    /// Picks the exit code for a failed command.
    #[must_use]
    pub fn for_error(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<CacheError>() {
            Some(CacheError::UnsupportedVersion(_) | CacheError::Config(_)) => Self::ConfigError,
            _ => Self::StorageError,
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exit code {} ({})", self.as_u8(), self.description())
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.as_u8())
    }
}

/// Logs the exit reason and converts `code` for returning from `main`.
pub fn terminate(code: ExitCode) -> std::process::ExitCode {
    match code {
        ExitCode::Success | ExitCode::NotCached => {
            tracing::debug!(%code, "rasp exiting");
        }
        _ => {
            tracing::error!(%code, "rasp exiting with error");
        }
    }
    code.into()
}

// ---------------------------------------------------------------------------
// Tracing / Logging
// ---------------------------------------------------------------------------

/// Initialize structured tracing on stderr.
///
/// `verbose` selects TRACE, `quiet` selects ERROR, otherwise WARN. `RUST_LOG`
/// takes precedence when set. `json_output` switches to JSON log lines.
///
/// # Errors
///
/// Fails if a global subscriber was already installed.
pub fn init_tracing(verbose: bool, quiet: bool, json_output: bool) -> anyhow::Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_level = if verbose {
        "trace"
    } else if quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let result = if json_output {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .try_init()
    } else {
        fmt()
            .compact()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .try_init()
    };
    result.map_err(|e| anyhow::anyhow!("tracing initialization error: {e}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
