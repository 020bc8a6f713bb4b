//! The `check` CLI subcommand -- verify the cache file without opening it.

use rasp_cache::recovery::{delete_store, integrity_check};

use super::GlobalArgs;
use crate::ExitCode;

/// Run an integrity check on the cache file.
#[derive(Debug, clap::Args)]
pub struct CheckArgs {
    /// Delete the cache file if it is damaged.
    #[arg(long)]
    pub repair: bool,
}

/// Executes the `check` subcommand.
///
/// The file is inspected read-only, so a damaged cache is reported rather
/// than silently rebuilt.
pub fn execute(args: CheckArgs, global: &GlobalArgs) -> Result<ExitCode, anyhow::Error> {
    let options = super::open_options(global, None)?;
    let Some(path) = options.path() else {
        return Ok(ExitCode::Success);
    };

    if !path.exists() {
        println!("{}: no cache file", path.display());
        return Ok(ExitCode::Success);
    }

    let intact = match integrity_check(path) {
        Ok(intact) => intact,
        Err(e) => {
            tracing::debug!(error = %e, "integrity check failed to run");
            false
        }
    };

    if intact {
        println!("{}: ok", path.display());
        return Ok(ExitCode::Success);
    }

    if args.repair {
        delete_store(path)?;
        println!("{}: damaged, deleted", path.display());
        return Ok(ExitCode::Success);
    }

    println!("{}: damaged", path.display());
    Ok(ExitCode::Damaged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rasp_cache::{CacheStore, SchemaVersion};

    #[test]
    fn healthy_cache_passes() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cache.db");
        CacheStore::open(&path, SchemaVersion::V2).unwrap();
        let global = GlobalArgs::isolated(path);

        let code = execute(CheckArgs { repair: false }, &global).unwrap();
        assert_eq!(code, ExitCode::Success);
    }

    #[test]
    fn damaged_cache_is_reported_then_repaired() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cache.db");
        std::fs::write(&path, vec![0x11; 4096]).unwrap();
        let global = GlobalArgs::isolated(path.clone());

        let code = execute(CheckArgs { repair: false }, &global).unwrap();
        assert_eq!(code, ExitCode::Damaged);
        assert!(path.exists());

        let code = execute(CheckArgs { repair: true }, &global).unwrap();
        assert_eq!(code, ExitCode::Success);
        assert!(!path.exists());
    }

    #[test]
    fn missing_cache_is_fine() {
        let tmp = tempfile::tempdir().unwrap();
        let global = GlobalArgs::isolated(tmp.path().join("absent.db"));

        let code = execute(CheckArgs { repair: false }, &global).unwrap();
        assert_eq!(code, ExitCode::Success);
    }
}
