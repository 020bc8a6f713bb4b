//! The `config` CLI subcommand -- show and validate cache configuration.

use anyhow::Context;

use super::GlobalArgs;
use crate::ExitCode;

/// Manage cache configuration.
#[derive(Debug, clap::Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config sub-subcommands.
#[derive(Debug, clap::Subcommand)]
pub enum ConfigAction {
    /// Show current configuration.
    Show,
    /// Validate configuration files and the configured schema version.
    Validate,
}

/// Executes the `config` subcommand.
pub fn execute(args: ConfigArgs, global: &GlobalArgs) -> Result<ExitCode, anyhow::Error> {
    match args.action {
        ConfigAction::Show => execute_show(global),
        ConfigAction::Validate => execute_validate(global),
    }
}

fn execute_show(global: &GlobalArgs) -> Result<ExitCode, anyhow::Error> {
    let cfg = super::load(global)?;
    let yaml = serde_yml::to_string(&cfg).context("failed to serialize configuration to YAML")?;
    print!("{yaml}");
    Ok(ExitCode::Success)
}

fn execute_validate(global: &GlobalArgs) -> Result<ExitCode, anyhow::Error> {
    let checked = super::load(global)
        .and_then(|cfg| cfg.schema_version().map_err(anyhow::Error::from));
    match checked {
        Ok(version) => {
            println!("Configuration is valid (schema {version}).");
            Ok(ExitCode::Success)
        }
        Err(e) => {
            eprintln!("Configuration error: {e:#}");
            Ok(ExitCode::ConfigError)
        }
    }
}
