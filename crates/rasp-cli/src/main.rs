use clap::{Parser, Subcommand};

use rasp_cli::commands::{self, GlobalArgs};

/// Rasp -- timetable cache maintenance tool.
#[derive(Parser)]
#[command(name = "rasp", about = "Rasp -- timetable cache maintenance tool")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    /// Log everything (TRACE level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log errors only.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Emit JSON log lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show cache location, schema version and contents.
    Info(commands::info::InfoArgs),
    /// Print the cached timetable for a route and day.
    Get(commands::get::GetArgs),
    /// Upgrade or downgrade the cache schema.
    Migrate(commands::migrate::MigrateArgs),
    /// Check the cache file for damage.
    Check(commands::check::CheckArgs),
    /// Drop every cached snapshot.
    Clear,
    /// Show or validate configuration.
    Config(commands::config::ConfigArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    if let Err(err) = rasp_cli::init_tracing(cli.verbose, cli.quiet, cli.json_logs) {
        eprintln!("rasp: warning: {err}");
    }

    let global = &cli.global;
    let result = match cli.command {
        Commands::Info(args) => commands::info::execute(args, global),
        Commands::Get(args) => commands::get::execute(args, global),
        Commands::Migrate(args) => commands::migrate::execute(args, global),
        Commands::Check(args) => commands::check::execute(args, global),
        Commands::Clear => commands::clear::execute(global),
        Commands::Config(args) => commands::config::execute(args, global),
    };

    match result {
        Ok(code) => rasp_cli::terminate(code),
        Err(err) => {
            eprintln!("rasp: error: {err:#}");
            rasp_cli::terminate(rasp_cli::ExitCode::for_error(&err))
        }
    }
}
