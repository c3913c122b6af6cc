mod cli;
mod commands;
mod util;

use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands};
use owo_colors::{OwoColorize, Stream::Stderr};
use srcprotect::config::Config;
use srcprotect::SrcprotectError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Send diagnostics to `<home>/log_file.log`; stdout stays for user output.
fn init_logging(config: &Config, level: &str) -> anyhow::Result<()> {
    let paths = config.paths();
    std::fs::create_dir_all(paths.root())
        .with_context(|| format!("Failed to create {}", paths.root().display()))?;
    let log_path = paths.log_file();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .with(filter)
        .init();
    Ok(())
}

fn run(cli: Cli, config: &Config) -> anyhow::Result<()> {
    match cli.command {
        Commands::Ca(command) => commands::ca::run_ca(config, command),
        Commands::Register(args) => commands::register::run_register(config, args),
        Commands::Whoami(args) => commands::whoami::run_whoami(config, args),
        Commands::Seal(args) => commands::seal::run_seal(config, args),
        Commands::Open(args) => commands::open::run_open(config, args),
        Commands::Revoke(args) => commands::revoke::run_revoke(config, args),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::resolve(cli.home.as_deref())?;
    init_logging(&config, &cli.log_level)?;
    tracing::debug!(home = %config.home.display(), "starting");

    if let Err(e) = run(cli, &config) {
        tracing::error!("{:#}", e);
        let category = e
            .chain()
            .find_map(|cause| cause.downcast_ref::<SrcprotectError>())
            .map(SrcprotectError::category)
            .unwrap_or("error");
        eprintln!(
            "{} {}: {:#}",
            "error:".if_supports_color(Stderr, |t| t.red()),
            category,
            e
        );
        eprintln!("See {} for details.", config.paths().log_file().display());
        std::process::exit(1);
    }
    Ok(())
}
