/*!
 * Relay CLI - configuration tooling for the orchestration engine
 */

use anyhow::Context;
use clap::{Parser, Subcommand};
use relay::{
    cli_style::{self, chain_table, section_header, settings_table, Theme},
    config::{LogLevel, LoggingConfig, RelayConfig},
    error::{RelayError, EXIT_FATAL, EXIT_SUCCESS},
    logging,
    registry::ProviderRegistry,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "relay")]
#[command(version, about = "Provider orchestration and resilience engine", long_about = None)]
struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long = "log-level", global = true, default_value = "warn")]
    log_level: LogLevel,

    /// Shorthand for --log-level debug
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file and print the fallback chains
    Validate {
        /// Path to the TOML configuration
        config: PathBuf,
    },

    /// Print the effective configuration, defaults filled in
    Show {
        /// Path to the TOML configuration
        config: PathBuf,
    },
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            cli_style::print_error(&format!("{:#}", e));
            e.downcast_ref::<RelayError>()
                .map_or(EXIT_FATAL, RelayError::exit_code)
        }
    };
    std::process::exit(code);
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init_logging(&LoggingConfig {
        level: cli.log_level,
        file: None,
        verbose: cli.verbose,
    })?;

    match cli.command {
        Commands::Validate { config } => validate(&config),
        Commands::Show { config } => show(&config),
    }
}

fn load(path: &Path) -> anyhow::Result<RelayConfig> {
    RelayConfig::from_file(path).with_context(|| format!("Invalid configuration {}", path.display()))
}

fn validate(path: &Path) -> anyhow::Result<()> {
    let config = load(path)?;
    let snapshot = ProviderRegistry::new().prepare(config.providers.clone())?;

    section_header("Settings");
    println!("{}", settings_table(&config));

    section_header("Fallback chains");
    if snapshot.operations().is_empty() {
        cli_style::print_warning("No enabled providers configured");
    } else {
        println!("{}", chain_table(&snapshot));
    }

    println!();
    cli_style::print_success(&format!(
        "{} is valid ({} provider(s), {} operation type(s))",
        path.display(),
        config.providers.len(),
        snapshot.operations().len()
    ));
    Ok(())
}

fn show(path: &Path) -> anyhow::Result<()> {
    let config = load(path)?;
    println!("{}", Theme::muted(format!("# effective configuration of {}", path.display())));
    print!("{}", config.to_toml_string()?);
    Ok(())
}
