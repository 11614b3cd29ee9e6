//! Sextant - LDAP authentication realms
//!
//! Validates realm configuration and authenticates credentials against the
//! configured directories from the command line.

mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use sextant_core::config::LoggingConfig;
use sextant_core::SextantConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::commands::CommandContext;

#[derive(Parser)]
#[command(name = "sextant")]
#[command(author = "Sextant Team")]
#[command(version = sextant_core::VERSION)]
#[command(about = "LDAP authentication realms", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, env = "SEXTANT_CONFIG", default_value = "sextant.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, global = true, env = "SEXTANT_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    output: OutputFormat,

    /// Only print results
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Build every enabled realm and report its bind strategy
    Check,

    /// Authenticate a user against one realm. The password is taken from
    /// SEXTANT_PASSWORD, or read from stdin when that is unset.
    Authenticate {
        /// Realm name
        #[arg(long)]
        realm: String,

        /// Username
        #[arg(short, long)]
        username: String,
    },

    /// Print usage statistics of every enabled realm
    Usage,
}

fn init_logging(logging: &LoggingConfig, level: Option<&str>) {
    let level = level.unwrap_or(&logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if logging.format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .with(filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = SextantConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config))?;

    init_logging(&config.logging, cli.log_level.as_deref());
    tracing::debug!(config = %cli.config, realms = config.realms.len(), "Loaded configuration");

    let ctx = CommandContext {
        config,
        output_format: cli.output,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Check => commands::check::execute(&ctx).await,
        Commands::Authenticate { realm, username } => {
            commands::authenticate::execute(&ctx, &realm, &username).await
        }
        Commands::Usage => commands::usage::execute(&ctx).await,
    }
}
