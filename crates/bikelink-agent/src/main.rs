use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use bikelink_agent::config::AgentConfig;
use bikelink_agent::{demo, identity};

#[derive(Parser)]
#[command(name = "bikelink-agent")]
#[command(about = "Bikelink agent - bike-side pairing and secure command link")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level or filter directive; overrides the config file and RUST_LOG
    #[arg(short, long)]
    log_level: Option<String>,

    /// Storage directory; overrides the config file
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the device identity and store the server public key
    Provision {
        /// Server public key, 64 hex characters
        #[arg(long)]
        server_key: String,
        /// Erase any existing identity and pairings first
        #[arg(long)]
        force: bool,
    },
    /// Print the identity and pairing table public keys
    Show,
    /// Remove every pairing, keeping the identity
    ResetPairings,
    /// Erase identity, server key and pairings
    FactoryReset,
    /// Pair a simulated phone and exchange commands over a loop-back link
    Demo {
        /// Command to send; repeat for several
        #[arg(long = "command")]
        commands: Vec<String>,
    },
}

fn init_tracing(
    cli_level: Option<&str>,
    config: &AgentConfig,
) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = match cli_level.or(config.log_level.as_deref()) {
        Some(level) => EnvFilter::try_new(level).context("invalid log level")?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    match &config.log_file {
        Some(path) => {
            let dir = path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
            let name = path.file_name().context("log_file has no file name")?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AgentConfig::load_from_file(path)?,
        None => AgentConfig::load_from_env()?,
    };
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }

    let _guard = init_tracing(args.log_level.as_deref(), &config)?;
    info!(storage = %config.storage_dir.display(), "starting bikelink-agent");

    match args.command {
        Command::Provision { server_key, force } => {
            let server_key = identity::parse_server_key(&server_key)?;
            let store = identity::provision(&config, server_key, force)?;
            print!("{}", identity::StoreSummary::of(&store));
        }
        Command::Show => {
            let store = identity::open_store(&config)?;
            print!("{}", identity::StoreSummary::of(&store));
        }
        Command::ResetPairings => {
            let removed = identity::reset_pairings(&config)?;
            println!("removed {removed} pairing(s)");
        }
        Command::FactoryReset => {
            identity::factory_reset(&config)?;
            println!("factory reset complete");
        }
        Command::Demo { commands } => {
            let commands = if commands.is_empty() {
                demo::DEFAULT_COMMANDS.iter().map(|c| c.to_string()).collect()
            } else {
                commands
            };
            tokio::select! {
                report = demo::run(&config, &commands) => {
                    let report = report?;
                    println!(
                        "demo ok: {} command(s) acknowledged, {} pairing(s)",
                        report.commands_acknowledged, report.pairings
                    );
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received");
                }
            }
        }
    }

    Ok(())
}
