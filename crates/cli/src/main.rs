//! refdesk CLI — the main entry point.
//!
//! Commands:
//! - `ask`     — Answer one question and exit
//! - `chat`    — Interactive mode, history kept across turns
//! - `tools`   — List the tools the tool server exposes
//! - `config`  — Show, locate, initialise or validate the configuration

use clap::{Parser, Subcommand};
use std::process::ExitCode;

mod commands;

#[derive(Parser)]
#[command(
    name = "refdesk",
    about = "refdesk — ask questions about bonds, issuers and ratings",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print the event stream as JSON lines
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single question
    Ask {
        /// The question, e.g. "Who is the issuer for ISIN US912810TS08?"
        message: String,
    },

    /// Chat interactively
    Chat,

    /// List tools discovered from the tool server
    Tools,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (API key redacted)
    Show,
    /// Print the config file path
    Path,
    /// Write a starter config file
    Init,
    /// Validate the config file
    Validate,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries answers and JSON events.
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mode = commands::render::OutputMode::from_json_flag(cli.json);

    let ok = match cli.command {
        Commands::Ask { message } => commands::ask::run(&message, mode).await?,
        Commands::Chat => commands::chat::run(mode).await?,
        Commands::Tools => commands::tools::run(mode).await?,
        Commands::Config { action } => {
            match action {
                ConfigAction::Show => commands::config_cmd::show().await?,
                ConfigAction::Path => commands::config_cmd::path().await?,
                ConfigAction::Init => commands::config_cmd::init().await?,
                ConfigAction::Validate => commands::config_cmd::validate().await?,
            }
            true
        }
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
