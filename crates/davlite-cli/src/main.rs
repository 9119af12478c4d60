#![deny(unsafe_code)]

// Use mimalloc for reduced allocation latency (enabled by default).
// Disable with `--no-default-features` if debugging allocator issues.
#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod commands;
mod config;
mod exit_code;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
#[cfg(feature = "tokio-console")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use davlite::CredentialError;

use crate::commands::users::UserError;
use crate::config::ConfigError;

/// Serve a local directory over WebDAV
#[derive(Parser)]
#[command(name = "davlite")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # Start the server with ./davlite.toml (created on first run)
    davlite

    # Add an account (prompts for the password)
    davlite add-user alice

    # Serve without authentication on all interfaces
    davlite config auth false
    davlite config listen 0.0.0.0:8080
    davlite serve
")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file
    #[arg(long, env = "DAVLITE_CONFIG", default_value = "davlite.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the WebDAV server (default)
    Serve,

    /// Add a user or change their password
    AddUser(commands::users::AddArgs),

    /// Remove a user
    RemoveUser(commands::users::RemoveArgs),

    /// List configured users
    ListUsers,

    /// Show the configuration, or change one setting
    Config(commands::config::Args),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let quiet = cli.quiet;

    match run(cli) {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(e) => {
            if !quiet {
                eprintln!("Error: {e:#}");
            }
            ExitCode::from(categorize_error(&e))
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    if !cli.quiet {
        setup_tracing(cli.verbose);
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => commands::serve::execute(&cli.config, cli.quiet),
        Commands::AddUser(args) => commands::users::add(&cli.config, &args),
        Commands::RemoveUser(args) => commands::users::remove(&cli.config, &args),
        Commands::ListUsers => commands::users::list(&cli.config),
        Commands::Config(args) => commands::config::execute(&cli.config, &args),
    }
}

fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    #[cfg(feature = "tokio-console")]
    {
        use std::net::SocketAddr;
        use tracing_subscriber::Layer;

        let console_port: u16 = std::env::var("TOKIO_CONSOLE_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(6669);
        let console_addr: SocketAddr = ([127, 0, 0, 1], console_port).into();
        let port_available = std::net::TcpListener::bind(console_addr).is_ok();

        let fmt_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(io::stderr)
            .with_filter(fmt_filter);

        if port_available {
            let console_layer = console_subscriber::ConsoleLayer::builder()
                .server_addr(console_addr)
                .spawn();
            tracing_subscriber::registry().with(console_layer).with(fmt_layer).init();
            tracing::info!("tokio-console enabled, connect with: tokio-console http://127.0.0.1:{console_port}");
        } else {
            tracing_subscriber::registry().with(fmt_layer).init();
            tracing::warn!("tokio-console port {console_port} already in use, running without console instrumentation");
        }
    }

    #[cfg(not(feature = "tokio-console"))]
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}

/// Map an error chain to an exit code by downcasting to known error types.
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(config_err) = cause.downcast_ref::<ConfigError>() {
            return match config_err {
                ConfigError::Parse { .. } => exit_code::CONFIG_ERROR,
                ConfigError::UnknownSetting(_) | ConfigError::InvalidValue { .. } => {
                    exit_code::USAGE_ERROR
                }
            };
        }

        if let Some(cred_err) = cause.downcast_ref::<CredentialError>() {
            match cred_err {
                CredentialError::Parse { .. } => return exit_code::CONFIG_ERROR,
                CredentialError::InvalidUsername(_) => return exit_code::USAGE_ERROR,
                // The io::Error source is inspected further down the chain
                CredentialError::Io { .. } => {}
            }
        }

        if let Some(UserError::NotFound(_)) = cause.downcast_ref::<UserError>() {
            return exit_code::NOT_FOUND;
        }

        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::NotFound => return exit_code::NOT_FOUND,
                io::ErrorKind::PermissionDenied => return exit_code::PERMISSION_DENIED,
                _ => {}
            }
        }
    }

    exit_code::GENERAL_ERROR
}
