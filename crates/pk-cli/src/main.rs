//! portkeep CLI
//!
//! Background port-forward tunnels:
//! - `connect` resolves a service through the cluster profile and starts
//!   a detached worker for it
//! - `list` and `disconnect` manage the recorded workers
//! - the hidden `daemon portforward` subcommand is what each worker runs

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pk_core::config::{self, Settings};
use pk_core::lock::create_private_dir;
use portkeep::commands::{self, ConnectOptions, PortforwardArgs};
use portkeep::output::print_error;

#[derive(Parser)]
#[command(name = "portkeep")]
#[command(author, version, about = "Keep port-forward tunnels running in the background")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a tunnel to a service from the cluster profile
    Connect {
        /// Service name
        service: String,
        /// Namespace of the service
        #[arg(short, long, default_value = "default")]
        namespace: String,
        /// Cluster profile (defaults to $PORTKEEP_PROFILE, then <state dir>/profile.toml)
        #[arg(short, long)]
        profile: Option<PathBuf>,
        /// Local port or addr:port (defaults to remote port + 1)
        #[arg(short, long)]
        local_port: Option<String>,
        /// Port on the target (defaults to the service's first port)
        #[arg(short, long)]
        remote_port: Option<u16>,
        /// Run attached to the terminal instead of in the background
        #[arg(short, long)]
        foreground: bool,
    },

    /// List recorded tunnels
    List {
        /// Include stopped tunnels
        #[arg(short, long)]
        all: bool,
        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Stop a tunnel and remove its record
    Disconnect {
        /// Service name
        service: String,
        /// Namespace of the service
        #[arg(short, long, default_value = "default")]
        namespace: String,
    },

    /// List services defined in the cluster profile
    Services {
        /// Namespace to list
        #[arg(short, long, default_value = "default")]
        namespace: String,
        /// Cluster profile
        #[arg(short, long)]
        profile: Option<PathBuf>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Worker entry points (internal)
    #[command(hide = true)]
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show effective configuration
    Show,
    /// Show state directory path
    Path,
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Run one port-forward tunnel
    Portforward(PortforwardArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let state_dir = config::default_state_dir();

    // Workers have no terminal; they log to a file at info or above
    let worker_log = match &cli.command {
        Commands::Daemon {
            action: DaemonAction::Portforward(args),
        } => Some(config::worker_log_path(&state_dir, &args.namespace, &args.service)),
        _ => None,
    };

    let log_level = match (cli.quiet, cli.verbose, worker_log.is_some()) {
        (_, 0 | 1, true) => "info",
        (true, _, false) => "error",
        (false, 0, false) => "warn",
        (false, 1, false) => "info",
        (_, 2, _) => "debug",
        (_, _, _) => "trace",
    };
    init_logging(log_level, worker_log.as_deref());

    let is_worker = worker_log.is_some();
    match run(cli, &state_dir).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Workers have nowhere else to report
            if is_worker {
                tracing::error!("Worker exiting: {:#}", e);
            } else {
                print_error(&format!("{:#}", e));
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, state_dir: &Path) -> Result<()> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(config::default_config_path);
    let settings = Settings::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    match cli.command {
        Commands::Connect {
            service,
            namespace,
            profile,
            local_port,
            remote_port,
            foreground,
        } => {
            let options = ConnectOptions {
                service: &service,
                namespace: &namespace,
                profile: profile.as_deref(),
                local_port: local_port.as_deref(),
                remote_port,
                foreground,
            };
            commands::connect_command(state_dir, options, &settings, cli.config.as_deref()).await?;
        }

        Commands::List { all, json } => {
            commands::list_command(state_dir, all, json)?;
        }

        Commands::Disconnect { service, namespace } => {
            commands::disconnect_command(state_dir, &service, &namespace, &settings.teardown)
                .await?;
        }

        Commands::Services { namespace, profile } => {
            commands::services_command(state_dir, &namespace, profile.as_deref())?;
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(&settings, &config_path)?,
            ConfigAction::Path => commands::config_path(state_dir)?,
        },

        Commands::Daemon {
            action: DaemonAction::Portforward(args),
        } => {
            commands::daemon_portforward(state_dir, args, &settings.daemon).await?;
        }
    }

    Ok(())
}

/// Install the global subscriber; `RUST_LOG` overrides `level`
///
/// With `log_file`, output is appended there without colours. A log file
/// that cannot be opened falls back to stderr.
fn init_logging(level: &str, log_file: Option<&Path>) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| level.into()),
    );

    let file = log_file.and_then(|path| {
        let opened = path
            .parent()
            .map_or(Ok(()), create_private_dir)
            .and_then(|()| OpenOptions::new().create(true).append(true).open(path));
        match opened {
            Ok(file) => Some(file),
            Err(e) => {
                eprintln!("Failed to open log file {:?}: {}", path, e);
                None
            }
        }
    });

    let registry = tracing_subscriber::registry().with(filter);
    match file {
        Some(file) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
            .init(),
        None => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init(),
    }
}
