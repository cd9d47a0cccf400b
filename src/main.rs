use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use podshim::api::{ContainerState, PodSandboxState};
use podshim::config::Config;

mod commands;

#[derive(Parser)]
#[command(name = "podshim")]
#[command(
    author,
    version,
    about = "Pod sandbox and container lifecycle on top of Docker"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: ./podshim.toml, then the user config dir)
    #[arg(short, long, global = true, env = "PODSHIM_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PodState {
    Ready,
    NotReady,
}

impl From<PodState> for PodSandboxState {
    fn from(state: PodState) -> Self {
        match state {
            PodState::Ready => Self::Ready,
            PodState::NotReady => Self::NotReady,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pod sandbox from a TOML sandbox config
    Runp {
        /// Sandbox config file
        config: PathBuf,
    },

    /// Stop a pod sandbox
    Stopp {
        /// Sandbox ID
        pod_sandbox_id: String,
    },

    /// Remove a pod sandbox
    Rmp {
        /// Sandbox ID
        pod_sandbox_id: String,
    },

    /// Show the status of a pod sandbox as JSON
    Inspectp {
        /// Sandbox ID
        pod_sandbox_id: String,
    },

    /// List pod sandboxes
    Pods {
        /// Only show sandboxes in this state
        #[arg(long, value_enum)]
        state: Option<PodState>,

        /// Only show sandboxes carrying this label (key=value, repeatable)
        #[arg(short, long, value_parser = commands::parse_label)]
        label: Vec<(String, String)>,
    },

    /// Create a container inside a pod sandbox
    Create {
        /// Sandbox ID the container joins
        pod_sandbox_id: String,

        /// Container config file
        config: PathBuf,

        /// Sandbox config file the sandbox was run with
        sandbox_config: PathBuf,
    },

    /// Start a created container
    Start {
        /// Container ID
        container_id: String,
    },

    /// Stop a running container
    Stop {
        /// Container ID
        container_id: String,

        /// Seconds to wait before killing (default from config)
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Remove a container
    Rm {
        /// Container ID
        container_id: String,
    },

    /// Show the status of a container as JSON
    Inspect {
        /// Container ID
        container_id: String,
    },

    /// List containers
    Ps {
        /// Only show containers of this sandbox
        #[arg(short, long)]
        pod: Option<String>,

        /// Only show containers in this state (created, running, exited, unknown)
        #[arg(long)]
        state: Option<ContainerState>,

        /// Only show containers carrying this label (key=value, repeatable)
        #[arg(short, long, value_parser = commands::parse_label)]
        label: Vec<(String, String)>,
    },
}

fn init_logging(verbose: bool, format: LogFormat) {
    let default = if verbose { "podshim=debug" } else { "podshim=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // stdout carries command output; logs go to stderr.
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    let config_path = cli.config.unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let service = commands::connect(&config).await?;

    // Ctrl-C abandons the in-flight request; the engine finishes on its own.
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling request");
            on_interrupt.cancel();
        }
    });

    match cli.command {
        Commands::Runp { config } => {
            commands::sandbox::run(&service, &cancel, &config).await?;
        }
        Commands::Stopp { pod_sandbox_id } => {
            commands::sandbox::stop(&service, &cancel, pod_sandbox_id).await?;
        }
        Commands::Rmp { pod_sandbox_id } => {
            commands::sandbox::remove(&service, &cancel, pod_sandbox_id).await?;
        }
        Commands::Inspectp { pod_sandbox_id } => {
            commands::sandbox::inspect(&service, &cancel, pod_sandbox_id).await?;
        }
        Commands::Pods { state, label } => {
            commands::sandbox::list(&service, &cancel, state.map(Into::into), label).await?;
        }
        Commands::Create {
            pod_sandbox_id,
            config,
            sandbox_config,
        } => {
            commands::container::create(&service, &cancel, pod_sandbox_id, &config, &sandbox_config)
                .await?;
        }
        Commands::Start { container_id } => {
            commands::container::start(&service, &cancel, container_id).await?;
        }
        Commands::Stop {
            container_id,
            timeout,
        } => {
            let timeout = timeout.unwrap_or(config.container.default_stop_timeout_secs);
            commands::container::stop(&service, &cancel, container_id, timeout).await?;
        }
        Commands::Rm { container_id } => {
            commands::container::remove(&service, &cancel, container_id).await?;
        }
        Commands::Inspect { container_id } => {
            commands::container::inspect(&service, &cancel, container_id).await?;
        }
        Commands::Ps { pod, state, label } => {
            commands::container::list(&service, &cancel, pod, state, label).await?;
        }
    }

    Ok(())
}
