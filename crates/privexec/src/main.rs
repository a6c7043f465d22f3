//! privexec - run a command through the privileged broker.
//!
//! ## Usage
//!
//! ```bash
//! # Run and exit with the remote exit code
//! privexec run --dir /data/local/tmp -- ls -la
//!
//! # Check the broker is up and what it allows
//! privexec status
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use privexec::status::probe;
use privexec::{
    BridgeConfig, Interrupt, LaunchError, PrivilegedProcessLauncher, ProcessRequest, SocketBroker,
};

/// Exit code used when the wait was interrupted with Ctrl-C.
const EXIT_INTERRUPTED: u8 = 130;

/// Exit code used when the command never ran or its status is unknown.
const EXIT_LAUNCH_FAILED: u8 = 125;

/// How long an interrupted run may take to wind down before we stop waiting.
const INTERRUPT_GRACE: Duration = Duration::from_secs(3);

#[derive(Parser, Debug)]
#[command(name = "privexec")]
#[command(about = "Run commands through the privileged process broker")]
#[command(version)]
struct Cli {
    /// Path to config file.
    /// Defaults to ~/.config/privexec/config.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Broker socket path (overrides config).
    #[arg(short, long, env = "PRIVEXEC_SOCKET")]
    socket: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a command under the broker and exit with its exit code.
    Run {
        /// Environment entry as KEY=VALUE. Repeatable. Without any, the
        /// broker's default environment is used.
        #[arg(short, long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,

        /// Working directory. Defaults to the broker's.
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Command and arguments.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Check that the broker answers.
    Ping,

    /// Show broker reachability, privilege and capability availability.
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        "privexec=debug"
    } else {
        "privexec=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run_cli(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("privexec: {e:#}");
            ExitCode::from(EXIT_LAUNCH_FAILED)
        }
    }
}

async fn run_cli(cli: Cli) -> Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => BridgeConfig::from_file(path)?,
        None => BridgeConfig::load()?,
    }
    .with_socket_override(cli.socket);

    let broker = SocketBroker::from_config(&config).context("resolving broker socket path")?;
    debug!("Using broker socket {:?}", broker.client().socket_path());

    match cli.command {
        Command::Run { env, dir, command } => {
            let mut request = ProcessRequest::new(command)?.with_env(env);
            if let Some(dir) = dir {
                request = request.with_working_dir(dir)?;
            }
            run_command(broker, &config, &request).await
        }
        Command::Ping => {
            broker
                .client()
                .ping()
                .await
                .with_context(|| format!("pinging broker at {:?}", broker.client().socket_path()))?;
            println!("pong");
            Ok(ExitCode::SUCCESS)
        }
        Command::Status => {
            let status = probe(&broker, &config.capability).await;
            println!("socket:      {}", broker.client().socket_path().display());
            println!("reachable:   {}", status.reachable);
            if let Some(version) = &status.version {
                println!("version:     {version}");
            }
            if let Some(privilege) = status.privilege {
                println!("privilege:   {privilege}");
            }
            println!("authorized:  {}", status.authorized);
            match status.capability_available {
                Some(available) => println!("capability:  {} ({})", config.capability, available),
                None => println!("capability:  {} (unknown)", config.capability),
            }
            if let Some(error) = &status.error {
                println!("error:       {error}");
            }
            Ok(if status.is_ready() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

async fn run_command(
    broker: SocketBroker,
    config: &BridgeConfig,
    request: &ProcessRequest,
) -> Result<ExitCode> {
    let launcher = PrivilegedProcessLauncher::with_capability_name(broker, &config.capability);
    let interrupt = Interrupt::new();

    info!("Running {:?} through broker", request.command());
    let run = launcher.run_until(request, &interrupt);
    tokio::pin!(run);

    let outcome = tokio::select! {
        outcome = &mut run => outcome,
        Ok(()) = tokio::signal::ctrl_c() => {
            warn!("Interrupted, abandoning run");
            interrupt.cancel();
            // A pending wait notices the interrupt and releases its handle
            match tokio::time::timeout(INTERRUPT_GRACE, &mut run).await {
                Ok(outcome) => outcome,
                Err(_) => Err(LaunchError::WaitInterrupted),
            }
        }
    };

    match &outcome {
        Ok(code) => debug!("Remote exit code {}", code),
        Err(e) => eprintln!("privexec: {e}"),
    }
    Ok(ExitCode::from(exit_code(&outcome)))
}

/// Local exit code for the outcome of a run.
fn exit_code(outcome: &Result<i32, LaunchError>) -> u8 {
    match outcome {
        // Exit codes outside 0..=255 cannot be reproduced locally
        Ok(code) => u8::try_from(*code).unwrap_or(1),
        Err(LaunchError::WaitInterrupted) => EXIT_INTERRUPTED,
        Err(_) => EXIT_LAUNCH_FAILED,
    }
}
