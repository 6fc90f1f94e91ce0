//! ssm-tunnel CLI
//!
//! Interactive prompt for opening SSM port-forwarding tunnels to EC2
//! instances. Tunnels are renewed in the background and closed on `exit`,
//! Ctrl+C or SIGTERM.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ssm_tunnel::commands::{self, Flow, Overrides, Shell};
use ssm_tunnel::inventory::Ec2CliInventory;
use ssm_tunnel::output::{format_shutdown, print_info, print_warning};
use st_session::{PluginSupervisor, SessionOrchestrator, SsmRelay};

#[derive(Parser)]
#[command(name = "ssm-tunnel")]
#[command(author, version, about = "Port-forwarding tunnels to EC2 instances over SSM")]
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

    /// AWS profile (overrides config)
    #[arg(long, global = true)]
    profile: Option<String>,

    /// AWS region (overrides config)
    #[arg(long, global = true)]
    region: Option<String>,

    /// Port on the instance to forward to (overrides config)
    #[arg(long, global = true)]
    remote_port: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the interactive prompt (default)
    Interactive,

    /// Open a tunnel to an instance, then continue in the prompt
    Connect {
        /// Instance ID, name or unique part of a name
        target: String,
    },

    /// List instances and exit
    Instances {
        /// Case-insensitive filter on name or ID
        filter: Option<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Show the effective configuration
    Show,
    /// Show the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let overrides = Overrides {
        profile: cli.profile,
        region: cli.region,
        remote_port: cli.remote_port,
    };
    let config_path = cli.config.as_deref();

    match cli.command.unwrap_or(Commands::Interactive) {
        Commands::Interactive => {
            let code = run_interactive(config_path, &overrides, None).await?;
            std::process::exit(code);
        }

        Commands::Connect { target } => {
            let code = run_interactive(config_path, &overrides, Some(target)).await?;
            std::process::exit(code);
        }

        Commands::Instances { filter } => {
            let config = commands::load_effective_config(config_path, &overrides)?;
            let inventory = Ec2CliInventory::new(&config.aws);
            commands::instances_command(&inventory, filter.as_deref()).await?;
        }

        Commands::Config { action } => match action {
            ConfigAction::Init { force } => {
                commands::config_init(config_path, force)?;
            }
            ConfigAction::Show => {
                commands::config_show(config_path, &overrides)?;
            }
            ConfigAction::Path => {
                println!("{}", commands::config_path(config_path).display());
            }
        },
    }

    Ok(())
}

/// Run the prompt until `exit`, end of input or a signal, then tear every
/// session down. Returns the process exit code.
async fn run_interactive(
    config_path: Option<&Path>,
    overrides: &Overrides,
    initial_target: Option<String>,
) -> Result<i32> {
    let config = commands::load_effective_config(config_path, overrides)?;

    let relay = SsmRelay::from_config(&config)
        .await
        .context("Failed to set up the SSM client")?;
    let region = relay.region().to_string();
    let supervisor = PluginSupervisor::from_config(&config, &region);
    let inventory = Ec2CliInventory::new(&config.aws).with_region(region.as_str());
    tracing::info!(region = %region, endpoint = %relay.endpoint(), "SSM client ready");

    let orchestrator = Arc::new(SessionOrchestrator::new(
        &config,
        Arc::new(relay),
        Arc::new(supervisor),
    ));

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let mut shell = Shell::new(Arc::clone(&orchestrator), Arc::new(inventory));
    print_info(&format!(
        "ssm-tunnel {} ({}), type 'help' for commands",
        env!("CARGO_PKG_VERSION"),
        region
    ));

    if let Some(target) = initial_target {
        let line = format!("connect {}", target);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            _ = shell.handle_line(&line) => {}
        }
    }

    let mut lines = spawn_stdin_reader();
    while !cancel.is_cancelled() {
        print_prompt();
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                println!();
                break;
            }
            line = lines.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };
        // A connect abandoned here kills its transport and frees its port.
        // Its relay session, if one was opened, is left to expire.
        let flow = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                println!();
                break;
            }
            flow = shell.handle_line(&line) => flow,
        };
        if flow == Flow::Exit {
            break;
        }
    }

    if cancel.is_cancelled() {
        print_warning("Interrupted, closing all tunnels...");
    } else {
        print_info("Closing all tunnels...");
    }

    let report = orchestrator.exit().await;
    println!("{}", format_shutdown(&report));
    if !report.is_clean() {
        print_warning("Shutdown was not clean; see above");
    }
    Ok(report.exit_code())
}

fn print_prompt() {
    let mut stdout = std::io::stdout();
    let _ = write!(stdout, "ssm-tunnel> ");
    let _ = stdout.flush();
}

/// Blocking stdin reads live on their own thread so they never hold up
/// runtime shutdown. The channel closes at end of input.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to read from stdin: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

/// Cancel `cancel` on Ctrl+C or SIGTERM
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel.cancel();
    });
}
