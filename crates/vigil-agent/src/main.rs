use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use vigil_agent::config::AgentConfig;
use vigil_agent::{lifecycle, logging};

#[derive(Parser, Debug)]
#[command(name = "vigil-agent", version, about = "Host monitoring agent")]
struct Cli {
    /// Path to the agent configuration file
    #[arg(short, long, default_value = "config/agent.toml")]
    config: PathBuf,

    /// Log at debug level regardless of configuration
    #[arg(short, long)]
    verbose: bool,

    /// Detach and run in the background (POSIX only)
    #[arg(short, long)]
    daemon: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.daemon {
        return daemonize();
    }

    let config = AgentConfig::load(&cli.config)?;
    logging::init(&config.log, cli.verbose)?;

    lifecycle::run(config, wait_for_signal()).await
}

/// Block until SIGINT/SIGTERM (Ctrl+C elsewhere).
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGINT handler");
                return;
            }
        };
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to wait for Ctrl+C");
        } else {
            info!("Received Ctrl+C");
        }
    }
}

/// Re-spawn the process detached, without the daemon flag.
fn daemonize() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use std::process::Stdio;

        let exe = std::env::current_exe()?;
        let args: Vec<String> = std::env::args()
            .skip(1)
            .filter(|a| a != "-d" && a != "--daemon")
            .collect();

        let child = std::process::Command::new(exe)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        println!("vigil-agent running in background, pid {}", child.id());
        Ok(())
    }

    #[cfg(not(unix))]
    {
        anyhow::bail!("daemon mode is not supported on this platform; install as a service instead")
    }
}
