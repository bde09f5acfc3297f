//! webclock daemon - focus tracker and socket server
//!
//! This binary runs as a background daemon, accepting focus and idle
//! reports from the browser host bridge and answering queries from the
//! `webclock` CLI.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! webclockd start
//!
//! # Start the daemon (background/daemonized)
//! webclockd start -d
//!
//! # Stop the daemon
//! webclockd stop
//!
//! # Check daemon status
//! webclockd status
//! ```

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use webclock_core::SystemClock;
use webclockd::config::DaemonConfig;
use webclockd::host::HostMirror;
use webclockd::server::DaemonServer;
use webclockd::store::JsonFileStore;
use webclockd::tracker::spawn_tracker;

/// webclock daemon - per-domain browsing time tracker
#[derive(Parser, Debug)]
#[command(name = "webclockd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

fn read_pid(path: &Path) -> Option<u32> {
    let mut file = File::open(path).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file(path: &Path) {
    let _ = fs::remove_file(path);
}

fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

fn is_daemon_running(pid_path: &Path) -> Option<u32> {
    if let Some(pid) = read_pid(pid_path) {
        if is_process_running(pid) {
            return Some(pid);
        }
        remove_pid_file(pid_path);
    }
    None
}

fn stop_daemon(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let result = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
        if result != 0 {
            bail!("Failed to send SIGTERM to process {pid}");
        }
    }
    #[cfg(not(unix))]
    {
        bail!("Stop command is only supported on Unix systems");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = DaemonConfig::load().context("Failed to load configuration")?;

    let command = args.command.unwrap_or(Command::Start { daemon: false });

    match command {
        Command::Start { daemon } => {
            if let Some(pid) = is_daemon_running(&config.pid_path) {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'webclockd stop' to stop it first.");
                process::exit(1);
            }

            if daemon {
                daemonize(&config.log_path)?;
            }

            write_pid(&config.pid_path)?;

            let result = run_daemon(&config);

            remove_pid_file(&config.pid_path);

            result
        }
        Command::Stop => {
            if let Some(pid) = is_daemon_running(&config.pid_path) {
                println!("Stopping daemon (PID {pid})...");
                stop_daemon(pid)?;

                // The daemon flushes buffered usage before exiting.
                for _ in 0..50 {
                    if !is_process_running(pid) {
                        println!("Daemon stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }

                eprintln!("Daemon did not stop within 5 seconds.");
                process::exit(1);
            } else {
                println!("Daemon is not running.");
                Ok(())
            }
        }
        Command::Status => {
            if let Some(pid) = is_daemon_running(&config.pid_path) {
                println!("Daemon is running (PID {pid})");
                if config.socket_path.exists() {
                    println!("Socket: {}", config.socket_path.display());
                }
                println!("State:  {}", config.state_path.display());
                Ok(())
            } else {
                println!("Daemon is not running.");
                process::exit(1);
            }
        }
    }
}

fn daemonize(log_path: &Path) -> Result<()> {
    use daemonize::Daemonize;

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(log_path).context("Failed to create log file for stdout")?;
    let stderr = File::create(log_path).context("Failed to create log file for stderr")?;

    let daemonize = Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr);

    daemonize.start().context("Failed to daemonize")?;

    Ok(())
}

#[tokio::main]
async fn run_daemon(config: &DaemonConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("webclockd=info".parse()?)
                .add_directive("webclock_core=info".parse()?)
                .add_directive("webclock_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "webclock daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let mirror = Arc::new(HostMirror::new());
    let store = Arc::new(JsonFileStore::new(&config.state_path));
    let tracker = spawn_tracker(mirror.clone(), store, Arc::new(SystemClock));
    info!(state = %config.state_path.display(), "Tracker started");

    let server = DaemonServer::new(
        &config.socket_path,
        tracker.clone(),
        mirror,
        cancel_token,
    );

    info!(socket = %config.socket_path.display(), "Starting server");

    let result = server.run().await;

    // Close the open session and write what is buffered.
    if let Err(e) = tracker.shutdown().await {
        warn!(error = %e, "Tracker did not shut down cleanly");
    }

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("webclock daemon stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
