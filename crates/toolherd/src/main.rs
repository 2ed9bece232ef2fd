use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

mod cli;

use cli::Cli;
use herd_config::KernelConfig;
use herd_kernel::bindings::file::FileTransport;
use herd_kernel::bindings::{interactive, tcp};
use herd_kernel::{ControlCommand, ControlRequest, Kernel};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("herd: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = KernelConfig::load(&cli.config)?;
    let _log_guard = init_tracing(&config, cli.debug)?;

    let pid_file = config.core.pid_file.clone();
    if let Some(path) = &pid_file {
        std::fs::write(path, format!("{}\n", std::process::id()))
            .with_context(|| format!("failed to write pid file {}", path.display()))?;
    }

    let mut kernel = Kernel::from_config(&config)?;
    let (tx, rx) = mpsc::channel::<ControlRequest>(64);

    // Loopback socket when a port is configured, the command/response
    // file pair otherwise.
    let file_transport = match config.core.control_port {
        Some(port) => {
            let listener = TcpListener::bind(("127.0.0.1", port))
                .await
                .with_context(|| format!("failed to bind control port {port}"))?;
            info!(port, "control listener bound");
            tokio::spawn(tcp::serve(listener, tx.clone()));
            None
        }
        None => {
            info!(
                command_file = %config.core.command_file.display(),
                "file control transport active"
            );
            Some(FileTransport::new(
                config.core.command_file.clone(),
                config.core.response_file.clone(),
            ))
        }
    };

    if stdin_is_tty() {
        if let Err(err) = interactive::spawn(tx.clone()) {
            warn!(error = %err, "failed to start interactive control prompt");
        }
    }
    spawn_signal_handler(tx);

    kernel.run(rx, file_transport).await;

    if let Some(path) = &pid_file {
        if let Err(err) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %err, "failed to remove pid file");
        }
    }
    info!("kernel exited cleanly");
    Ok(())
}

/// Stderr by default; the configured log file via a non-blocking appender
/// when one is set. The returned guard must live until exit so buffered
/// records are flushed.
fn init_tracing(
    config: &KernelConfig,
    debug: bool,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let level = if debug {
        "debug"
    } else {
        config.core.log_level.as_filter_str()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    match &config.core.log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .with_context(|| format!("log_file '{}' has no file name", path.display()))?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .try_init()
                .ok();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init()
                .ok();
            Ok(None)
        }
    }
}

fn stdin_is_tty() -> bool {
    // SAFETY: isatty only inspects the descriptor.
    unsafe { libc::isatty(libc::STDIN_FILENO) == 1 }
}

/// SIGINT/SIGTERM take the same path as the `shutdown` verb.
fn spawn_signal_handler(tx: mpsc::Sender<ControlRequest>) {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        let (reply_tx, _reply_rx) = oneshot::channel();
        let _ = tx
            .send(ControlRequest {
                command: ControlCommand::Shutdown,
                reply: reply_tx,
            })
            .await;
    });
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
