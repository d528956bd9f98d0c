use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use runtime_supervisor::{Container, ContainerBackend, Event, Supervisor, SupervisorOptions};

#[derive(Parser, Debug)]
#[command(
    name = "runtime-supervisor",
    about = "Supervises a container runtime daemon and dispatches its lifecycle events"
)]
struct Cli {
    /// Directory holding the PID file, RPC socket, watermark, and the
    /// daemon's own state subdirectory.
    #[arg(long, default_value = "/var/run/runtime-supervisor")]
    state_dir: PathBuf,

    /// Overrides the RPC endpoint path; defaults to `<state-dir>/runtime.sock`.
    #[arg(long)]
    remote_addr: Option<PathBuf>,

    /// Container runtime binary the daemon should use.
    #[arg(long)]
    runtime_path: Option<String>,

    #[arg(long = "runtime-arg")]
    runtime_args: Vec<String>,

    /// If unset, attach to an already-running daemon instead of spawning one.
    #[arg(long, default_value_t = true)]
    start_daemon: bool,

    #[arg(long)]
    debug_log: bool,

    #[arg(long)]
    live_restore: bool,

    #[arg(long, default_value_t = 0)]
    oom_score: i32,
}

/// Placeholder backend until a real one is wired in; logs every event.
struct LoggingBackend;

#[async_trait::async_trait]
impl ContainerBackend for LoggingBackend {
    async fn handle_event(&self, container: &Container, event: &Event) -> anyhow::Result<()> {
        log::info!(
            container_id = container.id(),
            kind:? = event.kind;
            "dispatching event"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut options = SupervisorOptions::default()
        .with_start_daemon(cli.start_daemon)
        .with_debug_log(cli.debug_log)
        .with_live_restore(cli.live_restore)
        .with_oom_score(cli.oom_score)
        .with_runtime_args(cli.runtime_args);
    if let Some(addr) = cli.remote_addr {
        options = options.with_remote_addr(addr);
    }
    if let Some(runtime_path) = cli.runtime_path {
        options = options.with_runtime_path(runtime_path);
    }

    let supervisor = Supervisor::new(cli.state_dir, options).await?;
    let _client = supervisor.new_client(Arc::new(LoggingBackend));

    // A SIGUSR1-triggered task-stack dump would be wired in here; out of
    // scope for this supervisor.

    wait_for_shutdown_signal().await;
    log::info!("received shutdown signal, cleaning up");
    supervisor.cleanup().await;

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = terminate.recv() => {},
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
