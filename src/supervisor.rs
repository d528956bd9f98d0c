//! Runtime Daemon Supervisor: spawns, monitors, restarts, and shuts down
//! the runtime daemon, and manages the long-lived RPC connection to it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::watch;

use crate::config::SupervisorOptions;
use crate::error::SupervisorError;
use crate::process::{self, SpawnOutcome};
use crate::registry::{Client, ContainerBackend};
use crate::rpc::{ClosedDaemonClient, DaemonClient, TonicDaemonClient};
use crate::watermark::Watermark;
use crate::{connection, events};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);
const SHUTDOWN_POLL: Duration = Duration::from_secs(1);

struct DaemonHandle {
    pid: Option<u32>,
    wait: watch::Receiver<bool>,
}

/// Supervisor state: runtime-daemon PID, state directory, RPC endpoint
/// path, exiting-intentionally flag, the daemon's wait channel, the list
/// of client handles, and the event-timestamp watermark.
pub struct SupervisorInner {
    state_dir: PathBuf,
    rpc_addr: PathBuf,
    options: SupervisorOptions,
    daemon: Mutex<DaemonHandle>,
    exiting: AtomicBool,
    clients: RwLock<Vec<Arc<Client>>>,
    watermark: Watermark,
    client: Mutex<Arc<dyn DaemonClient>>,
}

/// The public handle callers construct and hold for the lifetime of the
/// supervised daemon.
#[derive(Clone)]
pub struct Supervisor(Arc<SupervisorInner>);

impl Supervisor {
    /// Applies options, ensures the state directory, spawns or adopts the
    /// daemon, dials it, loads the watermark, and starts the background
    /// connection observer and event pump.
    pub async fn new(
        state_dir: impl Into<PathBuf>,
        options: SupervisorOptions,
    ) -> Result<Self, SupervisorError> {
        let state_dir = state_dir.into();
        std::fs::create_dir_all(&state_dir).map_err(|source| SupervisorError::StateDir {
            path: state_dir.clone(),
            source,
        })?;
        set_dir_mode_0700(&state_dir)?;

        let rpc_addr = options
            .remote_addr
            .clone()
            .unwrap_or_else(|| process::default_sock_path(&state_dir));

        let daemon_handle = if options.start_daemon {
            let SpawnOutcome { pid, wait } =
                process::spawn_or_adopt(&state_dir, &rpc_addr, &options)?;
            DaemonHandle {
                pid: Some(pid),
                wait,
            }
        } else {
            let (_tx, rx) = watch::channel(false);
            DaemonHandle { pid: None, wait: rx }
        };

        let daemon_client: Arc<dyn DaemonClient> =
            Arc::new(TonicDaemonClient::connect(rpc_addr.clone()).await?);

        let watermark = Watermark::new(state_dir.join(crate::watermark::FILENAME));

        let inner = Arc::new(SupervisorInner {
            state_dir,
            rpc_addr,
            options,
            daemon: Mutex::new(daemon_handle),
            exiting: AtomicBool::new(false),
            clients: RwLock::new(Vec::new()),
            watermark,
            client: Mutex::new(daemon_client),
        });

        tokio::spawn(connection::run(Arc::clone(&inner)));
        tokio::spawn(events::run(Arc::clone(&inner)));

        Ok(Self(inner))
    }

    /// Registers a new backend, returning the client it can use to create
    /// and remove containers. Corresponds to the source's `Client(backend)`
    /// constructor. The client inherits this supervisor's `live_restore`
    /// option.
    pub fn new_client(&self, backend: Arc<dyn ContainerBackend>) -> Arc<Client> {
        let client = Client::with_live_restore(backend, self.0.options.live_restore);
        self.0.clients.write().unwrap().push(Arc::clone(&client));
        client
    }

    /// Sends the daemon a graceful termination signal, waits up to 15s,
    /// force-kills if still alive, then removes the PID and socket files.
    pub async fn cleanup(&self) {
        self.0.cleanup().await
    }
}

impl SupervisorInner {
    pub(crate) fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::SeqCst)
    }

    pub(crate) fn daemon_pid(&self) -> Option<u32> {
        self.daemon.lock().unwrap().pid
    }

    pub(crate) fn daemon_wait(&self) -> watch::Receiver<bool> {
        self.daemon.lock().unwrap().wait.clone()
    }

    pub(crate) fn daemon_client(&self) -> Arc<dyn DaemonClient> {
        Arc::clone(&self.client.lock().unwrap())
    }

    pub(crate) fn watermark(&self) -> &Watermark {
        &self.watermark
    }

    pub(crate) fn clients_snapshot(&self) -> Vec<Arc<Client>> {
        self.clients.read().unwrap().clone()
    }

    /// Kills the daemon if it hasn't already exited, then spawns and dials
    /// a fresh one. Used by the connection observer after repeated ping
    /// failures.
    pub(crate) async fn respawn_daemon(
        &self,
    ) -> Result<(u32, watch::Receiver<bool>), SupervisorError> {
        let SpawnOutcome { pid, wait } =
            process::spawn_or_adopt(&self.state_dir, &self.rpc_addr, &self.options)?;
        let new_client: Arc<dyn DaemonClient> =
            Arc::new(TonicDaemonClient::connect(self.rpc_addr.clone()).await?);

        *self.client.lock().unwrap() = new_client;
        {
            let mut daemon = self.daemon.lock().unwrap();
            daemon.pid = Some(pid);
            daemon.wait = wait.clone();
        }

        Ok((pid, wait))
    }

    async fn cleanup(&self) {
        let Some(pid) = self.daemon_pid() else {
            return;
        };

        self.exiting.store(true, Ordering::SeqCst);

        let closing_client = self.daemon_client();
        closing_client.close().await;
        *self.client.lock().unwrap() = Arc::new(ClosedDaemonClient);
        drop(closing_client);

        process::terminate(pid);

        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        while process::process_alive(pid) && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(SHUTDOWN_POLL).await;
        }

        if process::process_alive(pid) {
            log::warn!(pid; "runtime daemon did not stop within the grace period, killing it");
            process::kill(pid);
        }

        let _ = std::fs::remove_file(self.state_dir.join(process::PID_FILENAME));
        let _ = std::fs::remove_file(&self.rpc_addr);
    }
}

#[cfg(test)]
impl SupervisorInner {
    /// Builds a `SupervisorInner` around a caller-supplied `DaemonClient`,
    /// bypassing the real spawn-and-dial sequence, so the event pump and
    /// connection observer can be exercised against an in-memory fake.
    pub(crate) fn new_for_test(
        client: Arc<dyn DaemonClient>,
        watermark_path: PathBuf,
    ) -> Arc<Self> {
        let state_dir = watermark_path
            .parent()
            .expect("watermark path must have a parent directory")
            .to_path_buf();
        let (_tx, wait) = watch::channel(false);
        Arc::new(Self {
            rpc_addr: process::default_sock_path(&state_dir),
            state_dir,
            options: SupervisorOptions::default(),
            daemon: Mutex::new(DaemonHandle { pid: None, wait }),
            exiting: AtomicBool::new(false),
            clients: RwLock::new(Vec::new()),
            watermark: Watermark::new(watermark_path),
            client: Mutex::new(client),
        })
    }

    pub(crate) fn register_client_for_test(&self, client: Arc<Client>) {
        self.clients.write().unwrap().push(client);
    }

    pub(crate) fn mark_exiting_for_test(&self) {
        self.exiting.store(true, Ordering::SeqCst);
    }
}

#[cfg(unix)]
fn set_dir_mode_0700(path: &std::path::Path) -> Result<(), SupervisorError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700)).map_err(|source| {
        SupervisorError::StateDir {
            path: path.to_path_buf(),
            source,
        }
    })
}
