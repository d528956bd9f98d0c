//! Container supervision core: lifecycle-manages a container runtime
//! daemon process, maintains its event-streaming RPC connection, and
//! decides per container whether and when to request a restart.

#[cfg(not(unix))]
compile_error!("runtime-supervisor only supports unix targets (unix-domain sockets, setsid/prctl)");

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod keyed_lock;
pub mod process;
pub mod registry;
pub mod restart;
pub mod rpc;
pub mod supervisor;
pub mod watermark;

pub use config::SupervisorOptions;
pub use error::{RestartError, SupervisorError};
pub use keyed_lock::{KeyedLockGuard, KeyedLockTable};
pub use registry::{Client, Container, ContainerBackend, ContainerState};
pub use restart::{RestartManager, RestartPolicy};
pub use rpc::{DaemonClient, Event, EventKind};
pub use supervisor::Supervisor;
