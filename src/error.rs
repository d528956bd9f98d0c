use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can abort construction of a [`crate::Supervisor`], or that
/// surface from calls the rest of the crate treats as fatal to the caller.
/// Everything recoverable (transient RPC failures, stream drops, unknown
/// containers) is handled internally and only logged — see the crate's
/// error handling design.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to create state directory {path}: {source}")]
    StateDir { path: PathBuf, source: io::Error },

    #[error("failed to access pid file {path}: {source}")]
    PidFile { path: PathBuf, source: io::Error },

    #[error("failed to spawn runtime daemon: {0}")]
    Spawn(#[source] io::Error),

    #[error("failed to set oom_score_adj for pid {pid}: {source}")]
    OomScore { pid: u32, source: io::Error },

    #[error("failed to connect to runtime daemon at {path}: {source}")]
    Dial {
        path: PathBuf,
        source: tonic::transport::Error,
    },

    #[error("runtime daemon rpc failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("unknown container: {0}")]
    UnknownContainer(String),

    #[error("malformed event from runtime daemon: {0}")]
    MalformedEvent(String),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Errors surfaced by the restart decision engine. `Canceled` is the
/// terminal sentinel delivered once [`crate::RestartManager::cancel`] has
/// been called; `AlreadyActive` is a caller bug — a second restart was
/// requested while one was already outstanding.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RestartError {
    #[error("restart canceled")]
    Canceled,
    #[error("a restart is already active for this container")]
    AlreadyActive,
}
