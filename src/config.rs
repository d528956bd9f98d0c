//! `SupervisorOptions`: a plain record carrying the options the source
//! expressed as a list of functional options, applied via a small builder.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Overrides the RPC endpoint path.
    pub remote_addr: Option<PathBuf>,
    /// The container runtime binary the daemon should use.
    pub runtime_path: Option<String>,
    /// Extra arguments forwarded to that runtime.
    pub runtime_args: Vec<String>,
    /// If true, this supervisor spawns and owns the daemon; otherwise it
    /// attaches to an already-running one.
    pub start_daemon: bool,
    /// Enables verbose daemon logging.
    pub debug_log: bool,
    /// Propagated to each client: containers survive supervisor restart.
    pub live_restore: bool,
    /// OOM-score-adjust applied to the spawned daemon process.
    pub oom_score: i32,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            remote_addr: None,
            runtime_path: None,
            runtime_args: Vec::new(),
            start_daemon: true,
            debug_log: false,
            live_restore: false,
            oom_score: 0,
        }
    }
}

impl SupervisorOptions {
    pub fn with_remote_addr(mut self, addr: impl Into<PathBuf>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    pub fn with_runtime_path(mut self, path: impl Into<String>) -> Self {
        self.runtime_path = Some(path.into());
        self
    }

    pub fn with_runtime_args(mut self, args: Vec<String>) -> Self {
        self.runtime_args = args;
        self
    }

    pub fn with_start_daemon(mut self, start_daemon: bool) -> Self {
        self.start_daemon = start_daemon;
        self
    }

    pub fn with_debug_log(mut self, debug_log: bool) -> Self {
        self.debug_log = debug_log;
        self
    }

    pub fn with_live_restore(mut self, live_restore: bool) -> Self {
        self.live_restore = live_restore;
        self
    }

    pub fn with_oom_score(mut self, oom_score: i32) -> Self {
        self.oom_score = oom_score;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let options = SupervisorOptions::default()
            .with_runtime_path("runc")
            .with_oom_score(-500)
            .with_start_daemon(false);

        assert_eq!(options.runtime_path.as_deref(), Some("runc"));
        assert_eq!(options.oom_score, -500);
        assert!(!options.start_daemon);
        assert!(!options.debug_log);
    }
}
