//! Spawns (or adopts) the runtime daemon process, places it in its own
//! session, applies its OOM score, and provides the signals needed to
//! stop it gracefully or forcefully.

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

use crate::config::SupervisorOptions;
use crate::error::SupervisorError;

pub const STATE_SUBDIR: &str = "containerd";
pub const PID_FILENAME: &str = "runtime.pid";
pub const SOCK_FILENAME: &str = "runtime.sock";

const DAEMON_BINARY: &str = "runtime-daemon";
const SHIM_BINARY: &str = "runtime-daemon-shim";
const START_TIMEOUT: &str = "2m";
const ADOPTED_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Result of a successful spawn-or-adopt: the daemon's PID and a channel
/// that resolves to `true` once it has been reaped.
pub struct SpawnOutcome {
    pub pid: u32,
    pub wait: watch::Receiver<bool>,
}

/// Opens (creating if missing) the PID file under `state_dir`. If it names
/// a live process, adopts it; otherwise spawns a fresh daemon.
pub fn spawn_or_adopt(
    state_dir: &Path,
    rpc_addr: &Path,
    options: &SupervisorOptions,
) -> Result<SpawnOutcome, SupervisorError> {
    let pid_path = state_dir.join(PID_FILENAME);
    let mut pid_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(&pid_path)
        .map_err(|source| SupervisorError::PidFile {
            path: pid_path.clone(),
            source,
        })?;

    let mut contents = String::new();
    pid_file
        .read_to_string(&mut contents)
        .map_err(|source| SupervisorError::PidFile {
            path: pid_path.clone(),
            source,
        })?;

    if let Ok(pid) = contents.trim().parse::<u32>() {
        if process_alive(pid) {
            log::info!(pid; "adopting already-running runtime daemon");
            return Ok(SpawnOutcome {
                pid,
                wait: spawn_adopted_reaper(pid),
            });
        }
    }

    pid_file
        .set_len(0)
        .and_then(|_| pid_file.seek(SeekFrom::Start(0)).map(|_| ()))
        .map_err(|source| SupervisorError::PidFile {
            path: pid_path.clone(),
            source,
        })?;

    let state_subdir = state_dir.join(STATE_SUBDIR);
    let mut args = vec![
        "-l".to_string(),
        format!("unix://{}", rpc_addr.display()),
        "--shim".to_string(),
        SHIM_BINARY.to_string(),
        "--metrics-interval=0".to_string(),
        "--start-timeout".to_string(),
        START_TIMEOUT.to_string(),
        "--state-dir".to_string(),
        state_subdir.display().to_string(),
    ];
    if let Some(runtime) = &options.runtime_path {
        args.push("--runtime".to_string());
        args.push(runtime.clone());
    }
    for runtime_arg in &options.runtime_args {
        args.push("--runtime-args".to_string());
        args.push(runtime_arg.clone());
    }
    if options.debug_log {
        args.push("--debug".to_string());
    }

    let mut cmd = Command::new(DAEMON_BINARY);
    cmd.args(&args)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .env_clear()
        .envs(std::env::vars().filter(|(key, _)| key != "NOTIFY_SOCKET"));

    // SAFETY: the closure only calls async-signal-safe libc functions
    // between fork and exec.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let mut child = cmd.spawn().map_err(SupervisorError::Spawn)?;
    let pid = child.id().expect("freshly spawned child always has a pid");

    set_oom_score_adj(pid, options.oom_score).map_err(|source| SupervisorError::OomScore {
        pid,
        source,
    })?;

    pid_file
        .write_all(pid.to_string().as_bytes())
        .map_err(|source| SupervisorError::PidFile {
            path: pid_path,
            source,
        })?;

    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = child.wait().await;
        let _ = tx.send(true);
    });

    Ok(SpawnOutcome { pid, wait: rx })
}

/// We don't own the adopted process's `Child` handle, so we can't `wait()`
/// on it; poll liveness instead.
fn spawn_adopted_reaper(pid: u32) -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        while process_alive(pid) {
            sleep(ADOPTED_POLL_INTERVAL).await;
        }
        let _ = tx.send(true);
    });
    rx
}

fn set_oom_score_adj(pid: u32, score: i32) -> std::io::Result<()> {
    fs::write(format!("/proc/{pid}/oom_score_adj"), score.to_string())
}

pub fn process_alive(pid: u32) -> bool {
    // kill(pid, 0) checks existence/permission without sending a signal.
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

pub fn terminate(pid: u32) {
    unsafe {
        libc::kill(pid as i32, libc::SIGTERM);
    }
}

pub fn kill(pid: u32) {
    unsafe {
        libc::kill(pid as i32, libc::SIGKILL);
    }
}

pub fn default_sock_path(state_dir: &Path) -> PathBuf {
    state_dir.join(SOCK_FILENAME)
}
