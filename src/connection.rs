//! Connection liveness observer. `tonic`'s `Channel` has no `grpc-go`-style
//! connectivity state machine to watch, so liveness is driven by polling a
//! `Ping` RPC at a fixed interval; repeated failures are treated the way
//! the source treats a `TransientFailure` run.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;

use crate::process;
use crate::supervisor::SupervisorInner;

const PING_INTERVAL: Duration = Duration::from_secs(3);
const MAX_TRANSIENT_FAILURES: u32 = 3;

pub async fn run(sup: Arc<SupervisorInner>) {
    let Some(mut pid) = sup.daemon_pid() else {
        // Not running our own daemon: nothing to observe or respawn.
        return;
    };
    let mut wait = sup.daemon_wait();
    let mut failures = 0u32;
    let mut ticker = interval(PING_INTERVAL);

    loop {
        ticker.tick().await;

        if sup.is_exiting() {
            return;
        }

        match sup.daemon_client().ping().await {
            Ok(()) => failures = 0,
            Err(err) => {
                failures += 1;
                log::debug!(
                    failures = failures,
                    max = MAX_TRANSIENT_FAILURES;
                    "runtime daemon ping failed: {err}"
                );

                if failures >= MAX_TRANSIENT_FAILURES {
                    failures = 0;

                    if process::process_alive(pid) {
                        process::kill(pid);
                    }
                    let _ = wait.wait_for(|done| *done).await;

                    if sup.is_exiting() {
                        return;
                    }

                    match sup.respawn_daemon().await {
                        Ok((new_pid, new_wait)) => {
                            log::info!(pid = new_pid; "respawned runtime daemon");
                            pid = new_pid;
                            wait = new_wait;
                        }
                        Err(err) => {
                            log::error!("failed to respawn runtime daemon: {err}");
                            return;
                        }
                    }
                }
            }
        }
    }
}
