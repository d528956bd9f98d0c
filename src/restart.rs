//! Per-container restart decision engine: policy evaluation, exponential
//! backoff, and cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::RestartError;

const BACKOFF_MULTIPLIER: u32 = 2;
const DEFAULT_BACKOFF: Duration = Duration::from_millis(100);
const LONG_RUN_THRESHOLD: Duration = Duration::from_secs(10);

/// How a container should be restarted after it stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    Never,
    Always,
    UnlessStopped,
    OnFailure { max_retries: u32 },
}

struct State {
    policy: RestartPolicy,
    restart_count: u64,
    backoff: Duration,
    active: bool,
}

/// Decides, per container, whether and when a stopped container should be
/// restarted. One instance per container; never shared across containers.
pub struct RestartManager {
    state: Mutex<State>,
    cancel_token: CancellationToken,
    // Separate from `state` so `cancel()` can stay synchronous and callable
    // from any context, matching the source's `Cancel()`.
    canceled: AtomicBool,
}

impl RestartManager {
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            state: Mutex::new(State {
                policy,
                restart_count: 0,
                backoff: Duration::ZERO,
                active: false,
            }),
            cancel_token: CancellationToken::new(),
            canceled: AtomicBool::new(false),
        }
    }

    pub async fn set_policy(&self, policy: RestartPolicy) {
        self.state.lock().await.policy = policy;
    }

    /// Idempotent. Marks the manager canceled and resolves any in-flight
    /// backoff wait to `RestartError::Canceled`.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
        self.cancel_token.cancel();
    }

    pub async fn restart_count(&self) -> u64 {
        self.state.lock().await.restart_count
    }

    #[cfg(test)]
    pub async fn current_backoff(&self) -> Duration {
        self.state.lock().await.backoff
    }

    /// `Ok(None)` means don't restart. `Ok(Some(rx))` means a restart was
    /// granted; `rx` resolves to `RestartError::Canceled` if cancellation
    /// raced the backoff wait, or is dropped once the backoff elapses.
    pub async fn should_restart(
        self: &Arc<Self>,
        exit_code: i32,
        manually_stopped: bool,
        execution_duration: Duration,
    ) -> Result<Option<oneshot::Receiver<RestartError>>, RestartError> {
        if matches!(self.state.lock().await.policy, RestartPolicy::Never) {
            return Ok(None);
        }

        if self.canceled.load(Ordering::SeqCst) {
            return Err(RestartError::Canceled);
        }

        let backoff = {
            let mut state = self.state.lock().await;

            if state.active {
                return Err(RestartError::AlreadyActive);
            }

            if execution_duration >= LONG_RUN_THRESHOLD {
                state.backoff = Duration::ZERO;
            }
            state.backoff = if state.backoff.is_zero() {
                DEFAULT_BACKOFF
            } else {
                state.backoff * BACKOFF_MULTIPLIER
            };

            let restart = match state.policy {
                RestartPolicy::Never => false,
                RestartPolicy::Always => true,
                RestartPolicy::UnlessStopped => !manually_stopped,
                RestartPolicy::OnFailure { max_retries } => {
                    exit_code != 0
                        && (max_retries == 0 || state.restart_count < max_retries as u64)
                }
            };

            if !restart {
                state.active = false;
                return Ok(None);
            }

            state.restart_count += 1;
            state.active = true;
            state.backoff
        };

        let (tx, rx) = oneshot::channel();
        let manager = Arc::clone(self);
        let token = self.cancel_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    let _ = tx.send(RestartError::Canceled);
                }
                _ = tokio::time::sleep(backoff) => {
                    manager.state.lock().await.active = false;
                    drop(tx);
                }
            }
        });

        Ok(Some(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn s1_backoff_doubling() {
        let manager = Arc::new(RestartManager::new(RestartPolicy::OnFailure {
            max_retries: 0,
        }));
        let expected_ms = [100u64, 200, 400, 800, 1600];

        for (i, &ms) in expected_ms.iter().enumerate() {
            let rx = manager
                .should_restart(1, false, Duration::from_secs(1))
                .await
                .unwrap()
                .expect("on-failure policy with nonzero exit should restart");
            assert_eq!(manager.current_backoff().await, Duration::from_millis(ms));

            tokio::time::advance(Duration::from_millis(ms) + Duration::from_millis(1)).await;
            let result = rx.await;
            assert!(
                result.is_err(),
                "receiver should close without a value once backoff elapses (iteration {i})"
            );
            assert_eq!(manager.restart_count().await, (i + 1) as u64);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn s2_long_run_resets_backoff() {
        let manager = Arc::new(RestartManager::new(RestartPolicy::Always));

        let rx1 = manager
            .should_restart(0, false, Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(manager.current_backoff().await, Duration::from_millis(100));
        tokio::time::advance(Duration::from_millis(101)).await;
        let _ = rx1.await;

        let rx2 = manager
            .should_restart(0, false, Duration::from_secs(15))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(manager.current_backoff().await, Duration::from_millis(100));
        tokio::time::advance(Duration::from_millis(101)).await;
        let _ = rx2.await;
    }

    #[tokio::test]
    async fn s3_cancellation_races_timer() {
        let manager = Arc::new(RestartManager::new(RestartPolicy::Always));
        let rx = manager
            .should_restart(0, false, Duration::ZERO)
            .await
            .unwrap()
            .unwrap();

        manager.cancel();

        let result = rx.await.expect("channel should deliver the cancellation");
        assert_eq!(result, RestartError::Canceled);

        let err = manager
            .should_restart(0, false, Duration::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err, RestartError::Canceled);
    }

    #[tokio::test]
    async fn s4_unless_stopped_honors_manual_stop() {
        let manager = Arc::new(RestartManager::new(RestartPolicy::UnlessStopped));
        let result = manager
            .should_restart(137, true, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(manager.restart_count().await, 0);
    }

    #[tokio::test]
    async fn never_policy_is_pure() {
        let manager = Arc::new(RestartManager::new(RestartPolicy::Never));
        let result = manager
            .should_restart(1, false, Duration::from_secs(100))
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(manager.restart_count().await, 0);
    }

    #[tokio::test]
    async fn on_failure_never_restarts_on_success_exit() {
        let manager = Arc::new(RestartManager::new(RestartPolicy::OnFailure {
            max_retries: 0,
        }));
        let result = manager
            .should_restart(0, false, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn on_failure_unbounded_restarts_forever() {
        let manager = Arc::new(RestartManager::new(RestartPolicy::OnFailure {
            max_retries: 0,
        }));
        for i in 0..10 {
            let rx = manager
                .should_restart(1, false, Duration::from_secs(1))
                .await
                .unwrap()
                .unwrap_or_else(|| panic!("expected a restart at iteration {i}"));
            tokio::time::advance(Duration::from_secs(2)).await;
            let _ = rx.await;
        }
        assert_eq!(manager.restart_count().await, 10);
    }

    #[tokio::test]
    async fn double_should_restart_is_invalid_state() {
        let manager = Arc::new(RestartManager::new(RestartPolicy::Always));
        let _rx = manager
            .should_restart(0, false, Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        let err = manager
            .should_restart(0, false, Duration::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err, RestartError::AlreadyActive);
    }
}
