//! Minimal gRPC client for the runtime daemon's `Events` subscription and
//! liveness `Ping`, generated from a checked-in `.proto`. Consumers depend
//! on the [`DaemonClient`] trait rather than the concrete transport, so
//! tests can substitute an in-memory fake.

mod client;
mod proto;

pub use client::TonicDaemonClient;

use std::pin::Pin;

use futures_core::Stream;
use time::OffsetDateTime;

use crate::error::SupervisorError;

/// The kind of lifecycle transition a runtime daemon event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Unspecified,
    Create,
    Start,
    Stop,
    Die,
    Oom,
    ExecAdded,
    Pause,
    Resume,
}

impl From<proto::EventKind> for EventKind {
    fn from(kind: proto::EventKind) -> Self {
        match kind {
            proto::EventKind::Unspecified => EventKind::Unspecified,
            proto::EventKind::Create => EventKind::Create,
            proto::EventKind::Start => EventKind::Start,
            proto::EventKind::Stop => EventKind::Stop,
            proto::EventKind::Die => EventKind::Die,
            proto::EventKind::Oom => EventKind::Oom,
            proto::EventKind::ExecAdded => EventKind::ExecAdded,
            proto::EventKind::Pause => EventKind::Pause,
            proto::EventKind::Resume => EventKind::Resume,
        }
    }
}

/// A lifecycle event for one container: `(container-ID, kind, timestamp)`,
/// plus the exit code the daemon attaches to `Die` events.
#[derive(Debug, Clone)]
pub struct Event {
    pub container_id: String,
    pub kind: EventKind,
    pub timestamp: OffsetDateTime,
    pub exit_code: Option<i32>,
}

impl TryFrom<proto::Event> for Event {
    type Error = SupervisorError;

    fn try_from(raw: proto::Event) -> Result<Self, Self::Error> {
        let timestamp = raw
            .timestamp
            .ok_or_else(|| SupervisorError::MalformedEvent("missing timestamp".into()))?;
        Ok(Event {
            container_id: raw.container_id,
            kind: proto::EventKind::from_i32(raw.kind)
                .unwrap_or(proto::EventKind::Unspecified)
                .into(),
            timestamp: from_prost_timestamp(timestamp)?,
            exit_code: raw.exit_code,
        })
    }
}

pub(crate) fn to_prost_timestamp(ts: OffsetDateTime) -> prost_types::Timestamp {
    prost_types::Timestamp {
        seconds: ts.unix_timestamp(),
        nanos: ts.nanosecond() as i32,
    }
}

pub(crate) fn from_prost_timestamp(
    ts: prost_types::Timestamp,
) -> Result<OffsetDateTime, SupervisorError> {
    OffsetDateTime::from_unix_timestamp(ts.seconds)
        .map(|dt| dt + time::Duration::nanoseconds(ts.nanos as i64))
        .map_err(|err| SupervisorError::MalformedEvent(err.to_string()))
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event, SupervisorError>> + Send>>;

/// The runtime daemon's RPC surface this crate depends on — an interface
/// so the supervisor and event pump never depend on the concrete
/// transport, mirroring the source's `containerd.APIClient` boundary.
#[async_trait::async_trait]
pub trait DaemonClient: Send + Sync {
    async fn events(&self, since: OffsetDateTime) -> Result<EventStream, SupervisorError>;
    async fn ping(&self) -> Result<(), SupervisorError>;

    /// Closes the RPC connection. The default is a no-op; `tonic`'s
    /// `Channel` has no explicit close, so tearing it down is a matter of
    /// dropping the last handle to it, which callers do after calling this.
    async fn close(&self) {}
}

/// Stands in for a `DaemonClient` once the real one has been closed, so the
/// supervisor always has something non-panicking to hand back.
pub(crate) struct ClosedDaemonClient;

#[async_trait::async_trait]
impl DaemonClient for ClosedDaemonClient {
    async fn events(&self, _since: OffsetDateTime) -> Result<EventStream, SupervisorError> {
        Err(SupervisorError::Rpc(tonic::Status::unavailable(
            "runtime daemon connection is closed",
        )))
    }

    async fn ping(&self) -> Result<(), SupervisorError> {
        Err(SupervisorError::Rpc(tonic::Status::unavailable(
            "runtime daemon connection is closed",
        )))
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;
    use tokio_stream::StreamExt;

    /// An in-memory `DaemonClient` used to exercise the event pump without
    /// a real runtime daemon. `ping` fails once `fail_pings` is set.
    pub struct FakeDaemonClient {
        events: tokio::sync::Mutex<Option<mpsc::Receiver<Result<Event, SupervisorError>>>>,
        fail_pings: AtomicBool,
    }

    impl FakeDaemonClient {
        pub fn new(rx: mpsc::Receiver<Result<Event, SupervisorError>>) -> Self {
            Self {
                events: tokio::sync::Mutex::new(Some(rx)),
                fail_pings: AtomicBool::new(false),
            }
        }

        pub fn set_fail_pings(&self, fail: bool) {
            self.fail_pings.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl DaemonClient for FakeDaemonClient {
        async fn events(&self, _since: OffsetDateTime) -> Result<EventStream, SupervisorError> {
            let rx = self
                .events
                .lock()
                .await
                .take()
                .expect("fake only supports a single subscription");
            Ok(Box::pin(ReceiverStream::new(rx).map(|item| item)))
        }

        async fn ping(&self) -> Result<(), SupervisorError> {
            if self.fail_pings.load(Ordering::SeqCst) {
                Err(SupervisorError::Rpc(tonic::Status::unavailable("fake ping failure")))
            } else {
                Ok(())
            }
        }
    }
}
