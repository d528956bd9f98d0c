use std::path::PathBuf;

use futures_util::TryStreamExt;
use time::OffsetDateTime;
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;

use super::proto::runtime_daemon_client::RuntimeDaemonClient;
use super::proto::{EventsRequest, PingRequest};
use super::{to_prost_timestamp, DaemonClient, Event, EventStream};
use crate::error::SupervisorError;

/// Dials the runtime daemon over a Unix-domain socket, mirroring the
/// source's custom `grpc.WithDialer`.
#[derive(Clone)]
pub struct TonicDaemonClient {
    inner: RuntimeDaemonClient<Channel>,
}

impl TonicDaemonClient {
    pub async fn connect(socket_path: PathBuf) -> Result<Self, SupervisorError> {
        let dial_path = socket_path.clone();
        let channel = Endpoint::try_from("http://[::]:50051")
            .expect("static placeholder uri is always valid")
            .connect_with_connector(service_fn(move |_: Uri| {
                let path = dial_path.clone();
                async move { UnixStream::connect(path).await }
            }))
            .await
            .map_err(|source| SupervisorError::Dial {
                path: socket_path,
                source,
            })?;

        Ok(Self {
            inner: RuntimeDaemonClient::new(channel),
        })
    }
}

#[async_trait::async_trait]
impl DaemonClient for TonicDaemonClient {
    async fn events(&self, since: OffsetDateTime) -> Result<EventStream, SupervisorError> {
        let mut client = self.inner.clone();
        let response = client
            .events(EventsRequest {
                since: Some(to_prost_timestamp(since)),
            })
            .await?;

        let stream = response
            .into_inner()
            .map_err(SupervisorError::from)
            .and_then(|raw| async move { Event::try_from(raw) });

        Ok(Box::pin(stream))
    }

    async fn ping(&self) -> Result<(), SupervisorError> {
        let mut client = self.inner.clone();
        client.ping(PingRequest {}).await?;
        Ok(())
    }
}
