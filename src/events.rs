//! Event Pump: subscribes to the runtime daemon's event stream from the
//! watermark, dispatches each event to the owning container, and persists
//! progress after dispatch (at-least-once delivery).

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;

use crate::registry::Client;
use crate::rpc::Event;
use crate::supervisor::SupervisorInner;

const RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(1);

pub async fn run(sup: Arc<SupervisorInner>) {
    loop {
        let since = sup.watermark().load();

        let mut stream = match sup.daemon_client().events(since).await {
            Ok(stream) => stream,
            Err(err) => {
                log::error!("failed to subscribe to runtime daemon events: {err}");
                tokio::time::sleep(RESUBSCRIBE_BACKOFF).await;
                continue;
            }
        };

        loop {
            match stream.next().await {
                Some(Ok(event)) => {
                    let clients = sup.clients_snapshot();
                    dispatch_to_clients(&clients, &event).await;
                    sup.watermark().persist(event.timestamp);
                }
                Some(Err(err)) => {
                    if sup.is_exiting() && is_connection_closing(&err) {
                        return;
                    }
                    log::error!("runtime daemon event stream error, resubscribing: {err}");
                    break;
                }
                None => {
                    if sup.is_exiting() {
                        return;
                    }
                    log::warn!("runtime daemon event stream ended, resubscribing");
                    break;
                }
            }
        }
    }
}

pub(crate) async fn dispatch_to_clients(clients: &[Arc<Client>], event: &Event) {
    let container = clients.iter().find_map(|client| client.get(&event.container_id).ok());

    match container {
        Some(container) => {
            if let Err(err) = container.handle_event(event).await {
                log::error!(container_id = event.container_id.as_str(); "error processing event: {err}");
            }
        }
        None => {
            log::warn!(container_id = event.container_id.as_str(); "unknown container");
        }
    }
}

fn is_connection_closing(err: &crate::error::SupervisorError) -> bool {
    matches!(
        err,
        crate::error::SupervisorError::Rpc(status)
            if matches!(status.code(), tonic::Code::Unavailable | tonic::Code::Cancelled)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ContainerBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::OffsetDateTime;

    struct CountingBackend(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl ContainerBackend for CountingBackend {
        async fn handle_event(
            &self,
            _container: &crate::registry::Container,
            _event: &Event,
        ) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn event(id: &str) -> Event {
        Event {
            container_id: id.to_string(),
            kind: crate::rpc::EventKind::Start,
            timestamp: OffsetDateTime::now_utc(),
            exit_code: None,
        }
    }

    #[tokio::test]
    async fn dispatches_to_the_client_that_owns_the_container() {
        let hits = Arc::new(AtomicUsize::new(0));
        let client_a = Client::new(Arc::new(CountingBackend(Arc::clone(&hits))));
        let client_b = Client::new(Arc::new(CountingBackend(Arc::new(AtomicUsize::new(0)))));
        client_a.append("known").await;

        dispatch_to_clients(&[client_b, client_a], &event("known")).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_container_is_logged_and_does_not_panic() {
        let client = Client::new(Arc::new(CountingBackend(Arc::new(AtomicUsize::new(0)))));
        dispatch_to_clients(&[client], &event("missing")).await;
    }

    #[tokio::test]
    async fn pump_dispatches_and_persists_watermark_then_stops_on_exit() {
        use crate::rpc::fake::FakeDaemonClient;
        use tokio::sync::{mpsc, Notify};

        struct NotifyingBackend(Arc<Notify>);

        #[async_trait::async_trait]
        impl ContainerBackend for NotifyingBackend {
            async fn handle_event(
                &self,
                _container: &crate::registry::Container,
                _event: &Event,
            ) -> anyhow::Result<()> {
                self.0.notify_one();
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let notify = Arc::new(Notify::new());

        let (tx, rx) = mpsc::channel(4);
        let fake: Arc<dyn crate::rpc::DaemonClient> = Arc::new(FakeDaemonClient::new(rx));
        let sup = SupervisorInner::new_for_test(fake, dir.path().join("event.ts"));

        let client = Client::new(Arc::new(NotifyingBackend(Arc::clone(&notify))));
        client.append("c1").await;
        sup.register_client_for_test(client);

        let ts = OffsetDateTime::now_utc();
        tx.send(Ok(event("c1"))).await.unwrap();
        let sent_ts = ts;

        let handle = tokio::spawn(run(Arc::clone(&sup)));

        tokio::time::timeout(std::time::Duration::from_secs(2), notify.notified())
            .await
            .expect("event should be dispatched to the owning container");

        // Give the loop a moment to persist after dispatch.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let persisted = sup.watermark().load();
        assert_eq!(persisted.unix_timestamp(), sent_ts.unix_timestamp());

        sup.mark_exiting_for_test();
        drop(tx);
        let _ = tokio::time::timeout(std::time::Duration::from_secs(1), handle).await;
    }
}
