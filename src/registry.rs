//! Thread-safe map from container ID to container handle, and the
//! `ContainerBackend` collaborator that consumes dispatched events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};

use time::OffsetDateTime;

use crate::error::SupervisorError;
use crate::keyed_lock::KeyedLockTable;
use crate::rpc::Event;

/// The higher-level engine that owns containers and consumes lifecycle
/// notifications. Handlers return either success or an error and must be
/// reentrant-safe with respect to other containers; they must also be
/// idempotent per (container-ID, event-kind, timestamp), since the event
/// pump delivers at-least-once.
#[async_trait::async_trait]
pub trait ContainerBackend: Send + Sync {
    async fn handle_event(&self, container: &Container, event: &Event) -> anyhow::Result<()>;
}

#[derive(Debug, Default, Clone)]
pub struct ContainerState {
    pub last_exit_code: Option<i32>,
    pub last_event_at: Option<OffsetDateTime>,
}

/// A single container's bookkeeping plus a back-reference to the client
/// (and therefore the backend) that owns it.
pub struct Container {
    id: String,
    client: Weak<Client>,
    state: Mutex<ContainerState>,
}

impl Container {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ContainerState {
        self.state.lock().unwrap().clone()
    }

    pub async fn handle_event(&self, event: &Event) -> anyhow::Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.last_event_at = Some(event.timestamp);
            if let Some(code) = event.exit_code {
                state.last_exit_code = Some(code);
            }
        }

        let Some(client) = self.client.upgrade() else {
            return Ok(());
        };
        client.backend.handle_event(self, event).await
    }
}

/// A client's registry of containers, guarded by a keyed lock for
/// insert/remove and a readers-writer lock for iteration.
pub struct Client {
    backend: Arc<dyn ContainerBackend>,
    containers: RwLock<HashMap<String, Arc<Container>>>,
    locker: KeyedLockTable,
    live_restore: bool,
}

impl Client {
    pub fn new(backend: Arc<dyn ContainerBackend>) -> Arc<Self> {
        Self::with_live_restore(backend, false)
    }

    /// `live_restore` mirrors the supervisor's own option of the same name:
    /// when set, this client's containers are expected to keep running
    /// across a supervisor restart rather than being torn down with it.
    pub fn with_live_restore(backend: Arc<dyn ContainerBackend>, live_restore: bool) -> Arc<Self> {
        Arc::new(Self {
            backend,
            containers: RwLock::new(HashMap::new()),
            locker: KeyedLockTable::new(),
            live_restore,
        })
    }

    pub fn live_restore(&self) -> bool {
        self.live_restore
    }

    pub async fn append(self: &Arc<Self>, id: impl Into<String>) -> Arc<Container> {
        let id = id.into();
        let _guard = self.locker.lock(&id).await;
        let container = Arc::new(Container {
            id: id.clone(),
            client: Arc::downgrade(self),
            state: Mutex::new(ContainerState::default()),
        });
        self.containers
            .write()
            .unwrap()
            .insert(id, Arc::clone(&container));
        container
    }

    pub async fn delete(&self, id: &str) {
        let _guard = self.locker.lock(id).await;
        self.containers.write().unwrap().remove(id);
    }

    pub fn get(&self, id: &str) -> Result<Arc<Container>, SupervisorError> {
        self.containers
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| SupervisorError::UnknownContainer(id.to_string()))
    }
}
