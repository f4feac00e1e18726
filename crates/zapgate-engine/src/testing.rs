//! Shared fixtures for the engine's unit tests.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use zapgate_core::{
    ClientOptions, Device, ProtocolBackend, Session, SessionId, SessionStatus, TransportEvent,
};
use zapgate_store::{Database, DeviceRepo, DeviceStore, SessionRepo, SessionStore};
use zapgate_webhook::{EventPipeline, RetryPolicy, WebhookDispatcher};

use crate::factory::ClientFactory;
use crate::handle::ConnectionHandle;
use crate::manager::SessionManager;
use crate::registry::SessionRegistry;
use crate::simulated::{SimulatedBackend, SimulatedClient};

pub(crate) struct Fixture {
    pub backend: Arc<SimulatedBackend>,
    pub sessions: Arc<SessionRepo>,
    pub devices: Arc<DeviceRepo>,
    pub registry: Arc<SessionRegistry>,
}

impl Fixture {
    pub fn new() -> Self {
        let db = Database::in_memory().unwrap();
        Self {
            backend: Arc::new(SimulatedBackend::new()),
            sessions: Arc::new(SessionRepo::new(db.clone())),
            devices: Arc::new(DeviceRepo::new(db)),
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    pub fn pipeline(&self) -> Arc<EventPipeline> {
        let policy = RetryPolicy::new(
            2,
            Duration::from_millis(5),
            Duration::from_millis(10),
            2.0,
            0.0,
        );
        let dispatcher = WebhookDispatcher::new(Duration::from_secs(2), policy).unwrap();
        Arc::new(EventPipeline::new(Arc::new(dispatcher)))
    }

    pub fn factory(&self) -> ClientFactory {
        ClientFactory::new(
            self.backend.clone(),
            self.sessions.clone(),
            self.devices.clone(),
            self.registry.clone(),
            self.pipeline(),
        )
    }

    pub fn manager(&self) -> Arc<SessionManager> {
        Arc::new(SessionManager::new(
            self.sessions.clone(),
            self.devices.clone(),
            self.backend.clone(),
            self.registry.clone(),
            self.pipeline(),
        ))
    }

    pub fn session_named(&self, name: &str) -> Session {
        let session = Session::new(name);
        self.sessions.create(&session).unwrap();
        session
    }

    /// A stored session that already completed pairing.
    pub fn paired_session(&self, name: &str, jid: &str) -> Session {
        let mut device = Device::new();
        device.jid = Some(jid.to_string());
        self.devices.save_device(&device).unwrap();

        let mut session = Session::new(name);
        session.device_jid = jid.to_string();
        self.sessions.create(&session).unwrap();
        session
    }

    /// A handle built directly, without a pump. Events posted by the handle
    /// land in the returned receiver.
    pub async fn handle(
        &self,
        name: &str,
    ) -> (Arc<ConnectionHandle>, mpsc::UnboundedReceiver<TransportEvent>) {
        let session = self.session_named(name);
        self.handle_for_session(&session).await
    }

    pub async fn paired_handle(
        &self,
        name: &str,
        jid: &str,
    ) -> (Arc<ConnectionHandle>, mpsc::UnboundedReceiver<TransportEvent>) {
        let session = self.paired_session(name, jid);
        self.handle_for_session(&session).await
    }

    async fn handle_for_session(
        &self,
        session: &Session,
    ) -> (Arc<ConnectionHandle>, mpsc::UnboundedReceiver<TransportEvent>) {
        let device = if session.has_device_identity() {
            self.devices.get_device(&session.device_jid).unwrap().unwrap()
        } else {
            self.devices.new_device().unwrap()
        };
        let options = ClientOptions {
            session_id: session.id.clone(),
            proxy: None,
        };
        let client = self.backend.create_client(&device, &options).await.unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(
            session.id.clone(),
            client,
            device,
            tx,
            self.sessions.clone(),
            self.devices.clone(),
        );
        (Arc::new(handle), rx)
    }

    pub fn session(&self, id: &SessionId) -> Session {
        self.sessions.get_by_id(id).unwrap()
    }

    pub fn stored_status(&self, id: &SessionId) -> SessionStatus {
        self.session(id).status
    }

    pub async fn wait_for_status(&self, id: &SessionId, status: SessionStatus) {
        for _ in 0..400 {
            if self.stored_status(id) == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "session {id} never reached {status}, still {}",
            self.stored_status(id)
        );
    }
}

/// Bare handle over a fresh simulated client, for registry bookkeeping tests.
pub(crate) fn handle_for(id: &SessionId) -> Arc<ConnectionHandle> {
    let db = Database::in_memory().unwrap();
    let client = Arc::new(SimulatedClient::new(id.clone(), None));
    let (tx, _rx) = mpsc::unbounded_channel();
    Arc::new(ConnectionHandle::new(
        id.clone(),
        client,
        Device::new(),
        tx,
        Arc::new(SessionRepo::new(db.clone())),
        Arc::new(DeviceRepo::new(db)),
    ))
}
