use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use zapgate_core::{ClientOptions, Device, ProtocolBackend, Session, TransportEvent};
use zapgate_store::{DeviceStore, SessionStore};
use zapgate_telemetry::metrics::MetricsRecorder;
use zapgate_webhook::EventPipeline;

use crate::error::EngineError;
use crate::handle::ConnectionHandle;
use crate::pump::EventPump;
use crate::registry::SessionRegistry;

/// Builds connection handles: recovers or allocates the device identity,
/// asks the backend for a client, and wires the client's events into a
/// dedicated pump task.
pub struct ClientFactory {
    backend: Arc<dyn ProtocolBackend>,
    sessions: Arc<dyn SessionStore>,
    devices: Arc<dyn DeviceStore>,
    registry: Arc<SessionRegistry>,
    pipeline: Arc<EventPipeline>,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl ClientFactory {
    pub fn new(
        backend: Arc<dyn ProtocolBackend>,
        sessions: Arc<dyn SessionStore>,
        devices: Arc<dyn DeviceStore>,
        registry: Arc<SessionRegistry>,
        pipeline: Arc<EventPipeline>,
    ) -> Self {
        Self {
            backend,
            sessions,
            devices,
            registry,
            pipeline,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The returned handle is not registered; the caller decides.
    pub async fn create_client(&self, session: &Session) -> Result<Arc<ConnectionHandle>, EngineError> {
        let device = self.resolve_device(session)?;
        let options = ClientOptions {
            session_id: session.id.clone(),
            proxy: session.proxy.clone(),
        };
        let client = self.backend.create_client(&device, &options).await?;

        let (tx, rx) = mpsc::unbounded_channel::<TransportEvent>();
        let callback_tx = tx.clone();
        client.add_event_handler(Box::new(move |event| {
            let _ = callback_tx.send(event);
        }));

        let handle = Arc::new(
            ConnectionHandle::new(
                session.id.clone(),
                client,
                device,
                tx,
                Arc::clone(&self.sessions),
                Arc::clone(&self.devices),
            )
            .with_metrics(self.metrics.clone()),
        );

        EventPump {
            handle: Arc::clone(&handle),
            registry: Arc::clone(&self.registry),
            sessions: Arc::clone(&self.sessions),
            pipeline: Arc::clone(&self.pipeline),
            metrics: self.metrics.clone(),
        }
        .spawn(rx);

        debug!(session_id = %session.id, "client created");
        Ok(handle)
    }

    /// Known jid, then phone, then a fresh allocation. Only the allocation
    /// is allowed to fail.
    fn resolve_device(&self, session: &Session) -> Result<Device, EngineError> {
        if session.has_device_identity() {
            match self.devices.get_device(&session.device_jid) {
                Ok(Some(device)) => return Ok(device),
                Ok(None) => {
                    debug!(session_id = %session.id, jid = %session.device_jid, "no device for jid")
                }
                Err(e) => {
                    warn!(session_id = %session.id, jid = %session.device_jid, error = %e, "device lookup by jid failed")
                }
            }
        }

        if let Some(phone) = session.phone.as_deref().filter(|p| !p.is_empty()) {
            match self.devices.get_device_by_phone(phone) {
                Ok(Some(device)) => return Ok(device),
                Ok(None) => debug!(session_id = %session.id, "no device for phone"),
                Err(e) => {
                    warn!(session_id = %session.id, error = %e, "device lookup by phone failed")
                }
            }
        }

        let device = self
            .devices
            .new_device()
            .map_err(EngineError::DeviceAllocation)?;
        info!(session_id = %session.id, device_key = %device.key, "allocated new device");
        Ok(device)
    }
}
