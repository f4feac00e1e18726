use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn, Instrument};

use zapgate_core::{SessionStatus, TransportEvent};
use zapgate_store::SessionStore;
use zapgate_telemetry::metrics::{MetricsRecorder, TRANSPORT_EVENTS_TOTAL};
use zapgate_webhook::EventPipeline;

use crate::handle::ConnectionHandle;
use crate::registry::SessionRegistry;

/// Per-connection consumer of transport events. The single task is what
/// keeps one session's events in order.
pub(crate) struct EventPump {
    pub(crate) handle: Arc<ConnectionHandle>,
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) sessions: Arc<dyn SessionStore>,
    pub(crate) pipeline: Arc<EventPipeline>,
    pub(crate) metrics: Option<Arc<MetricsRecorder>>,
}

impl EventPump {
    pub(crate) fn spawn(self, rx: mpsc::UnboundedReceiver<TransportEvent>) -> JoinHandle<()> {
        let span = tracing::info_span!("event_pump", session_id = %self.handle.session_id());
        tokio::spawn(self.run(rx).instrument(span))
    }

    async fn run(self, mut rx: mpsc::UnboundedReceiver<TransportEvent>) {
        loop {
            tokio::select! {
                biased;
                event = rx.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                _ = self.handle.closed().cancelled() => {
                    while let Ok(event) = rx.try_recv() {
                        self.handle_event(event).await;
                    }
                    break;
                }
            }
        }
        debug!("event pump stopped");
    }

    async fn handle_event(&self, event: TransportEvent) {
        if let Some(m) = &self.metrics {
            m.increment(TRANSPORT_EVENTS_TOTAL, 1);
        }

        let session_id = self.handle.session_id();
        if self.handle.apply_transport_event(&event) == Some(SessionStatus::Disconnected)
            && self.registry.remove_if_same(session_id, &self.handle)
        {
            debug!(kind = %event.kind(), "connection ended, handle released");
            self.handle.release();
            self.handle.client().disconnect().await;
        }

        match self.sessions.get_by_id(session_id) {
            Ok(session) => {
                self.pipeline.process(&session, &event);
            }
            Err(e) => warn!(kind = %event.kind(), error = %e, "dropping event for unknown session"),
        }
    }
}
