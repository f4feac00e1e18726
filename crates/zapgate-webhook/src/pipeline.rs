use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use zapgate_core::{Session, TransportEvent};
use zapgate_telemetry::metrics::{MetricsRecorder, WEBHOOK_SERIALIZE_ERRORS_TOTAL};

use crate::dispatcher::{WebhookDispatcher, WebhookEvent};
use crate::filter::EventFilter;
use crate::serializer::EventSerializer;

/// Filter, serialize and dispatch one transport event for one session.
///
/// Each destination is delivered on its own task; `process` never waits
/// on HTTP.
#[derive(Clone)]
pub struct EventPipeline {
    filter: EventFilter,
    serializer: EventSerializer,
    dispatcher: Arc<WebhookDispatcher>,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl EventPipeline {
    pub fn new(dispatcher: Arc<WebhookDispatcher>) -> Self {
        Self {
            filter: EventFilter,
            serializer: EventSerializer,
            dispatcher,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns the spawned delivery tasks; callers may ignore them.
    pub fn process(&self, session: &Session, event: &TransportEvent) -> Vec<JoinHandle<()>> {
        let kind = event.kind();
        let destinations = self.filter.destinations(&session.webhook, &kind);
        if destinations.is_empty() {
            return Vec::new();
        }

        let payload = match self.serializer.serialize(&session.id, event) {
            Ok(payload) => payload,
            Err(err) => {
                if let Some(m) = &self.metrics {
                    m.increment(WEBHOOK_SERIALIZE_ERRORS_TOTAL, 1);
                }
                warn!(session_id = %session.id, kind = %kind, error = %err, "dropping unserializable event");
                return Vec::new();
            }
        };

        destinations
            .into_iter()
            .map(|dest| {
                let dispatcher = self.dispatcher.clone();
                let event = WebhookEvent::new(kind.clone(), payload.clone(), dest.url);
                debug!(
                    session_id = %event.session_id,
                    event_id = %event.id,
                    kind = %event.kind,
                    role = ?dest.role,
                    "queueing webhook"
                );
                tokio::spawn(async move {
                    // Failures are already logged and counted by the dispatcher.
                    let _ = dispatcher.send(event).await;
                })
            })
            .collect()
    }
}
