use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use zapgate_core::{EventId, EventKind, SessionId};
use zapgate_telemetry::metrics::{
    MetricsRecorder, WEBHOOK_DELIVERED_TOTAL, WEBHOOK_FAILED_TOTAL, WEBHOOK_RETRIES_TOTAL,
};

use crate::error::DeliveryError;
use crate::retry::RetryPolicy;
use crate::serializer::WebhookPayload;

/// One payload bound for one destination.
#[derive(Clone, Debug)]
pub struct WebhookEvent {
    pub id: EventId,
    pub kind: EventKind,
    pub session_id: SessionId,
    pub timestamp: i64,
    pub data: WebhookPayload,
    pub url: String,
    pub retry_count: u32,
}

impl WebhookEvent {
    pub fn new(kind: EventKind, payload: WebhookPayload, url: impl Into<String>) -> Self {
        Self {
            id: payload.metadata.event_id.clone(),
            kind,
            session_id: payload.session_id.clone(),
            timestamp: payload.timestamp,
            data: payload,
            url: url.into(),
            retry_count: 0,
        }
    }
}

/// Outcome of a successful delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub attempts: u32,
    pub status: u16,
}

/// POSTs payloads with bounded retry. Events that exhaust the policy are
/// dropped; nothing is persisted for later redelivery.
pub struct WebhookDispatcher {
    client: reqwest::Client,
    policy: RetryPolicy,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl WebhookDispatcher {
    pub fn new(timeout: Duration, policy: RetryPolicy) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("zapgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DeliveryError::Client(e.to_string()))?;
        Ok(Self {
            client,
            policy,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Deliver to `event.url`, retrying retryable failures.
    pub async fn send(&self, mut event: WebhookEvent) -> Result<Delivery, DeliveryError> {
        let url = validate_url(&event.url)?;

        loop {
            let attempt = event.retry_count + 1;
            match self.post(&url, &event).await {
                Ok(status) => {
                    self.count(WEBHOOK_DELIVERED_TOTAL);
                    debug!(
                        session_id = %event.session_id,
                        event_id = %event.id,
                        kind = %event.kind,
                        url = %event.url,
                        attempt,
                        status,
                        "webhook delivered"
                    );
                    return Ok(Delivery {
                        attempts: attempt,
                        status,
                    });
                }
                Err(err) if err.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_for_retry(attempt);
                    self.count(WEBHOOK_RETRIES_TOTAL);
                    warn!(
                        session_id = %event.session_id,
                        event_id = %event.id,
                        url = %event.url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "webhook delivery failed, retrying"
                    );
                    event.retry_count += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    self.count(WEBHOOK_FAILED_TOTAL);
                    warn!(
                        session_id = %event.session_id,
                        event_id = %event.id,
                        kind = %event.kind,
                        url = %event.url,
                        attempts = attempt,
                        error_kind = err.error_kind(),
                        error = %err,
                        "webhook delivery failed, dropping event"
                    );
                    return Err(err);
                }
            }
        }
    }

    async fn post(&self, url: &reqwest::Url, event: &WebhookEvent) -> Result<u16, DeliveryError> {
        let response = self
            .client
            .post(url.clone())
            .header("X-Zapgate-Event-Id", event.id.as_str())
            .json(&event.data)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport {
                url: event.url.clone(),
                reason: e.to_string(),
                timeout: e.is_timeout(),
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(DeliveryError::Status {
                url: event.url.clone(),
                status: status.as_u16(),
            })
        }
    }

    fn count(&self, name: &str) {
        if let Some(m) = &self.metrics {
            m.increment(name, 1);
        }
    }
}

fn validate_url(raw: &str) -> Result<reqwest::Url, DeliveryError> {
    let url = reqwest::Url::parse(raw.trim()).map_err(|e| DeliveryError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(DeliveryError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme {other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::EventSerializer;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use zapgate_core::TransportEvent;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Duration::from_millis(10),
            Duration::from_millis(40),
            2.0,
            0.0,
        )
    }

    fn dispatcher(max_attempts: u32) -> (WebhookDispatcher, Arc<MetricsRecorder>) {
        let metrics = Arc::new(MetricsRecorder::new());
        let dispatcher = WebhookDispatcher::new(Duration::from_secs(2), fast_policy(max_attempts))
            .unwrap()
            .with_metrics(metrics.clone());
        (dispatcher, metrics)
    }

    fn event(url: String) -> WebhookEvent {
        let payload = EventSerializer
            .serialize(&SessionId::from_raw("sess_hook"), &TransportEvent::Connected)
            .unwrap();
        WebhookEvent::new(EventKind::Connected, payload, url)
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt_after_two_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .with_priority(2)
            .expect(1)
            .mount(&server)
            .await;

        let (dispatcher, metrics) = dispatcher(5);
        let delivery = dispatcher
            .send(event(format!("{}/hook", server.uri())))
            .await
            .unwrap();

        assert_eq!(delivery, Delivery { attempts: 3, status: 200 });
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
        assert_eq!(metrics.counter(WEBHOOK_DELIVERED_TOTAL), 1);
        assert_eq!(metrics.counter(WEBHOOK_RETRIES_TOTAL), 2);
        assert_eq!(metrics.counter(WEBHOOK_FAILED_TOTAL), 0);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let (dispatcher, metrics) = dispatcher(3);
        let err = dispatcher
            .send(event(format!("{}/hook", server.uri())))
            .await
            .unwrap_err();

        assert!(matches!(err, DeliveryError::Status { status: 500, .. }));
        assert_eq!(metrics.counter(WEBHOOK_FAILED_TOTAL), 1);
        assert_eq!(metrics.counter(WEBHOOK_RETRIES_TOTAL), 2);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let (dispatcher, _) = dispatcher(5);
        let err = dispatcher
            .send(event(format!("{}/missing", server.uri())))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn posts_payload_json_with_event_id_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header_exists("X-Zapgate-Event-Id"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let (dispatcher, _) = dispatcher(1);
        let event = event(format!("{}/hook", server.uri()));
        let event_id = event.id.clone();
        dispatcher.send(event).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["event"], "Connected");
        assert_eq!(body["session_id"], "sess_hook");
        assert_eq!(body["metadata"]["eventID"], event_id.as_str());
    }

    #[tokio::test]
    async fn unreachable_destination_is_a_transport_error() {
        let (dispatcher, _) = dispatcher(2);
        let err = dispatcher
            .send(event("http://127.0.0.1:9/hook".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Transport { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn invalid_url_fails_without_request() {
        let (dispatcher, metrics) = dispatcher(3);
        let err = dispatcher.send(event("ftp://hooks".into())).await.unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidUrl { .. }));
        assert_eq!(metrics.counter(WEBHOOK_RETRIES_TOTAL), 0);
    }
}
