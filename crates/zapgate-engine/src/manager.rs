use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn, Instrument};

use zapgate_core::{
    ProtocolBackend, ProxyConfig, QrStatus, Session, SessionId, SessionStatus, StatusTrigger,
    TransportError, WebhookConfig,
};
use zapgate_store::{DeviceStore, SessionStore};
use zapgate_telemetry::metrics::MetricsRecorder;
use zapgate_webhook::EventPipeline;

use crate::error::EngineError;
use crate::factory::ClientFactory;
use crate::handle::{ConnectionHandle, QrOutcome};
use crate::registry::SessionRegistry;

/// How a successful `connect` proceeded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectMode {
    /// Existing device identity, connected without pairing.
    Reconnected,
    /// No identity yet; a QR loop is running.
    Pairing,
}

/// A stored session together with its live connection state.
#[derive(Clone, Debug)]
pub struct SessionInfo {
    pub session: Session,
    pub live: bool,
    pub connected: bool,
    pub logged_in: bool,
    pub qr_active: bool,
}

/// Session lifecycle use cases over the store, the registry and the
/// protocol backend.
pub struct SessionManager {
    sessions: Arc<dyn SessionStore>,
    registry: Arc<SessionRegistry>,
    factory: ClientFactory,
}

impl SessionManager {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        devices: Arc<dyn DeviceStore>,
        backend: Arc<dyn ProtocolBackend>,
        registry: Arc<SessionRegistry>,
        pipeline: Arc<EventPipeline>,
    ) -> Self {
        let factory = ClientFactory::new(
            backend,
            Arc::clone(&sessions),
            devices,
            Arc::clone(&registry),
            pipeline,
        );
        Self {
            sessions,
            registry,
            factory,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.factory = self.factory.with_metrics(metrics);
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    pub fn create_session(
        &self,
        name: &str,
        webhook: WebhookConfig,
        proxy: Option<ProxyConfig>,
    ) -> Result<Session, EngineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::InvalidInput("session name is empty".into()));
        }
        if self.sessions.exists_by_name(name)? {
            return Err(EngineError::NameTaken(name.to_string()));
        }
        validate_webhook(&webhook)?;
        if let Some(proxy) = &proxy {
            proxy.validate()?;
        }

        let mut session = Session::new(name);
        session.webhook = webhook;
        session.proxy = proxy;
        self.sessions.create(&session)?;
        info!(session_id = %session.id, name, "session created");
        Ok(session)
    }

    pub fn info(&self, id: &SessionId) -> Result<SessionInfo, EngineError> {
        let session = self.sessions.get_by_id(id)?;
        Ok(self.describe(session))
    }

    pub fn list(&self) -> Result<Vec<SessionInfo>, EngineError> {
        let sessions = self.sessions.list()?;
        Ok(sessions.into_iter().map(|s| self.describe(s)).collect())
    }

    fn describe(&self, session: Session) -> SessionInfo {
        match self.registry.get(&session.id) {
            Some(handle) => SessionInfo {
                connected: handle.is_connected(),
                logged_in: handle.is_logged_in(),
                qr_active: handle.is_qr_active(),
                live: true,
                session,
            },
            None => SessionInfo {
                session,
                live: false,
                connected: false,
                logged_in: false,
                qr_active: false,
            },
        }
    }

    /// Connect a session, pairing through QR when it has no device identity.
    pub async fn connect(&self, id: &SessionId) -> Result<ConnectMode, EngineError> {
        let session = self.sessions.get_by_id(id)?;
        self.start(session, true).await
    }

    /// Direct reconnect of a previously paired session. Never pairs.
    pub async fn reconnect(&self, session: &Session) -> Result<(), EngineError> {
        if !session.has_device_identity() {
            return Err(EngineError::InvalidInput(format!(
                "session {} has no device identity",
                session.id
            )));
        }
        self.start(session.clone(), false).await.map(|_| ())
    }

    async fn start(&self, session: Session, allow_pairing: bool) -> Result<ConnectMode, EngineError> {
        // The registry is authoritative; a persisted active status without a
        // live handle is left over from an earlier process.
        if self.registry.get(&session.id).is_some() {
            return Err(EngineError::AlreadyActive(session.id));
        }
        if session.status.is_active() {
            debug!(session_id = %session.id, status = %session.status, "ignoring stale persisted status");
        }

        let handle = self.factory.create_client(&session).await?;
        if let Err(e) = self.registry.set(session.id.clone(), Arc::clone(&handle)) {
            handle.release();
            return Err(e);
        }
        if let Err(e) = handle.transition(StatusTrigger::ConnectRequested) {
            self.registry.remove_if_same(&session.id, &handle);
            handle.release();
            return Err(e.into());
        }

        let client = Arc::clone(handle.client());
        if client.device_jid().is_some() {
            if let Err(e) = client.connect().await {
                return Err(self.abort_connect(&handle, e).await);
            }
            if client.is_connected() {
                // The pump may have applied the transport's own event first.
                let _ = handle.transition(StatusTrigger::TransportConnected);
            }
            info!(session_id = %session.id, "reconnected with stored identity");
            return Ok(ConnectMode::Reconnected);
        }

        if !allow_pairing {
            return Err(self
                .abort_connect(&handle, TransportError::NotLoggedIn)
                .await);
        }

        let rx = match client.qr_channel().await {
            Ok(rx) => rx,
            Err(e) => return Err(self.abort_connect(&handle, e).await),
        };
        if let Err(e) = client.connect().await {
            return Err(self.abort_connect(&handle, e).await);
        }

        let ticket = handle.begin_qr_loop();
        let registry = Arc::clone(&self.registry);
        let span = tracing::info_span!("qr_loop", session_id = %session.id);
        tokio::spawn(
            async move {
                if let QrOutcome::Failed { reason } = handle.run_qr_loop(rx, ticket).await {
                    debug!(reason = %reason, "releasing connection after pairing failure");
                    registry.remove_if_same(handle.session_id(), &handle);
                    handle.client().disconnect().await;
                    handle.release();
                }
            }
            .instrument(span),
        );

        info!(session_id = %session.id, "pairing started");
        Ok(ConnectMode::Pairing)
    }

    async fn abort_connect(&self, handle: &Arc<ConnectionHandle>, err: TransportError) -> EngineError {
        warn!(session_id = %handle.session_id(), error = %err, "connect failed");
        handle.cancel_qr();
        self.registry.remove_if_same(handle.session_id(), handle);
        self.settle(handle, StatusTrigger::ConnectFailed);
        handle.client().disconnect().await;
        handle.release();
        EngineError::Transport(err)
    }

    /// Move the handle to `Disconnected` through `trigger`, making sure the
    /// store agrees even when the trigger does not apply.
    fn settle(&self, handle: &ConnectionHandle, trigger: StatusTrigger) {
        if let Err(e) = handle.transition(trigger) {
            debug!(session_id = %handle.session_id(), error = %e, "status already settled");
            if let Err(e) = self
                .sessions
                .update_status(handle.session_id(), SessionStatus::Disconnected)
            {
                warn!(session_id = %handle.session_id(), error = %e, "failed to persist status");
            }
        }
    }

    async fn teardown(&self, handle: &Arc<ConnectionHandle>, trigger: StatusTrigger) {
        handle.cancel_qr();
        self.settle(handle, trigger);
        self.registry.remove_if_same(handle.session_id(), handle);
        handle.client().disconnect().await;
        handle.release();
    }

    fn live_handle(&self, id: &SessionId) -> Result<Arc<ConnectionHandle>, EngineError> {
        self.sessions.get_by_id(id)?;
        self.registry
            .get(id)
            .ok_or_else(|| EngineError::NotConnected(id.clone()))
    }

    /// Close the connection and keep the device identity.
    pub async fn disconnect(&self, id: &SessionId) -> Result<(), EngineError> {
        let handle = self.live_handle(id)?;
        self.teardown(&handle, StatusTrigger::ExplicitDisconnect).await;
        info!(session_id = %id, "session disconnected");
        Ok(())
    }

    /// Unlink the device and close the connection. A failed remote logout
    /// leaves the connection in place.
    pub async fn logout(&self, id: &SessionId) -> Result<(), EngineError> {
        let handle = self.live_handle(id)?;
        handle.cancel_qr();
        if handle.is_logged_in() {
            handle.client().logout().await?;
        }
        handle.clear_identity();
        self.teardown(&handle, StatusTrigger::ExplicitLogout).await;
        info!(session_id = %id, "session logged out");
        Ok(())
    }

    pub fn get_qr(&self, id: &SessionId) -> Result<QrStatus, EngineError> {
        self.sessions.get_by_id(id)?;
        let Some(handle) = self.registry.get(id) else {
            return Ok(QrStatus::SessionNotConnected);
        };
        if handle.is_logged_in() {
            return Ok(QrStatus::AlreadyLoggedIn);
        }
        if !handle.is_qr_active() {
            return Ok(QrStatus::QrNotActive);
        }
        Ok(match handle.take_qr_code() {
            Some(code) => QrStatus::QrActive { code },
            None => QrStatus::QrPending,
        })
    }

    /// Request a phone linking code for a connected, unpaired session.
    pub async fn pair_phone(&self, id: &SessionId, phone: &str) -> Result<String, EngineError> {
        let phone = normalize_phone(phone)?;
        let handle = self.live_handle(id)?;
        if handle.is_logged_in() {
            return Err(EngineError::AlreadyLoggedIn(id.clone()));
        }

        let code = handle.client().pair_phone(&phone).await?;
        let mut session = self.sessions.get_by_id(id)?;
        session.phone = Some(phone);
        self.sessions.update(&session)?;
        info!(session_id = %id, "linking code issued");
        Ok(code)
    }

    /// Takes effect on the next connect.
    pub fn set_proxy(&self, id: &SessionId, proxy: Option<ProxyConfig>) -> Result<Session, EngineError> {
        if let Some(proxy) = &proxy {
            proxy.validate()?;
        }
        let mut session = self.sessions.get_by_id(id)?;
        session.proxy = proxy;
        self.sessions.update(&session)?;
        Ok(session)
    }

    /// Takes effect with the next transport event.
    pub fn set_webhook(&self, id: &SessionId, webhook: WebhookConfig) -> Result<Session, EngineError> {
        validate_webhook(&webhook)?;
        let mut session = self.sessions.get_by_id(id)?;
        session.webhook = webhook;
        self.sessions.update(&session)?;
        Ok(session)
    }

    /// Disconnect if live, then drop the record.
    pub async fn delete(&self, id: &SessionId) -> Result<(), EngineError> {
        self.sessions.get_by_id(id)?;
        if let Some(handle) = self.registry.get(id) {
            self.teardown(&handle, StatusTrigger::ExplicitDisconnect).await;
        }
        self.sessions.delete(id)?;
        info!(session_id = %id, "session deleted");
        Ok(())
    }

    /// Disconnect every live session, keeping identities for the next boot.
    pub async fn shutdown(&self) -> usize {
        let live = self.registry.snapshot();
        let count = live.len();
        for (_, handle) in live {
            self.teardown(&handle, StatusTrigger::ExplicitDisconnect).await;
        }
        info!(count, "all sessions disconnected");
        count
    }
}

fn validate_webhook(webhook: &WebhookConfig) -> Result<(), EngineError> {
    for url in [&webhook.url, &webhook.mirror_url].into_iter().flatten() {
        let url = url.trim();
        if !url.is_empty() && !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(EngineError::InvalidInput(format!(
                "webhook URL must be http(s): {url}"
            )));
        }
    }
    Ok(())
}

static PHONE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?([0-9]{8,15})$").unwrap());

fn normalize_phone(raw: &str) -> Result<String, EngineError> {
    let cleaned: String = raw.chars().filter(|c| !matches!(c, ' ' | '-' | '(' | ')')).collect();
    PHONE_PATTERN
        .captures(&cleaned)
        .and_then(|caps| caps.get(1))
        .map(|digits| digits.as_str().to_string())
        .ok_or_else(|| EngineError::InvalidInput(format!("invalid phone number: {raw}")))
}
