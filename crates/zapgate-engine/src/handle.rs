use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use zapgate_core::session::phone_from_jid;
use zapgate_core::{
    Device, InvalidTransition, ProtocolClient, QrItem, SessionId, SessionStatus, StatusTrigger,
    TransportEvent,
};
use zapgate_store::{DeviceStore, SessionStore};
use zapgate_telemetry::metrics::{MetricsRecorder, QR_LOOPS_ACTIVE};

struct HandleState {
    status: SessionStatus,
    qr_active: bool,
    cancel: Option<CancellationToken>,
    /// Bumped per QR loop so a finished loop cannot reset a newer one.
    qr_generation: u64,
}

/// Ticket for one QR loop, returned by [`ConnectionHandle::begin_qr_loop`].
#[derive(Clone, Debug)]
pub struct QrLoop {
    token: CancellationToken,
    generation: u64,
}

impl QrLoop {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// How a QR loop ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QrOutcome {
    Paired { jid: String },
    Failed { reason: String },
    Cancelled,
}

/// Owns one protocol client for one session, together with the in-memory
/// pairing state that is never persisted.
pub struct ConnectionHandle {
    session_id: SessionId,
    client: Arc<dyn ProtocolClient>,
    device: Mutex<Device>,
    state: Mutex<HandleState>,
    /// Latest QR code, capacity one. Writers overwrite, readers take.
    qr_slot: Mutex<Option<String>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    closed: CancellationToken,
    sessions: Arc<dyn SessionStore>,
    devices: Arc<dyn DeviceStore>,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl ConnectionHandle {
    pub fn new(
        session_id: SessionId,
        client: Arc<dyn ProtocolClient>,
        device: Device,
        events: mpsc::UnboundedSender<TransportEvent>,
        sessions: Arc<dyn SessionStore>,
        devices: Arc<dyn DeviceStore>,
    ) -> Self {
        Self {
            session_id,
            client,
            device: Mutex::new(device),
            state: Mutex::new(HandleState {
                status: SessionStatus::Disconnected,
                qr_active: false,
                cancel: None,
                qr_generation: 0,
            }),
            qr_slot: Mutex::new(None),
            events,
            closed: CancellationToken::new(),
            sessions,
            devices,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<MetricsRecorder>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn client(&self) -> &Arc<dyn ProtocolClient> {
        &self.client
    }

    pub fn device(&self) -> Device {
        self.device.lock().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.state.lock().status
    }

    pub fn is_qr_active(&self) -> bool {
        self.state.lock().qr_active
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    pub fn is_logged_in(&self) -> bool {
        self.client.is_logged_in()
    }

    /// Cancelled once the handle has been released.
    pub fn closed(&self) -> &CancellationToken {
        &self.closed
    }

    /// Apply a trigger to the in-memory status and mirror the result to the
    /// store. Store failures are logged, never returned.
    pub fn transition(&self, trigger: StatusTrigger) -> Result<SessionStatus, InvalidTransition> {
        let mut state = self.state.lock();
        let next = state.status.next(trigger)?;
        let prev = std::mem::replace(&mut state.status, next);
        self.persist_status(next);
        drop(state);

        debug!(
            session_id = %self.session_id,
            from = %prev,
            to = %next,
            ?trigger,
            "status transition"
        );
        Ok(next)
    }

    fn persist_status(&self, status: SessionStatus) {
        if let Err(e) = self.sessions.update_status(&self.session_id, status) {
            warn!(session_id = %self.session_id, %status, error = %e, "failed to persist status");
        }
    }

    /// Mark a QR loop as started. Any previous loop is cancelled.
    pub fn begin_qr_loop(&self) -> QrLoop {
        let mut state = self.state.lock();
        if let Some(previous) = state.cancel.take() {
            previous.cancel();
        }
        let token = CancellationToken::new();
        state.qr_active = true;
        state.cancel = Some(token.clone());
        state.qr_generation += 1;
        let ticket = QrLoop {
            token,
            generation: state.qr_generation,
        };
        drop(state);

        if let Some(m) = &self.metrics {
            m.add_gauge(QR_LOOPS_ACTIVE, 1);
        }
        ticket
    }

    /// Consume QR items until pairing succeeds, fails, or the loop is
    /// cancelled. Runs without holding the state lock.
    #[instrument(skip_all, fields(session_id = %self.session_id))]
    pub async fn run_qr_loop(&self, mut rx: mpsc::Receiver<QrItem>, ticket: QrLoop) -> QrOutcome {
        let outcome = loop {
            let item = tokio::select! {
                biased;
                _ = ticket.token.cancelled() => break QrOutcome::Cancelled,
                item = rx.recv() => item,
            };

            match item {
                Some(QrItem::Code(code)) => {
                    debug!("new QR code");
                    self.publish_qr(code.clone());
                    self.post_event(TransportEvent::QrCode { code });
                }
                Some(QrItem::Timeout) => {
                    debug!("QR code expired");
                    self.clear_qr();
                }
                Some(QrItem::Success) => match self.client.device_jid() {
                    Some(jid) => {
                        self.clear_qr();
                        self.capture_identity(&jid);
                        if let Err(e) = self.transition(StatusTrigger::PairSucceeded) {
                            debug!(error = %e, "pairing already reflected in status");
                        }
                        info!(jid = %jid, "pairing succeeded");
                        break QrOutcome::Paired { jid };
                    }
                    None => break self.fail_pairing("paired without a device identity".into()),
                },
                Some(QrItem::Error(reason)) => break self.fail_pairing(reason),
                None => break self.fail_pairing("QR channel closed".into()),
            }
        };

        let mut state = self.state.lock();
        if state.qr_generation == ticket.generation {
            state.qr_active = false;
            state.cancel = None;
        }
        drop(state);

        if let Some(m) = &self.metrics {
            m.add_gauge(QR_LOOPS_ACTIVE, -1);
        }
        outcome
    }

    fn fail_pairing(&self, reason: String) -> QrOutcome {
        warn!(session_id = %self.session_id, reason = %reason, "pairing failed");
        if let Err(e) = self.transition(StatusTrigger::PairFailed) {
            debug!(error = %e, "pair failure outside connecting state");
        }
        self.persist_status(SessionStatus::Disconnected);
        self.clear_qr();
        self.post_event(TransportEvent::PairError {
            reason: reason.clone(),
        });
        QrOutcome::Failed { reason }
    }

    /// Cancel the active QR loop, if any. Safe to call repeatedly.
    pub fn cancel_qr(&self) {
        let mut state = self.state.lock();
        if let Some(token) = state.cancel.take() {
            token.cancel();
        }
        state.qr_active = false;
        drop(state);
        self.clear_qr();
    }

    fn publish_qr(&self, code: String) {
        *self.qr_slot.lock() = Some(code);
    }

    fn clear_qr(&self) {
        self.qr_slot.lock().take();
    }

    /// Take the latest QR code. Never blocks; `None` when no fresh code is
    /// waiting.
    pub fn take_qr_code(&self) -> Option<String> {
        self.qr_slot.lock().take()
    }

    /// Record a paired device identity on the session and the device record.
    /// Repeated calls with the same jid are no-ops.
    pub fn capture_identity(&self, jid: &str) {
        let phone = phone_from_jid(jid);
        let mut device = self.device.lock();
        if device.jid.as_deref() == Some(jid) {
            return;
        }
        device.jid = Some(jid.to_string());
        if phone.is_some() {
            device.phone.clone_from(&phone);
        }
        if let Err(e) = self.devices.save_device(&device) {
            warn!(session_id = %self.session_id, jid, error = %e, "failed to save device identity");
        }
        drop(device);

        if let Err(e) = self.sessions.set_device(&self.session_id, jid, phone.as_deref()) {
            warn!(session_id = %self.session_id, jid, error = %e, "failed to persist device identity");
        }
    }

    /// Forget the paired identity after a logout.
    pub fn clear_identity(&self) {
        let mut device = self.device.lock();
        if device.jid.take().is_some() {
            if let Err(e) = self.devices.save_device(&device) {
                warn!(session_id = %self.session_id, error = %e, "failed to clear device identity");
            }
        }
        drop(device);

        if let Err(e) = self.sessions.set_device(&self.session_id, "", None) {
            warn!(session_id = %self.session_id, error = %e, "failed to clear session identity");
        }
    }

    /// Lifecycle reaction to a transport event. Returns the new status when
    /// the event moved the state machine.
    pub fn apply_transport_event(&self, event: &TransportEvent) -> Option<SessionStatus> {
        let trigger = match event {
            TransportEvent::Connected => StatusTrigger::TransportConnected,
            TransportEvent::Disconnected => StatusTrigger::TransportDisconnected,
            TransportEvent::LoggedOut { reason } => {
                info!(session_id = %self.session_id, reason = ?reason, "logged out remotely");
                self.cancel_qr();
                self.clear_identity();
                StatusTrigger::RemoteLoggedOut
            }
            TransportEvent::PairSuccess { jid, .. } => {
                self.capture_identity(jid);
                return None;
            }
            _ => return None,
        };

        match self.transition(trigger) {
            Ok(status) => Some(status),
            Err(e) => {
                debug!(session_id = %self.session_id, error = %e, "ignoring transport event");
                None
            }
        }
    }

    /// Feed an event into this connection's own event stream.
    pub fn post_event(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            debug!(session_id = %self.session_id, "event pump already stopped");
        }
    }

    /// Stop the QR loop and the event pump. The client is left alone.
    pub fn release(&self) {
        self.cancel_qr();
        self.closed.cancel();
    }
}
