//! In-process protocol backend.
//!
//! Drives the connection state machine without a network: tests push QR
//! items and transport events by hand, and the binary's development mode
//! can auto-pair after a delay.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::Mutex;
use rand::{Rng, RngCore};
use tokio::sync::mpsc;
use tracing::debug;

use zapgate_core::{
    ClientOptions, Device, EventHandler, ProtocolBackend, ProtocolClient, QrItem, SessionId,
    TransportError, TransportEvent,
};

/// Auto-pairing behaviour for development runs.
#[derive(Clone, Copy, Debug)]
pub struct AutoPair {
    /// Time from the first QR code to a successful scan.
    pub after: Duration,
    /// Interval between fresh QR codes while waiting.
    pub refresh: Duration,
}

#[derive(Default)]
pub struct SimulatedBackend {
    clients: Mutex<HashMap<SessionId, Arc<SimulatedClient>>>,
    failing_jids: Mutex<HashSet<String>>,
    failing_sessions: Mutex<HashSet<SessionId>>,
    auto_pair: Option<AutoPair>,
    created: AtomicUsize,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auto_pair(mut self, auto_pair: AutoPair) -> Self {
        self.auto_pair = Some(auto_pair);
        self
    }

    /// Make `connect` fail for clients created with this device jid.
    pub fn fail_connect_for_jid(&self, jid: &str) {
        self.failing_jids.lock().insert(jid.to_string());
    }

    /// Make `create_client` fail for this session.
    pub fn fail_create_for(&self, session_id: &SessionId) {
        self.failing_sessions.lock().insert(session_id.clone());
    }

    /// Most recent client created for a session.
    pub fn client_for(&self, session_id: &SessionId) -> Option<Arc<SimulatedClient>> {
        self.clients.lock().get(session_id).cloned()
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ProtocolBackend for SimulatedBackend {
    async fn create_client(
        &self,
        device: &Device,
        options: &ClientOptions,
    ) -> Result<Arc<dyn ProtocolClient>, TransportError> {
        if self.failing_sessions.lock().contains(&options.session_id) {
            return Err(TransportError::Backend(format!(
                "refusing client for {}",
                options.session_id
            )));
        }

        let fail_connect = device
            .jid
            .as_deref()
            .is_some_and(|jid| self.failing_jids.lock().contains(jid));
        let client = Arc::new(
            SimulatedClient::new(options.session_id.clone(), device.jid.clone())
                .with_auto_pair(self.auto_pair)
                .with_connect_failure(fail_connect),
        );
        if let Some(proxy) = &options.proxy {
            debug!(
                session_id = %options.session_id,
                proxy_kind = %proxy.kind,
                proxy_host = %proxy.host,
                proxy_port = proxy.port,
                "simulated client uses proxy"
            );
        }

        self.created.fetch_add(1, Ordering::Relaxed);
        self.clients
            .lock()
            .insert(options.session_id.clone(), Arc::clone(&client));
        Ok(client)
    }
}

struct ClientInner {
    session_id: SessionId,
    jid: Mutex<Option<String>>,
    connected: AtomicBool,
    handlers: Mutex<Vec<EventHandler>>,
    qr_tx: Mutex<Option<mpsc::Sender<QrItem>>>,
}

impl ClientInner {
    fn emit(&self, event: TransportEvent) {
        for handler in self.handlers.lock().iter() {
            handler(event.clone());
        }
    }

    fn qr_sender(&self) -> Option<mpsc::Sender<QrItem>> {
        self.qr_tx.lock().clone()
    }

    fn complete_pairing(&self, jid: &str) {
        *self.jid.lock() = Some(jid.to_string());
        self.emit(TransportEvent::PairSuccess {
            jid: jid.to_string(),
            platform: Some("simulated".into()),
        });
    }
}

pub struct SimulatedClient {
    inner: Arc<ClientInner>,
    auto_pair: Option<AutoPair>,
    fail_connect: bool,
    disconnect_calls: AtomicUsize,
}

impl SimulatedClient {
    pub fn new(session_id: SessionId, jid: Option<String>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                session_id,
                jid: Mutex::new(jid),
                connected: AtomicBool::new(false),
                handlers: Mutex::new(Vec::new()),
                qr_tx: Mutex::new(None),
            }),
            auto_pair: None,
            fail_connect: false,
            disconnect_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_auto_pair(mut self, auto_pair: Option<AutoPair>) -> Self {
        self.auto_pair = auto_pair;
        self
    }

    pub fn with_connect_failure(mut self, fail: bool) -> Self {
        self.fail_connect = fail;
        self
    }

    /// Push an item into the acquired QR channel. Returns false when no
    /// channel is open.
    pub async fn send_qr(&self, item: QrItem) -> bool {
        match self.inner.qr_sender() {
            Some(tx) => tx.send(item).await.is_ok(),
            None => false,
        }
    }

    /// Set the device identity without emitting anything.
    pub fn set_jid(&self, jid: &str) {
        *self.inner.jid.lock() = Some(jid.to_string());
    }

    /// Simulate a successful scan the way a real connection reports it:
    /// a pair-success event, the QR channel's success item, then connected.
    pub async fn pair(&self, jid: &str) {
        self.inner.complete_pairing(jid);
        self.send_qr(QrItem::Success).await;
        self.inner.connected.store(true, Ordering::SeqCst);
        self.inner.emit(TransportEvent::Connected);
    }

    /// Raise an arbitrary transport event.
    pub fn emit(&self, event: TransportEvent) {
        self.inner.emit(event);
    }

    /// Drop the connection from the remote side.
    pub fn drop_connection(&self) {
        if self.inner.connected.swap(false, Ordering::SeqCst) {
            self.inner.emit(TransportEvent::Disconnected);
        }
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::Relaxed)
    }

    pub fn has_qr_channel(&self) -> bool {
        self.inner.qr_tx.lock().is_some()
    }

    fn spawn_auto_pair(&self, auto_pair: AutoPair, tx: mpsc::Sender<QrItem>) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            while started.elapsed() < auto_pair.after {
                if tx.send(QrItem::Code(fake_qr_code())).await.is_err() {
                    return;
                }
                let remaining = auto_pair.after.saturating_sub(started.elapsed());
                tokio::time::sleep(remaining.min(auto_pair.refresh)).await;
                if !inner.connected.load(Ordering::SeqCst) {
                    return;
                }
            }

            let jid = fake_jid();
            debug!(session_id = %inner.session_id, jid = %jid, "auto-pairing simulated device");
            inner.complete_pairing(&jid);
            if tx.send(QrItem::Success).await.is_ok() {
                inner.emit(TransportEvent::Connected);
            }
        });
    }
}

#[async_trait]
impl ProtocolClient for SimulatedClient {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.fail_connect {
            return Err(TransportError::Connect("simulated connect failure".into()));
        }
        self.inner.connected.store(true, Ordering::SeqCst);

        if self.inner.jid.lock().is_some() {
            self.inner.emit(TransportEvent::Connected);
        } else if let (Some(auto_pair), Some(tx)) = (self.auto_pair, self.inner.qr_sender()) {
            self.spawn_auto_pair(auto_pair, tx);
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::Relaxed);
        self.inner.qr_tx.lock().take();
        if self.inner.connected.swap(false, Ordering::SeqCst) {
            self.inner.emit(TransportEvent::Disconnected);
        }
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn is_logged_in(&self) -> bool {
        self.inner.jid.lock().is_some()
    }

    async fn logout(&self) -> Result<(), TransportError> {
        if self.inner.jid.lock().take().is_none() {
            return Err(TransportError::NotLoggedIn);
        }
        self.inner.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn qr_channel(&self) -> Result<mpsc::Receiver<QrItem>, TransportError> {
        if self.inner.jid.lock().is_some() {
            return Err(TransportError::AlreadyLoggedIn);
        }
        let (tx, rx) = mpsc::channel(8);
        *self.inner.qr_tx.lock() = Some(tx);
        Ok(rx)
    }

    async fn pair_phone(&self, phone: &str) -> Result<String, TransportError> {
        if self.inner.jid.lock().is_some() {
            return Err(TransportError::AlreadyLoggedIn);
        }
        if !self.inner.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Pairing("client is not connected".into()));
        }
        debug!(session_id = %self.inner.session_id, phone, "issuing simulated linking code");
        Ok(linking_code())
    }

    fn add_event_handler(&self, handler: EventHandler) {
        self.inner.handlers.lock().push(handler);
    }

    fn device_jid(&self) -> Option<String> {
        self.inner.jid.lock().clone()
    }
}

fn fake_qr_code() -> String {
    let mut ref_bytes = [0u8; 16];
    let mut key_bytes = [0u8; 32];
    let mut rng = rand::thread_rng();
    rng.fill_bytes(&mut ref_bytes);
    rng.fill_bytes(&mut key_bytes);
    format!("2@{},{}", STANDARD.encode(ref_bytes), STANDARD.encode(key_bytes))
}

fn fake_jid() -> String {
    let number: u64 = rand::thread_rng().gen_range(10_000_000..100_000_000);
    format!("551199{number}:1@s.whatsapp.net")
}

fn linking_code() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTVWXYZ23456789";
    let mut rng = rand::thread_rng();
    let mut code: String = (0..8)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    code.insert(4, '-');
    code
}
