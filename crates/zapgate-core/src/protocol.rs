use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::events::{QrItem, TransportEvent};
use crate::ids::SessionId;
use crate::proxy::ProxyConfig;
use crate::session::Device;

/// Callback registered on a client. Invoked once per transport event, in
/// the order the connection produced them.
pub type EventHandler = Box<dyn Fn(TransportEvent) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("QR channel unavailable: {0}")]
    QrChannel(String),

    #[error("client is already logged in")]
    AlreadyLoggedIn,

    #[error("client is not logged in")]
    NotLoggedIn,

    #[error("logout failed: {0}")]
    Logout(String),

    #[error("phone pairing failed: {0}")]
    Pairing(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Per-client construction options.
#[derive(Clone, Debug)]
pub struct ClientOptions {
    pub session_id: SessionId,
    pub proxy: Option<ProxyConfig>,
}

/// One connection to the messaging network for one device identity.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;

    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    fn is_logged_in(&self) -> bool;

    async fn logout(&self) -> Result<(), TransportError>;

    /// Must be acquired before `connect` on an unpaired device.
    async fn qr_channel(&self) -> Result<mpsc::Receiver<QrItem>, TransportError>;

    /// Request a phone linking code as an alternative to QR.
    async fn pair_phone(&self, phone: &str) -> Result<String, TransportError>;

    fn add_event_handler(&self, handler: EventHandler);

    /// Paired device JID. `None` before pairing.
    fn device_jid(&self) -> Option<String>;
}

/// Produces clients bound to a device identity.
#[async_trait]
pub trait ProtocolBackend: Send + Sync {
    async fn create_client(
        &self,
        device: &Device,
        options: &ClientOptions,
    ) -> Result<Arc<dyn ProtocolClient>, TransportError>;
}
