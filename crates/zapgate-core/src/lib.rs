pub mod events;
pub mod ids;
pub mod protocol;
pub mod proxy;
pub mod session;
pub mod status;

pub use events::{EventKind, QrItem, QrStatus, TransportEvent};
pub use ids::{DeviceKey, EventId, SessionId};
pub use protocol::{ClientOptions, EventHandler, ProtocolBackend, ProtocolClient, TransportError};
pub use proxy::{ProxyConfig, ProxyError, ProxyKind};
pub use session::{Device, Session, WebhookConfig};
pub use status::{InvalidTransition, SessionStatus, StatusTrigger};
