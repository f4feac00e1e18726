use serde::{Deserialize, Serialize};

use crate::ids::{DeviceKey, SessionId};
use crate::proxy::ProxyConfig;
use crate::status::SessionStatus;

/// Webhook subscription of a session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Primary destination, filtered by `events`.
    #[serde(default)]
    pub url: Option<String>,
    /// Allow-list of event kind names. Empty forwards everything.
    #[serde(default)]
    pub events: Vec<String>,
    /// Secondary destination that receives every event kind.
    #[serde(default)]
    pub mirror_url: Option<String>,
}

/// Persisted session record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub status: SessionStatus,
    /// Paired device identity. Empty until pairing completes.
    #[serde(default)]
    pub device_jid: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
    #[serde(default)]
    pub webhook: WebhookConfig,
    pub created_at: String,
    pub updated_at: String,
}

impl Session {
    /// A fresh, never-paired session.
    pub fn new(name: impl Into<String>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: SessionId::new(),
            name: name.into(),
            status: SessionStatus::Disconnected,
            device_jid: String::new(),
            phone: None,
            proxy: None,
            webhook: WebhookConfig::default(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn has_device_identity(&self) -> bool {
        !self.device_jid.is_empty()
    }
}

/// Durable device identity. `jid` is set once pairing succeeds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub key: DeviceKey,
    pub jid: Option<String>,
    pub phone: Option<String>,
    pub created_at: String,
}

impl Device {
    pub fn new() -> Self {
        Self {
            key: DeviceKey::new(),
            jid: None,
            phone: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::new()
    }
}

/// Phone number (user part) of a device JID such as `5511999990000:12@s.whatsapp.net`.
pub fn phone_from_jid(jid: &str) -> Option<String> {
    let user = jid.split('@').next()?;
    let user = user.split(':').next()?;
    let user = user.split('.').next()?;
    if !user.is_empty() && user.chars().all(|c| c.is_ascii_digit()) {
        Some(user.to_string())
    } else {
        None
    }
}
