use serde::{Deserialize, Serialize};

/// Category of a transport-level occurrence, as named on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    LoggedOut,
    Qr,
    PairSuccess,
    /// Pairing failed terminally.
    Error,
    Message,
    Receipt,
    Presence,
    ChatPresence,
    HistorySync,
    CallOffer,
    GroupInfo,
    Picture,
    /// A transport event without a dedicated variant.
    Other(String),
}

impl EventKind {
    /// Every named kind, in wire order.
    pub const NAMED: [EventKind; 14] = [
        Self::Connected,
        Self::Disconnected,
        Self::LoggedOut,
        Self::Qr,
        Self::PairSuccess,
        Self::Error,
        Self::Message,
        Self::Receipt,
        Self::Presence,
        Self::ChatPresence,
        Self::HistorySync,
        Self::CallOffer,
        Self::GroupInfo,
        Self::Picture,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Self::Connected => "Connected",
            Self::Disconnected => "Disconnected",
            Self::LoggedOut => "LoggedOut",
            Self::Qr => "QR",
            Self::PairSuccess => "PairSuccess",
            Self::Error => "Error",
            Self::Message => "Message",
            Self::Receipt => "Receipt",
            Self::Presence => "Presence",
            Self::ChatPresence => "ChatPresence",
            Self::HistorySync => "HistorySync",
            Self::CallOffer => "CallOffer",
            Self::GroupInfo => "GroupInfo",
            Self::Picture => "Picture",
            Self::Other(name) => name,
        }
    }

    /// Case-insensitive comparison against a configured name.
    pub fn matches(&self, name: &str) -> bool {
        self.as_str().eq_ignore_ascii_case(name.trim())
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events raised by a protocol client. Closed set plus a fallthrough.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    LoggedOut {
        reason: Option<String>,
    },
    QrCode {
        code: String,
    },
    PairSuccess {
        jid: String,
        platform: Option<String>,
    },
    PairError {
        reason: String,
    },
    Message {
        id: String,
        chat: String,
        sender: String,
        from_me: bool,
        push_name: Option<String>,
        timestamp: i64,
        text: Option<String>,
        media_type: Option<String>,
    },
    Receipt {
        message_ids: Vec<String>,
        chat: String,
        sender: String,
        kind: String,
        timestamp: i64,
    },
    Presence {
        from: String,
        unavailable: bool,
        last_seen: Option<i64>,
    },
    ChatPresence {
        chat: String,
        sender: String,
        state: String,
        media: Option<String>,
    },
    HistorySync {
        conversations: u32,
        progress: Option<u32>,
    },
    CallOffer {
        call_id: String,
        from: String,
        timestamp: i64,
    },
    GroupInfo {
        jid: String,
        name: Option<String>,
        joined: Vec<String>,
        left: Vec<String>,
    },
    Picture {
        jid: String,
        removed: bool,
        picture_id: Option<String>,
    },
    Other {
        kind: String,
        data: serde_json::Value,
    },
}

impl TransportEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected => EventKind::Connected,
            Self::Disconnected => EventKind::Disconnected,
            Self::LoggedOut { .. } => EventKind::LoggedOut,
            Self::QrCode { .. } => EventKind::Qr,
            Self::PairSuccess { .. } => EventKind::PairSuccess,
            Self::PairError { .. } => EventKind::Error,
            Self::Message { .. } => EventKind::Message,
            Self::Receipt { .. } => EventKind::Receipt,
            Self::Presence { .. } => EventKind::Presence,
            Self::ChatPresence { .. } => EventKind::ChatPresence,
            Self::HistorySync { .. } => EventKind::HistorySync,
            Self::CallOffer { .. } => EventKind::CallOffer,
            Self::GroupInfo { .. } => EventKind::GroupInfo,
            Self::Picture { .. } => EventKind::Picture,
            Self::Other { kind, .. } => EventKind::Other(kind.clone()),
        }
    }
}

/// Item yielded by a client's QR channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QrItem {
    Code(String),
    Timeout,
    Success,
    Error(String),
}

/// Answer to a QR poll. Lifecycle states are statuses, not errors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QrStatus {
    QrPending,
    QrActive { code: String },
    AlreadyLoggedIn,
    QrNotActive,
    SessionNotConnected,
}

impl QrStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QrPending => "qr_pending",
            Self::QrActive { .. } => "qr_active",
            Self::AlreadyLoggedIn => "already_logged_in",
            Self::QrNotActive => "qr_not_active",
            Self::SessionNotConnected => "session_not_connected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_unique() {
        let named = EventKind::NAMED;
        let mut names: Vec<&str> = named.iter().map(EventKind::as_str).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), EventKind::NAMED.len());
    }

    #[test]
    fn kind_matching_ignores_case() {
        assert!(EventKind::Message.matches("message"));
        assert!(EventKind::Error.matches(" error "));
        assert!(!EventKind::Receipt.matches("Message"));
        assert!(EventKind::Other("NewsletterJoin".into()).matches("newsletterjoin"));
    }

    #[test]
    fn pair_error_maps_to_error_kind() {
        let event = TransportEvent::PairError {
            reason: "timeout".into(),
        };
        assert_eq!(event.kind(), EventKind::Error);
        assert_eq!(event.kind().as_str(), "Error");
    }

    #[test]
    fn other_keeps_raw_kind() {
        let event = TransportEvent::Other {
            kind: "BlocklistChange".into(),
            data: serde_json::json!({}),
        };
        assert_eq!(event.kind().to_string(), "BlocklistChange");
    }

    #[test]
    fn qr_status_wire_shape() {
        let json = serde_json::to_value(QrStatus::QrActive { code: "2@abc".into() }).unwrap();
        assert_eq!(json["status"], "qr_active");
        assert_eq!(json["code"], "2@abc");

        let json = serde_json::to_value(QrStatus::SessionNotConnected).unwrap();
        assert_eq!(json["status"], "session_not_connected");
        assert_eq!(QrStatus::QrPending.as_str(), "qr_pending");
    }
}
