use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use zapgate_core::{EventId, SessionId, TransportEvent};

use crate::error::SerializeError;

/// JSON body POSTed to a webhook destination.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event: String,
    pub session_id: SessionId,
    /// Unix seconds.
    pub timestamp: i64,
    pub data: Map<String, Value>,
    pub metadata: PayloadMetadata,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PayloadMetadata {
    /// Unique per event; destinations use it for idempotency.
    #[serde(rename = "eventID")]
    pub event_id: EventId,
}

/// Turns transport events into payloads whose field set depends only on
/// the event kind.
#[derive(Clone, Copy, Debug, Default)]
pub struct EventSerializer;

impl EventSerializer {
    pub fn serialize(
        &self,
        session_id: &SessionId,
        event: &TransportEvent,
    ) -> Result<WebhookPayload, SerializeError> {
        let kind = event.kind();
        if kind.as_str().trim().is_empty() {
            return Err(SerializeError::EmptyKind);
        }

        Ok(WebhookPayload {
            event: kind.as_str().to_string(),
            session_id: session_id.clone(),
            timestamp: chrono::Utc::now().timestamp(),
            data: event_data(event)?,
            metadata: PayloadMetadata {
                event_id: EventId::new(),
            },
        })
    }
}

fn event_data(event: &TransportEvent) -> Result<Map<String, Value>, SerializeError> {
    let value = match event {
        TransportEvent::Connected | TransportEvent::Disconnected => json!({}),
        TransportEvent::LoggedOut { reason } => json!({ "reason": reason }),
        TransportEvent::QrCode { code } => json!({ "code": code }),
        TransportEvent::PairSuccess { jid, platform } => json!({
            "jid": jid,
            "platform": platform,
        }),
        TransportEvent::PairError { reason } => json!({ "reason": reason }),
        TransportEvent::Message {
            id,
            chat,
            sender,
            from_me,
            push_name,
            timestamp,
            text,
            media_type,
        } => json!({
            "id": id,
            "chat": chat,
            "sender": sender,
            "from_me": from_me,
            "push_name": push_name,
            "timestamp": timestamp,
            "text": text,
            "media_type": media_type,
        }),
        TransportEvent::Receipt {
            message_ids,
            chat,
            sender,
            kind,
            timestamp,
        } => json!({
            "message_ids": message_ids,
            "chat": chat,
            "sender": sender,
            "type": kind,
            "timestamp": timestamp,
        }),
        TransportEvent::Presence {
            from,
            unavailable,
            last_seen,
        } => json!({
            "from": from,
            "unavailable": unavailable,
            "last_seen": last_seen,
        }),
        TransportEvent::ChatPresence {
            chat,
            sender,
            state,
            media,
        } => json!({
            "chat": chat,
            "sender": sender,
            "state": state,
            "media": media,
        }),
        TransportEvent::HistorySync {
            conversations,
            progress,
        } => json!({
            "conversations": conversations,
            "progress": progress,
        }),
        TransportEvent::CallOffer {
            call_id,
            from,
            timestamp,
        } => json!({
            "call_id": call_id,
            "from": from,
            "timestamp": timestamp,
        }),
        TransportEvent::GroupInfo {
            jid,
            name,
            joined,
            left,
        } => json!({
            "jid": jid,
            "name": name,
            "joined": joined,
            "left": left,
        }),
        TransportEvent::Picture {
            jid,
            removed,
            picture_id,
        } => json!({
            "jid": jid,
            "removed": removed,
            "picture_id": picture_id,
        }),
        TransportEvent::Other { data, .. } => serde_json::to_value(data)?,
    };

    Ok(match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn keys(payload: &WebhookPayload) -> BTreeSet<String> {
        payload.data.keys().cloned().collect()
    }

    fn session() -> SessionId {
        SessionId::from_raw("sess_test")
    }

    #[test]
    fn envelope_fields() {
        let payload = EventSerializer
            .serialize(&session(), &TransportEvent::Connected)
            .unwrap();
        assert_eq!(payload.event, "Connected");
        assert_eq!(payload.session_id.as_str(), "sess_test");
        assert!(payload.timestamp > 0);
        assert!(payload.metadata.event_id.as_str().starts_with("evt_"));

        let json = serde_json::to_value(&payload).unwrap();
        let top: BTreeSet<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(
            top,
            BTreeSet::from(["event", "session_id", "timestamp", "data", "metadata"])
        );
        assert!(json["metadata"]["eventID"].is_string());
    }

    #[test]
    fn event_ids_differ_per_call() {
        let a = EventSerializer.serialize(&session(), &TransportEvent::Connected).unwrap();
        let b = EventSerializer.serialize(&session(), &TransportEvent::Connected).unwrap();
        assert_ne!(a.metadata.event_id, b.metadata.event_id);
    }

    #[test]
    fn absent_values_are_null_not_missing() {
        let payload = EventSerializer
            .serialize(
                &session(),
                &TransportEvent::LoggedOut { reason: None },
            )
            .unwrap();
        assert_eq!(payload.event, "LoggedOut");
        assert!(payload.data.contains_key("reason"));
        assert!(payload.data["reason"].is_null());
    }

    #[test]
    fn other_passes_through_and_wraps_scalars() {
        let object = EventSerializer
            .serialize(
                &session(),
                &TransportEvent::Other {
                    kind: "BlocklistChange".into(),
                    data: json!({"action": "block"}),
                },
            )
            .unwrap();
        assert_eq!(object.event, "BlocklistChange");
        assert_eq!(object.data["action"], "block");

        let scalar = EventSerializer
            .serialize(
                &session(),
                &TransportEvent::Other {
                    kind: "Counter".into(),
                    data: json!(5),
                },
            )
            .unwrap();
        assert_eq!(scalar.data["value"], 5);
    }

    #[test]
    fn empty_other_kind_is_rejected() {
        let err = EventSerializer
            .serialize(
                &session(),
                &TransportEvent::Other {
                    kind: "  ".into(),
                    data: Value::Null,
                },
            )
            .unwrap_err();
        assert!(matches!(err, SerializeError::EmptyKind));
    }

    #[test]
    fn pair_error_serializes_as_error_kind() {
        let payload = EventSerializer
            .serialize(
                &session(),
                &TransportEvent::PairError {
                    reason: "scan timed out".into(),
                },
            )
            .unwrap();
        assert_eq!(payload.event, "Error");
        assert_eq!(payload.data["reason"], "scan timed out");
    }

    fn opt_string() -> impl Strategy<Value = Option<String>> {
        prop::option::of("[a-z0-9@.]{0,12}")
    }

    fn key_set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn data_keys(event: &TransportEvent) -> BTreeSet<String> {
        keys(&EventSerializer.serialize(&session(), event).unwrap())
    }

    #[test]
    fn connection_events_carry_empty_data() {
        assert!(data_keys(&TransportEvent::Connected).is_empty());
        assert!(data_keys(&TransportEvent::Disconnected).is_empty());
    }

    proptest! {
        #[test]
        fn message_shape_is_stable(
            id in "[A-F0-9]{0,16}",
            text in opt_string(),
            push_name in opt_string(),
            media_type in opt_string(),
            from_me in any::<bool>(),
            timestamp in any::<i64>(),
        ) {
            let event = TransportEvent::Message {
                id,
                chat: "123@s.whatsapp.net".into(),
                sender: "456@s.whatsapp.net".into(),
                from_me,
                push_name,
                timestamp,
                text,
                media_type,
            };
            let reference = TransportEvent::Message {
                id: String::new(),
                chat: String::new(),
                sender: String::new(),
                from_me: false,
                push_name: None,
                timestamp: 0,
                text: None,
                media_type: None,
            };
            let a = EventSerializer.serialize(&session(), &event).unwrap();
            let b = EventSerializer.serialize(&session(), &reference).unwrap();
            prop_assert_eq!(keys(&a), keys(&b));
        }

        #[test]
        fn receipt_and_group_shapes_are_stable(
            ids in prop::collection::vec("[A-F0-9]{4}", 0..4),
            name in opt_string(),
            joined in prop::collection::vec("[0-9]{5}", 0..3),
            last_seen in prop::option::of(any::<i64>()),
        ) {
            let receipt = EventSerializer.serialize(&session(), &TransportEvent::Receipt {
                message_ids: ids,
                chat: "c".into(),
                sender: "s".into(),
                kind: "read".into(),
                timestamp: 1,
            }).unwrap();
            prop_assert_eq!(
                keys(&receipt),
                BTreeSet::from(["chat", "message_ids", "sender", "timestamp", "type"].map(String::from))
            );

            let group = EventSerializer.serialize(&session(), &TransportEvent::GroupInfo {
                jid: "g@g.us".into(),
                name,
                joined,
                left: vec![],
            }).unwrap();
            prop_assert_eq!(
                keys(&group),
                BTreeSet::from(["jid", "joined", "left", "name"].map(String::from))
            );

            let presence = EventSerializer.serialize(&session(), &TransportEvent::Presence {
                from: "p".into(),
                unavailable: last_seen.is_some(),
                last_seen,
            }).unwrap();
            prop_assert_eq!(
                keys(&presence),
                BTreeSet::from(["from", "last_seen", "unavailable"].map(String::from))
            );
        }

        #[test]
        fn pairing_and_session_shapes_are_stable(
            reason in opt_string(),
            code in "[A-Za-z0-9@,+/=]{0,24}",
            jid in "[0-9]{0,13}(@s\\.whatsapp\\.net)?",
            platform in opt_string(),
        ) {
            prop_assert_eq!(
                data_keys(&TransportEvent::LoggedOut { reason }),
                key_set(&["reason"])
            );
            prop_assert_eq!(
                data_keys(&TransportEvent::QrCode { code }),
                key_set(&["code"])
            );
            prop_assert_eq!(
                data_keys(&TransportEvent::PairSuccess { jid, platform }),
                key_set(&["jid", "platform"])
            );
        }

        #[test]
        fn activity_shapes_are_stable(
            chat in "[0-9a-z@.]{0,16}",
            state in "(composing|paused)?",
            media in opt_string(),
            conversations in any::<u32>(),
            progress in prop::option::of(0u32..=100),
            call_id in "[A-F0-9]{0,16}",
            timestamp in any::<i64>(),
            removed in any::<bool>(),
            picture_id in opt_string(),
        ) {
            prop_assert_eq!(
                data_keys(&TransportEvent::ChatPresence {
                    chat: chat.clone(),
                    sender: String::new(),
                    state,
                    media,
                }),
                key_set(&["chat", "media", "sender", "state"])
            );
            prop_assert_eq!(
                data_keys(&TransportEvent::HistorySync { conversations, progress }),
                key_set(&["conversations", "progress"])
            );
            prop_assert_eq!(
                data_keys(&TransportEvent::CallOffer {
                    call_id,
                    from: chat.clone(),
                    timestamp,
                }),
                key_set(&["call_id", "from", "timestamp"])
            );
            prop_assert_eq!(
                data_keys(&TransportEvent::Picture {
                    jid: chat,
                    removed,
                    picture_id,
                }),
                key_set(&["jid", "picture_id", "removed"])
            );
        }
    }
}
