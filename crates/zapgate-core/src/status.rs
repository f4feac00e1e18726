use serde::{Deserialize, Serialize};

/// Connection status of a session, persisted and mirrored in memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 3] = [Self::Disconnected, Self::Connecting, Self::Connected];

    /// Connected or Connecting.
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Disconnected)
    }

    /// Apply a trigger. Pairs outside the lifecycle graph are rejected and
    /// leave the caller's state untouched.
    pub fn next(self, trigger: StatusTrigger) -> Result<SessionStatus, InvalidTransition> {
        use SessionStatus::*;
        use StatusTrigger::*;

        let next = match (self, trigger) {
            (Disconnected, ConnectRequested) => Some(Connecting),

            (Connecting, TransportConnected | PairSucceeded) => Some(Connected),
            (
                Connecting,
                PairFailed
                | ConnectFailed
                | ExplicitDisconnect
                | ExplicitLogout
                | RemoteLoggedOut
                | TransportDisconnected,
            ) => Some(Disconnected),

            (
                Connected,
                ExplicitDisconnect | ExplicitLogout | RemoteLoggedOut | TransportDisconnected,
            ) => Some(Disconnected),

            _ => None,
        };

        next.ok_or(InvalidTransition {
            from: self,
            trigger,
        })
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disconnected" => Ok(Self::Disconnected),
            "connecting" => Ok(Self::Connecting),
            "connected" => Ok(Self::Connected),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// Everything that can move a session between states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusTrigger {
    ConnectRequested,
    /// Low-level "connected" from the transport with an existing identity.
    TransportConnected,
    /// The QR loop completed a code exchange.
    PairSucceeded,
    /// The QR loop reported a terminal error.
    PairFailed,
    /// The initial connect call failed.
    ConnectFailed,
    ExplicitDisconnect,
    ExplicitLogout,
    RemoteLoggedOut,
    TransportDisconnected,
}

impl StatusTrigger {
    pub const ALL: [StatusTrigger; 9] = [
        Self::ConnectRequested,
        Self::TransportConnected,
        Self::PairSucceeded,
        Self::PairFailed,
        Self::ConnectFailed,
        Self::ExplicitDisconnect,
        Self::ExplicitLogout,
        Self::RemoteLoggedOut,
        Self::TransportDisconnected,
    ];
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition from {from} on {trigger:?}")]
pub struct InvalidTransition {
    pub from: SessionStatus,
    pub trigger: StatusTrigger,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_status() -> impl Strategy<Value = SessionStatus> {
        prop::sample::select(SessionStatus::ALL.to_vec())
    }

    fn any_trigger() -> impl Strategy<Value = StatusTrigger> {
        prop::sample::select(StatusTrigger::ALL.to_vec())
    }

    /// The edges of the lifecycle graph, independent of trigger.
    fn edge_allowed(from: SessionStatus, to: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (from, to),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
        )
    }

    proptest! {
        #[test]
        fn transitions_stay_on_graph(from in any_status(), trigger in any_trigger()) {
            if let Ok(to) = from.next(trigger) {
                prop_assert!(edge_allowed(from, to), "{from} -> {to} via {trigger:?}");
            }
        }

        #[test]
        fn never_reaches_connected_from_disconnected(triggers in prop::collection::vec(any_trigger(), 0..6)) {
            let mut state = SessionStatus::Disconnected;
            for trigger in triggers {
                let prev = state;
                if let Ok(next) = state.next(trigger) {
                    prop_assert!(!(prev == SessionStatus::Disconnected && next == SessionStatus::Connected));
                    state = next;
                }
            }
        }

        #[test]
        fn rejection_reports_source(from in any_status(), trigger in any_trigger()) {
            if let Err(err) = from.next(trigger) {
                prop_assert_eq!(err.from, from);
                prop_assert_eq!(err.trigger, trigger);
            }
        }
    }

    #[test]
    fn connect_request_only_from_disconnected() {
        assert_eq!(
            SessionStatus::Disconnected.next(StatusTrigger::ConnectRequested),
            Ok(SessionStatus::Connecting)
        );
        assert!(SessionStatus::Connecting.next(StatusTrigger::ConnectRequested).is_err());
        assert!(SessionStatus::Connected.next(StatusTrigger::ConnectRequested).is_err());
    }

    #[test]
    fn both_connect_triggers_reach_connected() {
        assert_eq!(
            SessionStatus::Connecting.next(StatusTrigger::TransportConnected),
            Ok(SessionStatus::Connected)
        );
        assert_eq!(
            SessionStatus::Connecting.next(StatusTrigger::PairSucceeded),
            Ok(SessionStatus::Connected)
        );
    }

    #[test]
    fn transport_connected_is_rejected_once_connected() {
        assert!(SessionStatus::Connected.next(StatusTrigger::TransportConnected).is_err());
    }

    #[test]
    fn remote_logout_ends_any_live_state() {
        assert!(SessionStatus::Disconnected.next(StatusTrigger::RemoteLoggedOut).is_err());
        assert_eq!(
            SessionStatus::Connected.next(StatusTrigger::RemoteLoggedOut),
            Ok(SessionStatus::Disconnected)
        );
        assert_eq!(
            SessionStatus::Connecting.next(StatusTrigger::RemoteLoggedOut),
            Ok(SessionStatus::Disconnected)
        );
    }

    #[test]
    fn transport_drop_while_connecting_settles_disconnected() {
        assert_eq!(
            SessionStatus::Connecting.next(StatusTrigger::TransportDisconnected),
            Ok(SessionStatus::Disconnected)
        );
        assert!(SessionStatus::Disconnected
            .next(StatusTrigger::TransportDisconnected)
            .is_err());
    }

    #[test]
    fn every_trigger_but_connect_leaves_connecting() {
        for trigger in StatusTrigger::ALL {
            let to = SessionStatus::Connecting.next(trigger);
            if trigger == StatusTrigger::ConnectRequested {
                assert!(to.is_err());
            } else {
                assert!(to.is_ok(), "{trigger:?} strands a connecting session");
            }
        }
    }

    #[test]
    fn status_display_and_parse() {
        for status in SessionStatus::ALL {
            let parsed: SessionStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("paired".parse::<SessionStatus>().is_err());
    }
}
