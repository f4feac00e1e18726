use zapgate_core::{EventKind, WebhookConfig};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DestinationRole {
    /// Subject to the session's allow-list.
    Primary,
    /// Receives every event kind.
    Mirror,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Destination {
    pub url: String,
    pub role: DestinationRole,
}

/// Per-session routing of event kinds to webhook destinations.
#[derive(Clone, Copy, Debug, Default)]
pub struct EventFilter;

impl EventFilter {
    /// Whether `kind` goes to the primary destination.
    pub fn should_send(&self, config: &WebhookConfig, kind: &EventKind) -> bool {
        if non_blank(&config.url).is_none() {
            return false;
        }
        let mut allowed = config.events.iter().filter(|e| !e.trim().is_empty()).peekable();
        if allowed.peek().is_none() {
            return true;
        }
        allowed.any(|name| kind.matches(name))
    }

    /// Every destination that should receive `kind`. The primary and the
    /// mirror are decided independently.
    pub fn destinations(&self, config: &WebhookConfig, kind: &EventKind) -> Vec<Destination> {
        let mut out = Vec::with_capacity(2);
        if self.should_send(config, kind) {
            if let Some(url) = non_blank(&config.url) {
                out.push(Destination {
                    url: url.to_string(),
                    role: DestinationRole::Primary,
                });
            }
        }
        if let Some(url) = non_blank(&config.mirror_url) {
            out.push(Destination {
                url: url.to_string(),
                role: DestinationRole::Mirror,
            });
        }
        out
    }
}

fn non_blank(url: &Option<String>) -> Option<&str> {
    url.as_deref().map(str::trim).filter(|u| !u.is_empty())
}
