use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use zapgate_core::SessionId;
use zapgate_telemetry::metrics::{MetricsRecorder, SESSIONS_LIVE};

use crate::error::EngineError;
use crate::handle::ConnectionHandle;

/// Live connection handles keyed by session id. At most one per session.
///
/// Created once at startup and passed to whoever needs it.
#[derive(Default)]
pub struct SessionRegistry {
    handles: RwLock<HashMap<SessionId, Arc<ConnectionHandle>>>,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<ConnectionHandle>> {
        self.handles.read().get(id).cloned()
    }

    /// Register a handle. Never replaces an existing entry.
    pub fn set(&self, id: SessionId, handle: Arc<ConnectionHandle>) -> Result<(), EngineError> {
        let mut handles = self.handles.write();
        if handles.contains_key(&id) {
            return Err(EngineError::AlreadyActive(id));
        }
        handles.insert(id, handle);
        self.publish(handles.len());
        Ok(())
    }

    pub fn remove(&self, id: &SessionId) -> Option<Arc<ConnectionHandle>> {
        let mut handles = self.handles.write();
        let removed = handles.remove(id);
        self.publish(handles.len());
        removed
    }

    /// Remove the entry only if it still points at `handle`. A stale handle
    /// reporting its own shutdown must not evict a newer connection.
    pub fn remove_if_same(&self, id: &SessionId, handle: &Arc<ConnectionHandle>) -> bool {
        let mut handles = self.handles.write();
        match handles.get(id) {
            Some(current) if Arc::ptr_eq(current, handle) => {
                handles.remove(id);
                self.publish(handles.len());
                true
            }
            _ => false,
        }
    }

    /// Whether a live handle exists and its client reports connected.
    pub fn is_connected(&self, id: &SessionId) -> bool {
        self.get(id).is_some_and(|h| h.is_connected())
    }

    pub fn snapshot(&self) -> Vec<(SessionId, Arc<ConnectionHandle>)> {
        self.handles
            .read()
            .iter()
            .map(|(id, h)| (id.clone(), Arc::clone(h)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn publish(&self, len: usize) {
        if let Some(m) = &self.metrics {
            m.set_gauge(SESSIONS_LIVE, len as i64);
        }
    }
}
