use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use zapgate_core::SessionStatus;
use zapgate_store::SessionStore;

use crate::error::EngineError;
use crate::manager::SessionManager;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub attempted: usize,
    pub reconnected: usize,
    pub failed: usize,
}

/// Boot-time pass that brings previously paired sessions back online.
pub struct StartupReconciler {
    sessions: Arc<dyn SessionStore>,
    manager: Arc<SessionManager>,
}

impl StartupReconciler {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self {
            sessions: Arc::clone(manager.sessions()),
            manager,
        }
    }

    /// One attempt per paired session, no retry. Individual failures are
    /// logged and counted; only listing the sessions can fail the pass.
    #[instrument(skip(self))]
    pub async fn reconcile_all(&self) -> Result<ReconcileReport, EngineError> {
        // No handle survives a restart.
        for session in self.sessions.list()? {
            if session.status != SessionStatus::Disconnected {
                if let Err(e) = self
                    .sessions
                    .update_status(&session.id, SessionStatus::Disconnected)
                {
                    warn!(session_id = %session.id, error = %e, "failed to reset stale status");
                }
            }
        }

        let mut report = ReconcileReport::default();
        for session in self.sessions.get_sessions_with_device_identity()? {
            report.attempted += 1;
            match self.manager.reconnect(&session).await {
                Ok(()) => report.reconnected += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(session_id = %session.id, error = %e, "startup reconnect failed");
                    if let Err(e) = self
                        .sessions
                        .update_status(&session.id, SessionStatus::Disconnected)
                    {
                        warn!(session_id = %session.id, error = %e, "failed to mark session disconnected");
                    }
                }
            }
        }

        info!(
            attempted = report.attempted,
            reconnected = report.reconnected,
            failed = report.failed,
            "startup reconciliation finished"
        );
        Ok(report)
    }
}
