use zapgate_core::{InvalidTransition, ProxyError, SessionId, TransportError};
use zapgate_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session {0} already has a live connection")]
    AlreadyActive(SessionId),

    #[error("session {0} is not connected")]
    NotConnected(SessionId),

    #[error("session {0} is already logged in")]
    AlreadyLoggedIn(SessionId),

    #[error("session name already in use: {0}")]
    NameTaken(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid proxy: {0}")]
    InvalidProxy(#[from] ProxyError),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("device allocation failed: {0}")]
    DeviceAllocation(StoreError),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Conflict(what) => Self::NameTaken(what),
            other => Self::Store(other),
        }
    }
}
