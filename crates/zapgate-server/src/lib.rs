//! HTTP surface over the session lifecycle. Handlers are thin adapters;
//! all behaviour lives in `zapgate-engine`.

pub mod error;
pub mod handlers;
pub mod server;

pub use error::ApiError;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
