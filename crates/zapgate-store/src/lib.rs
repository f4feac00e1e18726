pub mod database;
pub mod devices;
pub mod error;
pub mod row_helpers;
pub mod schema;
pub mod sessions;

pub use database::Database;
pub use devices::{DeviceRepo, DeviceStore};
pub use error::StoreError;
pub use sessions::{SessionRepo, SessionStore};
