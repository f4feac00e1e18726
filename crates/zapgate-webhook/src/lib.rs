//! Outbound event delivery: which destinations get an event, what the
//! payload looks like, and how it is POSTed.
//!
//! Delivery is best-effort. A payload that still fails after the retry
//! budget is logged and dropped; nothing is queued to disk.

pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod retry;
pub mod serializer;

pub use dispatcher::{Delivery, WebhookDispatcher, WebhookEvent};
pub use error::{DeliveryError, SerializeError};
pub use filter::{Destination, DestinationRole, EventFilter};
pub use pipeline::EventPipeline;
pub use retry::RetryPolicy;
pub use serializer::{EventSerializer, PayloadMetadata, WebhookPayload};
