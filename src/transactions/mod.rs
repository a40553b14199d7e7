//! Transaction events received from the account provider.

pub mod model;

pub use model::{CallType, Event, WebhookPayload, content_hash};
