//! Webhook surface — intake pipeline and its HTTP routes.

pub mod intake;
pub mod routes;

pub use intake::{IntakeOutcome, WebhookIntake};
pub use routes::{WebhookRouteState, webhook_routes};
