//! Notification delivery subsystem.

pub mod dispatcher;
pub mod outbox;

pub use dispatcher::{DispatchSettings, DrainReport, WebhookDispatcher};
pub use outbox::WebhookOutbox;
