//! Common types for the order hub.
//!
//! This crate defines the domain types shared by every other crate: the order
//! aggregate, acting parties, cancel requests, markup rules, webhook tasks,
//! engine events and the storage namespaces they are persisted under.

/// Acting parties and their kinds.
pub mod actor;
/// API request and error types for HTTP endpoints.
pub mod api;
/// Escalated cancellation requests.
pub mod cancel;
/// Catalog SKU records.
pub mod catalog;
/// Injectable time source.
pub mod clock;
/// Event types for in-process communication.
pub mod events;
/// Price markup rules and calculation requests.
pub mod markup;
/// Order aggregate, status enums and status logs.
pub mod order;
/// Registry trait for pluggable implementations.
pub mod registry;
/// Storage namespaces.
pub mod storage;
/// Formatting and rounding helpers.
pub mod utils;
/// Configuration validation types.
pub mod validation;
/// Webhook endpoints and delivery tasks.
pub mod webhook;

pub use actor::*;
pub use api::*;
pub use cancel::*;
pub use catalog::*;
pub use clock::*;
pub use events::*;
pub use markup::*;
pub use order::*;
pub use registry::*;
pub use storage::*;
pub use utils::{round_money, truncate_chars, truncate_id};
pub use validation::*;
pub use webhook::*;
