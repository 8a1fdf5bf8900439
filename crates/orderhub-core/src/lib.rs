//! Core engine of the order hub.
//!
//! Ties the order state machine, the cancellation workflow, markup
//! administration and the webhook outbox together behind a set of handlers,
//! and runs the background work (outbox draining, auto-completion, storage
//! cleanup) in [`OrderEngine::run`]. Engines are assembled with
//! [`EngineBuilder`] from configured storage and delivery implementations.

pub mod builder;
pub mod catalog;
pub mod engine;
pub mod handlers;
pub mod monitoring;
pub mod numbering;
pub mod state;
pub mod webhook;

pub use builder::{BuilderError, EngineBuilder, EngineFactories};
pub use engine::event_bus::EventBus;
pub use engine::{EngineError, OrderEngine};
