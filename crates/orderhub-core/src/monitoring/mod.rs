//! Periodic sweeps over order state.

pub mod auto_complete;

pub use auto_complete::AutoCompleteMonitor;
