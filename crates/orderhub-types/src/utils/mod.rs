//! Utility functions shared across the order hub crates.

pub mod formatting;

pub use formatting::{round_money, truncate_chars, truncate_id};
