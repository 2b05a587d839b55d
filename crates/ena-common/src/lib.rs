//! Shared utilities for ena crates
//!
//! Holds the pieces every subsystem needs but none should own: JSON document
//! persistence, tracing setup, and the inventory-based service registry.

pub mod di;
pub mod json_store;
pub mod logging;

pub use json_store::{load_json, load_json_or_default, save_json_atomic, JsonStoreError};
