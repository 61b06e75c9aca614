//! Common utilities and shared functionality
//!
//! Identifiers and the event seam used across every component.

pub mod traits;
pub mod types;
