//! HTTP request handlers.

pub mod health;
pub mod identifiers;
pub mod policies;
pub mod sources;
pub mod types;
