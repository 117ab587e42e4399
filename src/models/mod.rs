//! Data models for the server registry.
//!
//! Field names serialize in camelCase to match the admin console's expectations.

mod poll;
mod server;

pub use poll::*;
pub use server::*;
