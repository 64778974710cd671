//! Database models for notify-relay.
//!
//! These models map directly to the database schema and handle
//! serialization/deserialization of JSON fields.

pub mod notification;

pub use notification::*;
