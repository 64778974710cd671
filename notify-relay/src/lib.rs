//! notify-relay library crate.
//!
//! Real-time notification delivery: a persisted store, an event publisher,
//! a per-user connection registry that fans events out over WebSocket, and a
//! client-side engine that reconciles REST state with pushed events.

pub mod api;
pub mod client;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod notification;

pub use error::{Error, Result};
