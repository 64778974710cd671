//! HTTP and push surface.
//!
//! REST endpoints for the caller's notifications, the WebSocket push channel
//! and the OpenAPI document.

pub mod error;
pub mod jwt;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiServerConfig, AppState};
