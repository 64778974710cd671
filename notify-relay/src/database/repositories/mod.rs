//! Repository layer for database access.
//!
//! Repositories hide sqlx behind async traits so the publisher and the HTTP
//! handlers can be exercised against in-memory fakes.

pub mod notification;

pub use notification::*;
