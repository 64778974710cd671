//! Client-side reconciliation of the notification list.
//!
//! [`ReconciliationEngine`] is the entry point; the rest of the module is
//! its transports and state model.

pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod mutation;
pub mod push;
pub mod reconnect;
pub mod rest;
pub mod state;
pub mod subscription;

pub use config::ClientConfig;
pub use connection::ConnectionState;
pub use engine::{EngineOptions, ReconciliationEngine};
pub use error::{ClientError, ClientResult};
pub use mutation::Mutation;
pub use push::{PushConnector, PushFrame, PushStream, WsPushConnector};
pub use reconnect::ReconnectPolicy;
pub use rest::{NotificationApi, RestNotificationApi};
pub use state::NotificationState;
pub use subscription::{ClientEvent, Subscription};
