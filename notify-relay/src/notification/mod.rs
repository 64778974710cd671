//! Real-time notification delivery.
//!
//! A business event becomes a notification in three steps:
//!
//! 1. [`EventPublisher`] validates and persists it through the
//!    [`NotificationRepository`](crate::database::repositories::NotificationRepository).
//! 2. The publisher asks the [`ConnectionRegistry`] to fan it out to every
//!    live connection of the recipient.
//! 3. Each connection's [`DeliveryQueue`] is drained in order by that
//!    connection's socket task (see `api::routes::push`).
//!
//! Delivery is at-most-once per connection; clients reconcile anything they
//! missed with a REST fetch.

pub mod protocol;
pub mod publisher;
pub mod queue;
pub mod registry;
pub mod types;

pub use protocol::ServerMessage;
pub use publisher::EventPublisher;
pub use queue::{BackpressurePolicy, DeliveryQueue, EnqueueOutcome};
pub use registry::{ConnectionHandle, ConnectionRegistry, FanOutReport, QueuedEvent, RegistryStats};
pub use types::{Metadata, NewNotification, Notification, NotificationType};
