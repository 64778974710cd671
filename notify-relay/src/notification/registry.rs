//! Connection registry for live push connections.
//!
//! The `ConnectionRegistry` tracks every live connection per user and fans
//! published events out to them:
//! - A user may hold any number of simultaneous connections
//! - Each connection owns a bounded [`DeliveryQueue`]; fan-out never blocks
//! - Connections that stop heartbeating are evicted by a reaper task
//!
//! Membership lives in a `DashMap` keyed by user id, so register, unregister
//! and fan-out for one user serialize on that user's shard lock and never
//! contend with unrelated users for longer than a shard lookup.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::protocol::ServerMessage;
use super::queue::{BackpressurePolicy, DeliveryQueue, EnqueueOutcome};
use crate::config::DeliveryConfig;
use crate::database::time::{ms_to_datetime, now_ms};

/// Event as held in delivery queues; shared between all of a user's connections.
pub type QueuedEvent = Arc<ServerMessage>;

/// One live transport session.
pub struct ConnectionHandle {
    connection_id: String,
    user_id: String,
    connected_at: DateTime<Utc>,
    last_seen_ms: AtomicI64,
    queue: DeliveryQueue<QueuedEvent>,
    cancellation_token: CancellationToken,
}

impl ConnectionHandle {
    fn new(
        user_id: String,
        capacity: usize,
        policy: BackpressurePolicy,
        cancellation_token: CancellationToken,
    ) -> Self {
        let now = now_ms();
        Self {
            connection_id: Uuid::new_v4().to_string(),
            user_id,
            connected_at: ms_to_datetime(now),
            last_seen_ms: AtomicI64::new(now),
            queue: DeliveryQueue::new(capacity, policy),
            cancellation_token,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Record client activity (any inbound frame counts as a heartbeat).
    pub fn touch(&self) {
        self.last_seen_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn last_seen_at(&self) -> DateTime<Utc> {
        ms_to_datetime(self.last_seen_ms.load(Ordering::Relaxed))
    }

    fn idle_for(&self, now: i64) -> Duration {
        let idle = now.saturating_sub(self.last_seen_ms.load(Ordering::Relaxed));
        Duration::from_millis(idle.max(0) as u64)
    }

    /// Delivery queue drained by this connection's socket task.
    pub fn queue(&self) -> &DeliveryQueue<QueuedEvent> {
        &self.queue
    }

    /// Cancelled when the registry drops this connection.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.cancellation_token.is_cancelled() || self.queue.is_closed()
    }

    fn shut(&self) {
        self.queue.close();
        self.cancellation_token.cancel();
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("connection_id", &self.connection_id)
            .field("user_id", &self.user_id)
            .field("queued", &self.queue.len())
            .finish()
    }
}

/// Per-publish delivery summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Live connections the event was offered to.
    pub connections: usize,
    /// Connections that accepted the event (possibly after dropping an older one).
    pub delivered: usize,
    /// Older events discarded to make room.
    pub dropped: usize,
    /// Slow consumers disconnected by this publish.
    pub disconnected: usize,
}

/// Registry counters.
#[derive(Debug, Clone, Default, Serialize, utoipa::ToSchema)]
pub struct RegistryStats {
    pub connections: usize,
    pub users: usize,
    pub enqueued: u64,
    pub dropped: u64,
    pub slow_disconnects: u64,
    pub evicted: u64,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    slow_disconnects: AtomicU64,
    evicted: AtomicU64,
}

/// Registry of live connections keyed by user.
pub struct ConnectionRegistry {
    by_user: DashMap<String, HashMap<String, Arc<ConnectionHandle>>>,
    owners: DashMap<String, String>,
    queue_capacity: usize,
    policy: BackpressurePolicy,
    counters: Counters,
    shutdown: CancellationToken,
}

impl ConnectionRegistry {
    pub fn new(queue_capacity: usize, policy: BackpressurePolicy) -> Self {
        Self {
            by_user: DashMap::new(),
            owners: DashMap::new(),
            queue_capacity,
            policy,
            counters: Counters::default(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self::new(config.queue_capacity, config.backpressure)
    }

    /// Register a new connection for `user_id`.
    pub fn register(&self, user_id: &str) -> Arc<ConnectionHandle> {
        let handle = Arc::new(ConnectionHandle::new(
            user_id.to_string(),
            self.queue_capacity,
            self.policy,
            self.shutdown.child_token(),
        ));

        self.by_user
            .entry(user_id.to_string())
            .or_default()
            .insert(handle.connection_id.clone(), handle.clone());
        self.owners
            .insert(handle.connection_id.clone(), user_id.to_string());

        info!(
            user_id = %user_id,
            connection_id = %handle.connection_id,
            "Push connection registered"
        );
        handle
    }

    /// Remove a connection. Returns the handle if it was still registered.
    pub fn unregister(&self, connection_id: &str) -> Option<Arc<ConnectionHandle>> {
        let (_, user_id) = self.owners.remove(connection_id)?;

        let removed = self
            .by_user
            .get_mut(&user_id)
            .and_then(|mut conns| conns.remove(connection_id));
        self.by_user.remove_if(&user_id, |_, conns| conns.is_empty());

        if let Some(handle) = &removed {
            handle.shut();
            info!(
                user_id = %user_id,
                connection_id = %connection_id,
                "Push connection unregistered"
            );
        }
        removed
    }

    /// Deliver `event` to every live connection of `user_id` without blocking.
    ///
    /// Failures are absorbed here: a full queue either drops its oldest event
    /// or disconnects its consumer, and the client recovers through REST.
    pub fn fan_out(&self, user_id: &str, event: QueuedEvent) -> FanOutReport {
        let mut report = FanOutReport::default();
        let mut overflowed = Vec::new();

        if let Some(conns) = self.by_user.get(user_id) {
            report.connections = conns.len();
            for handle in conns.values() {
                match handle.queue.push(event.clone()) {
                    EnqueueOutcome::Queued => report.delivered += 1,
                    EnqueueOutcome::DroppedOldest => {
                        report.delivered += 1;
                        report.dropped += 1;
                    }
                    EnqueueOutcome::Disconnected => {
                        report.disconnected += 1;
                        overflowed.push(handle.connection_id.clone());
                    }
                    EnqueueOutcome::Closed => {}
                }
            }
        }

        // Shard guard is released before touching the map again.
        for connection_id in &overflowed {
            warn!(
                user_id = %user_id,
                connection_id = %connection_id,
                "Delivery queue overflowed; disconnecting slow consumer"
            );
            self.unregister(connection_id);
        }

        if report.dropped > 0 {
            debug!(
                user_id = %user_id,
                dropped = report.dropped,
                "Delivery queue full; dropped oldest pending events"
            );
        }

        self.counters
            .enqueued
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.counters
            .dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
        self.counters
            .slow_disconnects
            .fetch_add(report.disconnected as u64, Ordering::Relaxed);

        report
    }

    /// Record a heartbeat for a connection by id.
    pub fn touch(&self, connection_id: &str) -> bool {
        let Some(user_id) = self.owners.get(connection_id).map(|u| u.value().clone()) else {
            return false;
        };
        match self
            .by_user
            .get(&user_id)
            .and_then(|conns| conns.get(connection_id).cloned())
        {
            Some(handle) => {
                handle.touch();
                true
            }
            None => false,
        }
    }

    /// Evict connections idle for longer than `timeout`. Returns evicted ids.
    pub fn evict_stale(&self, timeout: Duration) -> Vec<String> {
        let now = now_ms();
        let stale: Vec<String> = self
            .by_user
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .values()
                    .filter(|h| h.idle_for(now) > timeout)
                    .map(|h| h.connection_id.clone())
                    .collect::<Vec<_>>()
            })
            .collect();

        let mut evicted = Vec::with_capacity(stale.len());
        for connection_id in stale {
            if self.unregister(&connection_id).is_some() {
                warn!(connection_id = %connection_id, "Evicted push connection after heartbeat timeout");
                evicted.push(connection_id);
            }
        }
        self.counters
            .evicted
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);
        evicted
    }

    /// Spawn the periodic liveness sweep.
    pub fn spawn_reaper(
        self: &Arc<Self>,
        interval: Duration,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Connection reaper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let evicted = registry.evict_stale(timeout);
                        if !evicted.is_empty() {
                            debug!(count = evicted.len(), "Connection reaper evicted idle connections");
                        }
                    }
                }
            }
        })
    }

    /// Close every connection (server shutdown).
    pub fn close_all(&self) {
        self.shutdown.cancel();
        let ids: Vec<String> = self.owners.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.unregister(&id);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.owners.len()
    }

    pub fn user_connection_count(&self, user_id: &str) -> usize {
        self.by_user.get(user_id).map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_registered(&self, connection_id: &str) -> bool {
        self.owners.contains_key(connection_id)
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            connections: self.owners.len(),
            users: self.by_user.len(),
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            slow_disconnects: self.counters.slow_disconnects.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::from_config(&DeliveryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::types::{Metadata, Notification, NotificationType};

    fn event(id: &str) -> QueuedEvent {
        Arc::new(ServerMessage::NewNotification(Notification {
            id: id.to_string(),
            notification_type: NotificationType::Message,
            title: "New message".to_string(),
            message: "Hello".to_string(),
            is_read: false,
            metadata: Metadata::new(),
            created_at: Utc::now(),
        }))
    }

    fn id_of(event: &QueuedEvent) -> String {
        match event.as_ref() {
            ServerMessage::NewNotification(n) => n.id.clone(),
        }
    }

    fn drain(handle: &ConnectionHandle) -> Vec<String> {
        std::iter::from_fn(|| handle.queue().try_recv())
            .map(|e| id_of(&e))
            .collect()
    }

    #[test]
    fn test_register_and_unregister() {
        let registry = ConnectionRegistry::new(8, BackpressurePolicy::DropOldest);
        let a = registry.register("alice");
        let b = registry.register("alice");
        let c = registry.register("bob");

        assert_eq!(registry.connection_count(), 3);
        assert_eq!(registry.user_connection_count("alice"), 2);
        assert_eq!(registry.stats().users, 2);

        assert!(registry.unregister(a.connection_id()).is_some());
        assert!(a.is_closed());
        assert!(registry.unregister(a.connection_id()).is_none());
        assert_eq!(registry.user_connection_count("alice"), 1);

        registry.unregister(b.connection_id());
        registry.unregister(c.connection_id());
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.stats().users, 0);
    }

    #[test]
    fn test_fan_out_reaches_every_connection_of_user_only() {
        let registry = ConnectionRegistry::new(8, BackpressurePolicy::DropOldest);
        let phone = registry.register("alice");
        let laptop = registry.register("alice");
        let other = registry.register("bob");

        let report = registry.fan_out("alice", event("n1"));
        assert_eq!(report.connections, 2);
        assert_eq!(report.delivered, 2);

        assert_eq!(drain(&phone), vec!["n1"]);
        assert_eq!(drain(&laptop), vec!["n1"]);
        assert!(drain(&other).is_empty());
    }

    #[test]
    fn test_fan_out_without_connections_is_not_an_error() {
        let registry = ConnectionRegistry::default();
        let report = registry.fan_out("nobody", event("n1"));
        assert_eq!(report, FanOutReport::default());
    }

    #[test]
    fn test_drop_oldest_counts() {
        let registry = ConnectionRegistry::new(2, BackpressurePolicy::DropOldest);
        let conn = registry.register("alice");
        for id in ["n1", "n2", "n3"] {
            registry.fan_out("alice", event(id));
        }
        assert_eq!(drain(&conn), vec!["n2", "n3"]);
        let stats = registry.stats();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.enqueued, 3);
        assert!(registry.is_registered(conn.connection_id()));
    }

    #[test]
    fn test_disconnect_policy_unregisters_slow_consumer() {
        let registry = ConnectionRegistry::new(1, BackpressurePolicy::Disconnect);
        let slow = registry.register("alice");
        let fast = registry.register("alice");

        registry.fan_out("alice", event("n1"));
        assert_eq!(drain(&fast), vec!["n1"]);

        let report = registry.fan_out("alice", event("n2"));
        assert_eq!(report.disconnected, 1);
        assert_eq!(report.delivered, 1);
        assert!(!registry.is_registered(slow.connection_id()));
        assert!(slow.cancellation_token().is_cancelled());
        assert!(registry.is_registered(fast.connection_id()));
        assert_eq!(registry.stats().slow_disconnects, 1);
    }

    #[test]
    fn test_evict_stale() {
        let registry = ConnectionRegistry::new(4, BackpressurePolicy::DropOldest);
        let idle = registry.register("alice");
        let active = registry.register("alice");

        idle.last_seen_ms.store(now_ms() - 60_000, Ordering::Relaxed);
        assert!(registry.touch(active.connection_id()));

        let evicted = registry.evict_stale(Duration::from_secs(30));
        assert_eq!(evicted, vec![idle.connection_id().to_string()]);
        assert!(idle.is_closed());
        assert!(registry.is_registered(active.connection_id()));
        assert_eq!(registry.stats().evicted, 1);
    }

    #[test]
    fn test_close_all() {
        let registry = ConnectionRegistry::default();
        let a = registry.register("alice");
        let b = registry.register("bob");
        registry.close_all();
        assert_eq!(registry.connection_count(), 0);
        assert!(a.cancellation_token().is_cancelled());
        assert!(b.cancellation_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_per_connection_fifo_under_concurrent_publishers() {
        let registry = Arc::new(ConnectionRegistry::new(1024, BackpressurePolicy::DropOldest));
        let alice = registry.register("alice");
        let bob = registry.register("bob");

        let mut tasks = Vec::new();
        for (user, prefix) in [("alice", "a"), ("bob", "b")] {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..200 {
                    registry.fan_out(user, event(&format!("{prefix}-{i:03}")));
                    if i % 16 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let expected_a: Vec<String> = (0..200).map(|i| format!("a-{i:03}")).collect();
        let expected_b: Vec<String> = (0..200).map(|i| format!("b-{i:03}")).collect();
        assert_eq!(drain(&alice), expected_a);
        assert_eq!(drain(&bob), expected_b);
    }

    #[tokio::test]
    async fn test_reaper_stops_on_cancel() {
        let registry = Arc::new(ConnectionRegistry::default());
        let cancel = CancellationToken::new();
        let task = registry.spawn_reaper(
            Duration::from_millis(10),
            Duration::from_secs(60),
            cancel.clone(),
        );
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
