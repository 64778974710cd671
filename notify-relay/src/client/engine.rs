//! Client reconciliation engine.
//!
//! Keeps a local notification list in step with the server by combining
//! REST snapshots, live pushes, and optimistic user mutations. All state
//! changes go through one lock that is never held across an await, so the
//! list is only ever observed between whole transitions.
//!
//! While open, a supervisor task owns the push channel:
//! connect, resync from REST, pump pushes until the channel dies, back off,
//! repeat. A rejected credential ends the loop and emits
//! [`ClientEvent::SessionInvalid`].

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::config::ClientConfig;
use super::connection::ConnectionState;
use super::error::{ClientError, ClientResult};
use super::mutation::Mutation;
use super::push::{PushConnector, PushFrame, PushStream, WsPushConnector};
use super::reconnect::ReconnectPolicy;
use super::rest::{NotificationApi, RestNotificationApi};
use super::state::{FetchTicket, MutationId, NotificationState};
use super::subscription::{ClientEvent, Subscription};
use crate::notification::Notification;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub reconnect: ReconnectPolicy,
    pub liveness_timeout: Duration,
    pub event_capacity: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            liveness_timeout: Duration::from_secs(90),
            event_capacity: 256,
        }
    }
}

impl From<&ClientConfig> for EngineOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            reconnect: config.reconnect.clone(),
            liveness_timeout: config.liveness_timeout,
            event_capacity: config.event_capacity,
        }
    }
}

struct Supervisor {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct ReconciliationEngine {
    inner: Arc<Inner>,
    supervisor: Mutex<Option<Supervisor>>,
}

struct Inner {
    api: Arc<dyn NotificationApi>,
    connector: Arc<dyn PushConnector>,
    state: Mutex<NotificationState>,
    connection: Mutex<ConnectionState>,
    events: broadcast::Sender<ClientEvent>,
    options: EngineOptions,
}

enum PumpEnd {
    Cancelled,
    Lost(String),
}

/// Abandons the fetch if the request future is dropped before it lands.
struct FetchGuard<'a> {
    inner: &'a Inner,
    ticket: Option<FetchTicket>,
}

impl FetchGuard<'_> {
    fn take(mut self) -> Option<FetchTicket> {
        self.ticket.take()
    }
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.inner.state.lock().abandon_fetch(ticket);
        }
    }
}

impl ReconciliationEngine {
    pub fn new(
        api: Arc<dyn NotificationApi>,
        connector: Arc<dyn PushConnector>,
        options: EngineOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                api,
                connector,
                state: Mutex::new(NotificationState::new()),
                connection: Mutex::new(ConnectionState::Disconnected),
                events,
                options,
            }),
            supervisor: Mutex::new(None),
        }
    }

    /// REST and WebSocket transports for `config`.
    pub fn from_config(config: &ClientConfig) -> ClientResult<Self> {
        let api = Arc::new(RestNotificationApi::new(config)?);
        let connector = Arc::new(WsPushConnector::new(config));
        Ok(Self::new(api, connector, EngineOptions::from(config)))
    }

    /// Replace local state with a fresh fetch.
    ///
    /// Pending mutations stay applied on top of the result. A response that
    /// was overtaken by a newer fetch is discarded.
    pub async fn initialize(&self) -> ClientResult<()> {
        self.inner.initialize().await
    }

    /// Merge a pushed notification. Returns false for duplicates.
    pub fn on_push(&self, notification: Notification) -> bool {
        self.inner.on_push(notification)
    }

    /// Optimistically mark one notification read.
    ///
    /// Unknown ids, and ids already read with nothing in flight, return
    /// immediately without a request. A 404 from the server counts as
    /// success. Any other failure restores the previous value.
    pub async fn mark_read(&self, id: &str) -> ClientResult<()> {
        let started = self.inner.update(|s| {
            s.mark_read_required(id).then(|| {
                let mutation = Mutation::MarkRead(id.to_string());
                (s.begin(mutation.clone()), mutation)
            })
        });
        match started {
            Some((mutation_id, mutation)) => self.settle(mutation, mutation_id).await,
            None => {
                trace!(id, "mark_read skipped; nothing to change");
                Ok(())
            }
        }
    }

    /// Optimistically mark everything read. On failure each item gets its
    /// own previous value back.
    pub async fn mark_all_read(&self) -> ClientResult<()> {
        let (mutation_id, mutation) = self.inner.update(|s| {
            let mutation = Mutation::mark_all_read_of(s.items());
            (s.begin(mutation.clone()), mutation)
        });
        self.settle(mutation, mutation_id).await
    }

    /// Optimistically remove a notification. Unknown ids are a no-op.
    pub async fn delete(&self, id: &str) -> ClientResult<()> {
        let started = self.inner.update(|s| {
            s.contains(id).then(|| {
                let mutation = Mutation::Delete(id.to_string());
                (s.begin(mutation.clone()), mutation)
            })
        });
        match started {
            Some((mutation_id, mutation)) => self.settle(mutation, mutation_id).await,
            None => Ok(()),
        }
    }

    /// The push channel went away.
    pub fn on_disconnect(&self) {
        self.inner.on_disconnect();
    }

    /// A push handshake succeeded; resync and go live.
    pub async fn on_reconnect(&self) -> ClientResult<()> {
        self.inner.enter_connecting()?;
        self.inner.resync().await
    }

    /// Start the push supervisor. Does nothing if it is already running.
    pub fn open(&self) {
        let mut supervisor = self.supervisor.lock();
        if supervisor.as_ref().is_some_and(|s| !s.task.is_finished()) {
            return;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.inner.clone().supervise(cancel.clone()));
        *supervisor = Some(Supervisor { cancel, task });
    }

    /// Stop the push supervisor and wait for it to exit.
    pub async fn close(&self) {
        let supervisor = self.supervisor.lock().take();
        if let Some(Supervisor { cancel, task }) = supervisor {
            cancel.cancel();
            if let Err(e) = task.await {
                warn!("Push supervisor task failed: {}", e);
            }
        }
        self.inner.on_disconnect();
    }

    /// Whether the push supervisor is running.
    pub fn is_open(&self) -> bool {
        self.supervisor
            .lock()
            .as_ref()
            .is_some_and(|s| !s.task.is_finished())
    }

    pub fn snapshot(&self) -> Vec<Notification> {
        self.inner.state.lock().items().to_vec()
    }

    pub fn get(&self, id: &str) -> Option<Notification> {
        self.inner.state.lock().get(id).cloned()
    }

    pub fn unread_count(&self) -> usize {
        self.inner.state.lock().unread_count()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.connection.lock()
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription::new(self.inner.events.subscribe())
    }

    /// Run the request on its own task so the mutation settles even if the
    /// caller stops waiting.
    async fn settle(&self, mutation: Mutation, id: MutationId) -> ClientResult<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.run_mutation(mutation, id).await })
            .await
            .map_err(|e| {
                warn!("Mutation task failed: {}", e);
                ClientError::Closed
            })?
    }
}

impl Drop for ReconciliationEngine {
    fn drop(&mut self) {
        if let Some(supervisor) = self.supervisor.get_mut().take() {
            supervisor.cancel.cancel();
        }
    }
}

impl Inner {
    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn note_error(&self, err: &ClientError) {
        if err.is_auth() {
            warn!(error = %err, "Session rejected by server");
            self.emit(ClientEvent::SessionInvalid);
        }
    }

    /// Mutate local state, announcing unread count changes.
    fn update<R>(&self, f: impl FnOnce(&mut NotificationState) -> R) -> R {
        let (result, before, after) = {
            let mut state = self.state.lock();
            let before = state.unread_count();
            let result = f(&mut state);
            (result, before, state.unread_count())
        };
        if before != after {
            self.emit(ClientEvent::UnreadCountChanged(after));
        }
        result
    }

    fn set_connection(&self, next: ConnectionState) -> ClientResult<()> {
        let from = {
            let mut current = self.connection.lock();
            let from = *current;
            if from == next {
                return Ok(());
            }
            *current = from.transition(next)?;
            from
        };
        debug!(%from, to = %next, "Push connection state changed");
        self.emit(ClientEvent::StateChanged { from, to: next });
        Ok(())
    }

    /// Any state other than `Disconnected` is torn down first.
    fn enter_connecting(&self) -> ClientResult<()> {
        if *self.connection.lock() != ConnectionState::Disconnected {
            self.set_connection(ConnectionState::Disconnected)?;
        }
        self.set_connection(ConnectionState::Connecting)
    }

    fn on_disconnect(&self) {
        if let Err(e) = self.set_connection(ConnectionState::Disconnected) {
            warn!("Ignoring disconnect: {}", e);
        }
    }

    fn on_push(&self, notification: Notification) -> bool {
        let added = self.update(|s| s.insert_pushed(notification.clone()));
        if added {
            debug!(id = %notification.id, "Merged pushed notification");
            self.emit(ClientEvent::NotificationAdded(notification));
        } else {
            trace!(id = %notification.id, "Ignoring duplicate push");
        }
        added
    }

    async fn initialize(&self) -> ClientResult<()> {
        let guard = FetchGuard {
            inner: self,
            ticket: Some(self.state.lock().begin_fetch()),
        };

        match self.api.fetch_all().await {
            Ok(items) => {
                let count = items.len();
                let ticket = guard.take();
                let applied = ticket.is_some_and(|t| self.update(|s| s.apply_fetch(t, items)));
                if applied {
                    debug!(count, "Applied notification snapshot");
                } else {
                    debug!("Discarded snapshot overtaken by a newer fetch");
                }
                Ok(())
            }
            Err(e) => {
                drop(guard);
                self.note_error(&e);
                Err(e)
            }
        }
    }

    /// Connecting -> Resyncing -> Connected, or back to Disconnected on failure.
    async fn resync(&self) -> ClientResult<()> {
        self.set_connection(ConnectionState::Resyncing)?;
        match self.initialize().await {
            Ok(()) => self.set_connection(ConnectionState::Connected),
            Err(e) => {
                self.on_disconnect();
                Err(e)
            }
        }
    }

    async fn run_mutation(&self, mutation: Mutation, id: MutationId) -> ClientResult<()> {
        let result = match &mutation {
            Mutation::MarkRead(target) => self.api.mark_read(target).await.map(|_| ()),
            Mutation::MarkAllRead { .. } => self.api.mark_all_read().await.map(|_| ()),
            Mutation::Delete(target) => self.api.delete(target).await,
        };

        match result {
            Ok(()) => {
                self.update(|s| s.confirm(id));
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                // Already gone server-side; the next resync drops it locally.
                debug!(kind = mutation.kind(), target = ?mutation.target(), "Target not found; treating as done");
                self.update(|s| s.confirm(id));
                Ok(())
            }
            Err(e) => {
                warn!(
                    kind = mutation.kind(),
                    target = ?mutation.target(),
                    error = %e,
                    "Mutation failed; rolling back"
                );
                self.update(|s| s.rollback(id));
                self.note_error(&e);
                Err(e)
            }
        }
    }

    async fn supervise(self: Arc<Self>, cancel: CancellationToken) {
        let policy = self.options.reconnect.clone();
        let mut attempt: u32 = 0;

        loop {
            match self.enter_connecting() {
                Ok(()) => {
                    if self.connect_once(&cancel, &mut attempt).await.is_break() {
                        break;
                    }
                }
                Err(e) => {
                    // Someone else moved the state between our check and the transition.
                    warn!(attempt, error = %e, "Push connection state contended");
                    self.on_disconnect();
                }
            }

            if !policy.allows(attempt) {
                warn!(attempts = attempt, "Giving up on push channel");
                break;
            }
            let delay = policy.delay_for(attempt);
            attempt = attempt.saturating_add(1);
            debug!(?delay, attempt, "Reconnecting push channel");

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.on_disconnect();
        debug!("Push supervisor stopped");
    }

    /// One handshake, resync and pump cycle. `Break` stops the supervisor.
    async fn connect_once(&self, cancel: &CancellationToken, attempt: &mut u32) -> ControlFlow<()> {
        let connected = tokio::select! {
            _ = cancel.cancelled() => return ControlFlow::Break(()),
            result = self.connector.connect() => result,
        };

        let stream = match connected {
            Ok(stream) => stream,
            Err(e) => {
                self.on_disconnect();
                if e.is_auth() {
                    self.note_error(&e);
                    return ControlFlow::Break(());
                }
                warn!(attempt = *attempt, error = %e, "Push handshake failed");
                return ControlFlow::Continue(());
            }
        };

        let resynced = tokio::select! {
            _ = cancel.cancelled() => return ControlFlow::Break(()),
            result = self.resync() => result,
        };
        match resynced {
            Err(e) if e.is_auth() => ControlFlow::Break(()),
            Err(e) => {
                warn!(attempt = *attempt, error = %e, "Resync after handshake failed");
                ControlFlow::Continue(())
            }
            Ok(()) => {
                info!("Push channel connected");
                *attempt = 0;
                let end = self.pump(stream, cancel).await;
                self.on_disconnect();
                match end {
                    PumpEnd::Cancelled => ControlFlow::Break(()),
                    PumpEnd::Lost(reason) => {
                        info!(%reason, "Push channel lost");
                        ControlFlow::Continue(())
                    }
                }
            }
        }
    }

    async fn pump(&self, mut stream: PushStream, cancel: &CancellationToken) -> PumpEnd {
        let liveness = self.options.liveness_timeout;
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return PumpEnd::Cancelled,
                next = tokio::time::timeout(liveness, stream.next()) => next,
            };
            match next {
                Err(_) => return PumpEnd::Lost(format!("nothing received for {liveness:?}")),
                Ok(None) => return PumpEnd::Lost("closed by server".to_string()),
                Ok(Some(Err(e))) => return PumpEnd::Lost(e.to_string()),
                Ok(Some(Ok(PushFrame::Heartbeat))) => trace!("Push heartbeat"),
                Ok(Some(Ok(PushFrame::Notification(notification)))) => {
                    // Held across the merge so a concurrent disconnect cannot interleave.
                    let connection = self.connection.lock();
                    if !connection.is_live() {
                        return PumpEnd::Lost(format!("push arrived while {}", *connection));
                    }
                    self.on_push(notification);
                }
            }
        }
    }
}
