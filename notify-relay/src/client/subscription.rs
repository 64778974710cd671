use tokio::sync::broadcast;
use tracing::warn;

use super::connection::ConnectionState;
use crate::notification::Notification;

/// Something a UI may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A pushed notification was merged into the list.
    NotificationAdded(Notification),
    UnreadCountChanged(usize),
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// The server rejected the credential. The engine has stopped
    /// reconnecting and the application should re-authenticate.
    SessionInvalid,
}

/// A handle on the engine's event stream. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<ClientEvent>,
}

impl Subscription {
    pub(crate) fn new(rx: broadcast::Receiver<ClientEvent>) -> Self {
        Self { rx }
    }

    /// Next event, or `None` once the engine is gone.
    ///
    /// A subscriber that falls behind skips the events it missed; the
    /// current state is always available from the engine itself.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Subscriber lagged; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<ClientEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lagged_subscriber_keeps_receiving() {
        let (tx, rx) = broadcast::channel(2);
        let mut sub = Subscription::new(rx);
        for n in 0..5 {
            tx.send(ClientEvent::UnreadCountChanged(n)).unwrap();
        }

        assert_eq!(sub.recv().await, Some(ClientEvent::UnreadCountChanged(3)));
        assert_eq!(sub.try_recv(), Some(ClientEvent::UnreadCountChanged(4)));
        assert_eq!(sub.try_recv(), None);

        drop(tx);
        assert_eq!(sub.recv().await, None);
    }
}
