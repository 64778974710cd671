//! Push connection lifecycle.

use serde::Serialize;

use super::error::{ClientError, ClientResult};

/// Where the client is in its push connection lifecycle.
///
/// ```text
/// Disconnected -> Connecting -> Resyncing -> Connected
///      ^              |             |            |
///      +--------------+-------------+------------+
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Handshake done; replacing local state with a fresh fetch.
    Resyncing,
    Connected,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Resyncing)
                | (Connecting, Disconnected)
                | (Resyncing, Connected)
                | (Resyncing, Disconnected)
                | (Connected, Disconnected)
        )
    }

    pub fn transition(self, next: ConnectionState) -> ClientResult<ConnectionState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ClientError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Push events can only arrive in this state.
    pub fn is_live(self) -> bool {
        self == ConnectionState::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn test_happy_path() {
        let s = Disconnected;
        let s = s.transition(Connecting).unwrap();
        let s = s.transition(Resyncing).unwrap();
        let s = s.transition(Connected).unwrap();
        assert!(s.is_live());
        assert_eq!(s.transition(Disconnected).unwrap(), Disconnected);
    }

    #[test]
    fn test_failed_resync_goes_back_to_disconnected() {
        assert_eq!(Resyncing.transition(Disconnected).unwrap(), Disconnected);
        assert_eq!(Connecting.transition(Disconnected).unwrap(), Disconnected);
    }

    #[test]
    fn test_shortcuts_are_rejected() {
        for (from, to) in [
            (Disconnected, Connected),
            (Disconnected, Resyncing),
            (Connecting, Connected),
            (Connected, Resyncing),
            (Connected, Connecting),
            (Connected, Connected),
        ] {
            let err = from.transition(to).unwrap_err();
            assert!(matches!(err, ClientError::InvalidTransition { .. }), "{from} -> {to}");
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(Resyncing.to_string(), "resyncing");
    }
}
