use std::fmt;
use std::time::Duration;

use url::Url;

use super::error::{ClientError, ClientResult};
use super::reconnect::ReconnectPolicy;

const PUSH_PATH: &str = "api/notifications/ws";

/// Connection settings for the client engine.
#[derive(Clone)]
pub struct ClientConfig {
    /// REST root, always ending in `/`.
    pub base_url: Url,
    pub push_url: Url,
    pub token: String,
    /// Per REST call, and for the push handshake.
    pub request_timeout: Duration,
    /// Tear the push channel down when nothing (not even a ping) arrives for this long.
    pub liveness_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    /// Capacity of the subscriber event channel.
    pub event_capacity: usize,
}

impl ClientConfig {
    /// Derive every endpoint from the server root, e.g. `http://localhost:12560`.
    pub fn new(base_url: &str, token: impl Into<String>) -> ClientResult<Self> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut push_url = base_url.join(PUSH_PATH)?;
        let scheme = match base_url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => {
                return Err(ClientError::Configuration(format!(
                    "unsupported scheme '{other}'"
                )));
            }
        };
        push_url
            .set_scheme(scheme)
            .map_err(|_| ClientError::Configuration("cannot derive push URL".into()))?;

        Ok(Self {
            base_url,
            push_url,
            token: token.into(),
            request_timeout: Duration::from_secs(10),
            liveness_timeout: Duration::from_secs(90),
            reconnect: ReconnectPolicy::default(),
            event_capacity: 256,
        })
    }

    pub fn with_push_url(mut self, push_url: Url) -> Self {
        self.push_url = push_url;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_liveness_timeout(mut self, timeout: Duration) -> Self {
        self.liveness_timeout = timeout;
        self
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url.as_str())
            .field("push_url", &self.push_url.as_str())
            .field("token", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .field("liveness_timeout", &self.liveness_timeout)
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_from_root() {
        let config = ClientConfig::new("http://127.0.0.1:12560", "t").unwrap();
        assert_eq!(config.base_url.as_str(), "http://127.0.0.1:12560/");
        assert_eq!(
            config.push_url.as_str(),
            "ws://127.0.0.1:12560/api/notifications/ws"
        );
    }

    #[test]
    fn test_endpoints_under_prefix() {
        let config = ClientConfig::new("https://example.com/relay", "t").unwrap();
        assert_eq!(config.base_url.as_str(), "https://example.com/relay/");
        assert_eq!(
            config.push_url.as_str(),
            "wss://example.com/relay/api/notifications/ws"
        );
    }

    #[test]
    fn test_rejects_unknown_scheme() {
        assert!(matches!(
            ClientConfig::new("ftp://example.com", "t"),
            Err(ClientError::Configuration(_))
        ));
        assert!(ClientConfig::new("not a url", "t").is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = ClientConfig::new("http://localhost", "secret-token").unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret-token"));
    }
}
