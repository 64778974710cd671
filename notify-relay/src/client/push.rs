//! Push channel client.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self,
        client::IntoClientRequest,
        http::{HeaderValue, StatusCode, header::AUTHORIZATION},
        protocol::Message,
    },
};
use tracing::{debug, trace};
use url::Url;

use super::config::ClientConfig;
use super::error::{ClientError, ClientResult};
use super::rest::install_rustls_provider;
use crate::notification::{Notification, ServerMessage};

/// What the push channel yields.
#[derive(Debug, Clone, PartialEq)]
pub enum PushFrame {
    Notification(Notification),
    /// A ping or pong; proves the channel is alive.
    Heartbeat,
}

/// Ends when the server closes the channel; an `Err` item means the transport failed.
pub type PushStream = BoxStream<'static, ClientResult<PushFrame>>;

/// Opens push channels.
#[async_trait]
pub trait PushConnector: Send + Sync {
    /// Perform the handshake. A rejected credential must surface as
    /// [`ClientError::Auth`] so the caller stops retrying.
    async fn connect(&self) -> ClientResult<PushStream>;
}

/// [`PushConnector`] over WebSocket.
#[derive(Debug, Clone)]
pub struct WsPushConnector {
    url: Url,
    token: String,
    /// Upper bound on the upgrade handshake.
    timeout: Duration,
}

impl WsPushConnector {
    pub fn new(config: &ClientConfig) -> Self {
        install_rustls_provider();
        Self {
            url: config.push_url.clone(),
            token: config.token.clone(),
            timeout: config.request_timeout,
        }
    }

    fn handshake_request(&self) -> ClientResult<tungstenite::handshake::client::Request> {
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair("token", &self.token);

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::Configuration(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|e| ClientError::Configuration(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);
        Ok(request)
    }
}

#[async_trait]
impl PushConnector for WsPushConnector {
    async fn connect(&self) -> ClientResult<PushStream> {
        let request = self.handshake_request()?;
        debug!(url = %self.url, "Opening push channel");

        let (ws, response) = tokio::time::timeout(self.timeout, connect_async(request))
            .await
            .map_err(|_| {
                ClientError::Network(format!("push handshake timed out after {:?}", self.timeout))
            })?
            .map_err(map_handshake_error)?;
        debug!(status = %response.status(), "Push channel open");

        let frames = stream::unfold(ws, |mut ws| async move {
            loop {
                let frame = match ws.next().await? {
                    Ok(Message::Text(text)) => match ServerMessage::from_json(text.as_str()) {
                        Ok(ServerMessage::NewNotification(notification)) => {
                            Ok(PushFrame::Notification(notification))
                        }
                        Err(e) => {
                            // Newer servers may send events this client does not know.
                            trace!(error = %e, "Ignoring unrecognised push frame");
                            continue;
                        }
                    },
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => Ok(PushFrame::Heartbeat),
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "Push channel closed by server");
                        return None;
                    }
                    Ok(_) => continue,
                    Err(e) => Err(ClientError::Network(e.to_string())),
                };
                return Some((frame, ws));
            }
        });

        Ok(frames.boxed())
    }
}

fn map_handshake_error(err: tungstenite::Error) -> ClientError {
    match err {
        tungstenite::Error::Http(response) => {
            let body = response
                .body()
                .as_ref()
                .map(|body| String::from_utf8_lossy(body).into_owned());
            map_handshake_status(response.status(), body)
        }
        other => ClientError::Network(other.to_string()),
    }
}

fn map_handshake_status(status: StatusCode, body: Option<String>) -> ClientError {
    let message = body
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| status.to_string());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ClientError::Auth(message),
        _ => ClientError::Server {
            status: status.as_u16(),
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_request_carries_token_both_ways() {
        let config = ClientConfig::new("http://127.0.0.1:12560", "abc.def").unwrap();
        let connector = WsPushConnector::new(&config);
        let request = connector.handshake_request().unwrap();

        assert_eq!(
            request.uri().to_string(),
            "ws://127.0.0.1:12560/api/notifications/ws?token=abc.def"
        );
        assert_eq!(
            request.headers().get(AUTHORIZATION).unwrap(),
            "Bearer abc.def"
        );
    }

    #[test]
    fn test_handshake_rejection_maps_to_auth() {
        let err = map_handshake_status(StatusCode::UNAUTHORIZED, Some("Invalid token".into()));
        assert!(err.is_auth(), "{err:?}");
        assert!(map_handshake_status(StatusCode::FORBIDDEN, None).is_auth());

        let err = map_handshake_status(StatusCode::BAD_GATEWAY, None);
        assert!(matches!(err, ClientError::Server { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_refused_connection_is_network_error() {
        let config = ClientConfig::new("http://127.0.0.1:9", "t").unwrap();
        let err = WsPushConnector::new(&config).connect().await.err().unwrap();
        assert!(matches!(err, ClientError::Network(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_silent_upgrade_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept and hold sockets without ever answering the upgrade.
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let config = ClientConfig::new(&format!("http://{addr}"), "t")
            .unwrap()
            .with_request_timeout(Duration::from_millis(200));
        let connector = WsPushConnector::new(&config);

        let result = tokio::time::timeout(Duration::from_secs(5), connector.connect())
            .await
            .expect("handshake must give up on its own");
        let err = result.err().unwrap();
        assert!(matches!(err, ClientError::Network(_)), "{err:?}");
        assert!(err.is_recoverable());

        server.abort();
    }
}
