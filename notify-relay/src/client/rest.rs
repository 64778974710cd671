//! REST access to the notification store.

use std::sync::OnceLock;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use super::config::ClientConfig;
use super::error::{ClientError, ClientResult};
use crate::notification::Notification;

const USER_AGENT: &str = concat!("notify-relay-client/", env!("CARGO_PKG_VERSION"));

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// The REST calls the reconciliation engine depends on.
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// Every notification of the caller, newest first.
    async fn fetch_all(&self) -> ClientResult<Vec<Notification>>;

    async fn mark_read(&self, id: &str) -> ClientResult<Notification>;

    /// Returns the number of rows the server flipped.
    async fn mark_all_read(&self) -> ClientResult<u64>;

    async fn delete(&self, id: &str) -> ClientResult<()>;
}

/// [`NotificationApi`] over HTTP with bearer authentication.
#[derive(Debug, Clone)]
pub struct RestNotificationApi {
    client: reqwest::Client,
    base_url: Url,
    token: String,
}

#[derive(Debug, Deserialize)]
struct MarkAllReadBody {
    #[serde(default)]
    updated: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl RestNotificationApi {
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        install_rustls_provider();

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            token: config.token.clone(),
        })
    }

    fn collection_url(&self) -> ClientResult<Url> {
        Ok(self.base_url.join("api/notifications")?)
    }

    /// `api/notifications/{id}[/suffix]`, with `id` percent-encoded as one segment.
    fn item_url(&self, id: &str, suffix: Option<&str>) -> ClientResult<Url> {
        let mut url = self.collection_url()?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ClientError::Configuration("base URL cannot be a base".into()))?;
            segments.push(id);
            if let Some(suffix) = suffix {
                segments.push(suffix);
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        trace!(%method, %url, "REST request");
        self.client.request(method, url).bearer_auth(&self.token)
    }

    async fn send(&self, request: RequestBuilder) -> ClientResult<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.message)
            .unwrap_or(body);
        Err(map_status(status, message))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> ClientResult<T> {
        let response = self.send(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }
}

fn map_status(status: StatusCode, message: String) -> ClientError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ClientError::Auth(message),
        StatusCode::NOT_FOUND => ClientError::NotFound(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ClientError::Network(message),
        _ => ClientError::Server {
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl NotificationApi for RestNotificationApi {
    async fn fetch_all(&self) -> ClientResult<Vec<Notification>> {
        let url = self.collection_url()?;
        self.send_json(self.request(Method::GET, url)).await
    }

    async fn mark_read(&self, id: &str) -> ClientResult<Notification> {
        let url = self.item_url(id, Some("read"))?;
        self.send_json(self.request(Method::PATCH, url)).await
    }

    async fn mark_all_read(&self) -> ClientResult<u64> {
        let url = self.base_url.join("api/notifications/mark-all-read")?;
        let body: MarkAllReadBody = self.send_json(self.request(Method::PATCH, url)).await?;
        Ok(body.updated)
    }

    async fn delete(&self, id: &str) -> ClientResult<()> {
        let url = self.item_url(id, None)?;
        self.send(self.request(Method::DELETE, url)).await?;
        Ok(())
    }
}
