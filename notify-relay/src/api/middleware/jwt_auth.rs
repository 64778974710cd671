//! JWT authentication middleware.
//!
//! [`JwtAuthLayer`] guards the REST routes: it validates the Bearer token and
//! stores the [`Claims`] in request extensions, where handlers pick them up
//! through the [`AuthUser`] extractor.

use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};

use crate::api::error::ApiError;
use crate::api::jwt::{Claims, JwtError, JwtService};

/// Reasons a request failed authentication.
#[derive(Debug)]
pub enum JwtAuthError {
    MissingToken,
    /// Authorization header present but not `Bearer <token>`.
    InvalidFormat,
    InvalidToken(JwtError),
}

impl IntoResponse for JwtAuthError {
    fn into_response(self) -> Response {
        let message = match self {
            JwtAuthError::MissingToken => "Missing authorization token",
            JwtAuthError::InvalidFormat => "Invalid token format",
            JwtAuthError::InvalidToken(JwtError::TokenExpired) => "Token has expired",
            JwtAuthError::InvalidToken(_) => "Invalid token",
        };
        ApiError::unauthorized(message).into_response()
    }
}

/// Extract a Bearer token from request headers.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, JwtAuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(JwtAuthError::MissingToken)?
        .to_str()
        .map_err(|_| JwtAuthError::InvalidFormat)?;

    match value.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim()),
        _ => Err(JwtAuthError::InvalidFormat),
    }
}

/// JWT authentication layer for use with axum's layer system.
#[derive(Clone)]
pub struct JwtAuthLayer {
    jwt_service: Arc<JwtService>,
}

impl JwtAuthLayer {
    pub fn new(jwt_service: Arc<JwtService>) -> Self {
        Self { jwt_service }
    }
}

impl<S> tower::Layer<S> for JwtAuthLayer {
    type Service = JwtAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        JwtAuthService {
            inner,
            jwt_service: self.jwt_service.clone(),
        }
    }
}

#[derive(Clone)]
pub struct JwtAuthService<S> {
    inner: S,
    jwt_service: Arc<JwtService>,
}

impl<S, B> tower::Service<axum::http::Request<B>> for JwtAuthService<S>
where
    S: tower::Service<axum::http::Request<B>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: axum::http::Request<B>) -> Self::Future {
        let jwt_service = self.jwt_service.clone();
        // Swap so the service that was polled ready handles this request.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let claims = match bearer_token(request.headers())
                .and_then(|token| jwt_service.validate_token(token).map_err(JwtAuthError::InvalidToken))
            {
                Ok(claims) => claims,
                Err(e) => return Ok(e.into_response()),
            };

            let (mut parts, body) = request.into_parts();
            parts.extensions.insert(claims);
            inner
                .call(axum::http::Request::from_parts(parts, body))
                .await
        })
    }
}

/// Authenticated principal, taken from the claims the layer stored.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Claims);

impl AuthUser {
    pub fn user_id(&self) -> &str {
        self.0.user_id()
    }

    pub fn claims(&self) -> &Claims {
        &self.0
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Claims>()
            .cloned()
            .map(AuthUser)
            .ok_or_else(|| ApiError::unauthorized("Authentication not configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::Request, http::StatusCode, routing::get};
    use tower::ServiceExt;

    fn jwt() -> Arc<JwtService> {
        Arc::new(JwtService::new(
            "test-secret-key-32-chars-long!!",
            "test-issuer",
            "test-audience",
            Some(3600),
        ))
    }

    async fn whoami(user: AuthUser) -> String {
        user.user_id().to_string()
    }

    fn app(jwt: Arc<JwtService>) -> Router {
        Router::new()
            .route("/me", get(whoami))
            .route_layer(JwtAuthLayer::new(jwt))
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert!(matches!(bearer_token(&headers), Err(JwtAuthError::MissingToken)));

        headers.insert(AUTHORIZATION, "Basic dXNlcjpwYXNz".parse().unwrap());
        assert!(matches!(bearer_token(&headers), Err(JwtAuthError::InvalidFormat)));

        headers.insert(AUTHORIZATION, "Bearer ".parse().unwrap());
        assert!(matches!(bearer_token(&headers), Err(JwtAuthError::InvalidFormat)));

        headers.insert(AUTHORIZATION, "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def.ghi");
    }

    #[tokio::test]
    async fn test_layer_injects_claims() {
        let jwt = jwt();
        let token = jwt.generate_token("learner-7", vec![]).unwrap();

        let response = app(jwt)
            .oneshot(
                Request::builder()
                    .uri("/me")
                    .header(AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"learner-7");
    }

    #[tokio::test]
    async fn test_layer_rejects_missing_and_bad_tokens() {
        for header in [None, Some("Bearer nope")] {
            let mut request = Request::builder().uri("/me");
            if let Some(h) = header {
                request = request.header(AUTHORIZATION, h);
            }
            let response = app(jwt())
                .oneshot(request.body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn test_extractor_without_layer_is_unauthorized() {
        let response = Router::new()
            .route("/me", get(whoami))
            .oneshot(Request::builder().uri("/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
