//! API route modules.

pub mod health;
pub mod logging;
pub mod notifications;
pub mod push;

use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::middleware::JwtAuthLayer;
use crate::api::openapi::ApiDoc;
use crate::api::server::AppState;

/// Create the main API router with all routes.
///
/// REST routes sit behind [`JwtAuthLayer`] when a JWT service is configured.
/// Without one they answer 401 from the `AuthUser` extractor. The push route
/// authenticates its own handshake, and health is public.
pub fn create_router(state: AppState) -> Router {
    let mut authenticated = notifications::router().merge(logging::router());
    if let Some(jwt_service) = &state.jwt_service {
        authenticated = authenticated.route_layer(JwtAuthLayer::new(jwt_service.clone()));
    }

    Router::new()
        .merge(authenticated)
        .merge(push::router())
        .merge(health::router())
        .merge(SwaggerUi::new("/api/docs").url("/api/openapi.json", ApiDoc::openapi()))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header::AUTHORIZATION};
    use tower::ServiceExt;

    use crate::api::jwt::JwtService;
    use crate::database::repositories::{NotificationRepository, SqlxNotificationRepository};
    use crate::database::{init_pool, run_migrations};
    use crate::notification::{
        ConnectionRegistry, EventPublisher, Metadata, Notification, NotificationType,
    };

    struct Harness {
        router: Router,
        jwt: Arc<JwtService>,
        publisher: EventPublisher,
    }

    async fn harness() -> Harness {
        let pool = init_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let repo: Arc<dyn NotificationRepository> = Arc::new(SqlxNotificationRepository::new(pool));
        let registry = Arc::new(ConnectionRegistry::default());
        let publisher = EventPublisher::new(repo.clone(), registry.clone());
        let jwt = Arc::new(JwtService::new(
            "router-test-secret-32-chars-long!",
            "notify-relay",
            "notify-relay-api",
            None,
        ));
        let state = AppState::new(registry)
            .with_jwt_service(jwt.clone())
            .with_notification_repository(repo)
            .with_publisher(publisher.clone());
        Harness {
            router: create_router(state),
            jwt,
            publisher,
        }
    }

    fn request(method: &str, uri: &str, token: &str, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(AUTHORIZATION, format!("Bearer {token}"));
        match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_rest_surface_is_scoped_to_caller() {
        let h = harness().await;
        let alice = h.jwt.generate_token("alice", vec![]).unwrap();
        let bob = h.jwt.generate_token("bob", vec![]).unwrap();

        let n = h
            .publisher
            .publish("alice", NotificationType::NewComment, "Reply", "Bob replied", Metadata::new())
            .await
            .unwrap();

        let response = h.router.clone().oneshot(request("GET", "/api/notifications", &alice, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let items: Vec<Notification> = json(response).await;
        assert_eq!(items, vec![n.clone()]);

        let response = h.router.clone().oneshot(request("GET", "/api/notifications", &bob, None)).await.unwrap();
        let items: Vec<Notification> = json(response).await;
        assert!(items.is_empty());

        let foreign = format!("/api/notifications/{}/read", n.id);
        let response = h.router.clone().oneshot(request("PATCH", &foreign, &bob, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = h.router.clone().oneshot(request("PATCH", &foreign, &alice, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let updated: Notification = json(response).await;
        assert!(updated.is_read);

        // Idempotent.
        let response = h.router.clone().oneshot(request("PATCH", &foreign, &alice, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = h
            .router
            .clone()
            .oneshot(request("GET", "/api/notifications/unread-count", &alice, None))
            .await
            .unwrap();
        let count: notifications::UnreadCountResponse = json(response).await;
        assert_eq!(count.count, 0);

        let path = format!("/api/notifications/{}", n.id);
        let response = h.router.clone().oneshot(request("DELETE", &path, &alice, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = h.router.clone().oneshot(request("DELETE", &path, &alice, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_mark_all_read_reports_changes() {
        let h = harness().await;
        let token = h.jwt.generate_token("alice", vec![]).unwrap();
        for title in ["One", "Two"] {
            h.publisher
                .publish("alice", NotificationType::System, title, "body", Metadata::new())
                .await
                .unwrap();
        }

        let response = h
            .router
            .clone()
            .oneshot(request("PATCH", "/api/notifications/mark-all-read", &token, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: notifications::MarkAllReadResponse = json(response).await;
        assert!(body.success);
        assert_eq!(body.updated, 2);
    }

    #[tokio::test]
    async fn test_publish_requires_role_and_valid_body() {
        let h = harness().await;
        let learner = h.jwt.generate_token("alice", vec![]).unwrap();
        let service = h.jwt.generate_token("quiz-service", vec!["system".into()]).unwrap();
        let body = serde_json::json!({
            "recipientId": "alice",
            "type": "achievement",
            "title": "Quiz master",
            "message": "You aced the quiz",
            "metadata": {"quizId": "q1"}
        });

        let response = h
            .router
            .clone()
            .oneshot(request("POST", "/api/notifications", &learner, Some(body.clone())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = h
            .router
            .clone()
            .oneshot(request("POST", "/api/notifications", &service, Some(body)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: Notification = json(response).await;
        assert_eq!(created.notification_type, NotificationType::Achievement);

        let bad = serde_json::json!({
            "recipientId": "alice",
            "type": "achievement",
            "title": "",
            "message": "m"
        });
        let response = h
            .router
            .clone()
            .oneshot(request("POST", "/api/notifications", &service, Some(bad)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_missing_token_and_public_health() {
        let h = harness().await;

        let response = h
            .router
            .clone()
            .oneshot(Request::builder().uri("/api/notifications").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = h
            .router
            .clone()
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["push"]["connections"], 0);
    }

    #[tokio::test]
    async fn test_routes_unauthorized_without_jwt_service() {
        let router = create_router(AppState::new(Arc::new(ConnectionRegistry::default())));
        let response = router
            .oneshot(Request::builder().uri("/api/notifications").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
