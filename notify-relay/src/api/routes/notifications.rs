//! Notification REST routes.
//!
//! All routes act on the authenticated caller's own notifications. A
//! notification id belonging to someone else answers 404 exactly like an id
//! that never existed.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, patch},
};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::middleware::AuthUser;
use crate::api::server::AppState;
use crate::database::repositories::NotificationRepository;
use crate::notification::{EventPublisher, NewNotification, Notification};

/// Create the notifications router.
///
/// Paths are absolute so the router can be merged next to the push route,
/// which is authenticated differently.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/notifications",
            get(list_notifications).post(publish_notification),
        )
        .route("/api/notifications/unread-count", get(unread_count))
        .route("/api/notifications/mark-all-read", patch(mark_all_read))
        .route("/api/notifications/{id}/read", patch(mark_read))
        .route("/api/notifications/{id}", delete(delete_notification))
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct UnreadCountResponse {
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct MarkAllReadResponse {
    pub success: bool,
    /// Notifications that changed from unread to read.
    pub updated: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct DeleteResponse {
    pub success: bool,
}

fn repository(state: &AppState) -> ApiResult<&Arc<dyn NotificationRepository>> {
    state
        .notification_repository
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Notification store not available"))
}

fn publisher(state: &AppState) -> ApiResult<&EventPublisher> {
    state
        .publisher
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Event publisher not available"))
}

#[utoipa::path(
    get,
    path = "/api/notifications",
    tag = "notifications",
    responses(
        (status = 200, description = "Caller's notifications, newest first", body = Vec<Notification>),
        (status = 401, description = "Missing or invalid credential", body = crate::api::error::ApiErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_notifications(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Vec<Notification>>> {
    let items = repository(&state)?
        .list_for_recipient(user.user_id())
        .await?;
    Ok(Json(items))
}

#[utoipa::path(
    get,
    path = "/api/notifications/unread-count",
    tag = "notifications",
    responses(
        (status = 200, description = "Number of unread notifications", body = UnreadCountResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn unread_count(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<UnreadCountResponse>> {
    let count = repository(&state)?.count_unread(user.user_id()).await?;
    Ok(Json(UnreadCountResponse { count }))
}

#[utoipa::path(
    patch,
    path = "/api/notifications/{id}/read",
    tag = "notifications",
    params(("id" = String, Path, description = "Notification ID")),
    responses(
        (status = 200, description = "Updated notification", body = Notification),
        (status = 404, description = "Notification not found", body = crate::api::error::ApiErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn mark_read(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Notification>> {
    let updated = repository(&state)?.mark_read(user.user_id(), &id).await?;
    Ok(Json(updated))
}

#[utoipa::path(
    patch,
    path = "/api/notifications/mark-all-read",
    tag = "notifications",
    responses(
        (status = 200, description = "All notifications marked read", body = MarkAllReadResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn mark_all_read(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<MarkAllReadResponse>> {
    let updated = repository(&state)?.mark_all_read(user.user_id()).await?;
    tracing::debug!(user_id = %user.user_id(), updated, "Marked all notifications read");
    Ok(Json(MarkAllReadResponse {
        success: true,
        updated,
    }))
}

#[utoipa::path(
    delete,
    path = "/api/notifications/{id}",
    tag = "notifications",
    params(("id" = String, Path, description = "Notification ID")),
    responses(
        (status = 200, description = "Notification deleted", body = DeleteResponse),
        (status = 404, description = "Notification not found", body = crate::api::error::ApiErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_notification(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<DeleteResponse>> {
    repository(&state)?.delete(user.user_id(), &id).await?;
    Ok(Json(DeleteResponse { success: true }))
}

#[utoipa::path(
    post,
    path = "/api/notifications",
    tag = "notifications",
    request_body = NewNotification,
    responses(
        (status = 201, description = "Notification stored and pushed to live connections", body = Notification),
        (status = 403, description = "Caller may not publish", body = crate::api::error::ApiErrorResponse),
        (status = 422, description = "Invalid notification", body = crate::api::error::ApiErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn publish_notification(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<NewNotification>,
) -> ApiResult<(StatusCode, Json<Notification>)> {
    if !user.claims().can_publish() {
        return Err(ApiError::forbidden(
            "Publishing requires the system or admin role",
        ));
    }
    let notification = publisher(&state)?.publish_new(request).await?;
    Ok((StatusCode::CREATED, Json(notification)))
}
