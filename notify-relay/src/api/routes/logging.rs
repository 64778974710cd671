//! Runtime log level routes (admin only).

use axum::{Json, Router, extract::State, routing::get};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::jwt::ROLE_ADMIN;
use crate::api::middleware::AuthUser;
use crate::api::server::AppState;
use crate::logging::LoggingConfig;

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/api/logging",
        get(get_logging_config).put(update_logging_config),
    )
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct UpdateLogFilterRequest {
    /// `EnvFilter` directive, e.g. `notify_relay=debug,sqlx=warn`.
    pub filter: String,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct LoggingConfigResponse {
    pub filter: String,
}

fn logging_config(state: &AppState, user: &AuthUser) -> ApiResult<std::sync::Arc<LoggingConfig>> {
    if !user.claims().has_role(ROLE_ADMIN) {
        return Err(ApiError::forbidden("Admin role required"));
    }
    state
        .logging_config
        .clone()
        .ok_or_else(|| ApiError::service_unavailable("Logging configuration not available"))
}

#[utoipa::path(
    get,
    path = "/api/logging",
    tag = "logging",
    responses(
        (status = 200, description = "Current log filter", body = LoggingConfigResponse),
        (status = 403, description = "Admin role required", body = crate::api::error::ApiErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_logging_config(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<LoggingConfigResponse>> {
    let config = logging_config(&state, &user)?;
    Ok(Json(LoggingConfigResponse {
        filter: config.get_filter(),
    }))
}

#[utoipa::path(
    put,
    path = "/api/logging",
    tag = "logging",
    request_body = UpdateLogFilterRequest,
    responses(
        (status = 200, description = "Log filter updated", body = LoggingConfigResponse),
        (status = 400, description = "Invalid filter", body = crate::api::error::ApiErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_logging_config(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<UpdateLogFilterRequest>,
) -> ApiResult<Json<LoggingConfigResponse>> {
    let config = logging_config(&state, &user)?;
    config
        .set_filter(&request.filter)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(Json(LoggingConfigResponse {
        filter: config.get_filter(),
    }))
}
