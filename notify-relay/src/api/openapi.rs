//! OpenAPI document, served through Swagger UI at `/api/docs`.

use utoipa::OpenApi;

use crate::api::error::ApiErrorResponse;
use crate::api::routes::health::HealthResponse;
use crate::api::routes::logging::{LoggingConfigResponse, UpdateLogFilterRequest};
use crate::api::routes::notifications::{DeleteResponse, MarkAllReadResponse, UnreadCountResponse};
use crate::notification::{NewNotification, Notification, NotificationType, RegistryStats};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "notify-relay API",
        version = "0.1.0",
        description = "Notification store and real-time push channel. Notifications are created by trusted publishers and pushed to every live connection of the recipient over `/api/notifications/ws`; clients reconcile read and delete state through REST.",
        license(name = "MIT OR Apache-2.0")
    ),
    servers(
        (url = "http://localhost:12560", description = "Local development server")
    ),
    tags(
        (name = "health", description = "Liveness and push connection counters"),
        (name = "notifications", description = "Caller-scoped notification endpoints"),
        (name = "logging", description = "Runtime log filter")
    ),
    paths(
        crate::api::routes::health::health_check,
        crate::api::routes::notifications::list_notifications,
        crate::api::routes::notifications::unread_count,
        crate::api::routes::notifications::mark_read,
        crate::api::routes::notifications::mark_all_read,
        crate::api::routes::notifications::delete_notification,
        crate::api::routes::notifications::publish_notification,
        crate::api::routes::logging::get_logging_config,
        crate::api::routes::logging::update_logging_config,
    ),
    components(
        schemas(
            ApiErrorResponse,
            HealthResponse,
            RegistryStats,
            Notification,
            NotificationType,
            NewNotification,
            UnreadCountResponse,
            MarkAllReadResponse,
            DeleteResponse,
            LoggingConfigResponse,
            UpdateLogFilterRequest,
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}
