//! HTTP API layer.

mod answers;
mod documents;
mod extract;
mod groups;
mod items;
mod readings;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tim_core::access::Principal;
use tim_core::auth::TokenVerifier;
use tim_core::db::TimDb;
use tim_core::events::EventBus;
use tim_core::plugin::PluginClient;
use tim_core::TimError;
use tokio::sync::RwLock;

use crate::config::Config;

/// Identity of the caller, taken from a bearer token or, when
/// `trust_user_header` is set, the `X-User-Id` header. Requests without
/// either are anonymous.
#[derive(Clone, Debug, Default)]
pub struct AuthContext {
    pub user_name: Option<String>,
}

impl AuthContext {
    pub fn principal(&self, db: &TimDb, now: DateTime<Utc>) -> Principal {
        db.principal_for_name(self.user_name.as_deref(), now)
    }
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;
        if let Some(auth) = headers.get("Authorization").and_then(|v| v.to_str().ok()) {
            if let Some(token) = auth.strip_prefix("Bearer ") {
                if let Some(claims) = state.verifier.verify(token).await {
                    return Ok(Self {
                        user_name: Some(claims.sub),
                    });
                }
            }
        }
        if !state.config.trust_user_header {
            return Ok(Self::default());
        }
        let user_name = headers
            .get("X-User-Id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        Ok(Self { user_name })
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<RwLock<TimDb>>,
    pub plugins: Arc<dyn PluginClient>,
    pub events: EventBus,
    pub verifier: Arc<dyn TokenVerifier>,
    pub config: Arc<Config>,
}

/// Error returned by handlers, rendered as `{"error": message}`.
#[derive(Debug)]
pub struct ApiError(pub TimError);

impl From<TimError> for ApiError {
    fn from(err: TimError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            TimError::AccessDenied(_) | TimError::ItemExists(_) => StatusCode::FORBIDDEN,
            TimError::NotFound(_) => StatusCode::NOT_FOUND,
            TimError::Validation(_) | TimError::Plugin(_) | TimError::Conflict(_) => StatusCode::BAD_REQUEST,
            TimError::Storage(_) | TimError::Io(_) | TimError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(%status, error = %self.0, "request rejected");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

pub(crate) fn ok_response() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/users", post(groups::create_user))
        .route("/groups/create/{name}", post(groups::create_group))
        .route("/groups/show/{name}", get(groups::show_group))
        .route("/groups/addmember/{group}", put(groups::add_members))
        .route("/groups/removemember/{group}", put(groups::remove_members))
        .route("/createFolder", post(items::create_folder))
        .route("/createDocument", post(items::create_document))
        .route("/getItems", get(items::get_items))
        .route("/rename/{id}", put(items::rename_item))
        .route("/items/{id}", delete(items::delete_item))
        .route("/permissions/add", put(items::add_permission))
        .route("/permissions/remove", put(items::remove_permission))
        .route("/docs/{id}", get(documents::get_document))
        .route("/docs/{id}/settings", get(documents::get_settings))
        .route("/docs/{id}/changelog", get(documents::get_changelog))
        .route("/docs/{id}/plugins", get(documents::render_plugins))
        .route("/docs/{id}/paragraphs", post(documents::add_paragraph))
        .route(
            "/docs/{id}/paragraphs/{par}",
            put(documents::modify_paragraph).delete(documents::delete_paragraph),
        )
        .route("/docs/{id}/paragraphs/{par}/move", put(documents::move_paragraph))
        .route("/{plugintype}/{task_id}/answer", put(answers::answer))
        .route("/answers/{task_id}/{user_id}", get(answers::get_answers))
        .route("/savePoints/{user_id}/{answer_id}", put(answers::save_points))
        .route("/taskinfo/{task_id}", get(answers::task_info))
        .route("/taskhtml/{task_id}", get(answers::task_html))
        .route("/reqs/{plugintype}", get(answers::plugin_reqs))
        .route("/getTaskUsers/{task_id}", get(answers::task_users))
        .route("/renameAnswers/{old}/{new}/{*doc_path}", put(answers::rename_answers))
        .route("/read/stats/{*doc_path}", get(readings::read_stats))
        .route("/read/{doc_id}", get(readings::get_readings).put(readings::mark_all_read))
        .route("/read/{doc_id}/{par_id}/{read_type}", put(readings::mark_read))
        .route("/unread/{doc_id}/{par_id}", put(readings::unread))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tim_core::plugin::PluginError;

    #[test]
    fn error_statuses() {
        let cases = [
            (TimError::access_denied("x"), StatusCode::FORBIDDEN),
            (TimError::ItemExists("x".into()), StatusCode::FORBIDDEN),
            (TimError::not_found("x"), StatusCode::NOT_FOUND),
            (TimError::validation("x"), StatusCode::BAD_REQUEST),
            (TimError::Conflict("x".into()), StatusCode::BAD_REQUEST),
            (
                TimError::Plugin(PluginError::MissingKey("web".into())),
                StatusCode::BAD_REQUEST,
            ),
            (TimError::Storage("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }
}
