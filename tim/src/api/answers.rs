use axum::{
    extract::State,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tim_core::answer::submit::{submit_answer, AnswerRequest, AnswerResult};
use tim_core::answer::{Answer, AnswerId, RenameOutcome};
use tim_core::db::TaskUser;
use tim_core::events::Event;
use tim_core::plugin::PluginError;
use tim_core::user::UserId;
use tim_core::TimError;

use super::extract::{ApiJson, ApiPath, ApiQuery};
use super::{ok_response, ApiError, ApiResult, AppState, AuthContext};

/// Points may arrive as a number, a numeric string or empty.
#[derive(Deserialize)]
#[serde(untagged)]
pub enum PointsValue {
    Number(f64),
    Text(String),
}

impl PointsValue {
    fn parse(self) -> Result<Option<f64>, ApiError> {
        match self {
            PointsValue::Number(n) => Ok(Some(n)),
            PointsValue::Text(s) if s.trim().is_empty() => Ok(None),
            PointsValue::Text(s) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ApiError(TimError::validation(format!("Invalid points: {s}")))),
        }
    }
}

#[derive(Deserialize)]
pub struct PointsRequest {
    #[serde(default)]
    pub points: Option<PointsValue>,
}

#[derive(Deserialize)]
pub struct RenameQuery {
    #[serde(default)]
    pub force: bool,
}

pub async fn answer(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath((plugin_type, task_id)): ApiPath<(String, String)>,
    ApiJson(req): ApiJson<AnswerRequest>,
) -> ApiResult<AnswerResult> {
    let principal = {
        let db = state.db.read().await;
        auth.principal(&db, Utc::now())
    };
    let result = submit_answer(
        &state.db,
        state.plugins.as_ref(),
        &principal,
        &plugin_type,
        &task_id,
        req,
    )
    .await
    .inspect_err(|e| tracing::warn!(plugin = %plugin_type, task = %task_id, error = %e, "answer failed"))?;
    if let Some(answer_id) = result.saved_new {
        state.events.send(Event::AnswerSaved { answer_id, task_id });
    }
    Ok(Json(result))
}

pub async fn get_answers(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath((task_id, user_id)): ApiPath<(String, UserId)>,
) -> ApiResult<Vec<Answer>> {
    let now = Utc::now();
    let db = state.db.read().await;
    let principal = auth.principal(&db, now);
    Ok(Json(db.get_answers(&principal, &task_id, user_id, now)?))
}

pub async fn save_points(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath((user_id, answer_id)): ApiPath<(UserId, AnswerId)>,
    ApiJson(req): ApiJson<PointsRequest>,
) -> ApiResult<Value> {
    let points = match req.points {
        Some(p) => p.parse()?,
        None => None,
    };
    let now = Utc::now();
    let mut db = state.db.write().await;
    let principal = auth.principal(&db, now);
    db.save_points(&principal, user_id, answer_id, points, now)?;
    Ok(ok_response())
}

pub async fn task_info(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(task_id): ApiPath<String>,
) -> ApiResult<Value> {
    let now = Utc::now();
    let db = state.db.read().await;
    let principal = auth.principal(&db, now);
    Ok(Json(db.task_info(&principal, &task_id, now)?))
}

pub async fn task_users(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(task_id): ApiPath<String>,
) -> ApiResult<Vec<TaskUser>> {
    let now = Utc::now();
    let db = state.db.read().await;
    let principal = auth.principal(&db, now);
    Ok(Json(db.task_users(&principal, &task_id, now)?))
}

pub async fn rename_answers(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath((old, new, doc_path)): ApiPath<(String, String, String)>,
    ApiQuery(q): ApiQuery<RenameQuery>,
) -> ApiResult<RenameOutcome> {
    let now = Utc::now();
    let mut db = state.db.write().await;
    let principal = auth.principal(&db, now);
    Ok(Json(db.rename_answers(&principal, &old, &new, &doc_path, q.force, now)?))
}

/// Render a task through its plugin's html route.
pub async fn task_html(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(task_id): ApiPath<String>,
) -> ApiResult<Value> {
    let (plugin_type, call) = {
        let now = Utc::now();
        let db = state.db.read().await;
        let principal = auth.principal(&db, now);
        db.html_call(&principal, &task_id, now)?
    };
    let body = serde_json::to_value(&call).map_err(TimError::from)?;
    let html = state
        .plugins
        .html(&plugin_type, &body)
        .await
        .map_err(TimError::from)?;
    Ok(Json(json!({ "html": html })))
}

pub async fn plugin_reqs(
    State(state): State<AppState>,
    ApiPath(plugin_type): ApiPath<String>,
) -> ApiResult<Value> {
    let raw = state.plugins.reqs(&plugin_type).await.map_err(TimError::from)?;
    let reqs = serde_json::from_str(&raw).map_err(|_| TimError::Plugin(PluginError::InvalidJson(raw.clone())))?;
    Ok(Json(reqs))
}
