use axum::{
    extract::State,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tim_core::db::{AddMembers, RemoveMembers};
use tim_core::user::User;

use super::extract::{ApiJson, ApiPath};
use super::{ApiResult, AppState, AuthContext};

#[derive(Deserialize)]
pub struct NewUser {
    pub name: String,
    #[serde(default)]
    pub real_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Deserialize)]
pub struct MemberNames {
    pub names: Vec<String>,
}

pub async fn create_user(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiJson(req): ApiJson<NewUser>,
) -> ApiResult<Value> {
    let now = Utc::now();
    let mut db = state.db.write().await;
    let principal = auth.principal(&db, now);
    let id = db.register_user(&principal, &req.name, req.real_name, req.email, now)?;
    Ok(Json(json!({ "id": id, "name": req.name })))
}

pub async fn create_group(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(name): ApiPath<String>,
) -> ApiResult<Value> {
    let now = Utc::now();
    let mut db = state.db.write().await;
    let principal = auth.principal(&db, now);
    let id = db.create_group(&principal, &name)?;
    tracing::info!(group = %name, id, "group created");
    Ok(Json(json!({ "id": id, "name": name })))
}

pub async fn show_group(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(name): ApiPath<String>,
) -> ApiResult<Vec<User>> {
    let now = Utc::now();
    let db = state.db.read().await;
    let principal = auth.principal(&db, now);
    Ok(Json(db.group_members(&principal, &name, now)?))
}

pub async fn add_members(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(group): ApiPath<String>,
    ApiJson(req): ApiJson<MemberNames>,
) -> ApiResult<AddMembers> {
    let now = Utc::now();
    let mut db = state.db.write().await;
    let principal = auth.principal(&db, now);
    Ok(Json(db.add_members(&principal, &group, &req.names, now)?))
}

pub async fn remove_members(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(group): ApiPath<String>,
    ApiJson(req): ApiJson<MemberNames>,
) -> ApiResult<RemoveMembers> {
    let now = Utc::now();
    let mut db = state.db.write().await;
    let principal = auth.principal(&db, now);
    Ok(Json(db.remove_members(&principal, &group, &req.names, now)?))
}
