use axum::{
    extract::State,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tim_core::block::{AccessType, BlockId};
use tim_core::db::ItemInfo;
use tim_core::events::Event;

use super::extract::{ApiJson, ApiPath, ApiQuery};
use super::{ok_response, ApiResult, AppState, AuthContext};

#[derive(Deserialize)]
pub struct NewItem {
    pub path: String,
}

#[derive(Deserialize)]
pub struct ItemsQuery {
    #[serde(default)]
    pub folder: String,
}

#[derive(Deserialize)]
pub struct RenameRequest {
    pub new_name: String,
}

#[derive(Deserialize)]
pub struct PermissionRequest {
    pub item_id: BlockId,
    pub group: String,
    #[serde(rename = "type")]
    pub access_type: AccessType,
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

pub async fn create_folder(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiJson(req): ApiJson<NewItem>,
) -> ApiResult<Value> {
    let now = Utc::now();
    let mut db = state.db.write().await;
    let principal = auth.principal(&db, now);
    let id = db.create_folder(&principal, &req.path, now)?;
    drop(db);
    state.events.send(Event::FolderCreated {
        id,
        path: req.path.clone(),
    });
    Ok(Json(json!({ "id": id, "path": req.path })))
}

pub async fn create_document(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiJson(req): ApiJson<NewItem>,
) -> ApiResult<Value> {
    let now = Utc::now();
    let mut db = state.db.write().await;
    let principal = auth.principal(&db, now);
    let id = db.create_document(&principal, &req.path, now)?;
    drop(db);
    state.events.send(Event::DocumentCreated {
        id,
        path: req.path.clone(),
    });
    Ok(Json(json!({ "id": id, "path": req.path })))
}

pub async fn get_items(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiQuery(q): ApiQuery<ItemsQuery>,
) -> ApiResult<Vec<ItemInfo>> {
    let now = Utc::now();
    let db = state.db.read().await;
    let principal = auth.principal(&db, now);
    Ok(Json(db.list_items(&principal, q.folder.trim_matches('/'), now)?))
}

pub async fn rename_item(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(id): ApiPath<BlockId>,
    ApiJson(req): ApiJson<RenameRequest>,
) -> ApiResult<Value> {
    let now = Utc::now();
    let mut db = state.db.write().await;
    let principal = auth.principal(&db, now);
    db.rename_item(&principal, id, &req.new_name, now)?;
    drop(db);
    state.events.send(Event::ItemRenamed {
        id,
        path: req.new_name.clone(),
    });
    Ok(Json(json!({ "new_name": req.new_name })))
}

pub async fn delete_item(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(id): ApiPath<BlockId>,
) -> ApiResult<Value> {
    let now = Utc::now();
    let mut db = state.db.write().await;
    let principal = auth.principal(&db, now);
    let deleted = db.delete_item(&principal, id, now)?;
    drop(db);
    for id in deleted {
        state.events.send(Event::ItemDeleted { id });
    }
    Ok(ok_response())
}

pub async fn add_permission(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiJson(req): ApiJson<PermissionRequest>,
) -> ApiResult<Value> {
    let now = Utc::now();
    let mut db = state.db.write().await;
    let principal = auth.principal(&db, now);
    let group = db.grant(
        &principal,
        req.item_id,
        &req.group,
        req.access_type,
        req.from,
        req.to,
        now,
    )?;
    drop(db);
    state.events.send(Event::PermissionChanged {
        id: req.item_id,
        group,
        access: req.access_type,
    });
    Ok(ok_response())
}

pub async fn remove_permission(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiJson(req): ApiJson<PermissionRequest>,
) -> ApiResult<Value> {
    let now = Utc::now();
    let mut db = state.db.write().await;
    let principal = auth.principal(&db, now);
    let group = db.revoke(&principal, req.item_id, &req.group, req.access_type, now)?;
    drop(db);
    state.events.send(Event::PermissionChanged {
        id: req.item_id,
        group,
        access: req.access_type,
    });
    Ok(ok_response())
}
