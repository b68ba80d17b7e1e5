use axum::{
    extract::State,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tim_core::block::BlockId;
use tim_core::db::DocumentView;
use tim_core::document::{ChangelogEntry, DocParagraph};
use tim_core::events::Event;
use tim_core::plugin::{self, RenderedPlugin};

use super::extract::{ApiJson, ApiPath};
use super::{ok_response, ApiResult, AppState, AuthContext};

#[derive(Deserialize)]
pub struct NewParagraph {
    pub md: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    /// Insert before this paragraph instead of appending.
    #[serde(default)]
    pub before: Option<String>,
}

#[derive(Deserialize)]
pub struct ParagraphEdit {
    pub md: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
}

#[derive(Deserialize)]
pub struct MoveRequest {
    #[serde(default)]
    pub before: Option<String>,
}

pub async fn get_document(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(id): ApiPath<BlockId>,
) -> ApiResult<DocumentView> {
    let now = Utc::now();
    let db = state.db.read().await;
    let principal = auth.principal(&db, now);
    Ok(Json(db.view_document(&principal, id, now)?))
}

pub async fn get_settings(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(id): ApiPath<BlockId>,
) -> ApiResult<Map<String, Value>> {
    let now = Utc::now();
    let db = state.db.read().await;
    let principal = auth.principal(&db, now);
    let settings = db.document_settings(&principal, id, now)?;
    Ok(Json(settings.values().clone()))
}

pub async fn get_changelog(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(id): ApiPath<BlockId>,
) -> ApiResult<Vec<ChangelogEntry>> {
    let now = Utc::now();
    let db = state.db.read().await;
    let principal = auth.principal(&db, now);
    Ok(Json(db.changelog(&principal, id, now)?))
}

/// Html of the document's plugin paragraphs.
pub async fn render_plugins(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(id): ApiPath<BlockId>,
) -> ApiResult<Vec<RenderedPlugin>> {
    let blocks = {
        let now = Utc::now();
        let db = state.db.read().await;
        let principal = auth.principal(&db, now);
        db.plugin_blocks(&principal, id, now)?
    };
    let rendered = plugin::render_plugins(state.plugins.as_ref(), &state.config.plugins, blocks).await?;
    Ok(Json(rendered))
}

pub async fn add_paragraph(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(id): ApiPath<BlockId>,
    ApiJson(req): ApiJson<NewParagraph>,
) -> ApiResult<DocParagraph> {
    let now = Utc::now();
    let mut db = state.db.write().await;
    let principal = auth.principal(&db, now);
    let par = db.add_paragraph(&principal, id, &req.md, req.attrs, req.before.as_deref(), now)?;
    drop(db);
    state.events.send(Event::ParagraphChanged {
        doc_id: id,
        par_id: par.id().to_string(),
    });
    Ok(Json(par))
}

pub async fn modify_paragraph(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath((id, par_id)): ApiPath<(BlockId, String)>,
    ApiJson(req): ApiJson<ParagraphEdit>,
) -> ApiResult<DocParagraph> {
    let now = Utc::now();
    let mut db = state.db.write().await;
    let principal = auth.principal(&db, now);
    let par = db.modify_paragraph(&principal, id, &par_id, &req.md, req.attrs, now)?;
    drop(db);
    state.events.send(Event::ParagraphChanged { doc_id: id, par_id });
    Ok(Json(par))
}

pub async fn delete_paragraph(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath((id, par_id)): ApiPath<(BlockId, String)>,
) -> ApiResult<Value> {
    let now = Utc::now();
    let mut db = state.db.write().await;
    let principal = auth.principal(&db, now);
    db.delete_paragraph(&principal, id, &par_id, now)?;
    drop(db);
    state.events.send(Event::ParagraphChanged { doc_id: id, par_id });
    Ok(ok_response())
}

pub async fn move_paragraph(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath((id, par_id)): ApiPath<(BlockId, String)>,
    ApiJson(req): ApiJson<MoveRequest>,
) -> ApiResult<Value> {
    let now = Utc::now();
    let mut db = state.db.write().await;
    let principal = auth.principal(&db, now);
    db.move_paragraph(&principal, id, &par_id, req.before.as_deref(), now)?;
    drop(db);
    state.events.send(Event::ParagraphChanged { doc_id: id, par_id });
    Ok(ok_response())
}
