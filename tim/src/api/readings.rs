use axum::{
    extract::State,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tim_core::block::BlockId;
use tim_core::db::ReadStatsRow;
use tim_core::readmark::{ReadParagraph, ReadType};
use tim_core::TimError;

use super::extract::{ApiPath, ApiQuery};
use super::{ok_response, ApiError, ApiResult, AppState, AuthContext};

#[derive(Deserialize)]
pub struct UnreadQuery {
    #[serde(default, rename = "type")]
    pub read_type: Option<u8>,
}

fn read_type(code: u8) -> Result<ReadType, ApiError> {
    ReadType::from_code(code).ok_or_else(|| ApiError(TimError::validation(format!("Invalid read type: {code}"))))
}

pub async fn get_readings(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(doc_id): ApiPath<BlockId>,
) -> ApiResult<Vec<ReadParagraph>> {
    let now = Utc::now();
    let db = state.db.read().await;
    let principal = auth.principal(&db, now);
    Ok(Json(db.readings(&principal, doc_id, now)?))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(doc_id): ApiPath<BlockId>,
) -> ApiResult<Value> {
    let now = Utc::now();
    let mut db = state.db.write().await;
    let principal = auth.principal(&db, now);
    db.mark_all_read(&principal, doc_id, now)?;
    Ok(ok_response())
}

pub async fn mark_read(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath((doc_id, par_id, code)): ApiPath<(BlockId, String, u8)>,
) -> ApiResult<Value> {
    let read_type = read_type(code)?;
    let now = Utc::now();
    let mut db = state.db.write().await;
    let principal = auth.principal(&db, now);
    db.mark_read(
        &principal,
        doc_id,
        &[par_id],
        read_type,
        state.config.disable_automatic_readings,
        now,
    )?;
    Ok(ok_response())
}

/// Remove a read marking. Without a `type` query parameter the click
/// marking is removed.
pub async fn unread(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath((doc_id, par_id)): ApiPath<(BlockId, String)>,
    ApiQuery(q): ApiQuery<UnreadQuery>,
) -> ApiResult<Value> {
    let read_type = match q.read_type {
        Some(code) => read_type(code)?,
        None => ReadType::ClickRed,
    };
    let now = Utc::now();
    let mut db = state.db.write().await;
    let principal = auth.principal(&db, now);
    db.unread(&principal, doc_id, &par_id, read_type, now)?;
    Ok(ok_response())
}

pub async fn read_stats(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(doc_path): ApiPath<String>,
) -> ApiResult<Vec<ReadStatsRow>> {
    let now = Utc::now();
    let db = state.db.read().await;
    let principal = auth.principal(&db, now);
    Ok(Json(db.read_stats(&principal, &doc_path, now)?))
}
