//! Transfer job endpoints
//!
//! POST /transfers, GET /transfers, GET /transfers/:id

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tunebridge_common::{Transfer, TransferTrack};
use uuid::Uuid;

use super::{parse_provider, UserId};
use crate::db::transfers;
use crate::error::{ApiError, ApiResult};
use crate::services::transfer_orchestrator::NewTransfer;
use crate::AppState;

/// History page size
const LIST_LIMIT: u32 = 50;

/// POST /transfers request
#[derive(Debug, Deserialize)]
pub struct StartTransferRequest {
    pub source_service: String,
    pub source_playlist_id: String,
    pub target_service: String,
    #[serde(default)]
    pub target_playlist_name: Option<String>,
}

/// POST /transfers response
#[derive(Debug, Serialize)]
pub struct StartTransferResponse {
    pub message: String,
    pub transfer_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct TransferListResponse {
    pub transfers: Vec<Transfer>,
}

#[derive(Debug, Serialize)]
pub struct TransferDetailResponse {
    pub transfer: Transfer,
    pub tracks: Vec<TransferTrack>,
}

/// POST /transfers
///
/// Validates the request and both connections, persists a pending job, and
/// returns its id. The job runs in the background.
pub async fn start_transfer(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    payload: Result<Json<StartTransferRequest>, JsonRejection>,
) -> ApiResult<Json<StartTransferResponse>> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(format!("Invalid request: {}", e.body_text())))?;

    let new_transfer = NewTransfer {
        source_provider: parse_provider(&request.source_service)?,
        source_playlist_id: request.source_playlist_id,
        target_provider: parse_provider(&request.target_service)?,
        target_playlist_name: request.target_playlist_name,
    };

    let transfer = state.orchestrator.start_transfer(&user_id, new_transfer).await?;

    Ok(Json(StartTransferResponse {
        message: "Transfer started".to_string(),
        transfer_id: transfer.id,
    }))
}

/// GET /transfers
pub async fn list_transfers(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> ApiResult<Json<TransferListResponse>> {
    let transfers = transfers::list_transfers(&state.db, &user_id, LIST_LIMIT).await?;
    Ok(Json(TransferListResponse { transfers }))
}

/// GET /transfers/:id
pub async fn get_transfer(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
) -> ApiResult<Json<TransferDetailResponse>> {
    let id = Uuid::parse_str(&id).map_err(|_| ApiError::BadRequest("Invalid transfer ID".to_string()))?;

    let transfer = transfers::get_user_transfer(&state.db, &user_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Transfer not found".to_string()))?;
    let tracks = transfers::list_tracks(&state.db, id).await?;

    tracing::debug!(transfer_id = %id, tracks = tracks.len(), "Fetched transfer details");

    Ok(Json(TransferDetailResponse { transfer, tracks }))
}

pub fn transfer_routes() -> Router<AppState> {
    Router::new()
        .route("/transfers", get(list_transfers).post(start_transfer))
        .route("/transfers/:id", get(get_transfer))
}
