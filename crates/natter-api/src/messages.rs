use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use natter_types::api::{Claims, SendMessageRequest, StatusResponse};
use natter_types::models::Message;

use crate::AppState;
use crate::error::ApiResult;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    /// Defaults to 20 and is clamped to 1..=100, so 0 returns one message.
    pub limit: Option<u32>,
    /// Cursor-based pagination: pass the `createdAt` of the oldest message
    /// from the previous page to fetch older messages.
    pub before: Option<String>,
}

pub async fn list_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(chat_id): Path<String>,
    Query(query): Query<MessageQuery>,
) -> ApiResult<Json<Vec<Message>>> {
    let messages = state
        .services
        .ledger
        .list_messages(&chat_id, &claims.sub, query.before.as_deref(), query.limit)
        .await?;
    Ok(Json(messages))
}

/// Same entry point the gateway's `message:send` uses, so both paths persist
/// and broadcast identically.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(chat_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let message = state
        .services
        .ledger
        .create_message(&chat_id, &claims.sub, &req.content, req.kind.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((chat_id, message_id)): Path<(String, String)>,
) -> ApiResult<Json<StatusResponse>> {
    state
        .services
        .ledger
        .mark_read(&chat_id, &message_id, &claims.sub)
        .await?;
    Ok(Json(StatusResponse::new("Message marked as read")))
}
