use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use natter_core::{ChatUpdate, CoreError, NewChat};
use natter_types::api::{Claims, CreateChatRequest, UpdateChatRequest};
use natter_types::models::{Chat, ChatKind};

use crate::AppState;
use crate::error::ApiResult;

pub async fn create_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateChatRequest>,
) -> ApiResult<impl IntoResponse> {
    let kind = ChatKind::parse(&req.kind)
        .ok_or_else(|| CoreError::invalid("type must be 'direct' or 'group'"))?;

    let chat = state
        .services
        .chats
        .create_chat(
            &claims.sub,
            NewChat {
                kind,
                peer: req.participant_id,
                participant_ids: req.participant_ids,
                name: req.name,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(chat)))
}

pub async fn list_chats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<Chat>>> {
    Ok(Json(state.services.chats.list_chats(&claims.sub).await?))
}

pub async fn get_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(chat_id): Path<String>,
) -> ApiResult<Json<Chat>> {
    Ok(Json(state.services.chats.get_chat(&chat_id, &claims.sub).await?))
}

pub async fn update_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(chat_id): Path<String>,
    Json(req): Json<UpdateChatRequest>,
) -> ApiResult<Json<Chat>> {
    let update = ChatUpdate {
        name: req.name,
        add_participants: req.add_participants,
        remove_participants: req.remove_participants,
    };
    Ok(Json(
        state
            .services
            .chats
            .update_chat(&chat_id, &claims.sub, update)
            .await?,
    ))
}
