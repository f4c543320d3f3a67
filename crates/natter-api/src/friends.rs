use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use natter_types::api::{Claims, CreateFriendRequest, StatusResponse};
use natter_types::models::{Decision, FriendRequest, UserSummary};

use crate::AppState;
use crate::error::ApiResult;

pub async fn send_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateFriendRequest>,
) -> ApiResult<impl IntoResponse> {
    let request = state
        .services
        .friends
        .request_friend(&claims.sub, &req.to_user_id)
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn list_requests(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<FriendRequest>>> {
    Ok(Json(state.services.friends.list_requests(&claims.sub).await?))
}

pub async fn accept_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(request_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    state
        .services
        .friends
        .respond(&request_id, &claims.sub, Decision::Accept)
        .await?;
    Ok(Json(StatusResponse::new("Friend request accepted")))
}

pub async fn reject_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(request_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    state
        .services
        .friends
        .respond(&request_id, &claims.sub, Decision::Reject)
        .await?;
    Ok(Json(StatusResponse::new("Friend request rejected")))
}

pub async fn list_friends(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<UserSummary>>> {
    Ok(Json(state.services.friends.list_friends(&claims.sub).await?))
}
