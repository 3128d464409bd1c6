// Room management HTTP handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use voxroom_core::models::{CreateRoomRequest, RoomId, UserRooms};
use voxroom_sfu::ClientId;

use super::middleware::AuthUser;
use super::{AppError, AppResult, AppState};

/// Live participants of a room
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantsResponse {
    pub room_id: RoomId,
    pub participants: Vec<ClientId>,
}

/// Rooms owned by and joined by the caller
pub async fn list_rooms(auth: AuthUser, State(state): State<AppState>) -> AppResult<Json<UserRooms>> {
    let Some(store) = &state.store else {
        return Ok(Json(UserRooms::default()));
    };

    let owned = store.rooms_owned_by(&auth.user_id).await?;
    let joined = store.rooms_joined_by(&auth.user_id).await?;
    Ok(Json(UserRooms { owned, joined }))
}

/// Create a durable room owned by the caller
pub async fn create_room(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(req): Json<CreateRoomRequest>,
) -> AppResult<impl IntoResponse> {
    let record = state
        .signaling
        .create_room(&auth.user_id, req.id, req.name)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// Remove the caller from a room's member list
pub async fn leave_room(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> AppResult<StatusCode> {
    let room_id = RoomId::parse(&room_id).map_err(AppError::bad_request)?;
    let store = state
        .store
        .as_ref()
        .ok_or_else(|| AppError::not_found("Room membership is not persisted"))?;

    if store.remove_member(&room_id, &auth.user_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("Not a member of this room"))
    }
}

/// Client IDs currently connected to a room
pub async fn get_participants(
    _auth: AuthUser,
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> AppResult<Json<ParticipantsResponse>> {
    let room_id = RoomId::parse(&room_id).map_err(AppError::bad_request)?;
    let participants = state
        .registry
        .participants(&room_id)
        .ok_or_else(|| AppError::not_found(format!("Room {room_id} not found")))?;
    Ok(Json(ParticipantsResponse {
        room_id,
        participants,
    }))
}
