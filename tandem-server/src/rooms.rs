use axum::{
    extract::Path,
    http::StatusCode,
    routing::{get, post},
    Json,
};
use tandem_collab::NewRoom;

use crate::{
    auth::Session,
    context::ServerContext,
    errors::{ErrorBody, ServerResult},
    schemas::{NewRoomSchema, NowPlayingSchema, ValidatedJson},
    serialized::{NowPlayingResult, Playback, Room, ToSerialized, User},
    Router,
};

#[utoipa::path(
    get,
    path = "/v1/rooms",
    tag = "rooms",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Vec<Room>)
    )
)]
async fn list_rooms(_session: Session, context: ServerContext) -> ServerResult<Json<Vec<Room>>> {
    let rooms = context.collab.rooms.list_rooms().await?;

    Ok(Json(rooms.to_serialized()))
}

#[utoipa::path(
    get,
    path = "/v1/rooms/{id}",
    tag = "rooms",
    params(("id" = String, Path, description = "Room id")),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Room),
        (status = 404, body = ErrorBody)
    )
)]
async fn room(
    _session: Session,
    context: ServerContext,
    Path(room_id): Path<String>,
) -> ServerResult<Json<Room>> {
    let room = context.collab.rooms.room_by_id(&room_id).await?;

    Ok(Json(room.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/v1/rooms",
    tag = "rooms",
    request_body = NewRoomSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 201, body = Room),
        (status = 400, body = ErrorBody)
    )
)]
async fn create_room(
    session: Session,
    context: ServerContext,
    ValidatedJson(body): ValidatedJson<NewRoomSchema>,
) -> ServerResult<(StatusCode, Json<Room>)> {
    let room = context
        .collab
        .rooms
        .create_room(NewRoom {
            name: body.name,
            description: body.description,
            cover_image: body.cover_image,
            is_open: body.is_open,
            owner_id: session.user().id.clone(),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(room.to_serialized())))
}

#[utoipa::path(
    post,
    path = "/v1/rooms/{id}/join",
    tag = "rooms",
    params(("id" = String, Path, description = "Room id")),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Room, description = "The user is a member of the room"),
        (status = 404, body = ErrorBody)
    )
)]
async fn join(
    session: Session,
    context: ServerContext,
    Path(room_id): Path<String>,
) -> ServerResult<Json<Room>> {
    let room = context.collab.rooms.join(&room_id, &session.user().id).await?;

    Ok(Json(room.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/v1/rooms/{id}/leave",
    tag = "rooms",
    params(("id" = String, Path, description = "Room id")),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, description = "The user is no longer a member of the room"),
        (status = 400, body = ErrorBody, description = "The owner can't leave their room"),
        (status = 404, body = ErrorBody)
    )
)]
async fn leave(
    session: Session,
    context: ServerContext,
    Path(room_id): Path<String>,
) -> ServerResult<()> {
    context.collab.rooms.leave(&room_id, &session.user().id).await?;

    Ok(())
}

#[utoipa::path(
    get,
    path = "/v1/rooms/{id}/members",
    tag = "rooms",
    params(("id" = String, Path, description = "Room id")),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Vec<User>, description = "Members in join order"),
        (status = 404, body = ErrorBody)
    )
)]
async fn members(
    _session: Session,
    context: ServerContext,
    Path(room_id): Path<String>,
) -> ServerResult<Json<Vec<User>>> {
    let members = context.collab.rooms.members(&room_id).await?;

    Ok(Json(members.to_serialized()))
}

#[utoipa::path(
    get,
    path = "/v1/rooms/{id}/now-playing",
    tag = "rooms",
    params(("id" = String, Path, description = "Room id")),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Option<Playback>, description = "What the room is playing right now, null if idle"),
        (status = 404, body = ErrorBody)
    )
)]
async fn now_playing(
    _session: Session,
    context: ServerContext,
    Path(room_id): Path<String>,
) -> ServerResult<Json<Option<Playback>>> {
    let playback = context.collab.playback.effective_playback(&room_id).await?;

    Ok(Json(playback.to_serialized()))
}

#[utoipa::path(
    put,
    path = "/v1/rooms/{id}/now-playing",
    tag = "rooms",
    params(("id" = String, Path, description = "Room id")),
    request_body = NowPlayingSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = NowPlayingResult),
        (status = 400, body = ErrorBody),
        (status = 403, body = ErrorBody, description = "Only the owner controls playback"),
        (status = 404, body = ErrorBody)
    )
)]
async fn update_now_playing(
    session: Session,
    context: ServerContext,
    Path(room_id): Path<String>,
    ValidatedJson(body): ValidatedJson<NowPlayingSchema>,
) -> ServerResult<Json<NowPlayingResult>> {
    let update = context
        .collab
        .playback
        .update_now_playing(&room_id, &session.user().id, body.into())
        .await?;

    Ok(Json(update.to_serialized()))
}

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_rooms).post(create_room))
        .route("/:id", get(room))
        .route("/:id/join", post(join))
        .route("/:id/leave", post(leave))
        .route("/:id/members", get(members))
        .route("/:id/now-playing", get(now_playing).put(update_now_playing))
}
