use axum::{response::IntoResponse, Json};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::{auth, errors, music, rooms, schemas, serialized, sse};

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::user,
        rooms::list_rooms,
        rooms::room,
        rooms::create_room,
        rooms::join,
        rooms::leave,
        rooms::members,
        rooms::now_playing,
        rooms::update_now_playing,
        music::search,
        music::store_grant,
        sse::event_stream,
    ),
    components(schemas(
        errors::ErrorBody,
        schemas::NewRoomSchema,
        schemas::NowPlayingSchema,
        schemas::PlaybackActionSchema,
        schemas::MusicGrantSchema,
        serialized::User,
        serialized::Room,
        serialized::Playback,
        serialized::PlayState,
        serialized::NowPlayingResult,
        serialized::PlaybackWarning,
        serialized::WarningKind,
        serialized::Track,
        sse::RoomMembers,
        sse::ServerEvent,
    )),
    modifiers(&Security),
    info(
        description = "tandem-server exposes endpoints to listen together in shared rooms"
    )
)]
pub struct ApiDoc;

struct Security;

impl Modify for Security {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            let scheme = HttpBuilder::new()
                .scheme(HttpAuthScheme::Bearer)
                .bearer_format("Bearer <token>")
                .build();

            components.add_security_scheme("BearerAuth", SecurityScheme::Http(scheme))
        }
    }
}

pub async fn docs() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
