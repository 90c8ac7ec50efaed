use axum::{extract::Query, http::StatusCode, routing::{get, post}, Json};

use crate::{
    auth::Session,
    context::ServerContext,
    errors::{ErrorBody, ServerResult},
    schemas::{MusicGrantSchema, SearchQuery, ValidatedJson},
    serialized::{ToSerialized, Track},
    Router,
};

const DEFAULT_SEARCH_LIMIT: u8 = 5;
const MAX_SEARCH_LIMIT: u8 = 50;

#[utoipa::path(
    get,
    path = "/v1/music/search",
    tag = "music",
    params(SearchQuery),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Vec<Track>),
        (status = 401, body = ErrorBody, description = "The music provider has to be authorized again"),
        (status = 502, body = ErrorBody)
    )
)]
async fn search(
    session: Session,
    context: ServerContext,
    Query(query): Query<SearchQuery>,
) -> ServerResult<Json<Vec<Track>>> {
    let token = context
        .collab
        .tokens
        .valid_access_token(&session.user().id)
        .await?;

    let limit = query
        .limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .clamp(1, MAX_SEARCH_LIMIT);

    let tracks = context
        .collab
        .music()
        .search_tracks(&token, &query.q, limit)
        .await?;

    Ok(Json(tracks.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/v1/music/grant",
    tag = "music",
    request_body = MusicGrantSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "The grant was stored"),
        (status = 400, body = ErrorBody)
    )
)]
async fn store_grant(
    session: Session,
    context: ServerContext,
    ValidatedJson(body): ValidatedJson<MusicGrantSchema>,
) -> ServerResult<StatusCode> {
    context
        .collab
        .tokens
        .store_initial_grant(
            &session.user().id,
            body.access_token,
            body.refresh_token,
            body.expires_in,
        )
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router {
    Router::new()
        .route("/search", get(search))
        .route("/grant", post(store_grant))
}
