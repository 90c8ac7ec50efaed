use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
    routing::get,
    Json,
};
use tandem_collab::{DatabaseError, SessionData, UserData};

use crate::{
    errors::{ErrorBody, ServerError, ServerResult},
    serialized::{ToSerialized, User},
    Router, ServerContext,
};

/// Wraps [SessionData] so [FromRequestParts] can be implemented for it
pub struct Session(SessionData);

impl Session {
    /// Returns the user of the session
    pub fn user(&self) -> &UserData {
        &self.0.user
    }
}

#[async_trait]
impl FromRequestParts<ServerContext> for Session {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerContext,
    ) -> Result<Self, Self::Rejection> {
        let context = ServerContext::from_ref(state);

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|x| x.to_str().ok())
            .ok_or(ServerError::Unauthorized("Missing authorization"))?;

        let parts: Vec<_> = token.split_ascii_whitespace().collect();

        if parts.first() != Some(&"Bearer") || parts.len() != 2 {
            return Err(ServerError::Unauthorized("Authorization must be Bearer"));
        }

        let session = context
            .collab
            .database()
            .session_by_token(parts[1])
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound { .. } => {
                    ServerError::Unauthorized("Session does not exist")
                }
                e => e.into(),
            })?;

        Ok(Self(session))
    }
}

#[utoipa::path(
    get,
    path = "/v1/auth/user",
    tag = "auth",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = User, description = "The user associated with the supplied session"),
        (status = 401, body = ErrorBody)
    )
)]
async fn user(session: Session) -> ServerResult<Json<User>> {
    Ok(Json(session.user().to_serialized()))
}

pub fn router() -> Router {
    Router::new().route("/user", get(user))
}
