use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use log::error;
use serde::Serialize;
use tandem_collab::{DatabaseError, ExternalError, RoomError, TokenError};
use thiserror::Error;
use utoipa::ToSchema;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{resource} {identifier} not found")]
    NotFound {
        resource: &'static str,
        identifier: String,
    },
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    PermissionDenied(String),
    #[error("{0}")]
    InvalidOperation(String),
    #[error("Music or channel provider failed: {0}")]
    ExternalProvider(String),
    #[error("Music provider authorization is required")]
    ReauthRequired,
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("Unknown internal error: {0}")]
    Unknown(String),
}

/// The body of every error response
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// A machine readable error code
    #[schema(example = "notFound")]
    error: String,
    message: String,
}

impl ServerError {
    fn as_status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Self::InvalidOperation(_) => StatusCode::BAD_REQUEST,
            Self::ExternalProvider(_) => StatusCode::BAD_GATEWAY,
            Self::ReauthRequired => StatusCode::UNAUTHORIZED,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "notFound",
            Self::InvalidInput(_) => "invalidInput",
            Self::PermissionDenied(_) => "permissionDenied",
            Self::InvalidOperation(_) => "invalidOperation",
            Self::ExternalProvider(_) => "externalProviderError",
            Self::ReauthRequired => "reauthRequired",
            Self::Unauthorized(_) => "unauthorized",
            Self::Unknown(_) => "internal",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        if let Self::Unknown(message) = &self {
            error!("Request failed: {}", message);
        }

        let body = ErrorBody {
            error: self.code().to_string(),
            message: self.to_string(),
        };

        (self.as_status_code(), Json(body)).into_response()
    }
}

impl From<DatabaseError> for ServerError {
    fn from(value: DatabaseError) -> Self {
        match value {
            DatabaseError::NotFound {
                resource,
                identifier,
            } => Self::NotFound {
                resource,
                identifier,
            },
            e => Self::Unknown(e.to_string()),
        }
    }
}

impl From<RoomError> for ServerError {
    fn from(value: RoomError) -> Self {
        match value {
            RoomError::NotFound(resource, identifier) => Self::NotFound {
                resource,
                identifier,
            },
            RoomError::InvalidInput(message) => Self::InvalidInput(message.to_string()),
            RoomError::PermissionDenied(message) => Self::PermissionDenied(message.to_string()),
            RoomError::InvalidOperation(message) => Self::InvalidOperation(message.to_string()),
            RoomError::Database(e) => e.into(),
        }
    }
}

impl From<TokenError> for ServerError {
    fn from(value: TokenError) -> Self {
        match value {
            TokenError::ReauthRequired => Self::ReauthRequired,
            TokenError::InvalidGrant(message) => Self::InvalidInput(message.to_string()),
            TokenError::Db(e) => e.into(),
        }
    }
}

impl From<ExternalError> for ServerError {
    fn from(value: ExternalError) -> Self {
        Self::ExternalProvider(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_errors_keep_their_meaning() {
        let denied: ServerError = RoomError::PermissionDenied("owner only").into();
        let missing: ServerError = RoomError::NotFound("room", "abc".into()).into();
        let owner_leave: ServerError = RoomError::InvalidOperation("owner").into();

        assert_eq!(denied.as_status_code(), StatusCode::FORBIDDEN);
        assert_eq!(missing.as_status_code(), StatusCode::NOT_FOUND);
        assert_eq!(owner_leave.as_status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(owner_leave.code(), "invalidOperation");
    }

    #[test]
    fn reauth_is_unauthorized() {
        let error: ServerError = TokenError::ReauthRequired.into();

        assert_eq!(error.as_status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(error.code(), "reauthRequired");
    }
}
