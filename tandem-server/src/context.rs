use std::{convert::Infallible, sync::Arc};

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tandem_collab::Collab;

#[derive(Clone, FromRef)]
pub struct ServerContext {
    pub collab: Arc<Collab>,
}

/// Lets handlers take the context directly instead of through [axum::extract::State]
#[async_trait]
impl<S> FromRequestParts<S> for ServerContext
where
    ServerContext: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(_parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_ref(state))
    }
}
