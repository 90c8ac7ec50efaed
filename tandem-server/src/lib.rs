mod auth;
mod context;
mod docs;
mod errors;
mod music;
mod rooms;
mod schemas;
mod serialized;
mod sse;

use std::{
    net::{Ipv6Addr, SocketAddr},
    sync::Arc,
};

use axum::routing::get;
use log::info;
use tandem_collab::Collab;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

pub use context::ServerContext;
pub use errors::*;
pub use sse::ServerEvent;

/// The default port the server will listen on.
pub const DEFAULT_PORT: u16 = 9050;

pub type Router = axum::Router<ServerContext>;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

/// Builds the router of the whole API
pub fn app(collab: Arc<Collab>) -> axum::Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let version_one_router = Router::new()
        .nest("/auth", auth::router())
        .nest("/rooms", rooms::router())
        .nest("/music", music::router())
        .nest("/events", sse::router());

    Router::new()
        .nest("/v1", version_one_router)
        .route("/api.json", get(docs::docs))
        .layer(cors)
        .with_state(ServerContext { collab })
}

/// Starts the tandem server, returns once it was shut down with ctrl-c
pub async fn run_server(config: ServerConfig, collab: Arc<Collab>) -> std::io::Result<()> {
    let addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, config.port).into();
    let listener = TcpListener::bind(&addr).await?;

    info!("Listening on {}", addr);

    axum::serve(listener, app(collab.clone()))
        .with_graceful_shutdown(shutdown_signal(collab))
        .await
}

async fn shutdown_signal(collab: Arc<Collab>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }

    info!("Shutting down");

    // Event streams only end once the bus lets go of them
    collab.shutdown();
}
