use std::sync::Arc;

use colored::Colorize;
use config::{Config, ConfigError};
use log::{error, info, warn, LevelFilter};
use seed::{Seed, SeedError};
use tandem_collab::{
    CallChannel, Collab, DisabledCallChannel, ExternalError, HttpCallChannel, MemoryDatabase,
    SpotifyClient,
};
use tandem_server::ServerConfig;
use thiserror::Error;
use tokio::runtime::{self, Runtime};

mod config;
mod logging;
mod seed;

pub struct Tandem {
    collab: Arc<Collab>,
    server: ServerConfig,
    runtime: Runtime,
}

#[derive(Debug, Error)]
enum TandemError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Could not seed the store: {0}")]
    Seed(#[from] SeedError),

    #[error("Could not set up a provider client: {0}")]
    Client(#[from] ExternalError),

    #[error("Server stopped unexpectedly: {0}")]
    Server(std::io::Error),

    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl Tandem {
    fn new(config: Config) -> Result<Self, TandemError> {
        info!("Building async runtime...");
        let main_runtime = runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("tandem-async")
            .build()
            .map_err(|e| TandemError::Fatal(e.to_string()))?;

        let database = MemoryDatabase::new();

        if let Some(path) = &config.seed_file {
            info!("Seeding store from {}...", path.display());
            Seed::load(path)?.apply(&database);
        }

        let channel: Arc<dyn CallChannel> = match &config.channel_endpoint {
            Some(endpoint) => {
                info!("Syncing rooms with channel gateway at {}", endpoint);
                Arc::new(HttpCallChannel::new(
                    endpoint.clone(),
                    config.channel_api_key.clone(),
                    config.collab.external_timeout,
                )?)
            }
            None => {
                warn!("TANDEM_CHANNEL_ENDPOINT is not set, rooms will not be synced to a call channel");
                Arc::new(DisabledCallChannel)
            }
        };

        if config.spotify.client_id.is_empty() {
            warn!("SPOTIFY_CLIENT_ID is not set, music provider tokens can't be refreshed");
        }

        let music = SpotifyClient::new(config.spotify.clone(), config.collab.external_timeout)?;

        let collab = Collab::new(
            config.collab,
            Arc::new(database),
            channel,
            Arc::new(music),
        );

        Ok(Self {
            collab: Arc::new(collab),
            server: config.server,
            runtime: main_runtime,
        })
    }

    fn run(self) -> Result<(), TandemError> {
        self.runtime
            .block_on(tandem_server::run_server(self.server, self.collab))
            .map_err(TandemError::Server)
    }
}

impl TandemError {
    fn hint(&self) -> String {
        match self {
            TandemError::Config(_) => "Check the TANDEM_* and SPOTIFY_* environment variables, then try again.".to_string(),
            TandemError::Seed(_) => "The file TANDEM_SEED_FILE points to must be a RON document with users and sessions.".to_string(),
            TandemError::Client(_) => "An HTTP client could not be created. Make sure the system's TLS setup is intact.".to_string(),
            TandemError::Server(_) => "Make sure TANDEM_SERVER_PORT is free and can be bound by this user.".to_string(),
            TandemError::Fatal(_) => "This error is fatal, and should not happen.".to_string(),
        }
    }
}

fn main() {
    let config = Config::from_env();
    let level = config
        .as_ref()
        .map(|c| c.log_level)
        .unwrap_or(LevelFilter::Info);

    if let Err(e) = logging::init_logger(level) {
        eprintln!("Could not initialize logging: {}", e);
    }

    let result = config
        .map_err(TandemError::from)
        .and_then(Tandem::new)
        .and_then(|tandem| {
            info!("Initialized successfully.");
            tandem.run()
        });

    if let Err(error) = result {
        error!("{} Read the error below to troubleshoot the issue. If you think this might be a bug, please report it by making a GitHub issue.", "Tandem failed to start!".bold().red());
        error!("{}", error);
        error!("{}", format!("Hint: {}", error.hint()).dimmed().italic());
    }
}
