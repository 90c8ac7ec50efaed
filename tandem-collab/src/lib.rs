mod bus;
mod config;
mod db;
mod events;
mod external;
mod rooms;
mod tokens;
mod util;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

use std::sync::Arc;

pub use bus::*;
pub use config::*;
pub use db::*;
pub use events::*;
pub use external::*;
pub use rooms::*;
pub use tokens::*;
pub use util::*;

/// The tandem collab system, facilitating rooms, shared playback, and realtime updates.
pub struct Collab {
    context: CollabContext,

    pub rooms: RoomManager,
    pub playback: NowPlaying,
    pub tokens: Arc<TokenManager>,
}

/// A type passed to various components of the collab system, to access state, emit events, and dispatch actions.
#[derive(Clone)]
pub struct CollabContext {
    pub config: CollabConfig,
    pub database: Arc<dyn Database>,
    pub bus: Arc<Bus>,
    pub channel: ChannelDispatcher,
    pub music: Arc<dyn MusicProvider>,
    pub tokens: Arc<TokenManager>,
    pub locks: Arc<LockMap>,
}

impl Collab {
    pub fn new(
        config: CollabConfig,
        database: Arc<dyn Database>,
        channel: Arc<dyn CallChannel>,
        music: Arc<dyn MusicProvider>,
    ) -> Self {
        let tokens = Arc::new(TokenManager::new(
            database.clone(),
            music.clone(),
            config.token_skew(),
        ));

        let context = CollabContext {
            bus: Bus::new(config.subscriber_buffer),
            channel: ChannelDispatcher::new(channel, config.external_timeout),
            locks: Default::default(),
            tokens: tokens.clone(),
            database,
            music,
            config,
        };

        Self {
            rooms: RoomManager::new(&context),
            playback: NowPlaying::new(&context),
            tokens,
            context,
        }
    }

    pub fn bus(&self) -> &Arc<Bus> {
        &self.context.bus
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.context.database
    }

    pub fn music(&self) -> &Arc<dyn MusicProvider> {
        &self.context.music
    }

    /// Closes every realtime connection
    pub fn shutdown(&self) {
        self.context.bus.shutdown();
    }
}
