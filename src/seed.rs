use std::{fs, io, path::Path};

use serde::Deserialize;
use tandem_collab::{MemoryDatabase, UserData};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("Could not read seed file: {0}")]
    Io(#[from] io::Error),
    #[error("Seed file is invalid: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("Session {0} belongs to unknown user {1}")]
    UnknownUser(String, String),
}

/// Accounts and logins issued by the external auth service
#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub users: Vec<SeedUser>,
    #[serde(default)]
    pub sessions: Vec<SeedSession>,
}

#[derive(Debug, Deserialize)]
pub struct SeedUser {
    pub id: String,
    pub username: String,
    pub display_name: String,
    #[serde(default)]
    pub profile_pic: String,
}

#[derive(Debug, Deserialize)]
pub struct SeedSession {
    pub token: String,
    pub user_id: String,
}

impl Seed {
    pub fn load(path: &Path) -> Result<Self, SeedError> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, SeedError> {
        let seed: Seed = ron::from_str(contents)?;

        for session in &seed.sessions {
            if !seed.users.iter().any(|u| u.id == session.user_id) {
                return Err(SeedError::UnknownUser(
                    session.token.clone(),
                    session.user_id.clone(),
                ));
            }
        }

        Ok(seed)
    }

    pub fn apply(self, database: &MemoryDatabase) {
        for user in self.users {
            database.insert_user(UserData {
                id: user.id,
                username: user.username,
                display_name: user.display_name,
                profile_pic: user.profile_pic,
            });
        }

        for session in self.sessions {
            database.insert_session(session.token, session.user_id);
        }
    }
}
