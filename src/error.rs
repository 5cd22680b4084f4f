//! Crate-wide error kinds

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("db error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("no such post {0}")]
    PostNotFound(i64),

    #[error("not authorized")]
    Unauthorized,

    #[error("malformed sync frame")]
    MalformedSyncFrame,
}

impl Error {
    /// Command-level errors become reply text; everything else is logged
    /// and suppressed by the caller. Transport errors only reach this path
    /// from synchronous admin commands.
    pub fn reply_text(&self) -> Option<String> {
        match self {
            Error::Store(_) => Some("db error".to_string()),
            Error::PostNotFound(id) => Some(format!("no such post {}", id)),
            Error::Unauthorized => Some("Not authorized.".to_string()),
            Error::Transport(_) => Some("send failed".to_string()),
            Error::MalformedSyncFrame => None,
        }
    }
}
