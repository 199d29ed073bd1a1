use thiserror::Error;

use crate::model::MatchId;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("payload decoding error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("push channel error: {0}")]
    Channel(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("push channel gave up after {attempts} reconnection attempts")]
    RetriesExhausted { attempts: u32 },
    #[error("playlist change for match #{match_id} rejected: {message}")]
    Conflict { match_id: MatchId, message: String },
    #[error("a playlist change for match #{0} is already in flight")]
    Busy(MatchId),
    #[error("no access token available")]
    MissingToken,
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SyncError {
    /// Fetch failures that polling should ride out rather than surface.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SyncError::Transport(_) | SyncError::Status { .. } | SyncError::Decode(_)
        )
    }
}
