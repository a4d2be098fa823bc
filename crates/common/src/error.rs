use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found")]
    NotFound,

    #[error("no new bars")]
    NoNewBars,

    #[error("history too short")]
    HistoryTooShort,

    #[error("already running")]
    AlreadyRunning,

    #[error("not running")]
    NotRunning,

    #[error("strategy already exists: {0}")]
    DuplicateStrategy(String),

    #[error("download error: {0}")]
    Download(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("event handler error: {0}")]
    Handler(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
