use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClothError {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Watcher error: {0}")]
    Watcher(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Memo is {len} characters long, the limit is {max}")]
    MemoTooLong { len: usize, max: usize },
}

impl From<config::ConfigError> for ClothError {
    fn from(e: config::ConfigError) -> Self {
        ClothError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClothError>;
