use thiserror::Error;

/// Errors raised by the ranking core and its collaborators.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("invalid ranking profile entry: {0}")]
    Profile(String),
    #[error("invalid id: {0}")]
    InvalidId(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("snippet unavailable: {0}")]
    Snippet(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SearchError {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        SearchError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SearchError>;
