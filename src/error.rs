use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidInput,
    NotFound,
    Io,
    Fetch,
    Storage,
    Integrity,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("{code:?}: {message}")]
pub struct SyncError {
    pub code: ErrorCode,
    pub message: String,
}

impl SyncError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Errors that only invalidate the current record or operation; the run
    /// carries on with the next one.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.code, ErrorCode::InvalidInput | ErrorCode::NotFound)
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        SyncError::new(ErrorCode::Io, e.to_string())
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        SyncError::new(ErrorCode::Storage, format!("Registry query failed: {e}"))
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
