use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid user key '{user_key}': {message}")]
    InvalidUserKey { user_key: String, message: String },

    #[error("cannot aggregate an empty descriptor batch")]
    EmptyBatch,

    #[error("descriptor length mismatch at index {index} (expected {expected}, found {found})")]
    LengthMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("enrollment session is already complete ({capture_count} captures recorded)")]
    SessionComplete { capture_count: u32 },

    #[error("keypoint provider failure: {0}")]
    Provider(String),

    #[error("frame source failure: {0}")]
    FrameSource(String),

    #[error("failed to load enrollment for user {user_key}: {message}")]
    StoreRead { user_key: String, message: String },

    #[error("failed to save enrollment for user {user_key}: {message}")]
    StoreWrite { user_key: String, message: String },

    #[error("failed to append verification event for user {user_key}: {message}")]
    EventAppend { user_key: String, message: String },

    #[error("failed to read configuration file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration file {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("invalid configuration value for {field}: {message}")]
    ConfigValue {
        field: &'static str,
        message: String,
    },
}

pub type AppResult<T> = Result<T, AppError>;
