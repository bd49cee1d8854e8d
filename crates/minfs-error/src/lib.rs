#![forbid(unsafe_code)]
//! Error types for MinFS.
//!
//! Defines `MinfsError` and a `Result<T>` alias used throughout the
//! workspace.

use thiserror::Error;

/// Unified error type for all MinFS operations.
#[derive(Debug, Error)]
pub enum MinfsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no space left on device")]
    NoSpace,

    #[error("file exceeds maximum size")]
    FileTooBig,

    #[error("invalid argument: {0}")]
    InvalidArgs(String),

    #[error("bad state: {0}")]
    BadState(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists")]
    AlreadyExists,

    #[error("not a directory")]
    NotDir,

    #[error("is a directory")]
    IsDir,

    #[error("filesystem is read-only")]
    ReadOnly,
}

/// Result alias using `MinfsError`.
pub type Result<T> = std::result::Result<T, MinfsError>;
