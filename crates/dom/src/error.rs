//! Error types for CDP payload parsing
//!
//! Simple, flat error hierarchy. No over-engineering.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DomError>;

#[derive(Debug, Error)]
pub enum DomError {
    #[error("Missing field in CDP result: {0}")]
    MissingField(&'static str),

    #[error("Parse error: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Frame tree is empty")]
    EmptyFrameTree,

    #[error("Frame not found: {0}")]
    FrameNotFound(String),
}
