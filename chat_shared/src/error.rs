//! Domain error types.
//!
//! Matched against by callers (unlike `anyhow::Error`, which binaries use
//! to collect context on fallible call chains); see `SPEC_FULL.md`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("a reliable-send is already in flight")]
    Busy,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
