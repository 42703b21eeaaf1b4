//! Error types for Playback

use std::io;
use thiserror::Error;

/// Result type for Playback operations
pub type Result<T> = std::result::Result<T, PlaybackError>;

/// Errors that can occur in Playback
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Cassette bytes could not be decoded
    #[error("Cassette decode failed at offset {offset}: {reason}")]
    Decode {
        /// Absolute byte offset where decoding failed
        offset: usize,
        /// What was wrong at that offset
        reason: String,
    },

    /// The remote service could not be reached
    #[error("Upstream request failed: {0}")]
    Upstream(String),

    /// Replay cursor is past the last recorded interaction
    #[error("Replay exhausted: all {served} recorded interactions have been served")]
    ReplayExhausted {
        /// Number of interactions served before exhaustion
        served: usize,
    },

    /// Verified replay found a different request at the cursor
    #[error("Replay mismatch at interaction {sequence}: expected {expected}, got {actual}")]
    ReplayMismatch {
        /// Sequence number of the interaction at the cursor
        sequence: u64,
        /// Recorded request (method and target)
        expected: String,
        /// Inbound request (method and target)
        actual: String,
    },

    /// Control operation not allowed in the current state
    #[error("Invalid mode transition: {0}")]
    InvalidModeTransition(String),

    /// Control operation could not acquire exclusive access in time
    #[error("Proxy state is busy: gave up after {waited_ms} ms")]
    LockContention {
        /// How long the operation waited
        waited_ms: u64,
    },

    /// Proxy request arrived while no mode is set
    #[error("No mode configured: set a mode via /pb/mode/record or /pb/mode/replay")]
    NoModeConfigured,

    /// Proxy request arrived while no cassette is loaded
    #[error("No cassette loaded: load one via /pb/cassette/load?filepath=...")]
    NoCassetteLoaded,

    /// Server is stopping
    #[error("Server is shutting down")]
    ShuttingDown,

    /// Cassette path rejected
    #[error("Invalid cassette path: {0}")]
    InvalidCassettePath(String),

    /// Malformed request to the proxy or control plane
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Request/response too large
    #[error("Data too large: {size} bytes exceeds limit of {limit} bytes")]
    DataTooLarge {
        /// Actual size
        size: usize,
        /// Size limit
        limit: usize,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl PlaybackError {
    /// Short machine-readable tag, sent in the `x-playback-error` header
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Decode { .. } => "decode",
            Self::Upstream(_) => "upstream",
            Self::ReplayExhausted { .. } => "replay-exhausted",
            Self::ReplayMismatch { .. } => "replay-mismatch",
            Self::InvalidModeTransition(_) => "invalid-mode-transition",
            Self::LockContention { .. } => "lock-contention",
            Self::NoModeConfigured => "no-mode",
            Self::NoCassetteLoaded => "no-cassette",
            Self::ShuttingDown => "shutting-down",
            Self::InvalidCassettePath(_) => "invalid-cassette-path",
            Self::BadRequest(_) => "bad-request",
            Self::DataTooLarge { .. } => "data-too-large",
            Self::ConfigError(_) => "config",
            Self::Other(_) => "other",
        }
    }

    pub(crate) fn decode(offset: usize, reason: impl Into<String>) -> Self {
        Self::Decode {
            offset,
            reason: reason.into(),
        }
    }
}
