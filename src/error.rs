//! Error types with fix hints
//!
//! Structured errors for the decoder and its stream sources, designed for
//! helpful messages when a capture or endpoint misbehaves.

use thiserror::Error;

/// Trait for errors that provide a remediation hint
pub trait FixHint {
    fn fix_hint(&self) -> Option<&str>;
}

/// All error variants are part of the public API.
#[derive(Error, Debug)]
pub enum RivuletError {
    /// A line/packet that cannot be parsed or tagged. Recorded and skipped,
    /// never fatal to the rest of the stream.
    #[error("Decode error: {details}")]
    Decode { details: String, line: String },

    /// The network stream failed for a reason other than cancellation.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A source could not be constructed or opened.
    #[error("Source error: {0}")]
    Source(String),

    #[error("Invalid endpoint URL '{url}': {details}")]
    InvalidEndpoint { url: String, details: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FixHint for RivuletError {
    fn fix_hint(&self) -> Option<&str> {
        match self {
            RivuletError::Decode { .. } => {
                Some("Each line must be one JSON packet: {\"ind\": N, \"obj\": {\"type\": ...}}")
            }
            RivuletError::Transport(_) => {
                Some("Check the endpoint is reachable and streaming NDJSON")
            }
            RivuletError::Source(_) => {
                Some("Available sources: mock, a capture file path, or an http(s) URL")
            }
            RivuletError::InvalidEndpoint { .. } => Some("Use a full http:// or https:// URL"),
            RivuletError::Io(_) => Some("Check file path and permissions"),
        }
    }
}
