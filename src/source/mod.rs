//! # Packet Sources
//!
//! Trait and implementations for stream backends.
//!
//! ## Overview
//!
//! A [`PacketSource`] produces the raw NDJSON lines of one response stream:
//!
//! - [`MockSource`] - Scripted demo stream, paced with timers
//! - [`NdjsonSource`] - Replays a capture file
//! - [`HttpSource`] - Live endpoint, streamed over HTTP
//!
//! ## Creating Sources
//!
//! Use [`create_source`] to instantiate a source from a spec string:
//!
//! ```rust
//! use rivulet::source::create_source;
//!
//! assert!(create_source("mock").is_ok());
//! assert!(create_source("capture.ndjson").is_ok());
//! assert!(create_source("https://example.com/chat").is_ok());
//! assert!(create_source("ftp://example.com").is_err());
//! ```
//!
//! Decoding the lines is the caller's job: a source never interprets packet
//! content, so a capture with malformed lines replays byte-for-byte.

mod http;
mod mock;
mod ndjson;

pub use http::HttpSource;
pub use mock::MockSource;
pub use ndjson::NdjsonSource;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::RivuletError;

/// Raw NDJSON lines of one response stream
pub type LineStream = Pin<Box<dyn Stream<Item = Result<String, RivuletError>> + Send>>;

// ─────────────────────────────────────────────────────────────────────────────
// Request
// ─────────────────────────────────────────────────────────────────────────────

/// What gets sent to open a response stream
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Source trait
// ─────────────────────────────────────────────────────────────────────────────

/// Core trait that all stream backends implement.
///
/// `open` hands back the line stream for one response. The cancellation token
/// is the same one the session holds; a source must stop producing promptly
/// once it fires, though the session also guards its own read loop with it.
#[async_trait]
pub trait PacketSource: Send + Sync {
    /// Source name for logs and errors ("mock", "ndjson", "http")
    fn name(&self) -> &str;

    async fn open(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<LineStream, RivuletError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Factory
// ─────────────────────────────────────────────────────────────────────────────

/// Create a source from a spec string: `mock`, an `http(s)://` endpoint, or a
/// capture file path.
pub fn create_source(spec: &str) -> Result<Box<dyn PacketSource>, RivuletError> {
    if spec.eq_ignore_ascii_case("mock") {
        return Ok(Box::new(MockSource::new()));
    }
    if spec.starts_with("http://") || spec.starts_with("https://") {
        return Ok(Box::new(HttpSource::new(spec)?));
    }
    if spec.contains("://") {
        return Err(RivuletError::InvalidEndpoint {
            url: spec.to_string(),
            details: "unsupported scheme".to_string(),
        });
    }
    Ok(Box::new(NdjsonSource::new(spec)))
}
