//! Capture-file source
//!
//! Replays an NDJSON capture line-by-line. Replay is as fast as the disk;
//! pacing, if any, is the presentation layer's concern.

use std::path::PathBuf;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::LinesStream;
use tokio_util::sync::CancellationToken;

use super::{ChatRequest, LineStream, PacketSource};
use crate::error::RivuletError;

pub struct NdjsonSource {
    path: PathBuf,
}

impl NdjsonSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl PacketSource for NdjsonSource {
    fn name(&self) -> &str {
        "ndjson"
    }

    async fn open(
        &self,
        _request: &ChatRequest,
        _cancel: CancellationToken,
    ) -> Result<LineStream, RivuletError> {
        let file = File::open(&self.path).await?;
        let lines = LinesStream::new(BufReader::new(file).lines());
        Ok(Box::pin(lines.map(|item| item.map_err(RivuletError::Io))))
    }
}
