//! Live HTTP source
//!
//! POSTs the chat request and streams the NDJSON response body. The body
//! arrives in arbitrary byte chunks, so a small bridge task reassembles
//! complete lines before handing them to the session.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use super::{ChatRequest, LineStream, PacketSource};
use crate::error::RivuletError;

#[derive(Debug)]
pub struct HttpSource {
    endpoint: Url,
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(endpoint: &str) -> Result<Self, RivuletError> {
        let url = Url::parse(endpoint).map_err(|e| RivuletError::InvalidEndpoint {
            url: endpoint.to_string(),
            details: e.to_string(),
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(RivuletError::InvalidEndpoint {
                url: endpoint.to_string(),
                details: format!("unsupported scheme '{}'", url.scheme()),
            });
        }
        Ok(Self {
            endpoint: url,
            client: reqwest::Client::new(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl PacketSource for HttpSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn open(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<LineStream, RivuletError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| RivuletError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| RivuletError::Transport(e.to_string()))?;

        debug!(endpoint = %self.endpoint, "response stream opened");

        let (tx, rx) = mpsc::channel::<Result<String, RivuletError>>(64);
        let mut body = response.bytes_stream();

        tokio::spawn(async move {
            let mut buf: Vec<u8> = Vec::new();
            loop {
                let chunk = tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("http source cancelled");
                        return;
                    }
                    chunk = body.next() => chunk,
                };

                match chunk {
                    Some(Ok(bytes)) => {
                        buf.extend_from_slice(&bytes);
                        while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                            let line: Vec<u8> = buf.drain(..=pos).collect();
                            let text =
                                String::from_utf8_lossy(&line[..pos]).trim_end().to_string();
                            if tx.send(Ok(text)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        let _ = tx.send(Err(RivuletError::Transport(e.to_string()))).await;
                        return;
                    }
                    None => {
                        // Body ended; flush any unterminated final line
                        if !buf.is_empty() {
                            let text = String::from_utf8_lossy(&buf).trim_end().to_string();
                            let _ = tx.send(Ok(text)).await;
                        }
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
