//! Mock source for demos and tests
//!
//! Streams a scripted response without a backend. The default script walks
//! the whole protocol surface: reasoning, a parallel search/fetch turn,
//! citations and a final answer, closed by a stop packet.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ChatRequest, LineStream, PacketSource};
use crate::error::RivuletError;
use crate::packet::{
    CitationInfo, DocumentRef, Packet, PacketPayload, Placement, StopReason, StreamAck,
};

/// Scripted source that paces lines out over timers
pub struct MockSource {
    script: Vec<String>,
    delay: Duration,
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            script: demo_script(),
            delay: Duration::from_millis(20),
        }
    }

    /// Replace the default script with explicit NDJSON lines
    pub fn with_script(mut self, lines: Vec<String>) -> Self {
        self.script = lines;
        self
    }

    /// Delay between consecutive lines
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PacketSource for MockSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn open(
        &self,
        _request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<LineStream, RivuletError> {
        let (tx, rx) = mpsc::channel::<Result<String, RivuletError>>(16);
        let script = self.script.clone();
        let delay = self.delay;

        tokio::spawn(async move {
            for line in script {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("mock source cancelled");
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                if tx.send(Ok(line)).await.is_err() {
                    return;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

fn line(value: &impl serde::Serialize) -> String {
    // Script values are built from the crate's own wire types
    serde_json::to_string(value).unwrap_or_default()
}

fn demo_script() -> Vec<String> {
    let doc = |id: &str, title: &str, url: &str| {
        DocumentRef::new(id).with_title(title).with_url(url)
    };

    vec![
        line(&StreamAck {
            user_message_id: 100,
            reserved_assistant_message_id: 101,
        }),
        // Turn 0: reasoning
        line(&Packet::placed(
            0,
            Placement::new(0, 0),
            PacketPayload::ReasoningStart {},
        )),
        line(&Packet::new(
            0,
            PacketPayload::ReasoningDelta {
                content: "The question needs both fresh sources and a spec lookup, \
                          so run a search and a page fetch side by side."
                    .to_string(),
            },
        )),
        line(&Packet::new(0, PacketPayload::SectionEnd {})),
        // Turn 1: parallel search + fetch tabs
        line(&Packet::placed(
            1,
            Placement::new(1, 0),
            PacketPayload::SearchStart {
                queries: vec!["rust async streams".to_string()],
            },
        )),
        line(&Packet::placed(
            2,
            Placement::new(1, 1),
            PacketPayload::FetchStart {
                urls: vec!["https://docs.rs/futures".to_string()],
            },
        )),
        line(&Packet::new(
            1,
            PacketPayload::SearchDelta {
                queries: vec![],
                documents: vec![
                    doc("d1", "Asynchronous streams in Rust", "https://example.com/streams"),
                    doc("d2", "Tokio tutorial", "https://tokio.rs/tutorial"),
                ],
            },
        )),
        line(&Packet::new(
            2,
            PacketPayload::FetchDelta {
                documents: vec![doc("d3", "futures crate docs", "https://docs.rs/futures")],
            },
        )),
        line(&Packet::new(1, PacketPayload::SectionEnd {})),
        line(&Packet::new(2, PacketPayload::SectionEnd {})),
        // Turn 2: cited final answer
        line(&Packet::placed(
            3,
            Placement::new(2, 0),
            PacketPayload::MessageStart {
                content: String::new(),
                final_documents: None,
            },
        )),
        line(&Packet::new(
            3,
            PacketPayload::MessageDelta {
                content: "A Stream is the asynchronous analogue of an Iterator: ".to_string(),
            },
        )),
        line(&Packet::new(
            3,
            PacketPayload::MessageDelta {
                content: "values arrive over time and are pulled with poll_next [1].".to_string(),
            },
        )),
        line(&Packet::new(
            3,
            PacketPayload::CitationDelta {
                citations: vec![CitationInfo {
                    document_id: "d1".to_string(),
                    citation_num: Some(1),
                }],
            },
        )),
        line(&Packet::new(
            3,
            PacketPayload::Stop {
                stop_reason: Some(StopReason::Finished),
            },
        )),
    ]
}
