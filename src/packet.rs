//! Wire packet model
//!
//! One NDJSON line per logical packet. A packet carries:
//! - `ind`: non-decreasing arrival index, also the correlation key between a
//!   "start" payload and the terminal marker that closes it
//! - `placement`: which turn/tab (and optional nested sub-turn) the packet
//!   belongs to; omitted on continuation packets, which correlate via `ind`
//! - `obj`: the tagged payload

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::RivuletError;

// ─────────────────────────────────────────────────────────────────────────────
// Packet envelope
// ─────────────────────────────────────────────────────────────────────────────

/// Position of a packet within the agent's plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    /// Logical step in the agent's plan
    pub turn_index: u32,
    /// Parallel branch within the turn (concurrent tool calls)
    pub tab_index: u32,
    /// Set on packets emitted by a nested agent invoked by a parent tool call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_turn_index: Option<u32>,
}

impl Placement {
    pub fn new(turn_index: u32, tab_index: u32) -> Self {
        Self {
            turn_index,
            tab_index,
            sub_turn_index: None,
        }
    }

    pub fn with_sub_turn(mut self, sub_turn_index: u32) -> Self {
        self.sub_turn_index = Some(sub_turn_index);
        self
    }
}

/// One unit of the streaming protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub ind: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,
    pub obj: PacketPayload,
}

impl Packet {
    pub fn new(ind: u64, obj: PacketPayload) -> Self {
        Self {
            ind,
            placement: None,
            obj,
        }
    }

    pub fn placed(ind: u64, placement: Placement, obj: PacketPayload) -> Self {
        Self {
            ind,
            placement: Some(placement),
            obj,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Payload fragments
// ─────────────────────────────────────────────────────────────────────────────

/// A document surfaced by a tool (search result, fetched page, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

impl DocumentRef {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            title: None,
            url: None,
            snippet: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Best human-readable label for display
    pub fn label(&self) -> &str {
        self.title
            .as_deref()
            .or(self.url.as_deref())
            .unwrap_or(&self.document_id)
    }
}

/// A citation entry referencing a document by id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationInfo {
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation_num: Option<u32>,
}

/// One step of a multi-step research plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub description: String,
    #[serde(default)]
    pub done: bool,
}

/// An image produced by the image-generation tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Stop reason
// ─────────────────────────────────────────────────────────────────────────────

/// Why the whole stream stopped. The reason vocabulary is server-versioned,
/// so unknown strings decode to `Other` instead of failing the packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Finished,
    UserCancelled,
    ContextLength,
    Other(String),
}

impl StopReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Finished => "finished",
            Self::UserCancelled => "user_cancelled",
            Self::ContextLength => "context_length",
            Self::Other(s) => s,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::UserCancelled)
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for StopReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StopReason {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "finished" => Self::Finished,
            "user_cancelled" => Self::UserCancelled,
            "context_length" => Self::ContextLength,
            _ => Self::Other(s),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Payload
// ─────────────────────────────────────────────────────────────────────────────

/// All packet payload types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PacketPayload {
    // Answer text
    MessageStart {
        #[serde(default)]
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        final_documents: Option<Vec<DocumentRef>>,
    },
    MessageDelta {
        content: String,
    },

    // Reasoning
    ReasoningStart {},
    ReasoningDelta {
        content: String,
    },

    // Search tool
    SearchStart {
        #[serde(default)]
        queries: Vec<String>,
    },
    SearchDelta {
        #[serde(default)]
        queries: Vec<String>,
        #[serde(default)]
        documents: Vec<DocumentRef>,
    },

    // URL fetch tool
    FetchStart {
        #[serde(default)]
        urls: Vec<String>,
    },
    FetchDelta {
        #[serde(default)]
        documents: Vec<DocumentRef>,
    },

    // Code execution tool
    CodeStart {},
    CodeDelta {
        #[serde(default)]
        code: String,
    },
    CodeResult {
        #[serde(default)]
        output: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },

    // Image generation tool
    ImageStart {},
    ImageDelta {
        #[serde(default)]
        images: Vec<GeneratedImage>,
    },

    // Custom / server-defined tool
    CustomToolStart {
        tool_name: String,
    },
    CustomToolDelta {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[serde(default)]
        data: serde_json::Value,
    },

    // Nested-agent delegation
    AgentStart {
        agent_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task: Option<String>,
    },

    // Multi-step research plan
    PlanStart {},
    PlanDelta {
        #[serde(default)]
        steps: Vec<PlanStep>,
    },

    // Citations
    CitationDelta {
        #[serde(default)]
        citations: Vec<CitationInfo>,
    },

    // Terminal marker closing the unit of work that shares this packet's ind
    SectionEnd {},

    // Terminal marker for the entire response stream
    Stop {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop_reason: Option<StopReason>,
    },
}

impl PacketPayload {
    /// Wire tag for this payload
    pub fn tag(&self) -> &'static str {
        match self {
            Self::MessageStart { .. } => "message_start",
            Self::MessageDelta { .. } => "message_delta",
            Self::ReasoningStart {} => "reasoning_start",
            Self::ReasoningDelta { .. } => "reasoning_delta",
            Self::SearchStart { .. } => "search_start",
            Self::SearchDelta { .. } => "search_delta",
            Self::FetchStart { .. } => "fetch_start",
            Self::FetchDelta { .. } => "fetch_delta",
            Self::CodeStart {} => "code_start",
            Self::CodeDelta { .. } => "code_delta",
            Self::CodeResult { .. } => "code_result",
            Self::ImageStart {} => "image_start",
            Self::ImageDelta { .. } => "image_delta",
            Self::CustomToolStart { .. } => "custom_tool_start",
            Self::CustomToolDelta { .. } => "custom_tool_delta",
            Self::AgentStart { .. } => "agent_start",
            Self::PlanStart {} => "plan_start",
            Self::PlanDelta { .. } => "plan_delta",
            Self::CitationDelta { .. } => "citation_delta",
            Self::SectionEnd {} => "section_end",
            Self::Stop { .. } => "stop",
        }
    }

    /// Terminal markers close a unit of work (or the whole stream)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SectionEnd {} | Self::Stop { .. })
    }

    /// Message text payloads (the final answer)
    pub fn is_message(&self) -> bool {
        matches!(self, Self::MessageStart { .. } | Self::MessageDelta { .. })
    }

    /// Tool-family payloads (anything that is not answer text, reasoning,
    /// citations or a terminal marker)
    pub fn is_tool(&self) -> bool {
        matches!(
            self,
            Self::SearchStart { .. }
                | Self::SearchDelta { .. }
                | Self::FetchStart { .. }
                | Self::FetchDelta { .. }
                | Self::CodeStart {}
                | Self::CodeDelta { .. }
                | Self::CodeResult { .. }
                | Self::ImageStart {}
                | Self::ImageDelta { .. }
                | Self::CustomToolStart { .. }
                | Self::CustomToolDelta { .. }
                | Self::AgentStart { .. }
                | Self::PlanStart {}
                | Self::PlanDelta { .. }
        )
    }

    /// Document references carried by this payload, if any
    pub fn documents(&self) -> &[DocumentRef] {
        match self {
            Self::MessageStart {
                final_documents: Some(docs),
                ..
            } => docs,
            Self::SearchDelta { documents, .. } => documents,
            Self::FetchDelta { documents } => documents,
            _ => &[],
        }
    }

    /// Citation entries carried by this payload, if any
    pub fn citations(&self) -> &[CitationInfo] {
        match self {
            Self::CitationDelta { citations } => citations,
            _ => &[],
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Line decoding
// ─────────────────────────────────────────────────────────────────────────────

/// Out-of-band stream opener. Carries message ids, is not itself a packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamAck {
    pub user_message_id: u64,
    pub reserved_assistant_message_id: u64,
}

/// One decoded NDJSON line
#[derive(Debug, Clone, PartialEq)]
pub enum WireFrame {
    Ack(StreamAck),
    Packet(Packet),
}

/// Decode one NDJSON line. Blank lines yield `None`; malformed lines yield a
/// decode error the caller records and skips.
pub fn decode_line(line: &str) -> Result<Option<WireFrame>, RivuletError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let value: serde_json::Value = serde_json::from_str(trimmed).map_err(|e| decode_err(line, e))?;

    let obj = value
        .as_object()
        .ok_or_else(|| decode_err(line, serde_json::Error::custom("expected a JSON object")))?;

    if obj.contains_key("obj") {
        let packet: Packet = serde_json::from_value(value.clone()).map_err(|e| decode_err(line, e))?;
        return Ok(Some(WireFrame::Packet(packet)));
    }

    if obj.contains_key("user_message_id") {
        let ack: StreamAck = serde_json::from_value(value).map_err(|e| decode_err(line, e))?;
        return Ok(Some(WireFrame::Ack(ack)));
    }

    Err(decode_err(
        line,
        serde_json::Error::custom("neither a packet (missing 'obj') nor a stream ack"),
    ))
}

fn decode_err(line: &str, err: serde_json::Error) -> RivuletError {
    RivuletError::Decode {
        details: err.to_string(),
        line: line.to_string(),
    }
}
