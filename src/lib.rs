//! Rivulet - incremental decoder for agentic chat streams

pub mod error;
pub mod packet;
pub mod processor;
pub mod render;
pub mod session;
pub mod source;
pub mod turns;

pub use error::{FixHint, RivuletError};
pub use packet::{
    decode_line, CitationInfo, DocumentRef, Packet, PacketPayload, Placement, StopReason,
    StreamAck, WireFrame,
};
pub use processor::{DecodeFailure, GroupKey, GroupedPacket, ProcessorState};
pub use render::{default_registry, RenderContext, Rendered, RendererEntry, RendererRegistry};
pub use session::{ChatSession, PacingConfig, ResponseGate, SessionOutcome, SessionPhase};
pub use source::{create_source, ChatRequest, HttpSource, MockSource, NdjsonSource, PacketSource};
pub use turns::{group_into_turns, sub_turn_partition, TurnGroup};
