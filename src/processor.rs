//! Incremental packet processor
//!
//! Folds an ever-growing packet array into derived state: turn/tab groups,
//! the document map, the deduplicated citation list and the completion flags.
//! Folding is idempotent and monotonic - only packets past
//! `last_processed_index` are touched, so cost is proportional to the number
//! of new packets, never the whole history.
//!
//! One `ProcessorState` per in-flight response, keyed by a node identifier.
//! State is never shared between sessions.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::packet::{CitationInfo, DocumentRef, Packet, PacketPayload, StopReason};

// ─────────────────────────────────────────────────────────────────────────────
// Groups
// ─────────────────────────────────────────────────────────────────────────────

/// Identity of one packet group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub turn_index: u32,
    pub tab_index: u32,
}

impl GroupKey {
    pub fn new(turn_index: u32, tab_index: u32) -> Self {
        Self {
            turn_index,
            tab_index,
        }
    }
}

/// All packets sharing one (turn, tab) key, insertion-ordered.
/// Nested sub-turn packets stay embedded here, carried by their placement.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupedPacket {
    pub turn_index: u32,
    pub tab_index: u32,
    pub packets: Vec<Packet>,
}

impl GroupedPacket {
    pub fn key(&self) -> GroupKey {
        GroupKey::new(self.turn_index, self.tab_index)
    }

    /// The `ind` that started this group (first packet's index)
    pub fn origin_ind(&self) -> Option<u64> {
        self.packets.first().map(|p| p.ind)
    }

    /// True iff a terminal marker sharing the originating `ind` was observed
    pub fn is_complete(&self) -> bool {
        let Some(origin) = self.origin_ind() else {
            return false;
        };
        self.packets
            .iter()
            .any(|p| p.ind == origin && p.obj.is_terminal())
    }

    /// Does any packet in this group carry the given payload tag?
    pub fn contains_tag(&self, tag: &str) -> bool {
        self.packets.iter().any(|p| p.obj.tag() == tag)
    }

    /// Concatenated message text (start content + deltas, arrival order)
    pub fn message_text(&self) -> String {
        let mut text = String::new();
        for packet in &self.packets {
            match &packet.obj {
                PacketPayload::MessageStart { content, .. } => text.push_str(content),
                PacketPayload::MessageDelta { content } => text.push_str(content),
                _ => {}
            }
        }
        text
    }

    /// Concatenated reasoning text
    pub fn reasoning_text(&self) -> String {
        let mut text = String::new();
        for packet in &self.packets {
            if let PacketPayload::ReasoningDelta { content } = &packet.obj {
                text.push_str(content);
            }
        }
        text
    }

    /// Does this group hold any tool-family packet?
    pub fn has_tool_packets(&self) -> bool {
        self.packets.iter().any(|p| p.obj.is_tool())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Decode failures
// ─────────────────────────────────────────────────────────────────────────────

/// A line/packet that could not be decoded. Recorded, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeFailure {
    pub line: String,
    pub details: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Processor state
// ─────────────────────────────────────────────────────────────────────────────

/// Derived state for one in-flight response
#[derive(Debug, Clone)]
pub struct ProcessorState {
    node_id: String,
    generation: u64,

    /// Count of packets already folded into derived state
    last_processed_index: usize,

    /// Insertion-ordered groups plus a key lookup
    groups: Vec<GroupedPacket>,
    group_index: HashMap<GroupKey, usize>,

    /// Correlates placement-less continuation packets with their group
    ind_to_group: HashMap<u64, GroupKey>,

    /// Every `ind` for which a terminal marker was observed
    completed_inds: HashSet<u64>,

    documents: HashMap<String, DocumentRef>,
    citations: Vec<CitationInfo>,
    seen_citation_ids: HashSet<String>,

    stopped: bool,
    stop_reason: Option<StopReason>,

    /// Message content arrived before any tool group existed: the stream is
    /// going straight to the final answer, surface text instead of tool chatter
    final_answer_incoming: bool,
    has_tool_packets: bool,

    decode_failures: Vec<DecodeFailure>,
}

impl ProcessorState {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            generation: 0,
            last_processed_index: 0,
            groups: Vec::new(),
            group_index: HashMap::new(),
            ind_to_group: HashMap::new(),
            completed_inds: HashSet::new(),
            documents: HashMap::new(),
            citations: Vec::new(),
            seen_citation_ids: HashSet::new(),
            stopped: false,
            stop_reason: None,
            final_answer_incoming: false,
            has_tool_packets: false,
            decode_failures: Vec::new(),
        }
    }

    /// Begin a new logical response on the same node. Preferred over shrink
    /// detection: an unchanged generation is a no-op, a new one resets state.
    pub fn begin_generation(&mut self, generation: u64) {
        if generation != self.generation {
            debug!(node_id = %self.node_id, generation, "new generation, resetting state");
            self.reset();
            self.generation = generation;
        }
    }

    /// Fold the full packet array so far. Only packets at index >=
    /// `last_processed_index` are processed; a shrunken array signals a new
    /// logical response and triggers a full reset before refolding.
    pub fn fold(&mut self, packets: &[Packet]) {
        if packets.len() < self.last_processed_index {
            debug!(
                node_id = %self.node_id,
                seen = self.last_processed_index,
                incoming = packets.len(),
                "packet array shrank, resetting state"
            );
            self.reset();
        }

        for packet in &packets[self.last_processed_index..] {
            self.fold_one(packet);
        }
        self.last_processed_index = packets.len();
    }

    fn reset(&mut self) {
        let generation = self.generation;
        let node_id = std::mem::take(&mut self.node_id);
        *self = Self::new(node_id);
        self.generation = generation;
    }

    fn fold_one(&mut self, packet: &Packet) {
        // Documents and citations accumulate regardless of grouping
        for doc in packet.obj.documents() {
            self.documents
                .insert(doc.document_id.clone(), doc.clone());
        }
        for citation in packet.obj.citations() {
            if self.seen_citation_ids.insert(citation.document_id.clone()) {
                self.citations.push(citation.clone());
            }
        }

        match &packet.obj {
            PacketPayload::Stop { stop_reason } => {
                self.stopped = true;
                self.stop_reason = stop_reason.clone();
                self.completed_inds.insert(packet.ind);
            }
            PacketPayload::SectionEnd {} => {
                self.completed_inds.insert(packet.ind);
            }
            obj if obj.is_message() => {
                if !self.has_tool_packets {
                    self.final_answer_incoming = true;
                }
            }
            obj if obj.is_tool() => {
                self.has_tool_packets = true;
            }
            _ => {}
        }

        // Resolve the group: explicit placement wins, otherwise correlate by ind
        let key = match &packet.placement {
            Some(placement) => {
                let key = GroupKey::new(placement.turn_index, placement.tab_index);
                self.ind_to_group.insert(packet.ind, key);
                Some(key)
            }
            None => self.ind_to_group.get(&packet.ind).copied(),
        };

        let Some(key) = key else {
            // Terminal markers for unknown inds are protocol skew, not a local
            // bug; other orphans are dropped the same way.
            if !packet.obj.is_terminal() {
                warn!(ind = packet.ind, tag = packet.obj.tag(), "orphan packet dropped");
            }
            return;
        };

        let slot = match self.group_index.get(&key) {
            Some(&i) => i,
            None => {
                self.groups.push(GroupedPacket {
                    turn_index: key.turn_index,
                    tab_index: key.tab_index,
                    packets: Vec::new(),
                });
                let i = self.groups.len() - 1;
                self.group_index.insert(key, i);
                i
            }
        };
        self.groups[slot].packets.push(packet.clone());
    }

    /// Attach a decode error from the ingestion layer
    pub fn record_decode_failure(&mut self, line: impl Into<String>, details: impl Into<String>) {
        self.decode_failures.push(DecodeFailure {
            line: line.into(),
            details: details.into(),
        });
    }

    // ─── Selectors ───────────────────────────────────────────────────────────

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn last_processed_index(&self) -> usize {
        self.last_processed_index
    }

    /// Groups in insertion order
    pub fn groups(&self) -> &[GroupedPacket] {
        &self.groups
    }

    pub fn group(&self, key: GroupKey) -> Option<&GroupedPacket> {
        self.group_index.get(&key).map(|&i| &self.groups[i])
    }

    /// A group's unit of work is finished iff a terminal marker sharing its
    /// originating `ind` was observed
    pub fn group_complete(&self, key: GroupKey) -> bool {
        self.group(key)
            .and_then(|g| g.origin_ind())
            .map(|ind| self.completed_inds.contains(&ind))
            .unwrap_or(false)
    }

    pub fn documents(&self) -> &HashMap<String, DocumentRef> {
        &self.documents
    }

    /// Deduplicated citations, first-seen order
    pub fn citations(&self) -> &[CitationInfo] {
        &self.citations
    }

    pub fn stream_stopped(&self) -> bool {
        self.stopped
    }

    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.stop_reason.as_ref()
    }

    pub fn cancelled(&self) -> bool {
        self.stop_reason
            .as_ref()
            .map(|r| r.is_cancelled())
            .unwrap_or(false)
    }

    pub fn final_answer_incoming(&self) -> bool {
        self.final_answer_incoming
    }

    pub fn has_tool_packets(&self) -> bool {
        self.has_tool_packets
    }

    pub fn decode_failures(&self) -> &[DecodeFailure] {
        &self.decode_failures
    }
}
