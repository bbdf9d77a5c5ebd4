//! Renderer dispatch
//!
//! An ordered table of (predicate, handler) entries. Predicates run in
//! registration order and the first match wins, so ordering is part of the
//! contract: the nested-agent entry must precede the generic tool entries,
//! because an agent group also contains tool-shaped sub-packets.
//!
//! The table is immutable - extending the registry means building a new table
//! with [`RendererRegistry::with_entry`], never mutating a shared global.

mod handlers;

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::packet::{CitationInfo, DocumentRef};
use crate::processor::{GroupedPacket, ProcessorState};

// ─────────────────────────────────────────────────────────────────────────────
// Output contract
// ─────────────────────────────────────────────────────────────────────────────

/// Icon selector for a rendered group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Icon {
    Message,
    Reasoning,
    Search,
    Fetch,
    Code,
    Image,
    Tool,
    Agent,
    Plan,
}

impl Icon {
    pub fn glyph(&self) -> &'static str {
        match self {
            Self::Message => "💬",
            Self::Reasoning => "🧠",
            Self::Search => "🔍",
            Self::Fetch => "🌐",
            Self::Code => "⚙",
            Self::Image => "🖼",
            Self::Tool => "🔧",
            Self::Agent => "🤖",
            Self::Plan => "🗺",
        }
    }
}

/// What the presentation layer receives for one group
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub icon: Icon,
    /// Short status label ("Searching...", "Ran code")
    pub status: String,
    /// Primary content body
    pub content: String,
    /// Secondary body for disclosure UIs
    pub expanded: Option<String>,
}

/// Ambient state handlers may read. Handlers are pure functions of
/// (packets, this context) and never mutate processor state.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub documents: &'a HashMap<String, DocumentRef>,
    pub citations: &'a [CitationInfo],
    pub stream_stopped: bool,
    /// Presentation-layer animation/pacing enabled
    pub animate: bool,
}

impl<'a> RenderContext<'a> {
    pub fn from_state(state: &'a ProcessorState, animate: bool) -> Self {
        Self {
            documents: state.documents(),
            citations: state.citations(),
            stream_stopped: state.stream_stopped(),
            animate,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

pub type RenderPredicate = fn(&GroupedPacket) -> bool;
pub type RenderFn = fn(&GroupedPacket, &RenderContext) -> Rendered;

/// One named (predicate, handler) pair
#[derive(Clone)]
pub struct RendererEntry {
    pub name: &'static str,
    pub matches: RenderPredicate,
    pub render: RenderFn,
}

impl std::fmt::Debug for RendererEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererEntry")
            .field("name", &self.name)
            .finish()
    }
}

/// Explicitly ordered, immutable dispatch table
#[derive(Debug, Clone)]
pub struct RendererRegistry {
    entries: Vec<RendererEntry>,
}

impl RendererRegistry {
    pub fn new(entries: Vec<RendererEntry>) -> Self {
        Self { entries }
    }

    /// The builtin table. Order matters: nested agent before generic tools,
    /// tools before reasoning, plain message last.
    pub fn builtin() -> Self {
        Self::new(vec![
            handlers::agent(),
            handlers::plan(),
            handlers::search(),
            handlers::fetch(),
            handlers::code(),
            handlers::image(),
            handlers::custom_tool(),
            handlers::reasoning(),
            handlers::message(),
        ])
    }

    /// A new table with one more entry appended (lowest priority)
    pub fn with_entry(mut self, entry: RendererEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// A new table with an entry inserted ahead of the named one
    pub fn with_entry_before(mut self, name: &str, entry: RendererEntry) -> Self {
        let at = self
            .entries
            .iter()
            .position(|e| e.name == name)
            .unwrap_or(self.entries.len());
        self.entries.insert(at, entry);
        self
    }

    /// First entry whose predicate matches, or None
    pub fn dispatch(&self, group: &GroupedPacket) -> Option<&RendererEntry> {
        self.entries.iter().find(|e| (e.matches)(group))
    }

    /// Dispatch and render in one step
    pub fn render(&self, group: &GroupedPacket, ctx: &RenderContext) -> Option<Rendered> {
        self.dispatch(group).map(|e| (e.render)(group, ctx))
    }

    pub fn entries(&self) -> &[RendererEntry] {
        &self.entries
    }
}

/// Shared builtin table, built once at startup
pub fn default_registry() -> &'static RendererRegistry {
    static REGISTRY: Lazy<RendererRegistry> = Lazy::new(RendererRegistry::builtin);
    &REGISTRY
}
