//! Builtin group handlers
//!
//! Each handler is a pure function of (group packets, ambient context).
//! Predicates test for the payload tags of the handler's domain.

use super::{Icon, RenderContext, Rendered, RendererEntry};
use crate::packet::{DocumentRef, PacketPayload};
use crate::processor::GroupedPacket;
use crate::turns::sub_turn_partition;

// ─────────────────────────────────────────────────────────────────────────────
// Shared helpers
// ─────────────────────────────────────────────────────────────────────────────

fn documents_of(group: &GroupedPacket) -> Vec<&DocumentRef> {
    group
        .packets
        .iter()
        .flat_map(|p| p.obj.documents().iter())
        .collect()
}

fn document_listing(docs: &[&DocumentRef]) -> Option<String> {
    if docs.is_empty() {
        return None;
    }
    Some(
        docs.iter()
            .map(|d| format!("- {}", d.label()))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Message
// ─────────────────────────────────────────────────────────────────────────────

pub fn message() -> RendererEntry {
    RendererEntry {
        name: "message",
        matches: |g| g.contains_tag("message_start") || g.contains_tag("message_delta"),
        render: render_message,
    }
}

fn render_message(group: &GroupedPacket, ctx: &RenderContext) -> Rendered {
    let status = if group.is_complete() || ctx.stream_stopped {
        "Answered".to_string()
    } else {
        "Answering...".to_string()
    };

    // Disclosure body: the citations backing this answer, resolved against
    // the document map when possible
    let expanded = if ctx.citations.is_empty() {
        None
    } else {
        let lines: Vec<String> = ctx
            .citations
            .iter()
            .map(|c| {
                let label = ctx
                    .documents
                    .get(&c.document_id)
                    .map(|d| d.label().to_string())
                    .unwrap_or_else(|| c.document_id.clone());
                format!("[{}] {}", c.citation_num.unwrap_or(0), label)
            })
            .collect();
        Some(lines.join("\n"))
    };

    Rendered {
        icon: Icon::Message,
        status,
        content: group.message_text(),
        expanded,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reasoning
// ─────────────────────────────────────────────────────────────────────────────

pub fn reasoning() -> RendererEntry {
    RendererEntry {
        name: "reasoning",
        matches: |g| g.contains_tag("reasoning_start") || g.contains_tag("reasoning_delta"),
        render: |group, _ctx| {
            let status = if group.is_complete() {
                "Thought".to_string()
            } else {
                "Thinking...".to_string()
            };
            let text = group.reasoning_text();
            Rendered {
                icon: Icon::Reasoning,
                status,
                content: summary_line(&text),
                expanded: (!text.is_empty()).then_some(text),
            }
        },
    }
}

fn summary_line(text: &str) -> String {
    let first = text.lines().next().unwrap_or("");
    if first.chars().count() > 80 {
        let head: String = first.chars().take(80).collect();
        format!("{head}...")
    } else {
        first.to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Search
// ─────────────────────────────────────────────────────────────────────────────

pub fn search() -> RendererEntry {
    RendererEntry {
        name: "search",
        matches: |g| g.contains_tag("search_start") || g.contains_tag("search_delta"),
        render: render_search,
    }
}

fn render_search(group: &GroupedPacket, _ctx: &RenderContext) -> Rendered {
    let mut queries: Vec<&str> = Vec::new();
    for packet in &group.packets {
        match &packet.obj {
            PacketPayload::SearchStart { queries: q }
            | PacketPayload::SearchDelta { queries: q, .. } => {
                for query in q {
                    if !queries.contains(&query.as_str()) {
                        queries.push(query);
                    }
                }
            }
            _ => {}
        }
    }

    let docs = documents_of(group);
    let status = if group.is_complete() {
        format!("Searched {} sources", docs.len())
    } else {
        "Searching...".to_string()
    };
    let content = if queries.is_empty() {
        "Searching".to_string()
    } else {
        format!("Searched for: {}", queries.join(", "))
    };

    Rendered {
        icon: Icon::Search,
        status,
        content,
        expanded: document_listing(&docs),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fetch (open URL)
// ─────────────────────────────────────────────────────────────────────────────

pub fn fetch() -> RendererEntry {
    RendererEntry {
        name: "fetch",
        matches: |g| g.contains_tag("fetch_start") || g.contains_tag("fetch_delta"),
        render: render_fetch,
    }
}

fn render_fetch(group: &GroupedPacket, _ctx: &RenderContext) -> Rendered {
    let mut urls: Vec<&str> = Vec::new();
    for packet in &group.packets {
        if let PacketPayload::FetchStart { urls: u } = &packet.obj {
            urls.extend(u.iter().map(String::as_str));
        }
    }

    let docs = documents_of(group);
    let status = if group.is_complete() {
        format!("Read {} page(s)", docs.len().max(urls.len()))
    } else {
        "Reading...".to_string()
    };
    let content = if urls.is_empty() {
        "Reading pages".to_string()
    } else {
        format!("Reading: {}", urls.join(", "))
    };

    Rendered {
        icon: Icon::Fetch,
        status,
        content,
        expanded: document_listing(&docs),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Code execution
// ─────────────────────────────────────────────────────────────────────────────

pub fn code() -> RendererEntry {
    RendererEntry {
        name: "code",
        matches: |g| {
            g.contains_tag("code_start")
                || g.contains_tag("code_delta")
                || g.contains_tag("code_result")
        },
        render: render_code,
    }
}

fn render_code(group: &GroupedPacket, _ctx: &RenderContext) -> Rendered {
    let mut code = String::new();
    let mut result: Option<(&str, Option<i32>)> = None;
    for packet in &group.packets {
        match &packet.obj {
            PacketPayload::CodeDelta { code: c } => code.push_str(c),
            PacketPayload::CodeResult { output, exit_code } => {
                result = Some((output, *exit_code));
            }
            _ => {}
        }
    }

    let status = match result {
        Some((_, Some(0))) | Some((_, None)) => "Ran code".to_string(),
        Some((_, Some(code))) => format!("Code failed (exit {})", code),
        None => "Running code...".to_string(),
    };

    Rendered {
        icon: Icon::Code,
        status,
        content: code,
        expanded: result.map(|(output, _)| output.to_string()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Image generation
// ─────────────────────────────────────────────────────────────────────────────

pub fn image() -> RendererEntry {
    RendererEntry {
        name: "image",
        matches: |g| g.contains_tag("image_start") || g.contains_tag("image_delta"),
        render: |group, _ctx| {
            let mut urls: Vec<&str> = Vec::new();
            for packet in &group.packets {
                if let PacketPayload::ImageDelta { images } = &packet.obj {
                    urls.extend(images.iter().map(|i| i.url.as_str()));
                }
            }
            let status = if group.is_complete() {
                format!("Generated {} image(s)", urls.len())
            } else {
                "Generating image...".to_string()
            };
            Rendered {
                icon: Icon::Image,
                status,
                content: urls.join("\n"),
                expanded: None,
            }
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Custom tool
// ─────────────────────────────────────────────────────────────────────────────

pub fn custom_tool() -> RendererEntry {
    RendererEntry {
        name: "custom_tool",
        matches: |g| g.contains_tag("custom_tool_start") || g.contains_tag("custom_tool_delta"),
        render: |group, _ctx| {
            let name = group
                .packets
                .iter()
                .find_map(|p| match &p.obj {
                    PacketPayload::CustomToolStart { tool_name } => Some(tool_name.as_str()),
                    PacketPayload::CustomToolDelta {
                        tool_name: Some(name),
                        ..
                    } => Some(name.as_str()),
                    _ => None,
                })
                .unwrap_or("tool");

            let data = group
                .packets
                .iter()
                .rev()
                .find_map(|p| match &p.obj {
                    PacketPayload::CustomToolDelta { data, .. } if !data.is_null() => {
                        serde_json::to_string_pretty(data).ok()
                    }
                    _ => None,
                });

            let status = if group.is_complete() {
                format!("Used {}", name)
            } else {
                format!("Using {}...", name)
            };
            Rendered {
                icon: Icon::Tool,
                status,
                content: name.to_string(),
                expanded: data,
            }
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Nested agent delegation
// ─────────────────────────────────────────────────────────────────────────────

pub fn agent() -> RendererEntry {
    RendererEntry {
        name: "agent",
        matches: |g| g.contains_tag("agent_start"),
        render: render_agent,
    }
}

fn render_agent(group: &GroupedPacket, _ctx: &RenderContext) -> Rendered {
    let (name, task) = group
        .packets
        .iter()
        .find_map(|p| match &p.obj {
            PacketPayload::AgentStart { agent_name, task } => {
                Some((agent_name.as_str(), task.as_deref()))
            }
            _ => None,
        })
        .unwrap_or(("agent", None));

    // Sub-partition the nested work: one summary line per sub-turn
    let parts = sub_turn_partition(group);
    let sub_lines: Vec<String> = parts
        .iter()
        .filter_map(|(sub, packets)| {
            let sub = (*sub)?;
            let tags: Vec<&str> = packets
                .iter()
                .filter(|p| p.obj.is_tool())
                .map(|p| p.obj.tag())
                .collect();
            Some(format!("step {}: {}", sub, tags.join(" -> ")))
        })
        .collect();

    let status = if group.is_complete() {
        format!("Delegated to {}", name)
    } else {
        format!("Delegating to {}...", name)
    };
    let content = task.map(str::to_string).unwrap_or_else(|| name.to_string());

    Rendered {
        icon: Icon::Agent,
        status,
        content,
        expanded: (!sub_lines.is_empty()).then(|| sub_lines.join("\n")),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Research plan
// ─────────────────────────────────────────────────────────────────────────────

pub fn plan() -> RendererEntry {
    RendererEntry {
        name: "plan",
        matches: |g| g.contains_tag("plan_start") || g.contains_tag("plan_delta"),
        render: |group, _ctx| {
            // Latest delta carries the full step list
            let steps = group
                .packets
                .iter()
                .rev()
                .find_map(|p| match &p.obj {
                    PacketPayload::PlanDelta { steps } => Some(steps.as_slice()),
                    _ => None,
                })
                .unwrap_or(&[]);

            let done = steps.iter().filter(|s| s.done).count();
            let status = if steps.is_empty() {
                "Planning...".to_string()
            } else {
                format!("Plan: {}/{} steps done", done, steps.len())
            };
            let content = steps
                .iter()
                .map(|s| {
                    format!("[{}] {}", if s.done { "x" } else { " " }, s.description)
                })
                .collect::<Vec<_>>()
                .join("\n");

            Rendered {
                icon: Icon::Plan,
                status,
                content,
                expanded: None,
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{CitationInfo, Packet, PlanStep, Placement};
    use std::collections::HashMap;

    fn ctx<'a>(
        documents: &'a HashMap<String, DocumentRef>,
        citations: &'a [CitationInfo],
    ) -> RenderContext<'a> {
        RenderContext {
            documents,
            citations,
            stream_stopped: false,
            animate: false,
        }
    }

    fn group_of(packets: Vec<Packet>) -> GroupedPacket {
        GroupedPacket {
            turn_index: 0,
            tab_index: 0,
            packets,
        }
    }

    #[test]
    fn search_status_counts_documents_when_complete() {
        let group = group_of(vec![
            Packet::placed(
                0,
                Placement::new(0, 0),
                PacketPayload::SearchStart {
                    queries: vec!["rust async".to_string()],
                },
            ),
            Packet::new(
                0,
                PacketPayload::SearchDelta {
                    queries: vec![],
                    documents: vec![DocumentRef::new("d1"), DocumentRef::new("d2")],
                },
            ),
            Packet::new(0, PacketPayload::SectionEnd {}),
        ]);

        let docs = HashMap::new();
        let rendered = (search().render)(&group, &ctx(&docs, &[]));
        assert_eq!(rendered.status, "Searched 2 sources");
        assert!(rendered.content.contains("rust async"));
        assert!(rendered.expanded.unwrap().contains("d1"));
    }

    #[test]
    fn search_in_flight_status() {
        let group = group_of(vec![Packet::placed(
            0,
            Placement::new(0, 0),
            PacketPayload::SearchStart { queries: vec![] },
        )]);
        let docs = HashMap::new();
        let rendered = (search().render)(&group, &ctx(&docs, &[]));
        assert_eq!(rendered.status, "Searching...");
    }

    #[test]
    fn code_failure_status_carries_exit_code() {
        let group = group_of(vec![
            Packet::placed(0, Placement::new(0, 0), PacketPayload::CodeStart {}),
            Packet::new(
                0,
                PacketPayload::CodeDelta {
                    code: "exit(2)".to_string(),
                },
            ),
            Packet::new(
                0,
                PacketPayload::CodeResult {
                    output: "boom".to_string(),
                    exit_code: Some(2),
                },
            ),
        ]);

        let docs = HashMap::new();
        let rendered = (code().render)(&group, &ctx(&docs, &[]));
        assert_eq!(rendered.status, "Code failed (exit 2)");
        assert_eq!(rendered.content, "exit(2)");
        assert_eq!(rendered.expanded.as_deref(), Some("boom"));
    }

    #[test]
    fn message_expanded_resolves_citations_against_documents() {
        let group = group_of(vec![Packet::placed(
            0,
            Placement::new(0, 0),
            PacketPayload::MessageStart {
                content: "Answer".to_string(),
                final_documents: None,
            },
        )]);

        let mut documents = HashMap::new();
        documents.insert(
            "d1".to_string(),
            DocumentRef::new("d1").with_title("The Paper"),
        );
        let citations = vec![CitationInfo {
            document_id: "d1".to_string(),
            citation_num: Some(1),
        }];

        let rendered = (message().render)(&group, &ctx(&documents, &citations));
        assert_eq!(rendered.expanded.as_deref(), Some("[1] The Paper"));
    }

    #[test]
    fn plan_progress_from_latest_delta() {
        let step = |desc: &str, done: bool| PlanStep {
            description: desc.to_string(),
            done,
        };
        let group = group_of(vec![
            Packet::placed(0, Placement::new(0, 0), PacketPayload::PlanStart {}),
            Packet::new(
                0,
                PacketPayload::PlanDelta {
                    steps: vec![step("gather", false), step("write", false)],
                },
            ),
            Packet::new(
                0,
                PacketPayload::PlanDelta {
                    steps: vec![step("gather", true), step("write", false)],
                },
            ),
        ]);

        let docs = HashMap::new();
        let rendered = (plan().render)(&group, &ctx(&docs, &[]));
        assert_eq!(rendered.status, "Plan: 1/2 steps done");
        assert!(rendered.content.contains("[x] gather"));
        assert!(rendered.content.contains("[ ] write"));
    }

    #[test]
    fn agent_expanded_lists_sub_turn_steps() {
        let group = group_of(vec![
            Packet::placed(
                0,
                Placement::new(0, 0),
                PacketPayload::AgentStart {
                    agent_name: "researcher".to_string(),
                    task: Some("find sources".to_string()),
                },
            ),
            Packet::placed(
                1,
                Placement::new(0, 0).with_sub_turn(0),
                PacketPayload::SearchStart { queries: vec![] },
            ),
            Packet::placed(
                2,
                Placement::new(0, 0).with_sub_turn(1),
                PacketPayload::CodeStart {},
            ),
        ]);

        let docs = HashMap::new();
        let rendered = (agent().render)(&group, &ctx(&docs, &[]));
        assert_eq!(rendered.content, "find sources");
        let expanded = rendered.expanded.unwrap();
        assert!(expanded.contains("step 0: search_start"));
        assert!(expanded.contains("step 1: code_start"));
    }
}
