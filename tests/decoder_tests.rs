//! Integration tests for the decode -> fold -> group pipeline
//!
//! Exercises the public library surface end to end, from raw NDJSON lines to
//! turn groups, the way the CLI and the session do.

use rivulet::{
    decode_line, group_into_turns, GroupKey, Packet, PacketPayload, Placement, ProcessorState,
    RenderContext, StopReason, WireFrame,
};

fn fold_lines(lines: &[&str]) -> ProcessorState {
    let mut state = ProcessorState::new("test-node");
    let mut packets: Vec<Packet> = Vec::new();
    for line in lines {
        match decode_line(line) {
            Ok(Some(WireFrame::Packet(p))) => packets.push(p),
            Ok(Some(WireFrame::Ack(_))) | Ok(None) => {}
            Err(e) => state.record_decode_failure(*line, e.to_string()),
        }
    }
    state.fold(&packets);
    state
}

#[test]
fn end_to_end_search_then_answer() {
    let lines = [
        r#"{"ind":0,"placement":{"turn_index":0,"tab_index":0},"obj":{"type":"search_start"}}"#,
        r#"{"ind":0,"obj":{"type":"search_delta","documents":[{"document_id":"d1"}]}}"#,
        r#"{"ind":0,"obj":{"type":"section_end"}}"#,
        r#"{"ind":1,"placement":{"turn_index":1,"tab_index":0},"obj":{"type":"message_start","content":"Hello"}}"#,
        r#"{"ind":1,"obj":{"type":"message_delta","content":" world"}}"#,
        r#"{"ind":1,"obj":{"type":"stop"}}"#,
    ];

    let state = fold_lines(&lines);
    let turns = group_into_turns(&state);

    assert_eq!(turns.len(), 2);

    assert_eq!(turns[0].turn_index, 0);
    assert!(!turns[0].is_parallel);
    assert!(turns[0].steps[0].contains_tag("search_start"));
    assert!(turns[0].steps[0].is_complete());

    assert_eq!(turns[1].turn_index, 1);
    assert_eq!(turns[1].steps[0].message_text(), "Hello world");

    assert!(state.documents().contains_key("d1"));
    assert!(state.stream_stopped());
    assert!(!state.cancelled());
    assert!(state.decode_failures().is_empty());
}

#[test]
fn end_to_end_scenario_renders_through_the_registry() {
    let lines = [
        r#"{"ind":0,"placement":{"turn_index":0,"tab_index":0},"obj":{"type":"search_start","queries":["streams"]}}"#,
        r#"{"ind":0,"obj":{"type":"search_delta","documents":[{"document_id":"d1","title":"Streams"}]}}"#,
        r#"{"ind":0,"obj":{"type":"section_end"}}"#,
        r#"{"ind":1,"placement":{"turn_index":1,"tab_index":0},"obj":{"type":"message_start","content":"Hello"}}"#,
        r#"{"ind":1,"obj":{"type":"message_delta","content":" world"}}"#,
        r#"{"ind":1,"obj":{"type":"stop","stop_reason":"finished"}}"#,
    ];

    let state = fold_lines(&lines);
    let registry = rivulet::default_registry();
    let ctx = RenderContext::from_state(&state, false);

    let search = registry.render(&state.groups()[0], &ctx).unwrap();
    assert_eq!(search.status, "Searched 1 sources");

    let message = registry.render(&state.groups()[1], &ctx).unwrap();
    assert_eq!(message.content, "Hello world");
    assert_eq!(state.stop_reason(), Some(&StopReason::Finished));
}

#[test]
fn parallel_turn_with_interleaved_tabs() {
    let lines = [
        r#"{"ind":0,"placement":{"turn_index":0,"tab_index":1},"obj":{"type":"fetch_start","urls":["https://a"]}}"#,
        r#"{"ind":1,"placement":{"turn_index":0,"tab_index":0},"obj":{"type":"search_start"}}"#,
        r#"{"ind":1,"obj":{"type":"search_delta","documents":[{"document_id":"s1"}]}}"#,
        r#"{"ind":0,"obj":{"type":"fetch_delta","documents":[{"document_id":"f1"}]}}"#,
        r#"{"ind":1,"obj":{"type":"section_end"}}"#,
        r#"{"ind":0,"obj":{"type":"section_end"}}"#,
    ];

    let state = fold_lines(&lines);
    let turns = group_into_turns(&state);

    assert_eq!(turns.len(), 1);
    assert!(turns[0].is_parallel);
    // Sorted by tab regardless of arrival order
    assert_eq!(turns[0].steps[0].tab_index, 0);
    assert_eq!(turns[0].steps[1].tab_index, 1);
    assert!(turns[0].steps.iter().all(|s| s.is_complete()));
    assert_eq!(state.documents().len(), 2);
}

#[test]
fn every_packet_lands_in_exactly_one_group() {
    let lines = [
        r#"{"ind":0,"placement":{"turn_index":0,"tab_index":0},"obj":{"type":"agent_start","agent_name":"researcher"}}"#,
        r#"{"ind":1,"placement":{"turn_index":0,"tab_index":0,"sub_turn_index":0},"obj":{"type":"search_start"}}"#,
        r#"{"ind":2,"placement":{"turn_index":1,"tab_index":0},"obj":{"type":"code_start"}}"#,
        r#"{"ind":2,"obj":{"type":"code_result","output":"ok","exit_code":0}}"#,
    ];

    let state = fold_lines(&lines);
    let total: usize = state.groups().iter().map(|g| g.packets.len()).sum();
    assert_eq!(total, 4);

    // The sub-turn search stays in the agent's group
    let agent = state.group(GroupKey::new(0, 0)).unwrap();
    assert_eq!(agent.packets.len(), 2);
}

#[test]
fn malformed_lines_do_not_poison_the_fold() {
    let lines = [
        r#"{"ind":0,"placement":{"turn_index":0,"tab_index":0},"obj":{"type":"search_start"}}"#,
        r#"not json at all"#,
        r#"{"ind":0,"obj":{"type":"some_future_packet_kind"}}"#,
        r#"{"ind":0,"obj":{"type":"section_end"}}"#,
    ];

    let state = fold_lines(&lines);
    assert_eq!(state.decode_failures().len(), 2);
    assert!(state.group_complete(GroupKey::new(0, 0)));
}

#[test]
fn terminal_marker_with_unknown_ind_is_a_no_op() {
    let lines = [
        r#"{"ind":0,"placement":{"turn_index":0,"tab_index":0},"obj":{"type":"search_start"}}"#,
        r#"{"ind":42,"obj":{"type":"section_end"}}"#,
    ];

    let state = fold_lines(&lines);
    assert_eq!(state.groups().len(), 1);
    assert!(!state.group_complete(GroupKey::new(0, 0)));
    assert!(state.decode_failures().is_empty());
}

#[test]
fn refolding_a_longer_array_matches_one_shot() {
    let packets: Vec<Packet> = vec![
        Packet::placed(
            0,
            Placement::new(0, 0),
            PacketPayload::SearchStart {
                queries: vec!["q".to_string()],
            },
        ),
        Packet::new(0, PacketPayload::SectionEnd {}),
        Packet::placed(
            1,
            Placement::new(1, 0),
            PacketPayload::MessageStart {
                content: "Hi".to_string(),
                final_documents: None,
            },
        ),
        Packet::new(
            1,
            PacketPayload::Stop {
                stop_reason: Some(StopReason::Finished),
            },
        ),
    ];

    let mut incremental = ProcessorState::new("n");
    for cut in 1..=packets.len() {
        incremental.fold(&packets[..cut]);
    }

    let mut one_shot = ProcessorState::new("n");
    one_shot.fold(&packets);

    assert_eq!(incremental.groups(), one_shot.groups());
    assert_eq!(incremental.stream_stopped(), one_shot.stream_stopped());
    assert_eq!(
        incremental.last_processed_index(),
        one_shot.last_processed_index()
    );
}
