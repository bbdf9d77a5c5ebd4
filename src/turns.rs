//! Turn/tab grouping
//!
//! Pure transforms from the processor's group map to display order: turns
//! ascending, tabs ascending within a turn, parallel turns flagged. Holds no
//! state of its own - recomputed whenever the group map changes.

use std::collections::BTreeMap;

use crate::packet::Packet;
use crate::processor::{GroupedPacket, ProcessorState};

/// One logical step of the agent's plan, with its parallel branches
#[derive(Debug, Clone, PartialEq)]
pub struct TurnGroup {
    pub turn_index: u32,
    pub steps: Vec<GroupedPacket>,
    /// True iff more than one distinct tab exists for this turn
    pub is_parallel: bool,
}

/// Partition the processor's groups into ordered `TurnGroup`s.
///
/// Sub-turn packets never get promoted to their own turn: they ride along
/// inside the parent group and are sub-partitioned by that group's renderer.
pub fn group_into_turns(state: &ProcessorState) -> Vec<TurnGroup> {
    let mut buckets: BTreeMap<u32, Vec<GroupedPacket>> = BTreeMap::new();
    for group in state.groups() {
        buckets
            .entry(group.turn_index)
            .or_default()
            .push(group.clone());
    }

    buckets
        .into_iter()
        .map(|(turn_index, mut steps)| {
            steps.sort_by_key(|g| g.tab_index);
            let is_parallel = steps.len() > 1;
            TurnGroup {
                turn_index,
                steps,
                is_parallel,
            }
        })
        .collect()
}

/// Split a parent group's packets by nested sub-turn, insertion-ordered.
/// The `None` bucket holds the parent's own packets.
pub fn sub_turn_partition(group: &GroupedPacket) -> Vec<(Option<u32>, Vec<&Packet>)> {
    let mut order: Vec<Option<u32>> = Vec::new();
    let mut buckets: Vec<Vec<&Packet>> = Vec::new();

    for packet in &group.packets {
        let sub = packet.placement.and_then(|p| p.sub_turn_index);
        match order.iter().position(|&s| s == sub) {
            Some(i) => buckets[i].push(packet),
            None => {
                order.push(sub);
                buckets.push(vec![packet]);
            }
        }
    }

    order.into_iter().zip(buckets).collect()
}
