//! Deterministic ranking of assembled trial match records.
//!
//! Ranking is relative within one patient's match set: per sample, every
//! (sample, protocol) group gets one dense rank derived from a five-position
//! priority vector, and that rank is broadcast to all records of the group
//! (one trial segment match can produce many explanation rows).

use std::collections::HashMap;

use indexmap::IndexMap;
use itertools::Itertools;

use crate::matches::schema::{
    AccrualStatus, CancerTypeMatch, MatchType, TrialMatchRecord, VitalStatus, CATEGORY_CNV,
};

/// Priority vector positions 1 to 4; lower wins, ties move to the next
/// position, and the final tie break is the descending protocol number.
type PriorityTuple = [u8; 4];

/// Tier/category priority (position 1).
fn tier_priority(record: &TrialMatchRecord) -> u8 {
    if record.mmr_status.is_some() {
        0
    } else if record.tier == Some(1) {
        1
    } else if record.tier == Some(2) {
        2
    } else if record.variant_category.as_deref() == Some(CATEGORY_CNV) {
        3
    } else if record.tier == Some(3) {
        4
    } else if record.tier == Some(4) {
        5
    } else if record.wildtype == Some(true) {
        6
    } else {
        7
    }
}

/// Match type priority (position 2).
fn match_type_priority(record: &TrialMatchRecord) -> u8 {
    match record.match_type {
        Some(MatchType::Variant) => 0,
        Some(MatchType::Gene) => 1,
        None => 2,
    }
}

/// Cancer type priority (position 3).
///
/// All-solid and all-liquid share one value and are not distinguished for
/// ranking; the classification is total over the enum, so there is no
/// fallback bucket to fall into.
fn cancer_type_priority(record: &TrialMatchRecord) -> u8 {
    match record.cancer_type_match {
        CancerTypeMatch::Specific => 0,
        CancerTypeMatch::AllSolid | CancerTypeMatch::AllLiquid => 1,
    }
}

/// Coordinating center priority (position 4).
fn center_priority(record: &TrialMatchRecord, preferred_center: &str) -> u8 {
    if record.coordinating_center == preferred_center {
        0
    } else {
        1
    }
}

fn priority_tuple(record: &TrialMatchRecord, preferred_center: &str) -> PriorityTuple {
    [
        tier_priority(record),
        match_type_priority(record),
        cancer_type_priority(record),
        center_priority(record, preferred_center),
    ]
}

/// Whether a record participates in priority computation: patient alive,
/// segment open, and the alteration is not itself a structural variation
/// description.
fn is_showable(record: &TrialMatchRecord) -> bool {
    record.vital_status == VitalStatus::Alive
        && record.trial_accrual_status == AccrualStatus::Open
        && !record.genomic_alteration.contains("Structural Variation")
}

/// Numeric leading component of a protocol number, e.g. `17` for `17-251`.
fn protocol_number(protocol_no: &str) -> i64 {
    let digits: String = protocol_no
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(0)
}

/// Assign `sort_order` to all records of a completed run.
///
/// Given identical input data the assignment is bit-identical across runs,
/// independent of the input ordering.
pub fn assign_sort_order(records: &mut [TrialMatchRecord], preferred_center: &str) {
    // Samples are ranked independently of each other, so the group
    // iteration order does not matter.
    let by_sample: HashMap<String, Vec<usize>> = records
        .iter()
        .enumerate()
        .map(|(idx, record)| (record.sample_id.clone(), idx))
        .into_group_map();

    for indices in by_sample.values() {
        rank_sample(records, indices, preferred_center);
    }
}

/// Rank one sample's records.
fn rank_sample(records: &mut [TrialMatchRecord], indices: &[usize], preferred_center: &str) {
    // Best (lowest) tuple per protocol among showable records.
    let mut best: IndexMap<String, PriorityTuple> = IndexMap::new();
    for &idx in indices {
        let record = &records[idx];
        if !is_showable(record) {
            continue;
        }
        let tuple = priority_tuple(record, preferred_center);
        best.entry(record.protocol_no.clone())
            .and_modify(|existing| {
                if tuple < *existing {
                    *existing = tuple;
                }
            })
            .or_insert(tuple);
    }

    // Order protocols by tuple, breaking remaining ties by descending
    // protocol number (higher protocol numbers are more recent and rank
    // first); the protocol string itself is the last resort so the order
    // is total and reproducible.
    let mut protocols: Vec<(String, PriorityTuple)> = best.into_iter().collect();
    protocols.sort_by(|(proto_a, tuple_a), (proto_b, tuple_b)| {
        tuple_a
            .cmp(tuple_b)
            .then_with(|| protocol_number(proto_b).cmp(&protocol_number(proto_a)))
            .then_with(|| proto_b.cmp(proto_a))
    });
    let rank_by_protocol: IndexMap<String, i32> = protocols
        .into_iter()
        .enumerate()
        .map(|(rank, (protocol_no, _))| (protocol_no, rank as i32))
        .collect();

    // Broadcast the group rank; records failing the composite condition are
    // excluded from display with the sentinel.
    for &idx in indices {
        let record = &mut records[idx];
        record.sort_order = if is_showable(record) {
            rank_by_protocol
                .get(&record.protocol_no)
                .copied()
                .unwrap_or(-1)
        } else {
            -1
        };
    }
}
