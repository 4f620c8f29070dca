//! Removal of loci that disappeared from the annotation feed.

use crate::annotation::Extraction;
use crate::registry::RegistrySnapshot;
use crate::report::AuditNote;
use locus_protocol::{Operation, StableId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrunePlan {
    pub operations: Vec<Operation>,
    pub notes: Vec<AuditNote>,
}

/// Plans a `Delete` for every registry entry missing from `extraction` that
/// no usage table references. Referenced entries are reported and kept.
pub fn plan_pruning(
    snapshot: &RegistrySnapshot,
    extraction: &Extraction,
    retired: &BTreeSet<StableId>,
) -> PrunePlan {
    let mut plan = PrunePlan::default();
    let outdated = snapshot
        .by_stable_id
        .values()
        .filter(|entry| !extraction.contains(&entry.stable_id))
        .filter(|entry| !retired.contains(&entry.stable_id));
    for entry in outdated {
        if snapshot.unreferenced_locus(&entry.stable_id).is_some() {
            plan.operations.push(Operation::Delete {
                locus_id: entry.locus_id,
                stable_id: entry.stable_id.clone(),
                symbol: entry.symbol.clone(),
            });
        } else {
            plan.notes.push(AuditNote::warning(format!(
                "outdated locus still referenced: {} {} (locus {})",
                entry.stable_id, entry.symbol, entry.locus_id
            )));
        }
    }
    plan
}
