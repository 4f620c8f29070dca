//! Primary reconciliation of the annotation feed against the registry.
//!
//! The registry is matched by stable id first and by symbol second. Every
//! decision is made against the snapshot; the resulting plan is applied
//! afterwards by the engine.

use crate::annotation::Extraction;
use crate::registry::RegistrySnapshot;
use crate::report::AuditNote;
use locus_protocol::{GeneRecord, Operation, RegistryEntry, StableId};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;

static PLACEHOLDER_SYMBOL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Z]+[0-9]+\.[0-9]+").expect("placeholder symbol pattern is a valid regex")
});

/// Clone-based accession names such as `AC012345.1`, used by the annotation
/// feed where no curated symbol exists yet.
pub fn looks_like_placeholder(symbol: &str) -> bool {
    PLACEHOLDER_SYMBOL.is_match(symbol)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryPlan {
    pub operations: Vec<Operation>,
    /// Stable ids replaced by a rename; their loci live on under the new id.
    pub retired: BTreeSet<StableId>,
    pub notes: Vec<AuditNote>,
}

pub fn reconcile_primary(snapshot: &RegistrySnapshot, extraction: &Extraction) -> PrimaryPlan {
    let mut plan = PrimaryPlan::default();
    for gene in extraction.genes.values() {
        match snapshot.entry(&gene.stable_id) {
            Some(entry) => reconcile_known(snapshot, entry, gene, &mut plan),
            None => reconcile_new(snapshot, extraction, gene, &mut plan),
        }
    }
    plan
}

fn reconcile_new(
    snapshot: &RegistrySnapshot,
    extraction: &Extraction,
    gene: &GeneRecord,
    plan: &mut PrimaryPlan,
) {
    let Some(previous) = snapshot.entry_for_symbol(&gene.symbol) else {
        plan.operations.push(Operation::Create {
            record: gene.clone(),
        });
        return;
    };
    if extraction.contains(&previous.stable_id) {
        plan.notes.push(AuditNote::warning(format!(
            "{} ({}) matches symbol of {} which is still annotated; not renamed",
            gene.stable_id, gene.symbol, previous.stable_id
        )));
        return;
    }
    plan.operations.push(Operation::RenameIdentifier {
        locus_id: previous.locus_id,
        symbol: gene.symbol.clone(),
        previous_stable_id: previous.stable_id.clone(),
        new_stable_id: gene.stable_id.clone(),
    });
    plan.retired.insert(previous.stable_id.clone());
    push_coordinate_update(previous, gene, plan);
}

fn reconcile_known(
    snapshot: &RegistrySnapshot,
    entry: &RegistryEntry,
    gene: &GeneRecord,
    plan: &mut PrimaryPlan,
) {
    if entry.symbol != gene.symbol {
        let placeholder =
            looks_like_placeholder(&gene.symbol) && !looks_like_placeholder(&entry.symbol);
        let taken_by = snapshot
            .entry_for_symbol(&gene.symbol)
            .filter(|other| other.locus_id != entry.locus_id);
        if let Some(other) = taken_by {
            plan.notes.push(AuditNote::warning(format!(
                "{}: symbol {} already used by {}; kept {}",
                entry.stable_id, gene.symbol, other.stable_id, entry.symbol
            )));
        }
        if placeholder || taken_by.is_some() {
            if !entry.synonyms.contains(&gene.symbol) {
                plan.operations.push(Operation::AddSynonym {
                    locus_id: entry.locus_id,
                    symbol: gene.symbol.clone(),
                });
            }
        } else {
            plan.operations.push(Operation::UpdateSymbol {
                locus_id: entry.locus_id,
                previous_symbol: entry.symbol.clone(),
                new_symbol: gene.symbol.clone(),
                demote_old_as_synonym: !entry.synonyms.contains(&entry.symbol),
            });
        }
    }
    push_coordinate_update(entry, gene, plan);
}

fn push_coordinate_update(entry: &RegistryEntry, gene: &GeneRecord, plan: &mut PrimaryPlan) {
    let previous = entry.coordinates();
    let current = gene.coordinates();
    if previous != current {
        plan.operations.push(Operation::UpdateCoordinates {
            locus_id: entry.locus_id,
            previous,
            current,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_usage_tables;
    use crate::engine::{Phase, SyncEngine};
    use crate::registry::{MemoryRegistry, RegistryStore};
    use crate::report::Reports;
    use locus_protocol::{OperationKind, Strand};
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn gene(stable_id: &str, symbol: &str) -> GeneRecord {
        GeneRecord {
            stable_id: stable_id.to_string(),
            symbol: symbol.to_string(),
            sequence_name: "1".to_string(),
            start: 100,
            end: 200,
            strand: Strand::Forward,
        }
    }

    fn entry(locus_id: i64, stable_id: &str, symbol: &str) -> RegistryEntry {
        RegistryEntry {
            locus_id,
            stable_id: stable_id.to_string(),
            symbol: symbol.to_string(),
            sequence_name: "1".to_string(),
            start: 100,
            end: 200,
            strand: Strand::Forward,
            synonyms: BTreeSet::new(),
        }
    }

    fn snapshot(entries: Vec<RegistryEntry>) -> RegistrySnapshot {
        let mut out = RegistrySnapshot::default();
        for entry in entries {
            out.by_symbol
                .insert(entry.symbol.clone(), entry.stable_id.clone());
            out.by_stable_id.insert(entry.stable_id.clone(), entry);
        }
        out
    }

    fn extraction(genes: Vec<GeneRecord>) -> Extraction {
        Extraction {
            genes: genes
                .into_iter()
                .map(|g| (g.stable_id.clone(), g))
                .collect::<BTreeMap<_, _>>(),
            ..Extraction::default()
        }
    }

    #[test]
    fn test_placeholder_pattern() {
        assert!(looks_like_placeholder("AC012345.1"));
        assert!(looks_like_placeholder("AL627309.15"));
        assert!(!looks_like_placeholder("REALGENE"));
        assert!(!looks_like_placeholder("C1orf112"));
        assert!(!looks_like_placeholder("ac012345.1"));
    }

    #[test]
    fn test_new_gene_is_created() {
        let plan = reconcile_primary(
            &RegistrySnapshot::default(),
            &extraction(vec![gene("ENSG001", "FOO")]),
        );
        assert_eq!(
            plan.operations,
            vec![Operation::Create {
                record: gene("ENSG001", "FOO")
            }]
        );
        assert!(plan.retired.is_empty());
    }

    #[test]
    fn test_symbol_match_renames_identifier() {
        let plan = reconcile_primary(
            &snapshot(vec![entry(5, "ENSG001", "FOO")]),
            &extraction(vec![gene("ENSG002", "FOO")]),
        );
        assert_eq!(
            plan.operations,
            vec![Operation::RenameIdentifier {
                locus_id: 5,
                symbol: "FOO".to_string(),
                previous_stable_id: "ENSG001".to_string(),
                new_stable_id: "ENSG002".to_string(),
            }]
        );
        assert!(plan.retired.contains("ENSG001"));
    }

    #[test]
    fn test_rename_to_annotated_identifier_is_ambiguous() {
        let plan = reconcile_primary(
            &snapshot(vec![entry(5, "ENSG001", "FOO")]),
            &extraction(vec![gene("ENSG001", "BAR"), gene("ENSG002", "FOO")]),
        );
        assert!(plan.retired.is_empty());
        assert!(
            plan.operations
                .iter()
                .all(|op| op.kind() != OperationKind::RenameIdentifier)
        );
        assert_eq!(plan.notes.len(), 1);
        assert!(plan.notes[0].message.contains("ENSG002"));
    }

    #[test]
    fn test_curated_symbol_replaces_placeholder() {
        let plan = reconcile_primary(
            &snapshot(vec![entry(7, "ENSG003", "AC012345.1")]),
            &extraction(vec![gene("ENSG003", "REALGENE")]),
        );
        assert_eq!(
            plan.operations,
            vec![Operation::UpdateSymbol {
                locus_id: 7,
                previous_symbol: "AC012345.1".to_string(),
                new_symbol: "REALGENE".to_string(),
                demote_old_as_synonym: true,
            }]
        );
    }

    #[test]
    fn test_placeholder_never_replaces_curated_symbol() {
        let plan = reconcile_primary(
            &snapshot(vec![entry(7, "ENSG003", "REALGENE")]),
            &extraction(vec![gene("ENSG003", "AC012345.1")]),
        );
        assert_eq!(
            plan.operations,
            vec![Operation::AddSynonym {
                locus_id: 7,
                symbol: "AC012345.1".to_string(),
            }]
        );
    }

    #[test]
    fn test_symbol_owned_elsewhere_becomes_synonym() {
        let plan = reconcile_primary(
            &snapshot(vec![entry(1, "ENSG001", "FOO"), entry(2, "ENSG002", "BAR")]),
            &extraction(vec![gene("ENSG002", "FOO")]),
        );
        assert_eq!(
            plan.operations,
            vec![Operation::AddSynonym {
                locus_id: 2,
                symbol: "FOO".to_string(),
            }]
        );
        assert_eq!(plan.notes.len(), 1);
    }

    #[test]
    fn test_demotion_skipped_when_old_symbol_already_synonym() {
        let mut existing = entry(9, "ENSG009", "OLD");
        existing.synonyms.insert("OLD".to_string());
        let plan = reconcile_primary(
            &snapshot(vec![existing]),
            &extraction(vec![gene("ENSG009", "NEW")]),
        );
        assert_eq!(
            plan.operations,
            vec![Operation::UpdateSymbol {
                locus_id: 9,
                previous_symbol: "OLD".to_string(),
                new_symbol: "NEW".to_string(),
                demote_old_as_synonym: false,
            }]
        );
    }

    #[test]
    fn test_coordinate_change_is_independent_of_symbol() {
        let mut moved = gene("ENSG010", "MOV");
        moved.start = 150;
        moved.end = 260;
        let plan = reconcile_primary(
            &snapshot(vec![entry(10, "ENSG010", "MOV")]),
            &extraction(vec![moved]),
        );
        assert_eq!(plan.operations.len(), 1);
        assert_eq!(plan.operations[0].kind(), OperationKind::UpdateCoordinates);
    }

    #[test]
    fn test_converged_registry_yields_empty_plan() {
        let mut curated = entry(7, "ENSG003", "REALGENE");
        curated.synonyms.insert("AC012345.1".to_string());
        let registry = snapshot(vec![entry(1, "ENSG001", "FOO"), curated]);
        let feed = extraction(vec![gene("ENSG001", "FOO"), gene("ENSG003", "AC012345.1")]);
        let plan = reconcile_primary(&registry, &feed);
        assert!(plan.operations.is_empty());
        assert!(plan.notes.is_empty());
    }

    fn record(stable_id: &str, symbol: &str, start: u64) -> GeneRecord {
        GeneRecord {
            start,
            end: start + 100,
            ..gene(stable_id, symbol)
        }
    }

    proptest! {
        #[test]
        fn prop_applied_plan_converges(
            loci in proptest::collection::vec(
                (any::<bool>(), any::<bool>(), 0u8..6, any::<bool>()),
                1..12,
            ),
            new_genes in 0usize..4,
        ) {
            let mut store = MemoryRegistry::with_sequences(["1"]);
            let mut genes = vec![];
            for (i, (placeholder, own_synonym, fate, moved)) in loci.iter().enumerate() {
                let symbol = if *placeholder {
                    format!("AC{i:04}.1")
                } else {
                    format!("S{i}")
                };
                let stable_id = format!("ENSG{i:05}");
                let locus = store.create_locus(&record(&stable_id, &symbol, 100)).unwrap();
                if *own_synonym {
                    store.add_synonym(locus, &symbol).unwrap();
                }
                let start = if *moved { 150 } else { 100 };
                match fate {
                    // dropped from the feed
                    0 => {}
                    1 => genes.push(record(&stable_id, &symbol, start)),
                    2 => genes.push(record(&stable_id, &format!("N{i}"), start)),
                    3 => genes.push(record(&stable_id, &format!("AL{i:04}.2"), start)),
                    4 => genes.push(record(&format!("ENSG1{i:05}"), &symbol, start)),
                    _ => {
                        // symbol held by a locus that left the feed
                        store
                            .create_locus(&record(&format!("ENSG2{i:05}"), &format!("K{i}"), 100))
                            .unwrap();
                        genes.push(record(&stable_id, &format!("K{i}"), start));
                    }
                }
            }
            for n in 0..new_genes {
                genes.push(record(&format!("ENSG3{n:05}"), &format!("F{n}"), 100));
            }
            let feed = extraction(genes);
            let tables = default_usage_tables();

            let first = reconcile_primary(&store.snapshot(&tables).unwrap(), &feed);
            let td = tempdir().unwrap();
            let mut engine = SyncEngine::new(&mut store, Reports::new(td.path()).unwrap(), "run-prop");
            engine.apply_plan(&first.operations, Phase::Primary).unwrap();
            prop_assert_eq!(engine.failed_count(), 0);
            engine.finish().unwrap();

            let second = reconcile_primary(&store.snapshot(&tables).unwrap(), &feed);
            prop_assert!(second.operations.is_empty(), "{:?}", second.operations);
            prop_assert!(second.retired.is_empty());
        }
    }
}
