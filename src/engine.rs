//! Applies planned operations to a registry store and audits each one.
//!
//! Operations are applied one at a time. A failure that only concerns the
//! operation itself (unknown sequence, missing locus) is written to the
//! report as `ERROR:` and the batch carries on; any other failure stops the
//! run, leaving earlier operations applied.

use crate::error::SyncResult;
use crate::registry::RegistryStore;
use crate::report::{AuditNote, AuditTag, ReportKind, Reports};
use locus_protocol::{LocusId, Operation, OperationKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

pub type RunId = String;
pub type OpId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    Primary,
    Prune,
    CrossReference,
}

impl Phase {
    pub fn report_for(self, op: &Operation) -> ReportKind {
        match self {
            Phase::Primary => match op.kind() {
                OperationKind::Create | OperationKind::RenameIdentifier => ReportKind::NewGenes,
                _ => ReportKind::GeneUpdates,
            },
            Phase::Prune => ReportKind::OutdatedGenes,
            Phase::CrossReference => ReportKind::HgncUpdates,
        }
    }

    pub fn note_report(self) -> ReportKind {
        match self {
            Phase::Primary => ReportKind::GeneUpdates,
            Phase::Prune => ReportKind::OutdatedGenes,
            Phase::CrossReference => ReportKind::HgncUpdates,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Primary => write!(f, "primary"),
            Phase::Prune => write!(f, "prune"),
            Phase::CrossReference => write!(f, "cross-reference"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpResult {
    pub op_id: OpId,
    pub tag: AuditTag,
    /// Locus touched by the operation; for `Create` the newly assigned id.
    pub locus_id: Option<LocusId>,
    pub messages: Vec<String>,
    pub warnings: Vec<String>,
}

impl OpResult {
    pub fn failed(&self) -> bool {
        self.tag == AuditTag::Error
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub run_id: RunId,
    pub phase: Phase,
    pub op: Operation,
    pub result: OpResult,
}

/// Audit tag and one-line description of an operation.
pub fn describe(op: &Operation) -> (AuditTag, String) {
    match op {
        Operation::Create { record } => (
            AuditTag::Add,
            format!(
                "{} {} {} ({})",
                record.stable_id,
                record.symbol,
                record.coordinates(),
                record.strand
            ),
        ),
        Operation::RenameIdentifier {
            locus_id,
            symbol,
            previous_stable_id,
            new_stable_id,
        } => (
            AuditTag::Update,
            format!("locus {locus_id} {symbol} stable_id {previous_stable_id} -> {new_stable_id}"),
        ),
        Operation::UpdateSymbol {
            locus_id,
            previous_symbol,
            new_symbol,
            demote_old_as_synonym,
        } => {
            let mut text = format!("locus {locus_id} symbol {previous_symbol} -> {new_symbol}");
            if *demote_old_as_synonym {
                text.push_str(&format!("; {previous_symbol} kept as synonym"));
            }
            (AuditTag::Update, text)
        }
        Operation::AddSynonym { locus_id, symbol } => {
            (AuditTag::AddSynonym, format!("locus {locus_id} {symbol}"))
        }
        Operation::UpdateCoordinates {
            locus_id,
            previous,
            current,
        } => (
            AuditTag::UpdateCoord,
            format!("locus {locus_id} {previous} -> {current}"),
        ),
        Operation::UpsertIdentifier {
            locus_id,
            kind,
            value,
            previous,
        } => match previous {
            None => (AuditTag::Add, format!("locus {locus_id} {kind} {value}")),
            Some(previous) => (
                AuditTag::Update,
                format!("locus {locus_id} {kind} {previous} -> {value}"),
            ),
        },
        Operation::Delete {
            locus_id,
            stable_id,
            symbol,
        } => (
            AuditTag::Info,
            format!("deleted {stable_id} {symbol} (locus {locus_id})"),
        ),
    }
}

pub struct SyncEngine<'a, S: RegistryStore> {
    store: &'a mut S,
    reports: Reports,
    run_id: RunId,
    journal: Vec<OperationRecord>,
    op_counter: u64,
}

impl<'a, S: RegistryStore> SyncEngine<'a, S> {
    pub fn new(store: &'a mut S, reports: Reports, run_id: &str) -> Self {
        Self {
            store,
            reports,
            run_id: run_id.to_string(),
            journal: vec![],
            op_counter: 0,
        }
    }

    pub fn store(&self) -> &S {
        &*self.store
    }

    pub fn reports_mut(&mut self) -> &mut Reports {
        &mut self.reports
    }

    pub fn operation_log(&self) -> &[OperationRecord] {
        &self.journal
    }

    fn next_op_id(&mut self) -> OpId {
        self.op_counter += 1;
        format!("op-{}", self.op_counter)
    }

    fn execute(&mut self, op: &Operation) -> SyncResult<Option<LocusId>> {
        match op {
            Operation::Create { record } => return self.store.create_locus(record).map(Some),
            Operation::RenameIdentifier {
                locus_id,
                new_stable_id,
                ..
            } => self.store.rename_identifier(*locus_id, new_stable_id)?,
            Operation::UpdateSymbol {
                locus_id,
                previous_symbol,
                new_symbol,
                demote_old_as_synonym,
            } => self.store.update_symbol(
                *locus_id,
                new_symbol,
                demote_old_as_synonym.then_some(previous_symbol.as_str()),
            )?,
            Operation::AddSynonym { locus_id, symbol } => {
                self.store.add_synonym(*locus_id, symbol)?
            }
            Operation::UpdateCoordinates {
                locus_id, current, ..
            } => self.store.update_coordinates(*locus_id, current)?,
            Operation::UpsertIdentifier {
                locus_id,
                kind,
                value,
                previous,
            } => self
                .store
                .upsert_identifier(*locus_id, *kind, value, previous.is_some())?,
            Operation::Delete { locus_id, .. } => self.store.delete_locus(*locus_id)?,
        }
        Ok(op.locus_id())
    }

    fn apply_internal(&mut self, op: &Operation, phase: Phase) -> SyncResult<OpResult> {
        let op_id = self.next_op_id();
        let (tag, text) = describe(op);
        let report = phase.report_for(op);
        let mut result = OpResult {
            op_id,
            tag,
            locus_id: op.locus_id(),
            messages: vec![],
            warnings: vec![],
        };
        match self.execute(op) {
            Ok(locus_id) => {
                result.locus_id = locus_id;
                self.reports.write(report, tag, &text)?;
                debug!(op_id = %result.op_id, %phase, "{tag} {text}");
                result.messages.push(text);
            }
            Err(e) if e.is_recoverable() => {
                let line = format!("{text} failed: {}", e.message);
                warn!(op_id = %result.op_id, %phase, "{line}");
                self.reports.write(report, AuditTag::Error, &line)?;
                result.tag = AuditTag::Error;
                result.warnings.push(line);
            }
            Err(e) => return Err(e),
        }
        Ok(result)
    }

    pub fn apply(&mut self, op: Operation, phase: Phase) -> SyncResult<OpResult> {
        let result = self.apply_internal(&op, phase)?;
        self.journal.push(OperationRecord {
            run_id: self.run_id.clone(),
            phase,
            op,
            result: result.clone(),
        });
        Ok(result)
    }

    /// Applies `ops` in order, except that deletions run after everything
    /// else.
    pub fn apply_plan(&mut self, ops: &[Operation], phase: Phase) -> SyncResult<Vec<OpResult>> {
        let (deletes, others): (Vec<&Operation>, Vec<&Operation>) = ops
            .iter()
            .partition(|op| op.kind() == OperationKind::Delete);
        let mut results = Vec::with_capacity(ops.len());
        for op in others.into_iter().chain(deletes) {
            results.push(self.apply(op.clone(), phase)?);
        }
        Ok(results)
    }

    pub fn write_notes(&mut self, notes: &[AuditNote], phase: Phase) -> SyncResult<()> {
        for note in notes {
            self.reports.write_note(phase.note_report(), note)?;
        }
        Ok(())
    }

    pub fn applied_counts(&self) -> BTreeMap<OperationKind, usize> {
        let mut counts = BTreeMap::new();
        for record in self.journal.iter().filter(|r| !r.result.failed()) {
            *counts.entry(record.op.kind()).or_default() += 1;
        }
        counts
    }

    pub fn failed_count(&self) -> usize {
        self.journal.iter().filter(|r| r.result.failed()).count()
    }

    pub fn finish(mut self) -> SyncResult<Vec<OperationRecord>> {
        self.reports.flush()?;
        Ok(self.journal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;
    use locus_protocol::{GeneRecord, IdentifierKind, Strand};
    use std::fs;
    use tempfile::tempdir;

    fn record(stable_id: &str, symbol: &str, sequence_name: &str) -> GeneRecord {
        GeneRecord {
            stable_id: stable_id.to_string(),
            symbol: symbol.to_string(),
            sequence_name: sequence_name.to_string(),
            start: 10,
            end: 20,
            strand: Strand::Forward,
        }
    }

    #[test]
    fn test_unknown_sequence_is_reported_and_run_continues() {
        let td = tempdir().unwrap();
        let mut store = MemoryRegistry::with_sequences(["1"]);
        let mut engine = SyncEngine::new(&mut store, Reports::new(td.path()).unwrap(), "run-1");
        let results = engine
            .apply_plan(
                &[
                    Operation::Create {
                        record: record("ENSG001", "FOO", "KI270728.1"),
                    },
                    Operation::Create {
                        record: record("ENSG002", "BAR", "1"),
                    },
                ],
                Phase::Primary,
            )
            .unwrap();
        assert!(results[0].failed());
        assert_eq!(results[1].locus_id, Some(1));
        assert_eq!(engine.failed_count(), 1);
        assert_eq!(engine.applied_counts()[&OperationKind::Create], 1);
        let journal = engine.finish().unwrap();
        assert_eq!(journal.len(), 2);

        let text = fs::read_to_string(td.path().join("report_new_genes.txt")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("ERROR: ENSG001 FOO"));
        assert!(lines[0].contains("Sequence 'KI270728.1' not found"));
        assert_eq!(lines[1], "ADD: ENSG002 BAR 1:10-20 (+)");
        assert_eq!(store.locus_count(), 1);
    }

    #[test]
    fn test_deletes_are_applied_last() {
        let td = tempdir().unwrap();
        let mut store = MemoryRegistry::with_sequences(["1"]);
        let old = store.create_locus(&record("ENSG009", "OLD", "1")).unwrap();
        let mut engine = SyncEngine::new(&mut store, Reports::new(td.path()).unwrap(), "run-2");
        let ops = vec![
            Operation::Delete {
                locus_id: old,
                stable_id: "ENSG009".to_string(),
                symbol: "OLD".to_string(),
            },
            Operation::UpsertIdentifier {
                locus_id: old,
                kind: IdentifierKind::Hgnc,
                value: "HGNC:9".to_string(),
                previous: None,
            },
        ];
        let results = engine.apply_plan(&ops, Phase::Prune).unwrap();
        assert!(results.iter().all(|r| !r.failed()));
        let kinds: Vec<OperationKind> = engine
            .operation_log()
            .iter()
            .map(|r| r.op.kind())
            .collect();
        assert_eq!(
            kinds,
            vec![OperationKind::UpsertIdentifier, OperationKind::Delete]
        );
        engine.finish().unwrap();
        assert_eq!(store.locus_count(), 0);
    }

    #[test]
    fn test_describe_symbol_update() {
        let (tag, text) = describe(&Operation::UpdateSymbol {
            locus_id: 3,
            previous_symbol: "AC012345.1".to_string(),
            new_symbol: "REALGENE".to_string(),
            demote_old_as_synonym: true,
        });
        assert_eq!(tag, AuditTag::Update);
        assert_eq!(
            text,
            "locus 3 symbol AC012345.1 -> REALGENE; AC012345.1 kept as synonym"
        );
    }
}
