//! Cross-reference reconciliation against the HGNC complete set.
//!
//! Runs after the primary plan has been applied and only ever touches
//! identifiers, symbols and synonyms of loci that already exist.

use crate::error::{ErrorCode, SyncError, SyncResult};
use crate::registry::{XrefEntry, XrefSnapshot};
use crate::report::AuditNote;
use csv::{ReaderBuilder, StringRecord};
use itertools::Itertools;
use locus_protocol::{IdentifierKind, Operation, StableId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Read;
use tracing::{debug, warn};

const HEADER_FIRST_COLUMN: &str = "hgnc_id";
const HGNC_PREFIX: &str = "HGNC:";

/// One row of the authority feed with a stable id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityRecord {
    pub hgnc_id: String,
    pub symbol: String,
    pub prev_symbols: Vec<String>,
    pub stable_id: StableId,
    pub omim_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct XrefPlan {
    pub operations: Vec<Operation>,
    pub notes: Vec<AuditNote>,
}

struct Columns {
    hgnc_id: usize,
    symbol: Option<usize>,
    prev_symbol: Option<usize>,
    ensembl_gene_id: Option<usize>,
    omim_id: Option<usize>,
}

impl Columns {
    fn from_header(header: &StringRecord) -> SyncResult<Self> {
        if header.get(0).map(str::trim) != Some(HEADER_FIRST_COLUMN) {
            return Err(SyncError::new(
                ErrorCode::InvalidInput,
                format!(
                    "Cross-reference header must start with '{HEADER_FIRST_COLUMN}', found '{}'",
                    header.get(0).unwrap_or_default()
                ),
            ));
        }
        let find = |name: &str| header.iter().position(|h| h.trim() == name);
        Ok(Self {
            hgnc_id: 0,
            symbol: find("symbol"),
            prev_symbol: find("prev_symbol"),
            ensembl_gene_id: find("ensembl_gene_id"),
            omim_id: find("omim_id"),
        })
    }
}

fn field(row: &StringRecord, index: Option<usize>) -> String {
    index
        .and_then(|i| row.get(i))
        .map(|v| v.replace('"', "").trim().to_string())
        .unwrap_or_default()
}

fn pipe_list(raw: &str) -> Vec<String> {
    raw.split('|')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses the tab-separated authority feed. Rows without a stable id are
/// dropped; a malformed header is fatal.
pub fn read_authority_records<R: Read>(reader: R) -> SyncResult<Vec<AuthorityRecord>> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .quoting(false)
        .from_reader(reader);
    let header = rdr
        .headers()
        .map_err(|e| {
            SyncError::new(
                ErrorCode::InvalidInput,
                format!("Could not read cross-reference header: {e}"),
            )
        })?
        .clone();
    let columns = Columns::from_header(&header)?;

    let mut records = vec![];
    let mut without_stable_id = 0usize;
    for row in rdr.records() {
        let row = row.map_err(|e| {
            SyncError::new(
                ErrorCode::InvalidInput,
                format!("Could not read cross-reference row: {e}"),
            )
        })?;
        let hgnc_id = field(&row, Some(columns.hgnc_id));
        if !hgnc_id.starts_with(HGNC_PREFIX) {
            continue;
        }
        let stable_id = field(&row, columns.ensembl_gene_id);
        if stable_id.is_empty() {
            without_stable_id += 1;
            continue;
        }
        records.push(AuthorityRecord {
            hgnc_id,
            symbol: field(&row, columns.symbol),
            prev_symbols: pipe_list(&field(&row, columns.prev_symbol)),
            stable_id,
            omim_ids: pipe_list(&field(&row, columns.omim_id)),
        });
    }
    debug!(
        records = records.len(),
        without_stable_id, "cross-reference feed parsed"
    );
    Ok(records)
}

pub fn reconcile_xrefs(snapshot: &XrefSnapshot, records: &[AuthorityRecord]) -> XrefPlan {
    let mut plan = XrefPlan::default();
    let by_stable_id = records.iter().into_group_map_by(|r| r.stable_id.as_str());
    for (stable_id, group) in by_stable_id.into_iter().sorted_by_key(|(id, _)| *id) {
        let Some(entry) = snapshot.entry(stable_id) else {
            continue;
        };
        if group.len() > 1 {
            let ids = group.iter().map(|r| r.hgnc_id.as_str()).join(", ");
            warn!(stable_id, ids = %ids, "stable id claimed by several HGNC records");
            plan.notes.push(AuditNote::warning(format!(
                "{stable_id} claimed by more than one HGNC record: {ids}"
            )));
            continue;
        }
        reconcile_record(snapshot, entry, group[0], &mut plan);
    }
    plan
}

fn reconcile_record(
    snapshot: &XrefSnapshot,
    entry: &XrefEntry,
    record: &AuthorityRecord,
    plan: &mut XrefPlan,
) {
    push_identifier(entry, IdentifierKind::Hgnc, &record.hgnc_id, plan);

    match record.omim_ids.as_slice() {
        [] => {}
        [omim] => push_identifier(entry, IdentifierKind::Omim, omim, plan),
        many => plan.notes.push(AuditNote::warning(format!(
            "{} ({}) has several OMIM IDs: {}",
            entry.stable_id,
            entry.symbol,
            many.join(", ")
        ))),
    }

    let mut demoted = None;
    if !record.symbol.is_empty() && record.symbol != entry.symbol {
        match snapshot.symbol_owner(&record.symbol) {
            Some(owner) if owner != entry.locus_id => {
                plan.notes.push(AuditNote::warning(format!(
                    "locus {} ({}): HGNC symbol {} already used by locus {owner}; not renamed",
                    entry.locus_id, entry.symbol, record.symbol
                )));
            }
            _ => {
                let demote = !entry.has_synonym(&entry.symbol);
                if demote {
                    demoted = Some(entry.symbol.as_str());
                }
                plan.operations.push(Operation::UpdateSymbol {
                    locus_id: entry.locus_id,
                    previous_symbol: entry.symbol.clone(),
                    new_symbol: record.symbol.clone(),
                    demote_old_as_synonym: demote,
                });
            }
        }
    }

    let mut added: BTreeSet<&str> = BTreeSet::new();
    for previous in &record.prev_symbols {
        let previous = previous.as_str();
        if entry.has_synonym(previous)
            || previous == entry.symbol
            || previous == record.symbol
            || Some(previous) == demoted
            || !added.insert(previous)
        {
            continue;
        }
        plan.operations.push(Operation::AddSynonym {
            locus_id: entry.locus_id,
            symbol: previous.to_string(),
        });
    }
}

fn push_identifier(entry: &XrefEntry, kind: IdentifierKind, value: &str, plan: &mut XrefPlan) {
    let current = entry.identifiers.get(&kind);
    if current.map(String::as_str) == Some(value) {
        return;
    }
    plan.operations.push(Operation::UpsertIdentifier {
        locus_id: entry.locus_id,
        kind,
        value: value.to_string(),
        previous: current.cloned(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Cursor;

    const HEADER: &str = "hgnc_id\tsymbol\tname\tprev_symbol\tensembl_gene_id\tomim_id\n";

    fn entry(locus_id: i64, stable_id: &str, symbol: &str) -> XrefEntry {
        XrefEntry {
            locus_id,
            stable_id: stable_id.to_string(),
            symbol: symbol.to_string(),
            synonyms: BTreeSet::new(),
            identifiers: BTreeMap::from([(IdentifierKind::StableId, stable_id.to_string())]),
        }
    }

    fn snapshot(entries: Vec<XrefEntry>) -> XrefSnapshot {
        XrefSnapshot::new(
            entries
                .into_iter()
                .map(|e| (e.stable_id.clone(), e))
                .collect(),
        )
    }

    fn record(hgnc_id: &str, symbol: &str, stable_id: &str) -> AuthorityRecord {
        AuthorityRecord {
            hgnc_id: hgnc_id.to_string(),
            symbol: symbol.to_string(),
            prev_symbols: vec![],
            stable_id: stable_id.to_string(),
            omim_ids: vec![],
        }
    }

    #[test]
    fn test_parse_feed() {
        let text = format!(
            "{HEADER}HGNC:5\tA1BG\talpha-1-B glycoprotein\t\"ABG|GAB\"\tENSG00000121410\t138670\n\
             HGNC:6\tNOENS\tno stable id\t\t\t\n\
             withdrawn\tXX\t\t\tENSG1\t\n\
             HGNC:7\tA2M\talpha-2-macroglobulin\t\tENSG00000175899\t103950|614036\n"
        );
        let records = read_authority_records(Cursor::new(text)).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].prev_symbols, vec!["ABG", "GAB"]);
        assert_eq!(records[0].omim_ids, vec!["138670"]);
        assert_eq!(records[1].omim_ids.len(), 2);
        assert_eq!(records[1].symbol, "A2M");
    }

    #[test]
    fn test_malformed_header_is_fatal() {
        let err = read_authority_records(Cursor::new("symbol\thgnc_id\nA1BG\tHGNC:5\n"))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }

    #[test]
    fn test_identifiers_are_inserted_and_updated() {
        let mut known = entry(2, "ENSG002", "BBB");
        known
            .identifiers
            .insert(IdentifierKind::Hgnc, "HGNC:20".to_string());
        let registry = snapshot(vec![entry(1, "ENSG001", "AAA"), known]);
        let mut first = record("HGNC:1", "AAA", "ENSG001");
        first.omim_ids = vec!["100100".to_string()];
        let records = vec![first, record("HGNC:2", "BBB", "ENSG002")];

        let plan = reconcile_xrefs(&registry, &records);
        assert_eq!(
            plan.operations,
            vec![
                Operation::UpsertIdentifier {
                    locus_id: 1,
                    kind: IdentifierKind::Hgnc,
                    value: "HGNC:1".to_string(),
                    previous: None,
                },
                Operation::UpsertIdentifier {
                    locus_id: 1,
                    kind: IdentifierKind::Omim,
                    value: "100100".to_string(),
                    previous: None,
                },
                Operation::UpsertIdentifier {
                    locus_id: 2,
                    kind: IdentifierKind::Hgnc,
                    value: "HGNC:2".to_string(),
                    previous: Some("HGNC:20".to_string()),
                },
            ]
        );
    }

    #[test]
    fn test_symbol_update_and_previous_symbols() {
        let mut current = entry(3, "ENSG003", "OLD");
        current
            .identifiers
            .insert(IdentifierKind::Hgnc, "HGNC:3".to_string());
        current.synonyms.insert("LEGACY".to_string());
        let mut rec = record("HGNC:3", "NEW", "ENSG003");
        rec.prev_symbols = vec!["OLD".to_string(), "legacy".to_string(), "PRIOR".to_string()];

        let plan = reconcile_xrefs(&snapshot(vec![current]), &[rec]);
        assert_eq!(
            plan.operations,
            vec![
                Operation::UpdateSymbol {
                    locus_id: 3,
                    previous_symbol: "OLD".to_string(),
                    new_symbol: "NEW".to_string(),
                    demote_old_as_synonym: true,
                },
                Operation::AddSynonym {
                    locus_id: 3,
                    symbol: "PRIOR".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_symbol_of_other_locus_is_rejected() {
        let mut a = entry(1, "ENSG001", "AAA");
        a.identifiers
            .insert(IdentifierKind::Hgnc, "HGNC:1".to_string());
        let plan = reconcile_xrefs(
            &snapshot(vec![a, entry(2, "ENSG002", "BBB")]),
            &[record("HGNC:1", "BBB", "ENSG001")],
        );
        assert!(plan.operations.is_empty());
        assert_eq!(plan.notes.len(), 1);
        assert!(plan.notes[0].message.contains("already used"));
    }

    #[test]
    fn test_ambiguous_or_multi_valued_records_are_skipped() {
        let registry = snapshot(vec![entry(1, "ENSG001", "AAA"), entry(2, "ENSG002", "BBB")]);
        let mut multi = record("HGNC:2", "BBB", "ENSG002");
        multi.omim_ids = vec!["1".to_string(), "2".to_string()];
        let records = vec![
            record("HGNC:1", "AAA", "ENSG001"),
            record("HGNC:9", "AAA2", "ENSG001"),
            multi,
        ];
        let plan = reconcile_xrefs(&registry, &records);
        assert_eq!(
            plan.operations,
            vec![Operation::UpsertIdentifier {
                locus_id: 2,
                kind: IdentifierKind::Hgnc,
                value: "HGNC:2".to_string(),
                previous: None,
            }]
        );
        assert_eq!(plan.notes.len(), 2);
    }

    #[test]
    fn test_changed_omim_id_replaces_previous() {
        let mut known = entry(4, "ENSG004", "DDD");
        known
            .identifiers
            .insert(IdentifierKind::Hgnc, "HGNC:4".to_string());
        known
            .identifiers
            .insert(IdentifierKind::Omim, "200000".to_string());
        let mut rec = record("HGNC:4", "DDD", "ENSG004");
        rec.omim_ids = vec!["200001".to_string()];

        let plan = reconcile_xrefs(&snapshot(vec![known]), &[rec]);
        assert_eq!(
            plan.operations,
            vec![Operation::UpsertIdentifier {
                locus_id: 4,
                kind: IdentifierKind::Omim,
                value: "200001".to_string(),
                previous: Some("200000".to_string()),
            }]
        );
    }

    #[test]
    fn test_old_symbol_already_synonym_is_not_demoted() {
        let mut current = entry(5, "ENSG005", "OLD");
        current
            .identifiers
            .insert(IdentifierKind::Hgnc, "HGNC:5".to_string());
        current.synonyms.insert("OLD".to_string());
        let mut rec = record("HGNC:5", "NEW", "ENSG005");
        rec.prev_symbols = vec!["OLD".to_string()];

        let plan = reconcile_xrefs(&snapshot(vec![current]), &[rec]);
        assert_eq!(
            plan.operations,
            vec![Operation::UpdateSymbol {
                locus_id: 5,
                previous_symbol: "OLD".to_string(),
                new_symbol: "NEW".to_string(),
                demote_old_as_synonym: false,
            }]
        );
        assert!(plan.notes.is_empty());
    }
}
