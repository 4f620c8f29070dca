//! The locus registry as seen by the reconcilers.
//!
//! [`RegistryStore`] is the storage boundary: read views used to build
//! snapshots, and one write primitive per [`locus_protocol::Operation`]
//! variant. Each write primitive is atomic on its own; nothing groups several
//! of them into a larger transaction.

use crate::config::DependentTable;
use crate::error::{ErrorCode, SyncError, SyncResult};
use locus_protocol::{
    Coordinates, GeneRecord, IdentifierKind, LocusId, RegistryEntry, StableId, Strand,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const LOCUS_IDENTIFIER_TABLE: &str = "locus_identifier";
pub const LOCUS_SYNONYM_TABLE: &str = "locus_attrib";

/// Consistent view of the registry taken before the primary pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub by_stable_id: BTreeMap<StableId, RegistryEntry>,
    pub by_symbol: BTreeMap<String, StableId>,
    /// Loci with no rows in any usage table, keyed by stable id.
    pub unreferenced: BTreeMap<StableId, LocusId>,
}

impl RegistrySnapshot {
    pub fn entry(&self, stable_id: &str) -> Option<&RegistryEntry> {
        self.by_stable_id.get(stable_id)
    }

    /// The entry currently holding `symbol` as its canonical name.
    pub fn entry_for_symbol(&self, symbol: &str) -> Option<&RegistryEntry> {
        self.by_symbol
            .get(symbol)
            .and_then(|stable_id| self.by_stable_id.get(stable_id))
    }

    pub fn unreferenced_locus(&self, stable_id: &str) -> Option<LocusId> {
        self.unreferenced.get(stable_id).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XrefEntry {
    pub locus_id: LocusId,
    pub stable_id: StableId,
    pub symbol: String,
    pub synonyms: BTreeSet<String>,
    pub identifiers: BTreeMap<IdentifierKind, String>,
}

impl XrefEntry {
    pub fn has_synonym(&self, symbol: &str) -> bool {
        self.synonyms.contains(symbol) || self.synonyms.contains(&symbol.to_uppercase())
    }
}

/// View of the registry taken after the primary pass was applied, keyed by
/// stable id, with each locus' external identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XrefSnapshot {
    pub entries: BTreeMap<StableId, XrefEntry>,
    symbol_owner: BTreeMap<String, LocusId>,
}

impl XrefSnapshot {
    pub fn new(entries: BTreeMap<StableId, XrefEntry>) -> Self {
        let symbol_owner = entries
            .values()
            .map(|entry| (entry.symbol.clone(), entry.locus_id))
            .collect();
        Self {
            entries,
            symbol_owner,
        }
    }

    pub fn entry(&self, stable_id: &str) -> Option<&XrefEntry> {
        self.entries.get(stable_id)
    }

    pub fn symbol_owner(&self, symbol: &str) -> Option<LocusId> {
        self.symbol_owner.get(symbol).copied()
    }
}

/// A gene–disease record as needed by the disease-name check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiseaseLink {
    pub record_id: String,
    pub gene_symbol: String,
    pub disease_name: String,
}

/// One row of the registry's update history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMeta {
    pub key: String,
    pub description: String,
    pub version: String,
    pub source: String,
    pub date_update: String,
}

pub trait RegistryStore {
    /// Loci carrying a stable id, keyed by that stable id, with synonyms.
    fn list_entries_by_authority(&self) -> SyncResult<BTreeMap<StableId, RegistryEntry>>;
    fn list_entries_by_symbol(&self) -> SyncResult<BTreeMap<String, StableId>>;
    fn list_unreferenced_entries(
        &self,
        usage_tables: &[DependentTable],
    ) -> SyncResult<BTreeMap<StableId, LocusId>>;
    fn list_identifiers(&self) -> SyncResult<BTreeMap<LocusId, BTreeMap<IdentifierKind, String>>>;
    fn count_dangling_fk(&self, table: &DependentTable) -> SyncResult<u64>;
    fn list_disease_links(&self) -> SyncResult<Vec<DiseaseLink>>;

    fn create_locus(&mut self, record: &GeneRecord) -> SyncResult<LocusId>;
    fn rename_identifier(&mut self, locus_id: LocusId, new_stable_id: &str) -> SyncResult<()>;
    /// Sets the canonical symbol; `demoted` is stored as a synonym in the
    /// same write.
    fn update_symbol(
        &mut self,
        locus_id: LocusId,
        symbol: &str,
        demoted: Option<&str>,
    ) -> SyncResult<()>;
    fn add_synonym(&mut self, locus_id: LocusId, symbol: &str) -> SyncResult<()>;
    fn update_coordinates(&mut self, locus_id: LocusId, current: &Coordinates) -> SyncResult<()>;
    fn upsert_identifier(
        &mut self,
        locus_id: LocusId,
        kind: IdentifierKind,
        value: &str,
        replace: bool,
    ) -> SyncResult<()>;
    /// Removes the locus together with its identifier and synonym rows.
    fn delete_locus(&mut self, locus_id: LocusId) -> SyncResult<()>;
    fn record_update(&mut self, meta: &UpdateMeta) -> SyncResult<()>;

    /// All three primary views. Backends with transactions override this to
    /// read them from one snapshot.
    fn snapshot(&self, usage_tables: &[DependentTable]) -> SyncResult<RegistrySnapshot> {
        Ok(RegistrySnapshot {
            by_stable_id: self.list_entries_by_authority()?,
            by_symbol: self.list_entries_by_symbol()?,
            unreferenced: self.list_unreferenced_entries(usage_tables)?,
        })
    }

    fn xref_snapshot(&self) -> SyncResult<XrefSnapshot> {
        let entries = self.list_entries_by_authority()?;
        let mut identifiers = self.list_identifiers()?;
        Ok(build_xref_snapshot(entries, &mut identifiers))
    }
}

pub(crate) fn build_xref_snapshot(
    entries: BTreeMap<StableId, RegistryEntry>,
    identifiers: &mut BTreeMap<LocusId, BTreeMap<IdentifierKind, String>>,
) -> XrefSnapshot {
    let entries = entries
        .into_iter()
        .map(|(stable_id, entry)| {
            let ids = identifiers.remove(&entry.locus_id).unwrap_or_default();
            (
                stable_id.clone(),
                XrefEntry {
                    locus_id: entry.locus_id,
                    stable_id,
                    symbol: entry.symbol,
                    synonyms: entry.synonyms,
                    identifiers: ids,
                },
            )
        })
        .collect();
    XrefSnapshot::new(entries)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LocusRow {
    symbol: String,
    sequence_name: String,
    start: u64,
    end: u64,
    strand: Strand,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct IdentifierRow {
    locus_id: LocusId,
    kind: IdentifierKind,
    value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DiseaseLinkRow {
    record_id: String,
    locus_id: LocusId,
    disease_name: String,
}

/// In-process registry used by tests and dry runs.
#[derive(Debug, Clone)]
pub struct MemoryRegistry {
    sequences: BTreeSet<String>,
    loci: BTreeMap<LocusId, LocusRow>,
    identifiers: Vec<IdentifierRow>,
    synonyms: Vec<(LocusId, String)>,
    dependents: BTreeMap<String, Vec<Option<LocusId>>>,
    disease_links: Vec<DiseaseLinkRow>,
    meta: Vec<UpdateMeta>,
    next_locus_id: LocusId,
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self {
            sequences: BTreeSet::new(),
            loci: BTreeMap::new(),
            identifiers: vec![],
            synonyms: vec![],
            dependents: BTreeMap::new(),
            disease_links: vec![],
            meta: vec![],
            next_locus_id: 1,
        }
    }
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sequences<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sequences: names.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Adds a row to a dependent table; `None` models a NULL foreign key.
    pub fn add_dependent_row(&mut self, table: &str, locus_id: Option<LocusId>) {
        self.dependents
            .entry(table.to_string())
            .or_default()
            .push(locus_id);
    }

    /// Adds a genotype–disease record; it also counts as a usage of the locus.
    pub fn add_disease_link(&mut self, record_id: &str, locus_id: LocusId, disease_name: &str) {
        self.add_dependent_row("locus_genotype_disease", Some(locus_id));
        self.disease_links.push(DiseaseLinkRow {
            record_id: record_id.to_string(),
            locus_id,
            disease_name: disease_name.to_string(),
        });
    }

    pub fn locus_count(&self) -> usize {
        self.loci.len()
    }

    pub fn entry(&self, locus_id: LocusId) -> Option<RegistryEntry> {
        let row = self.loci.get(&locus_id)?;
        Some(RegistryEntry {
            locus_id,
            stable_id: self
                .identifier(locus_id, IdentifierKind::StableId)
                .unwrap_or_default(),
            symbol: row.symbol.clone(),
            sequence_name: row.sequence_name.clone(),
            start: row.start,
            end: row.end,
            strand: row.strand,
            synonyms: self.synonyms_of(locus_id),
        })
    }

    pub fn identifier(&self, locus_id: LocusId, kind: IdentifierKind) -> Option<String> {
        self.identifiers
            .iter()
            .find(|row| row.locus_id == locus_id && row.kind == kind)
            .map(|row| row.value.clone())
    }

    pub fn meta(&self) -> &[UpdateMeta] {
        &self.meta
    }

    fn synonyms_of(&self, locus_id: LocusId) -> BTreeSet<String> {
        self.synonyms
            .iter()
            .filter(|(id, _)| *id == locus_id)
            .map(|(_, symbol)| symbol.clone())
            .collect()
    }

    fn require_locus(&self, locus_id: LocusId) -> SyncResult<()> {
        if self.loci.contains_key(&locus_id) {
            Ok(())
        } else {
            Err(SyncError::new(
                ErrorCode::NotFound,
                format!("Locus {locus_id} not found"),
            ))
        }
    }

    fn is_referenced(&self, locus_id: LocusId, usage_tables: &[DependentTable]) -> bool {
        usage_tables.iter().any(|table| {
            self.dependents
                .get(&table.table)
                .is_some_and(|rows| rows.contains(&Some(locus_id)))
        })
    }
}

impl RegistryStore for MemoryRegistry {
    fn list_entries_by_authority(&self) -> SyncResult<BTreeMap<StableId, RegistryEntry>> {
        Ok(self
            .identifiers
            .iter()
            .filter(|row| row.kind == IdentifierKind::StableId)
            .filter_map(|row| {
                self.entry(row.locus_id)
                    .map(|entry| (row.value.clone(), entry))
            })
            .collect())
    }

    fn list_entries_by_symbol(&self) -> SyncResult<BTreeMap<String, StableId>> {
        Ok(self
            .list_entries_by_authority()?
            .into_values()
            .map(|entry| (entry.symbol, entry.stable_id))
            .collect())
    }

    fn list_unreferenced_entries(
        &self,
        usage_tables: &[DependentTable],
    ) -> SyncResult<BTreeMap<StableId, LocusId>> {
        Ok(self
            .identifiers
            .iter()
            .filter(|row| row.kind == IdentifierKind::StableId)
            .filter(|row| self.loci.contains_key(&row.locus_id))
            .filter(|row| !self.is_referenced(row.locus_id, usage_tables))
            .map(|row| (row.value.clone(), row.locus_id))
            .collect())
    }

    fn list_identifiers(&self) -> SyncResult<BTreeMap<LocusId, BTreeMap<IdentifierKind, String>>> {
        let mut out: BTreeMap<LocusId, BTreeMap<IdentifierKind, String>> = BTreeMap::new();
        for row in &self.identifiers {
            out.entry(row.locus_id)
                .or_default()
                .insert(row.kind, row.value.clone());
        }
        Ok(out)
    }

    fn count_dangling_fk(&self, table: &DependentTable) -> SyncResult<u64> {
        let dangling = |id: &LocusId| !self.loci.contains_key(id);
        let count = match table.table.as_str() {
            LOCUS_IDENTIFIER_TABLE => self
                .identifiers
                .iter()
                .filter(|row| dangling(&row.locus_id))
                .count(),
            LOCUS_SYNONYM_TABLE => self.synonyms.iter().filter(|(id, _)| dangling(id)).count(),
            other => self
                .dependents
                .get(other)
                .map(|rows| rows.iter().flatten().filter(|id| dangling(id)).count())
                .unwrap_or(0),
        };
        Ok(count as u64)
    }

    fn list_disease_links(&self) -> SyncResult<Vec<DiseaseLink>> {
        Ok(self
            .disease_links
            .iter()
            .filter_map(|row| {
                self.loci.get(&row.locus_id).map(|locus| DiseaseLink {
                    record_id: row.record_id.clone(),
                    gene_symbol: locus.symbol.clone(),
                    disease_name: row.disease_name.clone(),
                })
            })
            .collect())
    }

    fn create_locus(&mut self, record: &GeneRecord) -> SyncResult<LocusId> {
        if !self.sequences.contains(&record.sequence_name) {
            return Err(SyncError::new(
                ErrorCode::NotFound,
                format!("Sequence '{}' not found", record.sequence_name),
            ));
        }
        let locus_id = self.next_locus_id;
        self.next_locus_id += 1;
        self.loci.insert(
            locus_id,
            LocusRow {
                symbol: record.symbol.clone(),
                sequence_name: record.sequence_name.clone(),
                start: record.start,
                end: record.end,
                strand: record.strand,
            },
        );
        self.identifiers.push(IdentifierRow {
            locus_id,
            kind: IdentifierKind::StableId,
            value: record.stable_id.clone(),
        });
        Ok(locus_id)
    }

    fn rename_identifier(&mut self, locus_id: LocusId, new_stable_id: &str) -> SyncResult<()> {
        self.upsert_identifier(locus_id, IdentifierKind::StableId, new_stable_id, true)
    }

    fn update_symbol(
        &mut self,
        locus_id: LocusId,
        symbol: &str,
        demoted: Option<&str>,
    ) -> SyncResult<()> {
        let row = self.loci.get_mut(&locus_id).ok_or_else(|| {
            SyncError::new(ErrorCode::NotFound, format!("Locus {locus_id} not found"))
        })?;
        row.symbol = symbol.to_string();
        if let Some(old) = demoted {
            self.synonyms.push((locus_id, old.to_string()));
        }
        Ok(())
    }

    fn add_synonym(&mut self, locus_id: LocusId, symbol: &str) -> SyncResult<()> {
        self.require_locus(locus_id)?;
        self.synonyms.push((locus_id, symbol.to_string()));
        Ok(())
    }

    fn update_coordinates(&mut self, locus_id: LocusId, current: &Coordinates) -> SyncResult<()> {
        if !self.sequences.contains(&current.sequence_name) {
            return Err(SyncError::new(
                ErrorCode::NotFound,
                format!("Sequence '{}' not found", current.sequence_name),
            ));
        }
        let row = self.loci.get_mut(&locus_id).ok_or_else(|| {
            SyncError::new(ErrorCode::NotFound, format!("Locus {locus_id} not found"))
        })?;
        row.sequence_name = current.sequence_name.clone();
        row.start = current.start;
        row.end = current.end;
        Ok(())
    }

    fn upsert_identifier(
        &mut self,
        locus_id: LocusId,
        kind: IdentifierKind,
        value: &str,
        replace: bool,
    ) -> SyncResult<()> {
        self.require_locus(locus_id)?;
        if replace {
            let row = self
                .identifiers
                .iter_mut()
                .find(|row| row.locus_id == locus_id && row.kind == kind)
                .ok_or_else(|| {
                    SyncError::new(
                        ErrorCode::NotFound,
                        format!("Locus {locus_id} has no {kind} to update"),
                    )
                })?;
            row.value = value.to_string();
        } else {
            self.identifiers.push(IdentifierRow {
                locus_id,
                kind,
                value: value.to_string(),
            });
        }
        Ok(())
    }

    fn delete_locus(&mut self, locus_id: LocusId) -> SyncResult<()> {
        self.require_locus(locus_id)?;
        self.identifiers.retain(|row| row.locus_id != locus_id);
        self.synonyms.retain(|(id, _)| *id != locus_id);
        self.loci.remove(&locus_id);
        Ok(())
    }

    fn record_update(&mut self, meta: &UpdateMeta) -> SyncResult<()> {
        self.meta.push(meta.clone());
        Ok(())
    }
}
