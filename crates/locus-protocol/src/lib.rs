//! Shared data contracts for locus-sync.
//!
//! Everything here is plain data: records read from the source feeds, rows of
//! the locus registry and the operations that mutate it. Operations carry no
//! behaviour until an applier hands them to a registry store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub type LocusId = i64;
pub type StableId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Strand {
    #[serde(rename = "+")]
    Forward,
    #[serde(rename = "-")]
    Reverse,
}

impl Strand {
    /// Annotation feeds use `-` for the reverse strand; anything else is
    /// stored as forward.
    pub fn from_annotation(raw: &str) -> Self {
        if raw.trim() == "-" {
            Strand::Reverse
        } else {
            Strand::Forward
        }
    }

    pub fn from_registry(value: i64) -> Self {
        if value < 0 {
            Strand::Reverse
        } else {
            Strand::Forward
        }
    }

    pub fn as_registry(self) -> i64 {
        match self {
            Strand::Forward => 1,
            Strand::Reverse => -1,
        }
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strand::Forward => write!(f, "+"),
            Strand::Reverse => write!(f, "-"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coordinates {
    pub sequence_name: String,
    pub start: u64,
    pub end: u64,
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.sequence_name, self.start, self.end)
    }
}

/// One gene as asserted by the annotation feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneRecord {
    pub stable_id: StableId,
    pub symbol: String,
    pub sequence_name: String,
    pub start: u64,
    pub end: u64,
    pub strand: Strand,
}

impl GeneRecord {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            sequence_name: self.sequence_name.clone(),
            start: self.start,
            end: self.end,
        }
    }
}

/// One locus as currently stored in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub locus_id: LocusId,
    pub stable_id: StableId,
    pub symbol: String,
    pub sequence_name: String,
    pub start: u64,
    pub end: u64,
    pub strand: Strand,
    #[serde(default)]
    pub synonyms: BTreeSet<String>,
}

impl RegistryEntry {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            sequence_name: self.sequence_name.clone(),
            start: self.start,
            end: self.end,
        }
    }
}

/// Identifier namespaces attached to a locus. Each kind maps to the name of
/// the source that issues it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IdentifierKind {
    StableId,
    Hgnc,
    Omim,
}

impl IdentifierKind {
    pub const ALL: [IdentifierKind; 3] = [
        IdentifierKind::StableId,
        IdentifierKind::Hgnc,
        IdentifierKind::Omim,
    ];

    pub fn source_name(self) -> &'static str {
        match self {
            IdentifierKind::StableId => "Ensembl",
            IdentifierKind::Hgnc => "HGNC",
            IdentifierKind::Omim => "OMIM",
        }
    }

    pub fn from_source_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.source_name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierKind::StableId => write!(f, "stable_id"),
            IdentifierKind::Hgnc => write!(f, "HGNC ID"),
            IdentifierKind::Omim => write!(f, "OMIM ID"),
        }
    }
}

/// A single registry mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Operation {
    Create {
        record: GeneRecord,
    },
    RenameIdentifier {
        locus_id: LocusId,
        symbol: String,
        previous_stable_id: StableId,
        new_stable_id: StableId,
    },
    UpdateSymbol {
        locus_id: LocusId,
        previous_symbol: String,
        new_symbol: String,
        demote_old_as_synonym: bool,
    },
    AddSynonym {
        locus_id: LocusId,
        symbol: String,
    },
    UpdateCoordinates {
        locus_id: LocusId,
        previous: Coordinates,
        current: Coordinates,
    },
    UpsertIdentifier {
        locus_id: LocusId,
        kind: IdentifierKind,
        value: String,
        /// `None` inserts a new identifier row, `Some` replaces this value.
        previous: Option<String>,
    },
    Delete {
        locus_id: LocusId,
        stable_id: StableId,
        symbol: String,
    },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Create { .. } => OperationKind::Create,
            Operation::RenameIdentifier { .. } => OperationKind::RenameIdentifier,
            Operation::UpdateSymbol { .. } => OperationKind::UpdateSymbol,
            Operation::AddSynonym { .. } => OperationKind::AddSynonym,
            Operation::UpdateCoordinates { .. } => OperationKind::UpdateCoordinates,
            Operation::UpsertIdentifier { .. } => OperationKind::UpsertIdentifier,
            Operation::Delete { .. } => OperationKind::Delete,
        }
    }

    /// The locus this operation targets; `None` for a locus not created yet.
    pub fn locus_id(&self) -> Option<LocusId> {
        match self {
            Operation::Create { .. } => None,
            Operation::RenameIdentifier { locus_id, .. }
            | Operation::UpdateSymbol { locus_id, .. }
            | Operation::AddSynonym { locus_id, .. }
            | Operation::UpdateCoordinates { locus_id, .. }
            | Operation::UpsertIdentifier { locus_id, .. }
            | Operation::Delete { locus_id, .. } => Some(*locus_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OperationKind {
    Create,
    RenameIdentifier,
    UpdateSymbol,
    AddSynonym,
    UpdateCoordinates,
    UpsertIdentifier,
    Delete,
}
