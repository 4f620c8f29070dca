//! Plain-text audit reports written to the working directory.

use crate::error::{ErrorCode, SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AuditTag {
    Add,
    Update,
    AddSynonym,
    UpdateCoord,
    Info,
    Warning,
    Error,
}

impl AuditTag {
    pub fn prefix(self) -> &'static str {
        match self {
            AuditTag::Add => "ADD:",
            AuditTag::Update => "UPDATE:",
            AuditTag::AddSynonym => "ADD SYNONYM:",
            AuditTag::UpdateCoord => "UPDATE COORD:",
            AuditTag::Info => "INFO:",
            AuditTag::Warning => "WARNING:",
            AuditTag::Error => "ERROR:",
        }
    }
}

impl fmt::Display for AuditTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReportKind {
    NewGenes,
    GeneUpdates,
    OutdatedGenes,
    HgncUpdates,
    Diseases,
}

impl ReportKind {
    pub const ALL: [ReportKind; 5] = [
        ReportKind::NewGenes,
        ReportKind::GeneUpdates,
        ReportKind::OutdatedGenes,
        ReportKind::HgncUpdates,
        ReportKind::Diseases,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            ReportKind::NewGenes => "report_new_genes.txt",
            ReportKind::GeneUpdates => "report_gene_updates.txt",
            ReportKind::OutdatedGenes => "report_outdated_genes.txt",
            ReportKind::HgncUpdates => "report_hgnc_updates.txt",
            ReportKind::Diseases => "report_diseases_to_update.txt",
        }
    }
}

/// A finding that produced no operation but belongs in a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditNote {
    pub tag: AuditTag,
    pub message: String,
}

impl AuditNote {
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            tag: AuditTag::Warning,
            message: message.into(),
        }
    }

    pub fn line(&self) -> String {
        format!("{} {}", self.tag, self.message)
    }
}

/// Report files of one run. Every report is truncated when the run starts,
/// so a file never carries lines from an earlier run.
pub struct Reports {
    dir: PathBuf,
    writers: BTreeMap<ReportKind, BufWriter<File>>,
}

impl Reports {
    pub fn new(dir: &Path) -> SyncResult<Self> {
        let mut writers = BTreeMap::new();
        for kind in ReportKind::ALL {
            let path = dir.join(kind.file_name());
            let file = File::create(&path).map_err(|e| report_error(&path, e))?;
            writers.insert(kind, BufWriter::new(file));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            writers,
        })
    }

    pub fn path(&self, kind: ReportKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    pub fn write(&mut self, kind: ReportKind, tag: AuditTag, message: &str) -> SyncResult<()> {
        let path = self.path(kind);
        let writer = self.writers.get_mut(&kind).ok_or_else(|| {
            SyncError::new(
                ErrorCode::Internal,
                format!("Report '{}' is not open", path.display()),
            )
        })?;
        writeln!(writer, "{tag} {message}").map_err(|e| report_error(&path, e))
    }

    pub fn write_note(&mut self, kind: ReportKind, note: &AuditNote) -> SyncResult<()> {
        self.write(kind, note.tag, &note.message)
    }

    pub fn flush(&mut self) -> SyncResult<()> {
        for (kind, writer) in self.writers.iter_mut() {
            let path = self.dir.join(kind.file_name());
            writer.flush().map_err(|e| report_error(&path, e))?;
        }
        Ok(())
    }
}

fn report_error(path: &Path, e: std::io::Error) -> SyncError {
    SyncError::new(
        ErrorCode::Io,
        format!("Could not write report '{}': {e}", path.display()),
    )
}
