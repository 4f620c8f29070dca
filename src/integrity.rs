//! Referential integrity guard run before and after every mutation pass.

use crate::config::DependentTable;
use crate::error::{ErrorCode, SyncError, SyncResult};
use crate::registry::RegistryStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Checkpoint {
    BeforeUpdate,
    AfterUpdate,
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Checkpoint::BeforeUpdate => write!(f, "before update"),
            Checkpoint::AfterUpdate => write!(f, "after update"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DanglingRows {
    pub table: String,
    pub column: String,
    pub count: u64,
}

/// Counts dangling rows per table without failing.
pub fn scan<S: RegistryStore + ?Sized>(
    store: &S,
    tables: &[DependentTable],
) -> SyncResult<Vec<DanglingRows>> {
    let mut out = vec![];
    for table in tables {
        let count = store.count_dangling_fk(table)?;
        if count > 0 {
            out.push(DanglingRows {
                table: table.table.clone(),
                column: table.column.clone(),
                count,
            });
        }
    }
    Ok(out)
}

/// Fails with `ErrorCode::Integrity` if any table holds a foreign key to a
/// locus that does not exist.
pub fn check<S: RegistryStore + ?Sized>(
    store: &S,
    tables: &[DependentTable],
    checkpoint: Checkpoint,
) -> SyncResult<()> {
    let dangling = scan(store, tables)?;
    if dangling.is_empty() {
        info!(%checkpoint, tables = tables.len(), "foreign key check passed");
        return Ok(());
    }
    let detail = dangling
        .iter()
        .map(|d| format!("{}.{} ({} rows)", d.table, d.column, d.count))
        .collect::<Vec<_>>()
        .join(", ");
    error!(%checkpoint, %detail, "foreign key check failed");
    Err(SyncError::new(
        ErrorCode::Integrity,
        format!("Foreign key check failed {checkpoint}: {detail}"),
    ))
}
