//! The update job: fetch, reconcile, apply, verify.
//!
//! Every fatal input problem (unreachable feed, malformed header, broken
//! foreign keys) surfaces before the first write. After that the phases run
//! strictly in order, each against a fresh snapshot of the registry.

use crate::annotation::{Extraction, ExtractionSettings, extract_genes, write_extraction_files};
use crate::config::SyncConfig;
use crate::disease_names;
use crate::engine::{Phase, SyncEngine};
use crate::error::{ErrorCode, SyncError, SyncResult};
use crate::integrity::{self, Checkpoint};
use crate::prune::{PrunePlan, plan_pruning};
use crate::reconcile::{PrimaryPlan, reconcile_primary};
use crate::registry::{RegistryStore, UpdateMeta};
use crate::report::{AuditTag, ReportKind, Reports};
use crate::sources::{materialize_source, open_feed};
use crate::xref::{AuthorityRecord, read_authority_records, reconcile_xrefs};
use chrono::Local;
use locus_protocol::{IdentifierKind, OperationKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    /// Full refresh against one annotation release, then cross-references.
    Full { release: String },
    /// Cross-reference pass only.
    SymbolsOnly,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub release: Option<String>,
    pub extracted_genes: usize,
    pub rejected_symbols: usize,
    pub authority_records: usize,
    pub applied: BTreeMap<OperationKind, usize>,
    pub failed_operations: usize,
    pub notes: usize,
    pub stale_disease_names: usize,
}

/// Primary and prune plans computed without touching the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePlan {
    pub release: String,
    pub primary: PrimaryPlan,
    pub prune: PrunePlan,
}

fn prepare_working_dir(config: &SyncConfig) -> SyncResult<PathBuf> {
    fs::create_dir_all(&config.working_dir).map_err(|e| {
        SyncError::new(
            ErrorCode::Io,
            format!(
                "Could not create working directory '{}': {e}",
                config.working_dir.display()
            ),
        )
    })?;
    Ok(config.working_dir.clone())
}

fn fetch_annotation(config: &SyncConfig, dir: &Path, release: &str) -> SyncResult<PathBuf> {
    let path = dir.join(config.annotation_file_name(release));
    materialize_source(&config.annotation_url(release), &path)?;
    Ok(path)
}

fn fetch_xrefs(config: &SyncConfig, dir: &Path) -> SyncResult<PathBuf> {
    let path = dir.join(config.xref_file_name());
    materialize_source(&config.xref_url, &path)?;
    Ok(path)
}

fn load_extraction(config: &SyncConfig, dir: &Path, feed: &Path) -> SyncResult<Extraction> {
    let settings = ExtractionSettings::from_config(config)?;
    let extraction = extract_genes(open_feed(feed)?, &settings)?;
    write_extraction_files(
        &extraction,
        &dir.join(config.listing_file_name()),
        &dir.join(config.extraction_error_log_name()),
    )?;
    Ok(extraction)
}

fn load_authority_records(feed: &Path) -> SyncResult<Vec<AuthorityRecord>> {
    read_authority_records(open_feed(feed)?)
}

fn update_meta(mode: &RunMode) -> UpdateMeta {
    let now = Local::now();
    match mode {
        RunMode::Full { release } => UpdateMeta {
            key: "locus_gene_update".to_string(),
            description: format!("Update genes to Ensembl release {release}"),
            version: release.clone(),
            source: IdentifierKind::StableId.source_name().to_string(),
            date_update: now.format("%Y-%m-%d %H:%M:%S").to_string(),
        },
        RunMode::SymbolsOnly => UpdateMeta {
            key: "locus_gene_symbol_update".to_string(),
            description: "Update gene symbols from HGNC".to_string(),
            version: now.format("%Y-%m-%d").to_string(),
            source: IdentifierKind::Hgnc.source_name().to_string(),
            date_update: now.format("%Y-%m-%d %H:%M:%S").to_string(),
        },
    }
}

/// Computes the primary and prune plans for `release` against the current
/// registry. Downloads the annotation feed but performs no writes to the
/// registry.
pub fn plan_update<S: RegistryStore>(
    config: &SyncConfig,
    store: &S,
    release: &str,
) -> SyncResult<UpdatePlan> {
    let dir = prepare_working_dir(config)?;
    let feed = fetch_annotation(config, &dir, release)?;
    let extraction = load_extraction(config, &dir, &feed)?;
    let snapshot = store.snapshot(&config.reference_tables())?;
    let primary = reconcile_primary(&snapshot, &extraction);
    let prune = plan_pruning(&snapshot, &extraction, &primary.retired);
    Ok(UpdatePlan {
        release: release.to_string(),
        primary,
        prune,
    })
}

pub fn run_update<S: RegistryStore>(
    config: &SyncConfig,
    store: &mut S,
    mode: &RunMode,
) -> SyncResult<RunSummary> {
    let dir = prepare_working_dir(config)?;
    let mut summary = RunSummary::default();

    let extraction = match mode {
        RunMode::Full { release } => {
            info!(release = %release, "fetching annotation feed");
            let feed = fetch_annotation(config, &dir, release)?;
            summary.release = Some(release.clone());
            Some(feed)
        }
        RunMode::SymbolsOnly => None,
    };
    info!("fetching cross-reference feed");
    let xref_feed = fetch_xrefs(config, &dir)?;

    let extraction = match extraction {
        Some(feed) => {
            let extraction = load_extraction(config, &dir, &feed)?;
            summary.extracted_genes = extraction.genes.len();
            summary.rejected_symbols = extraction.issues.len();
            Some(extraction)
        }
        None => None,
    };
    let authority = load_authority_records(&xref_feed)?;
    summary.authority_records = authority.len();

    integrity::check(&*store, &config.foreign_key_tables, Checkpoint::BeforeUpdate)?;

    let run_id = format!("run-{}", Local::now().format("%Y%m%dT%H%M%S"));
    let mut engine = SyncEngine::new(store, Reports::new(&dir)?, &run_id);

    if let Some(extraction) = &extraction {
        let snapshot = engine.store().snapshot(&config.reference_tables())?;
        let primary = reconcile_primary(&snapshot, extraction);
        let prune = plan_pruning(&snapshot, extraction, &primary.retired);
        info!(
            operations = primary.operations.len(),
            retired = primary.retired.len(),
            notes = primary.notes.len(),
            "applying primary plan"
        );
        engine.write_notes(&primary.notes, Phase::Primary)?;
        engine.apply_plan(&primary.operations, Phase::Primary)?;
        info!(
            deletions = prune.operations.len(),
            kept = prune.notes.len(),
            "pruning outdated loci"
        );
        engine.write_notes(&prune.notes, Phase::Prune)?;
        engine.apply_plan(&prune.operations, Phase::Prune)?;
        summary.notes += primary.notes.len() + prune.notes.len();
    }

    let xref_snapshot = engine.store().xref_snapshot()?;
    let xrefs = reconcile_xrefs(&xref_snapshot, &authority);
    info!(
        operations = xrefs.operations.len(),
        notes = xrefs.notes.len(),
        "applying cross-reference plan"
    );
    engine.write_notes(&xrefs.notes, Phase::CrossReference)?;
    engine.apply_plan(&xrefs.operations, Phase::CrossReference)?;
    summary.notes += xrefs.notes.len();

    if config.check_disease_names {
        let links = engine.store().list_disease_links()?;
        let stale = disease_names::stale_disease_names(&links);
        for link in &stale {
            engine.reports_mut().write(
                ReportKind::Diseases,
                AuditTag::Warning,
                &disease_names::describe(link),
            )?;
        }
        if !stale.is_empty() {
            warn!(count = stale.len(), "disease names do not carry the current gene symbol");
        }
        summary.stale_disease_names = stale.len();
    }

    summary.applied = engine.applied_counts();
    summary.failed_operations = engine.failed_count();
    engine.finish()?;

    integrity::check(&*store, &config.foreign_key_tables, Checkpoint::AfterUpdate)?;
    store.record_update(&update_meta(mode))?;

    info!(
        applied = summary.applied.values().sum::<usize>(),
        failed = summary.failed_operations,
        notes = summary.notes,
        "update finished"
    );
    Ok(summary)
}
