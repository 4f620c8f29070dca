//! Gene extraction from an Ensembl-style GTF feed.
//!
//! Every data line carries `gene_id`, `gene_name` and `gene_biotype` in its
//! attribute column. Lines are grouped by symbol; a symbol that resolves to
//! more than one stable id is dropped, except that repeated annotations lying
//! inside a pseudoautosomal window are folded into the first one.

use crate::config::{ParWindow, SyncConfig};
use crate::error::{ErrorCode, SyncError, SyncResult};
use itertools::Itertools;
use locus_protocol::{GeneRecord, StableId, Strand};
use regex::RegexSet;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;
use tracing::{error, info, warn};

const REQUIRED_ATTRIBUTES: [&str; 3] = ["gene_id", "gene_name", "gene_biotype"];

#[derive(Debug, Clone)]
pub struct ExtractionSettings {
    excluded_biotypes: RegexSet,
    par_windows: Vec<ParWindow>,
}

impl ExtractionSettings {
    pub fn new(exclude_biotypes: &[String], par_windows: Vec<ParWindow>) -> SyncResult<Self> {
        let excluded_biotypes = RegexSet::new(exclude_biotypes).map_err(|e| {
            SyncError::new(
                ErrorCode::InvalidInput,
                format!("Invalid biotype exclusion pattern: {e}"),
            )
        })?;
        Ok(Self {
            excluded_biotypes,
            par_windows,
        })
    }

    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        Self::new(&config.exclude_biotypes, config.par_windows.clone())
    }

    fn is_excluded(&self, biotype: &str) -> bool {
        self.excluded_biotypes.is_match(biotype)
    }

    fn in_par_window(&self, sequence_name: &str, start: u64, end: u64) -> bool {
        self.par_windows
            .iter()
            .any(|w| w.contains(sequence_name, start, end))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionStats {
    pub data_lines: usize,
    pub short_lines: usize,
    pub missing_attributes: usize,
    pub excluded_biotype: usize,
    pub invalid_coordinates: usize,
    pub par_duplicates: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionIssue {
    AmbiguousSymbol {
        symbol: String,
        stable_ids: Vec<StableId>,
    },
    StableIdReused {
        stable_id: StableId,
        kept_symbol: String,
        dropped_symbol: String,
    },
}

impl ExtractionIssue {
    pub fn log_line(&self) -> String {
        match self {
            ExtractionIssue::AmbiguousSymbol { symbol, stable_ids } => format!(
                "ERROR: more than one stable_id for {symbol}: {}",
                stable_ids.iter().join(", ")
            ),
            ExtractionIssue::StableIdReused {
                stable_id,
                kept_symbol,
                dropped_symbol,
            } => format!(
                "ERROR: stable_id {stable_id} already assigned to {kept_symbol}; {dropped_symbol} dropped"
            ),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub genes: BTreeMap<StableId, GeneRecord>,
    pub issues: Vec<ExtractionIssue>,
    pub stats: ExtractionStats,
}

impl Extraction {
    pub fn contains(&self, stable_id: &str) -> bool {
        self.genes.contains_key(stable_id)
    }
}

struct SymbolGroup {
    first: GeneRecord,
    stable_ids: BTreeSet<StableId>,
}

pub fn extract_genes<R: BufRead>(
    reader: R,
    settings: &ExtractionSettings,
) -> SyncResult<Extraction> {
    let mut stats = ExtractionStats::default();
    let mut groups: BTreeMap<String, SymbolGroup> = BTreeMap::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| {
            SyncError::new(
                ErrorCode::Io,
                format!("Could not read annotation line {}: {e}", line_no + 1),
            )
        })?;
        let line = line.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        stats.data_lines += 1;
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 9 {
            stats.short_lines += 1;
            warn!(line = line_no + 1, "annotation line has fewer than 9 fields");
            continue;
        }
        let attrs = parse_attribute_column(cols[8]);
        let Some([gene_id, gene_name, biotype]) = REQUIRED_ATTRIBUTES
            .iter()
            .map(|key| attrs.get(*key).map(String::as_str))
            .collect::<Option<Vec<&str>>>()
            .and_then(|values| <[&str; 3]>::try_from(values).ok())
        else {
            stats.missing_attributes += 1;
            continue;
        };
        if settings.is_excluded(biotype) {
            stats.excluded_biotype += 1;
            continue;
        }
        let (Ok(start), Ok(end)) = (cols[3].trim().parse::<u64>(), cols[4].trim().parse::<u64>())
        else {
            stats.invalid_coordinates += 1;
            warn!(
                line = line_no + 1,
                start = cols[3],
                end = cols[4],
                "annotation line has invalid coordinates"
            );
            continue;
        };
        let sequence_name = cols[0];

        match groups.get_mut(gene_name) {
            None => {
                groups.insert(
                    gene_name.to_string(),
                    SymbolGroup {
                        first: GeneRecord {
                            stable_id: gene_id.to_string(),
                            symbol: gene_name.to_string(),
                            sequence_name: sequence_name.to_string(),
                            start,
                            end,
                            strand: Strand::from_annotation(cols[6]),
                        },
                        stable_ids: BTreeSet::from([gene_id.to_string()]),
                    },
                );
            }
            Some(group) => {
                if settings.in_par_window(sequence_name, start, end) {
                    if !group.stable_ids.contains(gene_id) {
                        stats.par_duplicates += 1;
                    }
                } else {
                    group.stable_ids.insert(gene_id.to_string());
                }
            }
        }
    }

    let mut genes: BTreeMap<StableId, GeneRecord> = BTreeMap::new();
    let mut issues = vec![];
    for (symbol, group) in groups {
        if group.stable_ids.len() > 1 {
            let issue = ExtractionIssue::AmbiguousSymbol {
                symbol,
                stable_ids: group.stable_ids.into_iter().collect(),
            };
            error!("{}", issue.log_line());
            issues.push(issue);
            continue;
        }
        let record = group.first;
        if let Some(kept) = genes.get(&record.stable_id) {
            let issue = ExtractionIssue::StableIdReused {
                stable_id: record.stable_id.clone(),
                kept_symbol: kept.symbol.clone(),
                dropped_symbol: record.symbol,
            };
            error!("{}", issue.log_line());
            issues.push(issue);
            continue;
        }
        genes.insert(record.stable_id.clone(), record);
    }

    info!(
        genes = genes.len(),
        issues = issues.len(),
        excluded = stats.excluded_biotype,
        par_duplicates = stats.par_duplicates,
        "annotation extraction finished"
    );
    Ok(Extraction {
        genes,
        issues,
        stats,
    })
}

/// Writes the listing of retained genes and the log of rejected symbols.
pub fn write_extraction_files(
    extraction: &Extraction,
    listing_path: &Path,
    error_log_path: &Path,
) -> SyncResult<()> {
    let io_error = |path: &Path, e: std::io::Error| {
        SyncError::new(
            ErrorCode::Io,
            format!("Could not write '{}': {e}", path.display()),
        )
    };

    let mut listing =
        BufWriter::new(File::create(listing_path).map_err(|e| io_error(listing_path, e))?);
    for gene in extraction.genes.values() {
        writeln!(listing, "{}\t{}", gene.stable_id, gene.symbol)
            .map_err(|e| io_error(listing_path, e))?;
    }
    listing.flush().map_err(|e| io_error(listing_path, e))?;

    let mut errors =
        BufWriter::new(File::create(error_log_path).map_err(|e| io_error(error_log_path, e))?);
    for issue in &extraction.issues {
        writeln!(errors, "{}", issue.log_line()).map_err(|e| io_error(error_log_path, e))?;
    }
    errors.flush().map_err(|e| io_error(error_log_path, e))?;
    Ok(())
}

/// Parses a GTF attribute column (`key "value"; key "value"; ...`). GFF3
/// style `key=value` pairs are accepted too.
pub fn parse_attribute_column(raw: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for part in raw.split(';') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (key, value) = match part.split_once('=') {
            Some((key, value)) => (key, value),
            None => {
                let mut pieces = part.splitn(2, char::is_whitespace);
                (
                    pieces.next().unwrap_or_default(),
                    pieces.next().unwrap_or_default(),
                )
            }
        };
        let key = key.trim();
        let value = value.trim().trim_matches('"').trim();
        if !key.is_empty() && !value.is_empty() {
            map.entry(key.to_string())
                .or_insert_with(|| value.to_string());
        }
    }
    map
}
