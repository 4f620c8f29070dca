use crate::error::{ErrorCode, SyncError, SyncResult};
use crate::registry::{LOCUS_IDENTIFIER_TABLE, LOCUS_SYNONYM_TABLE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_ANNOTATION_URL_TEMPLATE: &str = "https://ftp.ensembl.org/pub/release-{release}/gtf/homo_sapiens/Homo_sapiens.GRCh38.{release}.chr.gtf.gz";
pub const DEFAULT_XREF_URL: &str =
    "https://storage.googleapis.com/public-download-files/hgnc/tsv/tsv/hgnc_complete_set.txt";

/// Inclusive coordinate window on one sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParWindow {
    pub sequence_name: String,
    pub start: u64,
    pub end: u64,
}

impl ParWindow {
    pub fn new(sequence_name: &str, start: u64, end: u64) -> Self {
        Self {
            sequence_name: sequence_name.to_string(),
            start,
            end,
        }
    }

    pub fn contains(&self, sequence_name: &str, start: u64, end: u64) -> bool {
        self.sequence_name == sequence_name && start >= self.start && end <= self.end
    }
}

/// GRCh38 pseudoautosomal regions, two on each sex chromosome.
pub fn default_par_windows() -> Vec<ParWindow> {
    vec![
        ParWindow::new("X", 10_001, 2_781_479),
        ParWindow::new("X", 155_701_383, 156_030_895),
        ParWindow::new("Y", 10_001, 2_781_479),
        ParWindow::new("Y", 56_887_903, 57_217_415),
    ]
}

/// A table holding a foreign key into the locus registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependentTable {
    pub table: String,
    pub column: String,
}

impl DependentTable {
    pub fn new(table: &str, column: &str) -> Self {
        Self {
            table: table.to_string(),
            column: column.to_string(),
        }
    }
}

/// Every table checked by the integrity guard, including the tables the
/// registry owns itself.
pub fn default_foreign_key_tables() -> Vec<DependentTable> {
    vec![
        DependentTable::new("locus_identifier", "locus_id"),
        DependentTable::new("locus_attrib", "locus_id"),
        DependentTable::new("locus_genotype_disease", "locus_id"),
        DependentTable::new("uniprot_annotation", "gene_id"),
        DependentTable::new("gene_stats", "gene_id"),
        DependentTable::new("gene_disease", "gene_id"),
        DependentTable::new("gene2phenotype_app_historicallocusgenotypedisease", "locus_id"),
    ]
}

/// Tables whose rows mark a locus as in use; such loci are never deleted.
pub fn default_usage_tables() -> Vec<DependentTable> {
    vec![
        DependentTable::new("locus_genotype_disease", "locus_id"),
        DependentTable::new("gene_stats", "gene_id"),
        DependentTable::new("uniprot_annotation", "gene_id"),
        DependentTable::new("gene_disease", "gene_id"),
        DependentTable::new("gene2phenotype_app_historicallocusgenotypedisease", "locus_id"),
    ]
}

fn default_exclude_biotypes() -> Vec<String> {
    vec!["pseudogene".to_string(), "misc_RNA".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub working_dir: PathBuf,
    pub database_path: PathBuf,
    pub annotation_url_template: String,
    pub xref_url: String,
    pub assembly: String,
    pub exclude_biotypes: Vec<String>,
    pub par_windows: Vec<ParWindow>,
    pub foreign_key_tables: Vec<DependentTable>,
    pub usage_tables: Vec<DependentTable>,
    pub check_disease_names: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            database_path: PathBuf::from("registry.sqlite"),
            annotation_url_template: DEFAULT_ANNOTATION_URL_TEMPLATE.to_string(),
            xref_url: DEFAULT_XREF_URL.to_string(),
            assembly: "GRCh38".to_string(),
            exclude_biotypes: default_exclude_biotypes(),
            par_windows: default_par_windows(),
            foreign_key_tables: default_foreign_key_tables(),
            usage_tables: default_usage_tables(),
            check_disease_names: true,
        }
    }
}

impl SyncConfig {
    pub fn from_json_file(path: &str) -> SyncResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            SyncError::new(ErrorCode::Io, format!("Could not read config '{path}': {e}"))
        })?;
        let mut config: SyncConfig = serde_json::from_str(&text).map_err(|e| {
            SyncError::new(
                ErrorCode::InvalidInput,
                format!("Could not parse config '{path}': {e}"),
            )
        })?;
        let base = Path::new(path)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.working_dir = resolve_relative(&base, &config.working_dir);
        config.database_path = resolve_relative(&base, &config.database_path);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.working_dir.as_os_str().is_empty() {
            return Err(SyncError::new(
                ErrorCode::InvalidInput,
                "Config: working_dir must not be empty",
            ));
        }
        for window in &self.par_windows {
            if window.start == 0 || window.end < window.start {
                return Err(SyncError::new(
                    ErrorCode::InvalidInput,
                    format!(
                        "Config: invalid PAR window {}:{}-{}",
                        window.sequence_name, window.start, window.end
                    ),
                ));
            }
        }
        for table in self.foreign_key_tables.iter().chain(&self.usage_tables) {
            if !is_sql_identifier(&table.table) || !is_sql_identifier(&table.column) {
                return Err(SyncError::new(
                    ErrorCode::InvalidInput,
                    format!(
                        "Config: '{}.{}' is not a valid table/column name",
                        table.table, table.column
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Tables consulted before deleting a locus: the usage tables plus every
    /// foreign-key table outside the registry's own identifier and synonym
    /// tables. A locus the closing integrity check would count as referenced
    /// is never offered for deletion.
    pub fn reference_tables(&self) -> Vec<DependentTable> {
        let mut tables = self.usage_tables.clone();
        for table in &self.foreign_key_tables {
            let owned = table.table == LOCUS_IDENTIFIER_TABLE || table.table == LOCUS_SYNONYM_TABLE;
            if !owned && !tables.contains(table) {
                tables.push(table.clone());
            }
        }
        tables
    }

    pub fn annotation_url(&self, release: &str) -> String {
        self.annotation_url_template.replace("{release}", release)
    }

    /// Local file name of the downloaded annotation feed for `release`.
    pub fn annotation_file_name(&self, release: &str) -> String {
        let url = self.annotation_url(release);
        url.rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("annotation.{release}.gtf.gz"))
    }

    pub fn xref_file_name(&self) -> String {
        self.xref_url
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("hgnc_complete_set.txt")
            .to_string()
    }

    pub fn listing_file_name(&self) -> String {
        format!("ensembl_genes_{}.txt", self.assembly.to_ascii_lowercase())
    }

    pub fn extraction_error_log_name(&self) -> String {
        format!("ensembl_genes_{}_error.log", self.assembly.to_ascii_lowercase())
    }
}

fn resolve_relative(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Table and column names are interpolated into SQL, so only plain
/// identifiers are accepted.
pub fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
