//! SQLite-backed registry.

use crate::config::{DependentTable, is_sql_identifier};
use crate::error::{ErrorCode, SyncError, SyncResult};
use crate::registry::{
    DiseaseLink, RegistrySnapshot, RegistryStore, UpdateMeta, XrefSnapshot, build_xref_snapshot,
};
use locus_protocol::{
    Coordinates, GeneRecord, IdentifierKind, LocusId, RegistryEntry, StableId, Strand,
};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;

const SYNONYM_ATTRIB: &str = "gene_synonym";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sequence (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS source (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS attrib_type (
    id INTEGER PRIMARY KEY,
    code TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS locus (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    sequence_id INTEGER NOT NULL,
    start INTEGER NOT NULL,
    `end` INTEGER NOT NULL,
    strand INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS locus_identifier (
    id INTEGER PRIMARY KEY,
    locus_id INTEGER NOT NULL,
    source_id INTEGER NOT NULL,
    identifier TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS locus_attrib (
    id INTEGER PRIMARY KEY,
    locus_id INTEGER NOT NULL,
    attrib_type_id INTEGER NOT NULL,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS disease (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS locus_genotype_disease (
    id INTEGER PRIMARY KEY,
    record_id TEXT NOT NULL,
    locus_id INTEGER,
    disease_id INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS meta (
    id INTEGER PRIMARY KEY,
    `key` TEXT NOT NULL,
    date_update TEXT NOT NULL,
    is_public INTEGER NOT NULL DEFAULT 0,
    description TEXT NOT NULL,
    version TEXT NOT NULL,
    source TEXT NOT NULL
);
INSERT OR IGNORE INTO source(name) VALUES ('Ensembl'), ('HGNC'), ('OMIM');
INSERT OR IGNORE INTO attrib_type(code) VALUES ('gene_synonym');
";

pub struct SqliteRegistry {
    conn: Connection,
}

impl SqliteRegistry {
    pub fn open(path: &Path) -> SyncResult<Self> {
        let conn = Connection::open(path).map_err(|e| {
            SyncError::new(
                ErrorCode::Storage,
                format!("Could not open registry '{}': {e}", path.display()),
            )
        })?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> SyncResult<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// Creates the registry tables if missing and seeds the identifier sources.
    pub fn create_schema(&self) -> SyncResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub fn add_sequence(&self, name: &str) -> SyncResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO sequence(name) VALUES (?1)",
            params![name],
        )?;
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn position(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn source_id(conn: &Connection, kind: IdentifierKind) -> SyncResult<i64> {
    conn.query_row(
        "SELECT id FROM source WHERE name = ?1",
        params![kind.source_name()],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| {
        SyncError::new(
            ErrorCode::NotFound,
            format!("Source '{}' not found", kind.source_name()),
        )
    })
}

fn sequence_id(conn: &Connection, name: &str) -> SyncResult<i64> {
    conn.query_row(
        "SELECT id FROM sequence WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| SyncError::new(ErrorCode::NotFound, format!("Sequence '{name}' not found")))
}

fn synonym_attrib_id(conn: &Connection) -> SyncResult<i64> {
    conn.query_row(
        "SELECT id FROM attrib_type WHERE code = ?1",
        params![SYNONYM_ATTRIB],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| {
        SyncError::new(
            ErrorCode::NotFound,
            format!("Attribute type '{SYNONYM_ATTRIB}' not found"),
        )
    })
}

fn require_locus(conn: &Connection, locus_id: LocusId) -> SyncResult<()> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT id FROM locus WHERE id = ?1",
            params![locus_id],
            |row| row.get(0),
        )
        .optional()?;
    match found {
        Some(_) => Ok(()),
        None => Err(SyncError::new(
            ErrorCode::NotFound,
            format!("Locus {locus_id} not found"),
        )),
    }
}

fn insert_synonym(tx: &Transaction<'_>, locus_id: LocusId, symbol: &str) -> SyncResult<()> {
    let attrib_type_id = synonym_attrib_id(tx)?;
    tx.execute(
        "INSERT INTO locus_attrib(locus_id, attrib_type_id, value) VALUES (?1, ?2, ?3)",
        params![locus_id, attrib_type_id, symbol],
    )?;
    Ok(())
}

fn read_synonyms(conn: &Connection) -> SyncResult<BTreeMap<LocusId, BTreeSet<String>>> {
    let mut stmt = conn.prepare(
        "SELECT la.locus_id, la.value FROM locus_attrib la
         JOIN attrib_type t ON t.id = la.attrib_type_id
         WHERE t.code = ?1",
    )?;
    let rows = stmt.query_map(params![SYNONYM_ATTRIB], |row| {
        Ok((row.get::<_, LocusId>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut out: BTreeMap<LocusId, BTreeSet<String>> = BTreeMap::new();
    for row in rows {
        let (locus_id, value) = row?;
        out.entry(locus_id).or_default().insert(value);
    }
    Ok(out)
}

fn read_entries(conn: &Connection) -> SyncResult<BTreeMap<StableId, RegistryEntry>> {
    let mut synonyms = read_synonyms(conn)?;
    let mut stmt = conn.prepare(
        "SELECT l.id, li.identifier, l.name, s.name, l.start, l.`end`, l.strand
         FROM locus l
         JOIN locus_identifier li ON li.locus_id = l.id
         JOIN source src ON src.id = li.source_id
         JOIN sequence s ON s.id = l.sequence_id
         WHERE src.name = ?1",
    )?;
    let rows = stmt.query_map(params![IdentifierKind::StableId.source_name()], |row| {
        Ok(RegistryEntry {
            locus_id: row.get(0)?,
            stable_id: row.get(1)?,
            symbol: row.get(2)?,
            sequence_name: row.get(3)?,
            start: position(row.get(4)?),
            end: position(row.get(5)?),
            strand: Strand::from_registry(row.get(6)?),
            synonyms: BTreeSet::new(),
        })
    })?;
    let mut out = BTreeMap::new();
    for row in rows {
        let mut entry = row?;
        entry.synonyms = synonyms.remove(&entry.locus_id).unwrap_or_default();
        out.insert(entry.stable_id.clone(), entry);
    }
    Ok(out)
}

fn read_unreferenced(
    conn: &Connection,
    usage_tables: &[DependentTable],
) -> SyncResult<BTreeMap<StableId, LocusId>> {
    let mut sql = String::from(
        "SELECT li.identifier, l.id FROM locus l
         JOIN locus_identifier li ON li.locus_id = l.id
         JOIN source src ON src.id = li.source_id
         WHERE src.name = ?1",
    );
    for table in usage_tables {
        checked_table(table)?;
        sql.push_str(&format!(
            " AND NOT EXISTS (SELECT 1 FROM {t} WHERE {t}.{c} = l.id)",
            t = table.table,
            c = table.column
        ));
    }
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![IdentifierKind::StableId.source_name()], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, LocusId>(1)?))
    })?;
    let mut out = BTreeMap::new();
    for row in rows {
        let (stable_id, locus_id) = row?;
        out.insert(stable_id, locus_id);
    }
    Ok(out)
}

fn read_identifiers(
    conn: &Connection,
) -> SyncResult<BTreeMap<LocusId, BTreeMap<IdentifierKind, String>>> {
    let mut stmt = conn.prepare(
        "SELECT li.locus_id, src.name, li.identifier FROM locus_identifier li
         JOIN source src ON src.id = li.source_id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, LocusId>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;
    let mut out: BTreeMap<LocusId, BTreeMap<IdentifierKind, String>> = BTreeMap::new();
    for row in rows {
        let (locus_id, source, value) = row?;
        if let Some(kind) = IdentifierKind::from_source_name(&source) {
            out.entry(locus_id).or_default().insert(kind, value);
        }
    }
    Ok(out)
}

fn checked_table(table: &DependentTable) -> SyncResult<()> {
    if is_sql_identifier(&table.table) && is_sql_identifier(&table.column) {
        Ok(())
    } else {
        Err(SyncError::new(
            ErrorCode::InvalidInput,
            format!("'{}.{}' is not a valid table/column name", table.table, table.column),
        ))
    }
}

impl RegistryStore for SqliteRegistry {
    fn list_entries_by_authority(&self) -> SyncResult<BTreeMap<StableId, RegistryEntry>> {
        read_entries(&self.conn)
    }

    fn list_entries_by_symbol(&self) -> SyncResult<BTreeMap<String, StableId>> {
        Ok(read_entries(&self.conn)?
            .into_values()
            .map(|entry| (entry.symbol, entry.stable_id))
            .collect())
    }

    fn list_unreferenced_entries(
        &self,
        usage_tables: &[DependentTable],
    ) -> SyncResult<BTreeMap<StableId, LocusId>> {
        read_unreferenced(&self.conn, usage_tables)
    }

    fn list_identifiers(&self) -> SyncResult<BTreeMap<LocusId, BTreeMap<IdentifierKind, String>>> {
        read_identifiers(&self.conn)
    }

    fn count_dangling_fk(&self, table: &DependentTable) -> SyncResult<u64> {
        checked_table(table)?;
        let sql = format!(
            "SELECT COUNT(*) FROM {t} LEFT JOIN locus l ON l.id = {t}.{c}
             WHERE l.id IS NULL AND {t}.{c} IS NOT NULL",
            t = table.table,
            c = table.column
        );
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(position(count))
    }

    fn list_disease_links(&self) -> SyncResult<Vec<DiseaseLink>> {
        let mut stmt = self.conn.prepare(
            "SELECT lgd.record_id, l.name, d.name FROM locus_genotype_disease lgd
             JOIN disease d ON d.id = lgd.disease_id
             JOIN locus l ON l.id = lgd.locus_id
             ORDER BY lgd.record_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(DiseaseLink {
                record_id: row.get(0)?,
                gene_symbol: row.get(1)?,
                disease_name: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn create_locus(&mut self, record: &GeneRecord) -> SyncResult<LocusId> {
        let tx = self.conn.transaction()?;
        let sequence_id = sequence_id(&tx, &record.sequence_name)?;
        let source_id = source_id(&tx, IdentifierKind::StableId)?;
        tx.execute(
            "INSERT INTO locus(name, sequence_id, start, `end`, strand) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.symbol,
                sequence_id,
                record.start as i64,
                record.end as i64,
                record.strand.as_registry()
            ],
        )?;
        let locus_id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO locus_identifier(locus_id, source_id, identifier) VALUES (?1, ?2, ?3)",
            params![locus_id, source_id, record.stable_id],
        )?;
        tx.commit()?;
        debug!(locus_id, stable_id = %record.stable_id, "locus created");
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
        let tx = self.conn.transaction()?;
        require_locus(&tx, locus_id)?;
        tx.execute(
            "UPDATE locus SET name = ?1 WHERE id = ?2",
            params![symbol, locus_id],
        )?;
        if let Some(old) = demoted {
            insert_synonym(&tx, locus_id, old)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn add_synonym(&mut self, locus_id: LocusId, symbol: &str) -> SyncResult<()> {
        let tx = self.conn.transaction()?;
        require_locus(&tx, locus_id)?;
        insert_synonym(&tx, locus_id, symbol)?;
        tx.commit()?;
        Ok(())
    }

    fn update_coordinates(&mut self, locus_id: LocusId, current: &Coordinates) -> SyncResult<()> {
        let tx = self.conn.transaction()?;
        require_locus(&tx, locus_id)?;
        let sequence_id = sequence_id(&tx, &current.sequence_name)?;
        tx.execute(
            "UPDATE locus SET sequence_id = ?1, start = ?2, `end` = ?3 WHERE id = ?4",
            params![
                sequence_id,
                current.start as i64,
                current.end as i64,
                locus_id
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn upsert_identifier(
        &mut self,
        locus_id: LocusId,
        kind: IdentifierKind,
        value: &str,
        replace: bool,
    ) -> SyncResult<()> {
        let tx = self.conn.transaction()?;
        require_locus(&tx, locus_id)?;
        let source_id = source_id(&tx, kind)?;
        if replace {
            let changed = tx.execute(
                "UPDATE locus_identifier SET identifier = ?1 WHERE locus_id = ?2 AND source_id = ?3",
                params![value, locus_id, source_id],
            )?;
            if changed == 0 {
                return Err(SyncError::new(
                    ErrorCode::NotFound,
                    format!("Locus {locus_id} has no {kind} to update"),
                ));
            }
        } else {
            tx.execute(
                "INSERT INTO locus_identifier(locus_id, source_id, identifier) VALUES (?1, ?2, ?3)",
                params![locus_id, source_id, value],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_locus(&mut self, locus_id: LocusId) -> SyncResult<()> {
        let tx = self.conn.transaction()?;
        require_locus(&tx, locus_id)?;
        tx.execute(
            "DELETE FROM locus_identifier WHERE locus_id = ?1",
            params![locus_id],
        )?;
        tx.execute(
            "DELETE FROM locus_attrib WHERE locus_id = ?1",
            params![locus_id],
        )?;
        tx.execute("DELETE FROM locus WHERE id = ?1", params![locus_id])?;
        tx.commit()?;
        debug!(locus_id, "locus deleted");
        Ok(())
    }

    fn record_update(&mut self, meta: &UpdateMeta) -> SyncResult<()> {
        self.conn.execute(
            "INSERT INTO meta(`key`, date_update, is_public, description, version, source)
             VALUES (?1, ?2, 0, ?3, ?4, ?5)",
            params![
                meta.key,
                meta.date_update,
                meta.description,
                meta.version,
                meta.source
            ],
        )?;
        Ok(())
    }

    fn snapshot(&self, usage_tables: &[DependentTable]) -> SyncResult<RegistrySnapshot> {
        let tx = self.conn.unchecked_transaction()?;
        let by_stable_id = read_entries(&tx)?;
        let by_symbol = by_stable_id
            .values()
            .map(|entry| (entry.symbol.clone(), entry.stable_id.clone()))
            .collect();
        let unreferenced = read_unreferenced(&tx, usage_tables)?;
        tx.commit()?;
        Ok(RegistrySnapshot {
            by_stable_id,
            by_symbol,
            unreferenced,
        })
    }

    fn xref_snapshot(&self) -> SyncResult<XrefSnapshot> {
        let tx = self.conn.unchecked_transaction()?;
        let entries = read_entries(&tx)?;
        let mut identifiers = read_identifiers(&tx)?;
        tx.commit()?;
        Ok(build_xref_snapshot(entries, &mut identifiers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_foreign_key_tables, default_usage_tables};

    fn registry() -> SqliteRegistry {
        let registry = SqliteRegistry::open_in_memory().unwrap();
        registry.create_schema().unwrap();
        registry
            .connection()
            .execute_batch(
                "CREATE TABLE gene_stats (id INTEGER PRIMARY KEY, gene_id INTEGER);
                 CREATE TABLE uniprot_annotation (id INTEGER PRIMARY KEY, gene_id INTEGER);
                 CREATE TABLE gene_disease (id INTEGER PRIMARY KEY, gene_id INTEGER);
                 CREATE TABLE gene2phenotype_app_historicallocusgenotypedisease (
                     id INTEGER PRIMARY KEY, locus_id INTEGER);",
            )
            .unwrap();
        for name in ["1", "X"] {
            registry.add_sequence(name).unwrap();
        }
        registry
    }

    fn record(stable_id: &str, symbol: &str) -> GeneRecord {
        GeneRecord {
            stable_id: stable_id.to_string(),
            symbol: symbol.to_string(),
            sequence_name: "1".to_string(),
            start: 100,
            end: 200,
            strand: Strand::Reverse,
        }
    }

    #[test]
    fn test_create_and_snapshot() {
        let mut registry = registry();
        let foo = registry.create_locus(&record("ENSG001", "FOO")).unwrap();
        let bar = registry.create_locus(&record("ENSG002", "BAR")).unwrap();
        registry.add_synonym(foo, "FOO_OLD").unwrap();
        registry
            .connection()
            .execute("INSERT INTO gene_stats(gene_id) VALUES (?1)", params![bar])
            .unwrap();

        let snapshot = registry.snapshot(&default_usage_tables()).unwrap();
        let entry = snapshot.entry("ENSG001").unwrap();
        assert_eq!(entry.locus_id, foo);
        assert_eq!(entry.strand, Strand::Reverse);
        assert!(entry.synonyms.contains("FOO_OLD"));
        assert_eq!(snapshot.by_symbol["BAR"], "ENSG002");
        assert_eq!(snapshot.unreferenced_locus("ENSG001"), Some(foo));
        assert_eq!(snapshot.unreferenced_locus("ENSG002"), None);
    }

    #[test]
    fn test_unknown_sequence_leaves_no_rows() {
        let mut registry = registry();
        let mut rec = record("ENSG003", "BAZ");
        rec.sequence_name = "MT".to_string();
        let err = registry.create_locus(&rec).unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
        assert!(registry.list_entries_by_authority().unwrap().is_empty());
    }

    #[test]
    fn test_writes_keep_foreign_keys_intact() {
        let mut registry = registry();
        let locus = registry.create_locus(&record("ENSG004", "QUX")).unwrap();
        registry
            .upsert_identifier(locus, IdentifierKind::Hgnc, "HGNC:4", false)
            .unwrap();
        registry
            .upsert_identifier(locus, IdentifierKind::Hgnc, "HGNC:40", true)
            .unwrap();
        registry.rename_identifier(locus, "ENSG044").unwrap();
        registry.update_symbol(locus, "QUX2", Some("QUX")).unwrap();
        registry
            .update_coordinates(
                locus,
                &Coordinates {
                    sequence_name: "X".to_string(),
                    start: 5,
                    end: 50,
                },
            )
            .unwrap();

        let xrefs = registry.xref_snapshot().unwrap();
        let entry = xrefs.entry("ENSG044").unwrap();
        assert_eq!(entry.symbol, "QUX2");
        assert!(entry.has_synonym("QUX"));
        assert_eq!(entry.identifiers[&IdentifierKind::Hgnc], "HGNC:40");

        registry.delete_locus(locus).unwrap();
        for table in default_foreign_key_tables() {
            assert_eq!(registry.count_dangling_fk(&table).unwrap(), 0, "{}", table.table);
        }
    }

    #[test]
    fn test_dangling_rows_are_counted() {
        let registry = registry();
        registry
            .connection()
            .execute_batch(
                "INSERT INTO gene_disease(gene_id) VALUES (999);
                 INSERT INTO gene_disease(gene_id) VALUES (NULL);",
            )
            .unwrap();
        let count = registry
            .count_dangling_fk(&DependentTable::new("gene_disease", "gene_id"))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_disease_links_and_meta() {
        let mut registry = registry();
        let locus = registry.create_locus(&record("ENSG005", "ABC1")).unwrap();
        registry
            .connection()
            .execute_batch("INSERT INTO disease(id, name) VALUES (1, 'ABC1-related disorder');")
            .unwrap();
        registry
            .connection()
            .execute(
                "INSERT INTO locus_genotype_disease(record_id, locus_id, disease_id) VALUES ('G2P00001', ?1, 1)",
                params![locus],
            )
            .unwrap();
        let links = registry.list_disease_links().unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].gene_symbol, "ABC1");

        registry
            .record_update(&UpdateMeta {
                key: "locus_gene_update".to_string(),
                description: "Update genes to Ensembl release 112".to_string(),
                version: "112".to_string(),
                source: "Ensembl".to_string(),
                date_update: "2026-10-17 00:00:00".to_string(),
            })
            .unwrap();
        let count: i64 = registry
            .connection()
            .query_row("SELECT COUNT(*) FROM meta", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
