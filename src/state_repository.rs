//! StateRepository: the ledger of indexed files backing incremental
//! re-indexing and change detection. Backed by `rusqlite` (bundled SQLite)
//! rather than a JSON sidecar because the ledger needs real transactions.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::AppResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedFileRecord {
    pub file_path: String,
    pub last_modified_millis: i64,
    pub size_bytes: u64,
    pub indexed_at_millis: i64,
    /// Verifier-only: populated via SHA-256 but never compared by
    /// `detect_changes`, which keys off `(last_modified_millis, size_bytes)`.
    pub checksum: Option<String>,
}

pub struct StateRepository {
    conn: Connection,
}

impl StateRepository {
    pub fn open(db_path: &Path) -> AppResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS indexed_files (
                file_path           TEXT PRIMARY KEY,
                last_modified_millis INTEGER NOT NULL,
                size_bytes          INTEGER NOT NULL,
                indexed_at_millis   INTEGER NOT NULL,
                checksum            TEXT
            );
            CREATE TABLE IF NOT EXISTS meta (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(Self { conn })
    }

    pub fn put_file(&self, record: &IndexedFileRecord) -> AppResult<()> {
        self.conn.execute(
            "INSERT INTO indexed_files (file_path, last_modified_millis, size_bytes, indexed_at_millis, checksum)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(file_path) DO UPDATE SET
                last_modified_millis = excluded.last_modified_millis,
                size_bytes = excluded.size_bytes,
                indexed_at_millis = excluded.indexed_at_millis,
                checksum = excluded.checksum",
            params![record.file_path, record.last_modified_millis, record.size_bytes, record.indexed_at_millis, record.checksum],
        )?;
        Ok(())
    }

    pub fn put_files(&mut self, records: &[IndexedFileRecord]) -> AppResult<()> {
        let tx = self.conn.transaction()?;
        for record in records {
            tx.execute(
                "INSERT INTO indexed_files (file_path, last_modified_millis, size_bytes, indexed_at_millis, checksum)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(file_path) DO UPDATE SET
                    last_modified_millis = excluded.last_modified_millis,
                    size_bytes = excluded.size_bytes,
                    indexed_at_millis = excluded.indexed_at_millis,
                    checksum = excluded.checksum",
                params![record.file_path, record.last_modified_millis, record.size_bytes, record.indexed_at_millis, record.checksum],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn remove_file(&self, file_path: &str) -> AppResult<()> {
        self.conn.execute("DELETE FROM indexed_files WHERE file_path = ?1", params![file_path])?;
        Ok(())
    }

    pub fn remove_files(&mut self, file_paths: &[String]) -> AppResult<()> {
        let tx = self.conn.transaction()?;
        for path in file_paths {
            tx.execute("DELETE FROM indexed_files WHERE file_path = ?1", params![path])?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn all_files(&self) -> AppResult<HashMap<String, IndexedFileRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT file_path, last_modified_millis, size_bytes, indexed_at_millis, checksum FROM indexed_files")?;
        let rows = stmt.query_map([], |row| {
            Ok(IndexedFileRecord {
                file_path: row.get(0)?,
                last_modified_millis: row.get(1)?,
                size_bytes: row.get::<_, i64>(2)? as u64,
                indexed_at_millis: row.get(3)?,
                checksum: row.get(4)?,
            })
        })?;
        let mut out = HashMap::new();
        for row in rows {
            let record = row?;
            out.insert(record.file_path.clone(), record);
        }
        Ok(out)
    }

    pub fn get_file(&self, file_path: &str) -> AppResult<Option<IndexedFileRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT file_path, last_modified_millis, size_bytes, indexed_at_millis, checksum FROM indexed_files WHERE file_path = ?1",
                params![file_path],
                |row| {
                    Ok(IndexedFileRecord {
                        file_path: row.get(0)?,
                        last_modified_millis: row.get(1)?,
                        size_bytes: row.get::<_, i64>(2)? as u64,
                        indexed_at_millis: row.get(3)?,
                        checksum: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    pub fn meta_get(&self, key: &str) -> AppResult<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    pub fn meta_set(&self, key: &str, value: &str) -> AppResult<()> {
        self.conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// A file is `toUpdate` iff its `last_modified_millis` or `size_bytes`
    /// differs from the ledger. Content hashes are never consulted
    /// here — `checksum` is carried for external verification only.
    pub fn detect_changes(&self, current: &HashMap<String, (i64, u64)>) -> AppResult<ChangeSet> {
        let existing = self.all_files()?;

        let mut added = Vec::new();
        let mut modified = Vec::new();
        for (path, (last_modified, size)) in current {
            match existing.get(path) {
                None => added.push(path.clone()),
                Some(record) if record.last_modified_millis != *last_modified || record.size_bytes != *size => {
                    modified.push(path.clone())
                }
                Some(_) => {}
            }
        }
        let mut removed: Vec<String> = existing.keys().filter(|p| !current.contains_key(*p)).cloned().collect();

        added.sort();
        modified.sort();
        removed.sort();
        Ok(ChangeSet { added, modified, removed })
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, last_modified: i64, size: u64) -> IndexedFileRecord {
        IndexedFileRecord {
            file_path: path.to_string(),
            last_modified_millis: last_modified,
            size_bytes: size,
            indexed_at_millis: 1000,
            checksum: Some("deadbeef".to_string()),
        }
    }

    #[test]
    fn put_and_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let repo = StateRepository::open(&dir.path().join("state.db")).unwrap();
        repo.put_file(&record("/p/a.rs", 100, 50)).unwrap();

        let got = repo.get_file("/p/a.rs").unwrap().unwrap();
        assert_eq!(got.size_bytes, 50);
    }

    #[test]
    fn remove_file_deletes_record() {
        let dir = tempfile::tempdir().unwrap();
        let repo = StateRepository::open(&dir.path().join("state.db")).unwrap();
        repo.put_file(&record("/p/a.rs", 100, 50)).unwrap();
        repo.remove_file("/p/a.rs").unwrap();
        assert!(repo.get_file("/p/a.rs").unwrap().is_none());
    }

    #[test]
    fn meta_get_set_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let repo = StateRepository::open(&dir.path().join("state.db")).unwrap();
        assert!(repo.meta_get("schema_version").unwrap().is_none());
        repo.meta_set("schema_version", "1").unwrap();
        assert_eq!(repo.meta_get("schema_version").unwrap().unwrap(), "1");
    }

    #[test]
    fn detect_changes_classifies_added_modified_removed() {
        let dir = tempfile::tempdir().unwrap();
        let repo = StateRepository::open(&dir.path().join("state.db")).unwrap();
        repo.put_file(&record("/p/a.rs", 100, 50)).unwrap();
        repo.put_file(&record("/p/b.rs", 100, 50)).unwrap();

        let mut current = HashMap::new();
        current.insert("/p/a.rs".to_string(), (100, 50));
        current.insert("/p/b.rs".to_string(), (200, 50));
        current.insert("/p/c.rs".to_string(), (100, 10));

        let changes = repo.detect_changes(&current).unwrap();
        assert_eq!(changes.added, vec!["/p/c.rs".to_string()]);
        assert_eq!(changes.modified, vec!["/p/b.rs".to_string()]);
        assert_eq!(changes.removed, Vec::<String>::new());
    }

    #[test]
    fn unchanged_last_modified_and_size_produce_empty_changeset() {
        let dir = tempfile::tempdir().unwrap();
        let repo = StateRepository::open(&dir.path().join("state.db")).unwrap();
        repo.put_file(&record("/p/a.rs", 100, 50)).unwrap();

        let mut current = HashMap::new();
        current.insert("/p/a.rs".to_string(), (100, 50));

        let changes = repo.detect_changes(&current).unwrap();
        assert!(changes.is_empty());
    }
}
