//! ChangeDetector: walks a knowledge-source root via `ignore` (honoring
//! .gitignore during directory traversal), applies FileFilter, collects
//! `(path, last_modified, size)`, and diffs against StateRepository to
//! produce a deterministic ChangeSet.

use std::collections::HashMap;
use std::path::Path;
use std::time::UNIX_EPOCH;

use ignore::WalkBuilder;
use rayon::prelude::*;
use sha2::{Digest, Sha256};

use crate::error::AppResult;
use crate::file_filter::FileFilter;
use crate::state_repository::{ChangeSet, StateRepository};

#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: String,
    pub last_modified_millis: i64,
    pub size_bytes: u64,
    pub checksum: Option<String>,
}

/// Walks `root`, returning every indexable file's `(path, last_modified,
/// size)`, in deterministic (path-sorted) order so that repeated scans over
/// an unchanged tree always report files in the same sequence.
pub fn scan_root(root: &Path, filter: &FileFilter) -> AppResult<Vec<ScannedFile>> {
    let mut files = Vec::new();
    let walker = WalkBuilder::new(root).hidden(false).follow_links(false).build();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let path = entry.path();
        let Some(file_type) = entry.file_type() else { continue };
        if !file_type.is_file() {
            continue;
        }
        let Ok(metadata) = entry.metadata() else { continue };
        let size = metadata.len();
        if !filter.is_indexable(path, root, size) {
            continue;
        }
        let last_modified_millis = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        files.push(ScannedFile {
            path: path.to_string_lossy().to_string(),
            last_modified_millis,
            size_bytes: size,
            checksum: None,
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// Content hash for the optional, verifier-only `IndexedFileRecord.checksum`
/// field. Never consulted by `detect_changes`.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Backfills `ScannedFile::checksum` for a batch of already-scanned files by
/// reading and hashing their contents in parallel. Used by the checksum
/// verifier, never by `detect_changes` itself, so a slow or unreadable file
/// only degrades verification, not change detection.
pub fn checksum_files(files: &mut [ScannedFile]) {
    let hashes: Vec<Option<String>> = files
        .par_iter()
        .map(|f| std::fs::read(&f.path).ok().map(|bytes| hash_bytes(&bytes)))
        .collect();
    for (file, hash) in files.iter_mut().zip(hashes.into_iter()) {
        file.checksum = hash;
    }
}

/// Scans `root` and diffs it against `state` to produce added/modified/
/// removed path lists. Does not mutate `state` — callers apply the
/// resulting ChangeSet only after every affected file's chunks have been
/// durably committed to both stores.
pub fn detect_changes(root: &Path, filter: &FileFilter, state: &StateRepository) -> AppResult<(ChangeSet, HashMap<String, ScannedFile>)> {
    let scanned = scan_root(root, filter)?;
    let mut current: HashMap<String, (i64, u64)> = HashMap::with_capacity(scanned.len());
    let mut by_path: HashMap<String, ScannedFile> = HashMap::with_capacity(scanned.len());
    for file in scanned {
        current.insert(file.path.clone(), (file.last_modified_millis, file.size_bytes));
        by_path.insert(file.path.clone(), file);
    }

    let changes = state.detect_changes(&current)?;
    Ok((changes, by_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_repository::IndexedFileRecord;
    use std::fs;

    #[test]
    fn scan_root_is_deterministic_and_skips_excluded() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.rs"), "fn b() {}").unwrap();
        fs::write(dir.path().join("a.rs"), "fn a() {}").unwrap();
        fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join("node_modules/pkg.js"), "x").unwrap();

        let filter = FileFilter::common_only(1_000_000);
        let files = scan_root(dir.path(), &filter).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();

        assert_eq!(files.len(), 2);
        assert!(paths[0] < paths[1]);
    }

    #[test]
    fn detect_changes_reports_new_files_as_added() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), "fn a() {}").unwrap();
        let filter = FileFilter::common_only(1_000_000);
        let state = StateRepository::open(&dir.path().join("state.db")).unwrap();

        let (changes, _) = detect_changes(dir.path(), &filter, &state).unwrap();
        assert_eq!(changes.added.len(), 1);
        assert!(changes.modified.is_empty());
        assert!(changes.removed.is_empty());
    }

    #[test]
    fn detect_changes_reports_removed_files() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateRepository::open(&dir.path().join("state.db")).unwrap();
        state
            .put_file(&IndexedFileRecord {
                file_path: dir.path().join("gone.rs").to_string_lossy().to_string(),
                last_modified_millis: 0,
                size_bytes: 1,
                indexed_at_millis: 0,
                checksum: None,
            })
            .unwrap();

        let filter = FileFilter::common_only(1_000_000);
        let (changes, _) = detect_changes(dir.path(), &filter, &state).unwrap();
        assert_eq!(changes.removed.len(), 1);
    }

    #[test]
    fn unchanged_file_produces_no_change() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), "fn a() {}").unwrap();
        let filter = FileFilter::common_only(1_000_000);
        let state = StateRepository::open(&dir.path().join("state.db")).unwrap();

        let (changes, by_path) = detect_changes(dir.path(), &filter, &state).unwrap();
        assert_eq!(changes.added.len(), 1);

        let scanned = by_path.values().next().unwrap();
        state
            .put_file(&IndexedFileRecord {
                file_path: scanned.path.clone(),
                last_modified_millis: scanned.last_modified_millis,
                size_bytes: scanned.size_bytes,
                indexed_at_millis: 0,
                checksum: None,
            })
            .unwrap();

        let (changes2, _) = detect_changes(dir.path(), &filter, &state).unwrap();
        assert!(changes2.is_empty());
    }

    #[test]
    fn checksum_files_hashes_existing_and_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("a.rs");
        fs::write(&present, "fn a() {}").unwrap();

        let mut files = vec![
            ScannedFile {
                path: present.to_string_lossy().to_string(),
                last_modified_millis: 0,
                size_bytes: 9,
                checksum: None,
            },
            ScannedFile {
                path: dir.path().join("missing.rs").to_string_lossy().to_string(),
                last_modified_millis: 0,
                size_bytes: 0,
                checksum: None,
            },
        ];

        checksum_files(&mut files);
        assert_eq!(files[0].checksum.as_deref(), Some(hash_bytes(b"fn a() {}").as_str()));
        assert!(files[1].checksum.is_none());
    }
}
