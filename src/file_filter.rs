//! FileFilter: pure decision of whether a path is indexable, given
//! common-exclude globs, project-type-specific exclude globs, the
//! supported-extension set, a size cap, and the hidden-file rule.

use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::{self, COMMON_EXCLUDE_GLOBS, PROJECT_TYPE_RULES};

/// Exact file names rejected outright regardless of extension.
const EXACT_EXCLUDE_NAMES: &[&str] = &["thumbs.db", ".ds_store", "desktop.ini"];

pub struct FileFilter {
    exclude_globs: GlobSet,
    max_file_bytes: u64,
}

impl FileFilter {
    /// Builds a filter for a single knowledge-source root: detects which
    /// project types the root matches (by marker string/glob against the
    /// root's direct entries) and folds in their exclude globs on top of
    /// the common set.
    pub fn for_root(root: &Path, max_file_bytes: u64) -> std::io::Result<Self> {
        let root_entries = list_root_entries(root)?;
        let detected_types = detect_project_types(&root_entries);

        let mut patterns: Vec<&str> = COMMON_EXCLUDE_GLOBS.to_vec();
        for rule in detected_types {
            patterns.extend_from_slice(rule.exclude_globs);
        }

        Ok(Self {
            exclude_globs: build_globset(&patterns),
            max_file_bytes,
        })
    }

    /// Builds a filter with only the common excludes, for callers that
    /// have not enumerated the root (e.g. a single-file watcher event).
    pub fn common_only(max_file_bytes: u64) -> Self {
        Self {
            exclude_globs: build_globset(COMMON_EXCLUDE_GLOBS),
            max_file_bytes,
        }
    }

    /// `is_indexable(path, root) -> bool`. `path` may be absolute or
    /// root-relative; only the root-relative portion is glob-matched.
    pub fn is_indexable(&self, path: &Path, root: &Path, size_bytes: u64) -> bool {
        let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().to_lowercase()) else {
            return false;
        };

        if file_name.starts_with('.') && file_name != ".gitignore" && file_name != ".env" {
            return false;
        }

        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if !ext.is_empty() && config::is_binary_extension(&ext) {
            return false;
        }

        if EXACT_EXCLUDE_NAMES.contains(&file_name.as_str()) {
            return false;
        }

        let relative = path.strip_prefix(root).unwrap_or(path);
        if self.exclude_globs.is_match(relative) {
            return false;
        }

        let supported = config::is_supported_extension(&ext) || is_extensionless_marker(&file_name);
        if !supported {
            return false;
        }

        if size_bytes > self.max_file_bytes {
            return false;
        }

        true
    }
}

/// Marker files commonly indexed without a recognized extension.
fn is_extensionless_marker(lowercase_name: &str) -> bool {
    matches!(
        lowercase_name,
        "dockerfile" | "makefile" | "cmakelists.txt" | "readme" | "license"
            | "changelog" | "contributing" | ".gitignore" | ".env"
    )
}

fn list_root_entries(root: &Path) -> std::io::Result<Vec<String>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        entries.push(entry.file_name().to_string_lossy().to_string());
    }
    Ok(entries)
}

/// A project type matches if any marker string equals a root entry exactly,
/// or (when it contains `*`) regex-matches one via glob semantics.
fn detect_project_types(root_entries: &[String]) -> Vec<&'static config::ProjectTypeRule> {
    let mut matched = Vec::new();
    for rule in PROJECT_TYPE_RULES {
        let is_match = rule.markers.iter().any(|marker| {
            if marker.contains('*') {
                Glob::new(marker)
                    .ok()
                    .map(|g| g.compile_matcher())
                    .is_some_and(|m| root_entries.iter().any(|e| m.is_match(e)))
            } else {
                root_entries.iter().any(|e| e == marker)
            }
        });
        if is_match {
            matched.push(rule);
        }
    }
    matched
}

/// Glob semantics per spec: `foo/` matches any path containing a `/foo/`
/// segment or starting with `foo/`; `*.x` matches by filename; bare tokens
/// match by filename equality or as an interior path segment.
fn build_globset(patterns: &[&str]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        for expanded in expand_pattern(pattern) {
            if let Ok(glob) = Glob::new(&expanded) {
                builder.add(glob);
            }
        }
    }
    builder.build().unwrap_or_else(|_| GlobSetBuilder::new().build().unwrap())
}

fn expand_pattern(pattern: &str) -> Vec<String> {
    if let Some(dir) = pattern.strip_suffix('/') {
        vec![format!("{dir}/**"), format!("**/{dir}/**"), dir.to_string()]
    } else if pattern.starts_with("*.") {
        vec![format!("**/{pattern}"), pattern.to_string()]
    } else {
        vec![pattern.to_string(), format!("**/{pattern}"), format!("**/{pattern}/**")]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn filter(max_bytes: u64) -> FileFilter {
        FileFilter::common_only(max_bytes)
    }

    #[test]
    fn hidden_files_rejected() {
        let f = filter(1_000_000);
        let root = Path::new("/p");
        assert!(!f.is_indexable(Path::new("/p/.secret"), root, 10));
    }

    #[test]
    fn binary_extension_rejected() {
        let f = filter(1_000_000);
        let root = Path::new("/p");
        assert!(!f.is_indexable(Path::new("/p/photo.png"), root, 10));
    }

    #[test]
    fn common_exclude_dir_rejected() {
        let f = filter(1_000_000);
        let root = Path::new("/p");
        assert!(!f.is_indexable(Path::new("/p/node_modules/pkg/index.js"), root, 10));
        assert!(!f.is_indexable(Path::new("/p/target/debug/foo.rs"), root, 10));
    }

    #[test]
    fn unsupported_extension_rejected() {
        let f = filter(1_000_000);
        let root = Path::new("/p");
        assert!(!f.is_indexable(Path::new("/p/binary.bin"), root, 10));
    }

    #[test]
    fn file_at_exactly_max_bytes_is_indexed() {
        let f = filter(100);
        let root = Path::new("/p");
        assert!(f.is_indexable(Path::new("/p/main.rs"), root, 100));
    }

    #[test]
    fn file_one_byte_over_max_is_skipped() {
        let f = filter(100);
        let root = Path::new("/p");
        assert!(!f.is_indexable(Path::new("/p/main.rs"), root, 101));
    }

    #[test]
    fn supported_source_file_is_indexed() {
        let f = filter(1_000_000);
        let root = Path::new("/p");
        assert!(f.is_indexable(Path::new("/p/src/main.rs"), root, 500));
    }

    #[test]
    fn project_type_detection_adds_exclude_globs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        fs::create_dir_all(dir.path().join("target/debug")).unwrap();
        fs::write(dir.path().join("target/debug/foo.rs"), "x").unwrap();

        let f = FileFilter::for_root(dir.path(), 1_000_000).unwrap();
        assert!(!f.is_indexable(&dir.path().join("target/debug/foo.rs"), dir.path(), 1));
    }
}
