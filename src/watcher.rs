//! FileWatcher: generic per-root change feed. Wraps `notify-debouncer-full`
//! and forwards debounced events as a plain channel rather than calling
//! back into a specific indexer, so any `Coordinator` can consume it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, FileIdMap};
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub enum WatchEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
}

/// Owns the underlying debouncer; dropping it stops the watch.
pub struct FileWatcher {
    _debouncer: Debouncer<notify::RecommendedWatcher, FileIdMap>,
}

impl FileWatcher {
    /// Starts watching `root` recursively with the given debounce window.
    /// A queue overflow (the debouncer's `Err` branch) is not fatal: it is
    /// forwarded as a single `AppError::WatcherOverflow` item so the caller
    /// can trigger a full rescan instead of treating the watch as dead.
    pub fn watch(root: &Path, debounce_ms: u64) -> Result<(Self, mpsc::UnboundedReceiver<Result<WatchEvent, AppError>>), AppError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let root_display = root.to_string_lossy().to_string();

        let mut debouncer = new_debouncer(Duration::from_millis(debounce_ms), None, move |result: DebounceEventResult| match result {
            Ok(events) => {
                for event in &events {
                    let Some(mapped_kind) = classify(&event.kind) else { continue };
                    for path in &event.paths {
                        let mapped = match mapped_kind {
                            Kind::Created => WatchEvent::Created(path.clone()),
                            Kind::Modified => WatchEvent::Modified(path.clone()),
                            Kind::Deleted => WatchEvent::Deleted(path.clone()),
                        };
                        let _ = tx.send(Ok(mapped));
                    }
                }
            }
            Err(errors) => {
                warn!(?errors, root = %root_display, "file watcher queue overflow, requesting full rescan");
                let _ = tx.send(Err(AppError::WatcherOverflow(root_display.clone())));
            }
        })
        .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to start file watcher: {}", e)))?;

        debouncer
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to watch {}: {}", root.display(), e)))?;

        Ok((Self { _debouncer: debouncer }, rx))
    }
}

enum Kind {
    Created,
    Modified,
    Deleted,
}

fn classify(kind: &notify::EventKind) -> Option<Kind> {
    use notify::EventKind;
    match kind {
        EventKind::Create(_) => Some(Kind::Created),
        EventKind::Modify(_) => Some(Kind::Modified),
        EventKind::Remove(_) => Some(Kind::Deleted),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn detects_file_creation() {
        let dir = tempfile::tempdir().unwrap();
        let (_watcher, mut rx) = FileWatcher::watch(dir.path(), 200).unwrap();

        fs::write(dir.path().join("new.txt"), "hello").unwrap();

        let event = tokio::time::timeout(StdDuration::from_secs(5), rx.recv()).await;
        assert!(event.is_ok(), "expected a watch event within timeout");
    }
}
