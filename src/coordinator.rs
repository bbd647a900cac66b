//! IndexingCoordinator: drives one knowledge source's indexing pass end to
//! end: preflight, diff, remove, add/update under bounded
//! concurrency, metadata persistence, and the optional hand-off into file
//! watching. State machine mirrors `IndexStatus`: NotStarted -> Indexing ->
//! Ready/Watching/Failed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use crate::change_detector::{self, ScannedFile};
use crate::chunk;
use crate::config::AppConfig;
use crate::embedder::{self, EmbeddingCapability, ValidationOutcome};
use crate::error::{AppError, AppResult};
use crate::events::IndexerEvent;
use crate::extractor;
use crate::file_filter::FileFilter;
use crate::hybrid_indexer::{EmbeddedSegment, HybridIndexer};
use crate::keyword_store::KeywordStore;
use crate::lang;
use crate::project::{IndexProgress, IndexStatus};
use crate::state_repository::{IndexedFileRecord, StateRepository};
use crate::symbols;
use crate::vector_store::{ChunkMetadata, VectorStore};
use crate::watcher::{FileWatcher, WatchEvent};

pub struct Coordinator {
    project_id: String,
    knowledge_source_id: String,
    root: PathBuf,
    config: AppConfig,
    vector_store: VectorStore,
    keyword_store: KeywordStore,
    state_repository: SyncMutex<StateRepository>,
    embedder: Arc<dyn EmbeddingCapability>,
    filter: FileFilter,
    progress: RwLock<IndexProgress>,
    event_tx: broadcast::Sender<IndexerEvent>,
    watcher: SyncMutex<Option<FileWatcher>>,
}

impl Coordinator {
    pub fn new(
        project_id: String,
        knowledge_source_id: String,
        root: PathBuf,
        config: AppConfig,
        vector_store: VectorStore,
        keyword_store: KeywordStore,
        state_repository: StateRepository,
        embedder: Arc<dyn EmbeddingCapability>,
        event_tx: broadcast::Sender<IndexerEvent>,
    ) -> AppResult<Self> {
        let filter = FileFilter::for_root(&root, config.max_file_size_bytes as u64)?;
        Ok(Self {
            project_id,
            knowledge_source_id,
            root,
            config,
            vector_store,
            keyword_store,
            state_repository: SyncMutex::new(state_repository),
            embedder,
            filter,
            progress: RwLock::new(IndexProgress::not_started()),
            event_tx,
            watcher: SyncMutex::new(None),
        })
    }

    pub fn vector_store(&self) -> &VectorStore {
        &self.vector_store
    }

    pub fn keyword_store(&self) -> &KeywordStore {
        &self.keyword_store
    }

    pub fn embedder(&self) -> &dyn EmbeddingCapability {
        self.embedder.as_ref()
    }

    pub async fn progress(&self) -> IndexProgress {
        self.progress.read().await.clone()
    }

    /// Recomputes content checksums for every file StateRepository currently
    /// tracks and persists them, returning paths whose checksum changed
    /// since it was last recorded. A drift here means the file's bytes
    /// changed without its (mtime, size) pair changing, something
    /// `detect_changes` cannot see on its own — this is a standalone
    /// verifier, never invoked as part of `run_pass`.
    pub async fn verify_checksums(self: &Arc<Self>) -> AppResult<Vec<String>> {
        let records = self.state_repository.lock().all_files()?;

        let mut scanned: Vec<ScannedFile> = records
            .values()
            .map(|r| ScannedFile {
                path: r.file_path.clone(),
                last_modified_millis: r.last_modified_millis,
                size_bytes: r.size_bytes,
                checksum: None,
            })
            .collect();

        scanned = tokio::task::spawn_blocking(move || {
            change_detector::checksum_files(&mut scanned);
            scanned
        })
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

        let mut drifted = Vec::new();
        let state = self.state_repository.lock();
        for file in scanned {
            let Some(new_hash) = file.checksum else { continue };
            let Some(old) = records.get(&file.path) else { continue };
            if let Some(old_hash) = &old.checksum {
                if old_hash != &new_hash {
                    drifted.push(file.path.clone());
                }
            }
            state.put_file(&IndexedFileRecord {
                file_path: file.path,
                last_modified_millis: old.last_modified_millis,
                size_bytes: old.size_bytes,
                indexed_at_millis: old.indexed_at_millis,
                checksum: Some(new_hash),
            })?;
        }

        Ok(drifted)
    }

    #[cfg(test)]
    pub(crate) async fn force_status_for_test(&self, status: IndexStatus) {
        self.progress.write().await.status = status;
    }

    #[cfg(test)]
    pub(crate) fn state_has_file(&self, path: &str) -> bool {
        self.state_repository.lock().all_files().map(|m| m.contains_key(path)).unwrap_or(false)
    }

    /// Runs one full/incremental pass. Refuses to start a second pass while
    /// one is already `Indexing`. On success transitions to `Watching` when
    /// `watch_after` is set and the file watcher is enabled, else `Ready`.
    pub async fn run_pass(self: &Arc<Self>, watch_after: bool) -> AppResult<()> {
        {
            let mut progress = self.progress.write().await;
            if progress.status == IndexStatus::Indexing {
                return Err(AppError::BadRequest(format!(
                    "knowledge source {} is already indexing",
                    self.knowledge_source_id
                )));
            }
            *progress = IndexProgress {
                status: IndexStatus::Indexing,
                files_processed: 0,
                files_total: 0,
                updated_at_millis: now_millis(),
                error: None,
                is_watching: false,
            };
        }

        let _ = self.event_tx.send(IndexerEvent::IndexingStarted {
            project_id: self.project_id.clone(),
            project_name: self.knowledge_source_id.clone(),
            estimated_files: None,
        });

        if let Err(reason) = self.preflight_embedder().await {
            self.fail(&reason).await;
            let _ = self.event_tx.send(IndexerEvent::ModelNotAvailable {
                provider: self.embedder.provider_name().to_string(),
                model: String::new(),
                is_embedding: true,
                reason: reason.clone(),
            });
            return Err(AppError::ModelNotAvailable {
                provider: self.embedder.provider_name().to_string(),
                model: String::new(),
                reason,
            });
        }

        let (changes, scanned) = {
            let state = self.state_repository.lock();
            match change_detector::detect_changes(&self.root, &self.filter, &state) {
                Ok(v) => v,
                Err(e) => {
                    self.fail(&e.to_string()).await;
                    let _ = self.event_tx.send(IndexerEvent::IndexingFailed {
                        project_id: self.project_id.clone(),
                        error_message: e.to_string(),
                    });
                    return Err(e);
                }
            }
        };
        let scanned = Arc::new(scanned);

        let total = changes.added.len() + changes.modified.len() + changes.removed.len();
        {
            let mut progress = self.progress.write().await;
            progress.files_total = total;
        }

        for path in &changes.removed {
            if let Err(e) = self.remove_one(path).await {
                warn!(error = %e, path, "failed to remove stale file from index");
            }
            self.advance_progress().await;
        }

        let mut to_process: Vec<String> = Vec::with_capacity(changes.added.len() + changes.modified.len());
        to_process.extend(changes.added.iter().cloned());
        to_process.extend(changes.modified.iter().cloned());
        to_process.sort();

        let concurrency = self.config.concurrent_indexing_threads.max(1);
        let results: Vec<AppResult<()>> = stream::iter(to_process.into_iter().map(|path| {
            let this = Arc::clone(self);
            let scanned = Arc::clone(&scanned);
            async move {
                let result = this.process_one(&path, &scanned).await;
                this.advance_progress().await;
                result
            }
        }))
        .buffer_unordered(concurrency)
        .collect()
        .await;

        let mut fatal = None;
        let mut recoverable_failures = 0usize;
        for result in results {
            if let Err(e) = result {
                if e.is_fatal_to_coordinator() {
                    fatal.get_or_insert(e);
                } else {
                    recoverable_failures += 1;
                }
            }
        }

        if let Some(e) = fatal {
            self.fail(&e.to_string()).await;
            let _ = self.event_tx.send(IndexerEvent::IndexingFailed {
                project_id: self.project_id.clone(),
                error_message: e.to_string(),
            });
            return Err(e);
        }
        if recoverable_failures > 0 {
            warn!(recoverable_failures, "indexing pass completed with per-file errors");
        }

        let files_indexed = {
            let state = self.state_repository.lock();
            state.meta_set("status", "ready")?;
            state.meta_set("last_updated", &now_millis().to_string())?;
            let count = state.all_files()?.len();
            state.meta_set("files_indexed", &count.to_string())?;
            count
        };

        let should_watch = watch_after && self.config.enable_file_watcher;
        if should_watch {
            self.start_watching().await?;
        }

        {
            let mut progress = self.progress.write().await;
            progress.status = if should_watch { IndexStatus::Watching } else { IndexStatus::Ready };
            progress.is_watching = should_watch;
            progress.updated_at_millis = now_millis();
        }

        let _ = self.event_tx.send(IndexerEvent::IndexingCompleted {
            project_id: self.project_id.clone(),
            files_indexed,
        });
        Ok(())
    }

    async fn preflight_embedder(&self) -> Result<(), String> {
        match embedder::check_model_available(self.embedder.as_ref()).await {
            ValidationOutcome::Available => Ok(()),
            ValidationOutcome::ProviderUnreachable => Err("embedding provider unreachable".to_string()),
            ValidationOutcome::NotAvailable { reason } => Err(reason),
        }
    }

    async fn advance_progress(&self) {
        let mut progress = self.progress.write().await;
        progress.files_processed += 1;
        progress.updated_at_millis = now_millis();
        let emit = progress.files_processed % self.config.index_batch_size.max(1) == 0 || progress.files_processed == progress.files_total;
        if emit {
            let _ = self.event_tx.send(IndexerEvent::IndexingInProgress {
                project_id: self.project_id.clone(),
                knowledge_source: self.knowledge_source_id.clone(),
                files_indexed: progress.files_processed,
                total_files: progress.files_total,
            });
        }
    }

    async fn process_one(self: &Arc<Self>, path: &str, scanned: &HashMap<String, ScannedFile>) -> AppResult<()> {
        let path_buf = PathBuf::from(path);
        let ext = path_buf.extension().map(|e| e.to_string_lossy().to_lowercase()).unwrap_or_default();
        let file_name = path_buf.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        let language = lang::detect_language(&ext);

        let text = {
            let path_buf = path_buf.clone();
            tokio::task::spawn_blocking(move || extractor::extract(&path_buf))
                .await
                .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))??
        };

        let model_limit = self.embedder.token_limit();
        let max_chars = chunk::max_chars_for_model(self.config.configured_max_chars, model_limit);
        let overlap = chunk::overlap_for_max_chars(max_chars, self.config.configured_overlap_max);
        let chunks = chunk::plan(&text, &ext, max_chars, overlap);

        let symbol_string = symbols::extract_symbols(&text, language);

        // Embed every chunk before touching either store. Embedding is the
        // fallible step here (transient retries exhausted, provider error);
        // if it fails partway through, the file's previously-indexed chunks
        // and StateRepository row must still be intact, not cleared with
        // nothing to replace them.
        let mut segments = Vec::with_capacity(chunks.len());
        for (index, chunk_text) in chunks.iter().enumerate() {
            let vector = embedder::embed_with_retry(
                self.embedder.as_ref(),
                chunk_text,
                self.config.embedding_retry_attempts,
                self.config.embedding_retry_base_ms,
            )
            .await?;

            segments.push(EmbeddedSegment {
                metadata: ChunkMetadata {
                    file_path: path.to_string(),
                    file_name: file_name.clone(),
                    extension: ext.clone(),
                    chunk_index: index,
                },
                text: chunk_text.clone(),
                vector,
                symbols: symbol_string.clone(),
            });

            if self.config.embedding_per_request_sleep_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.config.embedding_per_request_sleep_ms)).await;
            }
        }

        // Every chunk embedded successfully: only now is it safe to clear
        // any chunks this file wrote on a previous pass (its chunk count,
        // or its content entirely, may have changed since last indexed)
        // and write the new ones in their place.
        let indexer = HybridIndexer::new(&self.vector_store, &self.keyword_store);
        indexer.remove_file(path).await?;
        if !segments.is_empty() {
            indexer.index_segments(&segments).await?;
        }
        // An empty chunk plan (whitespace-only file) needs no further work
        // beyond the stale-chunk removal above.

        let (last_modified_millis, size_bytes, checksum) = scanned
            .get(path)
            .map(|s| (s.last_modified_millis, s.size_bytes, s.checksum.clone()))
            .unwrap_or((0, 0, None));

        self.state_repository.lock().put_file(&IndexedFileRecord {
            file_path: path.to_string(),
            last_modified_millis,
            size_bytes,
            indexed_at_millis: now_millis(),
            checksum,
        })?;

        Ok(())
    }

    async fn remove_one(&self, path: &str) -> AppResult<()> {
        let indexer = HybridIndexer::new(&self.vector_store, &self.keyword_store);
        indexer.remove_file(path).await?;
        self.state_repository.lock().remove_file(path)?;
        Ok(())
    }

    async fn fail(&self, reason: &str) {
        let mut progress = self.progress.write().await;
        progress.status = IndexStatus::Failed;
        progress.error = Some(reason.to_string());
        progress.updated_at_millis = now_millis();
    }

    /// Starts the file watcher for this source's root and spawns the task
    /// that feeds its events back through the normal per-file pipeline.
    async fn start_watching(self: &Arc<Self>) -> AppResult<()> {
        if self.watcher.lock().is_some() {
            return Ok(());
        }
        let (watcher, mut rx) = FileWatcher::watch(&self.root, self.config.watcher_debounce_ms)?;
        *self.watcher.lock() = Some(watcher);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    Ok(WatchEvent::Created(path)) | Ok(WatchEvent::Modified(path)) => {
                        this.handle_path_changed(path).await;
                    }
                    Ok(WatchEvent::Deleted(path)) => {
                        this.handle_path_removed(path).await;
                    }
                    Err(AppError::WatcherOverflow(root)) => {
                        info!(root, "watcher overflow, triggering full rescan");
                        if let Err(e) = this.run_pass(true).await {
                            warn!(error = %e, "rescan after watcher overflow failed");
                        }
                    }
                    Err(e) => warn!(error = %e, "file watcher channel error"),
                }
            }
        });

        Ok(())
    }

    async fn handle_path_changed(self: &Arc<Self>, path: PathBuf) {
        let path_str = path.to_string_lossy().to_string();
        let size_bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        if !self.filter.is_indexable(&path, &self.root, size_bytes) {
            return;
        }

        let mut scanned = HashMap::new();
        let last_modified_millis = std::fs::metadata(&path)
            .ok()
            .and_then(|m| m.modified().ok())
            .map(|t| chrono::DateTime::<chrono::Utc>::from(t).timestamp_millis())
            .unwrap_or(0);
        scanned.insert(
            path_str.clone(),
            ScannedFile { path: path_str.clone(), last_modified_millis, size_bytes, checksum: None },
        );

        let _ = self.event_tx.send(IndexerEvent::FileChanged {
            project_id: self.project_id.clone(),
            knowledge_source: self.knowledge_source_id.clone(),
            path: path_str.clone(),
            change_type: "modified".to_string(),
        });

        if let Err(e) = self.process_one(&path_str, &scanned).await {
            warn!(error = %e, path = %path_str, "incremental reindex failed");
        }
    }

    async fn handle_path_removed(&self, path: PathBuf) {
        let path_str = path.to_string_lossy().to_string();
        let _ = self.event_tx.send(IndexerEvent::FileChanged {
            project_id: self.project_id.clone(),
            knowledge_source: self.knowledge_source_id.clone(),
            path: path_str.clone(),
            change_type: "deleted".to_string(),
        });
        if let Err(e) = self.remove_one(&path_str).await {
            warn!(error = %e, path = %path_str, "failed to remove deleted file from index");
        }
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
