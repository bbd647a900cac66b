//! ProjectIndexer: the process-wide registry owning every project's
//! coordinators. Persists the project list as a JSON sidecar, atomic
//! tmp-then-rename, and applies `IndexerCommand`s by creating/reusing a
//! `Coordinator` per knowledge source.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::join_all;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::coordinator::Coordinator;
use crate::embedder::EmbeddingCapability;
use crate::error::{AppError, AppResult};
use crate::events::{IndexerCommand, IndexerEvent};
use crate::keyword_store::KeywordStore;
use crate::project::{IndexProgress, IndexStatus, KnowledgeSource, Project};
use crate::state_repository::StateRepository;
use crate::vector_store::VectorStore;

/// Supplies the (process-wide, shared) embedding capability a coordinator
/// should use. A plain `Arc<dyn EmbeddingCapability>` clone, not a fresh
/// instance per call — the underlying model is loaded once.
pub type EmbedderFactory = dyn Fn() -> Arc<dyn EmbeddingCapability> + Send + Sync;

struct ProjectEntry {
    project: Project,
    coordinators: DashMap<String, Arc<Coordinator>>,
}

pub struct Registry {
    app_home: PathBuf,
    config: AppConfig,
    projects: DashMap<String, ProjectEntry>,
    event_tx: broadcast::Sender<IndexerEvent>,
    embedder_factory: Arc<EmbedderFactory>,
}

impl Registry {
    pub fn new(app_home: PathBuf, config: AppConfig, embedder_factory: Arc<EmbedderFactory>) -> AppResult<Arc<Self>> {
        let (event_tx, _rx) = broadcast::channel(256);
        let registry = Arc::new(Self {
            app_home,
            config,
            projects: DashMap::new(),
            event_tx,
            embedder_factory,
        });
        registry.load_persisted_projects()?;
        Ok(registry)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IndexerEvent> {
        self.event_tx.subscribe()
    }

    fn sidecar_path(&self) -> PathBuf {
        self.app_home.join("projects.json")
    }

    fn load_persisted_projects(&self) -> AppResult<()> {
        let path = self.sidecar_path();
        if !path.exists() {
            return Ok(());
        }
        let json = std::fs::read_to_string(&path)?;
        let projects: Vec<Project> = serde_json::from_str(&json).unwrap_or_default();
        for project in projects {
            self.projects.insert(project.id.clone(), ProjectEntry { project, coordinators: DashMap::new() });
        }
        Ok(())
    }

    fn persist(&self) -> AppResult<()> {
        let projects: Vec<Project> = self.projects.iter().map(|e| e.project.clone()).collect();
        let json = serde_json::to_string_pretty(&projects)?;
        std::fs::create_dir_all(&self.app_home)?;
        let tmp_path = self.sidecar_path().with_extension("json.tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, self.sidecar_path())?;
        Ok(())
    }

    pub fn create_project(&self, display_name: &str) -> AppResult<Project> {
        let project = Project::new(Uuid::new_v4().to_string(), display_name);
        self.projects.insert(project.id.clone(), ProjectEntry { project: project.clone(), coordinators: DashMap::new() });
        self.persist()?;
        Ok(project)
    }

    pub fn get_project(&self, project_id: &str) -> AppResult<Project> {
        self.projects.get(project_id).map(|e| e.project.clone()).ok_or_else(|| AppError::ProjectNotFound(project_id.to_string()))
    }

    pub fn list_projects(&self) -> Vec<Project> {
        self.projects.iter().map(|e| e.project.clone()).collect()
    }

    pub fn add_knowledge_source(&self, project_id: &str, absolute_path: &str) -> AppResult<KnowledgeSource> {
        let mut entry = self.projects.get_mut(project_id).ok_or_else(|| AppError::ProjectNotFound(project_id.to_string()))?;
        let canonical = dunce::canonicalize(absolute_path)
            .map_err(|e| AppError::PathNotAllowed(format!("{}: {}", absolute_path, e)))?;
        let source =
            KnowledgeSource::LocalRoot { id: Uuid::new_v4().to_string(), absolute_path: canonical.to_string_lossy().to_string() };
        entry.project.knowledge_sources.push(source.clone());
        drop(entry);
        self.persist()?;
        Ok(source)
    }

    pub fn remove_project(&self, project_id: &str) -> AppResult<()> {
        self.projects.remove(project_id).ok_or_else(|| AppError::ProjectNotFound(project_id.to_string()))?;
        self.persist()?;
        let project_root = self.app_home.join("projects").join(project_id);
        if project_root.exists() {
            std::fs::remove_dir_all(project_root)?;
        }
        Ok(())
    }

    /// Returns (lazily building, if necessary) the coordinator for a
    /// knowledge source. Built coordinators are cached for the registry's
    /// lifetime so a repeated call reuses the same open index handles.
    pub fn coordinator_for(&self, project_id: &str, source_id: &str) -> AppResult<Arc<Coordinator>> {
        {
            let entry = self.projects.get(project_id).ok_or_else(|| AppError::ProjectNotFound(project_id.to_string()))?;
            if let Some(existing) = entry.coordinators.get(source_id) {
                return Ok(Arc::clone(&existing));
            }
        }

        let (source, project_root) = {
            let entry = self.projects.get(project_id).ok_or_else(|| AppError::ProjectNotFound(project_id.to_string()))?;
            let source = entry
                .project
                .knowledge_sources
                .iter()
                .find(|s| s.id() == source_id)
                .cloned()
                .ok_or_else(|| AppError::KnowledgeSourceNotFound(source_id.to_string()))?;
            (source, entry.project.root_dir(&self.app_home))
        };

        let embedder = (self.embedder_factory)();
        let vector_store = VectorStore::open(&source.vector_dir(&project_root), embedder.dimension())?;
        let keyword_store = KeywordStore::open(&source.keyword_dir(&project_root))?;
        let state_repository = StateRepository::open(&source.state_db_path(&project_root))?;
        let coordinator = Arc::new(Coordinator::new(
            project_id.to_string(),
            source_id.to_string(),
            PathBuf::from(source.absolute_path()),
            self.config.clone(),
            vector_store,
            keyword_store,
            state_repository,
            embedder,
            self.event_tx.clone(),
        )?);

        let entry = self.projects.get(project_id).ok_or_else(|| AppError::ProjectNotFound(project_id.to_string()))?;
        entry.coordinators.insert(source_id.to_string(), Arc::clone(&coordinator));
        Ok(coordinator)
    }

    pub async fn progress(&self, project_id: &str, source_id: &str) -> AppResult<IndexProgress> {
        let coordinator = self.coordinator_for(project_id, source_id)?;
        Ok(coordinator.progress().await)
    }

    /// Re-hashes every tracked file for a knowledge source and reports any
    /// whose content drifted without its (mtime, size) changing.
    pub async fn verify_checksums(&self, project_id: &str, source_id: &str) -> AppResult<Vec<String>> {
        let coordinator = self.coordinator_for(project_id, source_id)?;
        coordinator.verify_checksums().await
    }

    /// Applies a single inbound command. Per-source indexing passes run
    /// concurrently in a background task so the caller (typically an HTTP
    /// handler) doesn't block on a potentially long-running pass; per
    /// spec.md §4.11 that background task still waits for every source to
    /// finish before publishing the project-level aggregate event — an
    /// `IndexingCompleted` with the sum of files processed across sources,
    /// or an `IndexingFailed` with every source's errors concatenated.
    pub async fn dispatch(self: &Arc<Self>, command: IndexerCommand) -> AppResult<()> {
        match command {
            IndexerCommand::ProjectIndexingRequested { project_id, knowledge_sources, watch_for_changes, .. } => {
                let project = self.get_project(&project_id)?;
                let source_ids: Vec<String> = match knowledge_sources {
                    Some(ids) => ids,
                    None => project.knowledge_sources.iter().map(|s| s.id().to_string()).collect(),
                };

                let mut coordinators = Vec::with_capacity(source_ids.len());
                for source_id in &source_ids {
                    coordinators.push(self.coordinator_for(&project_id, source_id)?);
                }

                let _ = self.event_tx.send(IndexerEvent::IndexingStarted {
                    project_id: project_id.clone(),
                    project_name: project.display_name.clone(),
                    estimated_files: None,
                });

                let event_tx = self.event_tx.clone();
                let agg_project_id = project_id.clone();
                tokio::spawn(async move {
                    let results = join_all(coordinators.into_iter().map(|coordinator| async move {
                        let result = coordinator.run_pass(watch_for_changes).await;
                        let files_processed = coordinator.progress().await.files_processed;
                        (result, files_processed)
                    }))
                    .await;

                    let mut errors = Vec::new();
                    let mut files_indexed = 0usize;
                    for (result, files_processed) in results {
                        files_indexed += files_processed;
                        if let Err(e) = result {
                            errors.push(e.to_string());
                        }
                    }

                    let event = if errors.is_empty() {
                        IndexerEvent::IndexingCompleted { project_id: agg_project_id, files_indexed }
                    } else {
                        IndexerEvent::IndexingFailed { project_id: agg_project_id, error_message: errors.join("; ") }
                    };
                    let _ = event_tx.send(event);
                });

                Ok(())
            }
            IndexerCommand::ProjectReIndex { project_id, reason } => {
                info!(project_id, reason, "re-index requested");
                let project = self.get_project(&project_id)?;
                for source in &project.knowledge_sources {
                    if let Ok(coordinator) = self.coordinator_for(&project_id, source.id()) {
                        if coordinator.progress().await.status == IndexStatus::Indexing {
                            warn!(project_id, "re-index dropped: a knowledge source is already indexing");
                            return Ok(());
                        }
                    }
                }

                let project_root = project.root_dir(&self.app_home);
                if let Some(mut entry) = self.projects.get_mut(&project_id) {
                    entry.coordinators.clear();
                }
                for source in &project.knowledge_sources {
                    // Wipe the whole per-source directory, not just `index/`:
                    // `state.db` is a sibling of `index/`
                    // (KnowledgeSource::state_db_path), not nested under it.
                    // Leaving it behind means `detect_changes` on the
                    // re-dispatched pass diffs the on-disk tree against a
                    // ledger that still lists every file as already indexed,
                    // so nothing gets re-indexed into the freshly-wiped
                    // stores.
                    let source_dir = project_root.join(source.id());
                    if source_dir.exists() {
                        std::fs::remove_dir_all(&source_dir)?;
                    }
                }

                Box::pin(self.dispatch(IndexerCommand::ProjectIndexingRequested {
                    project_id,
                    knowledge_sources: None,
                    embedding_model: None,
                    embedding_store: None,
                    watch_for_changes: true,
                }))
                .await
            }
            IndexerCommand::ProjectDeleted { project_id } => self.remove_project(&project_id),
            IndexerCommand::ProjectIndexRemoval { project_id, knowledge_source } => {
                let mut entry = self.projects.get_mut(&project_id).ok_or_else(|| AppError::ProjectNotFound(project_id.clone()))?;
                entry.project.knowledge_sources.retain(|s| s.id() != knowledge_source);
                entry.coordinators.remove(&knowledge_source);
                drop(entry);
                self.persist()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingCapability for FixedEmbedder {
        async fn embed(&self, _text: &str) -> AppResult<Vec<f32>> {
            Ok(vec![0.0; 4])
        }
        fn dimension(&self) -> usize {
            4
        }
        fn token_limit(&self) -> usize {
            2048
        }
        fn provider_name(&self) -> &str {
            "test"
        }
    }

    fn test_registry() -> (Arc<Registry>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let embedder: Arc<dyn EmbeddingCapability> = Arc::new(FixedEmbedder);
        let factory: Arc<EmbedderFactory> = Arc::new(move || Arc::clone(&embedder));
        let mut config = AppConfig::from_env();
        config.enable_file_watcher = false;
        let registry = Registry::new(dir.path().to_path_buf(), config, factory).unwrap();
        (registry, dir)
    }

    #[test]
    fn create_and_persist_project_round_trips() {
        let (registry, dir) = test_registry();
        let project = registry.create_project("demo").unwrap();
        assert!(dir.path().join("projects.json").exists());

        let factory: Arc<EmbedderFactory> = {
            let embedder: Arc<dyn EmbeddingCapability> = Arc::new(FixedEmbedder);
            Arc::new(move || Arc::clone(&embedder))
        };
        let config = AppConfig::from_env();
        let reopened = Registry::new(dir.path().to_path_buf(), config, factory).unwrap();
        assert_eq!(reopened.get_project(&project.id).unwrap().display_name, "demo");
    }

    #[test]
    fn unknown_project_returns_not_found() {
        let (registry, _dir) = test_registry();
        assert!(registry.get_project("nope").is_err());
    }

    #[test]
    fn add_knowledge_source_builds_a_coordinator() {
        let (registry, _dir) = test_registry();
        let project = registry.create_project("demo").unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let source = registry.add_knowledge_source(&project.id, &src_dir.path().to_string_lossy()).unwrap();
        let coordinator = registry.coordinator_for(&project.id, source.id());
        assert!(coordinator.is_ok());
    }

    /// Waits for the project-level aggregate event (`IndexingCompleted` or
    /// `IndexingFailed`) matching `project_id` and `expected_files`, skipping
    /// any per-source `Coordinator::run_pass` completion events interleaved
    /// on the same broadcast channel — those share the same event shape but
    /// always arrive first, each carrying only its own source's count,
    /// since the registry's aggregate is computed only after every source's
    /// `run_pass` (and its own event) has already completed.
    async fn await_aggregate_completed(events: &mut broadcast::Receiver<IndexerEvent>, project_id: &str, expected_files: usize) -> IndexerEvent {
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                match events.recv().await.unwrap() {
                    e @ IndexerEvent::IndexingCompleted { project_id: ref p, files_indexed } if p == project_id && files_indexed == expected_files => {
                        return e;
                    }
                    e @ IndexerEvent::IndexingFailed { project_id: ref p, .. } if p == project_id => return e,
                    _ => continue,
                }
            }
        })
        .await
        .expect("aggregate event never arrived")
    }

    #[tokio::test]
    async fn reindex_tears_down_coordinators_and_repopulates_both_stores() {
        let (registry, _dir) = test_registry();
        let project = registry.create_project("demo").unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        std::fs::write(src_dir.path().join("a.txt"), "hello world").unwrap();
        let source = registry.add_knowledge_source(&project.id, &src_dir.path().to_string_lossy()).unwrap();

        let coordinator = registry.coordinator_for(&project.id, source.id()).unwrap();
        coordinator.run_pass(false).await.unwrap();
        let project_root = project.root_dir(&registry.app_home);
        let index_dir = source.vector_dir(&project_root).parent().unwrap().to_path_buf();
        assert!(index_dir.exists());

        let mut events = registry.subscribe();
        registry
            .dispatch(IndexerCommand::ProjectReIndex { project_id: project.id.clone(), reason: "model changed".to_string() })
            .await
            .unwrap();
        // the old coordinator handle is torn down; the registry will lazily rebuild a fresh one
        let new_coordinator = registry.coordinator_for(&project.id, source.id()).unwrap();
        assert!(!Arc::ptr_eq(&coordinator, &new_coordinator));

        // state.db must have been wiped along with index/, or the rebuilt
        // coordinator's detect_changes sees the file as already indexed and
        // skips it, leaving the freshly-wiped stores empty forever.
        await_aggregate_completed(&mut events, &project.id, 1).await;
        assert_eq!(new_coordinator.vector_store().len(), 1);
        assert_eq!(new_coordinator.keyword_store().top_k("hello", 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn project_indexing_emits_aggregate_completed_with_summed_file_count() {
        let (registry, _dir) = test_registry();
        let project = registry.create_project("demo").unwrap();
        let src_dir_a = tempfile::tempdir().unwrap();
        let src_dir_b = tempfile::tempdir().unwrap();
        std::fs::write(src_dir_a.path().join("a.txt"), "hello world").unwrap();
        std::fs::write(src_dir_b.path().join("b.txt"), "goodbye world").unwrap();
        registry.add_knowledge_source(&project.id, &src_dir_a.path().to_string_lossy()).unwrap();
        registry.add_knowledge_source(&project.id, &src_dir_b.path().to_string_lossy()).unwrap();

        let mut events = registry.subscribe();
        registry
            .dispatch(IndexerCommand::ProjectIndexingRequested {
                project_id: project.id.clone(),
                knowledge_sources: None,
                embedding_model: None,
                embedding_store: None,
                watch_for_changes: false,
            })
            .await
            .unwrap();

        await_aggregate_completed(&mut events, &project.id, 2).await;
    }

    #[tokio::test]
    async fn reindex_is_silently_dropped_while_a_pass_is_in_flight() {
        let (registry, _dir) = test_registry();
        let project = registry.create_project("demo").unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let source = registry.add_knowledge_source(&project.id, &src_dir.path().to_string_lossy()).unwrap();
        let coordinator = registry.coordinator_for(&project.id, source.id()).unwrap();

        coordinator.force_status_for_test(crate::project::IndexStatus::Indexing).await;

        registry
            .dispatch(IndexerCommand::ProjectReIndex { project_id: project.id.clone(), reason: "model changed".to_string() })
            .await
            .unwrap();
        // the in-flight coordinator was left alone rather than torn down
        assert!(Arc::ptr_eq(&coordinator, &registry.coordinator_for(&project.id, source.id()).unwrap()));
    }
}
