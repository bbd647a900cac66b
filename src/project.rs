//! Data model: Project, KnowledgeSource, IndexProgress. A project owns an
//! ordered list of knowledge sources, each with its own coordinator and
//! on-disk index directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub display_name: String,
    pub knowledge_sources: Vec<KnowledgeSource>,
}

/// Tagged union, extensible to other kinds; only `LocalRoot` is implemented.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum KnowledgeSource {
    #[serde(rename = "local_root")]
    LocalRoot { id: String, absolute_path: String },
}

impl KnowledgeSource {
    pub fn id(&self) -> &str {
        match self {
            KnowledgeSource::LocalRoot { id, .. } => id,
        }
    }

    pub fn absolute_path(&self) -> &str {
        match self {
            KnowledgeSource::LocalRoot { absolute_path, .. } => absolute_path,
        }
    }
}

impl Project {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            knowledge_sources: Vec::new(),
        }
    }

    /// `<app_home>/projects/<project_id>/`.
    pub fn root_dir(&self, app_home: &Path) -> PathBuf {
        app_home.join("projects").join(&self.id)
    }
}

impl KnowledgeSource {
    /// `<project_root>/<source_id>/index/{vector,keyword}` and `state.db`.
    pub fn vector_dir(&self, project_root: &Path) -> PathBuf {
        project_root.join(self.id()).join("index").join("vector")
    }

    pub fn keyword_dir(&self, project_root: &Path) -> PathBuf {
        project_root.join(self.id()).join("index").join("keyword")
    }

    pub fn state_db_path(&self, project_root: &Path) -> PathBuf {
        project_root.join(self.id()).join("state.db")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexStatus {
    NotStarted,
    Indexing,
    Ready,
    Watching,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexProgress {
    pub status: IndexStatus,
    pub files_processed: usize,
    pub files_total: usize,
    pub updated_at_millis: i64,
    pub error: Option<String>,
    pub is_watching: bool,
}

impl IndexProgress {
    pub fn not_started() -> Self {
        Self {
            status: IndexStatus::NotStarted,
            files_processed: 0,
            files_total: 0,
            updated_at_millis: 0,
            error: None,
            is_watching: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn knowledge_source_paths_nest_under_project_root() {
        let source = KnowledgeSource::LocalRoot {
            id: "src1".to_string(),
            absolute_path: "/home/user/code".to_string(),
        };
        let root = Path::new("/app_home/projects/proj1");
        assert_eq!(source.vector_dir(root), Path::new("/app_home/projects/proj1/src1/index/vector"));
        assert_eq!(source.keyword_dir(root), Path::new("/app_home/projects/proj1/src1/index/keyword"));
        assert_eq!(source.state_db_path(root), Path::new("/app_home/projects/proj1/src1/state.db"));
    }

    #[test]
    fn default_progress_is_not_started() {
        let progress = IndexProgress::not_started();
        assert_eq!(progress.status, IndexStatus::NotStarted);
        assert!(!progress.is_watching);
    }
}
