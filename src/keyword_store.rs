//! KeywordStore: persistent inverted index over chunk text and metadata,
//! backed by `tantivy`. Supports batch add,
//! delete-by-file-path, and BM25 top-k. Metadata fields are stored with an
//! `m_`-prefix to avoid collisions with the reserved `content` field.

use std::path::Path;

use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{Index, IndexReader, IndexWriter, TantivyDocument, Term};

use crate::error::{AppError, AppResult};
use crate::vector_store::ChunkMetadata;

#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub metadata: ChunkMetadata,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone)]
struct KeywordSchema {
    content: Field,
    m_file_path: Field,
    m_file_name: Field,
    m_extension: Field,
    m_chunk_index: Field,
    /// Additive field: per-file symbol extraction, to improve keyword
    /// recall for source files.
    m_symbols: Field,
    schema: Schema,
}

impl KeywordSchema {
    fn build() -> Self {
        let mut builder = Schema::builder();
        let content = builder.add_text_field("content", TEXT | STORED);
        let m_file_path = builder.add_text_field("m_file_path", STRING | STORED);
        let m_file_name = builder.add_text_field("m_file_name", TEXT | STORED);
        let m_extension = builder.add_text_field("m_extension", STRING | STORED);
        let m_chunk_index = builder.add_u64_field("m_chunk_index", INDEXED | STORED);
        let m_symbols = builder.add_text_field("m_symbols", TEXT | STORED);
        let schema = builder.build();
        Self {
            content,
            m_file_path,
            m_file_name,
            m_extension,
            m_chunk_index,
            m_symbols,
            schema,
        }
    }
}

pub struct ChunkToIndex {
    pub metadata: ChunkMetadata,
    pub text: String,
    pub symbols: String,
}

pub struct KeywordStore {
    index: Index,
    reader: IndexReader,
    schema: KeywordSchema,
    writer_lock: tokio::sync::Mutex<()>,
}

impl KeywordStore {
    pub fn open(dir: &Path) -> AppResult<Self> {
        std::fs::create_dir_all(dir)?;
        let schema_def = KeywordSchema::build();

        let index = if dir.join("meta.json").exists() {
            Index::open_in_dir(dir).map_err(|e| AppError::IndexError(format!("failed to open keyword index: {}", e)))?
        } else {
            Index::create_in_dir(dir, schema_def.schema.clone())
                .map_err(|e| AppError::IndexError(format!("failed to create keyword index: {}", e)))?
        };

        let reader = index.reader().map_err(|e| AppError::IndexError(format!("failed to create reader: {}", e)))?;

        Ok(Self {
            index,
            reader,
            schema: schema_def,
            writer_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Batch-adds all chunks belonging to one file. Tantivy only allows one
    /// writer at a time; the lock serializes concurrent callers (e.g. the
    /// indexing pass and the watcher's incremental reindex).
    pub async fn add_chunks(&self, chunks: &[ChunkToIndex]) -> AppResult<()> {
        let _guard = self.writer_lock.lock().await;
        let mut writer: IndexWriter = self
            .index
            .writer(50_000_000)
            .map_err(|e| AppError::StoreWriteError(format!("failed to open keyword writer: {}", e)))?;

        for chunk in chunks {
            let mut doc = TantivyDocument::new();
            doc.add_text(self.schema.content, &chunk.text);
            doc.add_text(self.schema.m_file_path, &chunk.metadata.file_path);
            doc.add_text(self.schema.m_file_name, &chunk.metadata.file_name);
            doc.add_text(self.schema.m_extension, &chunk.metadata.extension);
            doc.add_u64(self.schema.m_chunk_index, chunk.metadata.chunk_index as u64);
            doc.add_text(self.schema.m_symbols, &chunk.symbols);
            writer
                .add_document(doc)
                .map_err(|e| AppError::StoreWriteError(format!("failed to add document: {}", e)))?;
        }

        writer
            .commit()
            .map_err(|e| AppError::StoreWriteError(format!("failed to commit keyword index: {}", e)))?;
        self.reader.reload().map_err(|e| AppError::IndexError(e.to_string()))?;
        Ok(())
    }

    pub async fn delete_by_file_path(&self, file_path: &str) -> AppResult<()> {
        let _guard = self.writer_lock.lock().await;
        let mut writer: IndexWriter = self
            .index
            .writer(50_000_000)
            .map_err(|e| AppError::StoreWriteError(format!("failed to open keyword writer: {}", e)))?;
        let term = Term::from_field_text(self.schema.m_file_path, file_path);
        writer.delete_term(term);
        writer
            .commit()
            .map_err(|e| AppError::StoreWriteError(format!("failed to commit keyword delete: {}", e)))?;
        self.reader.reload().map_err(|e| AppError::IndexError(e.to_string()))?;
        Ok(())
    }

    pub fn top_k(&self, query_text: &str, k: usize) -> AppResult<Vec<KeywordHit>> {
        if query_text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let searcher = self.reader.searcher();
        let mut parser = QueryParser::for_index(&self.index, vec![self.schema.content, self.schema.m_symbols, self.schema.m_file_name]);
        parser.set_conjunction_by_default();
        let query = parser
            .parse_query(&escape_query(query_text))
            .or_else(|_| parser.parse_query(&format!("\"{}\"", escape_query(query_text))))
            .map_err(|e| AppError::SearchError(format!("failed to parse query: {}", e)))?;

        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(k))
            .map_err(|e| AppError::SearchError(format!("keyword search failed: {}", e)))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, addr) in top_docs {
            let doc: TantivyDocument = searcher.doc(addr).map_err(|e| AppError::SearchError(e.to_string()))?;
            let metadata = ChunkMetadata {
                file_path: field_text(&doc, self.schema.m_file_path),
                file_name: field_text(&doc, self.schema.m_file_name),
                extension: field_text(&doc, self.schema.m_extension),
                chunk_index: field_u64(&doc, self.schema.m_chunk_index) as usize,
            };
            let text = field_text(&doc, self.schema.content);
            hits.push(KeywordHit { metadata, text, score });
        }
        Ok(hits)
    }

    pub fn document_count(&self) -> usize {
        self.reader.searcher().num_docs() as usize
    }
}

fn field_text(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field).and_then(|v| v.as_str()).unwrap_or_default().to_string()
}

fn field_u64(doc: &TantivyDocument, field: Field) -> u64 {
    doc.get_first(field).and_then(|v| v.as_u64()).unwrap_or(0)
}

/// Tantivy's query syntax treats several characters specially; escape the
/// ones a free-text search query might legitimately contain.
fn escape_query(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if "+-!(){}[]^\"~*?:\\/".contains(ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(path: &str, text: &str, idx: usize) -> ChunkToIndex {
        ChunkToIndex {
            metadata: ChunkMetadata {
                file_path: path.to_string(),
                file_name: path.to_string(),
                extension: "txt".to_string(),
                chunk_index: idx,
            },
            text: text.to_string(),
            symbols: String::new(),
        }
    }

    #[tokio::test]
    async fn add_and_search_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeywordStore::open(dir.path()).unwrap();
        store.add_chunks(&[chunk("/p/a.txt", "hello world", 0)]).await.unwrap();

        let hits = store.top_k("hello", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.file_path, "/p/a.txt");
    }

    #[tokio::test]
    async fn delete_by_file_path_removes_all_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeywordStore::open(dir.path()).unwrap();
        store
            .add_chunks(&[chunk("/p/a.txt", "foo", 0), chunk("/p/a.txt", "bar", 1), chunk("/p/b.txt", "foo", 0)])
            .await
            .unwrap();

        store.delete_by_file_path("/p/a.txt").await.unwrap();
        let hits = store.top_k("foo", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.file_path, "/p/b.txt");
    }

    #[tokio::test]
    async fn empty_query_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeywordStore::open(dir.path()).unwrap();
        assert!(store.top_k("", 10).unwrap().is_empty());
    }
}
