//! ContentInjector: formats retrieved chunks into a prompt-ready
//! context block and substitutes it into a caller-supplied template. Mirrors
//! `classifier.rs`'s plain string-templating approach rather than pulling in
//! a templating crate for two placeholders.

use crate::retriever::RetrievedChunk;

const DEFAULT_TEMPLATE: &str = "{context}\n\n{question}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CitationStyle {
    /// No citation markup, just the chunk text.
    Minimal,
    /// A single-line `[file_name]` marker before each chunk.
    Compact,
    /// A markdown `file://` link naming the file and chunk index.
    Detailed,
}

pub struct ContentInjector {
    citation_style: CitationStyle,
    template: String,
}

impl ContentInjector {
    pub fn new(citation_style: CitationStyle) -> Self {
        Self { citation_style, template: DEFAULT_TEMPLATE.to_string() }
    }

    /// Overrides the default `{context}` / `{question}` template. Callers
    /// that omit one of the placeholders simply lose that substitution.
    pub fn with_template(citation_style: CitationStyle, template: impl Into<String>) -> Self {
        Self { citation_style, template: template.into() }
    }

    pub fn build_prompt(&self, question: &str, chunks: &[RetrievedChunk]) -> String {
        let context = self.render_context(chunks);
        self.template.replace("{context}", &context).replace("{question}", question)
    }

    fn render_context(&self, chunks: &[RetrievedChunk]) -> String {
        if chunks.is_empty() {
            return String::new();
        }
        chunks
            .iter()
            .map(|chunk| self.render_chunk(chunk))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn render_chunk(&self, chunk: &RetrievedChunk) -> String {
        match self.citation_style {
            CitationStyle::Minimal => chunk.text.clone(),
            CitationStyle::Compact => format!("[{}]\n{}", chunk.metadata.file_name, chunk.text),
            CitationStyle::Detailed => format!(
                "[{} (chunk {})](file://{})\nPath: {}\n```{}\n{}\n```",
                chunk.metadata.file_name,
                chunk.metadata.chunk_index,
                chunk.metadata.file_path,
                chunk.metadata.file_path,
                chunk.metadata.extension,
                chunk.text
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::ChunkMetadata;

    fn chunk(path: &str, index: usize, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            metadata: ChunkMetadata {
                file_path: path.to_string(),
                file_name: path.rsplit('/').next().unwrap_or(path).to_string(),
                extension: "rs".to_string(),
                chunk_index: index,
            },
            text: text.to_string(),
            rrf_score: 1.0,
        }
    }

    #[test]
    fn empty_chunks_yield_empty_context() {
        let injector = ContentInjector::new(CitationStyle::Minimal);
        let prompt = injector.build_prompt("what does this do?", &[]);
        assert_eq!(prompt, "\n\nwhat does this do?");
    }

    #[test]
    fn compact_style_prefixes_file_name() {
        let injector = ContentInjector::new(CitationStyle::Compact);
        let prompt = injector.build_prompt("q", &[chunk("/p/a.rs", 0, "fn a() {}")]);
        assert!(prompt.contains("[a.rs]"));
        assert!(prompt.contains("fn a() {}"));
    }

    #[test]
    fn detailed_style_includes_file_link_and_code_fence() {
        let injector = ContentInjector::new(CitationStyle::Detailed);
        let prompt = injector.build_prompt("q", &[chunk("/p/a.rs", 2, "fn a() {}")]);
        assert!(prompt.contains("file:///p/a.rs"));
        assert!(prompt.contains("chunk 2"));
        assert!(prompt.contains("```rs"));
    }

    #[test]
    fn custom_template_is_respected() {
        let injector = ContentInjector::with_template(CitationStyle::Minimal, "CONTEXT:\n{context}\nQ:{question}");
        let prompt = injector.build_prompt("hi", &[chunk("/p/a.rs", 0, "body")]);
        assert!(prompt.starts_with("CONTEXT:\nbody\nQ:hi"));
    }
}
