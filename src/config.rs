use serde::{Deserialize, Serialize};

/// Maximum allowed length for search queries (characters).
pub const MAX_SEARCH_QUERY_LENGTH: usize = 1000;

/// Canonical list of file extensions considered indexable and embeddable.
/// Both the keyword indexer and the embedding pipeline use this single list
/// so they never diverge.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    // JavaScript / TypeScript
    "ts", "tsx", "js", "jsx", "mjs", "cjs",
    // Systems / compiled
    "rs", "py", "go", "java", "c", "cpp", "h", "hpp",
    "cs", "rb", "php", "swift", "kt", "scala",
    // Web
    "html", "css", "scss", "less", "sass",
    // Data / config
    "json", "yaml", "yml", "toml", "xml",
    // Documentation
    "md", "mdx", "txt", "rst",
    // Query / schema
    "sql", "graphql", "gql",
    // Shell
    "sh", "bash", "zsh", "fish", "ps1", "bat", "cmd",
    // Build / container
    "dockerfile", "makefile",
    // Frontend frameworks
    "vue", "svelte", "astro",
    // Misc languages
    "lua", "zig", "nim", "dart", "elixir", "ex", "exs",
    "r", "jl", "clj", "cljs", "cljc", "erl", "hrl",
    // Infra / IPC
    "tf", "hcl", "proto",
    // Dotfiles / config
    "env", "ini", "cfg", "conf",
    // Parsed via an external text-extraction capability rather than read
    // as UTF-8 source, but still a first-class indexable type.
    "pdf",
];

/// Extensions that are unambiguously binary and therefore never indexable,
/// independent of the supported-extensions allowlist above.
pub const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "svg", "tiff",
    "mp3", "mp4", "mov", "avi", "mkv", "wav", "flac", "ogg",
    "zip", "tar", "gz", "bz2", "7z", "rar", "xz",
    "exe", "dll", "so", "dylib", "a", "o", "class", "jar", "wasm",
    "woff", "woff2", "ttf", "otf", "eot",
    "db", "sqlite", "sqlite3",
];

/// Directory/file names excluded from every project regardless of detected
/// project type — build artifacts, VCS internals, dependency caches.
pub const COMMON_EXCLUDE_GLOBS: &[&str] = &[
    "node_modules/", ".git/", "target/", "dist/", "build/", "out/",
    ".next/", ".nuxt/", ".output/", ".vite/", ".turbo/", ".svelte-kit/",
    ".parcel-cache/", "__pycache__/", ".tox/", ".mypy_cache/",
    ".pytest_cache/", ".ruff_cache/", "coverage/", ".nyc_output/",
    ".cache/", "vendor/", ".gradle/", ".terraform/", ".eggs/",
    ".vscode/", ".idea/", ".angular/", ".expo/", ".vercel/",
    ".netlify/", ".serverless/", ".aws-sam/", "__generated__/",
];

/// One entry per recognized project type: if any `markers` entry matches a
/// root-level directory/file name (exact, or glob when it contains `*`),
/// the corresponding `exclude_globs` fold into the FileFilter for that
/// knowledge source's root.
pub struct ProjectTypeRule {
    pub name: &'static str,
    pub markers: &'static [&'static str],
    pub exclude_globs: &'static [&'static str],
}

pub const PROJECT_TYPE_RULES: &[ProjectTypeRule] = &[
    ProjectTypeRule {
        name: "rust",
        markers: &["Cargo.toml"],
        exclude_globs: &["target/"],
    },
    ProjectTypeRule {
        name: "node",
        markers: &["package.json"],
        exclude_globs: &["node_modules/", "dist/", "build/"],
    },
    ProjectTypeRule {
        name: "python",
        markers: &["pyproject.toml", "setup.py", "*.egg-info"],
        exclude_globs: &["__pycache__/", ".venv/", "venv/", "*.egg-info/"],
    },
    ProjectTypeRule {
        name: "java-gradle",
        markers: &["build.gradle", "build.gradle.kts"],
        exclude_globs: &[".gradle/", "build/"],
    },
    ProjectTypeRule {
        name: "java-maven",
        markers: &["pom.xml"],
        exclude_globs: &["target/"],
    },
    ProjectTypeRule {
        name: "go",
        markers: &["go.mod"],
        exclude_globs: &["vendor/"],
    },
];

/// Check whether a file extension (without leading dot, lowercase) is in the
/// shared supported-extensions list.
pub fn is_supported_extension(ext: &str) -> bool {
    SUPPORTED_EXTENSIONS.contains(&ext)
}

pub fn is_binary_extension(ext: &str) -> bool {
    BINARY_EXTENSIONS.contains(&ext)
}

/// Fallback token-limit lookup by embedding-model family, used when a
/// provider's dimension/limit probe is unavailable. Longest/most-specific
/// pattern wins; unknown models get a conservative default.
pub fn token_limit_for_model(model: &str) -> usize {
    let m = model.to_lowercase();
    const FAMILIES: &[(&str, usize)] = &[
        ("text-embedding-3", 8191),
        ("nomic-embed", 8192),
        ("mxbai-embed", 512),
        ("bge-", 512),
        ("gte", 8192),
        ("e5", 512),
        ("all-minilm", 512),
        ("qwen3", 8192),
    ];
    for (needle, limit) in FAMILIES {
        if m.contains(needle) {
            return *limit;
        }
    }
    2048
}

/// Fallback vector-dimension lookup by embedding-model family, used as the
/// `VectorStore`'s declared dimension when no `preferred_dim` is configured
/// and the provider can't be probed synchronously at construction time. A
/// separate table from `token_limit_for_model` deliberately: token budget
/// and embedding width are unrelated properties of a model and must never
/// be conflated (a token-limit value used as a vector dimension silently
/// mismatches real provider output and corrupts the HNSW index).
pub fn embedding_dimension_for_model(model: &str) -> usize {
    let m = model.to_lowercase();
    const FAMILIES: &[(&str, usize)] = &[
        ("text-embedding-3-large", 3072),
        ("text-embedding-3-small", 1536),
        ("text-embedding-ada", 1536),
        ("nomic-embed", 768),
        ("mxbai-embed", 1024),
        ("bge-large", 1024),
        ("bge-base", 768),
        ("bge-small", 384),
        ("gte-large", 1024),
        ("gte-base", 768),
        ("e5-large", 1024),
        ("e5-base", 768),
        ("e5-small", 384),
        ("all-minilm", 384),
        ("qwen3", 1024),
    ];
    for (needle, dim) in FAMILIES {
        if m.contains(needle) {
            return *dim;
        }
    }
    1536
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub listen_addr: String,
    pub data_dir: String,

    /// Hard cap on a single file's size before FileFilter excludes it.
    pub max_file_size_bytes: usize,
    /// Soft cap on total on-disk index size per knowledge source, in MB.
    /// Advisory only: surfaced via status, never enforced mid-pass.
    pub max_index_size_mb: usize,
    /// Hard cap on the number of files tracked per knowledge source.
    pub max_indexed_files: usize,

    /// File-watcher debounce window in milliseconds, clamped to [200, 1000].
    pub watcher_debounce_ms: u64,
    pub enable_file_watcher: bool,

    /// Progress events are emitted roughly every N files during a pass.
    pub index_batch_size: usize,
    /// Bounded parallelism: chunks processed concurrently per coordinator.
    pub concurrent_indexing_threads: usize,

    /// ChunkPlanner sizing-policy inputs.
    pub configured_max_chars: usize,
    pub configured_overlap_max: usize,

    /// Embedding retry policy for transient provider errors.
    pub embedding_retry_attempts: u32,
    pub embedding_retry_base_ms: u64,
    /// Optional pacing delay between embedding requests, for rate-limited
    /// remote providers. Zero disables pacing.
    pub embedding_per_request_sleep_ms: u64,

    /// Hybrid retrieval defaults.
    pub max_results: usize,
    pub rrf_k: u32,

    /// Intent classifier hard timeout; on expiry the classifier fails open.
    pub classification_timeout_ms: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let port = std::env::var("RAGFORGE_PORT").unwrap_or_else(|_| "9731".to_string());

        let data_dir = std::env::var("RAGFORGE_DATA_DIR").unwrap_or_else(|_| {
            dirs::data_local_dir()
                .map(|d| d.join("ragforge").to_string_lossy().to_string())
                .unwrap_or_else(|| ".ragforge-data".to_string())
        });

        fn env_u64(key: &str, default: u64) -> u64 {
            std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
        }
        fn env_usize(key: &str, default: usize) -> usize {
            std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
        }
        fn env_u32(key: &str, default: u32) -> u32 {
            std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
        }
        fn env_bool(key: &str, default: bool) -> bool {
            std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
        }

        let watcher_debounce_ms = env_u64("RAGFORGE_WATCHER_DEBOUNCE_MS", 300).clamp(200, 1000);

        Self {
            listen_addr: format!("127.0.0.1:{}", port),
            data_dir,
            max_file_size_bytes: env_usize("RAGFORGE_MAX_FILE_SIZE", 10 * 1024 * 1024),
            max_index_size_mb: env_usize("RAGFORGE_MAX_INDEX_MB", 512),
            max_indexed_files: env_usize("RAGFORGE_MAX_INDEXED_FILES", 200_000),
            watcher_debounce_ms,
            enable_file_watcher: env_bool("RAGFORGE_ENABLE_WATCHER", true),
            index_batch_size: env_usize("RAGFORGE_INDEX_BATCH_SIZE", 10),
            concurrent_indexing_threads: env_usize("RAGFORGE_CONCURRENT_INDEXING_THREADS", 4),
            configured_max_chars: env_usize("RAGFORGE_CHUNK_MAX_CHARS", 2000),
            configured_overlap_max: env_usize("RAGFORGE_CHUNK_OVERLAP_MAX", 200),
            embedding_retry_attempts: env_u32("RAGFORGE_EMBED_RETRY_ATTEMPTS", 3),
            embedding_retry_base_ms: env_u64("RAGFORGE_EMBED_RETRY_BASE_MS", 500),
            embedding_per_request_sleep_ms: env_u64("RAGFORGE_EMBED_PACING_MS", 0),
            max_results: env_usize("RAGFORGE_MAX_RESULTS", 8),
            rrf_k: env_u32("RAGFORGE_RRF_K", 60),
            classification_timeout_ms: env_u64("RAGFORGE_CLASSIFICATION_TIMEOUT_MS", 5000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_extension_lookup() {
        assert!(is_supported_extension("rs"));
        assert!(is_supported_extension("pdf"));
        assert!(!is_supported_extension("png"));
    }

    #[test]
    fn binary_extensions_never_supported() {
        for ext in BINARY_EXTENSIONS {
            assert!(!is_supported_extension(ext), "{ext} should not be supported");
        }
    }

    #[test]
    fn watcher_debounce_clamped() {
        std::env::set_var("RAGFORGE_WATCHER_DEBOUNCE_MS", "5000");
        let cfg = AppConfig::from_env();
        assert_eq!(cfg.watcher_debounce_ms, 1000);
        std::env::set_var("RAGFORGE_WATCHER_DEBOUNCE_MS", "10");
        let cfg = AppConfig::from_env();
        assert_eq!(cfg.watcher_debounce_ms, 200);
        std::env::remove_var("RAGFORGE_WATCHER_DEBOUNCE_MS");
    }

    #[test]
    fn token_limit_matches_known_family() {
        assert_eq!(token_limit_for_model("text-embedding-3-small"), 8191);
        assert_eq!(token_limit_for_model("unknown-model"), 2048);
    }

    #[test]
    fn embedding_dimension_matches_known_family_and_is_distinct_from_token_limit() {
        assert_eq!(embedding_dimension_for_model("text-embedding-3-small"), 1536);
        assert_eq!(embedding_dimension_for_model("text-embedding-3-large"), 3072);
        assert_eq!(embedding_dimension_for_model("unknown-model"), 1536);
        assert_ne!(
            embedding_dimension_for_model("text-embedding-3-small"),
            token_limit_for_model("text-embedding-3-small")
        );
    }
}
