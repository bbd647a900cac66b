//! Per-language symbol extraction: a supplemental feature improving keyword
//! recall. Populates `ChunkToIndex.symbols` / `EmbeddedSegment.symbols`.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static RE_TS_JS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?m)^(?:export\s+)?(?:async\s+)?function\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^(?:export\s+)?class\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^(?:export\s+)?interface\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^(?:export\s+)?type\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^(?:export\s+)?enum\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^(?:export\s+)?const\s+(\w+)\s*[:=]").unwrap(),
    ]
});

static RE_RUST: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?m)^(?:pub(?:\([\w:]+\))?\s+)?(?:async\s+)?fn\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^(?:pub(?:\([\w:]+\))?\s+)?struct\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^(?:pub(?:\([\w:]+\))?\s+)?enum\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^(?:pub(?:\([\w:]+\))?\s+)?trait\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^(?:pub(?:\([\w:]+\))?\s+)?type\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^impl(?:<[^>]*>)?\s+(\w+)").unwrap(),
    ]
});

static RE_PYTHON: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?m)^(?:async\s+)?def\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^class\s+(\w+)").unwrap(),
    ]
});

static RE_GO: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?m)^func\s+(?:\([^)]+\)\s+)?(\w+)").unwrap(),
        Regex::new(r"(?m)^type\s+(\w+)\s+(?:struct|interface)").unwrap(),
    ]
});

static RE_JAVA: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?m)(?:public|private|protected)?\s*(?:static\s+)?(?:abstract\s+)?class\s+(\w+)").unwrap(),
        Regex::new(r"(?m)(?:public|private|protected)?\s*interface\s+(\w+)").unwrap(),
        Regex::new(r"(?m)(?:public|private|protected)?\s*enum\s+(\w+)").unwrap(),
        Regex::new(r"(?m)(?:public|private|protected)?\s*(?:static\s+)?(?:final\s+)?(?:abstract\s+)?(?:synchronized\s+)?[\w<>\[\]]+\s+(\w+)\s*\(").unwrap(),
    ]
});

static RE_C_CPP: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?m)^(?:static\s+)?(?:inline\s+)?(?:virtual\s+)?(?:[\w:*&<>]+\s+)+(\w+)\s*\(").unwrap(),
        Regex::new(r"(?m)^(?:class|struct)\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^enum\s+(?:class\s+)?(\w+)").unwrap(),
        Regex::new(r"(?m)^namespace\s+(\w+)").unwrap(),
    ]
});

static RE_RUBY: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?m)^\s*def\s+(?:self\.)?(\w+[?!]?)").unwrap(),
        Regex::new(r"(?m)^\s*class\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^\s*module\s+(\w+)").unwrap(),
    ]
});

static RE_PHP: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?m)(?:public|private|protected)?\s*(?:static\s+)?function\s+(\w+)").unwrap(),
        Regex::new(r"(?m)(?:abstract\s+)?class\s+(\w+)").unwrap(),
        Regex::new(r"(?m)interface\s+(\w+)").unwrap(),
        Regex::new(r"(?m)trait\s+(\w+)").unwrap(),
    ]
});

/// Extracts top-level symbol names (functions, classes, structs,
/// interfaces, enums, types, traits, impls) for full-text indexing.
/// Returns a space-separated, deduplicated string; unrecognized languages
/// yield an empty string rather than an error.
pub fn extract_symbols(content: &str, language: &str) -> String {
    let regexes: &[Regex] = match language {
        "typescript" | "javascript" => &RE_TS_JS,
        "rust" => &RE_RUST,
        "python" => &RE_PYTHON,
        "go" => &RE_GO,
        "java" | "kotlin" | "scala" => &RE_JAVA,
        "c" | "cpp" | "csharp" => &RE_C_CPP,
        "ruby" => &RE_RUBY,
        "php" => &RE_PHP,
        _ => return String::new(),
    };

    let mut symbols = Vec::new();
    let mut seen = HashSet::new();

    for re in regexes {
        for cap in re.captures_iter(content) {
            if let Some(name) = cap.get(1) {
                let sym = name.as_str();
                if sym.len() >= 2 && seen.insert(sym.to_string()) {
                    symbols.push(sym.to_string());
                }
            }
        }
    }

    symbols.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_rust_symbols() {
        let content = "pub struct Foo {}\nfn bar() {}\nimpl Foo {}\n";
        let symbols = extract_symbols(content, "rust");
        assert!(symbols.contains("Foo"));
        assert!(symbols.contains("bar"));
    }

    #[test]
    fn unrecognized_language_yields_empty_string() {
        assert_eq!(extract_symbols("anything", "cobol"), "");
    }

    #[test]
    fn deduplicates_repeated_symbol_names() {
        let content = "fn run() {}\nfn run() {}\n";
        let symbols = extract_symbols(content, "rust");
        assert_eq!(symbols.matches("run").count(), 1);
    }
}
