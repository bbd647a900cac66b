//! TextExtractor: `path -> string`, dispatching on extension. Plain text
//! extensions are read as UTF-8 with a lossy fallback; PDF goes through an
//! external parser.

use std::path::Path;

use crate::error::{AppError, AppResult};

pub fn extract(path: &Path) -> AppResult<String> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => extract_pdf(path),
        _ => extract_plain_text(path),
    }
}

fn extract_plain_text(path: &Path) -> AppResult<String> {
    let bytes = std::fs::read(path)?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(err) => Ok(String::from_utf8_lossy(err.as_bytes()).into_owned()),
    }
}

fn extract_pdf(path: &Path) -> AppResult<String> {
    pdf_extract::extract_text(path)
        .map_err(|e| AppError::IndexError(format!("PDF extraction failed for {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_utf8_plain_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all("hello world".as_bytes()).unwrap();
        assert_eq!(extract(&path).unwrap(), "hello world");
    }

    #[test]
    fn falls_back_to_lossy_on_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&[b'h', b'i', 0xff, 0xfe]).unwrap();
        let text = extract(&path).unwrap();
        assert!(text.starts_with("hi"));
    }
}
