//! Page-level text extraction from the PDF corpus.
//!
//! Turns PDF bytes into one [`PageText`] per page, numbered from 1 and
//! tagged with a source label. Blank pages are dropped, but their numbers
//! still count, so later pages keep their printed page number.

use std::path::Path;

use crate::models::PageText;

/// Extraction error. Never a panic: malformed documents come back as `Pdf`.
#[derive(Debug)]
pub enum ExtractError {
    Io(std::io::Error),
    Pdf(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Io(e) => write!(f, "failed to read PDF: {}", e),
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Read and extract the PDF at `path`.
pub fn read_pdf(path: &Path, source: &str) -> Result<Vec<PageText>, ExtractError> {
    let bytes = std::fs::read(path).map_err(ExtractError::Io)?;
    pdf_pages(&bytes, source)
}

/// Extract per-page text from in-memory PDF bytes.
pub fn pdf_pages(bytes: &[u8], source: &str) -> Result<Vec<PageText>, ExtractError> {
    // pdf-extract panics on some malformed inputs instead of returning Err.
    let texts = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
        .map_err(|_| ExtractError::Pdf("parser panicked on malformed document".to_string()))?
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(number_pages(texts, source))
}

/// Number page texts from 1 in document order, skipping whitespace-only pages.
pub fn number_pages(texts: Vec<String>, source: &str) -> Vec<PageText> {
    texts
        .into_iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(i, text)| PageText::new(i as u32 + 1, text, source))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_pdf_returns_error() {
        let err = pdf_pages(b"not a pdf", "Medical_book.pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn missing_file_returns_io_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = read_pdf(&tmp.path().join("Medical_book.pdf"), "Medical_book.pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Io(_)));
        assert!(err.to_string().starts_with("failed to read PDF"));
    }

    #[test]
    fn pages_are_numbered_from_one() {
        let pages = number_pages(
            vec!["first".to_string(), "second".to_string(), "third".to_string()],
            "Medical_book.pdf",
        );
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].number, 1);
        assert_eq!(pages[2].number, 3);
        assert_eq!(pages[2].text, "third");
        assert!(pages.iter().all(|p| p.source == "Medical_book.pdf"));
    }

    #[test]
    fn blank_pages_are_dropped_without_renumbering() {
        let pages = number_pages(
            vec![
                "first".to_string(),
                String::new(),
                " \n\t ".to_string(),
                "fourth".to_string(),
            ],
            "Medical_book.pdf",
        );
        let numbers: Vec<u32> = pages.iter().map(|p| p.number).collect();
        assert_eq!(numbers, vec![1, 4]);
        assert_eq!(pages[1].text, "fourth");
    }
}
