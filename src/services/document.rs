use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

/// Bytes scanned for the `%PDF-` header.
const HEADER_SEARCH_BYTES: usize = 1024;

/// Share of pages that must carry a text layer for a digital PDF.
const MIN_TEXT_PAGE_PERCENT: usize = 20;

/// An uploaded document, validated as a plausible PDF.
#[derive(Debug, Clone)]
pub struct Document {
    file_name: String,
    bytes: Arc<[u8]>,
}

impl Document {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, DocumentError> {
        let file_name = file_name.into();
        let is_pdf_name = Path::new(&file_name)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
        if !is_pdf_name {
            return Err(DocumentError::InvalidInput(format!(
                "{file_name} is not a .pdf file"
            )));
        }
        if bytes.is_empty() {
            return Err(DocumentError::InvalidInput(format!("{file_name} is empty")));
        }
        let head = &bytes[..bytes.len().min(HEADER_SEARCH_BYTES)];
        if !head.windows(5).any(|w| w == b"%PDF-") {
            return Err(DocumentError::InvalidInput(format!(
                "{file_name} does not look like a PDF"
            )));
        }
        Ok(Self {
            file_name,
            bytes: bytes.into(),
        })
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// File name without its extension, used to name exported artifacts.
    pub fn stem(&self) -> &str {
        Path::new(&self.file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document")
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Text of one page, 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub page_number: u32,
    pub text: String,
}

/// Joins page texts in page order.
pub fn join_pages(pages: &[PageText]) -> String {
    pages
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Decides whether a document has a usable text layer.
#[async_trait]
pub trait TypeClassifier: Send + Sync {
    async fn is_scanned(&self, document: &Document) -> Result<bool, DocumentError>;
}

/// Produces the text layer of a digital document.
#[async_trait]
pub trait TextSource: Send + Sync {
    async fn extract_text(&self, document: &Document) -> Result<Vec<PageText>, DocumentError>;
}

/// Classifier and text source backed by `lopdf`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfBackend;

impl LopdfBackend {
    fn read_pages(bytes: &[u8]) -> Result<Vec<PageText>, DocumentError> {
        let doc = lopdf::Document::load_mem(bytes)
            .map_err(|e| DocumentError::Unreadable(e.to_string()))?;

        let pages = doc
            .get_pages()
            .into_keys()
            .map(|page_number| {
                let text = match doc.extract_text(&[page_number]) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::debug!(page_number, error = %e, "no text layer on page");
                        String::new()
                    }
                };
                PageText { page_number, text }
            })
            .collect();
        Ok(pages)
    }

    async fn pages(document: &Document) -> Result<Vec<PageText>, DocumentError> {
        let bytes = Arc::clone(&document.bytes);
        tokio::task::spawn_blocking(move || Self::read_pages(&bytes)).await?
    }
}

fn has_text(page: &PageText) -> bool {
    page.text.chars().any(|c| c.is_alphanumeric())
}

/// A document is scanned when it has no pages or too few pages with text.
pub fn looks_scanned(pages: &[PageText]) -> bool {
    if pages.is_empty() {
        return true;
    }
    let with_text = pages.iter().filter(|p| has_text(p)).count();
    with_text * 100 < pages.len() * MIN_TEXT_PAGE_PERCENT
}

#[async_trait]
impl TypeClassifier for LopdfBackend {
    async fn is_scanned(&self, document: &Document) -> Result<bool, DocumentError> {
        let pages = Self::pages(document).await?;
        Ok(looks_scanned(&pages))
    }
}

#[async_trait]
impl TextSource for LopdfBackend {
    async fn extract_text(&self, document: &Document) -> Result<Vec<PageText>, DocumentError> {
        Self::pages(document).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Invalid document: {0}")]
    InvalidInput(String),
    #[error("Could not read PDF: {0}")]
    Unreadable(String),
    #[error("PDF worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}
