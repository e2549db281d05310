//! Opening documents, reading their native text and rasterizing their pages.
//!
//! The real work is done by external engines. [`DocumentEngine`] and
//! [`Document`] are the seams where we plug them in, which also lets us test
//! the conversion logic against in-memory documents.

use std::sync::Arc;

use crate::{errors::ConvertError, prelude::*};

use self::{image::ImageDocument, pdf::PdfDocument};

pub mod image;
pub mod pdf;

/// Image types we can OCR directly, as single-page documents.
const SUPPORTED_IMAGE_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/webp",
    "image/gif",
    "image/tiff",
];

/// PDF MIME type.
const PDF_MIME_TYPE: &str = "application/pdf";

/// A rasterized page, ready to be passed to an OCR engine.
#[derive(Clone, Debug)]
pub struct PageImage {
    /// The MIME type of `data`.
    pub mime_type: String,
    /// The encoded image.
    pub data: Vec<u8>,
}

/// An open document.
///
/// Any resources held by the document are released when it is dropped.
#[async_trait]
pub trait Document: Send + Sync + 'static {
    /// The number of pages in the document.
    fn page_count(&self) -> usize;

    /// The native text layer of a page, if it has one.
    fn native_text(&self, page_idx: usize) -> Option<&str>;

    /// Render the full page at `dpi`, for OCR.
    async fn rasterize(&self, page_idx: usize, dpi: u32) -> Result<PageImage>;
}

/// Something which can open documents.
#[async_trait]
pub trait DocumentEngine: Send + Sync + 'static {
    /// Open the document at `path`.
    async fn open(&self, path: &Path) -> Result<Arc<dyn Document>, ConvertError>;
}

/// Opens local PDFs using Poppler's command-line tools, and local images as
/// single-page documents.
#[derive(Clone, Debug, Default)]
pub struct LocalDocumentEngine {
    /// Password for encrypted PDFs.
    password: Option<String>,
}

impl LocalDocumentEngine {
    /// Create a new engine, with an optional PDF password.
    pub fn new(password: Option<String>) -> Self {
        Self { password }
    }
}

#[async_trait]
impl DocumentEngine for LocalDocumentEngine {
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    async fn open(&self, path: &Path) -> Result<Arc<dyn Document>, ConvertError> {
        if !path.exists() {
            return Err(ConvertError::SourceNotFound(path.to_owned()));
        }
        let mime_type =
            get_mime_type(path).map_err(|err| ConvertError::document_open(path, err))?;
        if mime_type == PDF_MIME_TYPE {
            let doc = PdfDocument::open(path, self.password.clone())
                .await
                .map_err(|err| ConvertError::document_open(path, err))?;
            Ok(Arc::new(doc))
        } else if SUPPORTED_IMAGE_TYPES.contains(&mime_type.as_str()) {
            Ok(Arc::new(ImageDocument::new(path.to_owned(), mime_type)))
        } else {
            Err(ConvertError::document_open(
                path,
                anyhow!(
                    "unsupported MIME type {} (supported: PDF, PNG, JPEG, WebP, GIF, TIFF)",
                    mime_type
                ),
            ))
        }
    }
}

/// Get the MIME type of a file from its contents.
pub fn get_mime_type(path: &Path) -> Result<String> {
    Ok(infer::get_from_path(path)
        .with_context(|| format!("failed to get MIME type for {:?}", path.display()))?
        .ok_or_else(|| anyhow!("unknown MIME type for {:?}", path.display()))?
        .mime_type()
        .to_string())
}
