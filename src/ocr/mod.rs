//! OCR engine interface.

use crate::{document::PageImage, prelude::*};

pub mod tesseract;

/// A page to recognize.
#[derive(Clone, Debug)]
pub struct OcrPageInput {
    /// The index of the page within the document.
    pub page_idx: usize,
    /// The rasterized page.
    pub image: PageImage,
    /// The OCR language code, like `swe` or `eng`.
    pub language: String,
    /// The resolution `image` was rendered at.
    pub dpi: u32,
}

/// Interface to an OCR engine.
///
/// Errors returned here are never fatal to a conversion. The page just gets a
/// placeholder instead.
#[async_trait]
pub trait OcrEngine: Send + Sync + 'static {
    /// Recognize the text on a single page.
    async fn recognize(&self, input: OcrPageInput) -> Result<String>;
}
