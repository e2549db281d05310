//! Image files, treated as single-page documents with no text layer.

use crate::prelude::*;

use super::{Document, PageImage};

/// A single image file. It never has native text, so it always gets OCRed.
///
/// Multipage TIFFs are passed to the OCR engine whole, and come back as a
/// single page of text.
pub struct ImageDocument {
    path: PathBuf,
    mime_type: String,
}

impl ImageDocument {
    /// Wrap an image file.
    pub fn new(path: PathBuf, mime_type: String) -> Self {
        Self { path, mime_type }
    }
}

#[async_trait]
impl Document for ImageDocument {
    fn page_count(&self) -> usize {
        1
    }

    fn native_text(&self, _page_idx: usize) -> Option<&str> {
        None
    }

    async fn rasterize(&self, page_idx: usize, _dpi: u32) -> Result<PageImage> {
        if page_idx != 0 {
            return Err(anyhow!("image documents only have one page"));
        }
        let data = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("failed to read image {:?}", self.path.display()))?;
        Ok(PageImage {
            mime_type: self.mime_type.clone(),
            data,
        })
    }
}
