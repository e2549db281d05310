//! Converting a whole document to text.
//!
//! Each page is handled on its own: we either use its native text layer, or
//! rasterize it and run OCR, cleaning up the result with an
//! [`ArtifactFilter`]. Pages run concurrently, but are always written out in
//! page order.

use std::{io::Write as _, sync::Arc, time::Duration};

use futures::StreamExt as _;

use crate::{
    async_utils::spawn_blocking_propagating_panics,
    document::{Document, DocumentEngine},
    errors::ConvertError,
    filter::ArtifactFilter,
    observer::{ConversionEvent, ConversionObserver},
    ocr::{OcrEngine, OcrPageInput},
    prelude::*,
    trigger::{TextSource, TriggerPolicy},
};

/// Written after every page that produced text.
pub const PAGE_SEPARATOR: &str = "\n\n---\n\n";

/// Where converted documents go by default.
pub const DEFAULT_OUTPUT_DIR: &str = "documents/converted";

/// The default OCR language.
pub const DEFAULT_LANGUAGE: &str = "swe";

/// The default rasterization resolution.
pub const DEFAULT_DPI: u32 = 600;

/// Cleaned OCR text shorter than this (after trimming) is replaced by a
/// placeholder.
pub const DEFAULT_MIN_OCR_CHARS: usize = 10;

/// Options for [`Converter`].
#[derive(Clone, Debug)]
pub struct ConvertOptions {
    /// OCR language code, like `swe` or `eng`.
    pub language: String,
    /// Resolution used to rasterize pages for OCR.
    pub dpi: u32,
    /// How many pages to work on at once.
    pub jobs: usize,
    /// Directory to write `<stem>.md` into.
    pub output_dir: PathBuf,
    /// When to OCR a page.
    pub trigger: TriggerPolicy,
    /// Minimum number of characters of usable OCR text per page.
    pub min_ocr_chars: usize,
    /// Give up on OCR for a page after this long.
    pub page_timeout: Option<Duration>,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_owned(),
            dpi: DEFAULT_DPI,
            jobs: num_cpus::get(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            trigger: TriggerPolicy::default(),
            min_ocr_chars: DEFAULT_MIN_OCR_CHARS,
            page_timeout: None,
        }
    }
}

/// The final text of a single page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExtractionResult {
    /// The page's own text layer, unmodified.
    NativeText(String),
    /// Cleaned OCR output.
    OcrText(String),
    /// A marker standing in for a page we couldn't read.
    Placeholder(String),
}

impl ExtractionResult {
    /// The text to write for this page.
    pub fn text(&self) -> &str {
        match self {
            ExtractionResult::NativeText(text)
            | ExtractionResult::OcrText(text)
            | ExtractionResult::Placeholder(text) => text,
        }
    }
}

/// The result of trying to OCR a page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OcrOutcome {
    /// Raw recognized text.
    Recognized(String),
    /// Rasterization or recognition failed, for the given reason.
    Failed(String),
}

/// What a conversion did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversionSummary {
    /// Number of pages in the source document.
    pub page_count: usize,
    /// Pages which used their native text layer.
    pub native_pages: usize,
    /// Pages which used cleaned OCR text.
    pub ocr_pages: usize,
    /// Pages replaced by a placeholder.
    pub placeholder_pages: usize,
    /// Where we wrote the output.
    pub output_path: PathBuf,
    /// Size of the output, in bytes.
    pub output_bytes: u64,
}

/// Converts documents to text, one page at a time.
pub struct Converter {
    documents: Arc<dyn DocumentEngine>,
    ocr: Arc<dyn OcrEngine>,
    filter: ArtifactFilter,
    options: ConvertOptions,
    observer: Arc<dyn ConversionObserver>,
}

impl Converter {
    /// Create a new converter.
    pub fn new(
        documents: Arc<dyn DocumentEngine>,
        ocr: Arc<dyn OcrEngine>,
        filter: ArtifactFilter,
        options: ConvertOptions,
        observer: Arc<dyn ConversionObserver>,
    ) -> Self {
        Self {
            documents,
            ocr,
            filter,
            options,
            observer,
        }
    }

    /// Where will we write the output for `source`?
    pub fn output_path_for(&self, source: &Path) -> Result<PathBuf> {
        let stem = source.file_stem().ok_or_else(|| {
            anyhow!("cannot get a file name from {:?}", source.display())
        })?;
        let mut file_name = stem.to_owned();
        file_name.push(".md");
        Ok(self.options.output_dir.join(file_name))
    }

    /// Convert `source`, writing the output file.
    ///
    /// Only failing to open the document or to write the output is fatal.
    /// Pages which can't be read get a placeholder.
    #[instrument(level = "debug", skip_all, fields(source = %source.display()))]
    pub async fn convert(&self, source: &Path) -> Result<ConversionSummary> {
        let output_path = self.output_path_for(source)?;
        let doc = self.documents.open(source).await?;
        let page_count = doc.page_count();
        self.observer.on_event(&ConversionEvent::DocumentOpened {
            path: source.to_owned(),
            page_count,
            language: self.options.language.clone(),
            dpi: self.options.dpi,
        });

        let doc = doc.as_ref();
        let results = futures::stream::iter(0..page_count)
            .map(move |page_idx| self.process_page(doc, page_idx, page_count))
            // Work on several pages at once, but yield results in page order.
            .buffered(self.options.jobs.max(1))
            .collect::<Vec<_>>()
            .await;

        let output = assemble_output(&results);
        let output_bytes = write_output(&output_path, output).await?;

        let mut summary = ConversionSummary {
            page_count,
            native_pages: 0,
            ocr_pages: 0,
            placeholder_pages: 0,
            output_path,
            output_bytes,
        };
        for result in &results {
            match result {
                ExtractionResult::NativeText(_) => summary.native_pages += 1,
                ExtractionResult::OcrText(_) => summary.ocr_pages += 1,
                ExtractionResult::Placeholder(_) => summary.placeholder_pages += 1,
            }
        }
        self.observer.on_event(&ConversionEvent::DocumentFinished {
            page_count,
            output_path: summary.output_path.clone(),
            output_bytes,
        });
        Ok(summary)
    }

    /// Get the final text for a single page.
    #[instrument(level = "debug", skip_all, fields(page = page_idx))]
    async fn process_page(
        &self,
        doc: &dyn Document,
        page_idx: usize,
        page_count: usize,
    ) -> ExtractionResult {
        let native_text = doc.native_text(page_idx);
        let source = self.options.trigger.decide(native_text);
        self.observer.on_event(&ConversionEvent::PageStarted {
            page_idx,
            page_count,
            source,
        });

        let result = match source {
            TextSource::UseNative => {
                ExtractionResult::NativeText(native_text.unwrap_or_default().to_owned())
            }
            TextSource::NeedsOcr => match self.ocr_page(doc, page_idx).await {
                OcrOutcome::Failed(reason) => {
                    self.observer
                        .on_event(&ConversionEvent::OcrFailed { page_idx, reason });
                    ExtractionResult::Placeholder(format!(
                        "[OCR failed for page {}]",
                        page_idx + 1
                    ))
                }
                OcrOutcome::Recognized(raw_text) => {
                    let cleaned = self.filter.clean(&raw_text);
                    if cleaned.trim().chars().count() < self.options.min_ocr_chars {
                        self.observer
                            .on_event(&ConversionEvent::MinimalOcrYield { page_idx });
                        ExtractionResult::Placeholder(format!(
                            "[OCR returned minimal text for page {}]",
                            page_idx + 1
                        ))
                    } else {
                        ExtractionResult::OcrText(cleaned)
                    }
                }
            },
        };
        self.observer
            .on_event(&ConversionEvent::PageFinished { page_idx });
        result
    }

    /// OCR a single page, enforcing our timeout. Never fails.
    async fn ocr_page(&self, doc: &dyn Document, page_idx: usize) -> OcrOutcome {
        let result = match self.options.page_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.recognize_page(doc, page_idx))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(anyhow!("timed out after {:?}", limit)),
                }
            }
            None => self.recognize_page(doc, page_idx).await,
        };
        match result {
            Ok(text) => OcrOutcome::Recognized(text),
            Err(err) => OcrOutcome::Failed(format!("{err:#}")),
        }
    }

    /// Rasterize and recognize a single page.
    async fn recognize_page(&self, doc: &dyn Document, page_idx: usize) -> Result<String> {
        let image = doc
            .rasterize(page_idx, self.options.dpi)
            .await
            .with_context(|| format!("failed to rasterize page {}", page_idx + 1))?;
        self.ocr
            .recognize(OcrPageInput {
                page_idx,
                image,
                language: self.options.language.clone(),
                dpi: self.options.dpi,
            })
            .await
    }
}

/// Join page texts in order. Pages with no text are skipped, and every other
/// page is followed by [`PAGE_SEPARATOR`].
pub fn assemble_output(results: &[ExtractionResult]) -> String {
    let mut output = String::new();
    for result in results {
        let text = result.text();
        if !text.trim().is_empty() {
            output.push_str(text);
            output.push_str(PAGE_SEPARATOR);
        }
    }
    output
}

/// Write `output` to `path`, creating parent directories as needed.
///
/// We write to a temporary file next to `path` and rename it into place, so
/// readers never see a partial file.
async fn write_output(path: &Path, output: String) -> Result<u64, ConvertError> {
    let output_error = |source| ConvertError::OutputWrite {
        path: path.to_owned(),
        source,
    };
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_owned(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&dir).await.map_err(output_error)?;

    let final_path = path.to_owned();
    spawn_blocking_propagating_panics(move || -> std::io::Result<u64> {
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(output.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&final_path).map_err(|err| err.error)?;
        Ok(output.len() as u64)
    })
    .await
    .map_err(output_error)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::{
        document::{LocalDocumentEngine, PageImage},
        observer::RecordingObserver,
    };

    use super::*;

    /// Native text long enough to be used as-is.
    fn native(n: usize) -> Option<String> {
        Some(format!(
            "Sida {n}: Styrelsen avger härmed årsredovisning för räkenskapsåret."
        ))
    }

    /// How our stub OCR engine should handle a page.
    #[derive(Clone)]
    enum StubOcrPage {
        Text(&'static str, Duration),
        Fail,
        Hang,
    }

    struct StubDocumentEngine {
        pages: Vec<Option<String>>,
    }

    #[async_trait]
    impl DocumentEngine for StubDocumentEngine {
        async fn open(&self, _path: &Path) -> Result<Arc<dyn Document>, ConvertError> {
            Ok(Arc::new(StubDocument {
                pages: self.pages.clone(),
            }))
        }
    }

    struct StubDocument {
        pages: Vec<Option<String>>,
    }

    #[async_trait]
    impl Document for StubDocument {
        fn page_count(&self) -> usize {
            self.pages.len()
        }

        fn native_text(&self, page_idx: usize) -> Option<&str> {
            self.pages.get(page_idx)?.as_deref()
        }

        async fn rasterize(&self, page_idx: usize, _dpi: u32) -> Result<PageImage> {
            Ok(PageImage {
                mime_type: "image/png".to_owned(),
                data: vec![page_idx as u8],
            })
        }
    }

    struct StubOcrEngine {
        pages: HashMap<usize, StubOcrPage>,
    }

    #[async_trait]
    impl OcrEngine for StubOcrEngine {
        async fn recognize(&self, input: OcrPageInput) -> Result<String> {
            assert_eq!(input.image.data, vec![input.page_idx as u8]);
            match self.pages.get(&input.page_idx).cloned() {
                Some(StubOcrPage::Text(text, delay)) => {
                    tokio::time::sleep(delay).await;
                    Ok(text.to_owned())
                }
                Some(StubOcrPage::Fail) => Err(anyhow!("engine crashed")),
                Some(StubOcrPage::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok("too late".to_owned())
                }
                None => panic!("unexpected OCR of page {}", input.page_idx),
            }
        }
    }

    struct Fixture {
        converter: Converter,
        observer: Arc<RecordingObserver>,
        dir: tempfile::TempDir,
    }

    fn fixture(
        pages: Vec<Option<String>>,
        ocr_pages: Vec<(usize, StubOcrPage)>,
        configure: impl FnOnce(&mut ConvertOptions),
    ) -> Result<Fixture> {
        let dir = tempfile::TempDir::with_prefix("convert")?;
        let mut options = ConvertOptions {
            jobs: 5,
            output_dir: dir.path().join("converted"),
            ..ConvertOptions::default()
        };
        configure(&mut options);
        let observer = Arc::new(RecordingObserver::default());
        let converter = Converter::new(
            Arc::new(StubDocumentEngine { pages }),
            Arc::new(StubOcrEngine {
                pages: ocr_pages.into_iter().collect(),
            }),
            ArtifactFilter::default(),
            options,
            observer.clone(),
        );
        Ok(Fixture {
            converter,
            observer,
            dir,
        })
    }

    #[test]
    fn assembles_non_blank_pages_in_order() {
        let output = assemble_output(&[
            ExtractionResult::NativeText("one".to_owned()),
            ExtractionResult::NativeText(" \n ".to_owned()),
            ExtractionResult::Placeholder("[OCR failed for page 3]".to_owned()),
        ]);
        assert_eq!(
            output,
            "one\n\n---\n\n[OCR failed for page 3]\n\n---\n\n"
        );
    }

    #[tokio::test]
    async fn pages_stay_in_order_when_ocr_finishes_out_of_order() -> Result<()> {
        let fx = fixture(
            vec![native(1), None, native(3), Some("x".to_owned()), native(5)],
            vec![
                (
                    1,
                    StubOcrPage::Text(
                        "Resultaträkning för 2023\n",
                        Duration::from_millis(200),
                    ),
                ),
                (
                    3,
                    StubOcrPage::Text("Balansräkning för 2023\n", Duration::ZERO),
                ),
            ],
            |_| {},
        )?;
        let summary = fx.converter.convert(Path::new("report.pdf")).await?;

        let expected = [
            native(1).unwrap(),
            "Resultaträkning för 2023".to_owned(),
            native(3).unwrap(),
            "Balansräkning för 2023".to_owned(),
            native(5).unwrap(),
        ]
        .iter()
        .map(|page| format!("{page}{PAGE_SEPARATOR}"))
        .collect::<String>();
        let output_path = fx.dir.path().join("converted/report.md");
        assert_eq!(tokio::fs::read_to_string(&output_path).await?, expected);
        assert_eq!(
            summary,
            ConversionSummary {
                page_count: 5,
                native_pages: 3,
                ocr_pages: 2,
                placeholder_pages: 0,
                output_path,
                output_bytes: expected.len() as u64,
            }
        );

        // Page 4 finished before page 2, so events arrive out of order.
        let finished = fx
            .observer
            .events()
            .into_iter()
            .filter_map(|event| match event {
                ConversionEvent::PageFinished { page_idx } => Some(page_idx),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(finished.len(), 5);
        let pos = |idx| finished.iter().position(|&i| i == idx);
        assert!(pos(3) < pos(1), "{finished:?}");
        Ok(())
    }

    #[tokio::test]
    async fn ocr_failures_only_affect_their_own_page() -> Result<()> {
        let fx = fixture(
            vec![native(1), native(2), None, native(4), native(5)],
            vec![(2, StubOcrPage::Fail)],
            |_| {},
        )?;
        let summary = fx.converter.convert(Path::new("scan.pdf")).await?;
        assert_eq!(summary.native_pages, 4);
        assert_eq!(summary.placeholder_pages, 1);

        let output = tokio::fs::read_to_string(&summary.output_path).await?;
        let segments = output.split(PAGE_SEPARATOR).collect::<Vec<_>>();
        assert_eq!(
            segments,
            vec![
                native(1).unwrap().as_str(),
                native(2).unwrap().as_str(),
                "[OCR failed for page 3]",
                native(4).unwrap().as_str(),
                native(5).unwrap().as_str(),
                "",
            ]
        );
        assert!(fx.observer.events().iter().any(|event| matches!(
            event,
            ConversionEvent::OcrFailed { page_idx: 2, reason } if reason.contains("engine crashed")
        )));
        Ok(())
    }

    #[tokio::test]
    async fn minimal_ocr_text_gets_a_placeholder() -> Result<()> {
        let fx = fixture(
            vec![None, None],
            vec![
                // Everything here is dropped by the filter.
                (0, StubOcrPage::Text("Ab\n 42 \n.....\n", Duration::ZERO)),
                // Clean, but too short.
                (1, StubOcrPage::Text("Hej då", Duration::ZERO)),
            ],
            |_| {},
        )?;
        let summary = fx.converter.convert(Path::new("scan.png")).await?;
        assert_eq!(summary.placeholder_pages, 2);
        let output = tokio::fs::read_to_string(&summary.output_path).await?;
        assert_eq!(
            output,
            "[OCR returned minimal text for page 1]\n\n---\n\n\
             [OCR returned minimal text for page 2]\n\n---\n\n"
        );
        let minimal = fx
            .observer
            .events()
            .into_iter()
            .filter(|event| matches!(event, ConversionEvent::MinimalOcrYield { .. }))
            .count();
        assert_eq!(minimal, 2);
        Ok(())
    }

    #[tokio::test]
    async fn ocr_text_is_cleaned() -> Result<()> {
        let fx = fixture(
            vec![None],
            vec![(
                0,
                StubOcrPage::Text(
                    "Förvaltningsberättelse\n|| . ||\nTotalt KR KR KR KR 2023\n",
                    Duration::ZERO,
                ),
            )],
            |_| {},
        )?;
        let summary = fx.converter.convert(Path::new("scan.pdf")).await?;
        assert_eq!(summary.ocr_pages, 1);
        let output = tokio::fs::read_to_string(&summary.output_path).await?;
        assert_eq!(
            output,
            format!("Förvaltningsberättelse\nTotalt 2023{PAGE_SEPARATOR}")
        );
        Ok(())
    }

    #[tokio::test]
    async fn slow_ocr_times_out() -> Result<()> {
        let fx = fixture(
            vec![native(1), None],
            vec![(1, StubOcrPage::Hang)],
            |options| options.page_timeout = Some(Duration::from_millis(50)),
        )?;
        let summary = fx.converter.convert(Path::new("scan.pdf")).await?;
        assert_eq!(summary.placeholder_pages, 1);
        let output = tokio::fs::read_to_string(&summary.output_path).await?;
        assert!(output.ends_with(&format!("[OCR failed for page 2]{PAGE_SEPARATOR}")));
        assert!(fx.observer.events().iter().any(|event| matches!(
            event,
            ConversionEvent::OcrFailed { page_idx: 1, reason } if reason.contains("timed out")
        )));
        Ok(())
    }

    #[tokio::test]
    async fn blank_native_pages_contribute_nothing() -> Result<()> {
        let fx = fixture(
            vec![native(1), Some("  \n".to_owned()), native(3)],
            vec![],
            |options| options.trigger.native_min_chars = 0,
        )?;
        let summary = fx.converter.convert(Path::new("report.pdf")).await?;
        assert_eq!(summary.native_pages, 3);
        let output = tokio::fs::read_to_string(&summary.output_path).await?;
        assert_eq!(output.matches(PAGE_SEPARATOR).count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn conversion_is_idempotent() -> Result<()> {
        let fx = fixture(
            vec![None, native(2), None],
            vec![
                (0, StubOcrPage::Text("Noter till räkenskaperna", Duration::ZERO)),
                (2, StubOcrPage::Fail),
            ],
            |_| {},
        )?;
        let first = fx.converter.convert(Path::new("report.pdf")).await?;
        let first_output = tokio::fs::read(&first.output_path).await?;
        let second = fx.converter.convert(Path::new("report.pdf")).await?;
        let second_output = tokio::fs::read(&second.output_path).await?;
        assert_eq!(first, second);
        assert_eq!(first_output, second_output);
        Ok(())
    }

    #[tokio::test]
    async fn missing_source_is_fatal_and_writes_nothing() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("convert")?;
        let options = ConvertOptions {
            output_dir: dir.path().join("converted"),
            ..ConvertOptions::default()
        };
        let converter = Converter::new(
            Arc::new(LocalDocumentEngine::default()),
            Arc::new(StubOcrEngine {
                pages: HashMap::new(),
            }),
            ArtifactFilter::default(),
            options,
            Arc::new(RecordingObserver::default()),
        );
        let err = converter
            .convert(Path::new("documents/original/missing.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConvertError>(),
            Some(ConvertError::SourceNotFound(_))
        ));
        assert!(!dir.path().join("converted/missing.md").exists());
        Ok(())
    }

    #[test]
    fn output_path_uses_the_source_stem() -> Result<()> {
        let converter = Converter::new(
            Arc::new(StubDocumentEngine { pages: vec![] }),
            Arc::new(StubOcrEngine {
                pages: HashMap::new(),
            }),
            ArtifactFilter::default(),
            ConvertOptions::default(),
            Arc::new(RecordingObserver::default()),
        );
        assert_eq!(
            converter.output_path_for(Path::new("documents/original/årsredovisning.pdf"))?,
            Path::new("documents/converted/årsredovisning.md")
        );
        assert!(converter.output_path_for(Path::new("")).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn output_write_failures_are_fatal() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("convert")?;
        // A file where the output directory should be.
        let blocker = dir.path().join("converted");
        tokio::fs::write(&blocker, "not a directory").await?;
        let fx = fixture(vec![native(1)], vec![], |options| {
            options.output_dir = blocker.clone();
        })?;
        let err = fx
            .converter
            .convert(Path::new("report.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConvertError>(),
            Some(ConvertError::OutputWrite { .. })
        ));
        Ok(())
    }
}
