//! Reporting conversion progress.
//!
//! The converter never prints anything itself. It reports what it is doing to
//! a [`ConversionObserver`], and the observer decides what to show.

use std::sync::Mutex;

use indicatif::ProgressBar;

use crate::{prelude::*, trigger::TextSource, ui::Ui};

/// Something that happened during a conversion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConversionEvent {
    /// The source document was opened.
    DocumentOpened {
        path: PathBuf,
        page_count: usize,
        language: String,
        dpi: u32,
    },
    /// We chose where a page's text will come from.
    PageStarted {
        page_idx: usize,
        page_count: usize,
        source: TextSource,
    },
    /// OCR failed for a page, which will get a placeholder.
    OcrFailed { page_idx: usize, reason: String },
    /// OCR produced too little usable text for a page, which will get a
    /// placeholder.
    MinimalOcrYield { page_idx: usize },
    /// A page is finished.
    PageFinished { page_idx: usize },
    /// The output file was written.
    DocumentFinished {
        page_count: usize,
        output_path: PathBuf,
        output_bytes: u64,
    },
}

/// Receives [`ConversionEvent`]s. Pages may be processed concurrently, so
/// events from different pages may arrive in any order.
pub trait ConversionObserver: Send + Sync {
    /// Handle an event.
    fn on_event(&self, event: &ConversionEvent);
}

/// Reports progress notices on standard output, with a progress bar for
/// pages on standard error. Every event is also recorded with `tracing`.
pub struct LoggingObserver {
    ui: Ui,
    progress: Mutex<Option<ProgressBar>>,
}

impl LoggingObserver {
    /// Create a new observer, drawing progress bars using `ui`.
    pub fn new(ui: Ui) -> Self {
        Self {
            ui,
            progress: Mutex::new(None),
        }
    }

    /// Run `f` on our progress bar, if we have one.
    fn with_progress(&self, f: impl FnOnce(&ProgressBar)) {
        let guard = self.progress.lock().expect("lock poisoned");
        if let Some(pb) = guard.as_ref() {
            f(pb);
        }
    }
}

impl ConversionObserver for LoggingObserver {
    fn on_event(&self, event: &ConversionEvent) {
        debug!(?event, "Conversion event");
        if let Some(notice) = notice_for(event) {
            self.ui.multi_progress().suspend(|| println!("{notice}"));
        }

        match event {
            ConversionEvent::DocumentOpened {
                path, page_count, ..
            } => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let pb = self.ui.new_page_progress_bar(&name, *page_count);
                *self.progress.lock().expect("lock poisoned") = Some(pb);
            }
            ConversionEvent::PageFinished { .. } => {
                self.with_progress(|pb| pb.inc(1));
            }
            ConversionEvent::DocumentFinished { .. } => {
                if let Some(pb) = self.progress.lock().expect("lock poisoned").take() {
                    pb.finish_using_style();
                }
            }
            ConversionEvent::PageStarted { .. }
            | ConversionEvent::OcrFailed { .. }
            | ConversionEvent::MinimalOcrYield { .. } => {}
        }
    }
}

/// The line to print on standard output for an event, if any.
///
/// Completion is reported by the caller's summary, so only the opening
/// notice and per-page notices are printed here.
pub fn notice_for(event: &ConversionEvent) -> Option<String> {
    match event {
        ConversionEvent::DocumentOpened {
            path,
            page_count,
            language,
            dpi,
        } => Some(format!(
            "Opening {}: processing {} pages (language: {}, dpi: {})",
            path.display(),
            page_count,
            language,
            dpi
        )),
        ConversionEvent::PageStarted {
            page_idx,
            page_count,
            source: TextSource::UseNative,
        } => Some(format!(
            "  Page {}/{}: Using existing text layer",
            page_idx + 1,
            page_count
        )),
        ConversionEvent::PageStarted {
            page_idx,
            page_count,
            source: TextSource::NeedsOcr,
        } => Some(format!(
            "  Page {}/{}: Using OCR (no text layer detected)",
            page_idx + 1,
            page_count
        )),
        ConversionEvent::OcrFailed { page_idx, reason } => Some(format!(
            "    Warning: OCR failed for page {}: {}",
            page_idx + 1,
            reason
        )),
        ConversionEvent::MinimalOcrYield { page_idx } => Some(format!(
            "    Warning: OCR returned minimal text for page {}",
            page_idx + 1
        )),
        ConversionEvent::PageFinished { .. }
        | ConversionEvent::DocumentFinished { .. } => None,
    }
}

/// Records events, for tests.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ConversionEvent>>,
}

#[cfg(test)]
impl RecordingObserver {
    /// All the events we've seen so far.
    pub fn events(&self) -> Vec<ConversionEvent> {
        self.events.lock().expect("lock poisoned").clone()
    }
}

#[cfg(test)]
impl ConversionObserver for RecordingObserver {
    fn on_event(&self, event: &ConversionEvent) {
        self.events.lock().expect("lock poisoned").push(event.clone());
    }
}
