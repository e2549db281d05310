//! The `convert` command.

use std::{sync::Arc, time::Duration};

use clap::Args;

use crate::{
    config::read_filter_config,
    convert::{
        ConversionSummary, ConvertOptions, Converter, DEFAULT_DPI, DEFAULT_LANGUAGE,
        DEFAULT_MIN_OCR_CHARS, DEFAULT_OUTPUT_DIR,
    },
    document::LocalDocumentEngine,
    filter::{ArtifactFilter, FilterConfig},
    observer::LoggingObserver,
    ocr::tesseract::TesseractOcrEngine,
    prelude::*,
    trigger::{DEFAULT_NATIVE_MIN_CHARS, TriggerPolicy},
    ui::Ui,
};

/// Options for converting a single document.
#[derive(Debug, Clone, Args)]
pub struct ConvertOpts {
    /// The PDF or image file to convert.
    pub document: PathBuf,

    /// Tesseract language code, such as `swe`, `eng`, `nor` or `dan`.
    #[clap(default_value = DEFAULT_LANGUAGE)]
    pub language: String,

    /// Resolution to render pages at before OCR.
    #[clap(default_value_t = DEFAULT_DPI, value_parser = clap::value_parser!(u32).range(1..))]
    pub dpi: u32,

    /// Directory to write `<document stem>.md` into.
    #[clap(long, default_value = DEFAULT_OUTPUT_DIR)]
    pub output_dir: PathBuf,

    /// Max number of pages to process at a time. Defaults to the number of
    /// CPUs.
    #[clap(short = 'j', long = "jobs")]
    pub job_count: Option<usize>,

    /// Pages with fewer characters of native text than this are OCRed.
    #[clap(long, default_value_t = DEFAULT_NATIVE_MIN_CHARS)]
    pub native_min_chars: usize,

    /// OCR results with fewer characters than this (after cleanup) are
    /// replaced by a placeholder.
    #[clap(long, default_value_t = DEFAULT_MIN_OCR_CHARS)]
    pub min_ocr_chars: usize,

    /// A TOML file overriding the OCR cleanup rules.
    #[clap(long)]
    pub filter_config: Option<PathBuf>,

    /// Give up on OCR for a single page after this many seconds.
    #[clap(long, value_name = "SECONDS")]
    pub page_timeout: Option<u64>,

    /// Password for encrypted PDFs.
    #[clap(long)]
    pub password: Option<String>,

    /// The `tesseract` binary to run.
    #[clap(long, default_value = "tesseract")]
    pub tesseract: PathBuf,
}

impl ConvertOpts {
    /// Build our converter options.
    fn convert_options(&self) -> ConvertOptions {
        ConvertOptions {
            language: self.language.clone(),
            dpi: self.dpi,
            jobs: self.job_count.unwrap_or_else(num_cpus::get).max(1),
            output_dir: self.output_dir.clone(),
            trigger: TriggerPolicy {
                native_min_chars: self.native_min_chars,
            },
            min_ocr_chars: self.min_ocr_chars,
            page_timeout: self.page_timeout.map(Duration::from_secs),
        }
    }
}

/// Run the `convert` command.
#[instrument(level = "debug", skip_all, fields(document = %opts.document.display()))]
pub async fn cmd_convert(ui: Ui, opts: &ConvertOpts) -> Result<()> {
    // Load our cleanup rules.
    let filter_config = match &opts.filter_config {
        Some(path) => read_filter_config(path).await?,
        None => FilterConfig::default(),
    };
    let filter = ArtifactFilter::new(filter_config)?;
    debug!(config = ?filter.config(), "Artifact filter configured");

    let converter = Converter::new(
        Arc::new(LocalDocumentEngine::new(opts.password.clone())),
        Arc::new(TesseractOcrEngine::new(&opts.tesseract)),
        filter,
        opts.convert_options(),
        Arc::new(LoggingObserver::new(ui)),
    );
    let summary = converter.convert(&opts.document).await?;
    print_summary(&summary);
    Ok(())
}

/// Print our summary to standard output.
fn print_summary(summary: &ConversionSummary) {
    println!("✓ Processed {} pages successfully", summary.page_count);
    println!(
        "  ({} native text, {} OCR, {} placeholders)",
        summary.native_pages, summary.ocr_pages, summary.placeholder_pages
    );
    println!("✓ Output written to: {}", summary.output_path.display());
    println!(
        "✓ Output file size: {} bytes",
        with_thousands_separators(summary.output_bytes)
    );
}

/// Format `n` with commas between groups of three digits.
fn with_thousands_separators(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
