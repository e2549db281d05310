//! PDF documents, handled by Poppler's command-line tools.
//!
//! - `pdfinfo` tells us how many pages there are.
//! - `pdftotext` extracts the native text layer of every page in one pass,
//!   with a form feed after each page.
//! - `pdftocairo` renders single pages to PNG for OCR.

use std::{collections::BTreeMap, sync::LazyLock};

use regex::Regex;
use tokio::process::Command;

use crate::{
    async_utils::check_for_command_failure, cpu_limit::with_cpu_semaphore, prelude::*,
};

use super::{Document, PageImage};

/// Poppler reports most problems with a line containing "error".
static ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error").expect("failed to compile regex"));

/// Errors Poppler recovers from on its own.
static DOWNGRADE_TO_WARNING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error: xref num").expect("failed to compile regex")
});

/// Does this line contain an error?
fn is_error_line(line: &str) -> bool {
    ERROR_REGEX.is_match(line) && !DOWNGRADE_TO_WARNING_REGEX.is_match(line)
}

/// A PDF file on disk, plus the text layer of each page.
#[derive(Debug)]
pub struct PdfDocument {
    path: PathBuf,
    password: Option<String>,
    native_texts: Vec<Option<String>>,
}

impl PdfDocument {
    /// Open a PDF, counting its pages and extracting any native text.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn open(path: &Path, password: Option<String>) -> Result<Self> {
        let page_count = get_pdf_page_count(path, password.as_deref()).await?;
        let text = extract_native_text(path, password.as_deref()).await?;
        let native_texts = split_pages(&text, page_count);
        debug!(
            page_count,
            pages_with_text = native_texts.iter().filter(|t| t.is_some()).count(),
            "Opened PDF"
        );
        Ok(Self {
            path: path.to_owned(),
            password,
            native_texts,
        })
    }
}

#[async_trait]
impl Document for PdfDocument {
    fn page_count(&self) -> usize {
        self.native_texts.len()
    }

    fn native_text(&self, page_idx: usize) -> Option<&str> {
        self.native_texts.get(page_idx)?.as_deref()
    }

    #[instrument(level = "debug", skip_all, fields(path = %self.path.display(), page = page_idx, dpi = dpi))]
    async fn rasterize(&self, page_idx: usize, dpi: u32) -> Result<PageImage> {
        if page_idx >= self.page_count() {
            return Err(anyhow!(
                "page {} is out of range ({} pages)",
                page_idx + 1,
                self.page_count()
            ));
        }

        let tmpdir = tempfile::TempDir::with_prefix("page")?;
        let out_base = tmpdir.path().join("page");
        let png_path = out_base.with_extension("png");

        // Poppler page numbers are 1-based and inclusive.
        let page_number = (page_idx + 1).to_string();
        let mut cmd = Command::new("pdftocairo");
        // If we time out, don't leave the renderer running.
        cmd.kill_on_drop(true)
            .arg("-png")
            .arg("-singlefile")
            .arg("-r")
            .arg(dpi.to_string())
            .arg("-f")
            .arg(&page_number)
            .arg("-l")
            .arg(&page_number);
        add_password_arg(&mut cmd, self.password.as_deref());
        let output = with_cpu_semaphore(|| async move {
            cmd.arg(&self.path)
                .arg(&out_base)
                .output()
                .await
                .with_context(|| {
                    format!("failed to run pdftocairo on {:?}", self.path.display())
                })
        })
        .await?;
        check_for_command_failure("pdftocairo", &output, Some(&is_error_line))?;

        let data = tokio::fs::read(&png_path)
            .await
            .with_context(|| format!("failed to read {:?}", png_path.display()))?;
        Ok(PageImage {
            mime_type: "image/png".to_owned(),
            data,
        })
    }
}

/// Pass a password to a Poppler tool, if we have one.
fn add_password_arg(cmd: &mut Command, password: Option<&str>) {
    if let Some(password) = password {
        cmd.arg("-upw").arg(password);
    }
}

/// Get the number of pages in a PDF file.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn get_pdf_page_count(path: &Path, password: Option<&str>) -> Result<usize> {
    let mut cmd = Command::new("pdfinfo");
    cmd.kill_on_drop(true);
    add_password_arg(&mut cmd, password);
    let output = cmd
        .arg(path)
        .output()
        .await
        .with_context(|| format!("failed to run pdfinfo on {:?}", path.display()))?;
    check_for_command_failure("pdfinfo", &output, None)?;

    let output =
        String::from_utf8(output.stdout).context("pdfinfo output was not valid UTF-8")?;
    parse_page_count(&output).with_context(|| {
        format!(
            "failed to get page count for {:?} from pdfinfo output",
            path.display()
        )
    })
}

/// Find the `Pages:` property in `pdfinfo` output.
fn parse_page_count(pdfinfo_output: &str) -> Result<usize> {
    let mut properties = BTreeMap::new();
    for line in pdfinfo_output.lines() {
        let mut parts = line.splitn(2, ':');
        let key = parts.next().unwrap_or("").trim();
        let value = parts.next().unwrap_or("").trim();
        properties.insert(key, value);
    }
    let page_count_str = properties
        .get("Pages")
        .ok_or_else(|| anyhow!("no page count in pdfinfo output"))?;
    page_count_str
        .parse::<usize>()
        .with_context(|| format!("invalid page count {page_count_str:?}"))
}

/// Extract the native text layer of every page.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
async fn extract_native_text(path: &Path, password: Option<&str>) -> Result<String> {
    let mut cmd = Command::new("pdftotext");
    cmd.kill_on_drop(true).arg("-enc").arg("UTF-8");
    add_password_arg(&mut cmd, password);
    let output = with_cpu_semaphore(|| async move {
        cmd.arg(path)
            .arg("-")
            .output()
            .await
            .with_context(|| format!("failed to run pdftotext on {:?}", path.display()))
    })
    .await?;
    check_for_command_failure("pdftotext", &output, Some(&is_error_line))?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Split `pdftotext` output into pages. Pages with no text at all, or
/// missing from the output, are `None`.
fn split_pages(text: &str, page_count: usize) -> Vec<Option<String>> {
    let mut pages = text.split('\x0C');
    (0..page_count)
        .map(|_| {
            pages
                .next()
                .filter(|page| !page.is_empty())
                .map(|page| page.to_owned())
        })
        .collect()
}
