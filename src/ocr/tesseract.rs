//! Tesseract OCR engine.

use tokio::process::Command;

use crate::{
    async_utils::check_for_command_failure, cpu_limit::with_cpu_semaphore, prelude::*,
};

use super::{OcrEngine, OcrPageInput};

/// OCR engine wrapping the `tesseract` CLI tool.
#[derive(Clone, Debug)]
pub struct TesseractOcrEngine {
    /// The `tesseract` binary to run.
    binary: PathBuf,
}

impl TesseractOcrEngine {
    /// Create a new `tesseract` engine.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for TesseractOcrEngine {
    fn default() -> Self {
        Self::new("tesseract")
    }
}

#[async_trait]
impl OcrEngine for TesseractOcrEngine {
    #[instrument(level = "debug", skip_all, fields(page = input.page_idx, language = %input.language))]
    async fn recognize(&self, input: OcrPageInput) -> Result<String> {
        let extension = mime_guess::get_mime_extensions_str(&input.image.mime_type)
            .and_then(|o| o.first())
            .ok_or_else(|| {
                anyhow!("cannot determine extension for {}", input.image.mime_type)
            })?;

        // Write our input to a temporary file.
        let tmpdir = tempfile::TempDir::with_prefix("tesseract")?;
        let input_path = tmpdir.path().join(format!("input.{}", extension));
        let output_path = tmpdir.path().join("output.txt");
        tokio::fs::write(&input_path, &input.image.data)
            .await
            .context("cannot write tesseract input file")?;

        // Run tesseract on the input file. It adds `.txt` to the output name
        // itself. If our caller gives up on us, the process must die before
        // our CPU permit and temporary directory are released.
        let mut cmd = Command::new(&self.binary);
        cmd.kill_on_drop(true)
            .arg(&input_path)
            .arg(output_path.with_extension(""))
            .arg("-l")
            .arg(&input.language)
            .arg("--dpi")
            .arg(input.dpi.to_string());
        let output = with_cpu_semaphore(|| async move {
            cmd.output().await.with_context(|| {
                format!("cannot run {:?}", self.binary.display())
            })
        })
        .await?;
        check_for_command_failure("tesseract", &output, None)?;

        tokio::fs::read_to_string(&output_path)
            .await
            .context("cannot read tesseract output file")
    }
}
