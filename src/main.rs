use std::{io::IsTerminal as _, process, str::FromStr};

use clap::Parser;
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{prelude::*, ui::Ui};

mod async_utils;
mod cmd;
mod config;
mod convert;
mod cpu_limit;
mod document;
mod errors;
mod filter;
mod observer;
mod ocr;
mod prelude;
mod toml_utils;
mod trigger;
mod ui;

/// Convert PDFs and scanned images to text, using OCR for pages without a
/// usable text layer.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Common language codes:
  swe - Swedish
  eng - English
  nor - Norwegian
  dan - Danish

Requirements:
  Poppler (`pdfinfo`, `pdftotext`, `pdftocairo`) and Tesseract, with
  language data for the chosen language, must be installed.

Environment Variables:
  - RUST_LOG (optional): Log filter, such as `debug` or `ocr_convert=trace`.

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    #[clap(flatten)]
    convert: cmd::convert::ConvertOpts,
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    let ui = Ui::init();

    // Initialize tracing.
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);

    // We can stack multiple layers here if we need to.
    tracing_subscriber::registry().with(subscriber).init();

    // Call our real `main` function now that logging is set up.
    real_main(ui).await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    // Parse command-line arguments. Usage errors exit with 1, not clap's
    // usual 2.
    let opts = match Opts::try_parse() {
        Ok(opts) => opts,
        Err(err) if err.use_stderr() => {
            let _ = err.print();
            process::exit(1);
        }
        Err(err) => err.exit(),
    };
    debug!("Parsed options: {:?}", opts);

    // Progress bars are only useful on a terminal.
    if !std::io::stderr().is_terminal() {
        ui.hide_progress_bars();
    }

    cmd::convert::cmd_convert(ui, &opts.convert).await
}
