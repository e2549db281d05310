//! Limiting the number of CPU-hungry external processes.
//!
//! Rasterizing a page at 600 DPI and running Tesseract on the result will
//! each happily eat a whole core. With `--jobs` set high, we would otherwise
//! start far more of them than the machine can run.

use std::sync::LazyLock;

use tokio::sync::Semaphore;

use crate::prelude::*;

/// One permit per CPU.
static CPU_SEMAPHORE: LazyLock<Semaphore> =
    LazyLock::new(|| Semaphore::new(num_cpus::get()));

/// Run `f` while holding a CPU permit.
///
/// Only use this around external processes. In-process CPU work should use
/// [`crate::async_utils::spawn_blocking_propagating_panics`] instead.
#[instrument(level = "trace", skip_all)]
pub async fn with_cpu_semaphore<Func, Fut, R>(f: Func) -> Result<R>
where
    Func: FnOnce() -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let _permit = CPU_SEMAPHORE
        .acquire()
        .await
        .context("could not acquire CPU permit")?;
    f().await
}
