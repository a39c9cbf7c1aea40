//! Common library for omirror - transfer pipeline and runtime plumbing
//!
//! This crate implements the one-shot mirror of an object-storage container: every object of a
//! source container is copied into a destination container unless the destination already holds
//! an object with the same key and content fingerprint.
//!
//! # Pipeline
//!
//! ```text
//! source store ──► lister ──► TransferQueue ──► worker 0..N ──► destination store
//!                     │                             │
//!                     └──────► ProgressState ◄──────┘
//! ```
//!
//! - [`enumerate`] - a single task listing the source container into the queue. It pauses while
//!   the queue is deeper than the backpressure threshold and finishes by enqueueing one end
//!   marker per worker
//! - [`worker`] - a fixed pool of tasks dequeueing objects; each object is either skipped
//!   (fingerprints match) or copied (absent or different)
//! - [`progress`] - counters of listed and transferred objects guarded by a single mutex
//! - [`mirror`](mod@mirror) - the coordinator; the first failing task cancels the whole run
//!
//! # Error Handling
//!
//! There is no per-object retry and no partial success: any listing or transfer error fails the
//! run. Because matching objects are skipped, running the mirror again after a failure only
//! transfers what is still missing.
//!
//! # Logging
//!
//! Diagnostics go through `tracing` to stderr, level chosen by `-v` flags or `RUST_LOG`.
//! Human-readable progress notices (banner, skip/copy lines, "Moved X out of Y") go to stdout.

use std::sync::Arc;

pub mod config;
pub mod enumerate;
pub mod mirror;
pub mod progress;
pub mod queue;
pub mod worker;

#[cfg(test)]
mod testutils;

pub use config::{ConfigError, Locations, MirrorConfig, OutputConfig, RuntimeConfig, Settings};
pub use mirror::{Endpoint, Summary, mirror};
pub use progress::ProgressState;

/// Periodic progress report settings
#[derive(Debug, Clone, Copy)]
pub struct ProgressSettings {
    /// Delay between progress reports
    pub delay: std::time::Duration,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            delay: std::time::Duration::from_secs(10),
        }
    }
}

fn init_tracing(output: &OutputConfig) {
    let level = if output.quiet {
        "off"
    } else {
        match output.verbose {
            0 => "error",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    if let Err(error) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
    {
        eprintln!("Failed to initialize logging: {error}");
    }
}

async fn print_progress(progress: Arc<ProgressState>, delay: std::time::Duration) {
    let mut printer = progress::ProgressPrinter::new(&progress);
    loop {
        tokio::time::sleep(delay).await;
        progress.say(printer.print());
    }
}

/// Sets up logging and the tokio runtime, then runs `func` to completion.
///
/// Returns `None` if the runtime could not be created or `func` failed; the failure is logged.
pub fn run<Fut>(
    progress_settings: Option<ProgressSettings>,
    output: OutputConfig,
    runtime: RuntimeConfig,
    func: impl FnOnce(Arc<ProgressState>) -> Fut,
) -> Option<Summary>
where
    Fut: std::future::Future<Output = Result<Summary, mirror::Error>>,
{
    init_tracing(&output);
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    let rt = match builder.build() {
        Ok(rt) => rt,
        Err(error) => {
            tracing::error!("Failed to create the tokio runtime: {error}");
            return None;
        }
    };
    let progress = Arc::new(ProgressState::new(!output.quiet));
    let res = rt.block_on(async {
        let printer = progress_settings
            .map(|settings| tokio::spawn(print_progress(progress.clone(), settings.delay)));
        let res = func(progress.clone()).await;
        if let Some(printer) = printer {
            printer.abort();
        }
        res
    });
    match res {
        Ok(summary) => {
            if output.print_summary || output.verbose > 0 {
                println!("{summary}");
            }
            Some(summary)
        }
        Err(error) => {
            tracing::error!("{}", &error);
            if output.print_summary || output.verbose > 0 {
                println!("{}", &error.summary);
            }
            None
        }
    }
}
