use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "omirror",
    version,
    about = "Mirror every object of a source container into a destination container",
    long_about = "`omirror` copies every object from a source object-storage container into a destination container, skipping objects that already exist there with a matching content fingerprint.

It is a one-shot batch job: one lister feeds a queue drained by a pool of transfer workers. Any error aborts the whole run; running it again is cheap because objects that were already copied are skipped.

Stores are local directories: each sub-directory of a store is a container and every file below it is an object. Writes in flight are kept in the `.omirror-tmp` directory of the destination store.

All required values can also be set through environment variables.

EXAMPLES:
    # Mirror /data/a/photos into /backup/photos
    omirror --source-store /data/a --source-container photos --dest-store /backup --dest-container photos

    # Same, configured through the environment, with periodic progress
    OMIRROR_SOURCE_STORE=/data/a OMIRROR_SOURCE_CONTAINER=photos \\
    OMIRROR_DEST_STORE=/backup OMIRROR_DEST_CONTAINER=photos omirror --progress --summary"
)]
struct Args {
    // Source & destination
    /// Root of the source store
    #[arg(long, env = "OMIRROR_SOURCE_STORE", value_name = "PATH", help_heading = "Source & destination")]
    source_store: Option<String>,

    /// Container to mirror from
    #[arg(long, env = "OMIRROR_SOURCE_CONTAINER", value_name = "NAME", help_heading = "Source & destination")]
    source_container: Option<String>,

    /// Root of the destination store
    #[arg(long, env = "OMIRROR_DEST_STORE", value_name = "PATH", help_heading = "Source & destination")]
    dest_store: Option<String>,

    /// Container to mirror into
    #[arg(long, env = "OMIRROR_DEST_CONTAINER", value_name = "NAME", help_heading = "Source & destination")]
    dest_container: Option<String>,

    // Transfer options
    /// Number of concurrent transfer workers
    #[arg(long, default_value_t = common::config::DEFAULT_WORKERS, value_name = "N", help_heading = "Transfer options")]
    workers: usize,

    /// Queue depth above which listing pauses
    #[arg(long, default_value_t = common::config::DEFAULT_QUEUE_THRESHOLD, value_name = "N", help_heading = "Transfer options")]
    queue_threshold: usize,

    /// How long listing pauses when the queue is too deep
    ///
    /// Accepts human-readable durations like "500ms", "2s", "1min".
    #[arg(long, default_value = "2s", value_parser = humantime::parse_duration, value_name = "DELAY", help_heading = "Transfer options")]
    backpressure_pause: std::time::Duration,

    /// Throttle the number of objects processed per second, 0 means no throttle
    #[arg(long, default_value = "0", value_name = "N", help_heading = "Transfer options")]
    ops_throttle: usize,

    // Progress & output
    /// Print a "Moved X out of Y" line for roughly one in N processed objects, 0 disables
    #[arg(long, default_value_t = common::config::DEFAULT_PROGRESS_SAMPLE, value_name = "N", help_heading = "Progress & output")]
    progress_sample: u32,

    /// Show periodic progress reports
    #[arg(long, help_heading = "Progress & output")]
    progress: bool,

    /// Set delay between progress reports
    ///
    /// If specified, --progress flag is implied. Accepts human-readable durations like "200ms", "10s", "5min".
    #[arg(long, value_parser = humantime::parse_duration, value_name = "DELAY", help_heading = "Progress & output")]
    progress_delay: Option<std::time::Duration>,

    /// Print summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Quiet mode, don't print progress notices or report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Advanced settings
    /// Number of worker threads (0 = number of CPU cores)
    #[arg(long, default_value = "0", value_name = "N", help_heading = "Advanced settings")]
    max_workers: usize,

    /// Number of blocking worker threads (0 = Tokio default of 512)
    #[arg(long, default_value = "0", value_name = "N", help_heading = "Advanced settings")]
    max_blocking_threads: usize,
}

fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();
    // missing configuration is fatal before anything is started
    let locations = common::MirrorConfig {
        source_store: args.source_store.clone(),
        source_container: args.source_container.clone(),
        dest_store: args.dest_store.clone(),
        dest_container: args.dest_container.clone(),
    }
    .validate()
    .context("cannot start mirror")?;
    let settings = common::Settings {
        workers: args.workers,
        queue_threshold: args.queue_threshold,
        backpressure_pause: args.backpressure_pause,
        progress_sample: args.progress_sample,
        ops_throttle: args.ops_throttle,
    };
    settings.validate().context("cannot start mirror")?;
    let source = common::Endpoint::new(
        Arc::new(store::LocalStore::new(locations.source_store)),
        locations.source_container,
    );
    let destination = common::Endpoint::new(
        Arc::new(store::LocalStore::new(locations.dest_store)),
        locations.dest_container,
    );
    let func = move |progress| async move {
        tracing::info!("mirroring {} into {}", &source, &destination);
        common::mirror(source, destination, &settings, progress).await
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let progress_settings = if args.progress || args.progress_delay.is_some() {
        Some(common::ProgressSettings {
            delay: args
                .progress_delay
                .unwrap_or(common::ProgressSettings::default().delay),
        })
    } else {
        None
    };
    let res = common::run(progress_settings, output, runtime, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
