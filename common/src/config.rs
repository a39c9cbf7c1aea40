//! Configuration types for runtime, output and the mirror run itself

/// Default number of transfer workers
pub const DEFAULT_WORKERS: usize = 10;
/// Default queue depth above which the enumerator pauses
pub const DEFAULT_QUEUE_THRESHOLD: usize = 500;
/// Default length of an enumerator pause
pub const DEFAULT_BACKPRESSURE_PAUSE: std::time::Duration = std::time::Duration::from_secs(2);
/// Default sampling rate of "Moved X out of Y" lines (one in N processed objects)
pub const DEFAULT_PROGRESS_SAMPLE: u32 = 100;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration: {}", .names.join(", "))]
    Missing { names: Vec<&'static str> },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Runtime configuration for tokio and thread pools
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
    /// Number of blocking threads (0 = tokio default of 512)
    pub max_blocking_threads: usize,
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress progress notices and error output
    pub quiet: bool,
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
    /// Print summary statistics at the end
    pub print_summary: bool,
}

/// Tuning of the transfer pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Number of concurrent transfer workers
    pub workers: usize,
    /// Queue depth above which the enumerator pauses
    pub queue_threshold: usize,
    /// How long the enumerator pauses when the queue is too deep
    pub backpressure_pause: std::time::Duration,
    /// Print a progress line for roughly one in this many processed objects (0 = never)
    pub progress_sample: u32,
    /// Objects per second across all workers (0 = no throttle)
    pub ops_throttle: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_threshold: DEFAULT_QUEUE_THRESHOLD,
            backpressure_pause: DEFAULT_BACKPRESSURE_PAUSE,
            progress_sample: DEFAULT_PROGRESS_SAMPLE,
            ops_throttle: 0,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid(
                "at least one transfer worker is required".to_string(),
            ));
        }
        if self.queue_threshold == 0 {
            return Err(ConfigError::Invalid(
                "queue threshold must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Source and destination as supplied by the user; every value is required
#[derive(Debug, Clone, Default)]
pub struct MirrorConfig {
    pub source_store: Option<String>,
    pub source_container: Option<String>,
    pub dest_store: Option<String>,
    pub dest_container: Option<String>,
}

/// Validated source and destination locations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locations {
    pub source_store: std::path::PathBuf,
    pub source_container: String,
    pub dest_store: std::path::PathBuf,
    pub dest_container: String,
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

impl MirrorConfig {
    /// Checks that every required value is set, reporting all missing ones at once.
    pub fn validate(self) -> Result<Locations, ConfigError> {
        let source_store = present(self.source_store);
        let source_container = present(self.source_container);
        let dest_store = present(self.dest_store);
        let dest_container = present(self.dest_container);
        match (source_store, source_container, dest_store, dest_container) {
            (Some(source_store), Some(source_container), Some(dest_store), Some(dest_container)) => {
                Ok(Locations {
                    source_store: source_store.into(),
                    source_container,
                    dest_store: dest_store.into(),
                    dest_container,
                })
            }
            (source_store, source_container, dest_store, dest_container) => {
                let names = [
                    (source_store.is_none(), "OMIRROR_SOURCE_STORE"),
                    (source_container.is_none(), "OMIRROR_SOURCE_CONTAINER"),
                    (dest_store.is_none(), "OMIRROR_DEST_STORE"),
                    (dest_container.is_none(), "OMIRROR_DEST_CONTAINER"),
                ]
                .into_iter()
                .filter_map(|(missing, name)| missing.then_some(name))
                .collect();
                Err(ConfigError::Missing { names })
            }
        }
    }
}
