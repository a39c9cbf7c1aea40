use tracing::instrument;

/// Counter values at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Status {
    /// Objects produced by the source listing
    pub listed: u64,
    /// Objects processed by workers, whether copied or skipped
    pub transferred: u64,
    pub copied: u64,
    pub skipped: u64,
    pub bytes_copied: u64,
}

impl Status {
    pub fn pending(&self) -> u64 {
        self.listed.saturating_sub(self.transferred)
    }
}

/// What a worker did with one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Copied { bytes: u64 },
    Skipped,
}

/// Progress of a single mirror run, shared by the enumerator and all workers.
///
/// Every counter only grows. All updates and all human-readable notices go through one mutex so
/// that progress lines printed by concurrent tasks never interleave.
#[derive(Debug)]
pub struct ProgressState {
    status: std::sync::Mutex<Status>,
    echo: bool,
    start_time: std::time::Instant,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ProgressState {
    /// Creates the state; `echo` controls whether notices are written to stdout.
    pub fn new(echo: bool) -> Self {
        Self {
            status: std::sync::Mutex::new(Status::default()),
            echo,
            start_time: std::time::Instant::now(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Status> {
        self.status
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn record_listed(&self) -> Status {
        let mut status = self.lock();
        status.listed += 1;
        *status
    }

    pub fn record_transferred(&self, outcome: Outcome) -> Status {
        let mut status = self.lock();
        status.transferred += 1;
        match outcome {
            Outcome::Copied { bytes } => {
                status.copied += 1;
                status.bytes_copied += bytes;
            }
            Outcome::Skipped => status.skipped += 1,
        }
        *status
    }

    #[instrument(skip(self))]
    pub fn get(&self) -> Status {
        let status = *self.lock();
        if status.transferred > status.listed {
            tracing::debug!(
                "Progress inversion - listed: {}, transferred {}",
                status.listed,
                status.transferred
            );
        }
        status
    }

    /// Writes a notice line to stdout while holding the counter lock.
    pub fn say(&self, line: impl std::fmt::Display) {
        if !self.echo {
            return;
        }
        let _guard = self.lock();
        println!("{line}");
    }

    /// Writes the standard "Moved X out of Y" line.
    pub fn say_moved(&self) {
        if !self.echo {
            return;
        }
        let status = self.lock();
        println!("Moved {} out of {}", status.transferred, status.listed);
    }

    pub fn get_duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }
}

/// Formats periodic progress reports with average and current rates.
pub struct ProgressPrinter<'a> {
    progress: &'a ProgressState,
    last_transferred: u64,
    last_bytes: u64,
    last_update: std::time::Instant,
}

impl<'a> ProgressPrinter<'a> {
    pub fn new(progress: &'a ProgressState) -> Self {
        let status = progress.get();
        Self {
            progress,
            last_transferred: status.transferred,
            last_bytes: status.bytes_copied,
            last_update: std::time::Instant::now(),
        }
    }

    pub fn print(&mut self) -> String {
        let time_now = std::time::Instant::now();
        let status = self.progress.get();
        let total_duration_secs = self.progress.get_duration().as_secs_f64().max(f64::EPSILON);
        let curr_duration_secs = (time_now - self.last_update)
            .as_secs_f64()
            .max(f64::EPSILON);
        let average_ops_rate = status.transferred as f64 / total_duration_secs;
        let current_ops_rate =
            (status.transferred - self.last_transferred) as f64 / curr_duration_secs;
        let average_bytes_rate = status.bytes_copied as f64 / total_duration_secs;
        let current_bytes_rate = (status.bytes_copied - self.last_bytes) as f64 / curr_duration_secs;
        self.last_transferred = status.transferred;
        self.last_bytes = status.bytes_copied;
        self.last_update = time_now;
        format!(
            "Moved {} out of {} (pending: {}, copied: {}, skipped: {})\n\
            objects: {:>10.2}/s average, {:>10.2}/s current\n\
            bytes:   {:>10}/s average, {:>10}/s current, {} total",
            status.transferred,
            status.listed,
            status.pending(),
            status.copied,
            status.skipped,
            average_ops_rate,
            current_ops_rate,
            bytesize::ByteSize(average_bytes_rate as u64),
            bytesize::ByteSize(current_bytes_rate as u64),
            bytesize::ByteSize(status.bytes_copied),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_counting() {
        let progress = ProgressState::new(false);
        for _ in 0..10 {
            progress.record_listed();
        }
        progress.record_transferred(Outcome::Skipped);
        let status = progress.record_transferred(Outcome::Copied { bytes: 42 });
        assert_eq!(
            status,
            Status {
                listed: 10,
                transferred: 2,
                copied: 1,
                skipped: 1,
                bytes_copied: 42,
            }
        );
        assert_eq!(status.pending(), 8);
    }

    #[test]
    fn threaded_counting() {
        let progress = ProgressState::new(false);
        std::thread::scope(|scope| {
            for _ in 0..10 {
                scope.spawn(|| {
                    let mut last = Status::default();
                    for _ in 0..100 {
                        progress.record_listed();
                        let status = progress.record_transferred(Outcome::Skipped);
                        // each thread observes non-decreasing counters
                        assert!(status.listed >= last.listed);
                        assert!(status.transferred > last.transferred);
                        assert!(status.transferred <= status.listed);
                        last = status;
                    }
                });
            }
        });
        let status = progress.get();
        assert_eq!(status.listed, 1000);
        assert_eq!(status.transferred, 1000);
        assert_eq!(status.skipped, 1000);
    }

    #[test]
    fn printer_reports_counts() {
        let progress = ProgressState::new(false);
        progress.record_listed();
        progress.record_listed();
        let mut printer = ProgressPrinter::new(&progress);
        progress.record_transferred(Outcome::Copied { bytes: 1024 });
        let report = printer.print();
        assert!(report.starts_with("Moved 1 out of 2 (pending: 1, copied: 1, skipped: 0)"));
    }
}
