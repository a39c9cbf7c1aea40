//! Pipeline coordinator: one enumerator feeding a pool of transfer workers.
//!
//! The run is all-or-nothing. The first task that fails cancels the run: the coordinator stops
//! waiting for the other tasks, which are cancelled at their next suspension point, and returns
//! an [`Error`] naming the failed task. Re-running after a failure is cheap because objects
//! already present with a matching fingerprint are skipped.

use std::sync::Arc;

use tracing::instrument;

use crate::config::Settings;
use crate::enumerate::{EnumerationReport, enumerate};
use crate::progress::ProgressState;
use crate::queue::TransferQueue;
use crate::worker::{WorkerContext, WorkerReport, run_worker};

/// A container within a store.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub store: Arc<dyn store::ObjectStore>,
    pub container: String,
}

impl Endpoint {
    pub fn new(store: Arc<dyn store::ObjectStore>, container: impl Into<String>) -> Self {
        Self {
            store,
            container: container.into(),
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}/{}", self.store.describe(), self.container)
    }
}

/// Identity of a pipeline task, used in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Coordinator,
    Lister,
    Worker(usize),
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Task::Coordinator => write!(f, "coordinator"),
            Task::Lister => write!(f, "lister"),
            Task::Worker(id) => write!(f, "move objects({id})"),
        }
    }
}

/// Failure of a mirror run; carries the progress made before the failure.
///
/// The Display implementation includes the failed task and the full error chain.
#[derive(Debug, thiserror::Error)]
#[error("task '{task}' failed: {source:#}")]
pub struct Error {
    pub task: Task,
    #[source]
    pub source: anyhow::Error,
    pub summary: Summary,
}

impl Error {
    #[must_use]
    pub fn new(task: Task, source: anyhow::Error, summary: Summary) -> Self {
        Error {
            task,
            source,
            summary,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub objects_listed: u64,
    pub objects_transferred: u64,
    pub objects_copied: u64,
    pub objects_skipped: u64,
    pub bytes_copied: u64,
    pub backpressure_pauses: u64,
    pub end_markers: usize,
    pub workers_finished: usize,
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "objects listed: {}\n\
            objects transferred: {}\n\
            objects copied: {}\n\
            objects skipped: {}\n\
            bytes copied: {}\n\
            backpressure pauses: {}\n\
            end markers: {}\n\
            workers finished: {}",
            self.objects_listed,
            self.objects_transferred,
            self.objects_copied,
            self.objects_skipped,
            bytesize::ByteSize(self.bytes_copied),
            self.backpressure_pauses,
            self.end_markers,
            self.workers_finished,
        )
    }
}

enum TaskReport {
    Lister(EnumerationReport),
    Worker(WorkerReport),
}

fn summarize(
    progress: &ProgressState,
    lister: &EnumerationReport,
    workers: &[WorkerReport],
) -> Summary {
    let status = progress.get();
    Summary {
        objects_listed: status.listed,
        objects_transferred: status.transferred,
        objects_copied: status.copied,
        objects_skipped: status.skipped,
        bytes_copied: status.bytes_copied,
        backpressure_pauses: lister.pauses,
        end_markers: lister.end_markers,
        workers_finished: workers.iter().filter(|report| report.saw_end_marker).count(),
    }
}

/// Runs `task` until it finishes or the run is cancelled; `None` means cancelled.
async fn cancellable<F>(
    cancel: tokio_util::sync::CancellationToken,
    task: F,
) -> Option<anyhow::Result<TaskReport>>
where
    F: std::future::Future<Output = anyhow::Result<TaskReport>>,
{
    tokio::select! {
        res = task => Some(res),
        _ = cancel.cancelled() => None,
    }
}

/// Copies every object of `source` into `destination`.
#[instrument(skip_all, fields(source = %source, destination = %destination))]
pub async fn mirror(
    source: Endpoint,
    destination: Endpoint,
    settings: &Settings,
    progress: Arc<ProgressState>,
) -> Result<Summary, Error> {
    settings
        .validate()
        .map_err(|err| Error::new(Task::Coordinator, err.into(), Default::default()))?;
    progress.say(format!(
        "== Transferring objects from '{source}' to '{destination}' =="
    ));
    let queue = TransferQueue::new();
    let cancel = tokio_util::sync::CancellationToken::new();
    let ops_throttle = Arc::new(throttle::OpsThrottle::new(settings.ops_throttle));
    let replenish = ops_throttle.is_enabled().then(|| {
        let ops_throttle = ops_throttle.clone();
        tokio::spawn(async move { ops_throttle.run_replenish().await })
    });
    let backpressure =
        throttle::Backpressure::new(settings.queue_threshold, settings.backpressure_pause);
    let mut join_set = tokio::task::JoinSet::new();
    let mut tasks = std::collections::HashMap::new();
    {
        let source = source.clone();
        let queue = queue.clone();
        let progress = progress.clone();
        let workers = settings.workers;
        let lister = async move {
            enumerate(&source, &queue, &progress, &backpressure, workers)
                .await
                .map(TaskReport::Lister)
        };
        let handle = join_set.spawn(cancellable(cancel.clone(), lister));
        tasks.insert(handle.id(), Task::Lister);
    }
    let ctx = Arc::new(WorkerContext {
        source,
        destination,
        queue,
        progress: progress.clone(),
        ops_throttle,
        progress_sample: settings.progress_sample,
    });
    for id in 0..settings.workers {
        let ctx = ctx.clone();
        let worker = async move { run_worker(id, ctx).await.map(TaskReport::Worker) };
        let handle = join_set.spawn(cancellable(cancel.clone(), worker));
        tasks.insert(handle.id(), Task::Worker(id));
    }
    let mut lister_report = EnumerationReport::default();
    let mut worker_reports = Vec::with_capacity(settings.workers);
    let mut failure: Option<(Task, anyhow::Error)> = None;
    while let Some(res) = join_set.join_next_with_id().await {
        let (task, outcome) = match res {
            Ok((id, outcome)) => (tasks.get(&id).copied(), outcome),
            Err(join_error) => {
                let task = tasks.get(&join_error.id()).copied();
                (task, Some(Err(anyhow::anyhow!("task panicked: {join_error}"))))
            }
        };
        let task = task.unwrap_or(Task::Coordinator);
        match outcome {
            Some(Ok(TaskReport::Lister(report))) => lister_report = report,
            Some(Ok(TaskReport::Worker(report))) => worker_reports.push(report),
            Some(Err(error)) => {
                if failure.is_none() {
                    tracing::warn!("{task} failed, cancelling the run: {error:#}");
                    cancel.cancel();
                    failure = Some((task, error));
                } else {
                    tracing::debug!("{task} also failed: {error:#}");
                }
            }
            None => tracing::debug!("{task} cancelled"),
        }
    }
    if let Some(replenish) = replenish {
        replenish.abort();
    }
    let summary = summarize(&progress, &lister_report, &worker_reports);
    match failure {
        Some((task, error)) => Err(Error::new(task, error, summary)),
        None => {
            progress.say_moved();
            Ok(summary)
        }
    }
}
