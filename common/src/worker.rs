use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use futures::{StreamExt, TryStreamExt};
use tracing::instrument;

use crate::mirror::Endpoint;
use crate::progress::{Outcome, ProgressState};
use crate::queue::{TransferQueue, WorkItem};

/// What a single worker did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub processed: u64,
    /// The worker stopped because it dequeued an end marker
    pub saw_end_marker: bool,
}

/// Everything a worker needs; shared by all workers of a run.
#[derive(Debug)]
pub struct WorkerContext {
    pub source: Endpoint,
    pub destination: Endpoint,
    pub queue: TransferQueue,
    pub progress: Arc<ProgressState>,
    pub ops_throttle: Arc<throttle::OpsThrottle>,
    pub progress_sample: u32,
}

/// Copies one object unless the destination already holds identical content.
///
/// The source body is opened only when a copy is needed.
#[instrument(skip_all, fields(key = %record.key))]
pub async fn transfer_object(
    source: &Endpoint,
    destination: &Endpoint,
    record: &store::ObjectRecord,
    progress: &ProgressState,
) -> anyhow::Result<Outcome> {
    let existing = destination
        .store
        .object_metadata(&destination.container, &record.key)
        .await
        .with_context(|| format!("failed checking {:?} in {destination}", &record.key))?;
    match existing {
        Some(existing) if existing.fingerprint == record.fingerprint => {
            tracing::debug!("object is identical, skipping");
            progress.say(format!(
                "Skipping object {}, it exists and fingerprint matches",
                &record.key
            ));
            return Ok(Outcome::Skipped);
        }
        Some(existing) => {
            tracing::warn!(
                "overwriting {:?} in {}: fingerprint {} differs from source fingerprint {}",
                &record.key,
                destination,
                existing.fingerprint,
                record.fingerprint
            );
        }
        None => {}
    }
    progress.say(format!("Copying object {}", &record.key));
    let body = source
        .store
        .get_body(&source.container, &record.key)
        .await
        .with_context(|| format!("failed reading {:?} from {source}", &record.key))?;
    let bytes = Arc::new(AtomicU64::new(0));
    let body = {
        let bytes = bytes.clone();
        body.inspect_ok(move |chunk| {
            bytes.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        })
        .boxed()
    };
    destination
        .store
        .put_object(
            &destination.container,
            &record.key,
            body,
            &record.fingerprint,
        )
        .await
        .with_context(|| format!("failed writing {:?} to {destination}", &record.key))?;
    Ok(Outcome::Copied {
        bytes: bytes.load(Ordering::Relaxed),
    })
}

/// Drains the queue until an end marker is dequeued.
///
/// Any error ends the worker; there is no per-object retry.
#[instrument(skip_all, fields(role = "worker", worker = id))]
pub async fn run_worker(id: usize, ctx: Arc<WorkerContext>) -> anyhow::Result<WorkerReport> {
    ctx.progress
        .say(format!("...started task 'move objects({id})'..."));
    let mut report = WorkerReport::default();
    loop {
        let record = match ctx.queue.pop().await? {
            WorkItem::EndOfStream => {
                report.saw_end_marker = true;
                break;
            }
            WorkItem::Object(record) => record,
        };
        ctx.ops_throttle.get_token().await;
        let outcome =
            transfer_object(&ctx.source, &ctx.destination, &record, &ctx.progress).await?;
        ctx.progress.record_transferred(outcome);
        report.processed += 1;
        if ctx.progress_sample > 0 && rand::random_ratio(1, ctx.progress_sample) {
            ctx.progress.say_moved();
        }
    }
    tracing::debug!("worker done after {} objects", report.processed);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils;

    #[tokio::test]
    async fn copies_missing_object() -> anyhow::Result<()> {
        let (src, dst, source, destination) = testutils::memory_endpoints();
        let fp = src.insert(testutils::SRC, "a", "hello");
        let record = testutils::record(&src, "a");
        let progress = ProgressState::new(false);
        let outcome = transfer_object(&source, &destination, &record, &progress).await?;
        assert_eq!(outcome, Outcome::Copied { bytes: 5 });
        assert_eq!(dst.get(testutils::DST, "a").unwrap().1, fp);
        Ok(())
    }

    #[tokio::test]
    async fn skips_identical_object_without_reading_it() -> anyhow::Result<()> {
        let (src, dst, source, destination) = testutils::memory_endpoints();
        src.insert(testutils::SRC, "a", "hello");
        dst.insert(testutils::DST, "a", "hello");
        let record = testutils::record(&src, "a");
        let progress = ProgressState::new(false);
        let outcome = transfer_object(&source, &destination, &record, &progress).await?;
        assert_eq!(outcome, Outcome::Skipped);
        assert_eq!(src.stats().body_reads, 0);
        assert_eq!(dst.stats().puts, 0);
        Ok(())
    }

    #[tokio::test]
    async fn overwrites_on_fingerprint_mismatch() -> anyhow::Result<()> {
        let (src, dst, source, destination) = testutils::memory_endpoints();
        let fp = src.insert(testutils::SRC, "a", "new content");
        dst.insert(testutils::DST, "a", "old content");
        let record = testutils::record(&src, "a");
        let progress = ProgressState::new(false);
        let outcome = transfer_object(&source, &destination, &record, &progress).await?;
        assert_eq!(outcome, Outcome::Copied { bytes: 11 });
        let (body, dst_fp) = dst.get(testutils::DST, "a").unwrap();
        assert_eq!(body, "new content");
        assert_eq!(dst_fp, fp);
        Ok(())
    }

    #[tokio::test]
    async fn write_failure_names_the_object() {
        let (src, dst, source, destination) = testutils::memory_endpoints();
        src.insert(testutils::SRC, "a", "hello");
        dst.fail_put_for("a");
        let record = testutils::record(&src, "a");
        let progress = ProgressState::new(false);
        let error = transfer_object(&source, &destination, &record, &progress)
            .await
            .unwrap_err();
        let message = format!("{error:#}");
        assert!(message.contains("failed writing \"a\""));
        assert!(message.contains("injected failure"));
    }

    #[tokio::test]
    async fn worker_stops_at_end_marker() -> anyhow::Result<()> {
        let (src, _dst, source, destination) = testutils::memory_endpoints();
        src.insert(testutils::SRC, "a", "1");
        src.insert(testutils::SRC, "b", "2");
        let queue = TransferQueue::new();
        queue.push(WorkItem::Object(testutils::record(&src, "a")))?;
        queue.push(WorkItem::EndOfStream)?;
        queue.push(WorkItem::Object(testutils::record(&src, "b")))?;
        let ctx = Arc::new(WorkerContext {
            source,
            destination,
            queue: queue.clone(),
            progress: Arc::new(ProgressState::new(false)),
            ops_throttle: Arc::new(throttle::OpsThrottle::new(0)),
            progress_sample: 0,
        });
        let report = run_worker(0, ctx.clone()).await?;
        assert_eq!(
            report,
            WorkerReport {
                processed: 1,
                saw_end_marker: true,
            }
        );
        // items behind the marker are left for other workers
        assert_eq!(queue.len(), 1);
        assert_eq!(ctx.progress.get().transferred, 1);
        Ok(())
    }
}
