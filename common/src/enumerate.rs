use anyhow::Context;
use futures::TryStreamExt;
use tracing::instrument;

use crate::mirror::Endpoint;
use crate::progress::ProgressState;
use crate::queue::{TransferQueue, WorkItem};

/// What the enumerator did during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnumerationReport {
    pub listed: u64,
    pub pauses: u64,
    pub end_markers: usize,
}

/// Lists every object of `source` into `queue`, then enqueues one end marker per worker.
///
/// The depth of the queue is checked after every single enqueue; while it is above the
/// backpressure threshold the enumerator sleeps before listing further. A listing error aborts
/// enumeration without enqueueing end markers.
#[instrument(skip_all, fields(role = "lister", source = %source))]
pub async fn enumerate(
    source: &Endpoint,
    queue: &TransferQueue,
    progress: &ProgressState,
    backpressure: &throttle::Backpressure,
    workers: usize,
) -> anyhow::Result<EnumerationReport> {
    progress.say("...started task 'lister'...");
    let mut report = EnumerationReport::default();
    let mut listing = source.store.list_all(&source.container);
    while let Some(record) = listing
        .try_next()
        .await
        .with_context(|| format!("failed listing {source}"))?
    {
        tracing::trace!("listed {:?}", &record.key);
        // count before enqueueing so that processed objects never outnumber listed ones
        progress.record_listed();
        report.listed += 1;
        let depth = queue.push(WorkItem::Object(record))?;
        if backpressure.is_saturated(depth) {
            progress.say(format!(
                "Queue has more than {} pending objects, sleeping {}",
                backpressure.threshold(),
                humantime::format_duration(backpressure.pause())
            ));
            backpressure.relieve(depth).await;
            report.pauses += 1;
        }
    }
    for _ in 0..workers {
        queue.push(WorkItem::EndOfStream)?;
        report.end_markers += 1;
    }
    tracing::info!(
        "listing done: {} objects, {} pauses",
        report.listed,
        report.pauses
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils;

    #[tokio::test]
    async fn enqueues_objects_then_one_marker_per_worker() -> anyhow::Result<()> {
        let (src, _dst, source, _destination) = testutils::memory_endpoints();
        src.insert(testutils::SRC, "a", "1");
        src.insert(testutils::SRC, "b", "2");
        let queue = TransferQueue::new();
        let progress = ProgressState::new(false);
        let valve = throttle::Backpressure::new(100, std::time::Duration::from_secs(2));
        let report = enumerate(&source, &queue, &progress, &valve, 3).await?;
        assert_eq!(
            report,
            EnumerationReport {
                listed: 2,
                pauses: 0,
                end_markers: 3,
            }
        );
        assert_eq!(queue.len(), 5);
        assert!(matches!(queue.pop().await?, WorkItem::Object(record) if record.key == "a"));
        assert!(matches!(queue.pop().await?, WorkItem::Object(record) if record.key == "b"));
        for _ in 0..3 {
            assert_eq!(queue.pop().await?, WorkItem::EndOfStream);
        }
        assert_eq!(progress.get().listed, 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn pauses_after_every_enqueue_above_threshold() -> anyhow::Result<()> {
        let (src, _dst, source, _destination) = testutils::memory_endpoints();
        for i in 0..5 {
            src.insert(testutils::SRC, &format!("obj{i}"), format!("{i}"));
        }
        let queue = TransferQueue::new();
        let progress = ProgressState::new(false);
        let valve = throttle::Backpressure::new(2, std::time::Duration::from_secs(2));
        let start = tokio::time::Instant::now();
        let report = enumerate(&source, &queue, &progress, &valve, 1).await?;
        // nothing consumes the queue: depths 3, 4 and 5 each trigger a pause
        assert_eq!(report.pauses, 3);
        assert!(start.elapsed() >= std::time::Duration::from_secs(6));
        Ok(())
    }

    #[tokio::test]
    async fn listing_error_skips_end_markers() {
        let (src, _dst, source, _destination) = testutils::memory_endpoints();
        src.insert(testutils::SRC, "a", "1");
        src.insert(testutils::SRC, "b", "2");
        src.fail_listing_after(1);
        let queue = TransferQueue::new();
        let progress = ProgressState::new(false);
        let valve = throttle::Backpressure::new(100, std::time::Duration::from_secs(2));
        let error = enumerate(&source, &queue, &progress, &valve, 4)
            .await
            .unwrap_err();
        assert!(format!("{error:#}").contains("interrupted after 1 objects"));
        assert_eq!(queue.len(), 1);
        assert_eq!(progress.get().listed, 1);
    }
}
