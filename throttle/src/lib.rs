//! Flow control for the omirror transfer pipeline
//!
//! This crate provides the two throttling mechanisms used while mirroring a container:
//!
//! 1. **Backpressure** - a crude valve for the producer side. After every enqueue the enumerator
//!    reports the current queue depth; when the depth exceeds a threshold the enumerator is
//!    suspended for a fixed pause before it continues listing. This bounds memory growth when
//!    listing outruns transfers. It is not a precise rate limiter.
//! 2. **Operations Throttle** - an optional token bucket limiting how many objects per second the
//!    transfer workers may process.
//!
//! # Usage Patterns
//!
//! ## Backpressure
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use throttle::Backpressure;
//!
//! # async fn example(queue_depth: usize) {
//! let valve = Backpressure::new(500, Duration::from_secs(2));
//! // called after each enqueue
//! valve.relieve(queue_depth).await;
//! # }
//! ```
//!
//! ## Operations Throttling
//!
//! ```rust,no_run
//! use throttle::OpsThrottle;
//!
//! # async fn example() {
//! let throttle = std::sync::Arc::new(OpsThrottle::new(200));
//! tokio::spawn({
//!     let throttle = throttle.clone();
//!     async move { throttle.run_replenish().await }
//! });
//! throttle.get_token().await;
//! // process one object here
//! # }
//! ```
//!
//! # Replenishment Strategy
//!
//! Tokens are refilled by a background task. Rates of at least 10 operations per second are
//! split into 100ms intervals (`ops / 10` tokens each); slower rates add a single token every
//! `1s / ops`.

mod semaphore;

pub use semaphore::TokenBucket;

const FAST_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);

/// Producer-side valve pausing the enumerator while the queue is too deep.
#[derive(Debug, Clone, Copy)]
pub struct Backpressure {
    threshold: usize,
    pause: std::time::Duration,
}

impl Backpressure {
    pub fn new(threshold: usize, pause: std::time::Duration) -> Self {
        Self { threshold, pause }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn pause(&self) -> std::time::Duration {
        self.pause
    }

    /// Returns true if `depth` is above the threshold.
    pub fn is_saturated(&self, depth: usize) -> bool {
        depth > self.threshold
    }

    /// Sleeps for the configured pause when `depth` exceeds the threshold.
    ///
    /// Returns whether the caller was paused.
    pub async fn relieve(&self, depth: usize) -> bool {
        if !self.is_saturated(depth) {
            return false;
        }
        tracing::debug!(
            "queue has {} pending objects (threshold {}), pausing for {:?}",
            depth,
            self.threshold,
            self.pause
        );
        tokio::time::sleep(self.pause).await;
        true
    }
}

/// Objects-per-second limit shared by all transfer workers.
#[derive(Debug)]
pub struct OpsThrottle {
    bucket: TokenBucket,
    replenish: usize,
    interval: std::time::Duration,
}

impl OpsThrottle {
    /// Creates a throttle allowing `ops_per_second` operations; 0 disables throttling.
    pub fn new(ops_per_second: usize) -> Self {
        let (replenish, interval) = replenish_schedule(ops_per_second);
        Self {
            bucket: TokenBucket::new(replenish),
            replenish,
            interval,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.bucket.is_enabled()
    }

    pub async fn get_token(&self) {
        self.bucket.consume().await;
    }

    /// Refills the bucket forever; returns immediately when throttling is disabled.
    pub async fn run_replenish(&self) {
        self.bucket
            .run_replenish(self.replenish, self.interval)
            .await;
    }
}

fn replenish_schedule(ops_per_second: usize) -> (usize, std::time::Duration) {
    if ops_per_second == 0 {
        return (0, FAST_INTERVAL);
    }
    if ops_per_second >= 10 {
        return (ops_per_second / 10, FAST_INTERVAL);
    }
    // ops_per_second is in 1..10 here
    let millis = 1000 / ops_per_second as u64;
    (1, std::time::Duration::from_millis(millis))
}
