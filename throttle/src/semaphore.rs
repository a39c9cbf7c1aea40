use std::sync::atomic::{AtomicBool, Ordering};

/// Token bucket backed by a tokio semaphore.
///
/// A bucket created with zero tokens is disabled: consuming is a no-op and the replenish loop
/// returns immediately.
#[derive(Debug)]
pub struct TokenBucket {
    enabled: AtomicBool,
    sem: tokio::sync::Semaphore,
}

impl TokenBucket {
    pub fn new(tokens: usize) -> Self {
        let bucket = Self {
            enabled: AtomicBool::new(false),
            sem: tokio::sync::Semaphore::new(0),
        };
        bucket.setup(tokens);
        bucket
    }

    pub fn setup(&self, tokens: usize) {
        self.enabled.store(tokens > 0, Ordering::Release);
        if tokens == 0 {
            return;
        }
        self.sem.forget_permits(self.sem.available_permits());
        self.sem.add_permits(tokens);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.sem.available_permits()
    }

    pub async fn consume(&self) {
        if !self.is_enabled() {
            return;
        }
        match self.sem.acquire().await {
            Ok(permit) => permit.forget(),
            // the semaphore is never closed, treat it as "no throttle" if it ever is
            Err(_) => tracing::warn!("token bucket closed, continuing without throttling"),
        }
    }

    pub async fn run_replenish(&self, replenish: usize, interval: std::time::Duration) {
        if !self.is_enabled() {
            return;
        }
        loop {
            tokio::time::sleep(interval).await;
            let curr_permits = self.sem.available_permits();
            if curr_permits >= replenish {
                continue;
            }
            self.sem.add_permits(replenish - curr_permits);
        }
    }
}
