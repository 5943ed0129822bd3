//! Batch orchestration over the probe engine.
//!
//! A [`BatchRunner`] dispatches one probe per [`RequestSpec`] with bounded
//! concurrency, an inter-dispatch delay, and retry of transient failures.
//! [`BatchControl`] stops or pauses the run between items; a probe already in
//! flight is never aborted and ends at its own timeout.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::probe::{ProbeEngine, ProbeReport, RequestSpec};

/// Minimum probes in flight.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum probes in flight.
pub const MAX_CONCURRENCY: usize = 64;

/// Maximum extra retries per URL.
pub const MAX_RETRY_COUNT: u32 = 10;

/// Maximum jitter added to retry delays.
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Errors from constructing or running a batch.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency { value: usize },

    #[error("invalid retry count {value}: must be at most {MAX_RETRY_COUNT}")]
    InvalidRetryCount { value: u32 },

    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Dispatch policy for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    pub concurrency: usize,
    /// Pause between dispatches, and base delay before a retry.
    pub delay: Duration,
    /// Extra attempts for a transient failure.
    pub retry_count: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            delay: Duration::ZERO,
            retry_count: 0,
        }
    }
}

/// Counters for a batch run, updated from concurrent tasks.
#[derive(Debug, Default)]
pub struct BatchStats {
    total: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    retried: AtomicUsize,
    cancelled: AtomicUsize,
}

impl BatchStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of URLs submitted.
    #[must_use]
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// URLs whose final record is an untagged 2xx/3xx.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::SeqCst)
    }

    /// URLs whose final record is tagged or outside 2xx/3xx.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Retry attempts made across all URLs.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    /// URLs never dispatched because the batch was stopped.
    #[must_use]
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn increment(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// Stop and pause handle shared between a running batch and its owner.
#[derive(Debug, Clone)]
pub struct BatchControl {
    token: CancellationToken,
    paused: Arc<watch::Sender<bool>>,
}

impl Default for BatchControl {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchControl {
    #[must_use]
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            token: CancellationToken::new(),
            paused: Arc::new(paused),
        }
    }

    /// Stops dispatching. Probes already in flight finish normally.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Token cancelled by [`stop`](Self::stop).
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Waits while paused. Returns `false` once stopped.
    pub async fn proceed(&self) -> bool {
        if self.is_stopped() {
            return false;
        }
        let mut rx = self.paused.subscribe();
        tokio::select! {
            () = self.token.cancelled() => false,
            resumed = rx.wait_for(|paused| !*paused) => resumed.is_ok() && !self.is_stopped(),
        }
    }

    /// Sleeps for `delay` unless stopped first. Returns `false` once stopped.
    async fn sleep(&self, delay: Duration) -> bool {
        if delay.is_zero() {
            return !self.is_stopped();
        }
        tokio::select! {
            () = self.token.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }
}

/// Final state of one URL in a batch.
#[derive(Debug, Clone)]
pub struct BatchItem {
    /// Position in the submitted list.
    pub index: usize,
    pub url: String,
    /// Last record produced; `None` when the URL was never dispatched.
    pub report: Option<ProbeReport>,
    /// Probe attempts made, including retries.
    pub attempts: u32,
}

impl BatchItem {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.report.as_ref().is_some_and(ProbeReport::is_success)
    }
}

/// Records in input order plus counters.
#[derive(Debug)]
pub struct BatchResult {
    pub items: Vec<BatchItem>,
    pub stats: BatchStats,
}

/// Runs many probes against one engine.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    engine: Arc<ProbeEngine>,
    config: BatchConfig,
}

impl BatchRunner {
    /// # Errors
    ///
    /// Returns [`BatchError::InvalidConcurrency`] or
    /// [`BatchError::InvalidRetryCount`] for out-of-range settings.
    pub fn new(engine: Arc<ProbeEngine>, config: BatchConfig) -> Result<Self, BatchError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&config.concurrency) {
            return Err(BatchError::InvalidConcurrency {
                value: config.concurrency,
            });
        }
        if config.retry_count > MAX_RETRY_COUNT {
            return Err(BatchError::InvalidRetryCount {
                value: config.retry_count,
            });
        }
        Ok(Self { engine, config })
    }

    #[must_use]
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Probes every spec and returns the records in input order.
    ///
    /// `on_item` is called from the worker task as each URL settles.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::SemaphoreClosed`] if the concurrency gate closes.
    /// Individual probe failures never fail the batch.
    #[instrument(skip_all, fields(count = specs.len(), concurrency = self.config.concurrency))]
    pub async fn run<F>(
        &self,
        specs: Vec<RequestSpec>,
        control: &BatchControl,
        on_item: F,
    ) -> Result<BatchResult, BatchError>
    where
        F: Fn(&BatchItem) + Send + Sync + 'static,
    {
        let stats = Arc::new(BatchStats::new());
        stats.total.store(specs.len(), Ordering::SeqCst);
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let on_item = Arc::new(on_item);
        let mut slots: Vec<Option<BatchItem>> = vec![None; specs.len()];
        let mut tasks = JoinSet::new();

        info!("starting batch");

        for (index, spec) in specs.into_iter().enumerate() {
            if index > 0 && !control.sleep(self.config.delay).await {
                slots[index] = Some(cancelled_item(index, &spec, &stats));
                continue;
            }
            if !control.proceed().await {
                slots[index] = Some(cancelled_item(index, &spec, &stats));
                continue;
            }

            let permit = tokio::select! {
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    permit.map_err(|_| BatchError::SemaphoreClosed)?
                }
                () = control.token().cancelled() => {
                    slots[index] = Some(cancelled_item(index, &spec, &stats));
                    continue;
                }
            };

            let engine = Arc::clone(&self.engine);
            let stats = Arc::clone(&stats);
            let control = control.clone();
            let on_item = Arc::clone(&on_item);
            let config = self.config;
            debug!(index, url = %spec.url(), "dispatching probe");

            tasks.spawn(async move {
                let _permit = permit;
                let item = probe_with_retry(&engine, index, &spec, &config, &control, &stats).await;
                if item.is_success() {
                    BatchStats::increment(&stats.succeeded);
                } else {
                    BatchStats::increment(&stats.failed);
                }
                on_item(&item);
                item
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(item) => {
                    let index = item.index;
                    slots[index] = Some(item);
                }
                Err(e) => warn!(error = %e, "probe task panicked"),
            }
        }

        let items: Vec<BatchItem> = slots.into_iter().flatten().collect();
        info!(
            total = stats.total(),
            succeeded = stats.succeeded(),
            failed = stats.failed(),
            retried = stats.retried(),
            cancelled = stats.cancelled(),
            "batch complete"
        );

        let stats = Arc::try_unwrap(stats).unwrap_or_else(|shared| {
            let copy = BatchStats::new();
            copy.total.store(shared.total(), Ordering::SeqCst);
            copy.succeeded.store(shared.succeeded(), Ordering::SeqCst);
            copy.failed.store(shared.failed(), Ordering::SeqCst);
            copy.retried.store(shared.retried(), Ordering::SeqCst);
            copy.cancelled.store(shared.cancelled(), Ordering::SeqCst);
            copy
        });
        Ok(BatchResult { items, stats })
    }
}

fn cancelled_item(index: usize, spec: &RequestSpec, stats: &BatchStats) -> BatchItem {
    BatchStats::increment(&stats.cancelled);
    BatchItem {
        index,
        url: spec.url().to_string(),
        report: None,
        attempts: 0,
    }
}

async fn probe_with_retry(
    engine: &ProbeEngine,
    index: usize,
    spec: &RequestSpec,
    config: &BatchConfig,
    control: &BatchControl,
    stats: &BatchStats,
) -> BatchItem {
    let mut attempts = 1;
    let mut report = engine.execute_until(spec, control.token()).await;

    while attempts <= config.retry_count
        && report.taxonomy().is_some_and(|tag| tag.is_transient())
        && report.failure().is_some()
    {
        let delay = retry_delay(config.delay);
        debug!(index, attempt = attempts + 1, delay_ms = delay.as_millis(), "retrying probe");
        if !control.sleep(delay).await || !control.proceed().await {
            break;
        }
        BatchStats::increment(&stats.retried);
        attempts += 1;
        report = engine.execute_until(spec, control.token()).await;
    }

    BatchItem {
        index,
        url: spec.url().to_string(),
        report: Some(report),
        attempts,
    }
}

/// Base delay plus random jitter.
fn retry_delay(base: Duration) -> Duration {
    #[allow(clippy::cast_possible_truncation)]
    let jitter_ms = rand::thread_rng().gen_range(0..=MAX_JITTER.as_millis() as u64);
    base + Duration::from_millis(jitter_ms)
}
