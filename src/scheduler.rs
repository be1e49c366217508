//! Fixed-interval polling.

use std::convert::Infallible;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::pipeline::Processor;
use crate::services::queue::{QueueAddress, QueueError, QueueGateway};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Runs a task immediately and then once per interval. Runs never overlap:
/// a slow run delays the next tick instead of stacking up behind it.
#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    interval: Duration,
}

impl Scheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(MIN_INTERVAL),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Drive `task` until `shutdown` resolves, returning the number of runs.
    ///
    /// Each run is spawned and awaited, so a failing or panicking run is
    /// logged and the loop carries on. A run in flight when shutdown is
    /// requested is allowed to finish.
    pub async fn run<F, Fut, E>(&self, mut task: F, shutdown: impl Future<Output = ()>) -> u64
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let mut runs = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!(runs, "Shutdown requested, stopping poll loop");
                    break;
                }
                _ = ticker.tick() => {}
            }

            runs += 1;
            debug!(run = runs, "Poll run starting");
            match tokio::spawn(task()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(run = runs, error = %e, "Poll run failed"),
                Err(e) if e.is_panic() => error!(run = runs, "Poll run panicked"),
                Err(e) => error!(run = runs, error = %e, "Poll run aborted"),
            }
        }
        runs
    }
}

/// Use `url` when provided, otherwise create or look up `name`.
pub async fn resolve_queue(
    gateway: &dyn QueueGateway,
    name: &str,
    url: Option<&str>,
) -> Result<QueueAddress, QueueError> {
    match url.filter(|u| !u.trim().is_empty()) {
        Some(url) => {
            info!(queue_url = url, "Using configured queue address");
            Ok(QueueAddress::new(url))
        }
        None => {
            let address = gateway.create_or_resolve(name).await?;
            info!(queue = name, queue_url = %address, "Queue ready");
            Ok(address)
        }
    }
}

/// The worker's main loop: one batch per scheduler tick.
pub struct PollLoop {
    processor: Arc<Processor>,
    queue: QueueAddress,
    scheduler: Scheduler,
}

impl PollLoop {
    pub fn new(processor: Arc<Processor>, queue: QueueAddress, interval: Duration) -> Self {
        Self {
            processor,
            queue,
            scheduler: Scheduler::new(interval),
        }
    }

    pub async fn run(self, shutdown: impl Future<Output = ()>) -> u64 {
        info!(
            queue_url = %self.queue,
            interval_ms = self.scheduler.interval().as_millis() as u64,
            "Worker polling started"
        );

        let processor = self.processor;
        let queue = self.queue;
        self.scheduler
            .run(
                move || {
                    let processor = processor.clone();
                    let queue = queue.clone();
                    async move {
                        processor.process_batch(&queue).await;
                        Ok::<(), Infallible>(())
                    }
                },
                shutdown,
            )
            .await
    }
}
