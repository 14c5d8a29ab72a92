use crate::error::Result;
use crate::frame::Sequenced;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long a consumer waits for a new frame before logging a stall and waiting again
pub const FRAME_WAIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Fan-out of the latest frame to any number of consumers.
///
/// Only the most recent frame is held. A consumer that falls behind sees the newest
/// frame when it next wakes and skips the ones in between; publishing never blocks.
pub struct FrameDistributor<T> {
    name: String,
    sender: watch::Sender<Option<Arc<T>>>,
    published: AtomicU64,
}

impl<T> FrameDistributor<T>
where
    T: Sequenced + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            name: name.into(),
            sender,
            published: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replace the latest frame and wake every consumer
    pub fn publish(&self, frame: T) -> Arc<T> {
        let frame = Arc::new(frame);
        self.publish_shared(Arc::clone(&frame));
        frame
    }

    pub fn publish_shared(&self, frame: Arc<T>) {
        self.sender.send_replace(Some(frame));
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Register a consumer. Frames published before this call are never delivered to it.
    pub fn subscribe(&self, consumer: impl Into<String>) -> FrameSubscription<T> {
        let consumer = consumer.into();
        debug!("{} subscribed to {} frames", consumer, self.name);
        FrameSubscription {
            consumer,
            receiver: self.sender.subscribe(),
            last_frame_num: None,
            stats: Arc::new(ConsumerStats::new()),
        }
    }

    pub fn latest(&self) -> Option<Arc<T>> {
        self.sender.borrow().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

/// Outcome of one wait on a subscription
#[derive(Debug)]
pub enum Received<T> {
    Frame(Arc<T>),
    /// Nothing was published within the wait timeout
    TimedOut,
    /// The distributor has been dropped
    Closed,
}

/// One consumer's view of a distributor
pub struct FrameSubscription<T> {
    consumer: String,
    receiver: watch::Receiver<Option<Arc<T>>>,
    last_frame_num: Option<u64>,
    stats: Arc<ConsumerStats>,
}

impl<T> FrameSubscription<T>
where
    T: Sequenced + Send + Sync + 'static,
{
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.stats)
    }

    /// Wait up to `wait` for a frame newer than the last one seen
    pub async fn recv(&mut self, wait: Duration) -> Received<T> {
        loop {
            match tokio::time::timeout(wait, self.receiver.changed()).await {
                Err(_) => {
                    self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                    warn!("{}: no frame received within {:?}", self.consumer, wait);
                    return Received::TimedOut;
                }
                Ok(Err(_)) => return Received::Closed,
                Ok(Ok(())) => {
                    let latest = self.receiver.borrow_and_update().clone();
                    if let Some(frame) = latest {
                        self.track(frame.frame_num());
                        return Received::Frame(frame);
                    }
                }
            }
        }
    }

    fn track(&mut self, frame_num: u64) {
        if let Some(previous) = self.last_frame_num {
            let expected = previous + 1;
            if frame_num > expected {
                let dropped = frame_num - expected;
                self.stats.frames_dropped.fetch_add(dropped, Ordering::Relaxed);
                warn!(
                    "{}: dropped {} frame(s) between {} and {}",
                    self.consumer, dropped, previous, frame_num
                );
            } else if frame_num < expected {
                warn!(
                    "{}: frame number went from {} back to {}",
                    self.consumer, previous, frame_num
                );
            }
        }
        self.last_frame_num = Some(frame_num);
    }
}

/// Per-consumer counters
#[derive(Debug, Default)]
pub struct ConsumerStats {
    pub frames_processed: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub timeouts: AtomicU64,
    pub errors: AtomicU64,
}

impl ConsumerStats {
    fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStatsSnapshot {
    pub frames_processed: u64,
    pub frames_dropped: u64,
    pub timeouts: u64,
    pub errors: u64,
}

/// A running consumer task. Dropping the handle cancels the task without waiting for it.
pub struct ConsumerHandle {
    name: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    stats: Arc<ConsumerStats>,
}

impl ConsumerHandle {
    /// Wrap an already spawned task that watches `cancel`
    pub fn new(
        name: impl Into<String>,
        cancel: CancellationToken,
        task: JoinHandle<()>,
        stats: Arc<ConsumerStats>,
    ) -> Self {
        Self {
            name: name.into(),
            cancel,
            task: Some(task),
            stats,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn stats(&self) -> ConsumerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Signal the task to stop and wait for it to finish
    pub async fn close(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("{} task ended abnormally: {}", self.name, e);
            }
            debug!("{} stopped", self.name);
        }
    }
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Spawn a task calling `on_frame` for every frame the subscription yields.
///
/// Errors from `on_frame` are logged and counted; the loop keeps going. The task
/// ends when `cancel` fires or the distributor goes away.
pub fn spawn_consumer<T, F>(
    name: impl Into<String>,
    mut subscription: FrameSubscription<T>,
    cancel: CancellationToken,
    mut on_frame: F,
) -> ConsumerHandle
where
    T: Sequenced + Send + Sync + 'static,
    F: FnMut(&T) -> Result<()> + Send + 'static,
{
    let name = name.into();
    let stats = subscription.stats();
    let task_stats = Arc::clone(&stats);
    let task_cancel = cancel.clone();
    let task_name = name.clone();

    let task = tokio::spawn(async move {
        info!("{} started", task_name);

        loop {
            tokio::select! {
                biased;

                _ = task_cancel.cancelled() => break,

                received = subscription.recv(FRAME_WAIT_TIMEOUT) => match received {
                    Received::Frame(frame) => match on_frame(&frame) {
                        Ok(()) => {
                            task_stats.frames_processed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            task_stats.errors.fetch_add(1, Ordering::Relaxed);
                            error!("{} failed to process frame {}: {}", task_name, frame.frame_num(), e);
                        }
                    },
                    Received::TimedOut => continue,
                    Received::Closed => {
                        info!("{}: frame source closed", task_name);
                        break;
                    }
                },
            }
        }

        info!("{} stopping", task_name);
    });

    ConsumerHandle::new(name, cancel, task, stats)
}
