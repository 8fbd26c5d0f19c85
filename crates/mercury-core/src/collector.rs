//! Time-windowed batching of high-frequency updates.
//!
//! [`UpdateCollector`] coalesces every submission that arrives within one
//! window into a single call of its sink. A submission arriving after the
//! window has already elapsed (the timer has been starved by a busy owner)
//! flushes immediately, so no update waits longer than the window.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

/// Receives each flushed batch, in submission order.
pub type BatchSink<T> = Box<dyn Fn(Vec<T>) + Send + Sync>;

/// Resolves once the batch holding a submission has been handed to the sink.
#[derive(Debug)]
pub struct Flushed(oneshot::Receiver<()>);

impl Future for Flushed {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        // A dropped sender means the collector is gone; nothing left to wait for.
        Pin::new(&mut self.0).poll(cx).map(|_| ())
    }
}

/// Coalesces updates into batches flushed at most one window after the
/// first update of the batch.
pub struct UpdateCollector<T> {
    inner: Arc<CollectorInner<T>>,
}

impl<T> Clone for UpdateCollector<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct CollectorInner<T> {
    delay: Duration,
    sink: BatchSink<T>,
    batch: Mutex<Batch<T>>,
    /// Serializes sink calls so batches leave in the order they were cut.
    flushing: Mutex<()>,
}

struct Batch<T> {
    items: Vec<T>,
    waiters: Vec<oneshot::Sender<()>>,
    started: Instant,
    /// Generation of the pending timer, if one is scheduled.
    scheduled: Option<u64>,
    generation: u64,
}

impl<T: Send + 'static> UpdateCollector<T> {
    /// Create a collector flushing into `sink` after `delay`.
    pub fn new(delay: Duration, sink: impl Fn(Vec<T>) + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(CollectorInner {
                delay,
                sink: Box::new(sink),
                batch: Mutex::new(Batch {
                    items: Vec::new(),
                    waiters: Vec::new(),
                    started: Instant::now(),
                    scheduled: None,
                    generation: 0,
                }),
                flushing: Mutex::new(()),
            }),
        }
    }

    /// The batching window.
    pub fn delay(&self) -> Duration {
        self.inner.delay
    }

    /// Number of updates waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.inner.lock_batch().items.len()
    }

    /// Add an update to the current batch.
    ///
    /// The first update of a batch schedules a flush one window later. When
    /// called outside a tokio runtime there is no timer, so the batch is
    /// flushed right away.
    pub fn submit(&self, update: T) -> Flushed {
        let (tx, rx) = oneshot::channel();

        let (schedule, overdue) = {
            let mut batch = self.inner.lock_batch();
            batch.items.push(update);
            batch.waiters.push(tx);
            match batch.scheduled {
                Some(_) => (None, batch.started.elapsed() > self.inner.delay),
                None => {
                    batch.generation += 1;
                    batch.scheduled = Some(batch.generation);
                    batch.started = Instant::now();
                    (Some(batch.generation), false)
                }
            }
        };

        if let Some(generation) = schedule {
            self.schedule(generation);
        }
        if overdue {
            tracing::trace!("batch window elapsed without a flush, forcing one");
            self.flush();
        }

        Flushed(rx)
    }

    /// Hand the current batch to the sink now. No-op on an empty batch.
    pub fn flush(&self) {
        self.inner.flush_batch(None);
    }

    fn schedule(&self, generation: u64) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let inner = Arc::downgrade(&self.inner);
                let delay = self.inner.delay;
                runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(inner) = inner.upgrade() {
                        inner.flush_batch(Some(generation));
                    }
                });
            }
            Err(_) => self.flush(),
        }
    }
}

impl<T> CollectorInner<T> {
    fn lock_batch(&self) -> MutexGuard<'_, Batch<T>> {
        self.batch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Flush the batch. A timer passes its generation and only flushes the
    /// batch it was scheduled for.
    fn flush_batch(&self, generation: Option<u64>) {
        let _order = self.flushing.lock().unwrap_or_else(PoisonError::into_inner);

        let (items, waiters) = {
            let mut batch = self.lock_batch();
            if generation.is_some() && batch.scheduled != generation {
                return;
            }
            batch.scheduled = None;
            if batch.items.is_empty() {
                return;
            }
            (
                std::mem::take(&mut batch.items),
                std::mem::take(&mut batch.waiters),
            )
        };

        (self.sink)(items);
        for waiter in waiters {
            let _ = waiter.send(());
        }
    }
}
