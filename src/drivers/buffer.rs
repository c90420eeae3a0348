use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::drivers::{Result, StreamError};
use crate::types::Sample;

/// Bounded FIFO for real-time consumers. Pushing never blocks: when full,
/// the oldest buffered sample is evicted.
#[derive(Clone)]
pub struct LiveQueue {
    tx: Sender<Sample>,
    // Held so the producer can evict from the front.
    rx: Receiver<Sample>,
    capacity: usize,
    leased: Arc<AtomicBool>,
    evicted: Arc<AtomicU64>,
}

impl LiveQueue {
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(StreamError::Config(
                "live queue capacity must be greater than zero".into(),
            ));
        }
        let (tx, rx) = channel::bounded(capacity);
        Ok(Self {
            tx,
            rx,
            capacity,
            leased: Arc::new(AtomicBool::new(false)),
            evicted: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Non-blocking push with drop-oldest overflow. Returns true if a sample
    /// had to be evicted to make room.
    pub fn push(&self, sample: Sample) -> bool {
        let mut item = sample;
        let mut evicted = false;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => return evicted,
                Err(TrySendError::Full(back)) => {
                    item = back;
                    if self.rx.try_recv().is_ok() {
                        evicted = true;
                        self.evicted.fetch_add(1, Ordering::Relaxed);
                    }
                }
                // We own a receiver, so the channel cannot disconnect.
                Err(TrySendError::Disconnected(_)) => return evicted,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Takes exclusive read ownership. Only one reader may exist at a time;
    /// the lease is returned when the reader is dropped.
    pub fn lease(&self) -> Result<LiveReader> {
        self.leased
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| StreamError::LiveQueueBusy)?;
        Ok(LiveReader {
            rx: self.rx.clone(),
            leased: Arc::clone(&self.leased),
        })
    }
}

/// Exclusive consumer side of a [`LiveQueue`].
pub struct LiveReader {
    rx: Receiver<Sample>,
    leased: Arc<AtomicBool>,
}

impl LiveReader {
    /// Blocks for the next sample. Expiry means the source stopped producing.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Sample> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => StreamError::Stall { waited: timeout },
            RecvTimeoutError::Disconnected => StreamError::SourceClosed,
        })
    }

    /// Discards everything currently buffered and returns how many samples
    /// were dropped.
    pub fn flush(&self) -> usize {
        self.rx.try_iter().count()
    }
}

impl Drop for LiveReader {
    fn drop(&mut self) {
        self.leased.store(false, Ordering::Release);
    }
}

/// Unbounded FIFO feeding the persistence writer. Pushes are dropped
/// unless a writer has opened the queue, so nothing accumulates while the
/// session is not saving.
#[derive(Clone)]
pub struct PersistenceQueue {
    tx: Sender<Sample>,
    rx: Receiver<Sample>,
    accepting: Arc<AtomicBool>,
}

impl PersistenceQueue {
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            tx,
            rx,
            accepting: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Queues `sample` if a writer is attached; returns whether it was kept.
    pub fn push(&self, sample: Sample) -> bool {
        if !self.accepting.load(Ordering::Acquire) {
            return false;
        }
        // Cannot fail while `self.rx` is alive.
        self.tx.send(sample).is_ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    pub(crate) fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::Release);
    }

    /// Drops whatever is queued; returns how many samples were discarded.
    pub(crate) fn clear(&self) -> usize {
        self.rx.try_iter().count()
    }

    pub(crate) fn receiver(&self) -> Receiver<Sample> {
        self.rx.clone()
    }
}

impl Default for PersistenceQueue {
    fn default() -> Self {
        Self::new()
    }
}
