//! Bounded multi-producer multi-consumer event pipeline.
//!
//! The pipeline is a fixed-size ring of slots. Every slot carries a sequence number that tells
//! publishers whether the slot is free for the current lap and subscribers whether it holds a
//! value for the current lap. Positions are claimed with a compare-and-swap, so each published
//! event is claimed by exactly one subscriber no matter how many subscribers compete for it.
//!
//! Waiting is cooperative: a publisher facing a full ring parks on `not_full`, a subscriber
//! facing an empty ring parks on `not_empty`. Neither spins.
//!
//! Lifecycle:
//! - The pipeline is *closed* when the last [`Publisher`] is dropped. Subscribers drain what is
//!   left and then [`Subscriber::claim`] returns `None`.
//! - The pipeline is *halted* when the last [`Subscriber`] is dropped or [`EventPipeline::halt`]
//!   is called. Publishing then fails with [`ErrorKind::PipelineHalted`] instead of blocking
//!   forever.
//!
//! All publishers must be created before the first one is dropped, otherwise the pipeline closes
//! early.

use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use batch_config::shared::ProducerMode;
use metrics::gauge;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use crate::bail;
use crate::error::{BatchResult, ErrorKind};
use crate::metrics::BATCH_PIPELINE_DEPTH;

/// Smallest ring an [`EventPipeline`] accepts.
pub const MIN_CAPACITY: usize = 2;

/// A ring slot.
///
/// `sequence == position` means free for the publisher at `position`, `sequence == position + 1`
/// means filled for the subscriber at `position`.
struct Slot<T> {
    sequence: AtomicUsize,
    value: Mutex<Option<T>>,
}

/// Monotonic counters shared with [`PipelineProbe`].
#[derive(Debug, Default)]
struct PipelineCounters {
    published: AtomicU64,
    claimed: AtomicU64,
}

struct Shared<T> {
    slots: Box<[Slot<T>]>,
    mask: usize,
    mode: ProducerMode,
    enqueue_pos: AtomicUsize,
    dequeue_pos: AtomicUsize,
    publishers: AtomicUsize,
    publishers_created: AtomicUsize,
    subscribers: AtomicUsize,
    closed: AtomicBool,
    halted: AtomicBool,
    not_full: Notify,
    not_empty: Notify,
    counters: Arc<PipelineCounters>,
}

impl<T> Shared<T> {
    /// Stores `value` in the next free slot or hands it back when the ring is full.
    fn try_push(&self, value: T) -> Result<(), T> {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos & self.mask];
            let sequence = slot.sequence.load(Ordering::Acquire);
            let diff = sequence as isize - pos as isize;

            if diff == 0 {
                let claimed = match self.mode {
                    ProducerMode::Single => {
                        self.enqueue_pos.store(pos + 1, Ordering::Relaxed);
                        true
                    }
                    ProducerMode::Multi => self
                        .enqueue_pos
                        .compare_exchange_weak(pos, pos + 1, Ordering::Relaxed, Ordering::Relaxed)
                        .map_err(|current| pos = current)
                        .is_ok(),
                };

                if claimed {
                    *slot.value.lock() = Some(value);
                    slot.sequence.store(pos + 1, Ordering::Release);
                    return Ok(());
                }
            } else if diff < 0 {
                return Err(value);
            } else {
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Takes the oldest filled slot, if any.
    fn try_pop(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos & self.mask];
            let sequence = slot.sequence.load(Ordering::Acquire);
            let diff = sequence as isize - (pos + 1) as isize;

            if diff == 0 {
                match self.dequeue_pos.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = slot.value.lock().take();
                        slot.sequence.store(pos + self.mask + 1, Ordering::Release);
                        if value.is_some() {
                            return value;
                        }
                        pos = self.dequeue_pos.load(Ordering::Relaxed);
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            }
        }
    }

    fn depth(&self) -> u64 {
        let published = self.counters.published.load(Ordering::Relaxed);
        let claimed = self.counters.claimed.load(Ordering::Relaxed);
        published.saturating_sub(claimed)
    }
}

/// Handle to a bounded event pipeline.
///
/// Cloning the handle is cheap and does not create publishers or subscribers.
pub struct EventPipeline<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for EventPipeline<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> EventPipeline<T> {
    /// Creates a pipeline with `capacity` slots.
    ///
    /// `capacity` must be a power of two of at least [`MIN_CAPACITY`]. With a single slot the
    /// "filled" and "free for the next lap" sequences coincide.
    pub fn new(capacity: usize, mode: ProducerMode) -> BatchResult<Self> {
        if capacity < MIN_CAPACITY || !capacity.is_power_of_two() {
            bail!(
                ErrorKind::ConfigError,
                "Pipeline capacity must be a power of two of at least 2",
                format!("got capacity {capacity}")
            );
        }

        let slots = (0..capacity)
            .map(|index| Slot {
                sequence: AtomicUsize::new(index),
                value: Mutex::new(None),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            shared: Arc::new(Shared {
                slots,
                mask: capacity - 1,
                mode,
                enqueue_pos: AtomicUsize::new(0),
                dequeue_pos: AtomicUsize::new(0),
                publishers: AtomicUsize::new(0),
                publishers_created: AtomicUsize::new(0),
                subscribers: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                halted: AtomicBool::new(false),
                not_full: Notify::new(),
                not_empty: Notify::new(),
                counters: Arc::new(PipelineCounters::default()),
            }),
        })
    }

    /// Returns the number of slots.
    pub fn capacity(&self) -> usize {
        self.shared.slots.len()
    }

    /// Creates a publisher.
    ///
    /// In [`ProducerMode::Single`] only one publisher may ever exist; asking for a second one
    /// fails with [`ErrorKind::ConfigError`]. Publishers cannot be created after the pipeline
    /// closed.
    pub fn publisher(&self) -> BatchResult<Publisher<T>> {
        if self.shared.closed.load(Ordering::Acquire) {
            bail!(
                ErrorKind::InvalidState,
                "Cannot publish into a closed pipeline"
            );
        }

        let created = self.shared.publishers_created.fetch_add(1, Ordering::AcqRel);
        if self.shared.mode == ProducerMode::Single && created > 0 {
            bail!(
                ErrorKind::ConfigError,
                "Single-producer pipeline already has a publisher"
            );
        }

        self.shared.publishers.fetch_add(1, Ordering::AcqRel);

        Ok(Publisher {
            shared: self.shared.clone(),
        })
    }

    /// Creates a subscriber.
    pub fn subscribe(&self) -> Subscriber<T> {
        self.shared.subscribers.fetch_add(1, Ordering::AcqRel);

        Subscriber {
            shared: self.shared.clone(),
        }
    }

    /// Stops the pipeline. Blocked and future publishes fail with [`ErrorKind::PipelineHalted`].
    ///
    /// Events already in the ring stay claimable.
    pub fn halt(&self) {
        if !self.shared.halted.swap(true, Ordering::AcqRel) {
            debug!("event pipeline halted");
        }
        self.shared.not_full.notify_waiters();
    }

    /// Returns a read-only view of the pipeline counters.
    pub fn probe(&self) -> PipelineProbe {
        PipelineProbe {
            capacity: self.capacity(),
            counters: self.shared.counters.clone(),
        }
    }
}

/// Publishes events into an [`EventPipeline`].
///
/// Dropping the last publisher closes the pipeline.
pub struct Publisher<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Publisher<T> {
    /// Publishes `value`, waiting while the ring is full.
    ///
    /// Fails with [`ErrorKind::PipelineHalted`] once no subscriber is left to drain the ring.
    pub async fn publish(&mut self, value: T) -> BatchResult<()> {
        let mut value = value;
        loop {
            if self.shared.halted.load(Ordering::Acquire) {
                bail!(
                    ErrorKind::PipelineHalted,
                    "Event pipeline has no running consumers"
                );
            }

            let mut notified = pin!(self.shared.not_full.notified());
            notified.as_mut().enable();

            match self.shared.try_push(value) {
                Ok(()) => {
                    self.shared
                        .counters
                        .published
                        .fetch_add(1, Ordering::Relaxed);
                    self.shared.not_empty.notify_one();
                    gauge!(BATCH_PIPELINE_DEPTH).set(self.shared.depth() as f64);

                    return Ok(());
                }
                Err(rejected) => value = rejected,
            }

            if self.shared.halted.load(Ordering::Acquire) {
                continue;
            }

            notified.await;
        }
    }
}

impl<T> Drop for Publisher<T> {
    fn drop(&mut self) {
        if self.shared.publishers.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.closed.store(true, Ordering::Release);
            self.shared.not_empty.notify_waiters();
            debug!("event pipeline closed");
        }
    }
}

/// Claims events from an [`EventPipeline`].
///
/// Dropping the last subscriber halts the pipeline.
pub struct Subscriber<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Subscriber<T> {
    /// Claims the next event, waiting while the ring is empty.
    ///
    /// Returns `None` once the pipeline is closed and drained.
    pub async fn claim(&self) -> Option<T> {
        loop {
            let mut notified = pin!(self.shared.not_empty.notified());
            notified.as_mut().enable();

            if let Some(value) = self.try_claim() {
                return Some(value);
            }

            if self.shared.closed.load(Ordering::Acquire) {
                // Publishes that completed before the close are visible now.
                return self.try_claim();
            }

            notified.await;
        }
    }

    /// Claims the next event without waiting.
    pub fn try_claim(&self) -> Option<T> {
        let value = self.shared.try_pop()?;
        self.shared.counters.claimed.fetch_add(1, Ordering::Relaxed);
        self.shared.not_full.notify_one();

        Some(value)
    }
}

impl<T> Drop for Subscriber<T> {
    fn drop(&mut self) {
        if self.shared.subscribers.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.halted.store(true, Ordering::Release);
            self.shared.not_full.notify_waiters();
        }
    }
}

/// Read-only counters of an [`EventPipeline`], kept alive independently of it.
#[derive(Debug, Clone)]
pub struct PipelineProbe {
    capacity: usize,
    counters: Arc<PipelineCounters>,
}

impl PipelineProbe {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn published(&self) -> u64 {
        self.counters.published.load(Ordering::Relaxed)
    }

    pub fn claimed(&self) -> u64 {
        self.counters.claimed.load(Ordering::Relaxed)
    }

    /// Events published but not yet claimed.
    pub fn depth(&self) -> u64 {
        self.published().saturating_sub(self.claimed())
    }
}
