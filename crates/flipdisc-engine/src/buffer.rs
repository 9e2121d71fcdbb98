//! Bounded keep-latest frame buffer.
//!
//! Single-producer/single-consumer FIFO between the forwarder and the
//! dispatcher. When full, the **oldest** entry is dropped so producers
//! always land their newest frame. Popping from an empty buffer returns
//! immediately; the dispatcher falls back to its hold frame.

use flipdisc_proto::RbmFrame;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::Mutex;

/// One queued frame. Owned by the buffer, moved to the dispatcher on
/// dequeue, released when the tick completes.
#[derive(Debug, Clone)]
pub struct BufferEntry {
    pub frame: RbmFrame,
    pub received_at: Instant,
    pub producer_id: String,
}

struct Inner {
    entries: VecDeque<BufferEntry>,
    capacity: usize,
    high_water: usize,
}

/// Fixed-capacity FIFO with oldest-drop overflow.
pub struct FrameBuffer {
    inner: Mutex<Inner>,
    occupancy: AtomicUsize,
    received: AtomicU64,
    dropped_overflow: AtomicU64,
    popped: AtomicU64,
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                entries: VecDeque::with_capacity(capacity),
                capacity,
                high_water: 0,
            }),
            occupancy: AtomicUsize::new(0),
            received: AtomicU64::new(0),
            dropped_overflow: AtomicU64::new(0),
            popped: AtomicU64::new(0),
        }
    }

    /// Queue an entry, evicting the oldest when full. Returns the evicted
    /// entry, which is counted as an overflow drop.
    pub async fn push(&self, entry: BufferEntry) -> Option<BufferEntry> {
        let mut inner = self.inner.lock().await;
        self.received.fetch_add(1, Ordering::Relaxed);
        let dropped = if inner.entries.len() >= inner.capacity {
            self.dropped_overflow.fetch_add(1, Ordering::Relaxed);
            inner.entries.pop_front()
        } else {
            None
        };
        inner.entries.push_back(entry);
        let level = inner.entries.len();
        inner.high_water = inner.high_water.max(level);
        self.occupancy.store(level, Ordering::Relaxed);
        dropped
    }

    /// Dequeue the oldest entry, or `None` right away when empty.
    pub async fn pop(&self) -> Option<BufferEntry> {
        let mut inner = self.inner.lock().await;
        let entry = inner.entries.pop_front();
        if entry.is_some() {
            self.popped.fetch_add(1, Ordering::Relaxed);
        }
        self.occupancy.store(inner.entries.len(), Ordering::Relaxed);
        entry
    }

    /// Change capacity, keeping the newest entries. Evictions count as
    /// overflow drops.
    pub async fn resize(&self, capacity: usize) {
        let capacity = capacity.max(1);
        let mut inner = self.inner.lock().await;
        inner.capacity = capacity;
        while inner.entries.len() > capacity {
            inner.entries.pop_front();
            self.dropped_overflow.fetch_add(1, Ordering::Relaxed);
        }
        self.occupancy.store(inner.entries.len(), Ordering::Relaxed);
    }

    pub async fn capacity(&self) -> usize {
        self.inner.lock().await.capacity
    }

    /// Occupancy high-water mark since the previous call.
    pub async fn take_high_water(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let level = inner.entries.len();
        std::mem::replace(&mut inner.high_water, level)
    }

    pub fn occupancy(&self) -> usize {
        self.occupancy.load(Ordering::Relaxed)
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn dropped_overflow(&self) -> u64 {
        self.dropped_overflow.load(Ordering::Relaxed)
    }

    pub fn popped(&self) -> u64 {
        self.popped.load(Ordering::Relaxed)
    }
}
