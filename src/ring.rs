//! Lock-free MPSC ring buffer for access-log events.
//!
//! Bounded, drop-on-full, multi-producer single-consumer. Producers reserve
//! a slot by CAS on the head cursor; a per-slot state machine
//! (EMPTY → WRITING → READY → EMPTY) hands each slot exclusively to the
//! reserving producer and then to the consumer, which drains READY runs in
//! batches and publishes the tail with a release store. Head and tail live
//! on separate cache lines ([`CachePadded`]) so producer and consumer
//! traffic do not false-share.
//!
//! `try_write` never blocks: on contention it spins briefly, then backs off
//! with microsecond sleeps, and on a full or closed buffer it returns
//! `false` — callers trade log completeness for back-pressure resistance.

use std::any::Any;
use std::cell::UnsafeCell;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_utils::CachePadded;
use thiserror::Error;

/// One access-log record. Value-copied into and out of ring slots.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogEvent {
    pub level: u8,
    /// UNIX nanoseconds.
    pub timestamp: i64,
    pub message: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub bytes: i64,
    pub duration_nanos: i64,
    pub remote_addr: String,
}

const SLOT_EMPTY: u8 = 0;
const SLOT_WRITING: u8 = 1;
const SLOT_READY: u8 = 2;

const PRODUCER_SPIN_LIMIT: u32 = 8;
const SLOT_SPIN_LIMIT: u32 = 8;
const MAX_BACKOFF_SHIFT: u32 = 10;
const BATCH_LIMIT: u64 = 128;

#[derive(Debug, Error)]
#[error("ring buffer capacity must be a nonzero power of two")]
pub struct InvalidCapacity;

/// The MPSC ring buffer.
pub struct RingBuffer {
    /// Producers contend on this cursor to reserve slots.
    head: CachePadded<AtomicU64>,
    /// Advanced only by the consumer; producers read it for the full check.
    tail: CachePadded<AtomicU64>,
    mask: u64,
    data: Box<[UnsafeCell<LogEvent>]>,
    state: Box<[AtomicU8]>,
    closed: AtomicBool,
    consuming: AtomicBool,
    panic_handler: Option<Arc<dyn Fn(Box<dyn Any + Send>) + Send + Sync>>,
}

// The per-slot state machine serializes all access to each UnsafeCell: a
// slot is touched by exactly one producer between EMPTY→READY and only by
// the consumer between READY→EMPTY.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Creates a buffer holding `capacity` events. Capacity must be a
    /// nonzero power of two (the index mask depends on it).
    pub fn with_capacity(capacity: u64) -> Result<Self, InvalidCapacity> {
        if capacity == 0 || !capacity.is_power_of_two() || capacity > usize::MAX as u64 {
            return Err(InvalidCapacity);
        }
        let len = capacity as usize;
        let data: Vec<UnsafeCell<LogEvent>> =
            (0..len).map(|_| UnsafeCell::new(LogEvent::default())).collect();
        let state: Vec<AtomicU8> = (0..len).map(|_| AtomicU8::new(SLOT_EMPTY)).collect();
        Ok(Self {
            head: CachePadded::new(AtomicU64::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
            mask: capacity - 1,
            data: data.into_boxed_slice(),
            state: state.into_boxed_slice(),
            closed: AtomicBool::new(false),
            consuming: AtomicBool::new(false),
            panic_handler: None,
        })
    }

    /// Installs a handler for panics escaping the consumer's sink. Without
    /// one, such a panic is rethrown and terminates the consumer.
    pub fn set_panic_handler(
        &mut self,
        f: impl Fn(Box<dyn Any + Send>) + Send + Sync + 'static,
    ) {
        self.panic_handler = Some(Arc::new(f));
    }

    pub fn capacity(&self) -> u64 {
        self.mask + 1
    }

    /// Marks the buffer closed. Producers start failing immediately; the
    /// consumer drains what is left and returns.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Attempts to enqueue one event. Returns `false` when the buffer is
    /// closed or full (drop strategy). Lock-free and safe from any number
    /// of producer threads.
    pub fn try_write(&self, event: LogEvent) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let mut retries = 0u32;
        loop {
            let head = self.head.load(Ordering::Relaxed);
            let tail = self.tail.load(Ordering::Acquire);
            if head.wrapping_sub(tail) >= self.capacity() {
                return false;
            }

            if self
                .head
                .compare_exchange(head, head + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                // Slot `head` is ours. Its previous occupant may still be
                // mid-consumption right after a wrap; wait for EMPTY.
                let idx = (head & self.mask) as usize;
                let mut slot_retries = 0u32;
                while self.state[idx].load(Ordering::Acquire) != SLOT_EMPTY {
                    backoff(&mut slot_retries, SLOT_SPIN_LIMIT);
                }

                self.state[idx].store(SLOT_WRITING, Ordering::Relaxed);
                // Exclusive: no other producer owns this reservation and the
                // consumer skips non-READY slots.
                unsafe {
                    *self.data[idx].get() = event;
                }
                // Publication point.
                self.state[idx].store(SLOT_READY, Ordering::Release);
                return true;
            }
            backoff(&mut retries, PRODUCER_SPIN_LIMIT);
        }
    }

    /// Drains the buffer in batches, blocking until [`close`](Self::close)
    /// is called and everything written has been handed out. Runs on one
    /// dedicated thread:
    ///
    /// ```rust,no_run
    /// use std::sync::Arc;
    /// use strada::RingBuffer;
    ///
    /// let rb = Arc::new(RingBuffer::with_capacity(1024).unwrap());
    /// let consumer = Arc::clone(&rb);
    /// std::thread::spawn(move || consumer.consume(|batch| {
    ///     for event in batch {
    ///         println!("{} {} -> {}", event.method, event.path, event.status);
    ///     }
    /// }));
    /// ```
    ///
    /// The handler must not retain the slice beyond the call; slots are
    /// recycled as soon as it returns. Batches that straddle the wrap point
    /// arrive as two calls in physical order.
    pub fn consume<F: FnMut(&[LogEvent])>(&self, mut handler: F) {
        // Single consumer: a second concurrent call would alias live slots.
        assert!(
            !self.consuming.swap(true, Ordering::AcqRel),
            "RingBuffer::consume is single-consumer"
        );

        let mut curr = self.tail.load(Ordering::Acquire);
        let mut idle = 0u32;
        loop {
            if self.closed.load(Ordering::Acquire)
                && self.tail.load(Ordering::Acquire) == self.head.load(Ordering::Acquire)
            {
                break;
            }

            let idx = (curr & self.mask) as usize;
            match self.state[idx].load(Ordering::Acquire) {
                SLOT_READY => {
                    idle = 0;
                    let batch_limit = self.capacity().min(BATCH_LIMIT);
                    let mut available = 0u64;
                    while available < batch_limit {
                        let j = ((curr + available) & self.mask) as usize;
                        if self.state[j].load(Ordering::Acquire) != SLOT_READY {
                            break;
                        }
                        available += 1;
                    }

                    let start = (curr & self.mask) as usize;
                    let end = ((curr + available) & self.mask) as usize;
                    if end > start {
                        self.deliver(&mut handler, start, end - start);
                    } else {
                        // The run wraps: deliver the two physical pieces in
                        // order.
                        self.deliver(&mut handler, start, self.capacity() as usize - start);
                        if end > 0 {
                            self.deliver(&mut handler, 0, end);
                        }
                    }

                    for i in 0..available {
                        let j = ((curr + i) & self.mask) as usize;
                        self.state[j].store(SLOT_EMPTY, Ordering::Release);
                    }
                    curr += available;
                    self.tail.store(curr, Ordering::Release);
                }
                SLOT_WRITING => {
                    // A producer owns the slot and is about to publish.
                    thread::yield_now();
                }
                _ => {
                    idle += 1;
                    if idle < 10 {
                        thread::yield_now();
                    } else {
                        let shift = (idle - 10).min(MAX_BACKOFF_SHIFT);
                        thread::sleep(Duration::from_micros(1u64 << shift));
                    }
                }
            }
        }
        self.consuming.store(false, Ordering::Release);
    }

    fn deliver<F: FnMut(&[LogEvent])>(&self, handler: &mut F, start: usize, len: usize) {
        // All `len` slots from `start` are READY, so the consumer holds them
        // exclusively for the duration of the call.
        let batch = unsafe {
            std::slice::from_raw_parts(self.data.as_ptr().add(start) as *const LogEvent, len)
        };
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(batch))) {
            match &self.panic_handler {
                Some(panic_handler) => panic_handler(payload),
                None => {
                    self.consuming.store(false, Ordering::Release);
                    resume_unwind(payload);
                }
            }
        }
    }
}

/// Bounded spin, then exponential microsleep up to `2^MAX_BACKOFF_SHIFT` µs.
fn backoff(retries: &mut u32, spin_limit: u32) {
    if *retries < spin_limit {
        thread::yield_now();
    } else {
        let shift = (*retries - spin_limit).min(MAX_BACKOFF_SHIFT);
        thread::sleep(Duration::from_micros(1u64 << shift));
    }
    *retries += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn event(n: i64) -> LogEvent {
        LogEvent {
            timestamp: n,
            method: "GET".to_owned(),
            path: format!("/n/{n}"),
            status: 200,
            ..LogEvent::default()
        }
    }

    #[test]
    fn capacity_validation() {
        assert!(RingBuffer::with_capacity(0).is_err());
        assert!(RingBuffer::with_capacity(3).is_err());
        assert!(RingBuffer::with_capacity(100).is_err());
        assert_eq!(RingBuffer::with_capacity(8).unwrap().capacity(), 8);
    }

    #[test]
    fn drop_on_full_then_in_order_drain() {
        let rb = Arc::new(RingBuffer::with_capacity(2).unwrap());
        assert!(rb.try_write(event(1)));
        assert!(rb.try_write(event(2)));
        // Full: the third write is dropped, not blocked.
        assert!(!rb.try_write(event(3)));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let consumer = {
            let rb = Arc::clone(&rb);
            let seen = Arc::clone(&seen);
            thread::spawn(move || {
                rb.consume(|batch| seen.lock().unwrap().extend_from_slice(batch))
            })
        };

        while seen.lock().unwrap().len() < 2 {
            thread::yield_now();
        }
        rb.close();
        consumer.join().unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].timestamp, 1);
        assert_eq!(seen[1].timestamp, 2);
    }

    #[test]
    fn closed_rejects_writes() {
        let rb = RingBuffer::with_capacity(4).unwrap();
        rb.close();
        assert!(!rb.try_write(event(1)));
    }

    #[test]
    fn conservation_under_concurrent_producers() {
        let rb = Arc::new(RingBuffer::with_capacity(64).unwrap());
        let written = Arc::new(Mutex::new(0u64));

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let rb = Arc::clone(&rb);
                let written = Arc::clone(&written);
                thread::spawn(move || {
                    let mut mine = 0u64;
                    for i in 0..1000 {
                        if rb.try_write(event(p * 1000 + i)) {
                            mine += 1;
                        }
                    }
                    *written.lock().unwrap() += mine;
                })
            })
            .collect();

        let seen = Arc::new(Mutex::new(0u64));
        let consumer = {
            let rb = Arc::clone(&rb);
            let seen = Arc::clone(&seen);
            thread::spawn(move || rb.consume(|batch| *seen.lock().unwrap() += batch.len() as u64))
        };

        for p in producers {
            p.join().unwrap();
        }
        rb.close();
        consumer.join().unwrap();

        // Every accepted write is delivered exactly once.
        assert_eq!(*seen.lock().unwrap(), *written.lock().unwrap());
    }

    #[test]
    fn single_producer_order_preserved_across_wrap() {
        let rb = Arc::new(RingBuffer::with_capacity(8).unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let consumer = {
            let rb = Arc::clone(&rb);
            let seen = Arc::clone(&seen);
            thread::spawn(move || {
                rb.consume(|batch| {
                    seen.lock()
                        .unwrap()
                        .extend(batch.iter().map(|e| e.timestamp))
                })
            })
        };

        let mut accepted = Vec::new();
        for i in 0..100 {
            if rb.try_write(event(i)) {
                accepted.push(i);
            } else {
                thread::yield_now();
            }
        }
        rb.close();
        consumer.join().unwrap();

        assert_eq!(*seen.lock().unwrap(), accepted);
    }

    #[test]
    fn consumer_panic_reaches_handler() {
        let mut rb = RingBuffer::with_capacity(4).unwrap();
        let caught = Arc::new(Mutex::new(None::<String>));
        {
            let caught = Arc::clone(&caught);
            rb.set_panic_handler(move |payload| {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_owned())
                    .unwrap_or_default();
                *caught.lock().unwrap() = Some(msg);
            });
        }
        let rb = Arc::new(rb);
        assert!(rb.try_write(event(1)));
        rb.close();

        let consumer = {
            let rb = Arc::clone(&rb);
            thread::spawn(move || rb.consume(|_batch| panic!("sink exploded")))
        };
        consumer.join().unwrap();
        assert_eq!(caught.lock().unwrap().as_deref(), Some("sink exploded"));
    }

    #[test]
    fn consumer_panic_rethrown_without_handler() {
        let rb = Arc::new(RingBuffer::with_capacity(4).unwrap());
        assert!(rb.try_write(event(1)));
        rb.close();

        let consumer = {
            let rb = Arc::clone(&rb);
            thread::spawn(move || rb.consume(|_batch| panic!("sink exploded")))
        };
        assert!(consumer.join().is_err());
    }
}
