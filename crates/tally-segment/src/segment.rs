use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock};

/// One contiguous, exclusively-owned id range `[cursor, max)`.
///
/// The cursor only ever moves forward; a value is valid to dispense iff the
/// pre-increment cursor was below `max`. A segment starts zeroed and is
/// populated by a refill, which always derives `max` from the store's
/// atomically advanced counter, so a repopulated segment never overlaps a
/// previous one.
#[derive(Default)]
pub struct Segment {
    cursor: AtomicI64,
    max: AtomicI64,
    step: AtomicI64,
}

impl Segment {
    /// Atomically claims the next value. The claim is only valid if the
    /// returned value is below [`max`](Segment::max).
    pub fn fetch_next(&self) -> i64 {
        self.cursor.fetch_add(1, Ordering::SeqCst)
    }

    pub fn max(&self) -> i64 {
        self.max.load(Ordering::SeqCst)
    }

    pub fn step(&self) -> i64 {
        self.step.load(Ordering::SeqCst)
    }

    /// Values left in the range, saturating at zero once overshot.
    pub fn idle(&self) -> i64 {
        (self.max() - self.cursor.load(Ordering::SeqCst)).max(0)
    }

    /// Points the segment at a freshly allocated range.
    ///
    /// The cursor must be written before `max`: a concurrent fast-path
    /// reader that still sees the old (already exhausted) `max` will simply
    /// fail its bound check and retry, while the reverse order could expose
    /// a live `max` with a stale cursor.
    pub fn reset(&self, cursor: i64, max: i64, step: i64) {
        self.cursor.store(cursor, Ordering::SeqCst);
        self.max.store(max, Ordering::SeqCst);
        self.step.store(step, Ordering::SeqCst);
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("cursor", &self.cursor.load(Ordering::SeqCst))
            .field("max", &self.max())
            .field("step", &self.step())
            .finish()
    }
}

/// Double buffer of segments for one business key.
///
/// The two segments alternate: one is dispensed from while the other is
/// refilled in the background. `refill_in_flight` is a CAS-guarded
/// single-flight gate — at most one refill task runs per buffer at a time.
/// `lock` is the reader/writer exclusion region over the dispensing
/// protocol (`current_idx`/`next_ready` transitions); the segment fields
/// themselves are atomics read under it.
pub struct SegmentBuffer {
    key: String,
    segments: [Segment; 2],
    current_idx: AtomicUsize,
    next_ready: AtomicBool,
    initialized: AtomicBool,
    refill_in_flight: AtomicBool,
    step: AtomicI64,
    min_step: AtomicI64,
    /// Unix millis of the last refill that went through step adaptation;
    /// zero means no refill has been stamped yet.
    last_refill_at: AtomicI64,
    pub(crate) lock: RwLock<()>,
    /// Serializes the lazy first load; pairs with `initialized` for the
    /// double-checked pattern.
    pub(crate) init_lock: Mutex<()>,
}

impl SegmentBuffer {
    /// Creates a fresh, zeroed buffer for a tag. Its first `get` performs
    /// the initial load.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            segments: [Segment::default(), Segment::default()],
            current_idx: AtomicUsize::new(0),
            next_ready: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            refill_in_flight: AtomicBool::new(false),
            step: AtomicI64::new(0),
            min_step: AtomicI64::new(0),
            last_refill_at: AtomicI64::new(0),
            lock: RwLock::new(()),
            init_lock: Mutex::new(()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn segments(&self) -> &[Segment; 2] {
        &self.segments
    }

    pub fn current(&self) -> &Segment {
        &self.segments[self.current_index()]
    }

    pub fn current_index(&self) -> usize {
        self.current_idx.load(Ordering::SeqCst)
    }

    pub fn next_index(&self) -> usize {
        (self.current_index() + 1) % 2
    }

    /// Flips the buffer onto the other segment.
    pub fn switch(&self) {
        self.current_idx.store(self.next_index(), Ordering::SeqCst);
    }

    pub fn next_ready(&self) -> bool {
        self.next_ready.load(Ordering::SeqCst)
    }

    pub fn set_next_ready(&self, ready: bool) {
        self.next_ready.store(ready, Ordering::SeqCst);
    }

    pub fn initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn set_initialized(&self, initialized: bool) {
        self.initialized.store(initialized, Ordering::SeqCst);
    }

    /// Claims the single-flight refill slot. Returns `true` for exactly one
    /// caller until [`end_refill`](SegmentBuffer::end_refill) releases it.
    pub fn begin_refill(&self) -> bool {
        self.refill_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn refill_in_flight(&self) -> bool {
        self.refill_in_flight.load(Ordering::SeqCst)
    }

    pub fn end_refill(&self) {
        self.refill_in_flight.store(false, Ordering::SeqCst);
    }

    pub fn step(&self) -> i64 {
        self.step.load(Ordering::SeqCst)
    }

    pub fn set_step(&self, step: i64) {
        self.step.store(step, Ordering::SeqCst);
    }

    pub fn min_step(&self) -> i64 {
        self.min_step.load(Ordering::SeqCst)
    }

    pub fn set_min_step(&self, min_step: i64) {
        self.min_step.store(min_step, Ordering::SeqCst);
    }

    pub fn last_refill_at(&self) -> i64 {
        self.last_refill_at.load(Ordering::SeqCst)
    }

    pub fn set_last_refill_at(&self, millis: i64) {
        self.last_refill_at.store(millis, Ordering::SeqCst);
    }
}

impl fmt::Debug for SegmentBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentBuffer")
            .field("key", &self.key)
            .field("segments", &self.segments)
            .field("current_idx", &self.current_index())
            .field("next_ready", &self.next_ready())
            .field("initialized", &self.initialized())
            .field("refill_in_flight", &self.refill_in_flight())
            .field("step", &self.step())
            .field("min_step", &self.min_step())
            .field("last_refill_at", &self.last_refill_at())
            .finish()
    }
}
