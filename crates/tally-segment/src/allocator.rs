use crate::error::StoreError;
use crate::segment::SegmentBuffer;
use crate::settings::SegmentSettings;
use crate::store::AllocationStore;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tally_core::{Clock, DispenseError, IdProvider, IdResult, SystemClock};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Spins this many times on an in-flight refill before conceding one sleep.
const SPIN_LIMIT: u32 = 10_000;
/// Single fallback sleep after the spin budget is spent.
const SPIN_FALLBACK_SLEEP: Duration = Duration::from_millis(10);
/// A refill is triggered once less than 10% of the current range remains.
const REFILL_TRIGGER_RATIO: f64 = 0.9;

/// Segment-based [`IdProvider`]: per-key double-buffered ranges backed by an
/// [`AllocationStore`].
///
/// `init` performs the first synchronous tag sync and starts the periodic
/// reconciliation task; `get` dispenses from the key's current segment and
/// prefetches the other one in the background before exhaustion.
pub struct SegmentAllocator<S, C = SystemClock> {
    inner: Arc<Inner<S, C>>,
    reconcile_task: Mutex<Option<JoinHandle<()>>>,
}

struct Inner<S, C> {
    store: S,
    clock: C,
    settings: SegmentSettings,
    /// key -> buffer. Reconciliation is the sole writer of membership;
    /// dispensing only reads.
    cache: DashMap<String, Arc<SegmentBuffer>>,
    /// Bounded refill pool with non-queuing handoff: no permit, no task.
    refill_permits: Arc<Semaphore>,
    init_ok: AtomicBool,
}

impl<S: AllocationStore> SegmentAllocator<S, SystemClock> {
    /// Creates an allocator over the given store, using the system clock.
    ///
    /// The allocator serves nothing until [`init`](IdProvider::init) has run.
    pub fn new(store: S, settings: SegmentSettings) -> Self {
        Self::with_clock(store, settings, SystemClock)
    }
}

impl<S: AllocationStore, C: Clock> SegmentAllocator<S, C> {
    fn with_clock(store: S, settings: SegmentSettings, clock: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                clock,
                settings,
                cache: DashMap::new(),
                refill_permits: Arc::new(Semaphore::new(settings.refill_workers)),
                init_ok: AtomicBool::new(false),
            }),
            reconcile_task: Mutex::new(None),
        }
    }

    /// Snapshot of the currently reconciled keys, for operator inspection.
    pub fn keys(&self) -> Vec<String> {
        self.inner.cache.iter().map(|e| e.key().clone()).collect()
    }
}

#[async_trait]
impl<S: AllocationStore, C: Clock> IdProvider for SegmentAllocator<S, C> {
    async fn init(&self) -> bool {
        // A failed first sync is logged, not fatal: the cache starts empty
        // and fills on the next successful reconciliation.
        if let Err(e) = self.inner.sync_from_store().await {
            warn!(error = %e, "initial tag sync failed");
        }
        self.inner.init_ok.store(true, Ordering::SeqCst);

        let mut slot = self.reconcile_task.lock().await;
        if slot.is_none() {
            let inner = Arc::clone(&self.inner);
            let period = inner.settings.reconcile_period;
            *slot = Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                // The first tick completes immediately; init already synced.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(e) = inner.sync_from_store().await {
                        warn!(error = %e, "tag reconciliation failed");
                    }
                }
            }));
        }
        true
    }

    async fn get(&self, key: &str) -> IdResult {
        if !self.inner.init_ok.load(Ordering::SeqCst) {
            return Err(DispenseError::NotReady);
        }
        let Some(buffer) = self.inner.cache.get(key).map(|e| Arc::clone(e.value())) else {
            return Err(DispenseError::UnknownKey(key.to_owned()));
        };
        if !buffer.initialized() {
            // Double-checked: exactly one request performs the initial
            // load, concurrent requests wait on the same mutex.
            let _guard = buffer.init_lock.lock().await;
            if !buffer.initialized() {
                let idx = buffer.current_index();
                match self.inner.refill(&buffer, idx).await {
                    Ok(()) => {
                        buffer.set_initialized(true);
                        info!(key, "initialized buffer from store");
                    }
                    // Swallowed; the dispense below reports exhaustion and
                    // a later call retries the load.
                    Err(e) => warn!(key, error = %e, "initial segment load failed"),
                }
            }
        }
        Inner::dispense(&self.inner, &buffer).await
    }
}

impl<S, C> Drop for SegmentAllocator<S, C> {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.reconcile_task.try_lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

impl<S: AllocationStore, C: Clock> Inner<S, C> {
    fn now_millis(&self) -> i64 {
        self.clock.now().as_millisecond()
    }

    /// Reconciles cache membership against the store's tag list. Inserts
    /// fresh zeroed buffers for new tags and drops buffers for vanished
    /// ones; never touches an existing buffer's segment state.
    async fn sync_from_store(&self) -> Result<(), StoreError> {
        let tags = self.store.list_tags().await?;
        if tags.is_empty() {
            return Ok(());
        }
        for tag in &tags {
            if !self.cache.contains_key(tag) {
                self.cache
                    .insert(tag.clone(), Arc::new(SegmentBuffer::new(tag.clone())));
                info!(key = %tag, "added tag from store");
            }
        }
        let live: HashSet<&str> = tags.iter().map(String::as_str).collect();
        let stale: Vec<String> = self
            .cache
            .iter()
            .filter(|e| !live.contains(e.key().as_str()))
            .map(|e| e.key().clone())
            .collect();
        for tag in stale {
            self.cache.remove(&tag);
            info!(key = %tag, "removed vanished tag");
        }
        Ok(())
    }

    async fn dispense(inner: &Arc<Self>, buffer: &Arc<SegmentBuffer>) -> IdResult {
        loop {
            {
                let _read = buffer.lock.read().await;
                let segment = buffer.current();
                if !buffer.next_ready()
                    && (segment.idle() as f64) < REFILL_TRIGGER_RATIO * segment.step() as f64
                    && buffer.begin_refill()
                {
                    Self::submit_refill(inner, Arc::clone(buffer));
                }
                let value = segment.fetch_next();
                if value < segment.max() {
                    return Ok(value);
                }
            }
            // Current segment exhausted. Give an in-flight refill a bounded
            // chance to land before forcing the switch decision.
            Self::wait_for_refill(buffer).await;
            {
                let _write = buffer.lock.write().await;
                // Another caller may have switched while we waited.
                let segment = buffer.current();
                let value = segment.fetch_next();
                if value < segment.max() {
                    return Ok(value);
                }
                if buffer.next_ready() {
                    buffer.switch();
                    buffer.set_next_ready(false);
                } else {
                    error!(key = buffer.key(), "both segments exhausted, refill fell behind");
                    return Err(DispenseError::SegmentsExhausted(buffer.key().to_owned()));
                }
            }
        }
    }

    /// Hands the buffer's claimed refill to the bounded pool. A saturated
    /// pool releases the claim instead of queueing; a later dispense call
    /// re-triggers.
    fn submit_refill(inner: &Arc<Self>, buffer: Arc<SegmentBuffer>) {
        let Ok(permit) = Arc::clone(&inner.refill_permits).try_acquire_owned() else {
            buffer.end_refill();
            return;
        };
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            let _permit = permit;
            let idx = buffer.next_index();
            match inner.refill(&buffer, idx).await {
                Ok(()) => {
                    let _write = buffer.lock.write().await;
                    buffer.set_next_ready(true);
                    buffer.end_refill();
                    info!(key = buffer.key(), segment = ?buffer.segments()[idx], "prefetched next segment");
                }
                Err(e) => {
                    // Failures never reach a dispensing caller; they only
                    // show up later as delayed availability.
                    warn!(key = buffer.key(), error = %e, "segment refill failed");
                    buffer.end_refill();
                }
            }
        });
    }

    async fn wait_for_refill(buffer: &SegmentBuffer) {
        let mut roll: u32 = 0;
        while buffer.refill_in_flight() {
            roll += 1;
            if roll > SPIN_LIMIT {
                tokio::time::sleep(SPIN_FALLBACK_SLEEP).await;
                break;
            }
            std::hint::spin_loop();
        }
    }

    /// Populates one segment of the buffer from the store, adapting the
    /// step to consumption velocity.
    ///
    /// The first load takes the store's configured step as both step and
    /// floor. The second load additionally stamps the refill timestamp.
    /// Every later load compares the inter-refill interval against the
    /// validity window: faster than one window doubles the step (capped),
    /// slower than two windows halves it (floored at the store's step).
    async fn refill(&self, buffer: &SegmentBuffer, idx: usize) -> Result<(), StoreError> {
        let key = buffer.key();
        let record = if !buffer.initialized() {
            let record = self.store.advance_and_fetch(key).await?;
            buffer.set_step(record.step);
            buffer.set_min_step(record.step);
            record
        } else if buffer.last_refill_at() == 0 {
            let record = self.store.advance_and_fetch(key).await?;
            buffer.set_last_refill_at(self.now_millis());
            buffer.set_step(record.step);
            buffer.set_min_step(record.step);
            record
        } else {
            let window_ms = self.settings.segment_validity.as_millis() as i64;
            let duration = self.now_millis() - buffer.last_refill_at();
            let mut next_step = buffer.step();
            if duration < window_ms {
                if next_step * 2 <= self.settings.max_step {
                    next_step *= 2;
                }
            } else if duration < window_ms * 2 {
                // consumption is on target, keep the step
            } else if next_step / 2 >= buffer.min_step() {
                next_step /= 2;
            }
            info!(
                key,
                step = buffer.step(),
                duration_ms = duration,
                next_step,
                "adapting refill step"
            );
            let record = self.store.advance_by_and_fetch(key, next_step).await?;
            buffer.set_last_refill_at(self.now_millis());
            buffer.set_step(next_step);
            buffer.set_min_step(record.step);
            record
        };
        let segment = &buffer.segments()[idx];
        segment.reset(record.max_id - buffer.step(), record.max_id, buffer.step());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryAllocationStore;
    use crate::store::AllocationRecord;
    use jiff::Timestamp;
    use std::sync::atomic::AtomicI64;

    #[derive(Clone)]
    struct MockClock {
        millis: Arc<AtomicI64>,
    }

    impl MockClock {
        fn new(millis: i64) -> Self {
            Self {
                millis: Arc::new(AtomicI64::new(millis)),
            }
        }

        fn advance(&self, millis: i64) {
            self.millis.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> Timestamp {
            Timestamp::from_millisecond(self.millis.load(Ordering::SeqCst))
                .expect("mock clock holds a valid timestamp")
        }

        fn sleep(&self, _duration: Duration) {}
    }

    /// Store whose advances always fail, so no segment ever loads.
    struct FailingStore;

    #[async_trait]
    impl AllocationStore for FailingStore {
        async fn list_tags(&self) -> Result<Vec<String>, StoreError> {
            Ok(vec!["doomed".to_owned()])
        }

        async fn list_records(&self) -> Result<Vec<AllocationRecord>, StoreError> {
            Ok(Vec::new())
        }

        async fn advance_and_fetch(&self, _tag: &str) -> Result<AllocationRecord, StoreError> {
            Err(StoreError::Unavailable("injected failure".to_owned()))
        }

        async fn advance_by_and_fetch(
            &self,
            _tag: &str,
            _step: i64,
        ) -> Result<AllocationRecord, StoreError> {
            Err(StoreError::Unavailable("injected failure".to_owned()))
        }
    }

    fn store_with(tag: &str, step: i64) -> MemoryAllocationStore {
        let store = MemoryAllocationStore::new();
        store.insert_tag(tag, step);
        store
    }

    #[tokio::test]
    async fn get_before_init_is_not_ready() {
        let allocator = SegmentAllocator::new(store_with("orders", 10), SegmentSettings::default());
        let err = allocator.get("orders").await.unwrap_err();
        assert_eq!(err, DispenseError::NotReady);
        assert_eq!(err.code(), -1);
    }

    #[tokio::test]
    async fn unknown_key_is_rejected() {
        let allocator = SegmentAllocator::new(store_with("orders", 10), SegmentSettings::default());
        assert!(allocator.init().await);
        let err = allocator.get("nope").await.unwrap_err();
        assert_eq!(err, DispenseError::UnknownKey("nope".to_owned()));
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let allocator = SegmentAllocator::new(store_with("orders", 10), SegmentSettings::default());
        assert!(allocator.init().await);
        assert!(allocator.init().await);
        assert!(allocator.get("orders").await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn sequential_ids_are_dense_and_increasing() {
        let allocator = SegmentAllocator::new(store_with("orders", 5), SegmentSettings::default());
        assert!(allocator.init().await);

        let mut ids = Vec::new();
        for _ in 0..25 {
            ids.push(allocator.get("orders").await.unwrap());
        }
        // Single caller: ids climb through the store-advanced ranges with
        // no duplicates and no reordering across segment switches.
        assert_eq!(ids, (0..25).collect::<Vec<i64>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_stress_dispenses_unique_monotonic_ids() {
        let allocator = Arc::new(SegmentAllocator::new(
            store_with("orders", 100),
            SegmentSettings::default(),
        ));
        assert!(allocator.init().await);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let allocator = Arc::clone(&allocator);
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::with_capacity(250);
                for _ in 0..250 {
                    ids.push(allocator.get("orders").await.unwrap());
                }
                ids
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            let ids = handle.await.unwrap();
            // Per-task completion order is strictly increasing.
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            for id in ids {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 2000);
    }

    #[tokio::test]
    async fn step_doubles_within_window_up_to_ceiling() {
        let clock = MockClock::new(1_000_000);
        let settings = SegmentSettings::builder().max_step(1600).build();
        let allocator =
            SegmentAllocator::with_clock(store_with("k", 100), settings, clock.clone());
        let inner = &allocator.inner;
        let buffer = Arc::new(SegmentBuffer::new("k"));

        // Initial load: step and floor come from the store.
        inner.refill(&buffer, 0).await.unwrap();
        buffer.set_initialized(true);
        assert_eq!(buffer.step(), 100);
        assert_eq!(buffer.min_step(), 100);

        // Second load stamps the timestamp, step unchanged.
        inner.refill(&buffer, 1).await.unwrap();
        assert_eq!(buffer.step(), 100);
        assert!(buffer.last_refill_at() > 0);

        // Refills landing inside the 15-minute window double the step...
        for expected in [200, 400, 800, 1600] {
            clock.advance(60_000);
            inner.refill(&buffer, 0).await.unwrap();
            assert_eq!(buffer.step(), expected);
        }
        // ...until the ceiling holds it.
        clock.advance(60_000);
        inner.refill(&buffer, 0).await.unwrap();
        assert_eq!(buffer.step(), 1600);

        // The populated segment covers exactly the adapted range.
        let segment = &buffer.segments()[0];
        assert_eq!(segment.step(), 1600);
        assert_eq!(segment.idle(), 1600);
    }

    #[tokio::test]
    async fn step_halves_after_two_idle_windows_down_to_floor() {
        let clock = MockClock::new(1_000_000);
        let settings = SegmentSettings::builder().max_step(1600).build();
        let allocator =
            SegmentAllocator::with_clock(store_with("k", 100), settings, clock.clone());
        let inner = &allocator.inner;
        let buffer = Arc::new(SegmentBuffer::new("k"));

        inner.refill(&buffer, 0).await.unwrap();
        buffer.set_initialized(true);
        inner.refill(&buffer, 1).await.unwrap();
        for _ in 0..4 {
            clock.advance(60_000);
            inner.refill(&buffer, 0).await.unwrap();
        }
        assert_eq!(buffer.step(), 1600);

        // A refill between one and two windows keeps the step.
        clock.advance(20 * 60_000);
        inner.refill(&buffer, 0).await.unwrap();
        assert_eq!(buffer.step(), 1600);

        // Slower than two windows halves it, but never below the store's
        // authoritative step.
        for expected in [800, 400, 200, 100, 100] {
            clock.advance(40 * 60_000);
            inner.refill(&buffer, 0).await.unwrap();
            assert_eq!(buffer.step(), expected);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn forced_refill_failures_surface_as_exhaustion() {
        let allocator = SegmentAllocator::new(FailingStore, SegmentSettings::default());
        assert!(allocator.init().await);

        let err = allocator.get("doomed").await.unwrap_err();
        assert_eq!(err, DispenseError::SegmentsExhausted("doomed".to_owned()));
        assert_eq!(err.code(), -3);
    }

    #[tokio::test]
    async fn saturated_refill_pool_defers_instead_of_queueing() {
        // Zero workers: the prefetch claim is always released unserved, so
        // the first segment is the only one that ever loads.
        let settings = SegmentSettings::builder().refill_workers(0).build();
        let allocator = SegmentAllocator::new(store_with("k", 3), settings);
        assert!(allocator.init().await);

        assert_eq!(allocator.get("k").await.unwrap(), 0);
        assert_eq!(allocator.get("k").await.unwrap(), 1);
        assert_eq!(allocator.get("k").await.unwrap(), 2);
        let err = allocator.get("k").await.unwrap_err();
        assert_eq!(err, DispenseError::SegmentsExhausted("k".to_owned()));
        // The single-flight gate was released, not leaked.
        let buffer = Arc::clone(allocator.inner.cache.get("k").unwrap().value());
        assert!(!buffer.refill_in_flight());
    }

    #[tokio::test]
    async fn reconciliation_tracks_store_membership() {
        let store = Arc::new(store_with("a", 10));
        let allocator =
            SegmentAllocator::new(Arc::clone(&store), SegmentSettings::default());
        assert!(allocator.init().await);
        assert!(allocator.get("a").await.is_ok());
        assert_eq!(allocator.keys(), vec!["a".to_owned()]);

        store.insert_tag("b", 10);
        allocator.inner.sync_from_store().await.unwrap();
        assert!(allocator.get("b").await.is_ok());

        store.remove_tag("a");
        allocator.inner.sync_from_store().await.unwrap();
        let err = allocator.get("a").await.unwrap_err();
        assert_eq!(err, DispenseError::UnknownKey("a".to_owned()));
    }

    #[tokio::test]
    async fn empty_tag_list_keeps_last_known_good_cache() {
        let store = Arc::new(store_with("a", 10));
        let allocator =
            SegmentAllocator::new(Arc::clone(&store), SegmentSettings::default());
        assert!(allocator.init().await);
        assert!(allocator.get("a").await.is_ok());

        // An empty listing is treated as "nothing to reconcile", not as
        // "remove everything".
        store.remove_tag("a");
        allocator.inner.sync_from_store().await.unwrap();
        assert!(allocator.get("a").await.is_ok());
    }
}
