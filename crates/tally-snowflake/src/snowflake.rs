use crate::error::Error;
use crate::snowflake_id::SnowflakeId;
use crate::worker::{NodeIdentity, WorkerIdProvider};
use async_trait::async_trait;
use jiff::Timestamp;
use rand::Rng;
use std::sync::Mutex;
use std::time::Duration;
use tally_core::{Clock, DispenseError, IdProvider, IdResult, SystemClock};
use tracing::{info, warn};
use typed_builder::TypedBuilder;

const WORKER_ID_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_WORKER_ID: u16 = (1 << WORKER_ID_BITS) - 1;
const SEQUENCE_MASK: u16 = (1 << SEQUENCE_BITS) - 1;
/// The timestamp field is 41 bits of milliseconds past the epoch.
const MAX_TIMESTAMP_MS: i64 = (1 << 41) - 1;
/// Regressions up to this many ms are waited out; anything larger is an
/// operational alarm and fails the call immediately.
const MAX_BACKWARD_DRIFT_MS: i64 = 5;
/// Fresh milliseconds start the sequence at a random value below this
/// instead of zero, spreading early sequences across restarts that share a
/// worker id window.
const SEQUENCE_RESEED_BOUND: u16 = 100;

/// Twitter's classic snowflake epoch: 2010-11-04T01:42:54.657Z.
pub const DEFAULT_EPOCH_MS: i64 = 1_288_834_974_657;

/// Configures a snowflake allocator instance.
#[derive(Debug, Clone, TypedBuilder)]
pub struct SnowflakeSettings {
    /// Network identity reported to the coordination service when the
    /// worker id is requested.
    #[builder]
    pub identity: NodeIdentity,
    /// Custom epoch used as the zero point of the 41-bit timestamp field.
    /// Must lie strictly in the past at construction time.
    #[builder(default = Timestamp::from_millisecond(DEFAULT_EPOCH_MS)
        .expect("default epoch is a valid timestamp"))]
    pub start_epoch: Timestamp,
}

#[derive(Debug)]
struct CursorState {
    last_timestamp: i64,
    sequence: u16,
}

/// Snowflake ID allocator.
///
/// All callers on one instance serialize on the `(last_timestamp, sequence)`
/// cursor; no I/O happens after construction, so the critical section is a
/// clock read and a few arithmetic operations.
#[derive(Debug)]
pub struct Snowflake<C: Clock> {
    epoch_ms: i64,
    worker_id: u16,
    clock: C,
    state: Mutex<CursorState>,
}

impl Snowflake<SystemClock> {
    /// Builds an allocator on the real system clock, obtaining its worker
    /// id from the coordination service. Fails fast on an out-of-range
    /// worker id, a future epoch, or a coordination failure.
    pub async fn connect<W: WorkerIdProvider>(
        settings: SnowflakeSettings,
        provider: &W,
    ) -> Result<Self, Error> {
        Self::with_clock(settings, provider, SystemClock).await
    }
}

impl<C: Clock> Snowflake<C> {
    async fn with_clock<W: WorkerIdProvider>(
        settings: SnowflakeSettings,
        provider: &W,
        clock: C,
    ) -> Result<Self, Error> {
        let worker_id = provider.assign(&settings.identity).await?;
        info!(
            worker_id,
            host = %settings.identity.host,
            port = settings.identity.port,
            "worker id assigned"
        );
        Self::from_assigned(settings.start_epoch, worker_id, clock)
    }

    fn from_assigned(start_epoch: Timestamp, worker_id: u16, clock: C) -> Result<Self, Error> {
        if worker_id > MAX_WORKER_ID {
            return Err(Error::InvalidWorkerId {
                worker_id,
                max_worker_id: MAX_WORKER_ID,
            });
        }
        let now = clock.now();
        if start_epoch >= now {
            return Err(Error::EpochAhead {
                epoch: start_epoch,
                now,
            });
        }
        Ok(Self {
            epoch_ms: start_epoch.as_millisecond(),
            worker_id,
            clock,
            state: Mutex::new(CursorState {
                last_timestamp: -1,
                sequence: 0,
            }),
        })
    }

    pub fn worker_id(&self) -> u16 {
        self.worker_id
    }

    /// Generates the next id.
    ///
    /// Within one instance the packed values are strictly increasing: the
    /// timestamp grows, or stays equal while the sequence grows, and a
    /// sequence wrap forces the timestamp forward before anything is
    /// handed out.
    pub fn next_id(&self) -> Result<SnowflakeId, DispenseError> {
        let mut state = self.state.lock().map_err(|_| DispenseError::StatePoisoned)?;

        let mut now = self.clock.now().as_millisecond();
        if now < state.last_timestamp {
            let offset = state.last_timestamp - now;
            if offset > MAX_BACKWARD_DRIFT_MS {
                warn!(offset_ms = offset, "clock moved backwards beyond tolerance");
                return Err(DispenseError::ClockMovedBackwards { offset_ms: offset });
            }
            // Small regression: wait out double the offset, then re-check.
            self.clock.sleep(Duration::from_millis((offset * 2) as u64));
            now = self.clock.now().as_millisecond();
            if now < state.last_timestamp {
                return Err(DispenseError::ClockWaitFailed { offset_ms: offset });
            }
        }

        if now == state.last_timestamp {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                // This millisecond is spent; reseed and hold for the next.
                state.sequence = rand::rng().random_range(0..SEQUENCE_RESEED_BOUND);
                now = self.til_next_millis(state.last_timestamp);
            }
        } else {
            state.sequence = rand::rng().random_range(0..SEQUENCE_RESEED_BOUND);
        }

        state.last_timestamp = now;

        let elapsed = now - self.epoch_ms;
        if elapsed > MAX_TIMESTAMP_MS {
            return Err(DispenseError::OverTimeLimit);
        }

        Ok(SnowflakeId::new()
            .with_timestamp(elapsed as u64)
            .with_worker_id(self.worker_id)
            .with_sequence(state.sequence))
    }

    fn til_next_millis(&self, last: i64) -> i64 {
        let mut now = self.clock.now().as_millisecond();
        while now <= last {
            self.clock.sleep(Duration::from_micros(100));
            now = self.clock.now().as_millisecond();
        }
        now
    }
}

#[async_trait]
impl<C: Clock> IdProvider for Snowflake<C> {
    async fn init(&self) -> bool {
        // Construction already validated everything; nothing to bootstrap.
        true
    }

    async fn get(&self, _key: &str) -> IdResult {
        self.next_id().map(SnowflakeId::as_i64)
    }
}
