//! Snowflake id generator
//!
//! One generator per node id. `(last_timestamp_ms, sequence)` is the only
//! hard lock in the system; it is held for constant work plus, at most, a
//! bounded spin into the next millisecond.

use crate::clock::{Clock, SystemClock};
use crate::node::split_node_id;
use crate::snowflake::{self, MAX_SEQUENCE, MAX_TIMESTAMP, ParsedId, SnowflakeId};
use crate::{IdError, IdResult, NodeConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tablesync_config::{DEFAULT_EPOCH_MS, IdSettings};
use tablesync_log::{debug, warn};

/// Generator settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Unix milliseconds that map to timestamp zero
    pub epoch_ms: i64,
    /// Backward drift that is waited out instead of failing
    pub clock_tolerance_ms: i64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            epoch_ms: DEFAULT_EPOCH_MS,
            clock_tolerance_ms: 5,
        }
    }
}

impl From<&IdSettings> for GeneratorConfig {
    fn from(settings: &IdSettings) -> Self {
        Self {
            epoch_ms: settings.epoch_ms,
            clock_tolerance_ms: i64::try_from(settings.clock_tolerance_ms).unwrap_or(i64::MAX),
        }
    }
}

#[derive(Debug)]
struct State {
    last_timestamp_ms: i64,
    sequence: u16,
    retired: bool,
}

/// Thread-safe Snowflake generator bound to one node.
///
/// # Example
///
/// ```rust
/// use tablesync_id::{GeneratorConfig, IdGenerator};
///
/// let generator = IdGenerator::new(5, GeneratorConfig::default()).unwrap();
/// let a = generator.next_id().unwrap();
/// let b = generator.next_id().unwrap();
/// assert!(a < b);
/// assert_eq!(generator.parse_id(a).machine_id, 5);
/// ```
#[derive(Debug)]
pub struct IdGenerator {
    node_id: u16,
    datacenter_id: u8,
    machine_id: u8,
    config: GeneratorConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
    last_issued_ms: AtomicI64,
}

impl IdGenerator {
    /// Generator on the system clock that has never issued an id.
    pub fn new(node_id: u16, config: GeneratorConfig) -> IdResult<Self> {
        Self::with_clock(node_id, config, Arc::new(SystemClock))
    }

    pub fn with_clock(node_id: u16, config: GeneratorConfig, clock: Arc<dyn Clock>) -> IdResult<Self> {
        let (datacenter_id, machine_id) = split_node_id(node_id)?;

        Ok(Self {
            node_id,
            datacenter_id,
            machine_id,
            config,
            clock,
            state: Mutex::new(State {
                last_timestamp_ms: i64::MIN,
                sequence: 0,
                retired: false,
            }),
            last_issued_ms: AtomicI64::new(i64::MIN),
        })
    }

    /// Generator for a claimed node, primed with the node's persisted
    /// `last_timestamp_ms`.
    pub fn for_node(node: &NodeConfig, config: GeneratorConfig, clock: Arc<dyn Clock>) -> IdResult<Self> {
        let generator = Self::with_clock(node.node_id, config, clock)?;
        generator.resume_from(node.last_timestamp_ms);
        Ok(generator)
    }

    /// Treat `last_timestamp_ms` as already used with its sequence exhausted,
    /// so the next id lands in a strictly later millisecond. A clock that
    /// reads earlier than this (beyond tolerance) fails with
    /// `ClockMovedBackwards` rather than reissuing ids.
    pub fn resume_from(&self, last_timestamp_ms: i64) {
        let mut state = self.state.lock();
        if last_timestamp_ms > state.last_timestamp_ms {
            state.last_timestamp_ms = last_timestamp_ms;
            state.sequence = MAX_SEQUENCE;
            self.last_issued_ms.store(last_timestamp_ms, Ordering::Release);
        }
    }

    pub fn node_id(&self) -> u16 {
        self.node_id
    }

    pub fn datacenter_id(&self) -> u8 {
        self.datacenter_id
    }

    pub fn machine_id(&self) -> u8 {
        self.machine_id
    }

    pub fn config(&self) -> GeneratorConfig {
        self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Latest millisecond used for an id, readable without the lock.
    /// `None` before the first id (and without a resume point).
    pub fn last_timestamp_ms(&self) -> Option<i64> {
        match self.last_issued_ms.load(Ordering::Acquire) {
            i64::MIN => None,
            ts => Some(ts),
        }
    }

    /// Stop issuing ids and return the last millisecond used.
    ///
    /// Waits for an in-flight [`next_id`](Self::next_id), so the returned
    /// timestamp covers every id this generator will ever issue.
    pub fn retire(&self) -> Option<i64> {
        let mut state = self.state.lock();
        state.retired = true;
        match state.last_timestamp_ms {
            i64::MIN => None,
            ts => Some(ts),
        }
    }

    pub fn is_retired(&self) -> bool {
        self.state.lock().retired
    }

    /// Produce the next id.
    pub fn next_id(&self) -> IdResult<SnowflakeId> {
        let mut state = self.state.lock();
        if state.retired {
            return Err(IdError::Retired {
                node_id: self.node_id,
            });
        }
        let mut now = self.clock.now_ms();

        if now < state.last_timestamp_ms {
            let drift = state.last_timestamp_ms - now;
            if drift > self.config.clock_tolerance_ms {
                warn!(
                    "node {}: clock moved backwards by {}ms (tolerance {}ms)",
                    self.node_id, drift, self.config.clock_tolerance_ms
                );
                return Err(IdError::ClockMovedBackwards {
                    drift_ms: drift as u64,
                });
            }
            debug!("node {}: waiting out {}ms of clock drift", self.node_id, drift);
            now = self.wait_until(|t| t >= state.last_timestamp_ms);
        }

        let sequence = if now == state.last_timestamp_ms {
            let next = (state.sequence + 1) & MAX_SEQUENCE;
            if next == 0 {
                // Sequence exhausted for this millisecond
                let exhausted = state.last_timestamp_ms;
                now = self.wait_until(|t| t > exhausted);
            }
            next
        } else {
            0
        };

        let offset = now - self.config.epoch_ms;
        if !(0..=MAX_TIMESTAMP).contains(&offset) {
            return Err(IdError::TimestampOutOfRange { timestamp_ms: now });
        }

        state.last_timestamp_ms = now;
        state.sequence = sequence;
        self.last_issued_ms.store(now, Ordering::Release);

        Ok(SnowflakeId::compose(
            offset,
            self.datacenter_id,
            self.machine_id,
            sequence,
        ))
    }

    /// Decode an id against this generator's epoch.
    pub fn parse_id(&self, id: SnowflakeId) -> ParsedId {
        snowflake::parse_id(id, self.config.epoch_ms)
    }

    /// Sign bit clear and timestamp between the epoch and now plus the
    /// clock tolerance.
    pub fn is_valid_id(&self, id: SnowflakeId) -> bool {
        snowflake::is_valid_id(
            id,
            self.config.epoch_ms,
            self.clock.now_ms(),
            self.config.clock_tolerance_ms,
        )
    }

    fn wait_until(&self, ready: impl Fn(i64) -> bool) -> i64 {
        loop {
            let now = self.clock.now_ms();
            if ready(now) {
                return now;
            }
            std::hint::spin_loop();
            std::thread::yield_now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::collections::HashSet;
    use std::thread;
    use std::time::Duration;

    const EPOCH: i64 = DEFAULT_EPOCH_MS;

    fn manual(start_offset: i64) -> Arc<ManualClock> {
        Arc::new(ManualClock::new(EPOCH + start_offset))
    }

    fn generator(node_id: u16, clock: Arc<ManualClock>) -> IdGenerator {
        IdGenerator::with_clock(node_id, GeneratorConfig::default(), clock).unwrap()
    }

    #[test]
    fn test_same_millisecond_sequences() {
        let clock = manual(1_000);
        let generator = generator(0, clock);

        let ids: Vec<SnowflakeId> = (0..5).map(|_| generator.next_id().unwrap()).collect();

        let sequences: Vec<u16> = ids.iter().map(|id| id.sequence()).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
        for id in &ids {
            assert_eq!(id.timestamp_offset(), 1_000);
            assert_eq!(id.datacenter_id(), 0);
            assert_eq!(id.machine_id(), 0);
        }
    }

    #[test]
    fn test_new_millisecond_resets_sequence() {
        let clock = manual(10);
        let generator = generator(7, clock.clone());

        generator.next_id().unwrap();
        generator.next_id().unwrap();
        clock.advance(1);
        let id = generator.next_id().unwrap();

        assert_eq!(id.sequence(), 0);
        assert_eq!(id.timestamp_offset(), 11);
        assert_eq!(generator.last_timestamp_ms(), Some(EPOCH + 11));
    }

    #[test]
    fn test_rollback_beyond_tolerance_fails() {
        let clock = manual(500);
        let generator = generator(1, clock.clone());
        let issued = generator.next_id().unwrap();

        clock.rewind(50);
        match generator.next_id() {
            Err(IdError::ClockMovedBackwards { drift_ms }) => assert_eq!(drift_ms, 50),
            other => panic!("expected ClockMovedBackwards, got {:?}", other),
        }

        clock.advance(50);
        let next = generator.next_id().unwrap();
        assert!(next > issued);
    }

    #[test]
    fn test_rollback_within_tolerance_waits() {
        let clock = manual(500);
        let generator = Arc::new(generator(1, clock.clone()));
        let first = generator.next_id().unwrap();

        clock.rewind(3);
        let restorer = {
            let clock = clock.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                clock.advance(3);
            })
        };

        let second = generator.next_id().unwrap();
        restorer.join().unwrap();

        assert!(second > first);
        assert_eq!(second.timestamp_offset(), 500);
        assert_eq!(second.sequence(), 1);
    }

    #[test]
    fn test_sequence_exhaustion_rolls_to_next_millisecond() {
        let clock = manual(42);
        let generator = generator(2, clock.clone());

        let mut last = None;
        for _ in 0..=MAX_SEQUENCE {
            last = Some(generator.next_id().unwrap());
        }
        assert_eq!(last.map(|id| id.sequence()), Some(MAX_SEQUENCE));

        let ticker = {
            let clock = clock.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                clock.advance(1);
            })
        };
        let overflow = generator.next_id().unwrap();
        ticker.join().unwrap();

        assert_eq!(overflow.timestamp_offset(), 43);
        assert_eq!(overflow.sequence(), 0);
        assert!(Some(overflow) > last);
    }

    #[test]
    fn test_resume_never_reissues_last_millisecond() {
        let clock = manual(900);
        let node = NodeConfig::new(4, "worker", EPOCH + 900).unwrap();
        let generator = IdGenerator::for_node(&node, GeneratorConfig::default(), clock.clone()).unwrap();

        let ticker = {
            let clock = clock.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                clock.advance(1);
            })
        };
        let id = generator.next_id().unwrap();
        ticker.join().unwrap();

        assert_eq!(id.timestamp_offset(), 901);
        assert_eq!(id.sequence(), 0);
    }

    #[test]
    fn test_resume_after_rollback_across_restart_fails() {
        let clock = manual(100);
        let node = NodeConfig::new(4, "worker", EPOCH + 1_000).unwrap();
        let generator = IdGenerator::for_node(&node, GeneratorConfig::default(), clock).unwrap();

        assert!(matches!(
            generator.next_id(),
            Err(IdError::ClockMovedBackwards { drift_ms: 900 })
        ));
    }

    #[test]
    fn test_retire_stops_issuance() {
        let clock = manual(300);
        let generator = generator(6, clock);
        assert_eq!(generator.retire(), None);
        assert!(matches!(generator.next_id(), Err(IdError::Retired { node_id: 6 })));
    }

    #[test]
    fn test_retire_covers_in_flight_ids() {
        let generator = Arc::new(IdGenerator::new(3, GeneratorConfig::default()).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = generator.clone();
                thread::spawn(move || {
                    let mut latest = i64::MIN;
                    loop {
                        match generator.next_id() {
                            Ok(id) => latest = latest.max(generator.parse_id(id).timestamp_ms),
                            Err(IdError::Retired { .. }) => return latest,
                            Err(err) => panic!("unexpected error {:?}", err),
                        }
                    }
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(5));
        let retired_at = generator.retire().unwrap_or(i64::MIN);
        for handle in handles {
            assert!(handle.join().unwrap() <= retired_at);
        }
        assert!(generator.is_retired());
    }

    #[test]
    fn test_timestamp_before_epoch_rejected() {
        let clock = manual(-10);
        let generator = generator(0, clock);
        assert!(matches!(
            generator.next_id(),
            Err(IdError::TimestampOutOfRange { .. })
        ));
    }

    #[test]
    fn test_concurrent_ids_are_unique() {
        let generator = Arc::new(IdGenerator::new(9, GeneratorConfig::default()).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let generator = generator.clone();
                thread::spawn(move || {
                    (0..2_000)
                        .map(|_| generator.next_id().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {}", id);
            }
        }
        assert_eq!(seen.len(), 16_000);
    }

    #[test]
    fn test_sequential_ids_are_monotonic() {
        let generator = IdGenerator::new(3, GeneratorConfig::default()).unwrap();
        let mut previous = generator.next_id().unwrap();
        for _ in 0..10_000 {
            let id = generator.next_id().unwrap();
            assert!(id > previous);
            previous = id;
        }
    }

    #[test]
    fn test_parse_and_validate() {
        let clock = manual(77);
        let generator = generator(65, clock);
        let id = generator.next_id().unwrap();

        let parsed = generator.parse_id(id);
        assert_eq!(parsed.timestamp_ms, EPOCH + 77);
        assert_eq!(parsed.node_id(), 65);
        assert!(generator.is_valid_id(id));
        assert!(!generator.is_valid_id(SnowflakeId::compose(10_000, 0, 0, 0)));
    }

    #[test]
    fn test_invalid_node_id() {
        assert!(IdGenerator::new(1024, GeneratorConfig::default()).is_err());
    }
}
