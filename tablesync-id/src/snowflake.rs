//! Snowflake id layout
//!
//! ```text
//!  63 62                                     22 21      17 16      12 11          0
//! ┌──┬─────────────────────────────────────────┬──────────┬──────────┬─────────────┐
//! │0 │ timestamp (41 bits, ms since the epoch) │ dc (5)   │ mach (5) │ seq (12)    │
//! └──┴─────────────────────────────────────────┴──────────┴──────────┴─────────────┘
//! ```
//!
//! Ordering the raw integer orders by timestamp, then datacenter and machine
//! (together the node id), then sequence. That is the total order used for
//! last-writer-wins.

use crate::{IdError, IdResult};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub const SEQUENCE_BITS: u32 = 12;
pub const MACHINE_BITS: u32 = 5;
pub const DATACENTER_BITS: u32 = 5;
pub const TIMESTAMP_BITS: u32 = 41;

pub const MACHINE_SHIFT: u32 = SEQUENCE_BITS;
pub const DATACENTER_SHIFT: u32 = SEQUENCE_BITS + MACHINE_BITS;
pub const TIMESTAMP_SHIFT: u32 = SEQUENCE_BITS + MACHINE_BITS + DATACENTER_BITS;

pub const MAX_SEQUENCE: u16 = (1 << SEQUENCE_BITS) - 1;
pub const MAX_MACHINE_ID: u8 = (1 << MACHINE_BITS) - 1;
pub const MAX_DATACENTER_ID: u8 = (1 << DATACENTER_BITS) - 1;
pub const MAX_TIMESTAMP: i64 = (1 << TIMESTAMP_BITS) - 1;

/// A 64-bit time-ordered identifier.
///
/// Serialized as a decimal string since many client runtimes lose precision
/// above 2^53; deserializes from either a string or an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnowflakeId(u64);

impl SnowflakeId {
    /// Pack the components. Each component is masked to its width.
    pub fn compose(timestamp_offset: i64, datacenter_id: u8, machine_id: u8, sequence: u16) -> Self {
        let ts = (timestamp_offset as u64) & (MAX_TIMESTAMP as u64);
        let dc = u64::from(datacenter_id & MAX_DATACENTER_ID);
        let machine = u64::from(machine_id & MAX_MACHINE_ID);
        let seq = u64::from(sequence & MAX_SEQUENCE);

        Self(ts << TIMESTAMP_SHIFT | dc << DATACENTER_SHIFT | machine << MACHINE_SHIFT | seq)
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Milliseconds since the generator's epoch.
    pub fn timestamp_offset(&self) -> i64 {
        ((self.0 >> TIMESTAMP_SHIFT) & MAX_TIMESTAMP as u64) as i64
    }

    pub fn datacenter_id(&self) -> u8 {
        ((self.0 >> DATACENTER_SHIFT) & u64::from(MAX_DATACENTER_ID)) as u8
    }

    pub fn machine_id(&self) -> u8 {
        ((self.0 >> MACHINE_SHIFT) & u64::from(MAX_MACHINE_ID)) as u8
    }

    /// The 10-bit node id (`datacenter << 5 | machine`).
    pub fn node_id(&self) -> u16 {
        (u16::from(self.datacenter_id()) << MACHINE_BITS) | u16::from(self.machine_id())
    }

    pub fn sequence(&self) -> u16 {
        (self.0 & u64::from(MAX_SEQUENCE)) as u16
    }

    /// Whether the unused sign bit is clear.
    pub fn sign_bit_clear(&self) -> bool {
        self.0 >> 63 == 0
    }
}

impl fmt::Display for SnowflakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SnowflakeId {
    type Err = IdError;

    fn from_str(s: &str) -> IdResult<Self> {
        s.trim()
            .parse::<u64>()
            .map(SnowflakeId)
            .map_err(|e| IdError::InvalidId(format!("{:?}: {}", s, e)))
    }
}

impl From<SnowflakeId> for u64 {
    fn from(id: SnowflakeId) -> Self {
        id.0
    }
}

impl Serialize for SnowflakeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SnowflakeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdVisitor;

        impl Visitor<'_> for IdVisitor {
            type Value = SnowflakeId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a snowflake id as a decimal string or unsigned integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<SnowflakeId, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<SnowflakeId, E> {
                Ok(SnowflakeId(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<SnowflakeId, E> {
                u64::try_from(v)
                    .map(SnowflakeId)
                    .map_err(|_| E::custom("snowflake id cannot be negative"))
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}

/// The decoded components of an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedId {
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    pub datacenter_id: u8,
    pub machine_id: u8,
    pub sequence: u16,
}

impl ParsedId {
    pub fn node_id(&self) -> u16 {
        (u16::from(self.datacenter_id) << MACHINE_BITS) | u16::from(self.machine_id)
    }
}

/// Inverse of the bit packing, given the epoch the id was generated against.
pub fn parse_id(id: SnowflakeId, epoch_ms: i64) -> ParsedId {
    ParsedId {
        timestamp_ms: epoch_ms + id.timestamp_offset(),
        datacenter_id: id.datacenter_id(),
        machine_id: id.machine_id(),
        sequence: id.sequence(),
    }
}

/// Sign bit clear and timestamp within `epoch ..= now + tolerance`.
pub fn is_valid_id(id: SnowflakeId, epoch_ms: i64, now_ms: i64, tolerance_ms: i64) -> bool {
    if !id.sign_bit_clear() {
        return false;
    }
    let timestamp = parse_id(id, epoch_ms).timestamp_ms;
    timestamp >= epoch_ms && timestamp <= now_ms.saturating_add(tolerance_ms)
}
