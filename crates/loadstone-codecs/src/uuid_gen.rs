//! Time-based (version 1) UUID generation strategies.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Ticks of 100ns between the Gregorian reform epoch (1582-10-15) and the
/// Unix epoch.
const GREGORIAN_TO_UNIX_TICKS: u64 = 0x01B2_1DD2_1381_4000;

/// How the clock-sequence and node fields of a generated time-UUID are
/// chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUuidGenerator {
    /// Random clock sequence and node per generated UUID.
    Random,
    /// A fixed clock sequence and node, stable for the process.
    Fixed,
    /// The smallest UUID for the timestamp (range-query lower bound).
    Min,
    /// The largest UUID for the timestamp (range-query upper bound).
    Max,
}

impl TimeUuidGenerator {
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.to_ascii_uppercase().as_str() {
            "RANDOM" => Ok(TimeUuidGenerator::Random),
            "FIXED" => Ok(TimeUuidGenerator::Fixed),
            "MIN" => Ok(TimeUuidGenerator::Min),
            "MAX" => Ok(TimeUuidGenerator::Max),
            other => Err(format!("unknown time-UUID generator: {other}")),
        }
    }

    /// Builds a version-1 UUID carrying `timestamp`.
    pub fn generate(&self, timestamp: DateTime<Utc>) -> Uuid {
        let ticks = unix_to_gregorian_ticks(timestamp);
        match self {
            TimeUuidGenerator::Random => {
                let random = Uuid::new_v4();
                let bytes = random.as_bytes();
                let clock_seq = u16::from_be_bytes([bytes[8], bytes[9]]) & 0x3FFF;
                let node: [u8; 6] = bytes[10..16].try_into().expect("6 node bytes");
                compose_v1(ticks, clock_seq, node)
            }
            TimeUuidGenerator::Fixed => compose_v1(ticks, 0x1234, FIXED_NODE),
            TimeUuidGenerator::Min => compose_v1(ticks, 0x0000, [0x80, 0, 0, 0, 0, 0]),
            TimeUuidGenerator::Max => {
                compose_v1(ticks, 0x3FFF, [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF])
            }
        }
    }
}

/// Node used by the FIXED strategy; multicast bit set so it can never
/// collide with a real MAC address.
const FIXED_NODE: [u8; 6] = [0x81, 0x0A, 0xD5, 0x70, 0x0E, 0x5A];

fn unix_to_gregorian_ticks(timestamp: DateTime<Utc>) -> u64 {
    let nanos = timestamp
        .timestamp_nanos_opt()
        .unwrap_or_else(|| timestamp.timestamp_millis().saturating_mul(1_000_000));
    GREGORIAN_TO_UNIX_TICKS.wrapping_add((nanos / 100) as u64)
}

fn compose_v1(ticks: u64, clock_seq: u16, node: [u8; 6]) -> Uuid {
    let time_low = (ticks & 0xFFFF_FFFF) as u32;
    let time_mid = ((ticks >> 32) & 0xFFFF) as u16;
    let time_hi_version = (((ticks >> 48) & 0x0FFF) as u16) | 0x1000;
    let clock_seq_hi = ((clock_seq >> 8) as u8 & 0x3F) | 0x80;
    let clock_seq_low = (clock_seq & 0xFF) as u8;
    let mut bytes = [0u8; 16];
    bytes[0..4].copy_from_slice(&time_low.to_be_bytes());
    bytes[4..6].copy_from_slice(&time_mid.to_be_bytes());
    bytes[6..8].copy_from_slice(&time_hi_version.to_be_bytes());
    bytes[8] = clock_seq_hi;
    bytes[9] = clock_seq_low;
    bytes[10..16].copy_from_slice(&node);
    Uuid::from_bytes(bytes)
}

/// Extracts the embedded timestamp of a version-1 UUID.
pub fn extract_timestamp(uuid: &Uuid) -> Option<DateTime<Utc>> {
    if uuid.get_version_num() != 1 {
        return None;
    }
    let bytes = uuid.as_bytes();
    let time_low = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64;
    let time_mid = u16::from_be_bytes([bytes[4], bytes[5]]) as u64;
    let time_hi = (u16::from_be_bytes([bytes[6], bytes[7]]) & 0x0FFF) as u64;
    let ticks = (time_hi << 48) | (time_mid << 32) | time_low;
    let unix_nanos = (ticks.wrapping_sub(GREGORIAN_TO_UNIX_TICKS)) as i64 * 100;
    Some(DateTime::<Utc>::from_timestamp_nanos(unix_nanos))
}
