//! Capture timestamp conversion
//!
//! Trace records carry capture times as 100 ns ticks since 1601-01-01 UTC.
//! pcapng packet blocks want microseconds since the Unix epoch, split into
//! two 32-bit halves.

/// Microseconds between 1601-01-01 and 1970-01-01.
pub const EPOCH_DIFFERENCE_US: u64 = 11_644_473_600_000_000;

/// Ticks per microsecond (one tick is 100 ns)
const TICKS_PER_US: u64 = 10;

/// A timestamp as written into an enhanced packet block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketTimestamp {
    /// Upper 32 bits of the microsecond count
    pub high: u32,
    /// Lower 32 bits of the microsecond count
    pub low: u32,
}

impl PacketTimestamp {
    /// Split a microsecond count into its high/low halves
    pub fn from_unix_micros(micros: u64) -> Self {
        Self {
            high: (micros >> 32) as u32,
            low: (micros & 0xFFFF_FFFF) as u32,
        }
    }

    /// Convert capture ticks straight to a packet timestamp
    pub fn from_ticks(ticks: u64) -> Self {
        Self::from_unix_micros(ticks_to_unix_micros(ticks))
    }

    /// Recombine the halves
    pub fn as_micros(&self) -> u64 {
        (u64::from(self.high) << 32) | u64::from(self.low)
    }
}

/// Convert 100 ns ticks since 1601 to microseconds since 1970.
///
/// Ticks before the Unix epoch saturate to zero.
#[inline]
pub fn ticks_to_unix_micros(ticks: u64) -> u64 {
    (ticks / TICKS_PER_US).saturating_sub(EPOCH_DIFFERENCE_US)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_maps_to_zero() {
        assert_eq!(ticks_to_unix_micros(EPOCH_DIFFERENCE_US * 10), 0);
    }

    #[test]
    fn test_known_tick_value() {
        // 2022-06-18T04:26:40Z
        let ticks = 133_000_000_000_000_000u64;
        let expected = 13_300_000_000_000_000u64 - 11_644_473_600_000_000u64;
        assert_eq!(ticks_to_unix_micros(ticks), expected);
        assert_eq!(expected, 1_655_526_400_000_000);
    }

    #[test]
    fn test_sub_microsecond_ticks_floor() {
        let base = EPOCH_DIFFERENCE_US * 10;
        assert_eq!(ticks_to_unix_micros(base + 9), 0);
        assert_eq!(ticks_to_unix_micros(base + 10), 1);
        assert_eq!(ticks_to_unix_micros(base + 19), 1);
    }

    #[test]
    fn test_pre_epoch_saturates() {
        assert_eq!(ticks_to_unix_micros(0), 0);
        assert_eq!(ticks_to_unix_micros(1_000), 0);
    }

    #[test]
    fn test_split_halves() {
        let ts = PacketTimestamp::from_unix_micros(0x0005_E0F1_2345_6789);
        assert_eq!(ts.high, 0x0005_E0F1);
        assert_eq!(ts.low, 0x2345_6789);
        assert_eq!(ts.as_micros(), 0x0005_E0F1_2345_6789);
    }

    #[test]
    fn test_from_ticks() {
        let ts = PacketTimestamp::from_ticks(133_000_000_000_000_000);
        assert_eq!(ts.as_micros(), 1_655_526_400_000_000);
    }
}
