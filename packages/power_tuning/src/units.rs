//! Physical quantities and their conversion to and from raw register fields.
//!
//! All conversions are integer-only so that the encoded register contents are bit-exact and
//! reproducible across runs.

use bit_field::BitField;
use derive_more::derive::Display;

/// Electrical power in milliwatts.
#[derive(Clone, Copy, Debug, Default, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[display("{_0} mW")]
#[expect(clippy::exhaustive_structs, reason = "plain newtype over the raw quantity")]
pub struct Milliwatts(pub u32);

impl Milliwatts {
    /// Creates a value from whole watts.
    #[must_use]
    pub const fn from_watts(watts: u32) -> Self {
        Self(watts.saturating_mul(1000))
    }
}

/// A time span in milliseconds.
#[derive(Clone, Copy, Debug, Default, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[display("{_0} ms")]
#[expect(clippy::exhaustive_structs, reason = "plain newtype over the raw quantity")]
pub struct Milliseconds(pub u32);

impl Milliseconds {
    /// Creates a value from whole seconds.
    #[must_use]
    pub const fn from_secs(secs: u32) -> Self {
        Self(secs.saturating_mul(1000))
    }
}

/// Electrical current in milliamperes.
#[derive(Clone, Copy, Debug, Default, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[display("{_0} mA")]
#[expect(clippy::exhaustive_structs, reason = "plain newtype over the raw quantity")]
pub struct Milliamps(pub u32);

impl Milliamps {
    /// Creates a value from whole amperes.
    #[must_use]
    pub const fn from_amps(amps: u32) -> Self {
        Self(amps.saturating_mul(1000))
    }
}

/// Voltage in millivolts, signed so that it can express offsets.
#[derive(Clone, Copy, Debug, Default, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[display("{_0} mV")]
#[expect(clippy::exhaustive_structs, reason = "plain newtype over the raw quantity")]
pub struct Millivolts(pub i32);

/// Width of every power field in the power limit registers.
pub(crate) const POWER_FIELD_MAX: u64 = 0x7FFF;

/// Width of the time window field in the power limit registers.
pub(crate) const TIME_WINDOW_FIELD_MAX: u8 = 0x7F;

/// Scaling units read from `RAPL_POWER_UNIT`.
///
/// Each unit is `1 / 2^exponent` of watts, joules or seconds respectively.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct PowerUnits {
    power_exponent: u8,
    energy_exponent: u8,
    time_exponent: u8,
}

impl PowerUnits {
    /// Decodes the raw contents of `RAPL_POWER_UNIT`.
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "fields are at most 5 bits wide"
    )]
    pub fn from_raw(raw: u64) -> Self {
        Self {
            power_exponent: raw.get_bits(0..4) as u8,
            energy_exponent: raw.get_bits(8..13) as u8,
            time_exponent: raw.get_bits(16..20) as u8,
        }
    }

    /// Encodes the units back into the `RAPL_POWER_UNIT` layout.
    #[must_use]
    pub fn to_raw(self) -> u64 {
        let mut raw = 0_u64;
        raw.set_bits(0..4, u64::from(self.power_exponent & 0xF));
        raw.set_bits(8..13, u64::from(self.energy_exponent & 0x1F));
        raw.set_bits(16..20, u64::from(self.time_exponent & 0xF));
        raw
    }

    /// Power unit exponent: one raw power step is `1 / 2^exponent` W.
    #[must_use]
    pub fn power_exponent(self) -> u8 {
        self.power_exponent
    }

    /// Energy unit exponent: one raw energy step is `1 / 2^exponent` J.
    #[must_use]
    pub fn energy_exponent(self) -> u8 {
        self.energy_exponent
    }

    /// Time unit exponent: one raw time step is `1 / 2^exponent` s.
    #[must_use]
    pub fn time_exponent(self) -> u8 {
        self.time_exponent
    }

    /// Converts a power value into raw power units, rounding down.
    ///
    /// The result is not limited to the width of any register field.
    #[must_use]
    #[expect(clippy::integer_division, reason = "register fields are rounded down")]
    pub fn encode_power(self, power: Milliwatts) -> u64 {
        (u64::from(power.0) << self.power_exponent) / 1000
    }

    /// Converts raw power units back into milliwatts, rounding down.
    #[must_use]
    pub fn decode_power(self, raw: u64) -> Milliwatts {
        let milliwatts = raw.saturating_mul(1000) >> self.power_exponent;
        Milliwatts(u32::try_from(milliwatts).unwrap_or(u32::MAX))
    }

    /// Converts a time span into raw time units, rounding down.
    #[must_use]
    #[expect(clippy::integer_division, reason = "register fields are rounded down")]
    pub fn encode_time(self, time: Milliseconds) -> u64 {
        (u64::from(time.0) << self.time_exponent) / 1000
    }

    /// Converts a time span into the 7-bit time window encoding used by the power limit
    /// registers, choosing the largest representable window that does not exceed the request.
    ///
    /// The window is `2^Y * (1 + Z/4)` time units, with Y in bits 4:0 and Z in bits 6:5.
    #[must_use]
    pub fn encode_time_window(self, time: Milliseconds) -> u8 {
        let ticks = self.encode_time(time);
        window_field_at_most(ticks.saturating_mul(4))
    }

    /// Converts a 7-bit time window field back into milliseconds, rounding down.
    #[must_use]
    pub fn decode_time_window(self, field: u8) -> Milliseconds {
        let quarter_ticks = window_quarter_ticks(field);
        let millis =
            quarter_ticks.saturating_mul(1000) >> u32::from(self.time_exponent).saturating_add(2);
        Milliseconds(u32::try_from(millis).unwrap_or(u32::MAX))
    }
}

/// The length of an encoded time window in quarter time units, i.e. `2^Y * (4 + Z)`.
pub(crate) fn window_quarter_ticks(field: u8) -> u64 {
    let y = u32::from(field & 0x1F);
    let z = u64::from((field >> 5) & 0x3);
    (1_u64 << y).saturating_mul(z.saturating_add(4))
}

/// Finds the largest time window field whose length does not exceed `limit` quarter time
/// units. Windows shorter than one time unit are not representable, so the minimum field is
/// returned for them.
fn window_field_at_most(limit: u64) -> u8 {
    let mut best: u8 = 0;
    let mut best_length = 0_u64;

    for y in 0_u8..=0x1F {
        for z in 0_u8..=3 {
            let field = y | (z << 5);
            let length = window_quarter_ticks(field);

            if length <= limit && length > best_length {
                best = field;
                best_length = length;
            }
        }
    }

    best
}

/// Limits a time window field to a maximum window, comparing actual window lengths rather
/// than raw field values.
pub(crate) fn clamp_time_window(field: u8, max_field: u8) -> u8 {
    if window_quarter_ticks(field) > window_quarter_ticks(max_field) {
        max_field
    } else {
        field
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    // Typical client part: power 1/8 W, energy 1/16384 J, time 1/1024 s.
    const TYPICAL_UNITS: u64 = 0x000A_0E03;

    #[test]
    fn decodes_typical_units() {
        let units = PowerUnits::from_raw(TYPICAL_UNITS);

        assert_eq!(units.power_exponent(), 3);
        assert_eq!(units.energy_exponent(), 14);
        assert_eq!(units.time_exponent(), 10);
        assert_eq!(units.to_raw(), TYPICAL_UNITS);
    }

    #[test]
    fn power_encodes_in_eighths_of_a_watt() {
        let units = PowerUnits::from_raw(TYPICAL_UNITS);

        assert_eq!(units.encode_power(Milliwatts::from_watts(35)), 280);
        assert_eq!(units.encode_power(Milliwatts(125)), 1);
        assert_eq!(units.encode_power(Milliwatts(124)), 0);
        assert_eq!(units.decode_power(280), Milliwatts::from_watts(35));
    }

    #[test]
    fn power_round_trip_stays_within_one_quantum() {
        let units = PowerUnits::from_raw(TYPICAL_UNITS);
        let quantum = 1000_u32 >> units.power_exponent();

        for requested in [1_000, 35_000, 35_001, 35_124, 45_500, 65_000, 253_999] {
            let decoded = units.decode_power(units.encode_power(Milliwatts(requested)));

            assert!(decoded.0 <= requested, "decoding must never round up");
            assert!(
                requested.abs_diff(decoded.0) < quantum,
                "{requested} mW decoded as {decoded}, more than one quantum away"
            );
        }
    }

    #[test]
    fn time_window_picks_largest_not_exceeding_request() {
        let units = PowerUnits::from_raw(TYPICAL_UNITS);

        // 28 s = 28672 ticks = 2^14 * 1.75 ticks exactly.
        let field = units.encode_time_window(Milliseconds::from_secs(28));
        assert_eq!(field & 0x1F, 14);
        assert_eq!(field >> 5, 3);
        assert_eq!(units.decode_time_window(field), Milliseconds::from_secs(28));

        // 1 s = 1024 ticks = 2^10 exactly.
        let field = units.encode_time_window(Milliseconds::from_secs(1));
        assert_eq!(field, 10);

        // 1.1 s = 1126 ticks, the best window is still 2^10.
        let field = units.encode_time_window(Milliseconds(1_100));
        assert_eq!(field, 10);
    }

    #[test]
    fn time_window_below_one_unit_uses_minimum_field() {
        let units = PowerUnits::from_raw(TYPICAL_UNITS);

        assert_eq!(units.encode_time_window(Milliseconds(0)), 0);
    }

    #[test]
    fn clamp_time_window_compares_lengths() {
        // 2^3 * 1.75 = 14 units against 2^4 = 16 units: no clamping.
        assert_eq!(clamp_time_window(3 | (3 << 5), 4), 3 | (3 << 5));

        // 2^5 = 32 units against 2^4 * 1.25 = 20 units: clamped.
        assert_eq!(clamp_time_window(5, 4 | (1 << 5)), 4 | (1 << 5));
    }
}
