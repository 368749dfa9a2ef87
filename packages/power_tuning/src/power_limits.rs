//! Bit layouts of the power limit registers and the arithmetic that turns a policy into new
//! register contents.
//!
//! The functions here are pure: they take the current register contents and return the new
//! ones. Reading and writing happens in the programming stages.

use bit_field::BitField;
use log::warn;

use crate::units::{POWER_FIELD_MAX, TIME_WINDOW_FIELD_MAX, clamp_time_window};
use crate::{
    Milliamps, Milliseconds, Milliwatts, Pl3Policy, Pl4Policy, Pl12Policy, Pp0Policy, PowerUnits,
};

/// Lock bit of `PKG_POWER_LIMIT` and its memory-mapped mirror.
pub(crate) const PKG_POWER_LIMIT_LOCK_BIT: usize = 63;

/// Lock bit of `PL3_CONTROL`.
pub(crate) const PL3_LOCK_BIT: usize = 31;

/// Lock bit of `PP0_POWER_LIMIT`.
pub(crate) const PP0_LOCK_BIT: usize = 31;

/// Largest raw PL4 current field (1/8 A steps).
const PL4_FIELD_MAX: u64 = 0x1FFF;

/// Milliamperes per raw PL4 step.
const PL4_STEP_MILLIAMPS: u32 = 125;

/// One power limit inside a power limit register: power, enable, clamp and time window.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub struct LimitField {
    /// Power in raw power units.
    pub power: u64,

    /// Whether the limit is enabled.
    pub enabled: bool,

    /// Whether the hardware may clamp below the OS-requested operating point to honor the limit.
    pub clamping: bool,

    /// Encoded time window.
    pub time_window: u8,
}

impl LimitField {
    /// Reads a limit whose power field starts at bit `base`.
    #[expect(clippy::cast_possible_truncation, reason = "the window field is 7 bits wide")]
    #[expect(
        clippy::arithmetic_side_effects,
        reason = "base is 0 or 32, so every offset stays below 64"
    )]
    fn read(raw: u64, base: usize) -> Self {
        Self {
            power: raw.get_bits(base..base + 15),
            enabled: raw.get_bit(base + 15),
            clamping: raw.get_bit(base + 16),
            time_window: raw.get_bits(base + 17..base + 24) as u8,
        }
    }

    /// Writes a limit whose power field starts at bit `base`.
    #[expect(
        clippy::arithmetic_side_effects,
        reason = "base is 0 or 32, so every offset stays below 64"
    )]
    fn write(self, raw: &mut u64, base: usize) {
        raw.set_bits(base..base + 15, self.power.min(POWER_FIELD_MAX));
        raw.set_bit(base + 15, self.enabled);
        raw.set_bit(base + 16, self.clamping);
        raw.set_bits(
            base + 17..base + 24,
            u64::from(self.time_window.min(TIME_WINDOW_FIELD_MAX)),
        );
    }
}

/// Decoded contents of `PKG_POWER_LIMIT` (and of its memory-mapped mirror, which shares the
/// layout).
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub struct PkgPowerLimit {
    /// The sustained limit.
    pub pl1: LimitField,

    /// The burst limit.
    pub pl2: LimitField,

    /// Whether the register is locked until the next power cycle.
    pub locked: bool,
}

impl PkgPowerLimit {
    /// Decodes raw register contents.
    #[must_use]
    pub fn from_raw(raw: u64) -> Self {
        Self {
            pl1: LimitField::read(raw, 0),
            pl2: LimitField::read(raw, 32),
            locked: raw.get_bit(PKG_POWER_LIMIT_LOCK_BIT),
        }
    }

    /// Encodes into raw register contents, preserving reserved bits of `base`.
    #[must_use]
    pub fn to_raw(self, base: u64) -> u64 {
        let mut raw = base;
        self.pl1.write(&mut raw, 0);
        self.pl2.write(&mut raw, 32);
        raw.set_bit(PKG_POWER_LIMIT_LOCK_BIT, self.locked);
        raw
    }
}

/// Decoded contents of `PKG_POWER_INFO`: the allowed power range and the longest time window.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub struct PowerInfo {
    /// Minimum power in raw power units.
    pub min_power: u64,

    /// Maximum power in raw power units. Zero when the part does not report one.
    pub max_power: u64,

    /// Longest allowed time window, encoded like the power limit windows. Zero when the part
    /// does not report one.
    pub max_time_window: u8,
}

impl PowerInfo {
    /// Decodes raw register contents.
    #[must_use]
    #[expect(clippy::cast_possible_truncation, reason = "the window field is 6 bits wide")]
    pub fn from_raw(raw: u64) -> Self {
        Self {
            min_power: raw.get_bits(16..31),
            max_power: raw.get_bits(32..47),
            max_time_window: raw.get_bits(48..54) as u8,
        }
    }

    /// The upper end of the allowed power range, falling back to the field maximum when the
    /// part reports none.
    #[must_use]
    pub fn effective_max_power(&self) -> u64 {
        if self.max_power == 0 {
            POWER_FIELD_MAX
        } else {
            self.max_power
        }
    }

    /// Clamps a raw power value into the allowed range.
    #[must_use]
    pub fn clamp_power(&self, raw: u64) -> u64 {
        let max = self.effective_max_power();
        raw.max(self.min_power).min(max)
    }
}

/// Converts a requested power into a raw power field, clamping to the probed range if asked.
fn power_field(units: PowerUnits, info: &PowerInfo, requested: Milliwatts, clamp: bool) -> u64 {
    let raw = units.encode_power(requested);

    if clamp {
        return info.clamp_power(raw);
    }

    if raw > POWER_FIELD_MAX {
        warn!("requested {requested} does not fit the power field, saturating");
    }

    raw.min(POWER_FIELD_MAX)
}

/// Converts a requested time window into a window field, clamping to the probed maximum if
/// asked.
fn window_field(units: PowerUnits, info: &PowerInfo, requested: Milliseconds, clamp: bool) -> u8 {
    let field = units.encode_time_window(requested);

    if clamp && info.max_time_window != 0 {
        clamp_time_window(field, info.max_time_window)
    } else {
        field
    }
}

/// Applies a PL1/PL2 policy to the current contents of `PKG_POWER_LIMIT` or its mirror.
pub(crate) fn apply_pl12(
    current: u64,
    policy: &Pl12Policy,
    units: PowerUnits,
    info: &PowerInfo,
) -> u64 {
    let mut limits = PkgPowerLimit::from_raw(current);

    if let Some(power) = policy.pl1 {
        limits.pl1.power = power_field(units, info, power, policy.clamp);
    }

    if let Some(window) = policy.time_window {
        limits.pl1.time_window = window_field(units, info, window, policy.clamp);
    }

    if let Some(power) = policy.pl2 {
        limits.pl2.power = power_field(units, info, power, policy.clamp);
    }

    limits.pl1.enabled = policy.enable_pl1;
    limits.pl1.clamping = policy.clamp;
    limits.pl2.enabled = policy.enable_pl2;
    limits.pl2.clamping = policy.clamp;

    limits.to_raw(current)
}

/// Applies a PL3 policy to the current contents of `PL3_CONTROL`.
///
/// PL3 has no probed range, so values are only limited to the field widths.
pub(crate) fn apply_pl3(current: u64, policy: &Pl3Policy, units: PowerUnits) -> u64 {
    let mut limit = LimitField::read(current, 0);

    if let Some(power) = policy.power {
        limit.power = power_field(units, &PowerInfo::default(), power, false);
    }

    if let Some(window) = policy.time_window {
        limit.time_window = units.encode_time_window(window);
    }

    limit.enabled = policy.enable;

    let mut raw = current;
    limit.write(&mut raw, 0);
    // PL3 has no clamping bit; bit 16 is reserved and must keep its value.
    raw.set_bit(16, current.get_bit(16));
    raw
}

/// Applies a PL4 policy to the current contents of `VR_CURRENT_CONFIG`.
pub(crate) fn apply_pl4(current: u64, policy: Pl4Policy) -> u64 {
    let field = if policy.enable {
        encode_pl4_current(policy.current)
    } else {
        PL4_FIELD_MAX
    };

    let mut raw = current;
    raw.set_bits(0..13, field);
    raw
}

/// Converts a peak current into the raw PL4 field (1/8 A steps), saturating at the field width.
#[expect(clippy::integer_division, reason = "the field is rounded down to whole steps")]
pub(crate) fn encode_pl4_current(current: Milliamps) -> u64 {
    u64::from(current.0 / PL4_STEP_MILLIAMPS).min(PL4_FIELD_MAX)
}

/// Applies a PP0 policy to the current contents of `PP0_POWER_LIMIT`.
pub(crate) fn apply_pp0(
    current: u64,
    policy: &Pp0Policy,
    units: PowerUnits,
    info: &PowerInfo,
) -> u64 {
    let mut limit = LimitField::read(current, 0);

    if let Some(power) = policy.power {
        limit.power = power_field(units, info, power, policy.clamp);
    }

    if let Some(window) = policy.time_window {
        limit.time_window = window_field(units, info, window, policy.clamp);
    }

    limit.enabled = policy.enable;
    limit.clamping = policy.clamp;

    let mut raw = current;
    limit.write(&mut raw, 0);
    raw
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    const UNITS: u64 = 0x000A_0E03;

    fn units() -> PowerUnits {
        PowerUnits::from_raw(UNITS)
    }

    // 15 W minimum, 65 W maximum, window field 0x2E (2^14 * 1.25).
    fn info() -> PowerInfo {
        PowerInfo {
            min_power: 120,
            max_power: 520,
            max_time_window: 0x2E,
        }
    }

    #[test]
    fn pkg_power_limit_layout() {
        let raw = 0x8042_81F8_00DD_8118_u64;
        let limits = PkgPowerLimit::from_raw(raw);

        assert_eq!(limits.pl1.power, 0x118);
        assert!(limits.pl1.enabled);
        assert!(limits.pl1.clamping);
        assert_eq!(limits.pl1.time_window, 0x6E);
        assert_eq!(limits.pl2.power, 0x1F8);
        assert!(limits.pl2.enabled);
        assert!(!limits.pl2.clamping);
        assert_eq!(limits.pl2.time_window, 0x21);
        assert!(limits.locked);

        assert_eq!(limits.to_raw(0), raw);
    }

    #[test]
    fn power_info_layout() {
        let raw = 0x0012_0208_0078_0118_u64;
        let info = PowerInfo::from_raw(raw);

        assert_eq!(info.min_power, 0x78);
        assert_eq!(info.max_power, 0x208);
        assert_eq!(info.max_time_window, 0x12);
    }

    #[test]
    fn pl1_above_maximum_is_clamped() {
        let policy = Pl12Policy::new(Milliwatts::from_watts(95), Milliwatts::from_watts(65));

        let limits = PkgPowerLimit::from_raw(apply_pl12(0, &policy, units(), &info()));

        assert_eq!(limits.pl1.power, 520);
        assert_eq!(limits.pl2.power, 520);
        assert!(limits.pl1.clamping);
        assert!(limits.pl2.clamping);
    }

    #[test]
    fn pl1_above_maximum_without_clamp_is_written_as_requested() {
        let mut policy = Pl12Policy::new(Milliwatts::from_watts(95), Milliwatts::from_watts(120));
        policy.clamp = false;

        let limits = PkgPowerLimit::from_raw(apply_pl12(0, &policy, units(), &info()));

        assert_eq!(limits.pl1.power, 760);
        assert_eq!(limits.pl2.power, 960);
        assert!(!limits.pl1.clamping);
    }

    #[test]
    fn pl1_below_minimum_is_raised_when_clamping() {
        let policy = Pl12Policy::new(Milliwatts::from_watts(5), Milliwatts::from_watts(65));

        let limits = PkgPowerLimit::from_raw(apply_pl12(0, &policy, units(), &info()));

        assert_eq!(limits.pl1.power, 120);
    }

    #[test]
    fn missing_maximum_falls_back_to_field_width() {
        let policy = Pl12Policy::new(Milliwatts::from_watts(5_000), Milliwatts::from_watts(5_000));

        let raw = apply_pl12(0, &policy, units(), &PowerInfo::default());
        let limits = PkgPowerLimit::from_raw(raw);

        assert_eq!(limits.pl1.power, POWER_FIELD_MAX);
    }

    #[test]
    fn pl12_keeps_unrequested_fields() {
        let current = PkgPowerLimit {
            pl1: LimitField {
                power: 200,
                enabled: false,
                clamping: false,
                time_window: 0x4E,
            },
            pl2: LimitField {
                power: 400,
                enabled: false,
                clamping: false,
                time_window: 0x21,
            },
            locked: false,
        }
        .to_raw(0);

        let mut policy = Pl12Policy::default();
        policy.enable_pl1 = true;
        policy.pl1 = Some(Milliwatts::from_watts(45));

        let limits = PkgPowerLimit::from_raw(apply_pl12(current, &policy, units(), &info()));

        assert_eq!(limits.pl1.power, 360);
        assert!(limits.pl1.enabled);
        assert_eq!(limits.pl1.time_window, 0x4E);
        assert_eq!(limits.pl2.power, 400);
        assert!(!limits.pl2.enabled);
        assert_eq!(limits.pl2.time_window, 0x21);
    }

    #[test]
    fn pl1_window_clamped_to_maximum() {
        let mut policy = Pl12Policy::new(Milliwatts::from_watts(45), Milliwatts::from_watts(65));
        policy.time_window = Some(Milliseconds::from_secs(56));

        let limits = PkgPowerLimit::from_raw(apply_pl12(0, &policy, units(), &info()));

        assert_eq!(limits.pl1.time_window, 0x2E);
    }

    #[test]
    fn pl3_layout() {
        let policy = Pl3Policy::new(Milliwatts::from_watts(100), Milliseconds(10));
        let raw = apply_pl3(1 << 16, &policy, units());

        assert_eq!(raw.get_bits(0..15), 800);
        assert!(raw.get_bit(15));
        assert!(raw.get_bit(16), "reserved bit must be preserved");
        assert_eq!(raw.get_bits(17..24), 3 | (1 << 5));
        assert!(!raw.get_bit(PL3_LOCK_BIT));
    }

    #[test]
    fn pl4_enabled_and_disabled() {
        let raw = apply_pl4(0x8000_0000, Pl4Policy::new(Milliamps::from_amps(200)));
        assert_eq!(raw.get_bits(0..13), 1600);
        assert!(raw.get_bit(31), "other bits must be preserved");

        let mut disabled = Pl4Policy::new(Milliamps::from_amps(200));
        disabled.enable = false;
        assert_eq!(apply_pl4(0, disabled).get_bits(0..13), PL4_FIELD_MAX);

        assert_eq!(encode_pl4_current(Milliamps::from_amps(5_000)), PL4_FIELD_MAX);
    }

    #[test]
    fn pp0_is_clamped_like_pl1() {
        let policy = Pp0Policy::new(Milliwatts::from_watts(200));
        let raw = apply_pp0(0, &policy, units(), &info());

        assert_eq!(raw.get_bits(0..15), 520);
        assert!(raw.get_bit(15));
        assert!(raw.get_bit(16));
    }
}
