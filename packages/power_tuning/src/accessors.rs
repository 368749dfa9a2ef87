//! Typed get/set operations for each register group, layered over the raw
//! [`RegisterAccess`] primitives.
//!
//! Every operation acts on the register file of the processor executing the call (or on the
//! package-wide memory-mapped window) and maps raw status codes into [`Error`] values that name
//! the register involved.

use bit_field::BitField;
use log::debug;

use crate::error::Result;
use crate::power_limits::{PKG_POWER_LIMIT_LOCK_BIT, PL3_LOCK_BIT, PP0_LOCK_BIT};
use crate::{
    CpuSignature, Error, MmioRegister, Msr, PkgPowerLimit, PowerInfo, PowerUnits, RegisterAccess,
    Status,
};

const OVERCLOCKING_LOCK_BIT: usize = 20;
const CONFIG_TDP_LOCK_BIT: usize = 31;

/// Number of active-core-count buckets in `TURBO_RATIO_LIMIT`.
pub const TURBO_RATIO_BUCKETS: usize = 8;

/// Maximum turbo ratio for each active core count, as read from `TURBO_RATIO_LIMIT`.
///
/// Index 0 is the limit with one active core.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub struct TurboRatioLimits(pub [u8; TURBO_RATIO_BUCKETS]);

impl TurboRatioLimits {
    /// Decodes raw register contents.
    #[must_use]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw.to_le_bytes())
    }

    /// Encodes into raw register contents.
    #[must_use]
    pub fn to_raw(self) -> u64 {
        u64::from_le_bytes(self.0)
    }

    /// The same ratio for every active core count.
    #[must_use]
    pub fn uniform(ratio: u8) -> Self {
        Self([ratio; TURBO_RATIO_BUCKETS])
    }

    /// The highest ratio across all buckets.
    #[must_use]
    pub fn max_ratio(self) -> u8 {
        self.0.iter().copied().max().unwrap_or_default()
    }
}

/// Configurable TDP state of a package.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub struct ConfigTdp {
    /// Highest selectable level. Zero means only the nominal level exists.
    pub max_level: u8,

    /// The currently selected level.
    pub level: u8,

    /// Whether level selection is locked until the next power cycle.
    pub locked: bool,
}

fn msr_error(msr: Msr) -> impl FnOnce(Status) -> Error {
    move |status| Error::Msr { msr, status }
}

fn mmio_error(register: MmioRegister) -> impl FnOnce(Status) -> Error {
    move |status| Error::Mmio { register, status }
}

pub(crate) fn read_msr<R>(registers: &R, msr: Msr) -> Result<u64>
where
    R: RegisterAccess + ?Sized,
{
    registers.read_msr(msr).map_err(msr_error(msr))
}

pub(crate) fn write_msr<R>(registers: &R, msr: Msr, value: u64) -> Result<()>
where
    R: RegisterAccess + ?Sized,
{
    debug!("writing {value:#018x} to {msr}");
    registers.write_msr(msr, value).map_err(msr_error(msr))
}

/// Reads a register, lets `update` compute the new contents and writes them back.
pub(crate) fn modify_msr<R, F>(registers: &R, msr: Msr, update: F) -> Result<()>
where
    R: RegisterAccess + ?Sized,
    F: FnOnce(u64) -> u64,
{
    let current = read_msr(registers, msr)?;
    write_msr(registers, msr, update(current))
}

pub(crate) fn read_mmio<R>(registers: &R, register: MmioRegister) -> Result<u64>
where
    R: RegisterAccess + ?Sized,
{
    registers.read_mmio(register).map_err(mmio_error(register))
}

/// Reads a memory-mapped register, lets `update` compute the new contents and writes them back.
pub(crate) fn modify_mmio<R, F>(registers: &R, register: MmioRegister, update: F) -> Result<()>
where
    R: RegisterAccess + ?Sized,
    F: FnOnce(u64) -> u64,
{
    let current = read_mmio(registers, register)?;
    let value = update(current);

    debug!("writing {value:#018x} to {register}");
    registers
        .write_mmio(register, value)
        .map_err(mmio_error(register))
}

fn set_msr_bit<R>(registers: &R, msr: Msr, bit: usize) -> Result<()>
where
    R: RegisterAccess + ?Sized,
{
    modify_msr(registers, msr, |mut value| {
        value.set_bit(bit, true);
        value
    })
}

pub(crate) fn read_cpu_signature<R>(registers: &R) -> Result<CpuSignature>
where
    R: RegisterAccess + ?Sized,
{
    registers
        .cpuid_version()
        .map(CpuSignature)
        .map_err(|status| Error::Cpuid { status })
}

pub(crate) fn read_power_units<R>(registers: &R) -> Result<PowerUnits>
where
    R: RegisterAccess + ?Sized,
{
    read_msr(registers, Msr::RaplPowerUnit).map(PowerUnits::from_raw)
}

pub(crate) fn read_power_info<R>(registers: &R) -> Result<PowerInfo>
where
    R: RegisterAccess + ?Sized,
{
    read_msr(registers, Msr::PkgPowerInfo).map(PowerInfo::from_raw)
}

pub(crate) fn read_pkg_power_limit<R>(registers: &R) -> Result<PkgPowerLimit>
where
    R: RegisterAccess + ?Sized,
{
    read_msr(registers, Msr::PkgPowerLimit).map(PkgPowerLimit::from_raw)
}

pub(crate) fn read_turbo_ratio_limits<R>(registers: &R) -> Result<TurboRatioLimits>
where
    R: RegisterAccess + ?Sized,
{
    read_msr(registers, Msr::TurboRatioLimit).map(TurboRatioLimits::from_raw)
}

/// Forces the same maximum turbo ratio for every active core count.
pub(crate) fn write_forced_turbo_ratio<R>(registers: &R, ratio: u8) -> Result<()>
where
    R: RegisterAccess + ?Sized,
{
    write_msr(
        registers,
        Msr::TurboRatioLimit,
        TurboRatioLimits::uniform(ratio).to_raw(),
    )
}

#[expect(clippy::cast_possible_truncation, reason = "fields are extracted by width")]
pub(crate) fn read_config_tdp<R>(registers: &R) -> Result<ConfigTdp>
where
    R: RegisterAccess + ?Sized,
{
    let platform_info = read_msr(registers, Msr::PlatformInfo)?;
    let control = read_msr(registers, Msr::ConfigTdpControl)?;

    Ok(ConfigTdp {
        max_level: platform_info.get_bits(33..35) as u8,
        level: control.get_bits(0..2) as u8,
        locked: control.get_bit(CONFIG_TDP_LOCK_BIT),
    })
}

/// Selects a configurable TDP level. Refuses to touch a locked control and levels the package
/// does not report.
pub(crate) fn write_config_tdp_level<R>(registers: &R, level: u8) -> Result<()>
where
    R: RegisterAccess + ?Sized,
{
    let state = read_config_tdp(registers)?;

    if state.locked {
        return Err(Error::ConfigTdpLocked);
    }

    if level > state.max_level {
        return Err(Error::ConfigTdpLevelUnsupported {
            level,
            max_level: state.max_level,
        });
    }

    modify_msr(registers, Msr::ConfigTdpControl, |mut value| {
        value.set_bits(0..2, u64::from(level));
        value
    })
}

pub(crate) fn lock_pkg_power_limit<R>(registers: &R) -> Result<()>
where
    R: RegisterAccess + ?Sized,
{
    set_msr_bit(registers, Msr::PkgPowerLimit, PKG_POWER_LIMIT_LOCK_BIT)
}

pub(crate) fn lock_pl3<R>(registers: &R) -> Result<()>
where
    R: RegisterAccess + ?Sized,
{
    set_msr_bit(registers, Msr::Pl3Control, PL3_LOCK_BIT)
}

pub(crate) fn lock_pp0<R>(registers: &R) -> Result<()>
where
    R: RegisterAccess + ?Sized,
{
    set_msr_bit(registers, Msr::Pp0PowerLimit, PP0_LOCK_BIT)
}

pub(crate) fn lock_config_tdp<R>(registers: &R) -> Result<()>
where
    R: RegisterAccess + ?Sized,
{
    set_msr_bit(registers, Msr::ConfigTdpControl, CONFIG_TDP_LOCK_BIT)
}

pub(crate) fn lock_overclocking<R>(registers: &R) -> Result<()>
where
    R: RegisterAccess + ?Sized,
{
    set_msr_bit(registers, Msr::FlexRatio, OVERCLOCKING_LOCK_BIT)
}

pub(crate) fn lock_pkg_power_limit_mmio<R>(registers: &R) -> Result<()>
where
    R: RegisterAccess + ?Sized,
{
    modify_mmio(registers, MmioRegister::PkgPowerLimit, |mut value| {
        value.set_bit(PKG_POWER_LIMIT_LOCK_BIT, true);
        value
    })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use mockall::predicate::eq;

    use super::*;
    use crate::hal::MockRegisterAccess;

    #[test]
    fn turbo_ratio_limits_byte_order() {
        let limits = TurboRatioLimits::from_raw(0x2A2B_2C2D_2E2F_3031);

        let [fewest_active, .., most_active] = limits.0;
        assert_eq!(fewest_active, 0x31);
        assert_eq!(most_active, 0x2A);
        assert_eq!(limits.max_ratio(), 0x31);
        assert_eq!(TurboRatioLimits::uniform(45).to_raw(), 0x2D2D_2D2D_2D2D_2D2D);
    }

    #[test]
    fn config_tdp_decodes_both_registers() {
        let mut registers = MockRegisterAccess::new();

        registers
            .expect_read_msr()
            .with(eq(Msr::PlatformInfo))
            .returning(|_| Ok(2 << 33));
        registers
            .expect_read_msr()
            .with(eq(Msr::ConfigTdpControl))
            .returning(|_| Ok((1 << 31) | 1));

        let state = read_config_tdp(&registers).unwrap();

        assert_eq!(
            state,
            ConfigTdp {
                max_level: 2,
                level: 1,
                locked: true,
            }
        );
    }

    #[test]
    fn locked_config_tdp_is_not_written() {
        let mut registers = MockRegisterAccess::new();

        registers
            .expect_read_msr()
            .with(eq(Msr::PlatformInfo))
            .returning(|_| Ok(2 << 33));
        registers
            .expect_read_msr()
            .with(eq(Msr::ConfigTdpControl))
            .returning(|_| Ok(1 << 31));
        registers.expect_write_msr().never();

        let result = write_config_tdp_level(&registers, 1);

        assert!(matches!(result, Err(Error::ConfigTdpLocked)));
    }

    #[test]
    fn unsupported_config_tdp_level_is_rejected() {
        let mut registers = MockRegisterAccess::new();

        registers
            .expect_read_msr()
            .with(eq(Msr::PlatformInfo))
            .returning(|_| Ok(1 << 33));
        registers
            .expect_read_msr()
            .with(eq(Msr::ConfigTdpControl))
            .returning(|_| Ok(0));
        registers.expect_write_msr().never();

        let result = write_config_tdp_level(&registers, 2);

        assert!(matches!(
            result,
            Err(Error::ConfigTdpLevelUnsupported {
                level: 2,
                max_level: 1
            })
        ));
    }

    #[test]
    fn config_tdp_level_preserves_other_bits() {
        let mut registers = MockRegisterAccess::new();

        registers
            .expect_read_msr()
            .with(eq(Msr::PlatformInfo))
            .returning(|_| Ok(2 << 33));
        registers
            .expect_read_msr()
            .with(eq(Msr::ConfigTdpControl))
            .returning(|_| Ok(0xF0));
        registers
            .expect_write_msr()
            .with(eq(Msr::ConfigTdpControl), eq(0xF2))
            .times(1)
            .returning(|_, _| Ok(()));

        write_config_tdp_level(&registers, 2).unwrap();
    }

    #[test]
    fn lock_sets_only_the_lock_bit() {
        let mut registers = MockRegisterAccess::new();

        registers
            .expect_read_msr()
            .with(eq(Msr::PkgPowerLimit))
            .returning(|_| Ok(0x0042_81F8_00DD_8118));
        registers
            .expect_write_msr()
            .with(eq(Msr::PkgPowerLimit), eq(0x8042_81F8_00DD_8118))
            .times(1)
            .returning(|_, _| Ok(()));

        lock_pkg_power_limit(&registers).unwrap();
    }

    #[test]
    fn failures_name_the_register() {
        let mut registers = MockRegisterAccess::new();

        registers
            .expect_read_mmio()
            .returning(|_| Err(Status(0x8000_0007)));
        registers.expect_write_mmio().never();

        let result = lock_pkg_power_limit_mmio(&registers);

        assert!(matches!(
            result,
            Err(Error::Mmio {
                register: MmioRegister::PkgPowerLimit,
                status: Status(0x8000_0007)
            })
        ));
    }
}
