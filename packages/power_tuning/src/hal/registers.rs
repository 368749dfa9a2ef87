use derive_more::derive::Display;

/// The model-specific registers this crate reads or writes.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[non_exhaustive]
pub enum Msr {
    /// Platform information, including the number of configurable TDP levels.
    #[display("PLATFORM_INFO")]
    PlatformInfo,

    /// Overclocking mailbox interface.
    #[display("OC_MAILBOX")]
    OcMailbox,

    /// Flex ratio control, including the overclocking lock.
    #[display("FLEX_RATIO")]
    FlexRatio,

    /// Maximum turbo ratio for each active core count.
    #[display("TURBO_RATIO_LIMIT")]
    TurboRatioLimit,

    /// Voltage regulator current configuration (PL4).
    #[display("VR_CURRENT_CONFIG")]
    VrCurrentConfig,

    /// Time, energy and power scaling units.
    #[display("RAPL_POWER_UNIT")]
    RaplPowerUnit,

    /// Package power limits PL1 and PL2.
    #[display("PKG_POWER_LIMIT")]
    PkgPowerLimit,

    /// Package power range and maximum time window.
    #[display("PKG_POWER_INFO")]
    PkgPowerInfo,

    /// Platform power limit PL3.
    #[display("PL3_CONTROL")]
    Pl3Control,

    /// Power plane 0 (core domain) power limit.
    #[display("PP0_POWER_LIMIT")]
    Pp0PowerLimit,

    /// Configurable TDP level selection and its lock.
    #[display("CONFIG_TDP_CONTROL")]
    ConfigTdpControl,
}

impl Msr {
    /// The architectural address of the register.
    #[must_use]
    pub const fn address(self) -> u32 {
        match self {
            Self::PlatformInfo => 0xCE,
            Self::OcMailbox => 0x150,
            Self::FlexRatio => 0x194,
            Self::TurboRatioLimit => 0x1AD,
            Self::VrCurrentConfig => 0x601,
            Self::RaplPowerUnit => 0x606,
            Self::PkgPowerLimit => 0x610,
            Self::PkgPowerInfo => 0x614,
            Self::Pl3Control => 0x615,
            Self::Pp0PowerLimit => 0x638,
            Self::ConfigTdpControl => 0x64B,
        }
    }
}

/// The memory-mapped power management registers this crate reads or writes.
///
/// These live in the memory controller hub register window and are shared by all processors
/// of a package.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[non_exhaustive]
pub enum MmioRegister {
    /// Memory-mapped mirror of the package PL1/PL2 power limits.
    #[display("MMIO_PKG_POWER_LIMIT")]
    PkgPowerLimit,
}

impl MmioRegister {
    /// Offset of the register from the memory controller hub base address.
    #[must_use]
    pub const fn offset(self) -> u32 {
        match self {
            Self::PkgPowerLimit => 0x59A0,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn addresses_match_architectural_layout() {
        assert_eq!(Msr::PkgPowerLimit.address(), 0x610);
        assert_eq!(Msr::RaplPowerUnit.address(), 0x606);
        assert_eq!(Msr::OcMailbox.address(), 0x150);
        assert_eq!(MmioRegister::PkgPowerLimit.offset(), 0x59A0);
    }

    #[test]
    fn names_are_displayed() {
        assert_eq!(Msr::Pl3Control.to_string(), "PL3_CONTROL");
        assert_eq!(MmioRegister::PkgPowerLimit.to_string(), "MMIO_PKG_POWER_LIMIT");
    }
}
