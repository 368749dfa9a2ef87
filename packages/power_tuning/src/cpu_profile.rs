/// Microarchitecture-specific facts that change how registers are encoded.
///
/// This is produced by the external CPU identification tables and handed to the
/// [`Tuner`][crate::Tuner] as-is. The presets cover the two encodings seen in practice.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[expect(
    clippy::exhaustive_structs,
    reason = "CPU identification tables outside this crate build profiles field by field"
)]
pub struct CpuProfile {
    /// Width of the IccMax current field in the overclocking mailbox.
    pub icc_max_bits: u8,

    /// Whether the IccMax interface has the dedicated "unlimited" flag.
    pub unlimited_icc_max_flag: bool,

    /// Number of V/F curve points the mailbox exposes per domain. Zero if none.
    pub vf_points_exposed: u8,

    /// Whether the package has efficiency cores in addition to performance cores.
    ///
    /// No register encoding depends on this. It only shows up in diagnostics.
    pub has_efficiency_cores: bool,
}

impl CpuProfile {
    /// Profile for parts before Alder Lake (10-bit IccMax, no unlimited flag, no exposed curve).
    #[must_use]
    pub const fn pre_alder_lake() -> Self {
        Self {
            icc_max_bits: 10,
            unlimited_icc_max_flag: false,
            vf_points_exposed: 0,
            has_efficiency_cores: false,
        }
    }

    /// Profile for Alder Lake and later (11-bit IccMax with unlimited flag, exposed V/F curve).
    #[must_use]
    pub const fn alder_lake() -> Self {
        Self {
            icc_max_bits: 11,
            unlimited_icc_max_flag: true,
            vf_points_exposed: 8,
            has_efficiency_cores: true,
        }
    }

    /// Largest raw value of the IccMax current field.
    #[must_use]
    pub const fn icc_max_field_max(self) -> u32 {
        let bits = if self.icc_max_bits < 31 { self.icc_max_bits } else { 31 };
        (1_u32 << bits).saturating_sub(1)
    }
}

impl Default for CpuProfile {
    fn default() -> Self {
        Self::pre_alder_lake()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn icc_max_width_differs_by_generation() {
        assert_eq!(CpuProfile::pre_alder_lake().icc_max_field_max(), 0x3FF);
        assert_eq!(CpuProfile::alder_lake().icc_max_field_max(), 0x7FF);
    }
}
