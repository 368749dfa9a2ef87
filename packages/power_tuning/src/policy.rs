use crate::{Milliamps, Milliseconds, Milliwatts};

/// What the operator wants programmed into one package.
///
/// Populated by the external policy source after probing and before programming. Every
/// feature is independent: `None` (or `false`) leaves the corresponding hardware untouched.
/// The default value programs nothing.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct PackagePolicy {
    /// Forces every per-core-count turbo ratio limit to this ratio.
    pub forced_max_turbo_ratio: Option<u8>,

    /// Configurable TDP level to select. Never applied if the level control is already locked.
    pub ctdp_level: Option<u8>,

    /// Package PL1/PL2 limits programmed through the model-specific register.
    pub pl12_msr: Option<Pl12Policy>,

    /// Package PL1/PL2 limits programmed through the memory-mapped mirror.
    pub pl12_mmio: Option<Pl12Policy>,

    /// Platform PL3 limit.
    pub pl3: Option<Pl3Policy>,

    /// Platform PL4 peak current limit.
    pub pl4: Option<Pl4Policy>,

    /// Power plane 0 (core domain) limit.
    pub pp0: Option<Pp0Policy>,

    /// Which programmed features to lock until the next power cycle.
    pub locks: LockPolicy,
}

impl PackagePolicy {
    /// Whether the policy programs any overclocking-related setting of the package itself.
    /// Per-domain V/F targets are tracked on the domains.
    #[must_use]
    pub fn programs_turbo_ratio(&self) -> bool {
        self.forced_max_turbo_ratio.is_some()
    }
}

/// Sustained (PL1) and burst (PL2) package power limits.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub struct Pl12Policy {
    /// Sets the PL1 enable bit.
    pub enable_pl1: bool,

    /// Sets the PL2 enable bit.
    pub enable_pl2: bool,

    /// Clamps requested values to the probed power range and maximum time window, and sets the
    /// hardware clamping bits. Without it the requested values are written unmodified.
    pub clamp: bool,

    /// PL1 averaging time window. `None` keeps the current window.
    pub time_window: Option<Milliseconds>,

    /// PL1 power. `None` keeps the current value.
    pub pl1: Option<Milliwatts>,

    /// PL2 power. `None` keeps the current value.
    pub pl2: Option<Milliwatts>,
}

impl Pl12Policy {
    /// Creates a policy that enables and programs both limits, with clamping.
    #[must_use]
    pub fn new(pl1: Milliwatts, pl2: Milliwatts) -> Self {
        Self {
            enable_pl1: true,
            enable_pl2: true,
            clamp: true,
            time_window: None,
            pl1: Some(pl1),
            pl2: Some(pl2),
        }
    }
}

/// Platform tertiary power limit (PL3).
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub struct Pl3Policy {
    /// Sets the PL3 enable bit.
    pub enable: bool,

    /// Time window. `None` keeps the current window.
    pub time_window: Option<Milliseconds>,

    /// Power. `None` keeps the current value.
    pub power: Option<Milliwatts>,
}

impl Pl3Policy {
    /// Creates a policy that enables and programs PL3.
    #[must_use]
    pub fn new(power: Milliwatts, time_window: Milliseconds) -> Self {
        Self {
            enable: true,
            time_window: Some(time_window),
            power: Some(power),
        }
    }
}

/// Platform peak current limit (PL4).
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub struct Pl4Policy {
    /// Applies `current`. When disabled, the limit is opened to the largest encodable value.
    pub enable: bool,

    /// Peak current.
    pub current: Milliamps,
}

impl Pl4Policy {
    /// Creates a policy that enables and programs PL4.
    #[must_use]
    pub fn new(current: Milliamps) -> Self {
        Self {
            enable: true,
            current,
        }
    }
}

/// Power plane 0 (core domain only) power limit.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub struct Pp0Policy {
    /// Sets the PP0 enable bit.
    pub enable: bool,

    /// Clamps requested values to the probed range and sets the hardware clamping bit.
    pub clamp: bool,

    /// Time window. `None` keeps the current window.
    pub time_window: Option<Milliseconds>,

    /// Power. `None` keeps the current value.
    pub power: Option<Milliwatts>,
}

impl Pp0Policy {
    /// Creates a policy that enables and programs PP0, with clamping.
    #[must_use]
    pub fn new(power: Milliwatts) -> Self {
        Self {
            enable: true,
            clamp: true,
            time_window: None,
            power: Some(power),
        }
    }
}

/// Lock flags. Register-file locks are only applied to features that were programmed; the
/// memory-mapped lock is applied whenever requested.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub struct LockPolicy {
    /// Locks `PKG_POWER_LIMIT` (requires `pl12_msr`).
    pub pl12_msr: bool,

    /// Locks the memory-mapped PL1/PL2 mirror.
    pub pl12_mmio: bool,

    /// Locks PL3 (requires `pl3`).
    pub pl3: bool,

    /// Locks PP0 (requires `pp0`).
    pub pp0: bool,

    /// Locks the configurable TDP level control (requires `ctdp_level`).
    pub ctdp_control: bool,
}
