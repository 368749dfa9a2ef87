use derive_more::derive::Display;

use crate::{Error, Milliamps, Millivolts};

/// A voltage/frequency-tunable unit inside a package.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum DomainKind {
    /// The compute cores.
    #[display("core")]
    IaCore,

    /// The uncore ring (cache/interconnect).
    #[display("ring")]
    Ring,
}

impl DomainKind {
    /// Every domain this crate probes and programs, in programming order.
    pub const ALL: [Self; 2] = [Self::IaCore, Self::Ring];

    /// The domain selector used by the overclocking mailbox.
    #[must_use]
    pub const fn mailbox_id(self) -> u8 {
        match self {
            Self::IaCore => 0,
            Self::Ring => 2,
        }
    }
}

/// How the domain's voltage is controlled.
#[derive(Clone, Copy, Debug, Default, Display, Eq, Hash, PartialEq)]
#[expect(
    clippy::exhaustive_enums,
    reason = "mirroring the single mode bit of the hardware interface"
)]
pub enum VoltageMode {
    /// The processor interpolates voltage along its V/F curve, applying the offset.
    #[default]
    #[display("adaptive")]
    Adaptive,

    /// A fixed target voltage replaces the V/F curve.
    #[display("override")]
    Override,
}

/// Overclocking capabilities of a domain.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub struct VfCapability {
    /// Highest ratio the domain may be overclocked to.
    pub max_oc_ratio: u8,

    /// Whether the ratio may be raised above its stock maximum.
    pub ratio_unlocked: bool,

    /// Whether a fixed override voltage is supported.
    pub voltage_override: bool,

    /// Whether a voltage offset is supported.
    pub voltage_offset: bool,

    /// Number of individually tunable points on the V/F curve. Zero if the curve is not exposed.
    pub vf_points: u8,
}

/// The voltage/frequency operating settings of a domain or of one V/F curve point.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub struct VfSettings {
    /// Maximum ratio.
    pub max_ratio: u8,

    /// Voltage control mode.
    pub mode: VoltageMode,

    /// Target voltage, used in [`VoltageMode::Override`].
    pub target_voltage: Millivolts,

    /// Voltage offset applied to the curve.
    pub voltage_offset: Millivolts,
}

/// Maximum current the domain's voltage regulator may deliver.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[expect(
    clippy::exhaustive_enums,
    reason = "the hardware has exactly these two encodings"
)]
pub enum IccMax {
    /// A specific current limit.
    Limit(Milliamps),

    /// No current limit. Only supported on processors that have the dedicated flag.
    Unlimited,
}

/// Target values for one domain, set by the operator policy.
///
/// Only the fields that are `Some` (or non-empty) are written.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[expect(
    clippy::exhaustive_structs,
    reason = "the policy source builds targets with struct update syntax"
)]
pub struct VfTarget {
    /// Maximum ratio.
    pub max_ratio: Option<u8>,

    /// Voltage mode, target voltage and offset for the whole domain.
    pub voltage: Option<VoltageTarget>,

    /// Per-point voltage offsets on the V/F curve, as (1-based point index, offset) pairs.
    pub point_offsets: Vec<(u8, Millivolts)>,

    /// Voltage regulator current limit.
    pub icc_max: Option<IccMax>,
}

/// Requested voltage control for a domain.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[expect(
    clippy::exhaustive_structs,
    reason = "the policy source builds targets with struct update syntax"
)]
pub struct VoltageTarget {
    /// Voltage control mode.
    pub mode: VoltageMode,

    /// Target voltage, only meaningful in [`VoltageMode::Override`].
    pub target_voltage: Millivolts,

    /// Voltage offset.
    pub voltage_offset: Millivolts,
}

/// A voltage/frequency-tunable domain of a package: what the hardware reported and what the
/// policy wants.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Domain {
    kind: DomainKind,

    capability: VfCapability,
    current: VfSettings,
    points: Vec<VfSettings>,
    icc_max: Option<IccMax>,
    probe_error: Option<Error>,

    target: Option<VfTarget>,
}

impl Domain {
    pub(crate) fn new(kind: DomainKind) -> Self {
        Self {
            kind,
            capability: VfCapability::default(),
            current: VfSettings::default(),
            points: Vec::new(),
            icc_max: None,
            probe_error: None,
            target: None,
        }
    }

    /// Which domain this is.
    #[must_use]
    pub fn kind(&self) -> DomainKind {
        self.kind
    }

    /// Overclocking capabilities, as probed.
    #[must_use]
    pub fn capability(&self) -> &VfCapability {
        &self.capability
    }

    /// Domain-wide V/F settings, as probed.
    #[must_use]
    pub fn current(&self) -> &VfSettings {
        &self.current
    }

    /// Settings of each exposed V/F curve point, as probed. Index 0 is curve point 1.
    #[must_use]
    pub fn points(&self) -> &[VfSettings] {
        &self.points
    }

    /// Voltage regulator current limit, as probed. `None` if the domain has not been probed or
    /// probing it failed.
    #[must_use]
    pub fn icc_max(&self) -> Option<IccMax> {
        self.icc_max
    }

    /// Why probing this domain failed, if it did.
    ///
    /// A domain that failed to probe keeps default capabilities and settings. A target set on it
    /// is reported as a failure instead of being programmed.
    #[must_use]
    pub fn probe_error(&self) -> Option<&Error> {
        self.probe_error.as_ref()
    }

    /// The override requested by the policy, if any.
    #[must_use]
    pub fn target(&self) -> Option<&VfTarget> {
        self.target.as_ref()
    }

    /// Sets or clears the override requested by the policy.
    pub fn set_target(&mut self, target: Option<VfTarget>) {
        self.target = target;
    }

    pub(crate) fn record_probe(
        &mut self,
        capability: VfCapability,
        current: VfSettings,
        points: Vec<VfSettings>,
        icc_max: IccMax,
    ) {
        self.capability = capability;
        self.current = current;
        self.points = points;
        self.icc_max = Some(icc_max);
        self.probe_error = None;
    }

    pub(crate) fn record_probe_failure(&mut self, error: Error) {
        self.capability = VfCapability::default();
        self.current = VfSettings::default();
        self.points.clear();
        self.icc_max = None;
        self.probe_error = Some(error);
    }
}
