use std::fmt;

use derive_more::derive::Display;
use itertools::Itertools;
use smallvec::SmallVec;

use crate::{DomainKind, Error, PackageId, ProcessorIndex};

/// The programming stages, in the order they run.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[non_exhaustive]
pub enum Stage {
    /// Register-file programming on every processor of every package.
    #[display("register-file programming")]
    ProgramCores,

    /// Memory-mapped programming on each package's representative processor.
    #[display("memory-mapped programming")]
    ProgramPackages,

    /// Register-file locks, broadcast to every processor.
    #[display("register-file locks")]
    LockCores,

    /// Memory-mapped locks on each package's representative processor.
    #[display("memory-mapped locks")]
    LockPackages,
}

impl Stage {
    /// Every stage, in execution order.
    pub const ALL: [Self; 4] = [
        Self::ProgramCores,
        Self::ProgramPackages,
        Self::LockCores,
        Self::LockPackages,
    ];
}

/// A unit of programming work whose failure is reported on its own.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum Feature {
    /// Dispatching the stage's procedure to a processor.
    #[display("dispatch")]
    Dispatch,

    /// Forced maximum turbo ratio.
    #[display("turbo ratio")]
    TurboRatio,

    /// Voltage/frequency override of a domain.
    #[display("{_0} V/F override")]
    VoltageFrequency(DomainKind),

    /// Configurable TDP level.
    #[display("configurable TDP level")]
    ConfigTdp,

    /// PL1/PL2 through the model-specific register.
    #[display("PL1/PL2")]
    Pl12,

    /// PL1/PL2 through the memory-mapped mirror.
    #[display("memory-mapped PL1/PL2")]
    Pl12Mmio,

    /// PL3.
    #[display("PL3")]
    Pl3,

    /// PL4.
    #[display("PL4")]
    Pl4,

    /// PP0.
    #[display("PP0")]
    Pp0,

    /// PL1/PL2 lock.
    #[display("PL1/PL2 lock")]
    Pl12Lock,

    /// PL3 lock.
    #[display("PL3 lock")]
    Pl3Lock,

    /// PP0 lock.
    #[display("PP0 lock")]
    Pp0Lock,

    /// Configurable TDP control lock.
    #[display("configurable TDP lock")]
    ConfigTdpLock,

    /// Overclocking lock.
    #[display("overclocking lock")]
    OverclockingLock,

    /// Memory-mapped PL1/PL2 lock.
    #[display("memory-mapped PL1/PL2 lock")]
    Pl12MmioLock,
}

/// One feature that could not be programmed.
#[derive(Debug)]
pub struct Failure {
    pub(crate) stage: Stage,
    pub(crate) feature: Feature,
    pub(crate) package: Option<PackageId>,
    pub(crate) processor: Option<ProcessorIndex>,
    pub(crate) error: Error,
}

impl Failure {
    /// The stage the failure happened in.
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The feature that failed.
    #[must_use]
    pub fn feature(&self) -> Feature {
        self.feature
    }

    /// The package being programmed, if known.
    #[must_use]
    pub fn package(&self) -> Option<PackageId> {
        self.package
    }

    /// The processor the failure happened on, if it happened on a specific one.
    #[must_use]
    pub fn processor(&self) -> Option<ProcessorIndex> {
        self.processor
    }

    /// What went wrong.
    #[must_use]
    pub fn error(&self) -> &Error {
        &self.error
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.feature)?;

        if let Some(package) = self.package {
            write!(f, " on package {package}")?;
        }

        if let Some(processor) = self.processor {
            write!(f, " processor {processor}")?;
        }

        write!(f, " failed: {}", self.error)
    }
}

/// The outcome of one stage.
#[derive(Debug)]
pub struct StageReport {
    stage: Stage,
    failures: SmallVec<[Failure; 2]>,
}

impl StageReport {
    pub(crate) fn new(stage: Stage) -> Self {
        Self {
            stage,
            failures: SmallVec::new(),
        }
    }

    /// Which stage this is.
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Whether every feature of the stage was programmed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// The features that could not be programmed, in the order they failed.
    #[must_use]
    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    pub(crate) fn extend(&mut self, failures: impl IntoIterator<Item = Failure>) {
        self.failures.extend(failures);
    }
}

/// The outcome of the whole programming pipeline.
///
/// Programming is best-effort: a failed feature does not prevent other features or later stages
/// from running, so a report with failures still means every stage ran.
#[derive(Debug)]
pub struct PipelineReport {
    stages: Vec<StageReport>,
}

impl PipelineReport {
    pub(crate) fn new(stages: Vec<StageReport>) -> Self {
        Self { stages }
    }

    /// The stage reports, in execution order.
    #[must_use]
    pub fn stages(&self) -> &[StageReport] {
        &self.stages
    }

    /// The report of the given stage.
    #[must_use]
    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|report| report.stage == stage)
    }

    /// Whether every requested feature was programmed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.stages.iter().all(StageReport::is_success)
    }

    /// Every failure across all stages, in execution order.
    pub fn failures(&self) -> impl Iterator<Item = &Failure> {
        self.stages.iter().flat_map(|report| report.failures.iter())
    }

    /// The first failure, if any.
    #[must_use]
    pub fn first_failure(&self) -> Option<&Failure> {
        self.failures().next()
    }
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_success() {
            return write!(f, "all {} stages completed", self.stages.len());
        }

        write!(
            f,
            "all {} stages completed with {} failure(s): {}",
            self.stages.len(),
            self.failures().count(),
            self.failures().join("; ")
        )
    }
}
