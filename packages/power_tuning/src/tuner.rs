use log::{error, info};

use crate::error::Result;
use crate::pipeline::program_platform;
use crate::probe::probe_platform;
use crate::topology::discover;
use crate::{CpuProfile, Dispatcher, PipelineReport, Platform, RegisterAccess, TopologyLimits};

/// Discovers, probes and programs the processors of the machine.
///
/// The tuner owns the two firmware capabilities it depends on: a [`Dispatcher`] that runs
/// procedures on specific processors and a [`RegisterAccess`] that reads and writes registers
/// of whichever processor it is called on. Both are injected so that tests can substitute a
/// simulated machine (see the `fake` module, available with the `test-util` feature).
///
/// # Example
///
/// ```
/// use power_tuning::fake::MachineBuilder;
/// use power_tuning::{Milliwatts, Pl12Policy, Tuner};
/// use new_zealand::nz;
///
/// let machine = MachineBuilder::from_counts(nz!(1), nz!(4), nz!(2)).build();
/// let tuner = Tuner::new(&machine, &machine);
///
/// let mut platform = tuner.bring_up()?;
///
/// for package in platform.packages_mut() {
///     package.policy_mut().pl12_msr = Some(Pl12Policy::new(
///         Milliwatts::from_watts(45),
///         Milliwatts::from_watts(65),
///     ));
/// }
///
/// let report = tuner.program(&platform)?;
/// assert!(report.is_success());
/// # Ok::<(), power_tuning::Error>(())
/// ```
#[derive(Debug)]
pub struct Tuner<D, R> {
    dispatcher: D,
    registers: R,
    profile: CpuProfile,
    limits: TopologyLimits,
}

impl<D, R> Tuner<D, R>
where
    D: Dispatcher + Sync,
    R: RegisterAccess + Sync,
{
    /// Creates a tuner with the default CPU profile and topology limits.
    #[must_use]
    pub fn new(dispatcher: D, registers: R) -> Self {
        Self {
            dispatcher,
            registers,
            profile: CpuProfile::default(),
            limits: TopologyLimits::default(),
        }
    }

    /// Sets the microarchitecture-specific register encodings to use.
    #[must_use]
    pub fn with_profile(mut self, profile: CpuProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Sets the upper bounds on the discovered topology.
    #[must_use]
    pub fn with_limits(mut self, limits: TopologyLimits) -> Self {
        self.limits = limits;
        self
    }

    /// The microarchitecture-specific register encodings in use.
    #[must_use]
    pub fn profile(&self) -> &CpuProfile {
        &self.profile
    }

    /// Discovers the topology and probes every package.
    ///
    /// After this returns, the caller fills in the package policies and domain targets and
    /// then calls [`program()`][Self::program].
    ///
    /// # Errors
    ///
    /// Returns the first discovery or probing failure. No register is written in either case.
    pub fn bring_up(&self) -> Result<Platform> {
        let mut platform = self.discover()?;
        self.probe(&mut platform)?;

        let core_types = if self.profile.has_efficiency_cores {
            "performance and efficiency"
        } else {
            "uniform"
        };

        info!(
            "power tuning brought up {} package(s) with {core_types} cores",
            platform.package_count()
        );

        Ok(platform)
    }

    /// Discovers the topology without probing it.
    ///
    /// # Errors
    ///
    /// Returns an error if a dispatcher query fails, no processor is enabled or the topology
    /// exceeds the configured limits.
    pub fn discover(&self) -> Result<Platform> {
        discover(&self.dispatcher, &self.limits)
            .inspect_err(|error| error!("topology discovery failed: {error}"))
    }

    /// Probes every package of a discovered platform on its representative processor.
    ///
    /// # Errors
    ///
    /// Returns the first failure. Packages probed before the failure keep their results.
    pub fn probe(&self, platform: &mut Platform) -> Result<()> {
        probe_platform(&self.dispatcher, &self.registers, self.profile, platform)
    }

    /// Applies the package policies to hardware.
    ///
    /// Runs register-file programming on every processor, then memory-mapped programming on
    /// every package, then register-file locks on every processor and finally memory-mapped
    /// locks on every package. Failures of individual features are collected in the returned
    /// report and do not stop the remaining work.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotProbed`][crate::Error::NotProbed] before writing anything if a package
    /// was never probed.
    pub fn program(&self, platform: &Platform) -> Result<PipelineReport> {
        let report = program_platform(&self.dispatcher, &self.registers, self.profile, platform)?;

        if report.is_success() {
            info!("power tuning programming completed");
        } else {
            error!("power tuning programming finished with failures: {report}");
        }

        Ok(report)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;

    use super::*;
    use crate::fake::MachineBuilder;
    use crate::{Error, Milliamps, Pl4Policy, Status};

    #[test]
    fn bring_up_discovers_and_probes() {
        let machine = MachineBuilder::from_counts(nz!(2), nz!(2), nz!(1)).build();
        let tuner = Tuner::new(&machine, &machine);

        let platform = tuner.bring_up().unwrap();

        assert_eq!(platform.package_count(), 2);
        assert!(platform.packages().iter().all(|package| package.probe().is_some()));
    }

    #[test]
    fn bring_up_with_efficiency_cores() {
        let machine = MachineBuilder::from_counts(nz!(1), nz!(4), nz!(1))
            .profile(CpuProfile::alder_lake())
            .build();
        let tuner = Tuner::new(&machine, &machine).with_profile(CpuProfile::alder_lake());

        let platform = tuner.bring_up().unwrap();

        assert!(tuner.profile().has_efficiency_cores);
        assert!(platform.packages().first().probe().is_some());
    }

    #[test]
    fn discover_does_not_probe() {
        let machine = MachineBuilder::from_counts(nz!(1), nz!(2), nz!(1)).build();
        let tuner = Tuner::new(&machine, &machine);

        let platform = tuner.discover().unwrap();

        assert!(platform.packages().first().probe().is_none());
    }

    #[test]
    fn program_requires_probe() {
        let machine = MachineBuilder::from_counts(nz!(1), nz!(2), nz!(1)).build();
        let tuner = Tuner::new(&machine, &machine);

        let mut platform = tuner.discover().unwrap();
        if let Some(package) = platform.packages_mut().next() {
            package.policy_mut().pl4 = Some(Pl4Policy::new(Milliamps::from_amps(150)));
        }
        machine.clear_events();

        let result = tuner.program(&platform);

        assert!(matches!(result, Err(Error::NotProbed { package: 0 })));
        assert_eq!(machine.write_count(), 0);
    }

    #[test]
    fn limits_are_applied() {
        let machine = MachineBuilder::from_counts(nz!(2), nz!(1), nz!(1)).build();
        let tuner = Tuner::new(&machine, &machine)
            .with_limits(TopologyLimits::new(nz!(1), nz!(4)));

        assert!(matches!(
            tuner.bring_up(),
            Err(Error::CapacityExceeded { capacity: 1, .. })
        ));
    }

    #[test]
    fn dispatch_failure_is_fatal_during_probe() {
        let machine = MachineBuilder::from_counts(nz!(1), nz!(2), nz!(1))
            .fail_dispatch(0, Status(0x8000_0006))
            .build();
        let tuner = Tuner::new(&machine, &machine).with_profile(CpuProfile::alder_lake());

        assert!(matches!(
            tuner.bring_up(),
            Err(Error::Dispatch {
                processor: 0,
                status: Status(0x8000_0006)
            })
        ));
        assert_eq!(tuner.profile(), &CpuProfile::alder_lake());
    }
}
