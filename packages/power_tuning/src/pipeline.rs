//! The four programming stages and their orchestration across the platform.
//!
//! Each stage finishes on every targeted processor before the next one starts. Within a stage,
//! features are programmed best-effort: a failed feature is recorded and the remaining features
//! are still attempted.

use log::{info, warn};

use crate::accessors::{
    lock_config_tdp, lock_overclocking, lock_pkg_power_limit, lock_pkg_power_limit_mmio, lock_pl3,
    lock_pp0, modify_mmio, modify_msr, write_config_tdp_level, write_forced_turbo_ratio,
};
use crate::dispatch::{run_on, run_on_all};
use crate::error::Result;
use crate::mailbox::{write_icc_max, write_vf};
use crate::power_limits::{apply_pl3, apply_pl4, apply_pl12, apply_pp0};
use crate::{
    CpuProfile, Dispatcher, Domain, Error, Failure, Feature, MmioRegister, Msr, Package,
    PackageId, PackageProbe, PipelineReport, Platform, ProcessorIndex, RegisterAccess, Stage,
    StageReport, VfSettings, VfTarget,
};

/// Collects the failures of the procedure running on one processor.
struct Recorder {
    stage: Stage,
    package: Option<PackageId>,
    processor: Option<ProcessorIndex>,
    failures: Vec<Failure>,
}

impl Recorder {
    fn new(stage: Stage, package: &Package, processor: ProcessorIndex) -> Self {
        Self {
            stage,
            package: Some(package.id()),
            processor: Some(processor),
            failures: Vec::new(),
        }
    }

    fn record(&mut self, feature: Feature, result: Result<()>) {
        if let Err(error) = result {
            self.failures.push(Failure {
                stage: self.stage,
                feature,
                package: self.package,
                processor: self.processor,
                error,
            });
        }
    }
}

/// Stage A: everything programmed through the register file of one processor.
fn program_core<R>(
    registers: &R,
    profile: CpuProfile,
    package: &Package,
    probe: &PackageProbe,
    recorder: &mut Recorder,
) where
    R: RegisterAccess + ?Sized,
{
    let policy = package.policy();

    if let Some(ratio) = policy.forced_max_turbo_ratio {
        recorder.record(
            Feature::TurboRatio,
            write_forced_turbo_ratio(registers, ratio),
        );
    }

    for domain in package.domains() {
        if let Some(target) = domain.target() {
            // A domain that could not be probed has no settings to build the target on.
            let result = domain.probe_error().map_or_else(
                || program_domain(registers, profile, domain, target),
                |error| Err(error.clone()),
            );

            recorder.record(Feature::VoltageFrequency(domain.kind()), result);
        }
    }

    if let Some(level) = policy.ctdp_level {
        recorder.record(Feature::ConfigTdp, write_config_tdp_level(registers, level));
    }

    if let Some(pl12) = &policy.pl12_msr {
        recorder.record(
            Feature::Pl12,
            modify_msr(registers, Msr::PkgPowerLimit, |current| {
                apply_pl12(current, pl12, probe.units, &probe.power_info)
            }),
        );
    }

    if let Some(pl3) = &policy.pl3 {
        recorder.record(
            Feature::Pl3,
            modify_msr(registers, Msr::Pl3Control, |current| {
                apply_pl3(current, pl3, probe.units)
            }),
        );
    }

    if let Some(pl4) = policy.pl4 {
        recorder.record(
            Feature::Pl4,
            modify_msr(registers, Msr::VrCurrentConfig, |current| {
                apply_pl4(current, pl4)
            }),
        );
    }

    if let Some(pp0) = &policy.pp0 {
        recorder.record(
            Feature::Pp0,
            modify_msr(registers, Msr::Pp0PowerLimit, |current| {
                apply_pp0(current, pp0, probe.units, &probe.power_info)
            }),
        );
    }
}

/// Writes the V/F target of one domain on top of its probed settings.
fn program_domain<R>(
    registers: &R,
    profile: CpuProfile,
    domain: &Domain,
    target: &VfTarget,
) -> Result<()>
where
    R: RegisterAccess + ?Sized,
{
    let kind = domain.kind();

    if target.max_ratio.is_some() || target.voltage.is_some() {
        let mut settings = *domain.current();

        if let Some(ratio) = target.max_ratio {
            settings.max_ratio = ratio;
        }

        if let Some(voltage) = target.voltage {
            settings.mode = voltage.mode;
            settings.target_voltage = voltage.target_voltage;
            settings.voltage_offset = voltage.voltage_offset;
        }

        write_vf(registers, kind, 0, &settings)?;
    }

    for &(point, offset) in &target.point_offsets {
        let exposed = domain.capability().vf_points;

        let current = point
            .checked_sub(1)
            .and_then(|position| domain.points().get(usize::from(position)))
            .ok_or(Error::UnsupportedVfPoint {
                domain: kind,
                point,
                exposed,
            })?;

        let settings = VfSettings {
            voltage_offset: offset,
            ..*current
        };

        write_vf(registers, kind, point, &settings)?;
    }

    if let Some(icc_max) = target.icc_max {
        write_icc_max(registers, kind, profile, icc_max)?;
    }

    Ok(())
}

/// Stage B: memory-mapped programming, once per package.
fn program_package<R>(
    registers: &R,
    package: &Package,
    probe: &PackageProbe,
    recorder: &mut Recorder,
) where
    R: RegisterAccess + ?Sized,
{
    if let Some(pl12) = &package.policy().pl12_mmio {
        recorder.record(
            Feature::Pl12Mmio,
            modify_mmio(registers, MmioRegister::PkgPowerLimit, |current| {
                apply_pl12(current, pl12, probe.units, &probe.power_info)
            }),
        );
    }
}

/// Stage C: register-file locks of one processor, for the features that were programmed.
fn lock_core<R>(registers: &R, package: &Package, recorder: &mut Recorder)
where
    R: RegisterAccess + ?Sized,
{
    let policy = package.policy();
    let locks = &policy.locks;

    if policy.pl12_msr.is_some() && locks.pl12_msr {
        recorder.record(Feature::Pl12Lock, lock_pkg_power_limit(registers));
    }

    if policy.pl3.is_some() && locks.pl3 {
        recorder.record(Feature::Pl3Lock, lock_pl3(registers));
    }

    if policy.pp0.is_some() && locks.pp0 {
        recorder.record(Feature::Pp0Lock, lock_pp0(registers));
    }

    if policy.ctdp_level.is_some() && locks.ctdp_control {
        recorder.record(Feature::ConfigTdpLock, lock_config_tdp(registers));
    }

    if policy.programs_turbo_ratio() || package.programs_vf() {
        recorder.record(Feature::OverclockingLock, lock_overclocking(registers));
    }
}

/// Stage D: the memory-mapped lock, once per package.
fn lock_package<R>(registers: &R, package: &Package, recorder: &mut Recorder)
where
    R: RegisterAccess + ?Sized,
{
    if package.policy().locks.pl12_mmio {
        recorder.record(Feature::Pl12MmioLock, lock_pkg_power_limit_mmio(registers));
    }
}

/// Runs `work` on `processor` and files its failures, or the dispatch failure, into `report`.
fn dispatch_recorded<D, F>(
    dispatcher: &D,
    report: &mut StageReport,
    package: &Package,
    processor: ProcessorIndex,
    work: F,
) where
    D: Dispatcher + ?Sized,
    F: FnOnce(&mut Recorder) + Send,
{
    let stage = report.stage();

    match run_on(dispatcher, processor, || {
        let mut recorder = Recorder::new(stage, package, processor);
        work(&mut recorder);
        recorder.failures
    }) {
        Ok(failures) => report.extend(failures),
        Err(error) => report.extend([Failure {
            stage,
            feature: Feature::Dispatch,
            package: Some(package.id()),
            processor: Some(processor),
            error,
        }]),
    }
}

/// Looks up the probe of every package, failing if any package was never probed.
fn probes(platform: &Platform) -> Result<Vec<(&Package, &PackageProbe)>> {
    platform
        .packages()
        .iter()
        .map(|package| {
            package
                .probe()
                .map(|probe| (package, probe))
                .ok_or(Error::NotProbed {
                    package: package.id(),
                })
        })
        .collect()
}

fn log_stage(report: &StageReport) {
    if report.is_success() {
        info!("{} completed", report.stage());
    } else {
        for failure in report.failures() {
            warn!("{failure}");
        }

        info!(
            "{} completed with {} failure(s)",
            report.stage(),
            report.failures().len()
        );
    }
}

/// Runs all four stages across the platform.
///
/// Every stage completes on every targeted processor of every package before the next stage
/// starts, so no lock is applied before all programming is done. Fails without touching any
/// register if a package was never probed.
pub(crate) fn program_platform<D, R>(
    dispatcher: &D,
    registers: &R,
    profile: CpuProfile,
    platform: &Platform,
) -> Result<PipelineReport>
where
    D: Dispatcher + Sync + ?Sized,
    R: RegisterAccess + Sync + ?Sized,
{
    let packages = probes(platform)?;

    let mut program_cores = StageReport::new(Stage::ProgramCores);
    for &(package, probe) in &packages {
        for core in package.cores().iter() {
            dispatch_recorded(dispatcher, &mut program_cores, package, core.index(), |recorder| {
                program_core(registers, profile, package, probe, recorder);
            });
        }
    }
    log_stage(&program_cores);

    let mut program_packages = StageReport::new(Stage::ProgramPackages);
    for &(package, probe) in &packages {
        dispatch_recorded(
            dispatcher,
            &mut program_packages,
            package,
            package.representative(),
            |recorder| program_package(registers, package, probe, recorder),
        );
    }
    log_stage(&program_packages);

    let mut lock_cores = StageReport::new(Stage::LockCores);
    let (failures, result) = run_on_all(dispatcher, || {
        let processor = match dispatcher.who_am_i() {
            Ok(processor) => processor,
            Err(status) => {
                return vec![Failure {
                    stage: Stage::LockCores,
                    feature: Feature::Dispatch,
                    package: None,
                    processor: None,
                    error: Error::Enumeration {
                        operation: "current processor query",
                        status,
                    },
                }];
            }
        };

        // Processors that were not enabled at discovery have no package and nothing to lock.
        let Some(package) = platform.package_of(processor) else {
            return Vec::new();
        };

        let mut recorder = Recorder::new(Stage::LockCores, package, processor);
        lock_core(registers, package, &mut recorder);
        recorder.failures
    });
    lock_cores.extend(failures);
    if let Err(error) = result {
        lock_cores.extend([Failure {
            stage: Stage::LockCores,
            feature: Feature::Dispatch,
            package: None,
            processor: None,
            error,
        }]);
    }
    log_stage(&lock_cores);

    let mut lock_packages = StageReport::new(Stage::LockPackages);
    for &(package, _) in &packages {
        dispatch_recorded(
            dispatcher,
            &mut lock_packages,
            package,
            package.representative(),
            |recorder| lock_package(registers, package, recorder),
        );
    }
    log_stage(&lock_packages);

    Ok(PipelineReport::new(vec![
        program_cores,
        program_packages,
        lock_cores,
        lock_packages,
    ]))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use mockall::predicate::eq;

    use super::*;
    use crate::hal::MockRegisterAccess;
    use crate::mailbox::{WRITE_VF, encode_request, encode_vf};
    use crate::{DomainKind, IccMax, Millivolts, VfCapability, VoltageMode, VoltageTarget};

    fn probed_domain() -> Domain {
        let mut domain = Domain::new(DomainKind::IaCore);
        domain.record_probe(
            VfCapability {
                max_oc_ratio: 55,
                ratio_unlocked: true,
                voltage_override: true,
                voltage_offset: true,
                vf_points: 2,
            },
            VfSettings {
                max_ratio: 45,
                mode: VoltageMode::Adaptive,
                target_voltage: Millivolts(0),
                voltage_offset: Millivolts(-10),
            },
            vec![VfSettings::default(); 2],
            IccMax::Unlimited,
        );
        domain
    }

    #[test]
    fn domain_target_overrides_only_requested_fields() {
        let domain = probed_domain();
        let target = VfTarget {
            max_ratio: Some(50),
            ..VfTarget::default()
        };

        let expected = VfSettings {
            max_ratio: 50,
            ..*domain.current()
        };

        let mut registers = MockRegisterAccess::new();
        registers.expect_read_msr().returning(|_| Ok(0));
        registers
            .expect_write_msr()
            .with(
                eq(Msr::OcMailbox),
                eq(encode_request(WRITE_VF, DomainKind::IaCore, 0, encode_vf(&expected))),
            )
            .times(1)
            .returning(|_, _| Ok(()));

        program_domain(&registers, CpuProfile::default(), &domain, &target).unwrap();
    }

    #[test]
    fn voltage_target_replaces_mode_and_voltages() {
        let domain = probed_domain();
        let target = VfTarget {
            voltage: Some(VoltageTarget {
                mode: VoltageMode::Override,
                target_voltage: Millivolts(1_200),
                voltage_offset: Millivolts(0),
            }),
            ..VfTarget::default()
        };

        let expected = VfSettings {
            max_ratio: 45,
            mode: VoltageMode::Override,
            target_voltage: Millivolts(1_200),
            voltage_offset: Millivolts(0),
        };

        let mut registers = MockRegisterAccess::new();
        registers.expect_read_msr().returning(|_| Ok(0));
        registers
            .expect_write_msr()
            .with(
                eq(Msr::OcMailbox),
                eq(encode_request(WRITE_VF, DomainKind::IaCore, 0, encode_vf(&expected))),
            )
            .times(1)
            .returning(|_, _| Ok(()));

        program_domain(&registers, CpuProfile::default(), &domain, &target).unwrap();
    }

    #[test]
    fn point_offsets_outside_the_curve_are_rejected_without_writing() {
        let domain = probed_domain();

        let mut registers = MockRegisterAccess::new();
        registers.expect_write_msr().never();

        for point in [0, 3] {
            let target = VfTarget {
                point_offsets: vec![(point, Millivolts(-5))],
                ..VfTarget::default()
            };

            let result = program_domain(&registers, CpuProfile::default(), &domain, &target);

            assert!(matches!(
                result,
                Err(Error::UnsupportedVfPoint { exposed: 2, .. })
            ));
        }
    }

    #[test]
    fn recorder_keeps_only_failures() {
        let mut recorder = Recorder {
            stage: Stage::ProgramCores,
            package: Some(1),
            processor: Some(5),
            failures: Vec::new(),
        };

        recorder.record(Feature::Pl4, Ok(()));
        recorder.record(Feature::Pl3, Err(Error::ConfigTdpLocked));

        assert_eq!(recorder.failures.len(), 1);
        let failure = recorder.failures.first().unwrap();
        assert_eq!(failure.feature(), Feature::Pl3);
        assert_eq!(failure.package(), Some(1));
        assert_eq!(failure.processor(), Some(5));
    }
}
