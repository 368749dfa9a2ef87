//! Reading package-scoped capabilities and per-domain V/F state from hardware.

use log::{debug, error, warn};

use crate::accessors::{
    read_config_tdp, read_cpu_signature, read_pkg_power_limit, read_power_info, read_power_units,
    read_turbo_ratio_limits,
};
use crate::dispatch::run_on;
use crate::error::Result;
use crate::mailbox::{read_capability, read_icc_max, read_vf};
use crate::{
    ConfigTdp, CpuProfile, CpuSignature, Dispatcher, DomainKind, IccMax, PkgPowerLimit, Platform,
    PowerInfo, PowerUnits, RegisterAccess, TurboRatioLimits, VfCapability, VfSettings,
};

/// Package-scoped capabilities read from the representative processor of a package.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub struct PackageProbe {
    /// Processor version signature.
    pub signature: CpuSignature,

    /// Turbo ratio limits. Assumed identical on every package.
    pub turbo_ratio_limits: TurboRatioLimits,

    /// Configurable TDP levels and lock state.
    pub config_tdp: ConfigTdp,

    /// Contents of `PKG_POWER_LIMIT` before programming.
    pub power_limit: PkgPowerLimit,

    /// Allowed power range and maximum time window.
    pub power_info: PowerInfo,

    /// Scaling units for converting physical values to register fields.
    pub units: PowerUnits,
}

/// What was read from one domain.
#[derive(Clone, Debug)]
pub(crate) struct DomainProbe {
    pub(crate) capability: VfCapability,
    pub(crate) current: VfSettings,
    pub(crate) points: Vec<VfSettings>,
    pub(crate) icc_max: IccMax,
}

/// Reads everything package-scoped. Must run on a processor of the package.
pub(crate) fn probe_package<R>(registers: &R) -> Result<PackageProbe>
where
    R: RegisterAccess + ?Sized,
{
    Ok(PackageProbe {
        signature: read_cpu_signature(registers)?,
        turbo_ratio_limits: read_turbo_ratio_limits(registers)?,
        config_tdp: read_config_tdp(registers)?,
        power_limit: read_pkg_power_limit(registers)?,
        power_info: read_power_info(registers)?,
        units: read_power_units(registers)?,
    })
}

/// Reads capability and V/F state of one domain through the overclocking mailbox.
pub(crate) fn probe_domain<R>(
    registers: &R,
    kind: DomainKind,
    profile: CpuProfile,
) -> Result<DomainProbe>
where
    R: RegisterAccess + ?Sized,
{
    let capability = read_capability(registers, kind, profile)?;
    let current = read_vf(registers, kind, 0)?;
    let points = (1..=capability.vf_points)
        .map(|point| read_vf(registers, kind, point))
        .collect::<Result<Vec<_>>>()?;
    let icc_max = read_icc_max(registers, kind, profile)?;

    Ok(DomainProbe {
        capability,
        current,
        points,
        icc_max,
    })
}

/// Probes every package on its representative processor and records the results in the
/// platform model.
///
/// A failure to read package-scoped state aborts probing. A domain that cannot be probed through
/// the mailbox is recorded as such on the domain and does not affect the rest of the package.
pub(crate) fn probe_platform<D, R>(
    dispatcher: &D,
    registers: &R,
    profile: CpuProfile,
    platform: &mut Platform,
) -> Result<()>
where
    D: Dispatcher + ?Sized,
    R: RegisterAccess + Sync + ?Sized,
{
    for package in platform.packages_mut() {
        let id = package.id();
        let representative = package.representative();

        let probed = run_on(
            dispatcher,
            representative,
            || -> Result<(PackageProbe, Vec<(DomainKind, Result<DomainProbe>)>)> {
                let probe = probe_package(registers)?;
                let domains = DomainKind::ALL
                    .iter()
                    .map(|&kind| (kind, probe_domain(registers, kind, profile)))
                    .collect();

                Ok((probe, domains))
            },
        )
        .and_then(|result| result)
        .inspect_err(|error| error!("probing package {id} failed: {error}"))?;

        let (probe, domains) = probed;

        debug!(
            "package {id}: {}, units {:?}, power info {:?}",
            probe.signature, probe.units, probe.power_info
        );

        for (kind, result) in domains {
            let Some(domain) = package.domain_mut(kind) else {
                continue;
            };

            match result {
                Ok(domain_probe) => domain.record_probe(
                    domain_probe.capability,
                    domain_probe.current,
                    domain_probe.points,
                    domain_probe.icc_max,
                ),
                Err(error) => {
                    warn!("probing {kind} domain of package {id} failed: {error}");
                    domain.record_probe_failure(error);
                }
            }
        }

        package.set_probe(probe);
    }

    Ok(())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use mockall::predicate::eq;
    use new_zealand::nz;

    use super::*;
    use crate::fake::{MachineBuilder, PackageBuilder};
    use crate::hal::MockRegisterAccess;
    use crate::{Error, Msr, Status, TopologyLimits, topology};

    #[test]
    fn package_probe_reads_every_group() {
        let mut registers = MockRegisterAccess::new();

        registers.expect_cpuid_version().returning(|| Ok(0x0009_0672));
        registers
            .expect_read_msr()
            .with(eq(Msr::TurboRatioLimit))
            .returning(|_| Ok(0x2D2D_2D2D_2F2F_3131));
        registers
            .expect_read_msr()
            .with(eq(Msr::PlatformInfo))
            .returning(|_| Ok(2 << 33));
        registers
            .expect_read_msr()
            .with(eq(Msr::ConfigTdpControl))
            .returning(|_| Ok(0));
        registers
            .expect_read_msr()
            .with(eq(Msr::PkgPowerLimit))
            .returning(|_| Ok(0x0042_81F8_00DD_8118));
        registers
            .expect_read_msr()
            .with(eq(Msr::PkgPowerInfo))
            .returning(|_| Ok(0x0012_0208_0078_0118));
        registers
            .expect_read_msr()
            .with(eq(Msr::RaplPowerUnit))
            .returning(|_| Ok(0x000A_0E03));

        let probe = probe_package(&registers).unwrap();

        assert_eq!(probe.signature.model(), 0x97);
        assert_eq!(probe.turbo_ratio_limits.max_ratio(), 0x31);
        assert_eq!(probe.config_tdp.max_level, 2);
        assert!(!probe.config_tdp.locked);
        assert_eq!(probe.power_limit.pl1.power, 0x118);
        assert_eq!(probe.power_info.max_power, 0x208);
        assert_eq!(probe.units.power_exponent(), 3);
    }

    #[test]
    fn package_probe_failure_names_register() {
        let mut registers = MockRegisterAccess::new();

        registers.expect_cpuid_version().returning(|| Ok(0x0009_0672));
        registers
            .expect_read_msr()
            .returning(|_| Err(Status(0x8000_0003)));

        let result = probe_package(&registers);

        assert!(matches!(
            result,
            Err(Error::Msr {
                msr: Msr::TurboRatioLimit,
                status: Status(0x8000_0003)
            })
        ));
    }

    #[test]
    fn platform_probe_fills_every_package_and_domain() {
        let machine = MachineBuilder::new()
            .package(PackageBuilder::new(nz!(2), nz!(2)).vf_capability(DomainKind::IaCore, 55))
            .package(PackageBuilder::new(nz!(2), nz!(2)))
            .profile(CpuProfile::alder_lake())
            .build();

        let mut platform = topology::discover(&machine, &TopologyLimits::default()).unwrap();
        probe_platform(&machine, &machine, CpuProfile::alder_lake(), &mut platform).unwrap();

        for package in platform.packages().iter() {
            assert!(package.probe().is_some());

            for domain in package.domains() {
                assert_eq!(domain.points().len(), 8);
                assert!(domain.icc_max().is_some());
            }
        }

        let core = platform
            .package(0)
            .unwrap()
            .domain(DomainKind::IaCore)
            .unwrap();
        assert_eq!(core.capability().max_oc_ratio, 55);
    }

    #[test]
    fn platform_probe_runs_on_representatives() {
        let machine = MachineBuilder::from_counts(nz!(2), nz!(2), nz!(2)).build();

        let mut platform = topology::discover(&machine, &TopologyLimits::default()).unwrap();
        machine.clear_events();
        probe_platform(&machine, &machine, CpuProfile::default(), &mut platform).unwrap();

        let mut processors: Vec<_> = machine.dispatched_processors();
        processors.dedup();
        assert_eq!(processors, [0, 4]);
    }

    #[test]
    fn package_read_failure_is_fatal() {
        let machine = MachineBuilder::from_counts(nz!(1), nz!(2), nz!(1))
            .fail_msr_read(0, Msr::RaplPowerUnit, Status(0x8000_0007))
            .build();

        let mut platform = topology::discover(&machine, &TopologyLimits::default()).unwrap();
        let result = probe_platform(&machine, &machine, CpuProfile::default(), &mut platform);

        assert!(matches!(
            result,
            Err(Error::Msr {
                msr: Msr::RaplPowerUnit,
                ..
            })
        ));
        assert!(platform.packages().first().probe().is_none());
    }

    #[test]
    fn domain_read_failure_is_recorded_on_the_domain() {
        let machine = MachineBuilder::from_counts(nz!(1), nz!(2), nz!(1))
            .fail_mailbox(DomainKind::Ring, 0x1F)
            .build();

        let mut platform = topology::discover(&machine, &TopologyLimits::default()).unwrap();
        probe_platform(&machine, &machine, CpuProfile::default(), &mut platform).unwrap();

        let package = platform.packages().first();
        assert!(package.probe().is_some());

        let core = package.domain(DomainKind::IaCore).unwrap();
        assert!(core.probe_error().is_none());
        assert!(core.icc_max().is_some());

        let ring = package.domain(DomainKind::Ring).unwrap();
        assert!(ring.icc_max().is_none());
        assert_eq!(ring.capability(), &VfCapability::default());
        assert!(matches!(
            ring.probe_error(),
            Some(Error::Mailbox {
                domain: DomainKind::Ring,
                code: 0x1F,
                ..
            })
        ));
    }
}
