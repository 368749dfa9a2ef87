//! The in-memory model of the machine: packages, their cores and domains, and how they were
//! discovered.

use std::num::NonZero;

use foldhash::{HashMap, HashMapExt};
use log::{debug, error, info};
use new_zealand::nz;
use nonempty::NonEmpty;

use crate::error::Result;
use crate::{
    Dispatcher, Domain, DomainKind, Error, PackageId, PackagePolicy, PackageProbe, ProcessorCounts,
    ProcessorId, ProcessorIndex, ProcessorLocation,
};

/// Upper bounds on the discovered topology.
///
/// Discovery fails with [`Error::CapacityExceeded`] instead of silently truncating when the
/// machine is larger than these limits.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub struct TopologyLimits {
    /// Maximum number of packages.
    pub max_packages: NonZero<usize>,

    /// Maximum number of logical processors in one package.
    pub max_cores_per_package: NonZero<usize>,
}

impl TopologyLimits {
    /// Creates limits with the given bounds.
    #[must_use]
    pub fn new(max_packages: NonZero<usize>, max_cores_per_package: NonZero<usize>) -> Self {
        Self {
            max_packages,
            max_cores_per_package,
        }
    }
}

impl Default for TopologyLimits {
    fn default() -> Self {
        Self::new(nz!(8), nz!(512))
    }
}

/// One logical processor (hardware thread) of a package.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Core {
    index: ProcessorIndex,
    id: ProcessorId,
    location: ProcessorLocation,
}

impl Core {
    /// The dispatcher index used to run procedures on this processor.
    #[must_use]
    pub fn index(&self) -> ProcessorIndex {
        self.index
    }

    /// The hardware identifier of this processor.
    #[must_use]
    pub fn id(&self) -> ProcessorId {
        self.id
    }

    /// Where this processor sits in the package.
    #[must_use]
    pub fn location(&self) -> ProcessorLocation {
        self.location
    }

    /// Whether this is the first hardware thread of its physical core.
    #[must_use]
    pub fn is_physical(&self) -> bool {
        self.location.thread == 0
    }
}

/// One physical package (socket): its cores, its tunable domains, what was probed from it and
/// what the policy wants programmed into it.
#[derive(Clone, Debug)]
pub struct Package {
    id: PackageId,
    representative: ProcessorIndex,
    cores: NonEmpty<Core>,
    physical_core_count: usize,
    domains: [Domain; DomainKind::ALL.len()],
    probe: Option<PackageProbe>,
    policy: PackagePolicy,
}

impl Package {
    fn new(id: PackageId, first: Core) -> Self {
        Self {
            id,
            representative: first.index,
            physical_core_count: usize::from(first.is_physical()),
            cores: NonEmpty::new(first),
            domains: DomainKind::ALL.map(Domain::new),
            probe: None,
            policy: PackagePolicy::default(),
        }
    }

    fn push(&mut self, core: Core) {
        if core.is_physical() {
            self.physical_core_count = self.physical_core_count.saturating_add(1);
        }

        self.cores.push(core);
    }

    /// The package identifier reported by the processor location information.
    #[must_use]
    pub fn id(&self) -> PackageId {
        self.id
    }

    /// The processor that package-scoped work is dispatched to.
    #[must_use]
    pub fn representative(&self) -> ProcessorIndex {
        self.representative
    }

    /// The logical processors of the package, in enumeration order.
    #[must_use]
    pub fn cores(&self) -> &NonEmpty<Core> {
        &self.cores
    }

    /// Number of logical processors.
    #[must_use]
    pub fn logical_core_count(&self) -> usize {
        self.cores.len()
    }

    /// Number of physical cores, counting only the first hardware thread of each.
    #[must_use]
    pub fn physical_core_count(&self) -> usize {
        self.physical_core_count
    }

    /// The voltage/frequency-tunable domains, in [`DomainKind::ALL`] order.
    #[must_use]
    pub fn domains(&self) -> &[Domain] {
        &self.domains
    }

    /// The domain of the given kind.
    #[must_use]
    pub fn domain(&self, kind: DomainKind) -> Option<&Domain> {
        self.domains.iter().find(|domain| domain.kind() == kind)
    }

    /// The domain of the given kind, for setting its target.
    pub fn domain_mut(&mut self, kind: DomainKind) -> Option<&mut Domain> {
        self.domains.iter_mut().find(|domain| domain.kind() == kind)
    }

    /// Whether any domain has a voltage/frequency target.
    #[must_use]
    pub fn programs_vf(&self) -> bool {
        self.domains.iter().any(|domain| domain.target().is_some())
    }

    /// What was probed from the package. `None` until the package has been probed.
    #[must_use]
    pub fn probe(&self) -> Option<&PackageProbe> {
        self.probe.as_ref()
    }

    pub(crate) fn set_probe(&mut self, probe: PackageProbe) {
        self.probe = Some(probe);
    }

    /// What the pipeline programs into this package.
    #[must_use]
    pub fn policy(&self) -> &PackagePolicy {
        &self.policy
    }

    /// What the pipeline programs into this package, for the policy source to fill in.
    pub fn policy_mut(&mut self) -> &mut PackagePolicy {
        &mut self.policy
    }
}

/// The discovered machine.
#[derive(Clone, Debug)]
pub struct Platform {
    counts: ProcessorCounts,
    boot_processor: ProcessorIndex,
    packages: NonEmpty<Package>,

    // Processor index to position in `packages`.
    package_of: HashMap<ProcessorIndex, usize>,
}

impl Platform {
    /// Total number of logical processors, including disabled ones.
    #[must_use]
    pub fn total_processor_count(&self) -> usize {
        self.counts.total
    }

    /// Number of enabled logical processors.
    #[must_use]
    pub fn enabled_processor_count(&self) -> usize {
        self.counts.enabled
    }

    /// The processor that ran discovery.
    #[must_use]
    pub fn boot_processor(&self) -> ProcessorIndex {
        self.boot_processor
    }

    /// The packages, in the order their first processor was enumerated.
    #[must_use]
    pub fn packages(&self) -> &NonEmpty<Package> {
        &self.packages
    }

    /// The packages, for the policy source to fill in their policies and domain targets.
    pub fn packages_mut(&mut self) -> impl Iterator<Item = &mut Package> {
        self.packages.iter_mut()
    }

    /// Number of packages.
    #[must_use]
    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    /// The package with the given identifier.
    #[must_use]
    pub fn package(&self, id: PackageId) -> Option<&Package> {
        self.packages.iter().find(|package| package.id == id)
    }

    /// The package with the given identifier, for the policy source to fill in.
    pub fn package_mut(&mut self, id: PackageId) -> Option<&mut Package> {
        self.packages.iter_mut().find(|package| package.id == id)
    }

    /// The package that contains the given processor.
    #[must_use]
    pub fn package_of(&self, processor: ProcessorIndex) -> Option<&Package> {
        self.package_of
            .get(&processor)
            .and_then(|&position| self.packages.get(position))
    }
}

fn enumeration_error(operation: &'static str) -> impl FnOnce(crate::Status) -> Error {
    move |status| {
        error!("{operation} failed with status {status}");
        Error::Enumeration { operation, status }
    }
}

/// Enumerates the enabled logical processors and groups them into packages.
///
/// Processors are grouped by package identifier, so packages whose processors are enumerated
/// out of order are still assembled correctly. Hardware identifiers must be unique across the
/// platform. Package order is the order in which the first
/// processor of each package is seen.
pub(crate) fn discover<D>(dispatcher: &D, limits: &TopologyLimits) -> Result<Platform>
where
    D: Dispatcher + ?Sized,
{
    let counts = dispatcher
        .processor_counts()
        .map_err(enumeration_error("processor count query"))?;
    let boot_processor = dispatcher
        .who_am_i()
        .map_err(enumeration_error("boot processor query"))?;

    let mut packages: Vec<Package> = Vec::new();
    let mut positions: HashMap<PackageId, usize> = HashMap::new();
    let mut package_of = HashMap::with_capacity(counts.enabled);
    let mut ids: HashMap<ProcessorId, ProcessorIndex> = HashMap::with_capacity(counts.enabled);

    for index in 0..counts.total {
        let info = dispatcher
            .processor_info(index)
            .map_err(enumeration_error("processor information query"))?;

        if !info.enabled {
            debug!("skipping disabled processor {index}");
            continue;
        }

        if let Some(first) = ids.insert(info.id, index) {
            error!(
                "processors {first} and {index} both report hardware identifier {}",
                info.id
            );

            return Err(Error::DuplicateProcessorId {
                id: info.id,
                first,
                second: index,
            });
        }

        let core = Core {
            index,
            id: info.id,
            location: info.location,
        };

        let existing = positions
            .get(&info.location.package)
            .copied()
            .and_then(|position| packages.get_mut(position).map(|package| (position, package)));

        let position = match existing {
            Some((position, package)) => {
                if package.cores.len() >= limits.max_cores_per_package.get() {
                    return Err(Error::CapacityExceeded {
                        what: "processors per package",
                        capacity: limits.max_cores_per_package.get(),
                    });
                }

                package.push(core);
                position
            }
            None => {
                if packages.len() >= limits.max_packages.get() {
                    return Err(Error::CapacityExceeded {
                        what: "package count",
                        capacity: limits.max_packages.get(),
                    });
                }

                let position = packages.len();
                packages.push(Package::new(info.location.package, core));
                positions.insert(info.location.package, position);
                position
            }
        };

        if index == boot_processor {
            if let Some(package) = packages.get_mut(position) {
                package.representative = index;
            }
        }

        package_of.insert(index, position);
    }

    let packages = NonEmpty::from_vec(packages).ok_or(Error::NoProcessors)?;

    info!(
        "discovered {} package(s) with {} of {} processors enabled",
        packages.len(),
        package_of.len(),
        counts.total
    );

    for package in packages.iter() {
        debug!(
            "package {}: {} logical / {} physical cores, representative processor {}",
            package.id,
            package.logical_core_count(),
            package.physical_core_count(),
            package.representative
        );
    }

    Ok(Platform {
        counts,
        boot_processor,
        packages,
        package_of,
    })
}
