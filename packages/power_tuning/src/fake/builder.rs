//! Builders for configuring a fake machine.

use std::num::NonZero;

use foldhash::{HashMap, HashMapExt};
use new_zealand::nz;

use crate::fake::FakeMachine;
use crate::fake::machine::{FakeDomain, FakePackage, FakeProcessor, Faults};
use crate::mailbox::encode_vf;
use crate::{
    CpuProfile, DomainKind, MmioRegister, Msr, PackageId, ProcessorId, ProcessorIndex,
    ProcessorInfo, ProcessorLocation, Status, VfSettings,
};

/// Default contents of the register file of every simulated processor.
///
/// The values describe a typical client part: 1/8 W power units, a 15-65 W power range, PL1 at
/// 35 W and PL2 at 63 W, two configurable TDP levels and nothing locked.
const DEFAULT_MSRS: [(Msr, u64); 11] = [
    (Msr::PlatformInfo, 2 << 33),
    (Msr::OcMailbox, 0),
    (Msr::FlexRatio, 0),
    (Msr::TurboRatioLimit, 0x2D2D_2D2D_2F2F_3131),
    (Msr::VrCurrentConfig, 0x0000_0640),
    (Msr::RaplPowerUnit, 0x000A_0E03),
    (Msr::PkgPowerLimit, 0x0042_81F8_00DD_8118),
    (Msr::PkgPowerInfo, 0x0012_0208_0078_0118),
    (Msr::Pl3Control, 0),
    (Msr::Pp0PowerLimit, 0),
    (Msr::ConfigTdpControl, 0),
];

/// Default processor signature (family 6, model 0x97, stepping 2).
const DEFAULT_SIGNATURE: u32 = 0x0009_0672;

/// Default maximum overclocking ratio reported by every domain.
const DEFAULT_MAX_OC_RATIO: u8 = 50;

/// Default maximum ratio of every V/F point.
const DEFAULT_MAX_RATIO: u8 = 45;

/// Default raw IccMax of every domain (120 A).
const DEFAULT_ICC_MAX: u32 = 480;

/// Builder for one logical processor of a fake machine.
///
/// By default the processor is enabled and sits in package 0, core 0, thread 0. Its hardware
/// identifier defaults to its enumeration index.
///
/// # Example
///
/// ```
/// use power_tuning::fake::{MachineBuilder, ProcessorBuilder};
///
/// let machine = MachineBuilder::new()
///     .processor(ProcessorBuilder::new().package(0).core(0).thread(0))
///     .processor(ProcessorBuilder::new().package(0).core(0).thread(1).disabled())
///     .build();
/// ```
#[derive(Clone, Debug, Default)]
pub struct ProcessorBuilder {
    id: Option<ProcessorId>,
    package: PackageId,
    core: u32,
    thread: u32,
    disabled: bool,
}

impl ProcessorBuilder {
    /// Creates a builder for an enabled processor in package 0, core 0, thread 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the hardware identifier reported by the processor information query.
    #[must_use]
    pub fn id(mut self, id: ProcessorId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the package identifier.
    #[must_use]
    pub fn package(mut self, package: PackageId) -> Self {
        self.package = package;
        self
    }

    /// Sets the physical core within the package.
    #[must_use]
    pub fn core(mut self, core: u32) -> Self {
        self.core = core;
        self
    }

    /// Sets the hardware thread within the core.
    #[must_use]
    pub fn thread(mut self, thread: u32) -> Self {
        self.thread = thread;
        self
    }

    /// Marks the processor as disabled. It is reported by the dispatcher but cannot be
    /// dispatched to.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }
}

/// Builder for the hardware of one package: its processors and initial register contents.
#[derive(Clone, Debug)]
pub struct PackageBuilder {
    cores: NonZero<usize>,
    threads_per_core: NonZero<usize>,
    signature: u32,
    msrs: Vec<(Msr, u64)>,
    mmio: Vec<(MmioRegister, u64)>,
    max_oc_ratios: Vec<(DomainKind, u8)>,
    icc_max: Vec<(DomainKind, u32)>,
}

impl Default for PackageBuilder {
    fn default() -> Self {
        Self::new(nz!(1), nz!(1))
    }
}

impl PackageBuilder {
    /// Creates a package with the given number of physical cores, each with the given number of
    /// hardware threads.
    ///
    /// When added to a [`MachineBuilder`] via [`MachineBuilder::package()`], the processors are
    /// enumerated core by core, with the threads of each core next to each other.
    #[must_use]
    pub fn new(cores: NonZero<usize>, threads_per_core: NonZero<usize>) -> Self {
        Self {
            cores,
            threads_per_core,
            signature: DEFAULT_SIGNATURE,
            msrs: Vec::new(),
            mmio: Vec::new(),
            max_oc_ratios: Vec::new(),
            icc_max: Vec::new(),
        }
    }

    /// Sets the processor signature returned by the CPUID version query.
    #[must_use]
    pub fn signature(mut self, signature: u32) -> Self {
        self.signature = signature;
        self
    }

    /// Sets the initial contents of a model-specific register on every processor of the package.
    #[must_use]
    pub fn msr(mut self, msr: Msr, value: u64) -> Self {
        self.msrs.push((msr, value));
        self
    }

    /// Sets the initial contents of a memory-mapped register of the package.
    #[must_use]
    pub fn mmio(mut self, register: MmioRegister, value: u64) -> Self {
        self.mmio.push((register, value));
        self
    }

    /// Locks the configurable TDP level control.
    #[must_use]
    pub fn config_tdp_locked(self) -> Self {
        self.msr(Msr::ConfigTdpControl, 1 << 31)
    }

    /// Sets the maximum overclocking ratio reported for a domain.
    #[must_use]
    pub fn vf_capability(mut self, domain: DomainKind, max_oc_ratio: u8) -> Self {
        self.max_oc_ratios.push((domain, max_oc_ratio));
        self
    }

    /// Sets the raw IccMax value of a domain.
    #[must_use]
    pub fn icc_max(mut self, domain: DomainKind, raw: u32) -> Self {
        self.icc_max.push((domain, raw));
        self
    }

    fn processors(&self, package: PackageId) -> impl Iterator<Item = ProcessorBuilder> + '_ {
        (0..self.cores.get()).flat_map(move |core| {
            (0..self.threads_per_core.get()).map(move |thread| {
                #[expect(
                    clippy::cast_possible_truncation,
                    reason = "unrealistic to simulate more than u32::MAX cores or threads"
                )]
                let (core, thread) = (core as u32, thread as u32);

                ProcessorBuilder::new()
                    .package(package)
                    .core(core)
                    .thread(thread)
            })
        })
    }

    fn build_msrs(&self) -> HashMap<Msr, u64> {
        let mut msrs = HashMap::with_capacity(DEFAULT_MSRS.len());
        msrs.extend(DEFAULT_MSRS);
        msrs.extend(self.msrs.iter().copied());
        msrs
    }

    fn build_package(&self, profile: CpuProfile) -> FakePackage {
        let mut mmio = HashMap::new();
        mmio.insert(MmioRegister::PkgPowerLimit, 0x0042_81F8_00DD_8118);
        mmio.extend(self.mmio.iter().copied());

        let domains = DomainKind::ALL
            .iter()
            .map(|&kind| {
                let max_oc_ratio = self
                    .max_oc_ratios
                    .iter()
                    .rev()
                    .find(|(domain, _)| *domain == kind)
                    .map_or(DEFAULT_MAX_OC_RATIO, |&(_, ratio)| ratio);

                let icc_max = self
                    .icc_max
                    .iter()
                    .rev()
                    .find(|(domain, _)| *domain == kind)
                    .map_or(DEFAULT_ICC_MAX, |&(_, raw)| raw);

                let point = encode_vf(&VfSettings {
                    max_ratio: DEFAULT_MAX_RATIO,
                    ..VfSettings::default()
                });

                let domain = FakeDomain {
                    // Ratio unlocked, override and offset supported.
                    capability: u32::from(max_oc_ratio) | (0b111 << 8),
                    points: vec![point; usize::from(profile.vf_points_exposed).saturating_add(1)],
                    icc_max,
                };

                (kind.mailbox_id(), domain)
            })
            .collect();

        FakePackage {
            signature: self.signature,
            mmio,
            domains,
        }
    }
}

/// Builder for a fake machine.
///
/// Processors are enumerated in the order they are added, either individually via
/// [`processor()`][Self::processor] or a whole package at a time via
/// [`package()`][Self::package]. Packages referenced only by individual processors use the
/// default [`PackageBuilder`] hardware.
///
/// # Example
///
/// ```
/// use power_tuning::Status;
/// use power_tuning::fake::{MachineBuilder, PackageBuilder};
/// use new_zealand::nz;
///
/// let machine = MachineBuilder::new()
///     .package(PackageBuilder::new(nz!(4), nz!(2)))
///     .package(PackageBuilder::new(nz!(4), nz!(2)).config_tdp_locked())
///     .boot_processor(8)
///     .fail_dispatch(3, Status(0x8000_0006))
///     .build();
/// ```
#[derive(Clone, Debug, Default)]
pub struct MachineBuilder {
    processors: Vec<ProcessorBuilder>,
    packages: HashMap<PackageId, PackageBuilder>,
    next_package: PackageId,
    boot_processor: ProcessorIndex,
    profile: CpuProfile,
    faults: Faults,
}

impl MachineBuilder {
    /// Creates an empty builder. At least one processor must be added before building.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder for `packages` identical packages of `cores` physical cores with
    /// `threads_per_core` hardware threads each, enumerated package by package.
    #[must_use]
    pub fn from_counts(
        packages: NonZero<usize>,
        cores: NonZero<usize>,
        threads_per_core: NonZero<usize>,
    ) -> Self {
        (0..packages.get()).fold(Self::new(), |builder, _| {
            builder.package(PackageBuilder::new(cores, threads_per_core))
        })
    }

    /// Adds a processor.
    #[must_use]
    pub fn processor(mut self, processor: ProcessorBuilder) -> Self {
        self.processors.push(processor);
        self
    }

    /// Adds a package with the next unused package identifier, enumerating all its processors.
    #[must_use]
    pub fn package(mut self, package: PackageBuilder) -> Self {
        while self.packages.contains_key(&self.next_package) {
            self.next_package = self.next_package.wrapping_add(1);
        }

        let id = self.next_package;
        self.processors.extend(package.processors(id));
        self.packages.insert(id, package);
        self
    }

    /// Sets the dispatcher index of the processor that runs the caller's code. Defaults to 0.
    #[must_use]
    pub fn boot_processor(mut self, processor: ProcessorIndex) -> Self {
        self.boot_processor = processor;
        self
    }

    /// Sets the microarchitecture profile the simulated mailbox follows.
    #[must_use]
    pub fn profile(mut self, profile: CpuProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Makes the processor information query fail for one processor.
    #[must_use]
    pub fn fail_processor_info(mut self, processor: ProcessorIndex, status: Status) -> Self {
        self.faults.processor_info.insert(processor, status);
        self
    }

    /// Makes every dispatch to one processor fail without running the procedure, including its
    /// part of a broadcast.
    #[must_use]
    pub fn fail_dispatch(mut self, processor: ProcessorIndex, status: Status) -> Self {
        self.faults.dispatch.insert(processor, status);
        self
    }

    /// Makes reads of a model-specific register fail on one processor.
    #[must_use]
    pub fn fail_msr_read(mut self, processor: ProcessorIndex, msr: Msr, status: Status) -> Self {
        self.faults.msr_read.insert((processor, msr), status);
        self
    }

    /// Makes writes to a model-specific register fail on every processor.
    #[must_use]
    pub fn fail_msr_write(mut self, msr: Msr, status: Status) -> Self {
        self.faults.msr_write.insert(msr, status);
        self
    }

    /// Makes writes to a memory-mapped register fail in every package.
    #[must_use]
    pub fn fail_mmio_write(mut self, register: MmioRegister, status: Status) -> Self {
        self.faults.mmio_write.insert(register, status);
        self
    }

    /// Makes every mailbox command addressed to a domain complete with the given code.
    #[must_use]
    pub fn fail_mailbox(mut self, domain: DomainKind, code: u8) -> Self {
        self.faults.mailbox.insert(domain.mailbox_id(), code);
        self
    }

    /// Builds the machine.
    ///
    /// # Panics
    ///
    /// Panics if no processor was added or the boot processor does not exist.
    #[must_use]
    pub fn build(self) -> FakeMachine {
        assert!(
            !self.processors.is_empty(),
            "a fake machine needs at least one processor"
        );
        assert!(
            self.boot_processor < self.processors.len(),
            "the boot processor must exist"
        );

        let mut packages = HashMap::new();
        let mut processors = Vec::with_capacity(self.processors.len());

        for (index, processor) in self.processors.iter().enumerate() {
            let template = self
                .packages
                .get(&processor.package)
                .cloned()
                .unwrap_or_default();

            packages
                .entry(processor.package)
                .or_insert_with(|| template.build_package(self.profile));

            #[expect(
                clippy::cast_possible_truncation,
                reason = "unrealistic to simulate more than u32::MAX processors"
            )]
            let index_id = index as u32;

            processors.push(FakeProcessor {
                info: ProcessorInfo {
                    id: processor.id.unwrap_or(index_id),
                    enabled: !processor.disabled,
                    boot_processor: index == self.boot_processor,
                    location: ProcessorLocation {
                        package: processor.package,
                        core: processor.core,
                        thread: processor.thread,
                    },
                },
                msrs: template.build_msrs(),
            });
        }

        FakeMachine::new(processors, packages, self.boot_processor, self.faults)
    }
}
