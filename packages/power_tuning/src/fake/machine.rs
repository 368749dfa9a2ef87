//! The simulated machine.

use std::panic;
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use bit_field::BitField;
use foldhash::HashMap;

use crate::mailbox::{
    READ_CAPABILITIES, READ_ICC_MAX, READ_VF, WRITE_ICC_MAX, WRITE_VF, decode_request, decode_vf,
    encode_reply,
};
use crate::{
    BroadcastProcedure, Dispatcher, DomainKind, MmioRegister, Msr, PackageId, Procedure,
    ProcessorCounts, ProcessorIndex, ProcessorInfo, RegisterAccess, Status, VfSettings,
};

/// Status reported for requests naming a processor that does not exist or is disabled.
pub const INVALID_PARAMETER: Status = Status(0x8000_0002);

/// Mailbox completion code for an unknown command.
const MAILBOX_INVALID_COMMAND: u8 = 0x01;

/// Mailbox completion code for an unknown domain.
const MAILBOX_INVALID_DOMAIN: u8 = 0x04;

/// Mailbox completion code for a V/F point the domain does not expose.
const MAILBOX_INVALID_POINT: u8 = 0x05;

/// Mailbox completion code for a write after the overclocking lock was set.
const MAILBOX_LOCKED: u8 = 0x07;

/// What happened to a write.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum WriteOutcome {
    /// The register took the new value.
    Applied,

    /// The register is locked and kept its value.
    IgnoredLocked,

    /// The write failed with an injected fault.
    Failed,
}

/// One entry of the event log of a [`FakeMachine`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum Event {
    /// A procedure was dispatched to a single processor.
    Dispatch {
        /// The target processor.
        processor: ProcessorIndex,
    },

    /// A procedure was broadcast to every enabled processor.
    Broadcast,

    /// A model-specific register write was attempted.
    MsrWrite {
        /// The processor whose register file was written.
        processor: ProcessorIndex,

        /// The register.
        msr: Msr,

        /// The value written.
        value: u64,

        /// What happened.
        outcome: WriteOutcome,
    },

    /// A memory-mapped register write was attempted.
    MmioWrite {
        /// The package whose register window was written.
        package: PackageId,

        /// The processor that performed the write.
        processor: ProcessorIndex,

        /// The register.
        register: MmioRegister,

        /// The value written.
        value: u64,

        /// What happened.
        outcome: WriteOutcome,
    },
}

#[derive(Clone, Debug, Default)]
pub(crate) struct Faults {
    pub(crate) processor_info: HashMap<ProcessorIndex, Status>,
    pub(crate) dispatch: HashMap<ProcessorIndex, Status>,
    pub(crate) msr_read: HashMap<(ProcessorIndex, Msr), Status>,
    pub(crate) msr_write: HashMap<Msr, Status>,
    pub(crate) mmio_write: HashMap<MmioRegister, Status>,
    pub(crate) mailbox: HashMap<u8, u8>,
}

#[derive(Clone, Debug)]
pub(crate) struct FakeProcessor {
    pub(crate) info: ProcessorInfo,
    pub(crate) msrs: HashMap<Msr, u64>,
}

#[derive(Clone, Debug)]
pub(crate) struct FakeDomain {
    pub(crate) capability: u32,
    pub(crate) points: Vec<u32>,
    pub(crate) icc_max: u32,
}

#[derive(Clone, Debug)]
pub(crate) struct FakePackage {
    pub(crate) signature: u32,
    pub(crate) mmio: HashMap<MmioRegister, u64>,
    pub(crate) domains: HashMap<u8, FakeDomain>,
}

#[derive(Debug)]
struct MachineState {
    processors: Vec<FakeProcessor>,
    packages: HashMap<PackageId, FakePackage>,
    events: Vec<Event>,
}

/// The bit that locks a register against further writes, if it has one.
fn lock_bit(msr: Msr) -> Option<usize> {
    match msr {
        Msr::PkgPowerLimit => Some(63),
        Msr::VrCurrentConfig | Msr::Pl3Control | Msr::Pp0PowerLimit | Msr::ConfigTdpControl => {
            Some(31)
        }
        Msr::FlexRatio => Some(20),
        _ => None,
    }
}

fn mmio_lock_bit(register: MmioRegister) -> Option<usize> {
    match register {
        MmioRegister::PkgPowerLimit => Some(63),
    }
}

/// A simulated multi-package machine. Build one with
/// [`MachineBuilder`][crate::fake::MachineBuilder].
///
/// Dispatch to a single processor runs the procedure on the calling thread. A broadcast runs
/// the procedure on one scoped thread per enabled processor, so the procedures of a broadcast
/// really do run concurrently. Register access always acts on the processor the calling thread
/// is currently dispatched to, or on the boot processor outside any dispatch.
#[derive(Debug)]
pub struct FakeMachine {
    boot_processor: ProcessorIndex,
    faults: Faults,
    state: Mutex<MachineState>,
    current: Mutex<HashMap<ThreadId, ProcessorIndex>>,
}

impl FakeMachine {
    pub(crate) fn new(
        processors: Vec<FakeProcessor>,
        packages: HashMap<PackageId, FakePackage>,
        boot_processor: ProcessorIndex,
        faults: Faults,
    ) -> Self {
        Self {
            boot_processor,
            faults,
            state: Mutex::new(MachineState {
                processors,
                packages,
                events: Vec::new(),
            }),
            current: Mutex::new(HashMap::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MachineState> {
        self.state
            .lock()
            .expect("machine state lock should never be poisoned")
    }

    fn current_processor(&self) -> ProcessorIndex {
        self.current
            .lock()
            .expect("current processor lock should never be poisoned")
            .get(&thread::current().id())
            .copied()
            .unwrap_or(self.boot_processor)
    }

    /// Runs `f` as if the calling thread were executing on `processor`.
    fn as_processor<T>(&self, processor: ProcessorIndex, f: impl FnOnce() -> T) -> T {
        let thread = thread::current().id();

        let previous = self
            .current
            .lock()
            .expect("current processor lock should never be poisoned")
            .insert(thread, processor);

        let result = f();

        let mut current = self
            .current
            .lock()
            .expect("current processor lock should never be poisoned");

        current.remove(&thread);
        if let Some(previous) = previous {
            current.insert(thread, previous);
        }

        result
    }

    fn check_dispatchable(&self, processor: ProcessorIndex) -> Result<(), Status> {
        let enabled = self
            .state()
            .processors
            .get(processor)
            .is_some_and(|p| p.info.enabled);

        if !enabled {
            return Err(INVALID_PARAMETER);
        }

        self.faults
            .dispatch
            .get(&processor)
            .map_or(Ok(()), |&status| Err(status))
    }

    /// A copy of the event log.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.state().events.clone()
    }

    /// Clears the event log, typically after bring-up so that only programming is observed.
    pub fn clear_events(&self) {
        self.state().events.clear();
    }

    /// Number of register writes attempted since the log was last cleared.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.state()
            .events
            .iter()
            .filter(|event| matches!(event, Event::MsrWrite { .. } | Event::MmioWrite { .. }))
            .count()
    }

    /// Every attempted write of a model-specific register, as (processor, value) pairs in the
    /// order they happened.
    #[must_use]
    pub fn msr_writes(&self, msr: Msr) -> Vec<(ProcessorIndex, u64)> {
        self.state()
            .events
            .iter()
            .filter_map(|event| match *event {
                Event::MsrWrite {
                    processor,
                    msr: written,
                    value,
                    ..
                } if written == msr => Some((processor, value)),
                _ => None,
            })
            .collect()
    }

    /// The processors that single-target procedures were dispatched to, in order.
    #[must_use]
    pub fn dispatched_processors(&self) -> Vec<ProcessorIndex> {
        self.state()
            .events
            .iter()
            .filter_map(|event| match *event {
                Event::Dispatch { processor } => Some(processor),
                _ => None,
            })
            .collect()
    }

    /// The current contents of a model-specific register of a processor.
    ///
    /// # Panics
    ///
    /// Panics if the processor does not exist.
    #[must_use]
    pub fn msr(&self, processor: ProcessorIndex, msr: Msr) -> u64 {
        self.state()
            .processors
            .get(processor)
            .expect("processor index must be valid")
            .msrs
            .get(&msr)
            .copied()
            .unwrap_or_default()
    }

    /// The current contents of a memory-mapped register of a package.
    ///
    /// # Panics
    ///
    /// Panics if the package does not exist.
    #[must_use]
    pub fn mmio(&self, package: PackageId, register: MmioRegister) -> u64 {
        self.state()
            .packages
            .get(&package)
            .expect("package identifier must be valid")
            .mmio
            .get(&register)
            .copied()
            .unwrap_or_default()
    }

    /// The current V/F settings of a domain (`point` 0) or of one of its curve points.
    ///
    /// # Panics
    ///
    /// Panics if the package does not exist or the point is not exposed.
    #[must_use]
    pub fn vf_settings(&self, package: PackageId, domain: DomainKind, point: u8) -> VfSettings {
        let state = self.state();
        let raw = state
            .packages
            .get(&package)
            .and_then(|package| package.domains.get(&domain.mailbox_id()))
            .and_then(|domain| domain.points.get(usize::from(point)))
            .copied()
            .expect("package, domain and point must exist");

        decode_vf(raw)
    }

    /// The current raw IccMax value of a domain.
    ///
    /// # Panics
    ///
    /// Panics if the package does not exist.
    #[must_use]
    pub fn icc_max(&self, package: PackageId, domain: DomainKind) -> u32 {
        self.state()
            .packages
            .get(&package)
            .and_then(|package| package.domains.get(&domain.mailbox_id()))
            .expect("package must exist")
            .icc_max
    }
}

/// Executes one overclocking mailbox command and returns the reply.
fn run_mailbox(
    package: &mut FakePackage,
    request: u64,
    overclocking_locked: bool,
    faults: &Faults,
) -> u64 {
    let (command, domain_id, param2, data) = decode_request(request);

    if let Some(&code) = faults.mailbox.get(&domain_id) {
        return encode_reply(code, 0);
    }

    let Some(domain) = package.domains.get_mut(&domain_id) else {
        return encode_reply(MAILBOX_INVALID_DOMAIN, 0);
    };

    let is_write = command == WRITE_VF || command == WRITE_ICC_MAX;
    if is_write && overclocking_locked {
        return encode_reply(MAILBOX_LOCKED, 0);
    }

    match command {
        READ_CAPABILITIES => encode_reply(0, domain.capability),
        READ_VF => domain.points.get(usize::from(param2)).map_or_else(
            || encode_reply(MAILBOX_INVALID_POINT, 0),
            |&point| encode_reply(0, point),
        ),
        WRITE_VF => {
            let Some(point) = domain.points.get_mut(usize::from(param2)) else {
                return encode_reply(MAILBOX_INVALID_POINT, 0);
            };

            *point = data;
            encode_reply(0, 0)
        }
        READ_ICC_MAX => encode_reply(0, domain.icc_max),
        WRITE_ICC_MAX => {
            domain.icc_max = data;
            encode_reply(0, 0)
        }
        _ => encode_reply(MAILBOX_INVALID_COMMAND, 0),
    }
}

impl Dispatcher for FakeMachine {
    fn processor_counts(&self) -> Result<ProcessorCounts, Status> {
        let state = self.state();

        Ok(ProcessorCounts {
            total: state.processors.len(),
            enabled: state
                .processors
                .iter()
                .filter(|processor| processor.info.enabled)
                .count(),
        })
    }

    fn who_am_i(&self) -> Result<ProcessorIndex, Status> {
        Ok(self.current_processor())
    }

    fn processor_info(&self, processor: ProcessorIndex) -> Result<ProcessorInfo, Status> {
        if let Some(&status) = self.faults.processor_info.get(&processor) {
            return Err(status);
        }

        self.state()
            .processors
            .get(processor)
            .map(|p| p.info)
            .ok_or(INVALID_PARAMETER)
    }

    fn run_on(
        &self,
        processor: ProcessorIndex,
        procedure: &mut Procedure<'_>,
    ) -> Result<(), Status> {
        self.check_dispatchable(processor)?;
        self.state().events.push(Event::Dispatch { processor });

        self.as_processor(processor, procedure)
    }

    fn run_on_all(&self, procedure: &BroadcastProcedure<'_>) -> Result<(), Status> {
        self.state().events.push(Event::Broadcast);

        let enabled: Vec<ProcessorIndex> = self
            .state()
            .processors
            .iter()
            .enumerate()
            .filter(|(_, processor)| processor.info.enabled)
            .map(|(index, _)| index)
            .collect();

        let results: Vec<Result<(), Status>> = thread::scope(|scope| {
            let handles: Vec<_> = enabled
                .iter()
                .map(|&processor| {
                    scope.spawn(move || -> Result<(), Status> {
                        self.check_dispatchable(processor)?;
                        self.as_processor(processor, procedure)
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|payload| panic::resume_unwind(payload))
                })
                .collect()
        });

        results.into_iter().collect()
    }
}

impl RegisterAccess for FakeMachine {
    fn read_msr(&self, msr: Msr) -> Result<u64, Status> {
        let processor = self.current_processor();

        if let Some(&status) = self.faults.msr_read.get(&(processor, msr)) {
            return Err(status);
        }

        Ok(self.msr(processor, msr))
    }

    fn write_msr(&self, msr: Msr, value: u64) -> Result<(), Status> {
        let processor = self.current_processor();
        let mut state = self.state();

        if let Some(&status) = self.faults.msr_write.get(&msr) {
            state.events.push(Event::MsrWrite {
                processor,
                msr,
                value,
                outcome: WriteOutcome::Failed,
            });
            return Err(status);
        }

        let MachineState {
            processors,
            packages,
            events,
        } = &mut *state;

        let target = processors
            .get_mut(processor)
            .expect("the current processor always exists");

        let current = target.msrs.get(&msr).copied().unwrap_or_default();
        let locked = lock_bit(msr).is_some_and(|bit| current.get_bit(bit));

        let outcome = if locked {
            WriteOutcome::IgnoredLocked
        } else if msr == Msr::OcMailbox && value.get_bit(63) {
            let overclocking_locked = target
                .msrs
                .get(&Msr::FlexRatio)
                .is_some_and(|flex| flex.get_bit(20));

            let package = packages
                .get_mut(&target.info.location.package)
                .expect("every processor belongs to a simulated package");

            let reply = run_mailbox(package, value, overclocking_locked, &self.faults);
            target.msrs.insert(msr, reply);
            WriteOutcome::Applied
        } else {
            target.msrs.insert(msr, value);
            WriteOutcome::Applied
        };

        events.push(Event::MsrWrite {
            processor,
            msr,
            value,
            outcome,
        });

        Ok(())
    }

    fn read_mmio(&self, register: MmioRegister) -> Result<u64, Status> {
        let processor = self.current_processor();
        let state = self.state();

        let package = state
            .processors
            .get(processor)
            .expect("the current processor always exists")
            .info
            .location
            .package;

        Ok(state
            .packages
            .get(&package)
            .and_then(|package| package.mmio.get(&register))
            .copied()
            .unwrap_or_default())
    }

    fn write_mmio(&self, register: MmioRegister, value: u64) -> Result<(), Status> {
        let processor = self.current_processor();
        let mut state = self.state();

        let package_id = state
            .processors
            .get(processor)
            .expect("the current processor always exists")
            .info
            .location
            .package;

        if let Some(&status) = self.faults.mmio_write.get(&register) {
            state.events.push(Event::MmioWrite {
                package: package_id,
                processor,
                register,
                value,
                outcome: WriteOutcome::Failed,
            });
            return Err(status);
        }

        let package = state
            .packages
            .get_mut(&package_id)
            .expect("every processor belongs to a simulated package");

        let current = package.mmio.get(&register).copied().unwrap_or_default();
        let locked = mmio_lock_bit(register).is_some_and(|bit| current.get_bit(bit));

        let outcome = if locked {
            WriteOutcome::IgnoredLocked
        } else {
            package.mmio.insert(register, value);
            WriteOutcome::Applied
        };

        state.events.push(Event::MmioWrite {
            package: package_id,
            processor,
            register,
            value,
            outcome,
        });

        Ok(())
    }

    fn cpuid_version(&self) -> Result<u32, Status> {
        let processor = self.current_processor();
        let state = self.state();

        let package = state
            .processors
            .get(processor)
            .expect("the current processor always exists")
            .info
            .location
            .package;

        Ok(state
            .packages
            .get(&package)
            .expect("every processor belongs to a simulated package")
            .signature)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;
    use static_assertions::assert_impl_all;

    use super::*;
    use crate::CpuProfile;
    use crate::fake::{MachineBuilder, PackageBuilder};
    use crate::mailbox::{encode_request, transact};

    assert_impl_all!(FakeMachine: Send, Sync);

    #[test]
    fn register_files_are_per_processor() {
        let machine = MachineBuilder::from_counts(nz!(1), nz!(2), nz!(1)).build();

        let mut procedure = || machine.write_msr(Msr::Pl3Control, 0x1234);
        machine.run_on(1, &mut procedure).unwrap();

        assert_eq!(machine.msr(0, Msr::Pl3Control), 0);
        assert_eq!(machine.msr(1, Msr::Pl3Control), 0x1234);
    }

    #[test]
    fn locked_registers_ignore_writes() {
        let machine = MachineBuilder::from_counts(nz!(1), nz!(1), nz!(1)).build();

        machine.write_msr(Msr::Pp0PowerLimit, (1 << 31) | 0x10).unwrap();
        machine.write_msr(Msr::Pp0PowerLimit, 0x20).unwrap();

        assert_eq!(machine.msr(0, Msr::Pp0PowerLimit), (1 << 31) | 0x10);
        assert!(matches!(
            machine.events().last(),
            Some(Event::MsrWrite {
                outcome: WriteOutcome::IgnoredLocked,
                ..
            })
        ));
    }

    #[test]
    fn mmio_is_shared_within_package() {
        let machine = MachineBuilder::from_counts(nz!(2), nz!(2), nz!(1)).build();

        let mut procedure = || machine.write_mmio(MmioRegister::PkgPowerLimit, 0x55);
        machine.run_on(1, &mut procedure).unwrap();

        let mut read = None;
        let mut procedure = || -> Result<(), Status> {
            read = Some(machine.read_mmio(MmioRegister::PkgPowerLimit)?);
            Ok(())
        };
        machine.run_on(0, &mut procedure).unwrap();

        assert_eq!(read, Some(0x55));
        assert_ne!(machine.mmio(1, MmioRegister::PkgPowerLimit), 0x55);
    }

    #[test]
    fn broadcast_reaches_every_enabled_processor() {
        let machine = MachineBuilder::from_counts(nz!(2), nz!(2), nz!(2)).build();
        let seen = Mutex::new(Vec::new());

        let procedure = || -> Result<(), Status> {
            seen.lock().unwrap().push(machine.who_am_i()?);
            Ok(())
        };
        machine.run_on_all(&procedure).unwrap();

        let mut seen = seen.into_inner().unwrap();
        seen.sort_unstable();
        assert_eq!(seen, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn dispatch_faults_and_disabled_processors_are_reported() {
        let machine = MachineBuilder::from_counts(nz!(1), nz!(2), nz!(1))
            .fail_dispatch(1, Status(0x8000_0006))
            .build();

        let mut procedure = || Ok::<(), Status>(());
        assert_eq!(machine.run_on(1, &mut procedure), Err(Status(0x8000_0006)));
        assert_eq!(machine.run_on(9, &mut procedure), Err(INVALID_PARAMETER));
        assert_eq!(machine.run_on_all(&|| Ok::<(), Status>(())), Err(Status(0x8000_0006)));
    }

    #[test]
    fn mailbox_reads_and_writes_vf_points() {
        let machine = MachineBuilder::new()
            .package(PackageBuilder::new(nz!(1), nz!(1)).vf_capability(DomainKind::Ring, 60))
            .profile(CpuProfile::alder_lake())
            .build();

        let capability = transact(&machine, READ_CAPABILITIES, DomainKind::Ring, 0, 0).unwrap();
        assert_eq!(capability & 0xFF, 60);

        transact(&machine, WRITE_VF, DomainKind::Ring, 8, 0x30).unwrap();
        assert_eq!(machine.vf_settings(0, DomainKind::Ring, 8).max_ratio, 0x30);

        machine.write_msr(Msr::FlexRatio, 1 << 20).unwrap();

        machine
            .write_msr(Msr::OcMailbox, encode_request(WRITE_VF, DomainKind::Ring, 0, 0))
            .unwrap();
        assert_eq!(
            machine.msr(0, Msr::OcMailbox).get_bits(32..40),
            u64::from(MAILBOX_LOCKED)
        );
    }
}
