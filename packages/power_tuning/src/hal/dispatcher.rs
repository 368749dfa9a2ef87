use crate::{PackageId, ProcessorId, ProcessorIndex, Status};

/// A procedure executed on a single target processor.
///
/// The procedure returns the status the dispatcher reports back to the caller. Procedures in this
/// crate record feature-level failures themselves and only return an error status when the
/// procedure could not run at all.
pub type Procedure<'a> = dyn FnMut() -> Result<(), Status> + Send + 'a;

/// A procedure executed on every enabled processor, potentially at the same time.
pub type BroadcastProcedure<'a> = dyn Fn() -> Result<(), Status> + Sync + 'a;

/// Processor counts reported by the dispatcher.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[expect(
    clippy::exhaustive_structs,
    reason = "dispatcher implementations construct this from firmware data"
)]
pub struct ProcessorCounts {
    /// All logical processors present in the system, including disabled ones.
    pub total: usize,

    /// Logical processors that are enabled and can be dispatched to.
    pub enabled: usize,
}

/// Where a logical processor sits in the package/core/thread hierarchy.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[expect(
    clippy::exhaustive_structs,
    reason = "dispatcher implementations construct this from firmware data"
)]
pub struct ProcessorLocation {
    /// The physical package (socket).
    pub package: PackageId,

    /// The physical core within the package.
    pub core: u32,

    /// The hardware thread within the core. Zero for the first thread of every core.
    pub thread: u32,
}

/// Information the dispatcher reports about one logical processor.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[expect(
    clippy::exhaustive_structs,
    reason = "dispatcher implementations construct this from firmware data"
)]
pub struct ProcessorInfo {
    /// Hardware identifier (local APIC identifier).
    pub id: ProcessorId,

    /// Whether the processor is enabled and can be dispatched to.
    pub enabled: bool,

    /// Whether this is the boot (bootstrap) processor.
    pub boot_processor: bool,

    /// Location in the topology.
    pub location: ProcessorLocation,
}

/// The multiprocessor dispatch capability.
///
/// This is the only concurrency primitive the crate uses. Every dispatch is synchronous from the
/// caller's perspective: [`run_on()`][Self::run_on] returns only after the procedure completed on
/// the target processor and [`run_on_all()`][Self::run_on_all] returns only after the procedure
/// completed (or failed) on every enabled processor. Each dispatch call is treated as a full
/// barrier by the orchestration logic.
///
/// No ordering is guaranteed between processors participating in one broadcast.
pub trait Dispatcher {
    /// Returns the total and enabled logical processor counts.
    fn processor_counts(&self) -> Result<ProcessorCounts, Status>;

    /// Returns the dispatcher index of the processor executing the call.
    ///
    /// Must be callable from inside a dispatched procedure.
    fn who_am_i(&self) -> Result<ProcessorIndex, Status>;

    /// Returns topology information for the processor with the given dispatcher index.
    fn processor_info(&self, processor: ProcessorIndex) -> Result<ProcessorInfo, Status>;

    /// Executes `procedure` with `processor` as the execution context and blocks until it
    /// completes.
    ///
    /// When `processor` is the calling processor, the procedure must be executed directly.
    fn run_on(
        &self,
        processor: ProcessorIndex,
        procedure: &mut Procedure<'_>,
    ) -> Result<(), Status>;

    /// Executes `procedure` on every enabled processor, including the calling one, and blocks
    /// until all of them have finished.
    ///
    /// Returns an error if the procedure could not be started or returned an error on any
    /// processor.
    fn run_on_all(&self, procedure: &BroadcastProcedure<'_>) -> Result<(), Status>;
}

impl<T> Dispatcher for &T
where
    T: Dispatcher + ?Sized,
{
    #[cfg_attr(test, mutants::skip)] // Trivial delegation, do not waste time on mutation.
    fn processor_counts(&self) -> Result<ProcessorCounts, Status> {
        (**self).processor_counts()
    }

    #[cfg_attr(test, mutants::skip)] // Trivial delegation, do not waste time on mutation.
    fn who_am_i(&self) -> Result<ProcessorIndex, Status> {
        (**self).who_am_i()
    }

    #[cfg_attr(test, mutants::skip)] // Trivial delegation, do not waste time on mutation.
    fn processor_info(&self, processor: ProcessorIndex) -> Result<ProcessorInfo, Status> {
        (**self).processor_info(processor)
    }

    #[cfg_attr(test, mutants::skip)] // Trivial delegation, do not waste time on mutation.
    fn run_on(
        &self,
        processor: ProcessorIndex,
        procedure: &mut Procedure<'_>,
    ) -> Result<(), Status> {
        (**self).run_on(processor, procedure)
    }

    #[cfg_attr(test, mutants::skip)] // Trivial delegation, do not waste time on mutation.
    fn run_on_all(&self, procedure: &BroadcastProcedure<'_>) -> Result<(), Status> {
        (**self).run_on_all(procedure)
    }
}
