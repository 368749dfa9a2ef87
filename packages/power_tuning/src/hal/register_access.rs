use crate::{MmioRegister, Msr, Status};

/// Raw register primitives of the processor executing the call.
///
/// Model-specific register operations act on the register file of the current execution
/// context, so callers that need a specific processor must first get there via the
/// [`Dispatcher`][crate::Dispatcher]. Memory-mapped registers are shared by the whole package
/// and visible to every processor in it once written.
///
/// Reads are expected to be free of side effects. Writes affect only the named register.
pub trait RegisterAccess {
    /// Reads a model-specific register.
    fn read_msr(&self, msr: Msr) -> Result<u64, Status>;

    /// Writes a model-specific register.
    fn write_msr(&self, msr: Msr, value: u64) -> Result<(), Status>;

    /// Reads a memory-mapped power management register.
    fn read_mmio(&self, register: MmioRegister) -> Result<u64, Status>;

    /// Writes a memory-mapped power management register.
    fn write_mmio(&self, register: MmioRegister, value: u64) -> Result<(), Status>;

    /// Returns EAX of CPUID leaf 1 (processor version information).
    fn cpuid_version(&self) -> Result<u32, Status>;
}

impl<T> RegisterAccess for &T
where
    T: RegisterAccess + ?Sized,
{
    #[cfg_attr(test, mutants::skip)] // Trivial delegation, do not waste time on mutation.
    fn read_msr(&self, msr: Msr) -> Result<u64, Status> {
        (**self).read_msr(msr)
    }

    #[cfg_attr(test, mutants::skip)] // Trivial delegation, do not waste time on mutation.
    fn write_msr(&self, msr: Msr, value: u64) -> Result<(), Status> {
        (**self).write_msr(msr, value)
    }

    #[cfg_attr(test, mutants::skip)] // Trivial delegation, do not waste time on mutation.
    fn read_mmio(&self, register: MmioRegister) -> Result<u64, Status> {
        (**self).read_mmio(register)
    }

    #[cfg_attr(test, mutants::skip)] // Trivial delegation, do not waste time on mutation.
    fn write_mmio(&self, register: MmioRegister, value: u64) -> Result<(), Status> {
        (**self).write_mmio(register, value)
    }

    #[cfg_attr(test, mutants::skip)] // Trivial delegation, do not waste time on mutation.
    fn cpuid_version(&self) -> Result<u32, Status> {
        (**self).cpuid_version()
    }
}
