use thiserror::Error;

use crate::{DomainKind, MmioRegister, Msr, PackageId, ProcessorId, ProcessorIndex, Status};

/// Errors that can occur while discovering, probing or programming the platform.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// The dispatcher could not run a procedure on the target processor, or the procedure
    /// reported a failure status.
    #[error("dispatch to processor {processor} failed with status {status}")]
    Dispatch {
        /// Dispatcher index of the target processor.
        processor: ProcessorIndex,

        /// Raw status reported by the dispatcher.
        status: Status,
    },

    /// The dispatcher could not broadcast a procedure to every processor, or the procedure
    /// reported a failure status on at least one of them.
    #[error("broadcast to all processors failed with status {status}")]
    Broadcast {
        /// Raw status reported by the dispatcher.
        status: Status,
    },

    /// A dispatcher query needed for topology discovery failed.
    #[error("{operation} failed with status {status}")]
    Enumeration {
        /// The query that failed.
        operation: &'static str,

        /// Raw status reported by the dispatcher.
        status: Status,
    },

    /// The dispatcher reported success without running the procedure on the target processor.
    #[error("dispatcher did not run the procedure on processor {processor}")]
    ProcedureNotRun {
        /// Dispatcher index of the target processor.
        processor: ProcessorIndex,
    },

    /// Reading or writing a model-specific register failed.
    #[error("access to {msr} failed with status {status}")]
    Msr {
        /// The register being accessed.
        msr: Msr,

        /// Raw status reported by the register accessor.
        status: Status,
    },

    /// Reading or writing a memory-mapped register failed.
    #[error("access to {register} failed with status {status}")]
    Mmio {
        /// The register being accessed.
        register: MmioRegister,

        /// Raw status reported by the register accessor.
        status: Status,
    },

    /// Reading the processor version information failed.
    #[error("CPUID version query failed with status {status}")]
    Cpuid {
        /// Raw status reported by the register accessor.
        status: Status,
    },

    /// The overclocking mailbox completed a command with a non-zero completion code.
    #[error("mailbox command {command:#04x} for {domain} domain completed with code {code:#04x}")]
    Mailbox {
        /// The mailbox command.
        command: u8,

        /// The domain addressed by the command.
        domain: DomainKind,

        /// The completion code reported by the mailbox.
        code: u8,
    },

    /// The overclocking mailbox stayed busy for longer than the polling limit.
    #[error("mailbox command {command:#04x} for {domain} domain did not complete")]
    MailboxTimeout {
        /// The mailbox command.
        command: u8,

        /// The domain addressed by the command.
        domain: DomainKind,
    },

    /// A V/F curve point was addressed that the domain does not expose.
    #[error("{domain} domain exposes {exposed} V/F points, point {point} requested")]
    UnsupportedVfPoint {
        /// The domain addressed.
        domain: DomainKind,

        /// The requested 1-based curve point.
        point: u8,

        /// Number of points the domain exposes.
        exposed: u8,
    },

    /// The configurable TDP level control is locked and cannot be changed before the next
    /// power cycle.
    #[error("configurable TDP level control is locked")]
    ConfigTdpLocked,

    /// The requested configurable TDP level is not supported by the package.
    #[error("configurable TDP level {level} requested, the package supports at most {max_level}")]
    ConfigTdpLevelUnsupported {
        /// The requested level.
        level: u8,

        /// The highest level the package reports.
        max_level: u8,
    },

    /// The discovered topology does not fit the configured limits.
    #[error("{what} exceeds the configured capacity of {capacity}")]
    CapacityExceeded {
        /// What overflowed.
        what: &'static str,

        /// The configured limit.
        capacity: usize,
    },

    /// Two enabled processors reported the same hardware identifier.
    #[error("processors {first} and {second} both report hardware identifier {id}")]
    DuplicateProcessorId {
        /// The hardware identifier reported twice.
        id: ProcessorId,

        /// Dispatcher index of the processor that reported it first.
        first: ProcessorIndex,

        /// Dispatcher index of the processor that reported it again.
        second: ProcessorIndex,
    },

    /// The dispatcher reported no enabled processors.
    #[error("no enabled processors were reported")]
    NoProcessors,

    /// Programming was requested for a package whose capabilities were never probed.
    #[error("package {package} has not been probed")]
    NotProbed {
        /// The package in question.
        package: PackageId,
    },
}

/// A specialized `Result` type for power tuning operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug, Clone);

    #[test]
    fn messages_name_operation_and_status() {
        let error = Error::Msr {
            msr: Msr::PkgPowerLimit,
            status: Status(0x15),
        };

        assert_eq!(error.to_string(), "access to PKG_POWER_LIMIT failed with status 0x15");

        let error = Error::Mailbox {
            command: 0x11,
            domain: DomainKind::Ring,
            code: 0x7,
        };

        assert_eq!(
            error.to_string(),
            "mailbox command 0x11 for ring domain completed with code 0x07"
        );
    }
}
