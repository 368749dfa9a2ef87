use derive_more::derive::Display;

/// Identifies a logical processor by the index the multiprocessor dispatcher assigned to it.
///
/// This is the value passed back into [`Dispatcher::run_on()`][crate::Dispatcher::run_on]. It is
/// not guaranteed to match the local APIC identifier of the processor, which is reported
/// separately as [`ProcessorId`].
pub type ProcessorIndex = usize;

/// The hardware identifier of a logical processor (its local APIC identifier).
pub type ProcessorId = u32;

/// Identifies a physical package (socket), as reported by the processor location information.
pub type PackageId = u32;

/// A raw status code returned by a firmware collaborator (dispatcher or register accessor).
///
/// The crate never interprets the value beyond carrying it into diagnostics. It is displayed in
/// hexadecimal, matching how firmware status words are conventionally printed.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
#[display("{_0:#x}")]
#[expect(
    clippy::exhaustive_structs,
    reason = "firmware collaborators construct statuses from raw status words"
)]
pub struct Status(pub usize);

impl Status {
    /// Returns the raw status word.
    #[must_use]
    pub const fn code(self) -> usize {
        self.0
    }
}

impl From<usize> for Status {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn status_displays_as_hex() {
        let status = Status(0x8000_0000_0000_0003);

        assert_eq!(status.to_string(), "0x8000000000000003");
        assert_eq!(status.code(), 0x8000_0000_0000_0003);
    }
}
