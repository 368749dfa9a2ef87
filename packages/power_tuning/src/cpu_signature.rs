use std::fmt::{self, Display};

use bit_field::BitField;

/// The processor version signature (EAX of CPUID leaf 1).
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[expect(clippy::exhaustive_structs, reason = "plain newtype over the raw CPUID value")]
pub struct CpuSignature(pub u32);

impl CpuSignature {
    /// The display family, including the extended family where applicable.
    #[must_use]
    pub fn family(self) -> u32 {
        let family = self.0.get_bits(8..12);

        if family == 0xF {
            family.saturating_add(self.0.get_bits(20..28))
        } else {
            family
        }
    }

    /// The display model, including the extended model where applicable.
    #[must_use]
    pub fn model(self) -> u32 {
        let family = self.0.get_bits(8..12);
        let model = self.0.get_bits(4..8);

        if family == 0x6 || family == 0xF {
            (self.0.get_bits(16..20) << 4) | model
        } else {
            model
        }
    }

    /// The stepping.
    #[must_use]
    pub fn stepping(self) -> u32 {
        self.0.get_bits(0..4)
    }
}

impl Display for CpuSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "family {:#x} model {:#x} stepping {}",
            self.family(),
            self.model(),
            self.stepping()
        )
    }
}
