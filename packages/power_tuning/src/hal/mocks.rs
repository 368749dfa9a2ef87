use mockall::mock;

use crate::{MmioRegister, Msr, RegisterAccess, Status};

mock! {
    #[derive(Debug)]
    pub RegisterAccess {}

    impl RegisterAccess for RegisterAccess {
        fn read_msr(&self, msr: Msr) -> Result<u64, Status>;
        fn write_msr(&self, msr: Msr, value: u64) -> Result<(), Status>;
        fn read_mmio(&self, register: MmioRegister) -> Result<u64, Status>;
        fn write_mmio(&self, register: MmioRegister, value: u64) -> Result<(), Status>;
        fn cpuid_version(&self) -> Result<u32, Status>;
    }
}
