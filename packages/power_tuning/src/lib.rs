#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Pre-boot processor power tuning.
//!
//! This package discovers the processor topology of a machine, probes the voltage/frequency and
//! power-limit capabilities of each package and then programs an operator-supplied policy into
//! the hardware in a fixed sequence of stages, applying irreversible lock bits only after all
//! other programming has completed on every processor.
//!
//! The hardware is reached through two injected capabilities:
//!
//! * [`Dispatcher`] runs a procedure on a specific logical processor, or on all of them, and
//!   blocks until it has completed.
//! * [`RegisterAccess`] reads and writes model-specific and memory-mapped registers of the
//!   processor it is called on.
//!
//! # Usage
//!
//! ```
//! use power_tuning::fake::MachineBuilder;
//! use power_tuning::{DomainKind, Milliwatts, Pl12Policy, Tuner, VfTarget};
//! use new_zealand::nz;
//!
//! # let machine = MachineBuilder::from_counts(nz!(1), nz!(4), nz!(2)).build();
//! # let (dispatcher, registers) = (&machine, &machine);
//! let tuner = Tuner::new(dispatcher, registers);
//!
//! // Discovery and probing. Failures here are fatal for power tuning.
//! let mut platform = tuner.bring_up()?;
//!
//! // The policy source fills in what to program.
//! for package in platform.packages_mut() {
//!     let mut pl12 = Pl12Policy::new(Milliwatts::from_watts(45), Milliwatts::from_watts(65));
//!     pl12.clamp = true;
//!
//!     let policy = package.policy_mut();
//!     policy.pl12_msr = Some(pl12);
//!     policy.locks.pl12_msr = true;
//!
//!     if let Some(ring) = package.domain_mut(DomainKind::Ring) {
//!         ring.set_target(Some(VfTarget {
//!             max_ratio: Some(42),
//!             ..VfTarget::default()
//!         }));
//!     }
//! }
//!
//! // Programming is best-effort. The report lists every feature that could not be applied.
//! let report = tuner.program(&platform)?;
//!
//! for failure in report.failures() {
//!     println!("{failure}");
//! }
//! # assert!(report.is_success());
//! # Ok::<(), power_tuning::Error>(())
//! ```
//!
//! # Stages
//!
//! 1. Register-file programming, dispatched to every processor of every package: turbo ratio,
//!    per-domain V/F overrides, configurable TDP level, PL1/PL2, PL3, PL4 and PP0.
//! 2. Memory-mapped programming, dispatched to one processor per package: the memory-mapped
//!    PL1/PL2 mirror.
//! 3. Register-file locks, broadcast to every processor.
//! 4. Memory-mapped locks, dispatched to one processor per package.
//!
//! Each stage completes on the whole platform before the next one starts.
//!
//! # Logging
//!
//! Diagnostics are emitted through the [`log`](https://docs.rs/log) facade. The embedding
//! firmware decides where they go.
//!
//! # Testing with a simulated machine
//!
//! The `test-util` Cargo feature enables the [`fake`] module, which simulates a multi-package
//! machine with per-processor register files, hardware lock semantics and fault injection.

mod accessors;
mod cpu_profile;
mod cpu_signature;
mod dispatch;
mod domain;
mod error;
mod hal;
mod mailbox;
mod pipeline;
mod policy;
mod power_limits;
mod primitive_types;
mod probe;
mod report;
mod topology;
mod tuner;
mod units;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

pub use accessors::{ConfigTdp, TURBO_RATIO_BUCKETS, TurboRatioLimits};
pub use cpu_profile::*;
pub use cpu_signature::*;
pub use domain::*;
pub use error::Error;
pub use hal::{
    BroadcastProcedure, Dispatcher, MmioRegister, Msr, Procedure, ProcessorCounts, ProcessorInfo,
    ProcessorLocation, RegisterAccess,
};
pub use policy::*;
pub use power_limits::{LimitField, PkgPowerLimit, PowerInfo};
pub use primitive_types::*;
pub use probe::PackageProbe;
pub use report::*;
pub use topology::{Core, Package, Platform, TopologyLimits};
pub use tuner::*;
pub use units::{Milliamps, Milliseconds, Millivolts, Milliwatts, PowerUnits};
