//! A simulated machine for testing.
//!
//! [`FakeMachine`] implements both [`Dispatcher`][crate::Dispatcher] and
//! [`RegisterAccess`][crate::RegisterAccess], so it can stand in for the firmware capabilities
//! that a [`Tuner`][crate::Tuner] is given. It simulates:
//!
//! * any number of packages, cores and hardware threads, in any enumeration order;
//! * a separate model-specific register file for every logical processor;
//! * a memory-mapped register window per package;
//! * hardware lock bits: once a lock bit is set, writes to that register are ignored;
//! * the overclocking mailbox, including per-domain V/F curves and IccMax;
//! * injected failures of dispatch, enumeration and register access.
//!
//! Every write and every dispatch is recorded in an event log, so tests can verify what was
//! written where and in which order.
//!
//! Only available when the `test-util` feature is enabled.
//!
//! # Example
//!
//! ```
//! use power_tuning::fake::MachineBuilder;
//! use power_tuning::{Milliamps, Msr, Pl4Policy, Tuner};
//! use new_zealand::nz;
//!
//! // Two packages, each with 4 cores of 2 hardware threads.
//! let machine = MachineBuilder::from_counts(nz!(2), nz!(4), nz!(2)).build();
//! let tuner = Tuner::new(&machine, &machine);
//!
//! let mut platform = tuner.bring_up()?;
//! machine.clear_events();
//!
//! for package in platform.packages_mut() {
//!     package.policy_mut().pl4 = Some(Pl4Policy::new(Milliamps::from_amps(200)));
//! }
//!
//! tuner.program(&platform)?;
//!
//! // PL4 was written on all 16 processors.
//! assert_eq!(machine.msr_writes(Msr::VrCurrentConfig).len(), 16);
//! # Ok::<(), power_tuning::Error>(())
//! ```
//!
//! # Isolation
//!
//! Each fake machine is independent, so tests using separate instances can run in parallel.

mod builder;
mod machine;

pub use builder::*;
pub use machine::*;
