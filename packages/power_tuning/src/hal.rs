//! Hardware abstraction layer. The capabilities in here are provided by the embedding firmware:
//! the multiprocessor dispatch service and the raw register primitives. Everything above this
//! layer is expressed in terms of these traits, so tests can substitute a simulated machine.

mod dispatcher;
pub use dispatcher::*;

mod register_access;
pub use register_access::*;

mod registers;
pub use registers::*;

#[cfg(test)]
mod mocks;
#[cfg(test)]
pub(crate) use mocks::*;
