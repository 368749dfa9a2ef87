//! Typed wrappers over the [`Dispatcher`] capability that carry results back from the target
//! processor.

use std::sync::{Mutex, PoisonError};

use log::debug;

use crate::error::Result;
use crate::{Dispatcher, Error, ProcessorIndex, Status};

/// Runs `work` on `processor` and returns what it produced.
pub(crate) fn run_on<D, T, F>(dispatcher: &D, processor: ProcessorIndex, work: F) -> Result<T>
where
    D: Dispatcher + ?Sized,
    F: FnOnce() -> T + Send,
    T: Send,
{
    let mut work = Some(work);
    let mut output = None;

    let mut procedure = || {
        if let Some(work) = work.take() {
            output = Some(work());
        }

        Ok::<(), Status>(())
    };

    debug!("dispatching to processor {processor}");
    dispatcher
        .run_on(processor, &mut procedure)
        .map_err(|status| Error::Dispatch { processor, status })?;

    output.ok_or(Error::ProcedureNotRun { processor })
}

/// Runs `work` on every enabled processor and gathers everything it produced.
///
/// The order of the gathered items across processors is unspecified.
pub(crate) fn run_on_all<D, T, F>(dispatcher: &D, work: F) -> (Vec<T>, Result<()>)
where
    D: Dispatcher + ?Sized,
    F: Fn() -> Vec<T> + Sync,
    T: Send,
{
    let gathered = Mutex::new(Vec::new());

    let procedure = || {
        let items = work();

        gathered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(items);

        Ok::<(), Status>(())
    };

    debug!("broadcasting to all processors");
    let result = dispatcher
        .run_on_all(&procedure)
        .map_err(|status| Error::Broadcast { status });

    let items = gathered
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner);

    (items, result)
}
