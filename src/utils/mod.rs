pub mod time;

use std::future::Future;

use tokio::{
    runtime::{Handle, Runtime},
    task::block_in_place,
};

/// Random url-safe id used for workflow ids and manual runs.
pub fn longid() -> String {
    nanoid::nanoid!(21)
}

/// Short random id used for worker identities.
pub fn shortid() -> String {
    nanoid::nanoid!(8)
}

/// Runs `fut` to completion on `runtime` from synchronous code.
///
/// Inside a multi-threaded runtime the current worker is moved off the
/// scheduler first, so this is safe to call from store code running on it.
pub fn block_on<F: Future>(
    runtime: &Runtime,
    fut: F,
) -> F::Output {
    if Handle::try_current().is_ok() {
        block_in_place(|| runtime.block_on(fut))
    } else {
        runtime.block_on(fut)
    }
}
