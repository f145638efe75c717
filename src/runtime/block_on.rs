//! Run an asynchronous computation to completion on the calling thread.
//!
//! `block_on` turns the calling thread into a temporary single-thread vat,
//! starts the computation on it, and runs the vat loop until the returned
//! promise resolves. Continuations registered by the computation with the
//! default vat therefore run on the calling thread.

use super::single_thread::SingleThreadVat;
use super::vat::Vat;
use crate::combinator::a_now;
use crate::error::{Error, ErrorKind};
use crate::promise::Promise;
use crate::types::{Outcome, Value};
use parking_lot::Mutex;
use std::sync::Arc;

/// Runs `body` on a temporary vat owned by this thread and returns its
/// outcome.
///
/// Fails with [`VatAlreadyActive`](ErrorKind::VatAlreadyActive) when called
/// from inside a vat: blocking a vat thread would stall every continuation
/// queued behind it.
pub fn block_on_outcome<T, F>(body: F) -> Outcome<T>
where
    T: Value,
    F: FnOnce() -> Promise<T> + Send + 'static,
{
    if let Some(current) = Vat::current_or_none() {
        return Outcome::Failure(
            Error::new(ErrorKind::VatAlreadyActive)
                .with_message(format!("block_on called on {}", current.id())),
        );
    }

    let owner = SingleThreadVat::new("block-on");
    let slot: Arc<Mutex<Option<Outcome<T>>>> = Arc::new(Mutex::new(None));
    let result = Arc::clone(&slot);
    let stopper = owner.stopper();
    owner.vat().execute(move || {
        a_now(body).listen_sync(move |outcome| {
            *result.lock() = Some(outcome);
            stopper.stop();
        });
    });

    if let Err(error) = owner.run_in_current_thread() {
        return Outcome::Failure(error);
    }
    let outcome = slot.lock().take();
    outcome.unwrap_or_else(|| {
        Outcome::Failure(Error::illegal_state(
            "block_on loop exited before the computation resolved",
        ))
    })
}

/// Runs `body` to completion and returns its value or failure.
pub fn block_on<T, F>(body: F) -> Result<T, Error>
where
    T: Value,
    F: FnOnce() -> Promise<T> + Send + 'static,
{
    block_on_outcome(body).force()
}
