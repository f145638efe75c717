//! Bounded-concurrency read-ahead.

use super::base::StreamBase;
use super::map::SerializedStream;
use super::stream::{AsyncStream, SharedStream};
use crate::combinator::a_value;
use crate::error::Error;
use crate::promise::Promise;
use crate::types::{Outcome, Value};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

struct WindowState<T> {
    in_flight: VecDeque<Promise<Option<T>>>,
    eof: bool,
}

fn is_last<T>(outcome: &Outcome<Option<T>>) -> bool {
    matches!(outcome, Outcome::Success(None) | Outcome::Failure(_))
}

/// Keeps up to `size` reads of `upstream` outstanding and returns their
/// results in read order.
///
/// Placed after a pipelining stage such as a map, this lets `size`
/// transforms run at once. A non-pipelining upstream is wrapped in a
/// [`SerializedStream`] first. The upstream is not read past its end or its
/// first failure.
pub fn window<T: Value>(upstream: SharedStream<T>, size: usize) -> Result<StreamBase<T>, Error> {
    if size == 0 {
        return Err(Error::invalid_argument("window size must be positive"));
    }
    let upstream = SerializedStream::wrap(upstream);
    let state = Arc::new(Mutex::new(WindowState {
        in_flight: VecDeque::with_capacity(size),
        eof: false,
    }));
    let closer = Arc::clone(&upstream);
    Ok(StreamBase::with_close(
        move || {
            loop {
                let fill = {
                    let guard = state.lock();
                    !guard.eof && guard.in_flight.len() < size
                };
                if !fill {
                    break;
                }
                let read = upstream.next();
                let ended = match read.outcome() {
                    Some(outcome) => is_last(&outcome),
                    None => {
                        let eof = Arc::clone(&state);
                        read.listen_sync(move |outcome| {
                            if is_last(&outcome) {
                                eof.lock().eof = true;
                            }
                        });
                        false
                    }
                };
                let mut guard = state.lock();
                guard.in_flight.push_back(read);
                guard.eof |= ended;
            }
            let front = state.lock().in_flight.pop_front();
            front.unwrap_or_else(|| a_value(None))
        },
        move || closer.close(),
    ))
}
