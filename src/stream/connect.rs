//! Copying a stream into a sink.

use super::stream::{SharedSink, SharedStream};
use crate::combinator::{a_now, a_seq_until_value, a_value};
use crate::promise::Promise;
use crate::types::{Outcome, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Reads `stream` to its end, putting every element into `sink`, and
/// resolves with the number of elements transferred.
///
/// - end of the stream closes the sink
/// - a read failure is passed on with [`fail`](super::AsyncSink::fail) and
///   fails the transfer
/// - a rejected put closes the stream and fails the transfer
pub fn connect<T: Value>(stream: SharedStream<T>, sink: SharedSink<T>) -> Promise<u64> {
    let count = Arc::new(AtomicU64::new(0));
    a_seq_until_value(move || {
        let (stream, sink, count) = (Arc::clone(&stream), Arc::clone(&sink), Arc::clone(&count));
        stream.next().flat_map_outcome(move |read| match read {
            Outcome::Success(Some(value)) => {
                let reader = Arc::clone(&stream);
                a_now(|| sink.put(value)).flat_map_outcome(move |put| match put {
                    Outcome::Success(()) => {
                        count.fetch_add(1, Ordering::Relaxed);
                        a_value(None)
                    }
                    Outcome::Failure(error) => {
                        tracing::debug!(%error, "sink rejected element, closing source");
                        reader.close().then_failure(error)
                    }
                })
            }
            Outcome::Success(None) => sink
                .close()
                .map(move |()| Some(count.load(Ordering::Relaxed))),
            Outcome::Failure(error) => sink.fail(error.clone()).then_failure(error),
        })
    })
}
