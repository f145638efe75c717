//! Pipelining stages.
//!
//! These stages accept overlapping `next` calls. Only the read of the
//! upstream is serialized, through a [`RequestQueue`], so transforms of
//! consecutive elements may run at the same time while results are still
//! handed out in read order.

use super::stream::{AsyncStream, SharedStream};
use crate::combinator::{AsyncCloseable, a_now};
use crate::promise::Promise;
use crate::sync::RequestQueue;
use crate::types::Value;
use std::sync::Arc;

type Mapper<T, R> = Arc<dyn Fn(T) -> Promise<R> + Send + Sync>;

/// Applies an asynchronous function to every element.
pub struct MapStream<T, R> {
    upstream: SharedStream<T>,
    mapper: Mapper<T, R>,
    reads: RequestQueue,
}

impl<T: Value, R: Value> MapStream<T, R> {
    /// Maps `upstream` through `mapper`.
    pub fn new<F>(upstream: SharedStream<T>, mapper: F) -> Self
    where
        F: Fn(T) -> Promise<R> + Send + Sync + 'static,
    {
        Self {
            upstream,
            mapper: Arc::new(mapper),
            reads: RequestQueue::new(),
        }
    }
}

impl<T: Value, R: Value> AsyncCloseable for MapStream<T, R> {
    fn close(&self) -> Promise<()> {
        self.upstream.close()
    }
}

impl<T: Value, R: Value> AsyncStream<R> for MapStream<T, R> {
    fn next(&self) -> Promise<Option<R>> {
        let upstream = Arc::clone(&self.upstream);
        let mapper = Arc::clone(&self.mapper);
        self.reads
            .run(move || upstream.next())
            .flat_map(move |item| match item {
                Some(value) => a_now(move || mapper(value)).map(Some),
                None => Promise::success(None),
            })
    }

    fn supports_pipelining(&self) -> bool {
        true
    }
}

/// Lets a single-consumer stream accept overlapping `next` calls by
/// queueing them.
pub struct SerializedStream<T> {
    upstream: SharedStream<T>,
    reads: RequestQueue,
}

impl<T: Value> SerializedStream<T> {
    /// Wraps `upstream`.
    pub fn new(upstream: SharedStream<T>) -> Self {
        Self {
            upstream,
            reads: RequestQueue::new(),
        }
    }

    /// Returns `upstream` itself when it already pipelines.
    pub fn wrap(upstream: SharedStream<T>) -> SharedStream<T> {
        if upstream.supports_pipelining() {
            upstream
        } else {
            Arc::new(Self::new(upstream))
        }
    }
}

impl<T: Value> AsyncCloseable for SerializedStream<T> {
    fn close(&self) -> Promise<()> {
        self.upstream.close()
    }
}

impl<T: Value> AsyncStream<T> for SerializedStream<T> {
    fn next(&self) -> Promise<Option<T>> {
        let upstream = Arc::clone(&self.upstream);
        self.reads.run(move || upstream.next())
    }

    fn supports_pipelining(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combinator::{a_all_for_collect, a_value};
    use crate::runtime::block_on;
    use crate::promise::Resolver;
    use crate::stream::Streams;
    use crate::types::Outcome;
    use parking_lot::Mutex;

    #[test]
    fn overlapping_reads_keep_order() {
        let (values, in_flight) = block_on(|| {
            let gates: Arc<Mutex<Vec<Resolver<i64>>>> = Arc::default();
            let held = Arc::clone(&gates);
            let mapped = MapStream::new(Streams::for_range(0..3).stream(), move |i| {
                let (promise, resolver) = Promise::create();
                held.lock().push(resolver);
                promise.map(move |offset: i64| i * 10 + offset)
            });
            let reads: Vec<_> = (0..4).map(|_| mapped.next()).collect();
            let in_flight = gates.lock().len();
            let pending: Vec<_> = gates.lock().drain(..).rev().collect();
            for resolver in pending {
                resolver.resolve_or_log(Outcome::Success(1));
            }
            a_all_for_collect(reads, |p| p).map(move |values| (values, in_flight))
        })
        .expect("reads");
        assert_eq!(in_flight, 3, "all three transforms in flight");
        assert_eq!(values, vec![Some(1), Some(11), Some(21), None]);
    }

    #[test]
    fn serialized_stream_accepts_overlapping_reads() {
        let values = block_on(|| {
            let stream = SerializedStream::wrap(Streams::for_iter(vec![1, 2, 3]).stream());
            let reads: Vec<_> = (0..3).map(|_| stream.next()).collect();
            a_all_for_collect(reads, |p| p)
        })
        .expect("reads");
        assert_eq!(values, vec![Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn mapper_failure_fails_that_read() {
        let first = block_on(|| {
            let mapped = MapStream::new(Streams::for_range(0..2).stream(), |i| {
                if i == 0 {
                    Promise::failure(crate::Error::user("bad element"))
                } else {
                    a_value(i)
                }
            });
            mapped.next()
        });
        assert_eq!(first.unwrap_err().message(), Some("bad element"));
    }
}
