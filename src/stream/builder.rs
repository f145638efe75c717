//! Fluent construction and consumption of pull streams.
//!
//! # Example
//!
//! ```
//! use vatflow::stream::Streams;
//! use vatflow::{a_value, block_on};
//!
//! let total = block_on(|| {
//!     Streams::for_range(0..10)
//!         .filter_sync(|i| i % 3 == 0)
//!         .map(|i| a_value(i * i))
//!         .left_fold(0, |sum, i| a_value(sum + i))
//! })
//! .unwrap();
//! assert_eq!(total, 0 + 9 + 36 + 81);
//! ```

use super::base::StreamBase;
use super::connect::connect;
use super::export::ExportedStream;
use super::map::MapStream;
use super::push::PushStreamBuilder;
use super::stream::{AsyncSink, AsyncStream, SharedStream};
use super::transform;
use super::window::window;
use crate::combinator::{a_now, a_seq_while, a_try_resource, a_value};
use crate::error::Error;
use crate::promise::Promise;
use crate::runtime::Vat;
use crate::types::Value;
use parking_lot::Mutex;
use std::sync::Arc;

/// Builder over a pull stream. Each stage consumes the builder and returns
/// a builder over the new stream; the consuming operations read the stream
/// to its end and close it.
#[must_use = "a stream builder reads nothing until consumed"]
pub struct PullStreamBuilder<T> {
    stream: SharedStream<T>,
}

impl<T: Value> PullStreamBuilder<T> {
    /// Wraps `stream`.
    pub fn new<S: AsyncStream<T>>(stream: S) -> Self {
        Self {
            stream: Arc::new(stream),
        }
    }

    /// Wraps an already shared stream.
    pub fn from_shared(stream: SharedStream<T>) -> Self {
        Self { stream }
    }

    /// The stream built so far.
    #[must_use]
    pub fn stream(self) -> SharedStream<T> {
        self.stream
    }

    /// Applies `action` to the builder, for reusable pipeline fragments.
    pub fn process<R, F: FnOnce(Self) -> R>(self, action: F) -> R {
        action(self)
    }

    // === Stages ===

    /// Maps every element through an asynchronous function.
    ///
    /// The mapping stage pipelines: put a [`window`](Self::window) after it
    /// to map several elements at once.
    pub fn map<R, F>(self, mapper: F) -> PullStreamBuilder<R>
    where
        R: Value,
        F: Fn(T) -> Promise<R> + Send + Sync + 'static,
    {
        PullStreamBuilder::new(MapStream::new(self.stream, mapper))
    }

    /// Maps every element through a plain function.
    pub fn map_sync<R, F>(self, mapper: F) -> PullStreamBuilder<R>
    where
        R: Value,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        self.map(move |value| a_value(mapper(value)))
    }

    /// Maps every element to an optional element, skipping `None`.
    pub fn flat_map_option<R, F>(self, mapper: F) -> PullStreamBuilder<R>
    where
        R: Value,
        F: Fn(T) -> Promise<Option<R>> + Send + Sync + 'static,
    {
        PullStreamBuilder::new(transform::filter_map(self.stream, mapper))
    }

    /// Keeps the elements for which `predicate` resolves to true.
    pub fn filter<F>(self, predicate: F) -> Self
    where
        F: Fn(T) -> Promise<bool> + Send + Sync + 'static,
    {
        Self::new(transform::filter(self.stream, predicate))
    }

    /// Keeps the elements for which `predicate` returns true.
    pub fn filter_sync<F>(self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self::new(transform::filter_sync(self.stream, predicate))
    }

    /// Concatenates the streams opened for each element.
    pub fn flat_map_stream<R, F>(self, open: F) -> PullStreamBuilder<R>
    where
        R: Value,
        F: Fn(T) -> Promise<SharedStream<R>> + Send + Sync + 'static,
    {
        PullStreamBuilder::new(transform::flat_map_stream(self.stream, open))
    }

    /// Expands each element into the items of an iterable.
    pub fn flat_map_iterable<R, I, F>(self, expand: F) -> PullStreamBuilder<R>
    where
        R: Value,
        I: IntoIterator<Item = R> + Value,
        F: Fn(T) -> Promise<I> + Send + Sync + 'static,
    {
        PullStreamBuilder::new(transform::flat_map_iterable(self.stream, expand))
    }

    /// Keeps up to `size` reads outstanding, results in read order.
    ///
    /// Fails with [`InvalidArgument`](crate::ErrorKind::InvalidArgument) if
    /// `size` is zero.
    pub fn window(self, size: usize) -> Result<Self, Error> {
        window(self.stream, size).map(Self::new)
    }

    /// Takes the first `limit` elements and closes the rest of the stream.
    pub fn head(self, limit: usize) -> Self {
        Self::new(transform::head(self.stream, limit))
    }

    /// Drops consecutive duplicates.
    pub fn changed(self) -> Self
    where
        T: PartialEq,
    {
        Self::new(transform::changed(self.stream))
    }

    // === Consumers ===

    /// Feeds every element to `body` until the stream ends or `body`
    /// resolves to false. The stream is closed either way.
    pub fn consume<F>(self, body: F) -> Promise<()>
    where
        F: FnMut(T) -> Promise<bool> + Send + 'static,
    {
        let body = Arc::new(Mutex::new(Some(body)));
        a_try_resource(self.stream).run(move |stream| {
            a_seq_while(move || {
                let body = Arc::clone(&body);
                stream.next().flat_map(move |item| match item {
                    None => a_value(false),
                    Some(value) => call_body(&body, value),
                })
            })
        })
    }

    /// Folds the elements into an accumulator.
    pub fn left_fold<R, F>(self, initial: R, mut folder: F) -> Promise<R>
    where
        R: Value,
        F: FnMut(R, T) -> Promise<R> + Send + 'static,
    {
        let acc = Arc::new(Mutex::new(Some(initial)));
        let result = Arc::clone(&acc);
        self.consume(move |value| {
            let Some(current) = acc.lock().take() else {
                return Promise::failure(Error::illegal_state("fold accumulator missing"));
            };
            let acc = Arc::clone(&acc);
            folder(current, value).map(move |next| {
                *acc.lock() = Some(next);
                true
            })
        })
        .try_map(move |()| {
            result
                .lock()
                .take()
                .ok_or_else(|| Error::illegal_state("fold accumulator missing"))
        })
    }

    /// Reads every element into a vector.
    pub fn to_vec(self) -> Promise<Vec<T>> {
        let items: Arc<Mutex<Vec<T>>> = Arc::default();
        let sink = Arc::clone(&items);
        self.consume(move |value| {
            sink.lock().push(value);
            a_value(true)
        })
        .map(move |()| std::mem::take(&mut *items.lock()))
    }

    /// Reads every element into any collection.
    pub fn collect<C>(self) -> Promise<C>
    where
        C: FromIterator<T> + Value,
    {
        self.to_vec().map(|items| items.into_iter().collect())
    }

    /// Reads the stream to its end, discarding the elements.
    pub fn to_void(self) -> Promise<()> {
        self.consume(|_| a_value(true))
    }

    /// Copies every element into `sink` and resolves with the count.
    pub fn connect<S: AsyncSink<T>>(self, sink: S) -> Promise<u64> {
        connect(self.stream, Arc::new(sink))
    }

    /// A stream whose reads run on `vat`.
    pub fn export(self, vat: &Vat) -> Self {
        Self::new(ExportedStream::new(vat, self.stream))
    }

    /// Continues the pipeline in push mode, fed from this stream.
    pub fn push(self) -> PushStreamBuilder<T> {
        PushStreamBuilder::from_stream(self.stream)
    }
}

pub(super) fn call_body<T, F>(body: &Arc<Mutex<Option<F>>>, value: T) -> Promise<bool>
where
    T: Value,
    F: FnMut(T) -> Promise<bool> + Send + 'static,
{
    let Some(mut f) = body.lock().take() else {
        return Promise::failure(Error::illegal_state("stream consumer re-entered"));
    };
    let result = a_now(|| f(value));
    *body.lock() = Some(f);
    result
}

impl<T: Value> From<StreamBase<T>> for PullStreamBuilder<T> {
    fn from(stream: StreamBase<T>) -> Self {
        Self::new(stream)
    }
}

impl<T: Value> std::fmt::Debug for PullStreamBuilder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullStreamBuilder")
            .field("pipelining", &self.stream.supports_pipelining())
            .finish()
    }
}
