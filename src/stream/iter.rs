//! Stream sources.

use super::base::StreamBase;
use super::builder::PullStreamBuilder;
use crate::combinator::a_value;
use crate::promise::Promise;
use crate::types::Value;
use parking_lot::Mutex;
use std::ops::Range;

/// Constructors for source streams.
#[derive(Debug, Clone, Copy)]
pub struct Streams;

impl Streams {
    /// A stream that calls `producer` for each read. Returning `None` ends
    /// the stream.
    pub fn for_producer<T, F>(producer: F) -> PullStreamBuilder<T>
    where
        T: Value,
        F: FnMut() -> Promise<Option<T>> + Send + 'static,
    {
        let producer = Mutex::new(producer);
        PullStreamBuilder::new(StreamBase::new(move || (producer.lock())()))
    }

    /// A stream over the items of `iter`.
    pub fn for_iter<T, I>(iter: I) -> PullStreamBuilder<T>
    where
        T: Value,
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        let iter = Mutex::new(iter.into_iter());
        PullStreamBuilder::new(StreamBase::new(move || a_value(iter.lock().next())))
    }

    /// A stream over `range`.
    pub fn for_range(range: Range<i64>) -> PullStreamBuilder<i64> {
        Self::for_iter(range)
    }

    /// A stream that ends immediately.
    pub fn empty<T: Value>() -> PullStreamBuilder<T> {
        Self::for_iter(std::iter::empty())
    }

    /// A stream with a single item.
    pub fn single<T: Value>(value: T) -> PullStreamBuilder<T> {
        Self::for_iter(std::iter::once(value))
    }
}
