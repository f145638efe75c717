//! Sequential transform stages.
//!
//! Every stage is a [`StreamBase`] reading its upstream one element at a
//! time. Closing a stage closes its upstream.

use super::base::StreamBase;
use super::stream::{AsyncStream, SharedStream};
use crate::combinator::{a_now, a_seq_until_value, a_value};
use crate::promise::Promise;
use crate::types::Value;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

fn closing<T: Value>(upstream: &SharedStream<T>) -> impl FnOnce() -> Promise<()> + Send + 'static {
    let upstream = Arc::clone(upstream);
    move || upstream.close()
}

/// Reads `upstream` until `step` yields an element to emit.
///
/// `step` returns `Some(item)` to emit `item` and `None` to skip the
/// element. End of the upstream ends the stage.
pub fn filter_map<T, R, F>(upstream: SharedStream<T>, step: F) -> StreamBase<R>
where
    T: Value,
    R: Value,
    F: Fn(T) -> Promise<Option<R>> + Send + Sync + 'static,
{
    let step = Arc::new(step);
    let on_close = closing(&upstream);
    StreamBase::with_close(
        move || {
            let upstream = Arc::clone(&upstream);
            let step = Arc::clone(&step);
            a_seq_until_value(move || {
                let step = Arc::clone(&step);
                upstream.next().flat_map(move |item| match item {
                    None => a_value(Some(None)),
                    Some(value) => a_now(move || step(value)).map(|kept| kept.map(Some)),
                })
            })
        },
        on_close,
    )
}

/// Keeps the elements for which `predicate` resolves to true.
pub fn filter<T, F>(upstream: SharedStream<T>, predicate: F) -> StreamBase<T>
where
    T: Value,
    F: Fn(T) -> Promise<bool> + Send + Sync + 'static,
{
    filter_map(upstream, move |value: T| {
        predicate(value.clone()).map(move |keep| keep.then_some(value))
    })
}

/// Keeps the elements for which `predicate` returns true.
pub fn filter_sync<T, F>(upstream: SharedStream<T>, predicate: F) -> StreamBase<T>
where
    T: Value,
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    filter_map(upstream, move |value| a_value(predicate(&value).then_some(value)))
}

/// Drops consecutive duplicates.
pub fn changed<T>(upstream: SharedStream<T>) -> StreamBase<T>
where
    T: Value + PartialEq,
{
    let last: Mutex<Option<T>> = Mutex::new(None);
    filter_map(upstream, move |value: T| {
        let mut last = last.lock();
        if last.as_ref() == Some(&value) {
            a_value(None)
        } else {
            *last = Some(value.clone());
            a_value(Some(value))
        }
    })
}

/// Emits at most `limit` elements, then ends and closes the upstream.
pub fn head<T: Value>(upstream: SharedStream<T>, limit: usize) -> StreamBase<T> {
    let taken = Mutex::new(0_usize);
    let on_close = closing(&upstream);
    StreamBase::with_close(
        move || {
            {
                let mut taken = taken.lock();
                if *taken >= limit {
                    return a_value(None);
                }
                *taken += 1;
            }
            upstream.next()
        },
        on_close,
    )
}

/// Expands each element into the items of an iterable. Elements that
/// expand to nothing are skipped.
pub fn flat_map_iterable<T, R, I, F>(upstream: SharedStream<T>, expand: F) -> StreamBase<R>
where
    T: Value,
    R: Value,
    I: IntoIterator<Item = R> + Value,
    F: Fn(T) -> Promise<I> + Send + Sync + 'static,
{
    let buffer: Arc<Mutex<VecDeque<R>>> = Arc::default();
    let expand = Arc::new(expand);
    let on_close = closing(&upstream);
    StreamBase::with_close(
        move || {
            let upstream = Arc::clone(&upstream);
            let buffer = Arc::clone(&buffer);
            let expand = Arc::clone(&expand);
            a_seq_until_value(move || {
                if let Some(item) = buffer.lock().pop_front() {
                    return a_value(Some(Some(item)));
                }
                let buffer = Arc::clone(&buffer);
                let expand = Arc::clone(&expand);
                upstream.next().flat_map(move |item| match item {
                    None => a_value(Some(None)),
                    Some(value) => a_now(move || expand(value)).map(move |items| {
                        let mut items = items.into_iter();
                        let first = items.next();
                        buffer.lock().extend(items);
                        first.map(Some)
                    }),
                })
            })
        },
        on_close,
    )
}

/// Concatenates the streams produced for each element.
///
/// Each inner stream is read to its end before the next upstream element
/// is taken.
pub fn flat_map_stream<T, R, F>(upstream: SharedStream<T>, open: F) -> StreamBase<R>
where
    T: Value,
    R: Value,
    F: Fn(T) -> Promise<SharedStream<R>> + Send + Sync + 'static,
{
    let current: Arc<Mutex<Option<SharedStream<R>>>> = Arc::default();
    let open = Arc::new(open);
    let on_close = {
        let upstream = Arc::clone(&upstream);
        let current = Arc::clone(&current);
        move || {
            let inner = current.lock().take();
            match inner {
                Some(inner) => inner.close().flat_map_outcome(move |closed| {
                    upstream.close().flat_map(move |()| Promise::resolved(closed))
                }),
                None => upstream.close(),
            }
        }
    };
    StreamBase::with_close(
        move || {
            let upstream = Arc::clone(&upstream);
            let current = Arc::clone(&current);
            let open = Arc::clone(&open);
            a_seq_until_value(move || {
                let inner = current.lock().clone();
                let current = Arc::clone(&current);
                if let Some(inner) = inner {
                    return inner.next().map(move |item| match item {
                        Some(value) => Some(Some(value)),
                        None => {
                            current.lock().take();
                            None
                        }
                    });
                }
                let open = Arc::clone(&open);
                upstream.next().flat_map(move |item| match item {
                    None => a_value(Some(None)),
                    Some(value) => a_now(move || open(value)).map(move |inner| {
                        *current.lock() = Some(inner);
                        None
                    }),
                })
            })
        },
        on_close,
    )
}
