//! In-memory sink/stream pairs.
//!
//! A [`RendezvousQueue`] connects a writer and a reader with no buffer: a
//! `put` completes when the reader takes the element, so a fast writer is
//! held back by a slow reader. A [`BufferedQueue`] accepts up to its
//! capacity ahead of the reader and only then holds the writer back.

use super::base::StreamBase;
use super::stream::{AsyncSink, SharedSink, SharedStream};
use crate::combinator::{AsyncCloseable, a_void};
use crate::error::Error;
use crate::promise::{Promise, Resolver};
use crate::types::{Outcome, Value};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// A queued element and, while it is beyond the capacity, the resolver of
/// the put that is waiting for room.
type Pending<T> = (T, Option<Resolver<()>>);

struct QueueState<T: Value> {
    puts: VecDeque<Pending<T>>,
    reader: Option<Resolver<Option<T>>>,
    end: Option<Outcome<()>>,
    reader_closed: bool,
}

struct Core<T: Value> {
    state: Mutex<QueueState<T>>,
    capacity: usize,
    finished: Resolver<()>,
}

impl<T: Value> Core<T> {
    fn new(capacity: usize) -> Self {
        let (_, finished) = Promise::create();
        Self {
            state: Mutex::new(QueueState {
                puts: VecDeque::new(),
                reader: None,
                end: None,
                reader_closed: false,
            }),
            capacity,
            finished,
        }
    }

    fn take(&self) -> Promise<Option<T>> {
        let mut state = self.state.lock();
        if let Some((value, accepted)) = state.puts.pop_front() {
            // One element left the buffer, so one waiting put now fits.
            let admitted = match accepted {
                Some(resolver) => Some(resolver),
                None => self
                    .capacity
                    .checked_sub(1)
                    .and_then(|last| state.puts.get_mut(last))
                    .and_then(|(_, waiting)| waiting.take()),
            };
            drop(state);
            if let Some(resolver) = admitted {
                resolver.resolve_or_log(Outcome::Success(()));
            }
            return Promise::success(Some(value));
        }
        match &state.end {
            Some(Outcome::Success(())) => Promise::success(None),
            Some(Outcome::Failure(error)) => Promise::failure(error.clone()),
            None => {
                let (promise, resolver) = Promise::create();
                state.reader = Some(resolver);
                promise
            }
        }
    }

    fn put(&self, value: T) -> Promise<()> {
        let mut state = self.state.lock();
        if state.reader_closed || state.end.is_some() {
            return Promise::failure(Error::resource_closed());
        }
        if let Some(reader) = state.reader.take() {
            drop(state);
            reader.resolve_or_log(Outcome::Success(Some(value)));
            return a_void();
        }
        if state.puts.len() < self.capacity {
            state.puts.push_back((value, None));
            return a_void();
        }
        let (promise, resolver) = Promise::create();
        state.puts.push_back((value, Some(resolver)));
        promise
    }

    fn end(&self, end: Outcome<()>) -> Promise<()> {
        let reader = {
            let mut state = self.state.lock();
            if state.end.is_some() {
                return a_void();
            }
            state.end = Some(end.clone());
            state.reader.take()
        };
        if let Some(reader) = reader {
            reader.resolve_or_log(end.map(|()| None));
        }
        a_void()
    }

    fn close_reader(&self) -> Promise<()> {
        let (puts, reader) = {
            let mut state = self.state.lock();
            state.reader_closed = true;
            (std::mem::take(&mut state.puts), state.reader.take())
        };
        if let Some(reader) = reader {
            reader.resolve_or_log(Outcome::Success(None));
        }
        if !puts.is_empty() {
            tracing::debug!(dropped = puts.len(), "queue reader closed with unread elements");
        }
        for accepted in puts.into_iter().filter_map(|(_, accepted)| accepted) {
            accepted.resolve_or_log(Outcome::Failure(Error::resource_closed()));
        }
        self.finished.resolve_or_log(Outcome::Success(()));
        a_void()
    }

    fn buffered(&self) -> usize {
        let state = self.state.lock();
        state
            .puts
            .iter()
            .filter(|(_, waiting)| waiting.is_none())
            .count()
    }
}

/// Writing half of a [`RendezvousQueue`] or [`BufferedQueue`].
pub struct QueueSink<T: Value> {
    core: Arc<Core<T>>,
}

impl<T: Value> QueueSink<T> {
    /// Number of elements accepted but not yet read.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.core.buffered()
    }
}

impl<T: Value> AsyncCloseable for QueueSink<T> {
    /// Ends the sequence; the reader sees end-of-stream after the pending
    /// elements.
    fn close(&self) -> Promise<()> {
        self.core.end(Outcome::Success(()))
    }
}

impl<T: Value> AsyncSink<T> for QueueSink<T> {
    fn put(&self, value: T) -> Promise<()> {
        self.core.put(value)
    }

    fn fail(&self, error: Error) -> Promise<()> {
        self.core.end(Outcome::Failure(error))
    }

    fn finished(&self) -> Promise<()> {
        self.core.finished.promise()
    }
}

fn pair<T: Value>(capacity: usize) -> (Arc<QueueSink<T>>, SharedStream<T>) {
    let core = Arc::new(Core::new(capacity));
    let reader = Arc::clone(&core);
    let closer = Arc::clone(&core);
    let stream = StreamBase::with_close(move || reader.take(), move || closer.close_reader());
    (Arc::new(QueueSink { core }), Arc::new(stream))
}

/// Constructor for connected sink/stream pairs without a buffer.
#[derive(Debug, Clone, Copy)]
pub struct RendezvousQueue;

impl RendezvousQueue {
    /// Creates a connected pair. Elements put into the sink are read from
    /// the stream in put order.
    pub fn local<T: Value>() -> (SharedSink<T>, SharedStream<T>) {
        let (sink, stream) = pair(0);
        let sink: SharedSink<T> = sink;
        (sink, stream)
    }
}

/// Constructor for connected sink/stream pairs with a buffer.
///
/// Puts resolve as soon as the element is queued, until `capacity`
/// elements wait for the reader; further puts resolve once the reader made
/// room. Closing the reader drops the unread elements and fails the puts
/// still waiting for room.
#[derive(Debug, Clone, Copy)]
pub struct BufferedQueue;

impl BufferedQueue {
    /// Creates a pair whose puts never wait.
    pub fn unbounded<T: Value>() -> (Arc<QueueSink<T>>, SharedStream<T>) {
        pair(usize::MAX)
    }

    /// Creates a pair that buffers up to `capacity` elements.
    ///
    /// Fails with [`InvalidArgument`](crate::ErrorKind::InvalidArgument)
    /// for a zero capacity; use [`RendezvousQueue`] for that.
    pub fn bounded<T: Value>(
        capacity: usize,
    ) -> Result<(Arc<QueueSink<T>>, SharedStream<T>), Error> {
        if capacity == 0 {
            return Err(Error::invalid_argument("buffer capacity must be positive"));
        }
        Ok(pair(capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combinator::{a_later, a_seq_for_unit};
    use crate::stream::AsyncStream;
    use crate::runtime::{block_on, new_daemon_vat};
    use crate::stream::PullStreamBuilder;

    #[test]
    fn put_completes_when_reader_takes() {
        let (sink, stream) = RendezvousQueue::local::<u8>();
        let put = sink.put(1);
        assert!(!put.is_resolved());
        assert_eq!(stream.next().outcome(), Some(Outcome::Success(Some(1))));
        assert!(put.is_resolved());
    }

    #[test]
    fn waiting_reader_gets_direct_handoff() {
        let (sink, stream) = RendezvousQueue::local::<u8>();
        let read = stream.next();
        assert!(sink.put(9).is_resolved());
        assert_eq!(read.outcome(), Some(Outcome::Success(Some(9))));
    }

    #[test]
    fn close_and_fail_reach_the_reader() {
        let (sink, stream) = RendezvousQueue::local::<u8>();
        let _ = sink.put(1);
        let _ = sink.close();
        assert_eq!(stream.next().outcome(), Some(Outcome::Success(Some(1))));
        assert_eq!(stream.next().outcome(), Some(Outcome::Success(None)));
        assert!(sink.finished().is_resolved());

        let (sink, stream) = RendezvousQueue::local::<u8>();
        let read = stream.next();
        let _ = sink.fail(Error::user("writer died"));
        let err = read.outcome().and_then(|o| o.force().err());
        assert_eq!(err.and_then(|e| e.message().map(str::to_owned)).as_deref(), Some("writer died"));
    }

    #[test]
    fn closing_reader_rejects_pending_puts() {
        let (sink, stream) = RendezvousQueue::local::<u8>();
        let pending = sink.put(1);
        let _ = stream.close();
        let kind = pending.outcome().and_then(|o| o.force().err()).map(|e| e.kind());
        assert_eq!(kind, Some(crate::ErrorKind::ResourceClosed));
        assert!(sink.put(2).outcome().is_some_and(|o| o.is_failure()));
        assert!(sink.finished().is_resolved());
    }

    #[test]
    fn writer_and_reader_on_different_vats() {
        let values = block_on(|| {
            let (sink, stream) = RendezvousQueue::local::<u32>();
            let writer = new_daemon_vat("rendezvous-writer");
            let _ = a_later(&writer, move || {
                let closer = Arc::clone(&sink);
                a_seq_for_unit(0..100, move |i| sink.put(i)).flat_map(move |()| closer.close())
            });
            PullStreamBuilder::from_shared(stream).to_vec()
        })
        .expect("transfer");
        assert_eq!(values, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn buffered_puts_resolve_until_the_buffer_is_full() {
        let (sink, stream) = BufferedQueue::bounded::<u8>(2).expect("capacity");
        assert!(sink.put(1).is_resolved());
        assert!(sink.put(2).is_resolved());
        let third = sink.put(3);
        let fourth = sink.put(4);
        assert!(!third.is_resolved());
        assert_eq!(sink.buffered(), 2);

        assert_eq!(stream.next().outcome(), Some(Outcome::Success(Some(1))));
        assert!(third.is_resolved(), "reading made room for one put");
        assert!(!fourth.is_resolved());
        assert_eq!(stream.next().outcome(), Some(Outcome::Success(Some(2))));
        assert!(fourth.is_resolved());
        assert_eq!(stream.next().outcome(), Some(Outcome::Success(Some(3))));
        assert_eq!(stream.next().outcome(), Some(Outcome::Success(Some(4))));
    }

    #[test]
    fn unbounded_queue_never_holds_the_writer() {
        let (sink, stream) = BufferedQueue::unbounded::<u32>();
        for i in 0..1_000 {
            assert!(sink.put(i).is_resolved());
        }
        let _ = sink.close();
        let values = block_on(move || PullStreamBuilder::from_shared(stream).to_vec())
            .expect("drain");
        assert_eq!(values, (0..1_000).collect::<Vec<_>>());
    }

    #[test]
    fn closing_the_buffered_reader_fails_only_waiting_puts() {
        let (sink, stream) = BufferedQueue::bounded::<u8>(1).expect("capacity");
        let accepted = sink.put(1);
        let waiting = sink.put(2);
        let _ = stream.close();
        assert_eq!(accepted.outcome(), Some(Outcome::Success(())));
        let kind = waiting.outcome().and_then(|o| o.force().err()).map(|e| e.kind());
        assert_eq!(kind, Some(crate::ErrorKind::ResourceClosed));
        assert!(sink.finished().is_resolved());
    }

    #[test]
    fn zero_capacity_buffer_is_rejected() {
        let err = BufferedQueue::bounded::<u8>(0).err().map(|e| e.kind());
        assert_eq!(err, Some(crate::ErrorKind::InvalidArgument));
    }
}
