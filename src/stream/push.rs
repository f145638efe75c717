//! Push-mode pipelines.
//!
//! A [`PushStreamBuilder`] describes a pipeline from the source end. Every
//! stage is a sink that transforms what it is given and puts the result
//! into the next sink; nothing flows until a terminal operation connects
//! the last stage. Backpressure travels upstream through the put promises.
//!
//! In push mode a [`window`](PushStreamBuilder::window) goes *before* the
//! stages it should run concurrently: it admits up to `size` puts into the
//! rest of the pipeline without waiting for them to complete.
//!
//! # Example
//!
//! ```
//! use vatflow::stream::Streams;
//! use vatflow::{a_value, block_on};
//!
//! let doubled = block_on(|| {
//!     Streams::for_range(0..5)
//!         .push()
//!         .window(2)
//!         .expect("positive window")
//!         .map(|i| a_value(i * 2))
//!         .to_vec()
//! })
//! .expect("pipeline");
//! assert_eq!(doubled, vec![0, 2, 4, 6, 8]);
//! ```

use super::builder::{PullStreamBuilder, call_body};
use super::connect::connect;
use super::rendezvous::RendezvousQueue;
use super::stream::{AsyncSink, SharedSink, SharedStream};
use crate::combinator::{AsyncCloseable, CloseState, a_now, a_value, a_void};
use crate::error::Error;
use crate::promise::{Promise, Resolver};
use crate::sync::RequestQueue;
use crate::types::{Outcome, Value};
use parking_lot::Mutex;
use std::sync::Arc;

type Connector<T> = Box<dyn FnOnce(SharedSink<T>) + Send>;
type Expand<T, N> = Arc<dyn Fn(T) -> Promise<Option<N>> + Send + Sync>;

/// Bookkeeping shared by the intermediate sinks of a push pipeline.
///
/// `finished` follows the next sink, except that a failure of this stage
/// fails it right away.
struct Stage<N: Value> {
    next: SharedSink<N>,
    requests: RequestQueue,
    state: CloseState,
    finished: Resolver<()>,
}

impl<N: Value> Stage<N> {
    fn new(next: SharedSink<N>) -> Arc<Self> {
        let (_, finished) = Promise::create();
        let forward = finished.clone();
        next.finished().listen_sync(move |outcome| {
            let _ = forward.resolve(outcome);
        });
        Arc::new(Self {
            next,
            requests: RequestQueue::new(),
            state: CloseState::new(),
            finished,
        })
    }

    fn invalidate(&self, error: Error) {
        if self.state.invalidate(error.clone()) {
            let _ = self.finished.resolve(Outcome::Failure(error));
            // A parked put re-checks and sees the failure.
            self.requests.resume();
        }
    }

    fn fail_next(&self, error: Error) -> Promise<()> {
        self.invalidate(error.clone());
        self.next.fail(error.clone()).then_failure(error)
    }

    /// Invalidates the stage when `put` fails.
    fn checked(self: &Arc<Self>, put: Promise<()>) -> Promise<()> {
        let stage = Arc::clone(self);
        put.listen_sync(move |outcome| {
            if let Outcome::Failure(error) = outcome {
                stage.invalidate(error);
            }
        });
        put
    }

    fn fail(self: &Arc<Self>, error: Error) -> Promise<()> {
        let stage = Arc::clone(self);
        self.requests.run(move || stage.fail_next(error))
    }

    /// Closes the next sink once `drain` resolved.
    fn close_after<F>(&self, drain: F) -> Promise<()>
    where
        F: FnOnce() -> Promise<()>,
    {
        let next = Arc::clone(&self.next);
        self.state
            .close_with(move || drain().flat_map_outcome(move |_| next.close()))
    }
}

/// Maps, filters, or expands each element, keeping input order downstream.
struct ExpandSink<T, N: Value> {
    stage: Arc<Stage<N>>,
    expand: Expand<T, N>,
}

impl<T: Value, N: Value> AsyncCloseable for ExpandSink<T, N> {
    fn close(&self) -> Promise<()> {
        self.stage.close_after(|| self.stage.requests.run(a_void))
    }
}

impl<T: Value, N: Value> AsyncSink<T> for ExpandSink<T, N> {
    fn put(&self, value: T) -> Promise<()> {
        if let Some(rejected) = self.stage.state.invalidation_promise() {
            return rejected;
        }
        // Runs now so that a window upstream overlaps the transforms; only
        // the downstream puts are ordered.
        let expand = Arc::clone(&self.expand);
        let expanded = a_now(move || expand(value));
        let stage = Arc::clone(&self.stage);
        let put = self.stage.requests.run(move || {
            expanded.flat_map_outcome(move |outcome| match outcome {
                Outcome::Success(Some(item)) => match stage.state.invalidation_promise() {
                    Some(rejected) => rejected,
                    None => stage.next.put(item),
                },
                Outcome::Success(None) => a_void(),
                Outcome::Failure(error) => stage.fail_next(error),
            })
        });
        self.stage.checked(put)
    }

    fn fail(&self, error: Error) -> Promise<()> {
        self.stage.fail(error)
    }

    fn finished(&self) -> Promise<()> {
        self.stage.finished.promise()
    }
}

/// Admits up to `size` puts into the next sink at once.
struct WindowSink<T: Value> {
    stage: Arc<Stage<T>>,
    size: usize,
    active: Arc<Mutex<usize>>,
}

impl<T: Value> WindowSink<T> {
    fn admit(&self, value: T) -> Promise<()> {
        let stage = Arc::clone(&self.stage);
        let active = Arc::clone(&self.active);
        let size = self.size;
        let mut value = Some(value);
        self.stage.requests.run_seq_while(move || {
            if let Some(rejected) = stage.state.invalidation_promise() {
                return rejected;
            }
            let mut count = active.lock();
            if *count >= size {
                // Parked under the lock so a completion cannot slip between
                // the check and the suspend.
                return stage.requests.suspend_then_true();
            }
            let Some(value) = value.take() else {
                return a_value(false);
            };
            *count += 1;
            drop(count);
            let (done, waker) = (Arc::clone(&active), stage.requests.clone());
            let put = stage.checked(a_now(|| stage.next.put(value)));
            put.listen_sync(move |_| {
                *done.lock() -= 1;
                waker.resume();
            });
            a_value(false)
        })
    }

    fn drain(&self) -> Promise<()> {
        let active = Arc::clone(&self.active);
        let requests = self.stage.requests.clone();
        self.stage.requests.run_seq_while(move || {
            let count = active.lock();
            if *count == 0 {
                a_value(false)
            } else {
                requests.suspend_then_true()
            }
        })
    }
}

impl<T: Value> AsyncCloseable for WindowSink<T> {
    /// Waits for the admitted puts, then closes the next sink.
    fn close(&self) -> Promise<()> {
        self.stage.close_after(|| self.drain())
    }
}

impl<T: Value> AsyncSink<T> for WindowSink<T> {
    fn put(&self, value: T) -> Promise<()> {
        self.admit(value)
    }

    fn fail(&self, error: Error) -> Promise<()> {
        self.stage.fail(error)
    }

    fn finished(&self) -> Promise<()> {
        self.stage.finished.promise()
    }
}

struct ConsumerCore<T, F> {
    body: Arc<Mutex<Option<F>>>,
    requests: RequestQueue,
    state: CloseState,
    finished: Resolver<()>,
    _items: std::marker::PhantomData<fn(T)>,
}

impl<T, F> ConsumerCore<T, F> {
    fn close(&self) -> Promise<()> {
        let finished = self.finished.clone();
        self.state.close_with(move || {
            let _ = finished.resolve(Outcome::Success(()));
            a_void()
        })
    }
}

/// Last sink of a push pipeline; runs the loop body for every element.
struct ConsumerSink<T, F> {
    core: Arc<ConsumerCore<T, F>>,
}

impl<T, F> AsyncCloseable for ConsumerSink<T, F>
where
    T: Value,
    F: FnMut(T) -> Promise<bool> + Send + 'static,
{
    fn close(&self) -> Promise<()> {
        self.core.close()
    }
}

impl<T, F> AsyncSink<T> for ConsumerSink<T, F>
where
    T: Value,
    F: FnMut(T) -> Promise<bool> + Send + 'static,
{
    fn put(&self, value: T) -> Promise<()> {
        let core = Arc::clone(&self.core);
        self.core.requests.run(move || {
            if let Some(rejected) = core.state.invalidation_promise() {
                return rejected;
            }
            let step = call_body(&core.body, value);
            step.flat_map_outcome(move |outcome| match outcome {
                Outcome::Success(true) => a_void(),
                Outcome::Success(false) => {
                    let _ = core.close();
                    a_void()
                }
                Outcome::Failure(error) => {
                    if core.state.invalidate(error.clone()) {
                        let _ = core.finished.resolve(Outcome::Failure(error.clone()));
                        let _ = core.close();
                    }
                    Promise::failure(error)
                }
            })
        })
    }

    fn fail(&self, error: Error) -> Promise<()> {
        if self.core.state.invalidate(error.clone()) {
            let _ = self.core.finished.resolve(Outcome::Failure(error));
            let _ = self.core.close();
        }
        a_void()
    }

    fn finished(&self) -> Promise<()> {
        self.core.finished.promise()
    }
}

/// Builder of a push pipeline. Each stage consumes the builder; a terminal
/// operation connects the pipeline and starts the flow.
#[must_use = "a push pipeline moves nothing until connected"]
pub struct PushStreamBuilder<T: Value> {
    connector: Connector<T>,
}

impl<T: Value> PushStreamBuilder<T> {
    /// A pipeline whose source is `connect`, called once with the first
    /// sink when the pipeline is connected.
    pub fn from_connector<C>(connect: C) -> Self
    where
        C: FnOnce(SharedSink<T>) + Send + 'static,
    {
        Self {
            connector: Box::new(connect),
        }
    }

    /// A pipeline fed from a pull stream.
    ///
    /// The stream is read one element at a time; each read waits until the
    /// first stage accepted the previous element. The end of the stream
    /// closes the pipeline and a read failure fails it.
    pub fn from_stream(stream: SharedStream<T>) -> Self {
        Self::from_connector(move |sink| {
            connect(stream, sink).listen_sync(|outcome| match outcome {
                Outcome::Success(count) => tracing::trace!(count, "push source drained"),
                Outcome::Failure(error) => tracing::debug!(%error, "push source stopped"),
            });
        })
    }

    fn chain<N, F>(self, make: F) -> PushStreamBuilder<N>
    where
        N: Value,
        F: FnOnce(SharedSink<N>) -> SharedSink<T> + Send + 'static,
    {
        let connector = self.connector;
        PushStreamBuilder::from_connector(move |next| connector(make(next)))
    }

    // === Stages ===

    /// Maps every element through an asynchronous function.
    pub fn map<R, F>(self, mapper: F) -> PushStreamBuilder<R>
    where
        R: Value,
        F: Fn(T) -> Promise<R> + Send + Sync + 'static,
    {
        self.flat_map_option(move |value| mapper(value).map(Some))
    }

    /// Maps every element through a synchronous function.
    pub fn map_sync<R, F>(self, mapper: F) -> PushStreamBuilder<R>
    where
        R: Value,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        self.flat_map_option(move |value| a_value(Some(mapper(value))))
    }

    /// Maps every element to zero or one element.
    pub fn flat_map_option<R, F>(self, expand: F) -> PushStreamBuilder<R>
    where
        R: Value,
        F: Fn(T) -> Promise<Option<R>> + Send + Sync + 'static,
    {
        let expand: Expand<T, R> = Arc::new(expand);
        self.chain(move |next| {
            Arc::new(ExpandSink {
                stage: Stage::new(next),
                expand,
            })
        })
    }

    /// Keeps the elements for which `predicate` resolves to true.
    pub fn filter<F>(self, predicate: F) -> Self
    where
        F: Fn(&T) -> Promise<bool> + Send + Sync + 'static,
    {
        self.flat_map_option(move |value| {
            let keep = predicate(&value);
            keep.map(move |keep| keep.then_some(value))
        })
    }

    /// Keeps the elements for which `predicate` returns true.
    pub fn filter_sync<F>(self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.flat_map_option(move |value| a_value(predicate(&value).then_some(value)))
    }

    /// Lets up to `size` elements travel through the rest of the pipeline
    /// at once.
    ///
    /// Fails with [`InvalidArgument`](crate::ErrorKind::InvalidArgument)
    /// for a zero size.
    pub fn window(self, size: usize) -> Result<Self, Error> {
        if size == 0 {
            return Err(Error::invalid_argument("window size must be positive"));
        }
        Ok(self.chain(move |next| {
            Arc::new(WindowSink {
                stage: Stage::new(next),
                size,
                active: Arc::new(Mutex::new(0)),
            })
        }))
    }

    // === Terminal operations ===

    /// Connects the pipeline to `sink` and returns its
    /// [`finished`](AsyncSink::finished) promise.
    pub fn to_sink(self, sink: SharedSink<T>) -> Promise<()> {
        let finished = sink.finished();
        (self.connector)(sink);
        finished
    }

    /// Turns the pipeline into a pull stream through a rendezvous queue.
    pub fn pull(self) -> PullStreamBuilder<T> {
        let (sink, stream) = RendezvousQueue::local();
        (self.connector)(sink);
        PullStreamBuilder::from_shared(stream)
    }

    /// Runs `body` for every element until it returns false or the
    /// pipeline ends. Resolves when the pipeline finished.
    pub fn consume<F>(self, body: F) -> Promise<()>
    where
        F: FnMut(T) -> Promise<bool> + Send + 'static,
    {
        let (_, finished) = Promise::create();
        let sink = ConsumerSink {
            core: Arc::new(ConsumerCore {
                body: Arc::new(Mutex::new(Some(body))),
                requests: RequestQueue::new(),
                state: CloseState::new(),
                finished,
                _items: std::marker::PhantomData,
            }),
        };
        self.to_sink(Arc::new(sink))
    }

    /// Collects every element in arrival order.
    pub fn to_vec(self) -> Promise<Vec<T>> {
        let items: Arc<Mutex<Vec<T>>> = Arc::default();
        let sink = Arc::clone(&items);
        self.consume(move |value| {
            sink.lock().push(value);
            a_value(true)
        })
        .map(move |()| std::mem::take(&mut *items.lock()))
    }
}

impl<T: Value> std::fmt::Debug for PushStreamBuilder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushStreamBuilder").finish_non_exhaustive()
    }
}
