//! Parallel composition: wait for every branch.
//!
//! `a_all(a).and(b).and(c).finish()` starts every branch and resolves with
//! the tuple of their values once all succeeded.
//!
//! # Failure policy
//!
//! The aggregate resolves as soon as its result is determined:
//!
//! 1. every branch succeeded, or
//! 2. branch `i` failed and every branch before `i` has resolved.
//!
//! In case 2 the failure of the lowest-index failed branch is reported and
//! failures of other branches resolved by then are attached as suppressed.
//! The aggregate then unregisters from branches still running, so a branch
//! that never resolves does not keep the aggregate's listener alive. Those
//! branches run on in the background; their later outcomes are dropped.

use super::core::{a_later, a_now};
use crate::error::Error;
use crate::promise::{ListenerKey, Promise};
use crate::runtime::new_daemon_vat;
use crate::types::{Outcome, Value};
use parking_lot::Mutex;
use std::sync::Arc;

pub(super) type Forget = Box<dyn FnOnce() + Send>;

/// Registers `listener` on `promise` and returns the function that
/// unregisters it, or `None` if the listener already ran.
pub(super) fn register<T, F>(promise: &Promise<T>, listener: F) -> Option<Forget>
where
    T: Value,
    F: FnOnce(Outcome<T>) + Send + 'static,
{
    let key = promise.listen_sync(listener);
    if key == ListenerKey::DETACHED {
        return None;
    }
    let promise = promise.clone();
    Some(Box::new(move || {
        promise.forget(key);
    }))
}

/// How branch bodies are started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Runner {
    /// Run each body now, in registration order.
    Now,
    /// Run each body on its own daemon vat.
    Parallel,
}

impl Runner {
    pub(super) fn start<T, F>(self, body: F) -> Promise<T>
    where
        T: Value,
        F: FnOnce() -> Promise<T> + Send + 'static,
    {
        match self {
            Self::Now => a_now(body),
            Self::Parallel => a_later(&new_daemon_vat("par-branch"), body),
        }
    }
}

#[derive(Debug)]
enum Branch {
    Pending,
    Succeeded,
    Failed(Error),
}

type Complete = Box<dyn FnOnce(Result<(), Error>) + Send>;

struct JoinState {
    branches: Vec<Branch>,
    forgets: Vec<Forget>,
    complete: Option<Complete>,
}

pub(super) struct JoinCore {
    state: Mutex<JoinState>,
}

impl JoinCore {
    fn new(branches: usize, complete: Complete) -> Self {
        Self {
            state: Mutex::new(JoinState {
                branches: (0..branches).map(|_| Branch::Pending).collect(),
                forgets: Vec::new(),
                complete: Some(complete),
            }),
        }
    }

    fn attach<T: Value>(self: &Arc<Self>, index: usize, promise: &Promise<T>, slot: Slot<T>) {
        if self.state.lock().complete.is_none() {
            return;
        }
        let core = Arc::clone(self);
        let forget = register(promise, move |outcome| match outcome {
            Outcome::Success(value) => {
                *slot.lock() = Some(value);
                core.settle(index, Ok(()));
            }
            Outcome::Failure(error) => core.settle(index, Err(error)),
        });
        if let Some(forget) = forget {
            let mut state = self.state.lock();
            if state.complete.is_some() {
                state.forgets.push(forget);
            } else {
                drop(state);
                forget();
            }
        }
    }

    fn settle(&self, index: usize, result: Result<(), Error>) {
        let (complete, forgets, result) = {
            let mut state = self.state.lock();
            if state.complete.is_none() {
                if let Err(error) = result {
                    tracing::debug!(branch = index, %error, "branch failed after aggregate resolved");
                }
                return;
            }
            state.branches[index] = match result {
                Ok(()) => Branch::Succeeded,
                Err(error) => Branch::Failed(error),
            };
            let Some(result) = determine(&mut state.branches) else {
                return;
            };
            (
                state.complete.take(),
                std::mem::take(&mut state.forgets),
                result,
            )
        };
        for forget in forgets {
            forget();
        }
        if let Some(complete) = complete {
            complete(result);
        }
    }

    fn check_empty(&self) {
        let complete = {
            let mut state = self.state.lock();
            if state.branches.is_empty() {
                state.complete.take()
            } else {
                None
            }
        };
        if let Some(complete) = complete {
            complete(Ok(()));
        }
    }
}

fn determine(branches: &mut [Branch]) -> Option<Result<(), Error>> {
    let mut failed = None;
    for (index, branch) in branches.iter().enumerate() {
        match branch {
            Branch::Pending => return None,
            Branch::Failed(_) => {
                failed = Some(index);
                break;
            }
            Branch::Succeeded => {}
        }
    }
    let Some(first) = failed else {
        return Some(Ok(()));
    };
    let Branch::Failed(mut error) = std::mem::replace(&mut branches[first], Branch::Succeeded)
    else {
        return None;
    };
    for branch in &branches[first + 1..] {
        if let Branch::Failed(other) = branch {
            error.add_suppressed(other.clone());
        }
    }
    Some(Err(error))
}

type Slot<T> = Arc<Mutex<Option<T>>>;
type Starter = Box<dyn FnOnce(&Arc<JoinCore>, usize) + Send>;

fn slot<T>() -> Slot<T> {
    Arc::new(Mutex::new(None))
}

fn take<T>(slot: &Slot<T>) -> Result<T, Error> {
    slot.lock()
        .take()
        .ok_or_else(|| Error::illegal_state("branch succeeded without a value"))
}

fn starter<T, F>(runner: Runner, body: F, slot: Slot<T>) -> Starter
where
    T: Value,
    F: FnOnce() -> Promise<T> + Send + 'static,
{
    Box::new(move |core, index| {
        let promise = runner.start(body);
        core.attach(index, &promise, slot);
    })
}

fn run_join<R, A>(starters: Vec<Starter>, assemble: A) -> Promise<R>
where
    R: Value,
    A: FnOnce() -> Result<R, Error> + Send + 'static,
{
    let (promise, resolver) = Promise::create();
    let core = Arc::new(JoinCore::new(
        starters.len(),
        Box::new(move |result| {
            let outcome: Outcome<R> = result.and_then(|()| assemble()).into();
            resolver.resolve_or_log(outcome);
        }),
    ));
    for (index, start) in starters.into_iter().enumerate() {
        start(&core, index);
    }
    core.check_empty();
    promise
}

/// Starts a parallel flow whose branches run now, on the calling thread,
/// and interleave at their suspension points.
pub fn a_all<A, F>(first: F) -> All1<A>
where
    A: Value,
    F: FnOnce() -> Promise<A> + Send + 'static,
{
    All1::new(Runner::Now, first)
}

/// Starts a parallel flow whose branches each run on their own daemon vat.
pub fn a_par<A, F>(first: F) -> All1<A>
where
    A: Value,
    F: FnOnce() -> Promise<A> + Send + 'static,
{
    All1::new(Runner::Parallel, first)
}

/// Alias for the one-branch builder returned by [`a_all`].
pub type AllBuilder<A> = All1<A>;

/// Parallel flow with one branch.
#[must_use = "branches start only when the flow is finished"]
pub struct All1<A> {
    runner: Runner,
    starters: Vec<Starter>,
    a: Slot<A>,
}

impl<A: Value> All1<A> {
    fn new<F>(runner: Runner, first: F) -> Self
    where
        F: FnOnce() -> Promise<A> + Send + 'static,
    {
        let a = slot();
        Self {
            runner,
            starters: vec![starter(runner, first, Arc::clone(&a))],
            a,
        }
    }

    /// Adds a second branch.
    pub fn and<B, F>(mut self, branch: F) -> All2<A, B>
    where
        B: Value,
        F: FnOnce() -> Promise<B> + Send + 'static,
    {
        let b = slot();
        self.starters
            .push(starter(self.runner, branch, Arc::clone(&b)));
        All2 {
            runner: self.runner,
            starters: self.starters,
            a: self.a,
            b,
        }
    }

    /// Adds a second branch and finishes the flow.
    pub fn and_last<B, F>(self, branch: F) -> Promise<(A, B)>
    where
        B: Value,
        F: FnOnce() -> Promise<B> + Send + 'static,
    {
        self.and(branch).finish()
    }

    /// Starts the branch.
    pub fn finish(self) -> Promise<A> {
        let a = self.a;
        run_join(self.starters, move || take(&a))
    }
}

/// Parallel flow with two branches.
#[must_use = "branches start only when the flow is finished"]
pub struct All2<A, B> {
    runner: Runner,
    starters: Vec<Starter>,
    a: Slot<A>,
    b: Slot<B>,
}

impl<A: Value, B: Value> All2<A, B> {
    /// Adds a third branch.
    pub fn and<C, F>(mut self, branch: F) -> All3<A, B, C>
    where
        C: Value,
        F: FnOnce() -> Promise<C> + Send + 'static,
    {
        let c = slot();
        self.starters
            .push(starter(self.runner, branch, Arc::clone(&c)));
        All3 {
            starters: self.starters,
            a: self.a,
            b: self.b,
            c,
        }
    }

    /// Adds a third branch and finishes the flow.
    pub fn and_last<C, F>(self, branch: F) -> Promise<(A, B, C)>
    where
        C: Value,
        F: FnOnce() -> Promise<C> + Send + 'static,
    {
        self.and(branch).finish()
    }

    /// Starts the branches and resolves with both values.
    pub fn finish(self) -> Promise<(A, B)> {
        let (a, b) = (self.a, self.b);
        run_join(self.starters, move || Ok((take(&a)?, take(&b)?)))
    }

    /// Resolves with the first branch's value.
    pub fn select_value1(self) -> Promise<A> {
        self.finish().map(|(a, _)| a)
    }

    /// Resolves with the second branch's value.
    pub fn select_value2(self) -> Promise<B> {
        self.finish().map(|(_, b)| b)
    }

    /// Resolves with `()` once both succeeded.
    pub fn to_void(self) -> Promise<()> {
        let (a, b) = (self.a, self.b);
        run_join(self.starters, move || {
            a.lock().take();
            b.lock().take();
            Ok(())
        })
    }
}

/// Parallel flow with three branches.
#[must_use = "branches start only when the flow is finished"]
pub struct All3<A, B, C> {
    starters: Vec<Starter>,
    a: Slot<A>,
    b: Slot<B>,
    c: Slot<C>,
}

impl<A: Value, B: Value, C: Value> All3<A, B, C> {
    /// Starts the branches and resolves with all three values.
    pub fn finish(self) -> Promise<(A, B, C)> {
        let (a, b, c) = (self.a, self.b, self.c);
        run_join(self.starters, move || Ok((take(&a)?, take(&b)?, take(&c)?)))
    }

    /// Resolves with the first branch's value.
    pub fn select_value1(self) -> Promise<A> {
        self.finish().map(|(a, _, _)| a)
    }

    /// Resolves with the second branch's value.
    pub fn select_value2(self) -> Promise<B> {
        self.finish().map(|(_, b, _)| b)
    }

    /// Resolves with the third branch's value.
    pub fn select_value3(self) -> Promise<C> {
        self.finish().map(|(_, _, c)| c)
    }

    /// Resolves with `()` once all succeeded.
    pub fn to_void(self) -> Promise<()> {
        self.finish().to_void()
    }
}

fn for_collect<I, R, S>(items: I, mut start: S) -> Promise<Vec<R>>
where
    I: IntoIterator,
    R: Value,
    S: FnMut(I::Item) -> Promise<R>,
{
    let mut slots = Vec::new();
    let mut promises = Vec::new();
    for item in items {
        promises.push(start(item));
        slots.push(slot::<R>());
    }
    let starters: Vec<Starter> = promises
        .into_iter()
        .zip(slots.iter().cloned())
        .map(|(promise, slot)| -> Starter {
            Box::new(move |core, index| core.attach(index, &promise, slot))
        })
        .collect();
    run_join(starters, move || slots.iter().map(take).collect())
}

/// Runs `body` for every item, all started now, and collects the values in
/// item order.
pub fn a_all_for_collect<I, R, F>(items: I, mut body: F) -> Promise<Vec<R>>
where
    I: IntoIterator,
    R: Value,
    F: FnMut(I::Item) -> Promise<R>,
{
    for_collect(items, move |item| a_now(|| body(item)))
}

/// Runs `body` for every item, each on its own daemon vat, and collects the
/// values in item order.
pub fn a_par_for_collect<I, R, F>(items: I, body: F) -> Promise<Vec<R>>
where
    I: IntoIterator,
    I::Item: Send + 'static,
    R: Value,
    F: Fn(I::Item) -> Promise<R> + Send + Sync + 'static,
{
    let body = Arc::new(body);
    for_collect(items, move |item| {
        let body = Arc::clone(&body);
        Runner::Parallel.start(move || body(item))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combinator::{a_failure, a_later, a_never, a_value};
    use crate::error::ErrorKind;
    use crate::runtime::{block_on, new_daemon_vat};
    use std::thread::ThreadId;
    use std::time::Duration;

    #[test]
    fn collects_values_of_every_branch() {
        let helper = new_daemon_vat("all-helper");
        let values = block_on(move || {
            a_all(|| a_value(1))
                .and(move || a_later(&helper, || a_value("two")))
                .and_last(|| a_value(3.0))
        })
        .expect("all");
        assert_eq!(values, (1, "two", 3.0));
    }

    #[test]
    fn lowest_index_failure_wins_and_others_are_suppressed() {
        let (first, resolver) = Promise::<u8>::create();
        let aggregate = a_all(move || first)
            .and(|| a_failure::<u8>(Error::user("second")))
            .and(|| a_failure::<u8>(Error::user("third")))
            .finish();
        assert!(!aggregate.is_resolved());
        resolver.success(1).expect("resolve");
        let err = aggregate.outcome().and_then(|o| o.force().err()).expect("failed");
        assert_eq!(err.message(), Some("second"));
        assert_eq!(err.suppressed().len(), 1);
        assert_eq!(err.suppressed()[0].message(), Some("third"));
    }

    #[test]
    fn failure_waits_for_earlier_branches() {
        let (first, resolver) = Promise::<u8>::create();
        let aggregate = a_all(move || first)
            .and(|| a_failure::<u8>(Error::user("late branch")))
            .finish();
        assert!(!aggregate.is_resolved());
        resolver.failure(Error::user("early branch")).expect("resolve");
        let err = aggregate.outcome().and_then(|o| o.force().err()).expect("failed");
        assert_eq!(err.message(), Some("early branch"));
        assert_eq!(err.suppressed()[0].message(), Some("late branch"));
    }

    #[test]
    fn failure_does_not_wait_for_later_branches() {
        let never = a_never::<()>();
        let watched = never.clone();
        let aggregate = a_all(|| a_failure::<()>(Error::user("first")))
            .and(move || never)
            .to_void();
        assert_eq!(
            aggregate.outcome().and_then(|o| o.as_failure().map(Error::kind)),
            Some(ErrorKind::User)
        );
        assert_eq!(watched.listener_count(), 0);
    }

    #[test]
    fn pending_branch_listener_is_removed_after_failure() {
        let (slow, slow_resolver) = Promise::<u8>::create();
        let watched = slow.clone();
        let (fast, fast_resolver) = Promise::<u8>::create();
        let aggregate = a_all(move || fast).and(move || slow).finish();
        assert_eq!(watched.listener_count(), 1);
        fast_resolver.failure(Error::user("fast")).expect("resolve");
        assert!(aggregate.is_resolved());
        assert_eq!(watched.listener_count(), 0);
        drop(slow_resolver);
    }

    #[test]
    fn selectors_project_the_aggregate() {
        let second = block_on(|| a_all(|| a_value(1)).and(|| a_value('b')).select_value2())
            .expect("select");
        assert_eq!(second, 'b');
        let third = block_on(|| {
            a_all(|| a_value(1))
                .and(|| a_value(2))
                .and(|| a_value(3))
                .select_value3()
        })
        .expect("select");
        assert_eq!(third, 3);
    }

    #[test]
    fn a_par_runs_branches_on_other_threads() {
        let threads = block_on(|| {
            let here = std::thread::current().id();
            let sleepy = |ms| {
                move || {
                    std::thread::sleep(Duration::from_millis(ms));
                    a_value(std::thread::current().id())
                }
            };
            a_par(sleepy(20))
                .and_last(sleepy(20))
                .map(move |(a, b): (ThreadId, ThreadId)| (here, a, b))
        })
        .expect("par");
        assert_ne!(threads.0, threads.1);
        assert_ne!(threads.0, threads.2);
    }

    #[test]
    fn for_collect_keeps_item_order() {
        let values = block_on(|| {
            a_par_for_collect(0..16_u64, |i| {
                std::thread::sleep(Duration::from_millis(16 - i));
                a_value(i)
            })
        })
        .expect("collect");
        assert_eq!(values, (0..16).collect::<Vec<_>>());

        let empty = block_on(|| a_all_for_collect(Vec::<u8>::new(), a_value)).expect("empty");
        assert!(empty.is_empty());
    }

    #[test]
    fn all_for_collect_reports_first_failure() {
        let err = block_on(|| {
            a_all_for_collect(0..5, |i| {
                if i % 2 == 1 {
                    a_failure::<i32>(Error::user(format!("item {i}")))
                } else {
                    a_value(i)
                }
            })
        })
        .unwrap_err();
        assert_eq!(err.message(), Some("item 1"));
    }
}
