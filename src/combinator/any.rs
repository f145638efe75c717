//! Parallel composition: the first outcome wins.
//!
//! [`a_any`] resolves with whichever branch resolves first, success or
//! failure. [`a_any_prefer_success`] resolves with the first success and
//! fails only when every branch failed; the first failure is reported with
//! the others attached as suppressed.
//!
//! Branches that lose keep running. Their outcomes go to the handler
//! installed with [`AnyBuilder::suppressed`], or are dropped.

use super::all::{Forget, Runner, register};
use crate::error::Error;
use crate::promise::{Promise, Resolver};
use crate::types::{Outcome, Value};
use parking_lot::Mutex;
use std::sync::Arc;

type Body<T> = Box<dyn FnOnce() -> Promise<T> + Send>;
type SuppressedHandler<T> = Arc<dyn Fn(Outcome<T>) + Send + Sync>;

/// Starts a flow that resolves with the first outcome of any branch.
pub fn a_any<T, F>(first: F) -> AnyBuilder<T>
where
    T: Value,
    F: FnOnce() -> Promise<T> + Send + 'static,
{
    AnyBuilder {
        branches: vec![Box::new(first)],
        prefer_success: false,
        on_suppressed: None,
    }
}

/// Starts a flow that resolves with the first successful branch.
pub fn a_any_prefer_success<T, F>(first: F) -> AnyBuilder<T>
where
    T: Value,
    F: FnOnce() -> Promise<T> + Send + 'static,
{
    a_any(first).prefer_success()
}

/// Builder for [`a_any`] flows.
#[must_use = "branches start only when the flow is finished"]
pub struct AnyBuilder<T> {
    branches: Vec<Body<T>>,
    prefer_success: bool,
    on_suppressed: Option<SuppressedHandler<T>>,
}

impl<T: Value> AnyBuilder<T> {
    /// Adds a branch.
    pub fn or<F>(mut self, branch: F) -> Self
    where
        F: FnOnce() -> Promise<T> + Send + 'static,
    {
        self.branches.push(Box::new(branch));
        self
    }

    /// Adds a last branch and finishes the flow.
    pub fn or_last<F>(self, branch: F) -> Promise<T>
    where
        F: FnOnce() -> Promise<T> + Send + 'static,
    {
        self.or(branch).finish()
    }

    /// Ignores failures while some branch may still succeed.
    pub fn prefer_success(mut self) -> Self {
        self.prefer_success = true;
        self
    }

    /// Receives the outcome of every branch that did not win.
    pub fn suppressed<F>(mut self, handler: F) -> Self
    where
        F: Fn(Outcome<T>) + Send + Sync + 'static,
    {
        self.on_suppressed = Some(Arc::new(handler));
        self
    }

    /// Receives the failure of every branch that did not win.
    pub fn suppressed_failures<F>(self, handler: F) -> Self
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        self.suppressed(move |outcome| {
            if let Outcome::Failure(error) = outcome {
                handler(error);
            }
        })
    }

    /// Starts every branch now, in order.
    pub fn finish(self) -> Promise<T> {
        let (promise, resolver) = Promise::create();
        let core = Arc::new(AnyCore {
            state: Mutex::new(AnyState {
                winner: false,
                remaining: self.branches.len(),
                failures: Vec::new(),
                forgets: Vec::new(),
            }),
            resolver,
            prefer_success: self.prefer_success,
            on_suppressed: self.on_suppressed,
        });
        for body in self.branches {
            let branch = Runner::Now.start(body);
            core.attach(&branch);
        }
        promise
    }
}

struct AnyState {
    winner: bool,
    remaining: usize,
    failures: Vec<Error>,
    forgets: Vec<Forget>,
}

struct AnyCore<T: Value> {
    state: Mutex<AnyState>,
    resolver: Resolver<T>,
    prefer_success: bool,
    on_suppressed: Option<SuppressedHandler<T>>,
}

impl<T: Value> AnyCore<T> {
    fn attach(self: &Arc<Self>, branch: &Promise<T>) {
        if self.on_suppressed.is_none() && self.state.lock().winner {
            return;
        }
        let core = Arc::clone(self);
        let Some(forget) = register(branch, move |outcome| core.settle(outcome)) else {
            return;
        };
        let mut state = self.state.lock();
        if state.winner && self.on_suppressed.is_none() {
            drop(state);
            forget();
        } else {
            state.forgets.push(forget);
        }
    }

    fn settle(&self, outcome: Outcome<T>) {
        let mut state = self.state.lock();
        state.remaining = state.remaining.saturating_sub(1);
        if state.winner {
            drop(state);
            if let Some(handler) = &self.on_suppressed {
                handler(outcome);
            }
            return;
        }

        let outcome = match outcome {
            Outcome::Failure(error) if self.prefer_success => {
                state.failures.push(error);
                if state.remaining > 0 {
                    return;
                }
                let mut failures = std::mem::take(&mut state.failures).into_iter();
                let Some(mut first) = failures.next() else {
                    return;
                };
                for other in failures {
                    first.add_suppressed(other);
                }
                Outcome::Failure(first)
            }
            outcome => outcome,
        };

        state.winner = true;
        let forgets = if self.on_suppressed.is_none() {
            std::mem::take(&mut state.forgets)
        } else {
            Vec::new()
        };
        let earlier_failures = std::mem::take(&mut state.failures);
        drop(state);

        for forget in forgets {
            forget();
        }
        if let Some(handler) = &self.on_suppressed {
            for error in earlier_failures {
                handler(Outcome::Failure(error));
            }
        }
        self.resolver.resolve_or_log(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combinator::{a_failure, a_later, a_never, a_value};
    use crate::runtime::{block_on, new_daemon_vat};
    use std::time::Duration;

    fn delayed(ms: u64, value: &'static str) -> impl FnOnce() -> Promise<&'static str> + Send {
        move || {
            a_later(&new_daemon_vat("any-delay"), move || {
                std::thread::sleep(Duration::from_millis(ms));
                a_value(value)
            })
        }
    }

    #[test]
    fn first_outcome_wins() {
        let value = block_on(|| a_any(delayed(200, "slow")).or_last(delayed(5, "fast")))
            .expect("any");
        assert_eq!(value, "fast");
    }

    #[test]
    fn first_failure_wins_without_prefer_success() {
        let err = block_on(|| {
            a_any(delayed(200, "slow"))
                .or_last(|| a_failure(Error::user("early")))
        })
        .unwrap_err();
        assert_eq!(err.message(), Some("early"));
    }

    #[test]
    fn prefer_success_skips_failures() {
        let value = block_on(|| {
            a_any_prefer_success(|| a_failure(Error::user("bad")))
                .or_last(delayed(10, "good"))
        })
        .expect("any");
        assert_eq!(value, "good");
    }

    #[test]
    fn all_failed_reports_first_with_rest_suppressed() {
        let err = block_on(|| {
            a_any_prefer_success(|| a_failure::<u8>(Error::user("one")))
                .or(|| a_failure(Error::user("two")))
                .or_last(|| a_failure(Error::user("three")))
        })
        .unwrap_err();
        assert_eq!(err.message(), Some("one"));
        assert_eq!(err.suppressed().len(), 2);
    }

    #[test]
    fn losers_reach_the_suppressed_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let (slow, resolver) = Promise::<u8>::create();
        let winner = a_any(|| a_value(1))
            .or(move || slow)
            .suppressed(move |outcome| sink.lock().push(outcome))
            .finish();
        assert_eq!(winner.outcome(), Some(Outcome::Success(1)));
        resolver.success(2).expect("resolve");
        assert_eq!(*seen.lock(), vec![Outcome::Success(2)]);
    }

    #[test]
    fn pending_losers_are_unregistered() {
        let never = a_never::<u8>();
        let watched = never.clone();
        let (first, resolver) = Promise::<u8>::create();
        let winner = a_any(move || first).or(move || never).finish();
        assert_eq!(watched.listener_count(), 1);
        resolver.success(7).expect("resolve");
        assert!(winner.is_resolved());
        assert_eq!(watched.listener_count(), 0);
    }
}
