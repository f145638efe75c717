//! Parallel combinators unregister from branches whose outcome no longer
//! matters, so a branch that never resolves does not pin the aggregate.

#[macro_use]
mod common;

use common::*;
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;
use vatflow::combinator::{AnyBuilder, a_all_for_collect};
use vatflow::{Error, Outcome, Promise, a_all, a_any, a_failure, a_value};

#[test]
fn any_forgets_losing_branches() {
    init_test("any_forgets_losing_branches");
    let (slow, _slow_resolver) = Promise::<u32>::create();
    let branch = slow.clone();
    let winner = a_any(move || branch).or_last(|| a_value(9));
    assert_eq!(winner.outcome(), Some(Outcome::Success(9)));
    assert_with_log!(
        slow.listener_count() == 0,
        "loser listeners",
        0,
        slow.listener_count()
    );
    test_complete!("any_forgets_losing_branches");
}

#[test]
fn all_forgets_pending_branches_after_a_failure() {
    init_test("all_forgets_pending_branches_after_a_failure");
    let (first, fail_first) = Promise::<u32>::create();
    let (second, _second_resolver) = Promise::<&'static str>::create();
    let (a, b) = (first.clone(), second.clone());
    let joined = a_all(move || a).and_last(move || b);
    assert_eq!(second.listener_count(), 1);

    fail_first
        .failure(Error::user("first failed"))
        .expect("resolve");
    let err = joined.outcome().and_then(|o| o.force().err()).expect("failed");
    assert_eq!(err.message(), Some("first failed"));
    assert_eq!(second.listener_count(), 0);
    test_complete!("all_forgets_pending_branches_after_a_failure");
}

#[test]
fn repeated_failing_joins_do_not_accumulate_listeners() {
    init_test("repeated_failing_joins_do_not_accumulate_listeners");
    let never = Promise::<u32>::never();
    for round in 0..1_000 {
        let stuck = never.clone();
        let joined = a_all(|| a_failure::<u32>(Error::user("branch one")))
            .and(move || stuck)
            .to_void();
        let err = joined.outcome().and_then(|o| o.force().err());
        assert_eq!(
            err.and_then(|e| e.message().map(str::to_owned)).as_deref(),
            Some("branch one"),
            "round {round}"
        );
    }
    assert_eq!(never.listener_count(), 0);
    test_complete!("repeated_failing_joins_do_not_accumulate_listeners");
}

#[test]
fn all_waits_for_earlier_branches_before_reporting() {
    init_test("all_waits_for_earlier_branches_before_reporting");
    let (first, resolve_first) = Promise::<u32>::create();
    let a = first.clone();
    let joined = a_all(move || a).and_last(|| a_failure::<u32>(Error::user("second failed")));
    assert!(!joined.is_resolved(), "lower-index branch still pending");

    resolve_first
        .failure(Error::user("first failed"))
        .expect("resolve");
    let err = joined.outcome().and_then(|o| o.force().err()).expect("failed");
    assert_eq!(err.message(), Some("first failed"));
    assert_eq!(err.suppressed().len(), 1);
    test_complete!("all_waits_for_earlier_branches_before_reporting");
}

#[test]
fn suppressed_handler_keeps_listening_to_losers() {
    init_test("suppressed_handler_keeps_listening_to_losers");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let (slow, resolve_slow) = Promise::<u32>::create();
    let branch = slow.clone();
    let winner = a_any(move || branch)
        .suppressed(move |outcome| sink.lock().push(outcome))
        .or_last(|| a_value(1));
    assert_eq!(winner.outcome(), Some(Outcome::Success(1)));
    assert_eq!(slow.listener_count(), 1);

    resolve_slow.success(2).expect("resolve");
    assert_eq!(*seen.lock(), vec![Outcome::Success(2)]);
    assert_eq!(slow.listener_count(), 0);
    test_complete!("suppressed_handler_keeps_listening_to_losers");
}

#[test]
fn collect_over_failed_items_forgets_the_rest() {
    init_test("collect_over_failed_items_forgets_the_rest");
    let pending: Vec<_> = (0..5).map(|_| Promise::<u8>::create()).collect();
    let promises: Vec<_> = pending.iter().map(|(p, _)| p.clone()).collect();
    let branches = promises.clone();
    let collected = a_all_for_collect(0..5, move |i| branches[i].clone());
    assert!(promises.iter().all(|p| p.listener_count() == 1));

    pending[0]
        .1
        .failure(Error::user("first item"))
        .expect("resolve");
    assert!(collected.outcome().is_some_and(|o| o.is_failure()));
    for promise in &promises[1..] {
        assert_eq!(promise.listener_count(), 0);
    }
    test_complete!("collect_over_failed_items_forgets_the_rest");
}

proptest! {
    #![proptest_config(test_proptest_config(64))]

    #[test]
    fn any_leaves_no_listener_on_any_loser(branches in 2_usize..12, winner in 0_usize..12) {
        let winner = winner % branches;
        let pending: Vec<_> = (0..branches).map(|_| Promise::<usize>::create()).collect();
        let promises: Vec<_> = pending.iter().map(|(p, _)| p.clone()).collect();

        let mut builder: Option<AnyBuilder<usize>> = None;
        for promise in promises.iter().cloned() {
            builder = Some(match builder {
                None => a_any(move || promise),
                Some(any) => any.or(move || promise),
            });
        }
        let result = builder.expect("at least one branch").finish();
        prop_assert!(!result.is_resolved());

        pending[winner].1.success(winner).expect("resolve winner");
        prop_assert_eq!(result.outcome(), Some(Outcome::Success(winner)));
        for (i, promise) in promises.iter().enumerate() {
            prop_assert_eq!(promise.listener_count(), 0, "branch {}", i);
        }
    }
}
