//! Promise resolution protocol: single assignment, listener order, and
//! bounded stack depth.

#[macro_use]
mod common;

use common::*;
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;
use vatflow::runtime::SingleThreadVat;
use vatflow::{Error, ErrorKind, Outcome, Promise, a_value, block_on};

#[test]
fn second_resolution_is_rejected_and_ignored() {
    init_test("second_resolution_is_rejected_and_ignored");
    let (promise, resolver) = Promise::<u32>::create();
    resolver.success(1).expect("first resolution");
    let err = resolver.success(2).unwrap_err();
    assert_with_log!(
        err.kind() == ErrorKind::DoubleResolution,
        "double resolution kind",
        ErrorKind::DoubleResolution,
        err.kind()
    );
    assert_eq!(promise.outcome(), Some(Outcome::Success(1)));
    test_complete!("second_resolution_is_rejected_and_ignored");
}

#[test]
fn late_listener_runs_exactly_once() {
    init_test("late_listener_runs_exactly_once");
    let promise = Promise::success("done");
    let calls = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&calls);
    promise.listen_sync(move |outcome| {
        assert_eq!(outcome, Outcome::Success("done"));
        *counter.lock() += 1;
    });
    assert_eq!(*calls.lock(), 1);
    assert_eq!(promise.listener_count(), 0);
    test_complete!("late_listener_runs_exactly_once");
}

#[test]
fn long_forwarding_chain_does_not_grow_the_stack() {
    init_test("long_forwarding_chain_does_not_grow_the_stack");
    let (root, resolver) = Promise::<u64>::create();
    let mut last = root;
    for _ in 0..200_000 {
        let (next, forward) = Promise::create();
        last.forward_to(forward);
        last = next;
    }
    resolver.success(42).expect("resolve");
    assert_eq!(last.outcome(), Some(Outcome::Success(42)));
    test_complete!("long_forwarding_chain_does_not_grow_the_stack");
}

#[test]
fn failures_pass_through_value_steps() {
    init_test("failures_pass_through_value_steps");
    let err = block_on(|| {
        a_value(1)
            .map(|x| x + 1)
            .flat_map(|_| Promise::<i32>::failure(Error::user("step two")))
            .map(|x| x * 100)
    })
    .unwrap_err();
    assert_eq!(err.message(), Some("step two"));
    test_complete!("failures_pass_through_value_steps");
}

#[test]
fn awaiting_a_promise_from_another_executor() {
    init_test("awaiting_a_promise_from_another_executor");
    let vat = SingleThreadVat::spawn("await-source").expect("spawn");
    let answer = vatflow::a_later(vat.vat(), || a_value(String::from("remote")));
    let value = futures_lite::future::block_on(answer.into_future()).expect("await");
    assert_eq!(value, "remote");
    vat.stop();
    vat.join();
    test_complete!("awaiting_a_promise_from_another_executor");
}

proptest! {
    #![proptest_config(test_proptest_config(64))]

    #[test]
    fn sync_listeners_fire_in_attachment_order(count in 1_usize..64) {
        let (promise, resolver) = Promise::<usize>::create();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..count {
            let order = Arc::clone(&order);
            promise.listen_sync(move |_| order.lock().push(i));
        }
        resolver.success(0).expect("resolve");
        prop_assert_eq!(order.lock().clone(), (0..count).collect::<Vec<_>>());
    }

    #[test]
    fn vat_listeners_fire_in_attachment_order(count in 1_usize..48, forgotten in proptest::collection::vec(any::<bool>(), 48)) {
        let order = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&order);
        let expected: Vec<usize> = (0..count).filter(|i| !forgotten[*i]).collect();
        block_on(move || {
            let (promise, resolver) = Promise::<()>::create();
            let mut keys = Vec::new();
            for i in 0..count {
                let log = Arc::clone(&log);
                keys.push(promise.listen(move |_| log.lock().push(i)));
            }
            for (i, key) in keys.into_iter().enumerate() {
                if forgotten[i] {
                    assert!(promise.forget(key));
                }
            }
            let done = promise.then_value(());
            let _ = resolver.success(());
            done
        })
        .expect("flow");
        prop_assert_eq!(order.lock().clone(), expected);
    }
}
