//! Vats run their actions one at a time, in submission order.

#[macro_use]
mod common;

use common::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use vatflow::combinator::a_all_for_collect;
use vatflow::runtime::{SingleThreadVat, new_daemon_vat};
use vatflow::{ErrorKind, Vat, a_later, a_value, block_on, block_on_outcome};

#[test]
fn daemon_vat_never_overlaps_actions() {
    init_test("daemon_vat_never_overlaps_actions");
    let vat = new_daemon_vat("serial-check");
    let busy = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    test_section!("submit from many threads");
    let submitters: Vec<_> = (0..8)
        .map(|_| {
            let (vat, busy, overlaps, done) = (
                vat.clone(),
                Arc::clone(&busy),
                Arc::clone(&overlaps),
                Arc::clone(&done),
            );
            std::thread::spawn(move || {
                for _ in 0..250 {
                    let (busy, overlaps, done) =
                        (Arc::clone(&busy), Arc::clone(&overlaps), Arc::clone(&done));
                    vat.execute(move || {
                        if busy.swap(true, Ordering::SeqCst) {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        std::hint::spin_loop();
                        busy.store(false, Ordering::SeqCst);
                        done.fetch_add(1, Ordering::SeqCst);
                    });
                }
            })
        })
        .collect();
    for submitter in submitters {
        submitter.join().expect("submitter");
    }

    test_section!("wait for drain");
    let mut waited = 0;
    while done.load(Ordering::SeqCst) < 2_000 && waited < 500 {
        std::thread::sleep(Duration::from_millis(10));
        waited += 1;
    }
    assert_eq!(done.load(Ordering::SeqCst), 2_000);
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    test_complete!("daemon_vat_never_overlaps_actions");
}

#[test]
fn actions_from_one_submitter_run_in_order() {
    init_test("actions_from_one_submitter_run_in_order");
    let vat = SingleThreadVat::spawn("ordered").expect("spawn");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let steps: Vec<_> = (0..1_000)
        .map(|i| {
            let seen = Arc::clone(&seen);
            a_later(vat.vat(), move || {
                seen.lock().push(i);
                a_value(())
            })
        })
        .collect();
    let last = steps.last().cloned().expect("steps");
    futures_lite::future::block_on(last.into_future()).expect("last step");
    assert_eq!(*seen.lock(), (0..1_000).collect::<Vec<_>>());
    vat.stop();
    vat.join();
    test_complete!("actions_from_one_submitter_run_in_order");
}

#[test]
fn continuations_return_to_the_registering_vat() {
    init_test("continuations_return_to_the_registering_vat");
    let (home, worker_thread) = block_on(|| {
        let home = Vat::current().expect("block_on runs on a vat");
        let worker = new_daemon_vat("worker");
        let home_id = home.id();
        a_later(&worker, || a_value(std::thread::current().id())).map(move |worker_thread| {
            let back = Vat::current().map(|vat| vat.id()).ok();
            (back == Some(home_id), worker_thread)
        })
    })
    .expect("flow");
    assert!(home, "continuation ran on the block_on vat");
    assert_ne!(worker_thread, std::thread::current().id());
    test_complete!("continuations_return_to_the_registering_vat");
}

#[test]
fn nested_block_on_is_a_usage_error() {
    init_test("nested_block_on_is_a_usage_error");
    let inner = block_on(|| a_value(block_on_outcome(|| a_value(1)))).expect("outer");
    match inner {
        vatflow::Outcome::Failure(error) => assert_eq!(error.kind(), ErrorKind::VatAlreadyActive),
        other => panic!("expected a failure, got {other:?}"),
    }
    test_complete!("nested_block_on_is_a_usage_error");
}

#[test]
fn stopped_vat_joins_and_reports_state() {
    init_test("stopped_vat_joins_and_reports_state");
    let vat = SingleThreadVat::spawn("stoppable").expect("spawn");
    let ran = a_all_for_collect(0..10, |i| a_later(vat.vat(), move || a_value(i)));
    assert_eq!(
        futures_lite::future::block_on(ran.into_future()).expect("ran"),
        (0..10).collect::<Vec<_>>()
    );
    assert!(vat.stop());
    assert!(!vat.stop());
    vat.join();
    test_complete!("stopped_vat_joins_and_reports_state");
}
