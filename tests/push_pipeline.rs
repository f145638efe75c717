//! Push pipelines: buffered queues, transforming sinks, and push windows.

#[macro_use]
mod common;

use common::*;
use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use vatflow::combinator::AsyncCloseable;
use vatflow::runtime::new_daemon_vat;
use vatflow::stream::{BufferedQueue, PullStreamBuilder, Streams};
use vatflow::{AsyncSink, ErrorKind, a_later, a_value, block_on};

#[derive(Default)]
struct Gauge {
    now: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.now.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.now.fetch_sub(1, Ordering::SeqCst);
    }
}

fn pushed_squares(count: i64, size: usize, gauge: &Arc<Gauge>) -> Vec<i64> {
    let gauge = Arc::clone(gauge);
    block_on(move || {
        let worker = new_daemon_vat("push-square");
        Streams::for_range(0..count)
            .push()
            .window(size)
            .expect("positive size")
            .map(move |i| {
                gauge.enter();
                let gauge = Arc::clone(&gauge);
                a_later(&worker, move || {
                    gauge.leave();
                    a_value(i * i)
                })
            })
            .to_vec()
    })
    .expect("pipeline")
}

#[test]
fn buffered_queue_holds_the_writer_only_when_full() {
    init_test("buffered_queue_holds_the_writer_only_when_full");
    let (sink, stream) = BufferedQueue::bounded::<u32>(3).expect("capacity");
    let accepted: Vec<_> = (0..3).map(|i| sink.put(i)).collect();
    assert!(accepted.iter().all(|put| put.is_resolved()));
    let held = sink.put(3);
    assert_with_log!(!held.is_resolved(), "fourth put waits", false, held.is_resolved());

    let _ = sink.close();
    let values = block_on(move || PullStreamBuilder::from_shared(stream).to_vec()).expect("drain");
    assert_eq!(values, vec![0, 1, 2, 3]);
    assert!(held.is_resolved());
    assert!(sink.finished().is_resolved());
    test_complete!("buffered_queue_holds_the_writer_only_when_full");
}

#[test]
fn push_window_bounds_the_transforms_in_flight() {
    init_test("push_window_bounds_the_transforms_in_flight");
    let gauge = Arc::new(Gauge::default());
    let values = pushed_squares(40, 4, &gauge);
    assert_eq!(values, (0..40).map(|i| i * i).collect::<Vec<_>>());
    let peak = gauge.peak.load(Ordering::SeqCst);
    assert_with_log!(peak <= 4, "peak transforms", "<= 4", peak);
    test_complete!("push_window_bounds_the_transforms_in_flight");
}

#[test]
fn early_stop_in_push_mode_reports_success() {
    init_test("early_stop_in_push_mode_reports_success");
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    block_on(move || {
        Streams::for_range(0..10_000)
            .push()
            .filter_sync(|i| i % 2 == 1)
            .consume(move |_| a_value(counter.fetch_add(1, Ordering::SeqCst) < 9))
    })
    .expect("consume");
    assert_eq!(seen.load(Ordering::SeqCst), 10);
    test_complete!("early_stop_in_push_mode_reports_success");
}

#[test]
fn push_failure_reaches_the_consumer() {
    init_test("push_failure_reaches_the_consumer");
    let (sink, stream) = BufferedQueue::unbounded::<u8>();
    let _ = sink.put(1);
    let _ = sink.fail(vatflow::Error::user("writer died"));
    let err = block_on(move || {
        PullStreamBuilder::from_shared(stream)
            .push()
            .map_sync(|b| b + 1)
            .to_vec()
    })
    .unwrap_err();
    assert_eq!(err.message(), Some("writer died"));
    assert_ne!(err.kind(), ErrorKind::ResourceClosed);
    test_complete!("push_failure_reaches_the_consumer");
}

proptest! {
    #![proptest_config(test_proptest_config(16))]

    #[test]
    fn push_window_keeps_order(size in 1_usize..6, count in 0_i64..30) {
        let gauge = Arc::new(Gauge::default());
        let values = pushed_squares(count, size, &gauge);
        prop_assert_eq!(values, (0..count).map(|i| i * i).collect::<Vec<_>>());
        prop_assert!(gauge.peak.load(Ordering::SeqCst) <= size);
    }
}
