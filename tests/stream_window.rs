//! Windowed pipelines keep element order while bounding the reads in flight.

#[macro_use]
mod common;

use common::*;
use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use vatflow::runtime::new_daemon_vat;
use vatflow::stream::{StreamBase, Streams};
use vatflow::{PullStreamBuilder, a_later, a_value, block_on};

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

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

fn windowed_squares(count: i64, size: usize, gauge: &Arc<Gauge>) -> Vec<i64> {
    let gauge = Arc::clone(gauge);
    block_on(move || {
        let worker = new_daemon_vat("window-square");
        Streams::for_range(0..count)
            .map(move |i| {
                gauge.enter();
                let gauge = Arc::clone(&gauge);
                a_later(&worker, move || {
                    gauge.leave();
                    a_value(i * i)
                })
            })
            .window(size)
            .expect("positive size")
            .to_vec()
    })
    .expect("pipeline")
}

#[test]
fn window_of_one_is_strictly_sequential() {
    init_test("window_of_one_is_strictly_sequential");
    let gauge = Arc::new(Gauge::default());
    let values = windowed_squares(25, 1, &gauge);
    assert_eq!(values, (0..25).map(|i| i * i).collect::<Vec<_>>());
    assert_eq!(gauge.peak(), 1);
    test_complete!("window_of_one_is_strictly_sequential");
}

#[test]
fn head_after_window_closes_the_source() {
    init_test("head_after_window_closes_the_source");
    let log = EventLog::new();
    let reads = Arc::new(AtomicUsize::new(0));
    let (counter, closed) = (Arc::clone(&reads), log.clone());
    let values = block_on(move || {
        let source = StreamBase::with_close(
            move || a_value(Some(counter.fetch_add(1, Ordering::SeqCst))),
            move || {
                closed.push("source closed");
                a_value(())
            },
        );
        PullStreamBuilder::new(source)
            .window(3)
            .expect("positive size")
            .head(5)
            .to_vec()
    })
    .expect("pipeline");
    assert_eq!(values, vec![0, 1, 2, 3, 4]);
    assert_eq!(log.snapshot(), vec!["source closed"]);
    assert!(reads.load(Ordering::SeqCst) <= 5 + 3, "read-ahead stays within the window");
    test_complete!("head_after_window_closes_the_source");
}

#[test]
fn stages_compose_around_a_window() {
    init_test("stages_compose_around_a_window");
    let values = block_on(|| {
        let worker = new_daemon_vat("window-compose");
        Streams::for_iter(vec![1, 1, 2, 3, 3, 3, 4, 5, 5, 6])
            .changed()
            .map(move |x| a_later(&worker, move || a_value(x * 10)))
            .window(4)
            .expect("positive size")
            .filter_sync(|x| x % 20 != 0)
            .flat_map_iterable(|x| a_value(vec![x, x + 1]))
            .to_vec()
    })
    .expect("pipeline");
    assert_eq!(values, vec![10, 11, 30, 31, 50, 51]);
    test_complete!("stages_compose_around_a_window");
}

proptest! {
    #![proptest_config(test_proptest_config(24))]

    #[test]
    fn window_keeps_order_and_bounds_reads(size in 1_usize..6, count in 0_i64..40) {
        let gauge = Arc::new(Gauge::default());
        let values = windowed_squares(count, size, &gauge);
        prop_assert_eq!(values, (0..count).map(|i| i * i).collect::<Vec<_>>());
        prop_assert!(gauge.peak() <= size, "peak {} above window {}", gauge.peak(), size);
    }
}
