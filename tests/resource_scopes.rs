//! Resource scopes close what they opened, in reverse order, whatever the
//! body does.

#[macro_use]
mod common;

use common::*;
use vatflow::combinator::{a_try, a_try_resource};
use vatflow::runtime::new_daemon_vat;
use vatflow::{Error, ErrorKind, a_failure, a_later, a_value, block_on};

#[test]
fn resources_close_in_reverse_open_order() {
    init_test("resources_close_in_reverse_open_order");
    let log = EventLog::new();
    let (a, b, c) = (
        TrackedResource::new("a", &log),
        TrackedResource::new("b", &log),
        TrackedResource::new("c", &log),
    );
    let body_log = log.clone();
    let names = block_on(move || {
        a_try_resource(a)
            .and_other(move || a_value(b))
            .and_other(move || a_value(c))
            .run(move |a, b, c| {
                body_log.push("body");
                a_value(format!("{}{}{}", a.name(), b.name(), c.name()))
            })
    })
    .expect("scope");
    assert_eq!(names, "abc");
    assert_eq!(log.snapshot(), vec!["body", "close:c", "close:b", "close:a"]);
    test_complete!("resources_close_in_reverse_open_order");
}

#[test]
fn chained_open_sees_the_outer_resource() {
    init_test("chained_open_sees_the_outer_resource");
    let log = EventLog::new();
    let outer = TrackedResource::new("conn", &log);
    let inner_log = log.clone();
    let name = block_on(move || {
        a_try_resource(outer)
            .and_chain(move |conn| {
                a_value(TrackedResource::new(format!("{}/stmt", conn.name()), &inner_log))
            })
            .run(|_, stmt| a_value(stmt.name().to_string()))
    })
    .expect("scope");
    assert_eq!(name, "conn/stmt");
    assert_eq!(log.snapshot(), vec!["close:conn/stmt", "close:conn"]);
    test_complete!("chained_open_sees_the_outer_resource");
}

#[test]
fn body_failure_wins_over_close_failure() {
    init_test("body_failure_wins_over_close_failure");
    let log = EventLog::new();
    let broken = TrackedResource::failing("broken", &log, "stuck");
    let err = block_on(move || {
        a_try_resource(broken).run(|_| {
            let worker = new_daemon_vat("scope-body");
            a_later(&worker, || a_failure::<()>(Error::user("body")))
        })
    })
    .unwrap_err();
    assert_eq!(err.message(), Some("body"));
    assert_eq!(err.suppressed().len(), 1);
    assert_eq!(err.suppressed()[0].kind(), ErrorKind::CloseFailed);
    assert_eq!(log.snapshot(), vec!["close:broken"]);
    test_complete!("body_failure_wins_over_close_failure");
}

#[test]
fn close_failure_fails_a_successful_scope() {
    init_test("close_failure_fails_a_successful_scope");
    let log = EventLog::new();
    let broken = TrackedResource::failing("broken", &log, "stuck");
    let err = block_on(move || a_try_resource(broken).run(|_| a_value(1))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CloseFailed);
    assert!(err.suppressed().is_empty());
    test_complete!("close_failure_fails_a_successful_scope");
}

#[test]
fn every_resource_closes_even_when_one_close_fails() {
    init_test("every_resource_closes_even_when_one_close_fails");
    let log = EventLog::new();
    let first = TrackedResource::new("first", &log);
    let second = TrackedResource::failing("second", &log, "stuck");
    let err = block_on(move || {
        a_try_resource(first)
            .and_other(move || a_value(second))
            .run(|_, _| a_value(()))
    })
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CloseFailed);
    assert_eq!(log.snapshot(), vec!["close:second", "close:first"]);
    test_complete!("every_resource_closes_even_when_one_close_fails");
}

#[test]
fn failed_open_closes_what_was_already_open() {
    init_test("failed_open_closes_what_was_already_open");
    let log = EventLog::new();
    let first = TrackedResource::new("first", &log);
    let body_ran = log.clone();
    let err = block_on(move || {
        a_try_resource(first)
            .and_other(|| a_failure::<TrackedResource>(Error::user("refused")))
            .run(move |_, _| {
                body_ran.push("body");
                a_value(())
            })
    })
    .unwrap_err();
    assert_eq!(err.message(), Some("refused"));
    assert_eq!(log.snapshot(), vec!["close:first"]);
    test_complete!("failed_open_closes_what_was_already_open");
}

#[test]
fn failed_first_open_skips_the_body() {
    init_test("failed_first_open_skips_the_body");
    let log = EventLog::new();
    let body_log = log.clone();
    let err = block_on(move || {
        a_try(|| a_failure::<TrackedResource>(Error::user("no route"))).run(move |_| {
            body_log.push("body");
            a_value(())
        })
    })
    .unwrap_err();
    assert_eq!(err.message(), Some("no route"));
    assert!(log.snapshot().is_empty());
    test_complete!("failed_first_open_skips_the_body");
}
