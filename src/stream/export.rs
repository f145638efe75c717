//! Vat-bound stream and sink proxies.
//!
//! A stream or sink owned by one vat can be handed to code running
//! elsewhere through these proxies: every operation is sent to the owning
//! vat, and the caller's continuations still run on the caller's vat.

use super::stream::{AsyncSink, AsyncStream, SharedSink, SharedStream};
use crate::combinator::{AsyncCloseable, a_later};
use crate::error::Error;
use crate::promise::Promise;
use crate::runtime::Vat;
use crate::types::Value;
use std::sync::Arc;

/// Stream proxy whose operations run on the owning vat.
pub struct ExportedStream<T> {
    vat: Vat,
    inner: SharedStream<T>,
}

impl<T: Value> ExportedStream<T> {
    /// Exports `inner` from `vat`.
    pub fn new(vat: &Vat, inner: SharedStream<T>) -> Self {
        Self {
            vat: vat.clone(),
            inner,
        }
    }
}

impl<T: Value> AsyncCloseable for ExportedStream<T> {
    fn close(&self) -> Promise<()> {
        let inner = Arc::clone(&self.inner);
        a_later(&self.vat, move || inner.close())
    }
}

impl<T: Value> AsyncStream<T> for ExportedStream<T> {
    fn next(&self) -> Promise<Option<T>> {
        let inner = Arc::clone(&self.inner);
        a_later(&self.vat, move || inner.next())
    }

    fn supports_pipelining(&self) -> bool {
        self.inner.supports_pipelining()
    }
}

/// Sink proxy whose operations run on the owning vat.
pub struct ExportedSink<T> {
    vat: Vat,
    inner: SharedSink<T>,
}

impl<T: Value> ExportedSink<T> {
    /// Exports `inner` from `vat`.
    pub fn new(vat: &Vat, inner: SharedSink<T>) -> Self {
        Self {
            vat: vat.clone(),
            inner,
        }
    }
}

impl<T: Value> AsyncCloseable for ExportedSink<T> {
    fn close(&self) -> Promise<()> {
        let inner = Arc::clone(&self.inner);
        a_later(&self.vat, move || inner.close())
    }
}

impl<T: Value> AsyncSink<T> for ExportedSink<T> {
    fn put(&self, value: T) -> Promise<()> {
        let inner = Arc::clone(&self.inner);
        a_later(&self.vat, move || inner.put(value))
    }

    fn fail(&self, error: Error) -> Promise<()> {
        let inner = Arc::clone(&self.inner);
        a_later(&self.vat, move || inner.fail(error))
    }

    fn finished(&self) -> Promise<()> {
        let inner = Arc::clone(&self.inner);
        a_later(&self.vat, move || inner.finished())
    }
}

/// Exports `sink` from `vat`.
pub fn export_sink<T: Value>(vat: &Vat, sink: SharedSink<T>) -> SharedSink<T> {
    Arc::new(ExportedSink::new(vat, sink))
}
