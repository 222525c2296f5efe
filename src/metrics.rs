//! Injectable status/metrics surface. The backing store is the
//! embedding application's choice; this crate never reaches into a
//! global counter table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

/// One backend's identity for metric tagging: `fastcgi.backend.<host-id>[.<proc-id>]<tag>`.
#[derive(Debug, Clone, Copy)]
pub struct BackendTag<'a> {
    pub host_id: &'a str,
    pub proc_id: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    Load,
    Connected,
    Died,
    Disabled,
    Overloaded,
}

impl Counter {
    fn suffix(self) -> &'static str {
        match self {
            Counter::Load => ".load",
            Counter::Connected => ".connected",
            Counter::Died => ".died",
            Counter::Disabled => ".disabled",
            Counter::Overloaded => ".overloaded",
        }
    }
}

pub trait Metrics: Send + Sync {
    fn incr_backend(&self, tag: BackendTag<'_>, counter: Counter, delta: i64);
    fn set_backend(&self, tag: BackendTag<'_>, counter: Counter, value: i64);
    fn incr_active_requests(&self, delta: i64);
    fn incr_requests(&self, delta: i64);
}

/// Discards everything. The default when an embedder doesn't care to
/// wire up a sink.
#[derive(Debug, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn incr_backend(&self, _tag: BackendTag<'_>, _counter: Counter, _delta: i64) {}
    fn set_backend(&self, _tag: BackendTag<'_>, _counter: Counter, _value: i64) {}
    fn incr_active_requests(&self, _delta: i64) {}
    fn incr_requests(&self, _delta: i64) {}
}

fn key(tag: BackendTag<'_>, counter: Counter) -> String {
    match tag.proc_id {
        Some(proc_id) => format!("fastcgi.backend.{}.{}{}", tag.host_id, proc_id, counter.suffix()),
        None => format!("fastcgi.backend.{}{}", tag.host_id, counter.suffix()),
    }
}

/// In-process reference implementation, useful for tests and for
/// embedders happy to poll an in-memory snapshot.
#[derive(Debug, Default)]
pub struct AtomicMetrics {
    backend: Mutex<HashMap<String, i64>>,
    active_requests: AtomicI64,
    requests: AtomicI64,
}

impl AtomicMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> HashMap<String, i64> {
        self.backend.lock().expect("metrics mutex poisoned").clone()
    }

    pub fn active_requests(&self) -> i64 {
        self.active_requests.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> i64 {
        self.requests.load(Ordering::Relaxed)
    }
}

impl Metrics for AtomicMetrics {
    fn incr_backend(&self, tag: BackendTag<'_>, counter: Counter, delta: i64) {
        let mut guard = self.backend.lock().expect("metrics mutex poisoned");
        *guard.entry(key(tag, counter)).or_insert(0) += delta;
    }

    fn set_backend(&self, tag: BackendTag<'_>, counter: Counter, value: i64) {
        let mut guard = self.backend.lock().expect("metrics mutex poisoned");
        guard.insert(key(tag, counter), value);
    }

    fn incr_active_requests(&self, delta: i64) {
        self.active_requests.fetch_add(delta, Ordering::Relaxed);
    }

    fn incr_requests(&self, delta: i64) {
        self.requests.fetch_add(delta, Ordering::Relaxed);
    }
}
