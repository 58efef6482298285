//! Lightweight in-process link metrics
//!
//! Counters and gauges are shared atomics looked up by name in one process-wide
//! registry. Updates are reported as `debug!` events; `log_all_metrics` dumps
//! the current values at `info`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// Monotonic count of events or bytes
#[derive(Clone, Debug)]
pub struct Counter {
    name: Arc<str>,
    value: Arc<AtomicU64>,
}

impl Counter {
    /// A standalone counter, not visible through the registry
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            value: Arc::default(),
        }
    }

    pub fn increment(&self) {
        self.add(1);
    }

    pub fn add(&self, amount: u64) {
        let total = self.value.fetch_add(amount, Ordering::Relaxed) + amount;
        debug!(counter = %self.name, amount, total, "metric updated");
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Level that moves both ways, such as links currently in flight
#[derive(Clone, Debug)]
pub struct Gauge {
    name: Arc<str>,
    value: Arc<AtomicI64>,
}

impl Gauge {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            value: Arc::default(),
        }
    }

    pub fn increment(&self) {
        self.shift(1);
    }

    pub fn decrement(&self) {
        self.shift(-1);
    }

    fn shift(&self, delta: i64) {
        let level = self.value.fetch_add(delta, Ordering::Relaxed) + delta;
        debug!(gauge = %self.name, level, "metric updated");
    }
}

#[derive(Default)]
struct Registry {
    counters: RwLock<HashMap<Arc<str>, Counter>>,
    gauges: RwLock<HashMap<Arc<str>, Gauge>>,
}

/// Fetch `name` from `table`, creating it on first use
fn lookup<M: Clone>(table: &RwLock<HashMap<Arc<str>, M>>, name: &str, make: fn(&str) -> M) -> M {
    if let Some(found) = table
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
    {
        return found.clone();
    }
    table
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(Arc::from(name))
        .or_insert_with(|| make(name))
        .clone()
}

lazy_static::lazy_static! {
    static ref REGISTRY: Registry = Registry::default();
}

/// Registered counter called `name`
pub fn counter(name: &str) -> Counter {
    lookup(&REGISTRY.counters, name, Counter::new)
}

/// Registered gauge called `name`
pub fn gauge(name: &str) -> Gauge {
    lookup(&REGISTRY.gauges, name, Gauge::new)
}

/// Report every registered metric at `info`
pub fn log_all_metrics() {
    let counters = REGISTRY.counters.read().unwrap_or_else(PoisonError::into_inner);
    for (name, counter) in counters.iter() {
        info!(counter = %name, value = counter.get(), "metric");
    }
    drop(counters);

    let gauges = REGISTRY.gauges.read().unwrap_or_else(PoisonError::into_inner);
    for (name, gauge) in gauges.iter() {
        info!(gauge = %name, level = gauge.value.load(Ordering::Relaxed), "metric");
    }
}
