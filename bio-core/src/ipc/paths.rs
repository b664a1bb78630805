//! Allocation of fresh object paths
//!
//! Paths of exported operations and observers have the shape
//! `<parent>/<category>/<kind>/<n>`, where `n` comes from a process-wide
//! counter per (category, kind). Counters are shared by all parents, so the
//! set of counters stays bounded however many parents come and go.

use bio_protocol::ObjectPath;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use crate::error::{BiometryError, Result};

type CounterKey = (&'static str, &'static str);

static COUNTERS: OnceLock<Mutex<HashMap<CounterKey, Arc<AtomicU64>>>> = OnceLock::new();

fn counter_for(key: CounterKey) -> Arc<AtomicU64> {
    COUNTERS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .entry(key)
        .or_default()
        .clone()
}

#[cfg(test)]
fn counter_count() -> usize {
    COUNTERS.get().map(|counters| counters.lock().len()).unwrap_or(0)
}

/// Next unused path below `parent`
pub fn next_child_path(
    parent: &ObjectPath,
    category: &'static str,
    kind: &'static str,
) -> Result<ObjectPath> {
    let n = counter_for((category, kind)).fetch_add(1, Ordering::Relaxed);
    parent
        .join([category, kind, &n.to_string()])
        .map_err(BiometryError::protocol)
}
