// src/core/counter.rs

//! Process-wide named counters, used both for scoring and for level-up
//! bookkeeping.

use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;

/// A registry of signed 64-bit counters keyed by string. Increments and reads
/// share a single short-lived mutex.
#[derive(Debug, Default)]
pub struct CounterRegistry {
    map: Mutex<HashMap<String, i64>>,
}

impl CounterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self, key: impl Into<String>) {
        self.add(key, 1);
    }

    pub fn add(&self, key: impl Into<String>, delta: i64) {
        let mut map = self.map.lock();
        *map.entry(key.into()).or_insert(0) += delta;
    }

    pub fn get(&self, key: &str) -> i64 {
        self.map.lock().get(key).copied().unwrap_or(0)
    }

    pub fn sum_prefix(&self, prefix: &str) -> i64 {
        self.map
            .lock()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(_, v)| v)
            .sum()
    }

    pub fn sum_matching(&self, re: &Regex) -> i64 {
        self.map
            .lock()
            .iter()
            .filter(|(k, _)| re.is_match(k))
            .map(|(_, v)| v)
            .sum()
    }

    /// Returns a copy of the whole counter map.
    pub fn snapshot(&self) -> HashMap<String, i64> {
        self.map.lock().clone()
    }
}
