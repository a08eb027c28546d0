// src/core/context.rs

//! The run-wide shared context: error log, slow-path marker, counters, host
//! pool, and the public URL-cache tier. A single `Arc<BenchContext>` is
//! threaded through every checker and scenario.

use crate::core::counter::CounterRegistry;
use crate::core::errors::CheckerError;
use crate::core::transport::HostPool;
use crate::core::urlcache::CacheStore;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Default)]
struct ErrorLog {
    /// When set, newly reported errors are discarded. Raised once the
    /// benchmark window ends so shutdown races cannot pollute the report.
    guard: bool,
    entries: Vec<CheckerError>,
    last_at: Option<Instant>,
}

#[derive(Debug, Clone)]
struct SlowMark {
    path: String,
    at: Instant,
}

/// State shared by everything that talks to the target application.
#[derive(Debug)]
pub struct BenchContext {
    pub counters: CounterRegistry,
    pub hosts: Arc<HostPool>,
    pub public_cache: CacheStore,
    pub debug: bool,
    errors: Mutex<ErrorLog>,
    slow: Mutex<Option<SlowMark>>,
    request_seq: AtomicU64,
}

impl BenchContext {
    pub fn new(hosts: Vec<String>, debug: bool) -> Arc<Self> {
        Arc::new(Self {
            counters: CounterRegistry::new(),
            hosts: Arc::new(HostPool::new(hosts)),
            public_cache: CacheStore::new(),
            debug,
            errors: Mutex::new(ErrorLog::default()),
            slow: Mutex::new(None),
            request_seq: AtomicU64::new(0),
        })
    }

    /// Appends an error to the log unless the guard flag is raised.
    pub fn record_error(&self, err: CheckerError) {
        let mut log = self.errors.lock();
        if !log.guard {
            log.last_at = Some(Instant::now());
            log.entries.push(err);
        }
    }

    pub fn guard_errors(&self, guard: bool) {
        self.errors.lock().guard = guard;
    }

    /// The most recently recorded error and when it was recorded.
    pub fn last_error(&self) -> Option<(CheckerError, Instant)> {
        let log = self.errors.lock();
        match (log.entries.last(), log.last_at) {
            (Some(e), Some(at)) => Some((e.clone(), at)),
            _ => None,
        }
    }

    /// All recorded errors rendered for the report, in record order.
    pub fn error_strings(&self) -> Vec<String> {
        self.errors.lock().entries.iter().map(|e| e.to_string()).collect()
    }

    /// Remembers `path` as the most recent slow request.
    pub fn mark_slow(&self, path: &str) {
        *self.slow.lock() = Some(SlowMark {
            path: path.to_string(),
            at: Instant::now(),
        });
    }

    pub fn last_slow_path(&self) -> Option<(String, Instant)> {
        self.slow.lock().as_ref().map(|m| (m.path.clone(), m.at))
    }

    /// Monotonic id for debug-mode request tagging.
    pub fn next_request_id(&self) -> u64 {
        self.request_seq.fetch_add(1, Ordering::Relaxed) + 1
    }
}
