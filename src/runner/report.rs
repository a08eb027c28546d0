// src/runner/report.rs

//! The result document emitted at the end of a run.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct BenchResult {
    pub job_id: String,
    pub ip_addrs: String,

    pub pass: bool,
    pub score: i64,
    pub message: String,
    #[serde(rename = "error")]
    pub errors: Vec<String>,
    #[serde(rename = "log")]
    pub logs: Vec<String>,
    pub load_level: i64,

    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl BenchResult {
    pub fn new(job_id: String, ip_addrs: String) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            ip_addrs,
            pass: false,
            score: 0,
            message: String::new(),
            errors: Vec::new(),
            logs: Vec::new(),
            load_level: 0,
            start_time: now,
            end_time: now,
        }
    }
}

/// The score formula: POSTs weigh triple, `/fetch` polling earns nothing,
/// and a conditional 304 is worth a hundredth of a fresh GET.
pub fn compute_score(get: i64, fetch: i64, post: i64, msg: i64, s304: i64) -> i64 {
    (get - fetch - s304) + 3 * post + msg + s304 / 100
}
