// src/core/errors.rs

//! Defines the error types shared by the checker, the scenarios, and the runner.

use chrono::{DateTime, Local};
use reqwest::Method;
use thiserror::Error;

/// Classification of a single failed check against the target application.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// An invariant violation that must hold even under load. Any occurrence
    /// during preflight or validation zeroes the score.
    #[error("[Fatal] {0}")]
    Fatal(String),

    #[error("the request timed out")]
    Timeout,

    #[error("server error: {0}")]
    ServerError(String),

    /// Expected status / Location / body-check failures.
    #[error("{0}")]
    Mismatch(String),

    /// Connect failures and other transport-level errors.
    #[error("the request failed: {0}")]
    Transport(String),
}

/// A failed check stamped with its time and request coordinates, as it is
/// stored in the run-wide error log.
#[derive(Debug, Clone)]
pub struct CheckerError {
    pub at: DateTime<Local>,
    pub kind: ErrorKind,
    pub method: Method,
    pub path: String,
    pub query: String,
}

impl CheckerError {
    pub fn new(kind: ErrorKind, method: Method, raw_path: &str) -> Self {
        let (path, query) = match raw_path.split_once('?') {
            Some((p, q)) => (p.to_string(), q.to_string()),
            None => (raw_path.to_string(), String::new()),
        };
        Self {
            at: Local::now(),
            kind,
            method,
            path,
            query,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, ErrorKind::Fatal(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }
}

impl std::fmt::Display for CheckerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} ({} {} {})",
            self.at.format("%Y/%m/%d %H:%M:%S%.3f"),
            self.kind,
            self.method,
            self.path,
            self.query
        )
    }
}

/// The error type every scenario and checker call returns.
///
/// `Recorded` wraps an error that has already been appended to the run-wide
/// log; it passes through layered checks unchanged so a single failure is
/// never recorded twice. `Check` carries a fresh classification produced by a
/// check closure and is recorded by `Checker::play` on the way out.
#[derive(Error, Debug, Clone)]
pub enum BenchError {
    #[error("{0}")]
    Recorded(CheckerError),

    #[error("{0}")]
    Check(ErrorKind),
}

impl BenchError {
    pub fn is_fatal(&self) -> bool {
        match self {
            BenchError::Recorded(e) => e.is_fatal(),
            BenchError::Check(kind) => matches!(kind, ErrorKind::Fatal(_)),
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            BenchError::Recorded(e) => e.is_timeout(),
            BenchError::Check(kind) => matches!(kind, ErrorKind::Timeout),
        }
    }
}

/// Shorthand for a fatal check failure.
pub fn fatal(msg: impl Into<String>) -> BenchError {
    BenchError::Check(ErrorKind::Fatal(msg.into()))
}

/// Shorthand for an ordinary expectation failure.
pub fn mismatch(msg: impl Into<String>) -> BenchError {
    BenchError::Check(ErrorKind::Mismatch(msg.into()))
}
