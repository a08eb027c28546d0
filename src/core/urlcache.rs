// src/core/urlcache.rs

//! Conditional-request caching for checked URLs.
//!
//! An entry captures the validators of a 200 response (`ETag`,
//! `Last-Modified`) together with the MD5 of the observed body, so later
//! requests can be made conditional and 200 bodies can be verified against
//! the bytes first seen. Entries live in two tiers: each checker has a
//! private store, and responses marked `Cache-Control: public` are also
//! placed in a process-wide store.

use parking_lot::Mutex;
use reqwest::header::{ETAG, HeaderMap, HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use std::collections::HashMap;
use std::sync::Arc;

/// The few `Cache-Control` directives the checker cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheDirective {
    pub no_cache: bool,
    pub no_store: bool,
    pub public: bool,
}

impl CacheDirective {
    pub fn parse(value: &str) -> Self {
        let mut directive = Self::default();
        for part in value.split(',') {
            let token = part.trim().split('=').next().unwrap_or("").trim();
            if token.eq_ignore_ascii_case("no-cache") {
                directive.no_cache = true;
            } else if token.eq_ignore_ascii_case("no-store") {
                directive.no_store = true;
            } else if token.eq_ignore_ascii_case("public") {
                directive.public = true;
            }
        }
        directive
    }
}

/// Cached validators for one URL.
#[derive(Debug, Clone)]
pub struct UrlCache {
    pub last_modified: Option<String>,
    pub etag: Option<String>,
    pub cache_control: CacheDirective,
    pub md5: String,
}

impl UrlCache {
    /// Builds an entry from a 200 response's headers and buffered body.
    ///
    /// Returns the body hash in either case; the entry itself is `None` when
    /// the response refuses caching (empty directive, `no-cache`, or
    /// `no-store`).
    pub fn from_response(headers: &HeaderMap, body: &[u8]) -> (Option<Self>, String) {
        let hash = format!("{:x}", md5::compute(body));

        let raw: Vec<&str> = headers
            .get_all(reqwest::header::CACHE_CONTROL)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        let joined = raw.join(", ");
        let directive = CacheDirective::parse(&joined);

        if joined.is_empty() || directive.no_cache || directive.no_store {
            return (None, hash);
        }

        let header_str =
            |name| headers.get(name).and_then(|v: &HeaderValue| v.to_str().ok()).map(String::from);

        (
            Some(Self {
                last_modified: header_str(LAST_MODIFIED),
                etag: header_str(ETAG),
                cache_control: directive,
                md5: hash.clone(),
            }),
            hash,
        )
    }

    /// Adds the conditional headers derived from this entry to a request.
    pub fn apply(&self, headers: &mut HeaderMap) {
        if let Some(lm) = &self.last_modified
            && let Ok(value) = HeaderValue::from_str(lm)
        {
            headers.insert(IF_MODIFIED_SINCE, value);
        }
        if let Some(etag) = &self.etag
            && let Ok(value) = HeaderValue::from_str(etag)
        {
            headers.insert(IF_NONE_MATCH, value);
        }
    }
}

/// A thread-safe map of request path to cached entry. Entries are immutable
/// once inserted and are removed only on explicit invalidation.
#[derive(Debug, Default)]
pub struct CacheStore {
    items: Mutex<HashMap<String, Arc<UrlCache>>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<Arc<UrlCache>> {
        self.items.lock().get(path).cloned()
    }

    pub fn set(&self, path: &str, entry: Arc<UrlCache>) {
        self.items.lock().insert(path.to_string(), entry);
    }

    pub fn del(&self, path: &str) {
        self.items.lock().remove(path);
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}
