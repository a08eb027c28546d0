// src/core/checker.rs

//! The per-virtual-user HTTP client and the declarative `CheckAction` it
//! executes.
//!
//! A checker is created lazily for each user and lives as long as the user
//! does. It owns a cookie jar, a private URL cache, and a small token budget
//! bounding its concurrent requests. `play` performs one scripted request,
//! validates the response, and records at most one error per call into the
//! run-wide log.

use crate::core::context::BenchContext;
use crate::core::errors::{BenchError, CheckerError, ErrorKind};
use crate::core::urlcache::{CacheStore, UrlCache};
use bytes::Bytes;
use parking_lot::Mutex;
use regex::Regex;
use reqwest::header::{HOST, HeaderMap, LOCATION, USER_AGENT};
use reqwest::{Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The logical host the target application routes on; the TCP connection
/// itself goes to whichever target host the pool picks.
pub const APP_HOST: &str = "isubata.example.com";

pub const CHECKER_USER_AGENT: &str = "isubench/0.9";

pub const GET_TIMEOUT: Duration = Duration::from_secs(10);
pub const POST_TIMEOUT: Duration = Duration::from_secs(3);
pub const INITIALIZE_TIMEOUT: Duration = Duration::from_secs(10);
pub const SLOW_THRESHOLD: Duration = Duration::from_millis(1000);

/// Concurrent requests allowed per checker.
pub const MAX_CHECKER_REQUESTS: usize = 6;

const IDLE_CONNS_PER_HOST: usize = 65536;

/// The buffered response handed to check closures.
pub struct CheckResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A response-validation closure. Runs synchronously after the body has been
/// buffered; any error it returns invalidates the private cache entry for the
/// request path and is recorded once.
pub type CheckFn<'a> = Box<dyn FnOnce(&CheckResponse) -> Result<(), BenchError> + Send + 'a>;

/// The request body of a `CheckAction`.
#[derive(Default)]
pub enum PostBody {
    #[default]
    Empty,
    /// URL-encoded form fields.
    Form(Vec<(String, String)>),
    /// A prebuilt multipart form; the content type comes from the form itself.
    Multipart(reqwest::multipart::Form),
}

/// A declarative description of one request and its expected outcome.
#[derive(Default)]
pub struct CheckAction<'a> {
    pub method: Method,
    pub path: String,

    pub post: PostBody,
    pub headers: Vec<(String, String)>,

    pub expected_status: Option<StatusCode>,
    pub expected_location: Option<Regex>,
    pub description: &'static str,
    pub check: Option<CheckFn<'a>>,

    pub enable_cache: bool,
    /// Advisory for callers that preload assets; the checker itself only
    /// applies conditional headers and never suppresses the request.
    pub skip_if_cache_available: bool,
    pub disable_slow_checking: bool,
}

/// Aborts the 1-second slow-path watchdog when the response arrives.
struct SlowWatchdog(tokio::task::JoinHandle<()>);

impl Drop for SlowWatchdog {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct Checker {
    ctx: Arc<BenchContext>,
    client: Mutex<reqwest::Client>,
    pub cache: CacheStore,
    tokens: Semaphore,
    debug_user: Mutex<Option<String>>,
}

fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .cookie_store(true)
        .redirect(reqwest::redirect::Policy::none())
        .pool_max_idle_per_host(IDLE_CONNS_PER_HOST)
        .build()
        .expect("failed to build HTTP client")
}

impl Checker {
    pub fn new(ctx: Arc<BenchContext>) -> Self {
        Self {
            ctx,
            client: Mutex::new(build_client()),
            cache: CacheStore::new(),
            tokens: Semaphore::new(MAX_CHECKER_REQUESTS),
            debug_user: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &Arc<BenchContext> {
        &self.ctx
    }

    /// Tags debug-mode requests from this checker with the owning user name.
    pub fn tag_user(&self, name: &str) {
        *self.debug_user.lock() = Some(name.to_string());
    }

    /// Discards all cookies, returning the checker to a logged-out state.
    pub fn reset_cookies(&self) {
        *self.client.lock() = build_client();
    }

    /// Records `err` into the run-wide log and returns it wrapped, unless it
    /// was already recorded by a nested call.
    fn on_error(&self, method: &Method, path: &str, err: BenchError) -> BenchError {
        match err {
            BenchError::Recorded(_) => err,
            BenchError::Check(kind) => {
                let cerr = CheckerError::new(kind, method.clone(), path);
                self.ctx.record_error(cerr.clone());
                BenchError::Recorded(cerr)
            }
        }
    }

    /// Executes one `CheckAction` against the target application.
    ///
    /// Returns `Ok(())` without sending anything when the benchmark window is
    /// already over. Every failure path records exactly one error.
    pub async fn play(
        &self,
        cancel: &CancellationToken,
        mut action: CheckAction<'_>,
    ) -> Result<(), BenchError> {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let _permit = tokio::select! {
            permit = self.tokens.acquire() => match permit {
                Ok(p) => p,
                Err(_) => return Ok(()),
            },
            _ = cancel.cancelled() => return Ok(()),
        };

        let method = action.method.clone();
        let path = action.path.clone();

        let slot = self.ctx.hosts.acquire();
        let url = format!("http://{}{}", slot.host(), path);

        let client = self.client.lock().clone();
        let mut rb = client.request(method.clone(), url.as_str());

        rb = match std::mem::take(&mut action.post) {
            PostBody::Empty => rb,
            PostBody::Form(fields) => rb.form(&fields),
            PostBody::Multipart(form) => rb.multipart(form),
        };

        if action.enable_cache {
            let entry = self
                .ctx
                .public_cache
                .get(&path)
                .or_else(|| self.cache.get(&path));
            if let Some(entry) = entry {
                let mut conditional = HeaderMap::new();
                entry.apply(&mut conditional);
                rb = rb.headers(conditional);
            }
        }

        rb = rb.header(USER_AGENT, CHECKER_USER_AGENT).header(HOST, APP_HOST);
        for (name, value) in &action.headers {
            rb = rb.header(name.as_str(), value.as_str());
        }

        if self.ctx.debug {
            let id = self.ctx.next_request_id();
            rb = rb.header("X-Request-ID", id.to_string());
            let tagged_user = self.debug_user.lock().clone();
            if let Some(user) = tagged_user {
                rb = rb.header("X-Username", user);
            }
            debug!("RT {} {} {}", id, method, url);
        }

        let timeout = if method == Method::POST {
            POST_TIMEOUT
        } else {
            GET_TIMEOUT
        };
        rb = rb.timeout(timeout);

        let watchdog = if action.disable_slow_checking {
            None
        } else {
            let ctx = Arc::clone(&self.ctx);
            let slow_path = path.clone();
            Some(SlowWatchdog(tokio::spawn(async move {
                tokio::time::sleep(SLOW_THRESHOLD).await;
                ctx.mark_slow(&slow_path);
            })))
        };

        let res = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            res = rb.send() => res,
        };
        drop(watchdog);

        let res = match res {
            Ok(res) => res,
            Err(e) if e.is_timeout() => {
                return Err(self.on_error(&method, &path, BenchError::Check(ErrorKind::Timeout)));
            }
            Err(e) => {
                return Err(self.on_error(
                    &method,
                    &path,
                    BenchError::Check(ErrorKind::Transport(e.to_string())),
                ));
            }
        };

        let status = res.status();
        let headers = res.headers().clone();

        let body = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            body = res.bytes() => match body {
                Ok(body) => body,
                Err(e) if e.is_timeout() => {
                    return Err(self.on_error(&method, &path, BenchError::Check(ErrorKind::Timeout)));
                }
                // A 3xx body may already be closed by the time we read it.
                Err(_) => Bytes::new(),
            },
        };

        if status.as_u16() >= 500 {
            return Err(self.on_error(
                &method,
                &path,
                BenchError::Check(ErrorKind::ServerError(status.to_string())),
            ));
        }

        if let Some(expected) = action.expected_status
            && status != expected
        {
            return Err(self.on_error(
                &method,
                &path,
                BenchError::Check(ErrorKind::Mismatch(format!(
                    "response code should be {}, got {}",
                    expected.as_u16(),
                    status.as_u16()
                ))),
            ));
        }

        if let Some(re) = &action.expected_location {
            let locations: Vec<_> = headers.get_all(LOCATION).iter().collect();
            if locations.len() != 1 {
                return Err(self.on_error(
                    &method,
                    &path,
                    BenchError::Check(ErrorKind::Mismatch(
                        "the redirect URL is not set properly".to_string(),
                    )),
                ));
            }
            let raw = locations[0].to_str().unwrap_or("");
            let matched = location_path(raw).is_some_and(|p| re.is_match(&p));
            if !matched {
                return Err(self.on_error(
                    &method,
                    &path,
                    BenchError::Check(ErrorKind::Mismatch(format!(
                        "unexpected redirect target: expected '{}', got '{}'",
                        re, raw
                    ))),
                ));
            }
        }

        if status == StatusCode::OK && action.enable_cache {
            let (entry, _) = UrlCache::from_response(&headers, &body);
            if let Some(entry) = entry {
                let entry = Arc::new(entry);
                self.cache.set(&path, Arc::clone(&entry));
                if entry.cache_control.public {
                    self.ctx.public_cache.set(&path, entry);
                }
            }
        }

        if let Some(check) = action.check.take() {
            let response = CheckResponse {
                status,
                headers,
                body,
            };
            if let Err(err) = check(&response) {
                if action.enable_cache {
                    self.cache.del(&path);
                }
                return Err(self.on_error(&method, &path, err));
            }
        }

        self.ctx.counters.inc(format!("{}|{}", method, path));
        Ok(())
    }
}

/// Extracts the path component of a `Location` value, which may be absolute
/// or relative.
fn location_path(raw: &str) -> Option<String> {
    match url::Url::parse(raw) {
        Ok(u) => Some(u.path().to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let end = raw.find(['?', '#']).unwrap_or(raw.len());
            Some(raw[..end].to_string())
        }
        Err(_) => None,
    }
}
