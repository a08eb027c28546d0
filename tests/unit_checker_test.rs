use axum::Router;
use axum::http::{HeaderMap as StubHeaderMap, StatusCode as StubStatus, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use isubench::core::checker::{CheckAction, Checker, PostBody};
use isubench::core::context::BenchContext;
use isubench::core::errors::{BenchError, CheckerError, ErrorKind};
use regex::Regex;
use reqwest::{Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

async fn asset(headers: StubHeaderMap) -> impl IntoResponse {
    if headers.contains_key(header::IF_NONE_MATCH) {
        StubStatus::NOT_MODIFIED.into_response()
    } else {
        (
            StubStatus::OK,
            [
                (header::CACHE_CONTROL, "public, max-age=60"),
                (header::ETAG, "\"asset-v1\""),
            ],
            "asset-body",
        )
            .into_response()
    }
}

fn app() -> Router {
    Router::new()
        .route("/ping", get(|| async { "pong" }))
        .route("/missing", get(|| async { StubStatus::NOT_FOUND }))
        .route(
            "/redirect",
            get(|| async { (StubStatus::SEE_OTHER, [(header::LOCATION, "/")], "") }),
        )
        .route("/asset", get(asset))
        .route(
            "/slow",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(4)).await;
                StubStatus::NO_CONTENT
            }),
        )
        .route(
            "/sluggish",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(1300)).await;
                "late"
            }),
        )
        .route("/boom", get(|| async { StubStatus::INTERNAL_SERVER_ERROR }))
}

/// Serves the stub application on an ephemeral port and returns a context
/// targeting it.
async fn stub_context() -> Arc<BenchContext> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app()).await.unwrap();
    });
    BenchContext::new(vec![addr.to_string()], false)
}

#[tokio::test]
async fn test_play_success_increments_the_counter() {
    let ctx = stub_context().await;
    let checker = Checker::new(Arc::clone(&ctx));
    let cancel = CancellationToken::new();

    checker
        .play(
            &cancel,
            CheckAction {
                method: Method::GET,
                path: "/ping".to_string(),
                expected_status: Some(StatusCode::OK),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(ctx.counters.get("GET|/ping"), 1);
    assert!(ctx.error_strings().is_empty());
}

#[tokio::test]
async fn test_status_mismatch_is_recorded_once() {
    let ctx = stub_context().await;
    let checker = Checker::new(Arc::clone(&ctx));
    let cancel = CancellationToken::new();

    let err = checker
        .play(
            &cancel,
            CheckAction {
                method: Method::GET,
                path: "/missing".to_string(),
                expected_status: Some(StatusCode::OK),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert!(!err.is_fatal());
    assert_eq!(ctx.error_strings().len(), 1);
    assert_eq!(ctx.counters.get("GET|/missing"), 0);
}

#[tokio::test]
async fn test_cancelled_token_is_a_no_op() {
    let ctx = stub_context().await;
    let checker = Checker::new(Arc::clone(&ctx));
    let cancel = CancellationToken::new();
    cancel.cancel();

    checker
        .play(
            &cancel,
            CheckAction {
                method: Method::GET,
                path: "/ping".to_string(),
                expected_status: Some(StatusCode::OK),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(ctx.counters.get("GET|/ping"), 0);
    assert!(ctx.error_strings().is_empty());
}

#[tokio::test]
async fn test_expected_location_matches_the_redirect() {
    let ctx = stub_context().await;
    let checker = Checker::new(Arc::clone(&ctx));
    let cancel = CancellationToken::new();

    checker
        .play(
            &cancel,
            CheckAction {
                method: Method::GET,
                path: "/redirect".to_string(),
                expected_location: Some(Regex::new(r"^/$").unwrap()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let err = checker
        .play(
            &cancel,
            CheckAction {
                method: Method::GET,
                path: "/redirect".to_string(),
                expected_location: Some(Regex::new(r"^/login$").unwrap()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn test_conditional_get_round_trip() {
    let ctx = stub_context().await;
    let checker = Checker::new(Arc::clone(&ctx));
    let cancel = CancellationToken::new();

    let mut statuses = Vec::new();
    for _ in 0..2 {
        let seen = &mut statuses;
        checker
            .play(
                &cancel,
                CheckAction {
                    enable_cache: true,
                    method: Method::GET,
                    path: "/asset".to_string(),
                    check: Some(Box::new(move |res: &isubench::core::checker::CheckResponse| {
                        seen.push(res.status.as_u16());
                        Ok(())
                    })),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    assert_eq!(statuses, vec![200, 304]);
    assert!(checker.cache.get("/asset").is_some());
    // The directive was public, so the shared tier holds it as well.
    assert!(ctx.public_cache.get("/asset").is_some());
    assert_eq!(ctx.counters.get("GET|/asset"), 2);
}

#[tokio::test]
async fn test_server_errors_are_ordinary_failures() {
    let ctx = stub_context().await;
    let checker = Checker::new(Arc::clone(&ctx));
    let cancel = CancellationToken::new();

    let err = checker
        .play(
            &cancel,
            CheckAction {
                method: Method::GET,
                path: "/boom".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert!(!err.is_fatal());
    assert!(err.to_string().contains("server error"));
    assert_eq!(ctx.counters.get("GET|/boom"), 0);
}

#[tokio::test]
async fn test_post_deadline_is_classified_as_timeout() {
    let ctx = stub_context().await;
    let checker = Checker::new(Arc::clone(&ctx));
    let cancel = CancellationToken::new();

    let err = checker
        .play(
            &cancel,
            CheckAction {
                method: Method::POST,
                path: "/slow".to_string(),
                post: PostBody::Form(vec![("k".to_string(), "v".to_string())]),
                expected_status: Some(StatusCode::NO_CONTENT),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(ctx.error_strings().len(), 1);
}

#[tokio::test]
async fn test_slow_responses_set_the_slow_path_marker() {
    let ctx = stub_context().await;
    let checker = Checker::new(Arc::clone(&ctx));
    let cancel = CancellationToken::new();

    assert!(ctx.last_slow_path().is_none());
    checker
        .play(
            &cancel,
            CheckAction {
                method: Method::GET,
                path: "/sluggish".to_string(),
                expected_status: Some(StatusCode::OK),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let (path, _) = ctx.last_slow_path().expect("the watchdog should have fired");
    assert_eq!(path, "/sluggish");
}

#[tokio::test]
async fn test_disable_slow_checking_suppresses_the_marker() {
    let ctx = stub_context().await;
    let checker = Checker::new(Arc::clone(&ctx));
    let cancel = CancellationToken::new();

    checker
        .play(
            &cancel,
            CheckAction {
                disable_slow_checking: true,
                method: Method::GET,
                path: "/sluggish".to_string(),
                expected_status: Some(StatusCode::OK),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(ctx.last_slow_path().is_none());
}

#[tokio::test]
async fn test_error_guard_drops_new_errors() {
    let ctx = stub_context().await;
    let checker = Checker::new(Arc::clone(&ctx));
    let cancel = CancellationToken::new();

    ctx.guard_errors(true);
    let err = checker
        .play(
            &cancel,
            CheckAction {
                method: Method::GET,
                path: "/missing".to_string(),
                expected_status: Some(StatusCode::OK),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert!(!err.is_fatal());
    assert!(ctx.error_strings().is_empty());
}

#[tokio::test]
async fn test_already_recorded_errors_are_not_recorded_again() {
    let ctx = stub_context().await;
    let checker = Checker::new(Arc::clone(&ctx));
    let cancel = CancellationToken::new();

    let nested = CheckerError::new(
        ErrorKind::Mismatch("layered failure".to_string()),
        Method::GET,
        "/nested?x=1",
    );
    let err = checker
        .play(
            &cancel,
            CheckAction {
                method: Method::GET,
                path: "/ping".to_string(),
                check: Some(Box::new(move |_| Err(BenchError::Recorded(nested)))),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, BenchError::Recorded(_)));
    // The wrapped error claims to be recorded already, so the log must not
    // grow a second copy.
    assert!(ctx.error_strings().is_empty());
}

#[tokio::test]
async fn test_failing_check_invalidates_the_private_cache_entry() {
    let ctx = stub_context().await;
    let checker = Checker::new(Arc::clone(&ctx));
    let cancel = CancellationToken::new();

    checker
        .play(
            &cancel,
            CheckAction {
                enable_cache: true,
                method: Method::GET,
                path: "/asset".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(checker.cache.get("/asset").is_some());

    let _ = checker
        .play(
            &cancel,
            CheckAction {
                enable_cache: true,
                method: Method::GET,
                path: "/asset".to_string(),
                check: Some(Box::new(|_| {
                    Err(BenchError::Check(ErrorKind::Mismatch(
                        "forced failure".to_string(),
                    )))
                })),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert!(checker.cache.get("/asset").is_none());
}
