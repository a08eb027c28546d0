// tests/integration_test.rs

//! Scenario round-trips against a stub of the target application.

use axum::Router;
use axum::http::{StatusCode as StubStatus, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use bytes::Bytes;
use isubench::core::context::BenchContext;
use isubench::core::dataset::{AppUser, Avatar, Channel, DataSet, SeedMessage};
use isubench::core::world::World;
use isubench::scenario;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn avatar() -> Arc<Avatar> {
    Arc::new(Avatar {
        file_name: "a.png".to_string(),
        sha1: "0000000000000000000000000000000000000000".to_string(),
        md5: format!("{:x}", md5::compute(b"png-bytes")),
        bytes: Bytes::from_static(b"png-bytes"),
    })
}

fn user(name: &str) -> Arc<AppUser> {
    Arc::new(AppUser {
        name: name.to_string(),
        password: format!("{name}{}", name.chars().rev().collect::<String>()),
        display_name: format!("{name} display"),
        avatar: Mutex::new(Some(avatar())),
    })
}

fn dataset(users: Vec<Arc<AppUser>>, new_users: Vec<Arc<AppUser>>, messages: Vec<SeedMessage>) -> Arc<DataSet> {
    Arc::new(DataSet {
        users,
        new_users,
        channels: (1..=10)
            .map(|i| {
                Arc::new(Channel {
                    id: i,
                    name: format!("channel{i}"),
                    description: format!("this is channel{i}"),
                })
            })
            .collect(),
        avatars: vec![avatar()],
        large_avatars: vec![avatar()],
        default_avatar: avatar(),
        texts: vec!["hello".to_string(), "world".to_string()],
        messages,
    })
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr.to_string()
}

fn see_other() -> axum::response::Response {
    (StubStatus::SEE_OTHER, [(header::LOCATION, "/")], "").into_response()
}

async fn redirect_home() -> axum::response::Response {
    see_other()
}

#[tokio::test]
async fn test_load_register_drives_the_whole_flow() {
    let app = Router::new()
        .route("/register", post(redirect_home))
        .route("/login", post(redirect_home))
        .route("/profile", post(redirect_home));
    let addr = serve(app).await;

    let ctx = BenchContext::new(vec![addr], false);
    let world = World::new(Arc::clone(&ctx), dataset(vec![], vec![user("alice")], vec![])).unwrap();
    let cancel = CancellationToken::new();

    scenario::load_register(&cancel, &world).await.unwrap();

    assert_eq!(ctx.counters.get("POST|/register"), 1);
    assert_eq!(ctx.counters.get("POST|/login"), 1);
    assert_eq!(ctx.counters.get("POST|/profile"), 1);
    assert!(ctx.error_strings().is_empty());

    // The registered user has joined the existing pool.
    let (popped, _) = world.pop_random_user().expect("user should be back");
    assert_eq!(popped.name, "alice");
}

#[tokio::test]
async fn test_load_register_stops_on_a_failing_step() {
    let app = Router::new()
        .route("/register", post(redirect_home))
        .route("/login", post(|| async { StubStatus::FORBIDDEN }));
    let addr = serve(app).await;

    let ctx = BenchContext::new(vec![addr], false);
    let world = World::new(Arc::clone(&ctx), dataset(vec![], vec![user("alice")], vec![])).unwrap();
    let cancel = CancellationToken::new();

    let err = scenario::load_register(&cancel, &world).await.unwrap_err();
    assert!(!err.is_fatal());
    assert_eq!(ctx.counters.get("POST|/register"), 1);
    assert_eq!(ctx.counters.get("POST|/profile"), 0);
    // A user that never finished registration does not rejoin the pool.
    assert!(world.pop_random_user().is_none());
}

#[tokio::test]
async fn test_check_static_files_flags_corrupt_content() {
    let app = Router::new().fallback(|| async { "junk bytes" });
    let addr = serve(app).await;

    let ctx = BenchContext::new(vec![addr], false);
    let world = World::new(Arc::clone(&ctx), dataset(vec![user("bob")], vec![], vec![])).unwrap();
    let cancel = CancellationToken::new();

    let err = scenario::check_static_files(&cancel, &world)
        .await
        .unwrap_err();
    assert!(err.is_fatal());
    // The popped user is back even after a failure.
    assert!(world.pop_random_user().is_some());
}

#[tokio::test]
async fn test_fetch_unread_count_accepts_values_inside_the_window() {
    // Ten settled messages plus two in-flight ones: the window is [10, 12].
    let seeded: Vec<SeedMessage> = (0..10)
        .map(|i| SeedMessage {
            channel_id: 7,
            user_name: "bob".to_string(),
            content: format!("seed {i}"),
        })
        .collect();

    let app = Router::new()
        .route("/register", post(redirect_home))
        .route("/login", post(redirect_home))
        .route(
            "/fetch",
            get(|| async { axum::Json(serde_json::json!([{ "channel_id": 7, "unread": 11 }])) }),
        );
    let addr = serve(app).await;

    let ctx = BenchContext::new(vec![addr], false);
    let world = World::new(
        Arc::clone(&ctx),
        dataset(vec![user("bob")], vec![user("carol")], seeded),
    )
    .unwrap();
    let cancel = CancellationToken::new();

    let _r1 = world.add_send_message(7, "bob", "in flight one").unwrap();
    let _r2 = world.add_send_message(7, "bob", "in flight two").unwrap();

    scenario::check_fetch_register_and_login(&cancel, &world)
        .await
        .unwrap();
    scenario::check_fetch_unread_count(&cancel, &world)
        .await
        .unwrap();
    assert!(ctx.error_strings().is_empty());
}

#[tokio::test]
async fn test_fetch_unread_count_rejects_values_outside_the_window() {
    let seeded: Vec<SeedMessage> = (0..10)
        .map(|i| SeedMessage {
            channel_id: 7,
            user_name: "bob".to_string(),
            content: format!("seed {i}"),
        })
        .collect();

    let app = Router::new()
        .route("/register", post(redirect_home))
        .route("/login", post(redirect_home))
        .route(
            "/fetch",
            get(|| async { axum::Json(serde_json::json!([{ "channel_id": 7, "unread": 13 }])) }),
        );
    let addr = serve(app).await;

    let ctx = BenchContext::new(vec![addr], false);
    let world = World::new(
        Arc::clone(&ctx),
        dataset(vec![user("bob")], vec![user("carol")], seeded),
    )
    .unwrap();
    let cancel = CancellationToken::new();

    let _r1 = world.add_send_message(7, "bob", "in flight one").unwrap();
    let _r2 = world.add_send_message(7, "bob", "in flight two").unwrap();

    scenario::check_fetch_register_and_login(&cancel, &world)
        .await
        .unwrap();
    let err = scenario::check_fetch_unread_count(&cancel, &world)
        .await
        .unwrap_err();
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_check_login_round_trip() {
    let app = Router::new()
        .route(
            "/login",
            post(|body: String| async move {
                // Unknown users are turned away.
                if body.contains("name=bob") {
                    see_other()
                } else {
                    StubStatus::FORBIDDEN.into_response()
                }
            }),
        )
        .route("/logout", get(redirect_home));
    let addr = serve(app).await;

    let ctx = BenchContext::new(vec![addr], false);
    let world = World::new(Arc::clone(&ctx), dataset(vec![user("bob")], vec![], vec![])).unwrap();
    let cancel = CancellationToken::new();

    scenario::check_login(&cancel, &world).await.unwrap();
    assert!(ctx.error_strings().is_empty());
    assert_eq!(ctx.counters.get("POST|/login"), 2);
    assert_eq!(ctx.counters.get("GET|/logout"), 1);
}
