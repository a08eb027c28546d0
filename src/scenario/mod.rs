// src/scenario/mod.rs

//! The scenario catalogue: high-level user flows composed from checker
//! calls, plus the helpers they share.

mod load;
mod message;
mod validation;

pub use load::{
    load_get_channel, load_get_history, load_profile, load_read_only_user, load_read_write_user,
    load_register,
};
pub use message::check_message_scenario;
pub use validation::{
    PageFollowMode, check_fetch_register_and_login, check_fetch_unread_count,
    check_get_add_channel, check_get_channel, check_get_history, check_get_profile_fail,
    check_login, check_not_logged_in_user, check_post_add_channel, check_post_add_channel_fail,
    check_register_profile, check_static_files, validate_history_pagination,
};

use crate::core::checker::{CheckAction, CheckFn, CheckResponse, Checker};
use crate::core::dataset::AppUser;
use crate::core::errors::{BenchError, fatal, mismatch};
use crate::core::staticfile::STATIC_FILES;
use crate::core::world::{JsonMessage, JsonUnreadInfo, World};
use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Method, StatusCode};
use scraper::{Html, Selector};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub(crate) static LOGIN_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/login$").expect("static regex"));

/// Parses a CSS selector literal.
pub(crate) fn sel(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

/// Parses the buffered response body as an HTML document.
pub(crate) fn html_document(res: &CheckResponse) -> Html {
    Html::parse_document(&String::from_utf8_lossy(&res.body))
}

/// Accepts the 302/303 responses the application answers form posts with.
pub(crate) fn check_redirect(res: &CheckResponse) -> Result<(), BenchError> {
    if res.status == StatusCode::FOUND || res.status == StatusCode::SEE_OTHER {
        return Ok(());
    }
    Err(mismatch(format!(
        "unexpected status code {}, expected 302 or 303",
        res.status.as_u16()
    )))
}

/// Login form fields for `user`.
pub(crate) fn credentials(user: &AppUser) -> Vec<(String, String)> {
    vec![
        ("name".to_string(), user.name.clone()),
        ("password".to_string(), user.password.clone()),
    ]
}

pub(crate) async fn post_login(
    cancel: &CancellationToken,
    checker: &Checker,
    user: &AppUser,
) -> Result<(), BenchError> {
    checker
        .play(
            cancel,
            CheckAction {
                method: Method::POST,
                path: "/login".to_string(),
                post: crate::core::checker::PostBody::Form(credentials(user)),
                check: Some(Box::new(check_redirect)),
                description: "an existing user can log in",
                ..Default::default()
            },
        )
        .await
}

/// Builds the multipart body of a `POST /profile`.
pub(crate) fn profile_form(
    display_name: Option<&str>,
    avatar: Option<(&str, Bytes)>,
) -> reqwest::multipart::Form {
    let mut form = reqwest::multipart::Form::new();
    if let Some((file_name, bytes)) = avatar {
        form = form.part(
            "avatar_icon",
            reqwest::multipart::Part::bytes(bytes.to_vec()).file_name(file_name.to_string()),
        );
    }
    if let Some(name) = display_name {
        form = form.text("display_name", name.to_string());
    }
    form
}

/// A check verifying a 200 body against a known image digest.
pub(crate) fn check_avatar_image(expected_md5: String) -> CheckFn<'static> {
    Box::new(move |res: &CheckResponse| {
        let hash = format!("{:x}", md5::compute(&res.body));
        if hash != expected_md5 {
            return Err(fatal("avatar image bytes are wrong"));
        }
        Ok(())
    })
}

/// Fetches one static asset through the URL cache, counting fresh and
/// conditional outcomes separately.
pub(crate) async fn load_static_file(
    cancel: &CancellationToken,
    checker: &Checker,
    path: String,
) -> Result<(), BenchError> {
    let ctx = Arc::clone(checker.context());
    checker
        .play(
            cancel,
            CheckAction {
                enable_cache: true,
                skip_if_cache_available: true,
                method: Method::GET,
                path,
                description: "a static file can be fetched",
                check: Some(Box::new(move |res: &CheckResponse| {
                    if res.status == StatusCode::OK {
                        ctx.counters.inc("staticfile-200");
                    } else if res.status == StatusCode::NOT_MODIFIED {
                        ctx.counters.inc("staticfile-304");
                    } else {
                        return Err(mismatch(format!(
                            "unexpected status code {}",
                            res.status.as_u16()
                        )));
                    }
                    Ok(())
                })),
                ..Default::default()
            },
        )
        .await
}

/// Fire-and-forget loads of the given paths; errors are recorded by the
/// checker but never affect the spawning scenario.
pub(crate) fn spawn_static_files(
    cancel: &CancellationToken,
    checker: &Arc<Checker>,
    paths: impl IntoIterator<Item = String>,
) {
    for path in paths {
        let cancel = cancel.clone();
        let checker = Arc::clone(checker);
        tokio::spawn(async move {
            let _ = load_static_file(&cancel, &checker, path).await;
        });
    }
}

/// Preloads the whole static asset manifest, browser-style.
pub(crate) fn spawn_asset_load(cancel: &CancellationToken, checker: &Arc<Checker>) {
    spawn_static_files(
        cancel,
        checker,
        STATIC_FILES.iter().map(|sf| sf.path.to_string()),
    );
}

/// Validates a `GET /message` response list: bounded length, strictly
/// increasing ids beyond the requested watermark, and every entry known to
/// the world.
pub(crate) fn validate_message_list(
    world: &World,
    channel_id: i64,
    last_message_id: i64,
    msgs: &[JsonMessage],
) -> Result<(), BenchError> {
    if msgs.is_empty() {
        return Ok(());
    }
    if msgs.len() > 100 {
        return Err(fatal("too many messages in the response"));
    }
    if last_message_id >= msgs[0].id {
        return Err(fatal("messages are out of order"));
    }
    for pair in msgs.windows(2) {
        if pair[0].id >= pair[1].id {
            return Err(fatal("messages are out of order"));
        }
    }
    for msg in msgs {
        if let Err(e) = world.validate_json_message(channel_id, msg) {
            return Err(fatal(format!("message validation failed: {e}")));
        }
    }
    Ok(())
}

/// Plays `GET /message` and returns the decoded, validated list. `None`
/// means the benchmark window closed before the request ran.
pub(crate) async fn play_get_message(
    cancel: &CancellationToken,
    world: &Arc<World>,
    checker: &Checker,
    channel_id: i64,
    last_message_id: i64,
) -> Result<Option<Vec<JsonMessage>>, BenchError> {
    let mut fetched: Option<Vec<JsonMessage>> = None;
    {
        let world = Arc::clone(world);
        let fetched = &mut fetched;
        checker
            .play(
                cancel,
                CheckAction {
                    method: Method::GET,
                    path: format!(
                        "/message?channel_id={channel_id}&last_message_id={last_message_id}"
                    ),
                    expected_status: Some(StatusCode::OK),
                    description: "messages can be fetched",
                    check: Some(Box::new(move |res: &CheckResponse| {
                        let msgs: Vec<JsonMessage> = serde_json::from_slice(&res.body)
                            .map_err(|e| fatal(format!("failed to decode the message list: {e}")))?;
                        validate_message_list(&world, channel_id, last_message_id, &msgs)?;
                        *fetched = Some(msgs);
                        Ok(())
                    })),
                    ..Default::default()
                },
            )
            .await?;
    }
    Ok(fetched)
}

/// Plays `GET /fetch` and returns the decoded unread list. `None` means the
/// benchmark window closed before the request ran. `/fetch` long-polls, so
/// it is exempt from slow-path accounting.
pub(crate) async fn play_fetch(
    cancel: &CancellationToken,
    checker: &Checker,
) -> Result<Option<Vec<JsonUnreadInfo>>, BenchError> {
    let mut fetched: Option<Vec<JsonUnreadInfo>> = None;
    {
        let fetched = &mut fetched;
        checker
            .play(
                cancel,
                CheckAction {
                    disable_slow_checking: true,
                    method: Method::GET,
                    path: "/fetch".to_string(),
                    expected_status: Some(StatusCode::OK),
                    description: "unread notifications can be fetched",
                    check: Some(Box::new(move |res: &CheckResponse| {
                        let unreads: Vec<JsonUnreadInfo> = serde_json::from_slice(&res.body)
                            .map_err(|e| fatal(format!("failed to decode the unread list: {e}")))?;
                        *fetched = Some(unreads);
                        Ok(())
                    })),
                    ..Default::default()
                },
            )
            .await?;
    }
    Ok(fetched)
}

/// Distinct avatar icon paths referenced by a message list.
pub(crate) fn avatar_paths(msgs: &[JsonMessage]) -> std::collections::HashSet<String> {
    msgs.iter()
        .map(|m| format!("/icons/{}", m.user.avatar_icon))
        .collect()
}
