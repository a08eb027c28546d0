// src/scenario/load.rs

//! Load scenarios: the flows the benchmark hammers continuously during the
//! load window.

use super::{
    avatar_paths, check_redirect, html_document, play_fetch, play_get_message, post_login,
    profile_form, sel, spawn_asset_load, spawn_static_files,
};
use crate::core::checker::{CheckAction, CheckResponse, Checker, PostBody};
use crate::core::errors::{BenchError, fatal};
use crate::core::world::World;
use rand::Rng;
use rand::seq::SliceRandom;
use reqwest::{Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Fetches the next batch of messages for a channel, advancing the caller's
/// watermark and preloading the referenced avatars.
async fn get_new_messages(
    cancel: &CancellationToken,
    world: &Arc<World>,
    checker: &Arc<Checker>,
    channel_id: i64,
    last_message_id: &mut i64,
) -> Result<(), BenchError> {
    let msgs = play_get_message(cancel, world, checker, channel_id, *last_message_id).await?;
    let Some(msgs) = msgs else { return Ok(()) };

    if let Some(last) = msgs.last() {
        *last_message_id = last.id;
        world
            .context()
            .counters
            .add("get-message-count", msgs.len() as i64);
    }
    spawn_static_files(cancel, checker, avatar_paths(&msgs));
    Ok(())
}

/// Registers a fresh user, logs it in, uploads a profile, and releases it
/// into the active pool.
pub async fn load_register(
    cancel: &CancellationToken,
    world: &Arc<World>,
) -> Result<(), BenchError> {
    let Some((user, checker)) = world.pop_new_user() else {
        return Ok(());
    };

    checker
        .play(
            cancel,
            CheckAction {
                method: Method::POST,
                path: "/register".to_string(),
                post: PostBody::Form(super::credentials(&user)),
                check: Some(Box::new(check_redirect)),
                description: "a new user can register",
                ..Default::default()
            },
        )
        .await?;

    post_login(cancel, &checker, &user).await?;

    let avatar = {
        let avatars = &world.dataset().avatars;
        Arc::clone(&avatars[rand::thread_rng().gen_range(0..avatars.len())])
    };
    *user.avatar.lock() = Some(Arc::clone(&avatar));

    checker
        .play(
            cancel,
            CheckAction {
                method: Method::POST,
                path: "/profile".to_string(),
                post: PostBody::Multipart(profile_form(
                    Some(&user.display_name),
                    Some((&avatar.file_name, avatar.bytes.clone())),
                )),
                check: Some(Box::new(check_redirect)),
                description: "the profile can be updated",
                ..Default::default()
            },
        )
        .await?;

    // Only a fully registered user joins the existing pool.
    world.push_user(user);
    Ok(())
}

/// Views a profile page while logged in, then logs out.
pub async fn load_profile(
    cancel: &CancellationToken,
    world: &Arc<World>,
) -> Result<(), BenchError> {
    let Some((user, checker)) = world.pop_random_user() else {
        return Ok(());
    };

    let result = async {
        post_login(cancel, &checker, &user).await?;

        checker
            .play(
                cancel,
                CheckAction {
                    method: Method::GET,
                    path: format!("/profile/{}", user.name),
                    expected_status: Some(StatusCode::OK),
                    description: "the profile page renders",
                    ..Default::default()
                },
            )
            .await?;

        checker
            .play(
                cancel,
                CheckAction {
                    method: Method::GET,
                    path: "/logout".to_string(),
                    check: Some(Box::new(check_redirect)),
                    description: "logging out redirects",
                    ..Default::default()
                },
            )
            .await
    }
    .await;

    world.push_user(user);
    result
}

/// Opens a channel like a browser would: page, static assets, first message
/// batch, avatar preloads.
pub async fn load_get_channel(
    cancel: &CancellationToken,
    world: &Arc<World>,
) -> Result<(), BenchError> {
    let channel_id = world.random_channel_id();
    let Some((user, checker)) = world.pop_random_user() else {
        return Ok(());
    };

    let result = async {
        post_login(cancel, &checker, &user).await?;

        checker
            .play(
                cancel,
                CheckAction {
                    method: Method::GET,
                    path: format!("/channel/{channel_id}"),
                    expected_status: Some(StatusCode::OK),
                    description: "the channel page renders",
                    ..Default::default()
                },
            )
            .await?;

        spawn_asset_load(cancel, &checker);

        let mut last_message_id = 0;
        get_new_messages(cancel, world, &checker, channel_id, &mut last_message_id).await
    }
    .await;

    world.push_user(user);
    result
}

/// Browses the chat log: the landing page plus a handful of random pages.
pub async fn load_get_history(
    cancel: &CancellationToken,
    world: &Arc<World>,
) -> Result<(), BenchError> {
    let max_follow = 3 + rand::thread_rng().gen_range(1..4);
    let channel_id = world.random_channel_id();
    let Some((user, checker)) = world.pop_random_user() else {
        return Ok(());
    };

    let result = async {
        post_login(cancel, &checker, &user).await?;

        let mut max_page = 1i64;
        {
            let max_page = &mut max_page;
            checker
                .play(
                    cancel,
                    CheckAction {
                        method: Method::GET,
                        path: format!("/history/{channel_id}"),
                        expected_status: Some(StatusCode::OK),
                        description: "the chat log renders",
                        check: Some(Box::new(move |res: &CheckResponse| {
                            let doc = html_document(res);
                            for li in doc.select(&sel(".pagination li")) {
                                let text = li.text().collect::<String>();
                                let text = text.trim();
                                match text.parse::<i64>() {
                                    Ok(n) => {
                                        if n != 1 && n != *max_page + 1 {
                                            return Err(fatal(
                                                "pagination numbers are not contiguous",
                                            ));
                                        }
                                        *max_page = n;
                                    }
                                    Err(_) => {
                                        if text != "«" && text != "»" {
                                            return Err(fatal(
                                                "pagination contains a non-numeric label",
                                            ));
                                        }
                                    }
                                }
                            }
                            Ok(())
                        })),
                        ..Default::default()
                    },
                )
                .await?;
        }

        let mut pages: Vec<i64> = (1..=max_page).collect();
        pages.shuffle(&mut rand::thread_rng());
        pages.truncate(max_follow);

        for page in pages {
            let mut avatars: Vec<String> = Vec::new();
            {
                let avatars = &mut avatars;
                checker
                    .play(
                        cancel,
                        CheckAction {
                            method: Method::GET,
                            path: format!("/history/{channel_id}?page={page}"),
                            expected_status: Some(StatusCode::OK),
                            description: "the chat log renders",
                            check: Some(Box::new(move |res: &CheckResponse| {
                                let doc = html_document(res);

                                let mut seen = 1i64;
                                for li in doc.select(&sel(".pagination li")) {
                                    let text = li.text().collect::<String>();
                                    let text = text.trim();
                                    match text.parse::<i64>() {
                                        Ok(n) => {
                                            if n != 1 && n != seen + 1 {
                                                return Err(fatal(
                                                    "pagination numbers are not contiguous",
                                                ));
                                            }
                                            seen = n;
                                        }
                                        Err(_) => {
                                            if text != "«" && text != "»" {
                                                return Err(fatal(
                                                    "pagination contains a non-numeric label",
                                                ));
                                            }
                                        }
                                    }
                                }

                                let mut paths = std::collections::HashSet::new();
                                for message in doc.select(&sel(".message")) {
                                    let avatar_src = message
                                        .select(&sel(".avatar"))
                                        .next()
                                        .and_then(|el| el.value().attr("src"));
                                    let Some(avatar_src) = avatar_src else {
                                        return Err(fatal("a message is missing its avatar path"));
                                    };
                                    let author = message
                                        .select(&sel("h5"))
                                        .next()
                                        .map(|el| el.text().collect::<String>())
                                        .unwrap_or_default();
                                    if author.is_empty() {
                                        return Err(fatal("a message is missing its author"));
                                    }
                                    let date = message
                                        .select(&sel(".message-date"))
                                        .next()
                                        .map(|el| el.text().collect::<String>())
                                        .unwrap_or_default();
                                    if date.is_empty() {
                                        return Err(fatal("a message is missing its date"));
                                    }
                                    paths.insert(avatar_src.to_string());
                                }
                                avatars.extend(paths);
                                Ok(())
                            })),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
            spawn_static_files(cancel, &checker, avatars);
        }

        Ok(())
    }
    .await;

    world.push_user(user);
    result
}

/// A resident of one channel that both posts on a 500 ms cadence and polls
/// `/fetch`, re-reading the channel whenever unread messages appear. Runs
/// until the benchmark window closes.
pub async fn load_read_write_user(
    cancel: &CancellationToken,
    world: &Arc<World>,
    channel_id: i64,
) -> Result<(), BenchError> {
    let Some((user, checker)) = world.pop_random_user() else {
        return Ok(());
    };

    let result = read_write_loop(cancel, world, &user, &checker, channel_id).await;
    world.push_user(user);
    result
}

async fn read_write_loop(
    cancel: &CancellationToken,
    world: &Arc<World>,
    user: &crate::core::dataset::AppUser,
    checker: &Arc<Checker>,
    channel_id: i64,
) -> Result<(), BenchError> {
    post_login(cancel, checker, user).await?;

    checker
        .play(
            cancel,
            CheckAction {
                method: Method::GET,
                path: format!("/channel/{channel_id}"),
                expected_status: Some(StatusCode::OK),
                description: "the channel page renders",
                ..Default::default()
            },
        )
        .await?;

    spawn_asset_load(cancel, checker);

    let mut last_message_id = 0;
    get_new_messages(cancel, world, checker, channel_id, &mut last_message_id).await?;

    // Desynchronize the write tickers across workers.
    let jitter = rand::thread_rng().gen_range(0..1000);
    tokio::time::sleep(Duration::from_micros(jitter)).await;

    let writer = async {
        let mut tick = tokio::time::interval(Duration::from_millis(500));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok::<(), BenchError>(()),
                _ = tick.tick() => {}
            }

            let text = world.dataset().random_text();
            let Some(reservation) = world.add_send_message(channel_id, &user.name, &text) else {
                continue;
            };

            checker
                .play(
                    cancel,
                    CheckAction {
                        method: Method::POST,
                        path: "/message".to_string(),
                        expected_status: Some(StatusCode::NO_CONTENT),
                        post: PostBody::Form(vec![
                            ("channel_id".to_string(), channel_id.to_string()),
                            ("message".to_string(), text),
                        ]),
                        description: "a message can be posted",
                        ..Default::default()
                    },
                )
                .await?;
            reservation.complete();
        }
    };

    let poller = async {
        let mut last_message_id = last_message_id;
        loop {
            if cancel.is_cancelled() {
                return Ok::<(), BenchError>(());
            }
            let Some(unreads) = play_fetch(cancel, checker).await? else {
                continue;
            };
            if unreads
                .iter()
                .any(|u| u.channel_id == channel_id && u.unread > 0)
            {
                get_new_messages(cancel, world, checker, channel_id, &mut last_message_id).await?;
            }
        }
    };

    tokio::try_join!(writer, poller)?;
    Ok(())
}

/// Like the read-write resident, without the posting half.
pub async fn load_read_only_user(
    cancel: &CancellationToken,
    world: &Arc<World>,
    channel_id: i64,
) -> Result<(), BenchError> {
    let Some((user, checker)) = world.pop_random_user() else {
        return Ok(());
    };

    let result = async {
        post_login(cancel, &checker, &user).await?;

        checker
            .play(
                cancel,
                CheckAction {
                    method: Method::GET,
                    path: format!("/channel/{channel_id}"),
                    expected_status: Some(StatusCode::OK),
                    description: "the channel page renders",
                    ..Default::default()
                },
            )
            .await?;

        spawn_asset_load(cancel, &checker);

        let mut last_message_id = 0;
        get_new_messages(cancel, world, &checker, channel_id, &mut last_message_id).await?;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let Some(unreads) = play_fetch(cancel, &checker).await? else {
                continue;
            };
            if unreads
                .iter()
                .any(|u| u.channel_id == channel_id && u.unread > 0)
            {
                get_new_messages(cancel, world, &checker, channel_id, &mut last_message_id)
                    .await?;
            }
        }
    }
    .await;

    world.push_user(user);
    result
}
