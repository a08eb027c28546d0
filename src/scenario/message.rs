// src/scenario/message.rs

//! The three-user message-visibility scenario: the strictest correctness
//! probe. Three users observe a reserved channel concurrently, one posts,
//! and all three must see exactly that one message arrive everywhere the
//! application surfaces it.

use super::{
    html_document, post_login, sel, validate_message_list,
    validation::validate_history_pagination,
};
use crate::core::checker::{CheckAction, CheckResponse, Checker, PostBody};
use crate::core::dataset::AppUser;
use crate::core::errors::{BenchError, fatal, mismatch};
use crate::core::world::{JsonMessage, JsonUnreadInfo, World};
use reqwest::{Method, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type MessageCheck = Box<dyn FnOnce(&[JsonMessage]) -> Result<(), BenchError> + Send>;
type FetchCheck = Box<dyn FnOnce(&[JsonUnreadInfo]) -> Result<(), BenchError> + Send>;

async fn get_channel_page(
    cancel: &CancellationToken,
    checker: &Checker,
    channel_id: i64,
) -> Result<(), BenchError> {
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
        .await
}

/// Plays `GET /message`, validates the batch, runs an optional extra check,
/// and returns the advanced watermark.
async fn get_messages_with(
    cancel: &CancellationToken,
    world: &Arc<World>,
    checker: &Checker,
    channel_id: i64,
    last_message_id: i64,
    extra: Option<MessageCheck>,
) -> Result<i64, BenchError> {
    let mut new_last = last_message_id;
    {
        let new_last = &mut new_last;
        let world_ref = Arc::clone(world);
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
                        validate_message_list(&world_ref, channel_id, last_message_id, &msgs)?;

                        if let Some(extra) = extra {
                            extra(&msgs)?;
                        }

                        if let Some(last) = msgs.last() {
                            *new_last = last.id;
                            world_ref
                                .context()
                                .counters
                                .add("get-message-count", msgs.len() as i64);
                        }
                        Ok(())
                    })),
                    ..Default::default()
                },
            )
            .await?;
    }
    Ok(new_last)
}

/// Plays `GET /fetch`, runs an optional extra check, and returns the unread
/// counts keyed by channel.
async fn get_fetch_map(
    cancel: &CancellationToken,
    checker: &Checker,
    extra: Option<FetchCheck>,
) -> Result<HashMap<i64, i64>, BenchError> {
    let mut map = HashMap::new();
    {
        let map = &mut map;
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

                        if let Some(extra) = extra {
                            extra(&unreads)?;
                        }

                        for entry in &unreads {
                            map.insert(entry.channel_id, entry.unread);
                        }
                        Ok(())
                    })),
                    ..Default::default()
                },
            )
            .await?;
    }
    Ok(map)
}

/// Reserves a unique text and posts it, completing the reservation once the
/// 204 is observed.
async fn post_message(
    cancel: &CancellationToken,
    world: &Arc<World>,
    user: &AppUser,
    checker: &Checker,
    channel_id: i64,
) -> Result<String, BenchError> {
    let (text, reservation) = loop {
        let text = world.dataset().random_text();
        if let Some(reservation) = world.add_send_message(channel_id, &user.name, &text) {
            break (text, reservation);
        }
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
                    ("message".to_string(), text.clone()),
                ]),
                description: "a message can be posted",
                ..Default::default()
            },
        )
        .await?;

    reservation.complete();
    Ok(text)
}

/// Asserts that the posted text arrived as the newest message, correctly
/// attributed.
fn sent_message_check(sent_text: String, author: &AppUser) -> MessageCheck {
    let author_name = author.name.clone();
    let author_display = author.display_name.clone();
    Box::new(move |msgs: &[JsonMessage]| {
        if !msgs.iter().any(|m| m.content == sent_text) {
            return Err(fatal("the posted message cannot be fetched"));
        }
        let Some(last) = msgs.last() else {
            return Err(fatal("the posted message cannot be fetched"));
        };
        if last.content != sent_text {
            return Err(fatal("messages are out of order"));
        }
        if last.user.name != author_name {
            return Err(fatal("the message carries the wrong user name"));
        }
        if last.user.display_name != author_display {
            return Err(fatal("the message carries the wrong display name"));
        }
        Ok(())
    })
}

pub async fn check_message_scenario(
    cancel: &CancellationToken,
    world: &Arc<World>,
) -> Result<(), BenchError> {
    let Some((user1, checker1)) = world.pop_random_user() else {
        return Ok(());
    };
    let Some((user2, checker2)) = world.pop_random_user() else {
        world.push_user(user1);
        return Ok(());
    };
    let Some((user3, checker3)) = world.pop_random_user() else {
        world.push_user(user1);
        world.push_user(user2);
        return Ok(());
    };

    let channel_id = world.msg_check_channel_id();

    let result = async {
        // All three arrive concurrently; nothing is unread in the reserved
        // channel yet.
        let branch1 = async {
            post_login(cancel, &checker1, &user1).await?;
            get_channel_page(cancel, &checker1, channel_id).await?;
            let last1 = get_messages_with(cancel, world, &checker1, channel_id, 0, None).await?;
            let umap1 = get_fetch_map(
                cancel,
                &checker1,
                Some(Box::new(move |unreads: &[JsonUnreadInfo]| {
                    for entry in unreads {
                        if entry.channel_id == channel_id && entry.unread != 0 {
                            return Err(fatal("the unread count is wrong before posting"));
                        }
                    }
                    Ok(())
                })),
            )
            .await?;
            Ok::<_, BenchError>((last1, umap1))
        };

        let branch2 = async {
            post_login(cancel, &checker2, &user2).await?;
            get_channel_page(cancel, &checker2, channel_id).await?;
            let last2 = get_messages_with(cancel, world, &checker2, channel_id, 0, None).await?;
            let umap2 = get_fetch_map(cancel, &checker2, None).await?;
            Ok::<_, BenchError>((last2, umap2))
        };

        let branch3 = async {
            post_login(cancel, &checker3, &user3).await?;
            get_channel_page(cancel, &checker3, 1).await?;
            get_messages_with(cancel, world, &checker3, 1, 0, None).await?;
            let umap3 = get_fetch_map(cancel, &checker3, None).await?;
            Ok::<_, BenchError>(umap3)
        };

        let (r1, r2, r3) = tokio::join!(branch1, branch2, branch3);
        let (last1, umap1) = r1?;
        let (last2, umap2) = r2?;
        let umap3 = r3?;

        let sent_text = post_message(cancel, world, &user1, &checker1, channel_id).await?;

        // Everyone must now see exactly one more unread in the posting
        // channel and no fewer anywhere else.
        let plus_one = |prev: HashMap<i64, i64>| -> FetchCheck {
            Box::new(move |unreads: &[JsonUnreadInfo]| {
                for entry in unreads {
                    let before = prev.get(&entry.channel_id).copied().unwrap_or(0);
                    if entry.channel_id == channel_id {
                        if before + 1 != entry.unread {
                            return Err(fatal("the unread count did not rise by one"));
                        }
                    } else if before > entry.unread {
                        return Err(fatal("an unread count went backwards"));
                    }
                }
                Ok(())
            })
        };

        let (f1, f2, f3) = tokio::join!(
            get_fetch_map(cancel, &checker1, Some(plus_one(umap1))),
            get_fetch_map(cancel, &checker2, Some(plus_one(umap2))),
            get_fetch_map(cancel, &checker3, Some(plus_one(umap3))),
        );
        f1?;
        f2?;
        f3?;

        // The incremental readers receive exactly the posted message; the
        // third user sees it arrive at the tail of a full read.
        let exactly_one = |inner: MessageCheck| -> MessageCheck {
            Box::new(move |msgs: &[JsonMessage]| {
                if msgs.len() != 1 {
                    return Err(fatal("the wrong number of new messages was fetched"));
                }
                inner(msgs)
            })
        };

        get_messages_with(
            cancel,
            world,
            &checker1,
            channel_id,
            last1,
            Some(exactly_one(sent_message_check(sent_text.clone(), &user1))),
        )
        .await?;
        get_messages_with(
            cancel,
            world,
            &checker2,
            channel_id,
            last2,
            Some(exactly_one(sent_message_check(sent_text.clone(), &user1))),
        )
        .await?;
        get_messages_with(
            cancel,
            world,
            &checker3,
            channel_id,
            0,
            Some(sent_message_check(sent_text.clone(), &user1)),
        )
        .await?;

        // The chat log must close with the posted message, correctly
        // attributed.
        let world_ref = Arc::clone(world);
        let expected_text = sent_text.clone();
        let author_name = user1.name.clone();
        checker1
            .play(
                cancel,
                CheckAction {
                    method: Method::GET,
                    path: format!("/history/{channel_id}"),
                    expected_status: Some(StatusCode::OK),
                    description: "the chat log renders",
                    check: Some(Box::new(move |res: &CheckResponse| {
                        let doc = html_document(res);
                        validate_history_pagination(&doc)?;

                        let Some(message) = doc.select(&sel(".message")).last() else {
                            return Err(fatal("no messages are displayed"));
                        };

                        let avatar_src = message
                            .select(&sel(".avatar"))
                            .next()
                            .and_then(|el| el.value().attr("src"));
                        if avatar_src.is_none() {
                            return Err(fatal("a message is missing its avatar path"));
                        }
                        let author = message
                            .select(&sel("h5"))
                            .next()
                            .map(|el| el.text().collect::<String>())
                            .unwrap_or_default();
                        let content = message
                            .select(&sel(".content"))
                            .next()
                            .map(|el| el.text().collect::<String>())
                            .unwrap_or_default();
                        let date = message
                            .select(&sel(".message-date"))
                            .next()
                            .map(|el| el.text().collect::<String>())
                            .unwrap_or_default();

                        if author.is_empty() {
                            return Err(fatal("a message is missing its author"));
                        }
                        if content.is_empty() {
                            return Err(fatal("a message is missing its content"));
                        }
                        if date.is_empty() {
                            return Err(fatal("a message is missing its date"));
                        }

                        let Some(at) = author.rfind('@') else {
                            return Err(fatal("the author label has the wrong format"));
                        };
                        let name = author[at + 1..].trim().to_string();
                        let display = author[..at].trim().to_string();
                        if name.is_empty() {
                            return Err(fatal("the author label has the wrong format"));
                        }

                        let Some(known) = world_ref.find_user_by_name(&name) else {
                            return Err(fatal("an unknown user name is displayed"));
                        };
                        if display != known.display_name {
                            return Err(fatal("a display name is shown incorrectly"));
                        }

                        if let Err(e) =
                            world_ref.validate_history_message(channel_id, &name, &content, &date)
                        {
                            return Err(mismatch(format!("history validation failed: {e}")));
                        }

                        if content.trim() != expected_text {
                            return Err(fatal("the posted message is not displayed"));
                        }
                        if known.name != author_name {
                            return Err(fatal("the message carries the wrong user name"));
                        }

                        Ok(())
                    })),
                    ..Default::default()
                },
            )
            .await?;

        Ok(())
    }
    .await;

    world.push_user(user1);
    world.push_user(user2);
    world.push_user(user3);
    result
}
