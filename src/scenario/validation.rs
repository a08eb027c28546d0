// src/scenario/validation.rs

//! Validation scenarios: each probes one correctness property of the target
//! application. They run in the preflight sequence and on a shuffled
//! schedule during the load window.

use super::{
    LOGIN_PATH, check_avatar_image, check_redirect, credentials, html_document, post_login,
    profile_form, sel,
};
use crate::core::checker::{CheckAction, CheckResponse, Checker, PostBody};
use crate::core::dataset::{Avatar, Channel, random_alphabet_string};
use crate::core::errors::{BenchError, fatal, mismatch};
use crate::core::staticfile::STATIC_FILES;
use crate::core::world::World;
use rand::Rng;
use rand::seq::SliceRandom;
use reqwest::{Method, StatusCode};
use scraper::Html;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// The pages an anonymous visitor may and may not see.
pub async fn check_not_logged_in_user(
    cancel: &CancellationToken,
    world: &Arc<World>,
) -> Result<(), BenchError> {
    let Some((user, checker)) = world.pop_random_user() else {
        return Ok(());
    };

    let result = async {
        checker.reset_cookies();

        checker
            .play(
                cancel,
                CheckAction {
                    method: Method::GET,
                    path: "/".to_string(),
                    expected_status: Some(StatusCode::OK),
                    description: "the landing page renders",
                    check: Some(Box::new(|res: &CheckResponse| {
                        let doc = html_document(res);
                        let brand = doc
                            .select(&sel("body > nav > a"))
                            .next()
                            .map(|el| el.text().collect::<String>())
                            .unwrap_or_default();
                        if brand.trim() != "Isubata" {
                            return Err(fatal("the brand name is not displayed properly"));
                        }
                        let heading = doc
                            .select(&sel("body > div > div > main > h1"))
                            .next()
                            .map(|el| el.text().collect::<String>())
                            .unwrap_or_default();
                        if heading.trim().is_empty() {
                            return Err(fatal("the welcome heading is not displayed"));
                        }
                        if doc.select(&sel(r#"a[href="/login"]"#)).next().is_none() {
                            return Err(fatal("the login link is missing"));
                        }
                        if doc.select(&sel(r#"a[href="/register"]"#)).next().is_none() {
                            return Err(fatal("the register link is missing"));
                        }
                        Ok(())
                    })),
                    ..Default::default()
                },
            )
            .await?;

        for path in ["/register", "/login"] {
            checker
                .play(
                    cancel,
                    CheckAction {
                        method: Method::GET,
                        path: path.to_string(),
                        expected_status: Some(StatusCode::OK),
                        description: "the form page renders",
                        check: Some(Box::new(|res: &CheckResponse| {
                            let doc = html_document(res);
                            if doc.select(&sel("#inputname")).count() != 1 {
                                return Err(fatal("the name input is not displayed properly"));
                            }
                            if doc.select(&sel("#inputpass")).count() != 1 {
                                return Err(fatal("the password input is not displayed properly"));
                            }
                            if doc
                                .select(&sel("body > div > div > main > form > button"))
                                .next()
                                .is_none()
                            {
                                return Err(fatal("the submit button is not displayed properly"));
                            }
                            Ok(())
                        })),
                        ..Default::default()
                    },
                )
                .await?;
        }

        let login_only_pages = [
            "/channel/1".to_string(),
            format!("/profile/{}", user.name),
            "/add_channel".to_string(),
            "/history/1".to_string(),
        ];
        for path in login_only_pages {
            checker
                .play(
                    cancel,
                    CheckAction {
                        method: Method::GET,
                        path,
                        check: Some(Box::new(check_redirect)),
                        expected_location: Some(LOGIN_PATH.clone()),
                        description: "anonymous visitors are sent to the login page",
                        ..Default::default()
                    },
                )
                .await?;
        }

        checker
            .play(
                cancel,
                CheckAction {
                    method: Method::GET,
                    path: "/message?channel_id=1&last_message_id=123".to_string(),
                    expected_status: Some(StatusCode::FORBIDDEN),
                    description: "anonymous visitors cannot fetch messages",
                    ..Default::default()
                },
            )
            .await?;

        checker
            .play(
                cancel,
                CheckAction {
                    disable_slow_checking: true,
                    method: Method::GET,
                    path: "/fetch".to_string(),
                    expected_status: Some(StatusCode::FORBIDDEN),
                    description: "anonymous visitors cannot poll for unreads",
                    ..Default::default()
                },
            )
            .await?;

        let avatar = user
            .avatar
            .lock()
            .clone()
            .unwrap_or_else(|| Arc::clone(&world.dataset().default_avatar));
        checker
            .play(
                cancel,
                CheckAction {
                    method: Method::POST,
                    path: "/profile".to_string(),
                    post: PostBody::Multipart(profile_form(
                        Some(&user.name),
                        Some((&avatar.file_name, avatar.bytes.clone())),
                    )),
                    check: Some(Box::new(check_redirect)),
                    expected_location: Some(LOGIN_PATH.clone()),
                    description: "anonymous visitors cannot update profiles",
                    ..Default::default()
                },
            )
            .await?;

        checker
            .play(
                cancel,
                CheckAction {
                    method: Method::POST,
                    path: "/add_channel".to_string(),
                    post: PostBody::Form(vec![
                        ("name".to_string(), "dummy room".to_string()),
                        ("description".to_string(), "dummy room description".to_string()),
                    ]),
                    check: Some(Box::new(check_redirect)),
                    expected_location: Some(LOGIN_PATH.clone()),
                    description: "anonymous visitors cannot create channels",
                    ..Default::default()
                },
            )
            .await
    }
    .await;

    world.push_user(user);
    result
}

/// Every static asset must come back byte-identical to the manifest.
pub async fn check_static_files(
    cancel: &CancellationToken,
    world: &Arc<World>,
) -> Result<(), BenchError> {
    let Some((user, checker)) = world.pop_random_user() else {
        return Ok(());
    };

    let result = async {
        for sf in STATIC_FILES {
            checker
                .play(
                    cancel,
                    CheckAction {
                        method: Method::GET,
                        path: sf.path.to_string(),
                        expected_status: Some(StatusCode::OK),
                        description: "a static file can be fetched",
                        check: Some(Box::new(move |res: &CheckResponse| {
                            let hash = format!("{:x}", md5::compute(&res.body));
                            if hash != sf.md5 {
                                return Err(fatal("static file content is wrong"));
                            }
                            Ok(())
                        })),
                        ..Default::default()
                    },
                )
                .await?;
        }
        Ok(())
    }
    .await;

    world.push_user(user);
    result
}

/// Valid credentials log in; random ones do not.
pub async fn check_login(cancel: &CancellationToken, world: &Arc<World>) -> Result<(), BenchError> {
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
                    path: "/logout".to_string(),
                    check: Some(Box::new(check_redirect)),
                    description: "logging out redirects",
                    ..Default::default()
                },
            )
            .await?;

        checker
            .play(
                cancel,
                CheckAction {
                    method: Method::POST,
                    path: "/login".to_string(),
                    expected_status: Some(StatusCode::FORBIDDEN),
                    post: PostBody::Form(vec![
                        ("name".to_string(), random_alphabet_string(32)),
                        ("password".to_string(), random_alphabet_string(32)),
                    ]),
                    description: "unknown users cannot log in",
                    ..Default::default()
                },
            )
            .await
    }
    .await;

    world.push_user(user);
    result
}

/// Profiles of nonexistent users answer 404.
pub async fn check_get_profile_fail(
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
                    path: format!("/profile/{}", random_alphabet_string(32)),
                    expected_status: Some(StatusCode::NOT_FOUND),
                    description: "unknown profiles answer not found",
                    ..Default::default()
                },
            )
            .await
    }
    .await;

    world.push_user(user);
    result
}

async fn check_self_profile(
    cancel: &CancellationToken,
    checker: &Checker,
    name: &str,
    display_name: &str,
    avatar: &Avatar,
) -> Result<(), BenchError> {
    let mut avatar_url: Option<String> = None;
    {
        let avatar_url = &mut avatar_url;
        let name = name.to_string();
        let display_name = display_name.to_string();
        checker
            .play(
                cancel,
                CheckAction {
                    method: Method::GET,
                    path: format!("/profile/{name}"),
                    expected_status: Some(StatusCode::OK),
                    description: "the own profile page renders",
                    check: Some(Box::new(move |res: &CheckResponse| {
                        let doc = html_document(res);
                        let shown_name = doc
                            .select(&sel("body > div > div > main > form > div > div:nth-child(2) > p"))
                            .next()
                            .map(|el| el.text().collect::<String>())
                            .unwrap_or_default();
                        if shown_name != name {
                            return Err(fatal(format!(
                                "the own profile page shows the wrong user name for {name}"
                            )));
                        }
                        let shown_display = doc
                            .select(&sel(
                                "body > div > div > main > form > div > div:nth-child(4) > input",
                            ))
                            .next()
                            .and_then(|el| el.value().attr("value"))
                            .unwrap_or_default();
                        if shown_display != display_name {
                            return Err(fatal(format!(
                                "the own profile page shows the wrong display name for {name}"
                            )));
                        }
                        let src = doc
                            .select(&sel(
                                "body > div > div > main > form > div > div:nth-child(8) > img",
                            ))
                            .next()
                            .and_then(|el| el.value().attr("src"));
                        let Some(src) = src else {
                            return Err(fatal(format!(
                                "the own profile page shows no avatar image for {name}"
                            )));
                        };
                        *avatar_url = Some(src.to_string());
                        Ok(())
                    })),
                    ..Default::default()
                },
            )
            .await?;
    }

    if let Some(url) = avatar_url {
        checker
            .play(
                cancel,
                CheckAction {
                    method: Method::GET,
                    path: url,
                    expected_status: Some(StatusCode::OK),
                    description: "the correct avatar can be fetched",
                    check: Some(check_avatar_image(avatar.md5.clone())),
                    ..Default::default()
                },
            )
            .await?;
    }

    Ok(())
}

async fn check_other_profile(
    cancel: &CancellationToken,
    viewer: &Checker,
    avatar_checker: &Checker,
    name: &str,
    display_name: &str,
    avatar: &Avatar,
) -> Result<(), BenchError> {
    let mut avatar_url: Option<String> = None;
    {
        let avatar_url = &mut avatar_url;
        let name = name.to_string();
        let display_name = display_name.to_string();
        viewer
            .play(
                cancel,
                CheckAction {
                    method: Method::GET,
                    path: format!("/profile/{name}"),
                    expected_status: Some(StatusCode::OK),
                    description: "another user's profile page renders",
                    check: Some(Box::new(move |res: &CheckResponse| {
                        let doc = html_document(res);
                        let shown_name = doc
                            .select(&sel("body > div > div > main > div > div:nth-child(2) > p"))
                            .next()
                            .map(|el| el.text().collect::<String>())
                            .unwrap_or_default();
                        if shown_name != name {
                            return Err(fatal(format!(
                                "another user's profile page shows the wrong user name for {name}"
                            )));
                        }
                        let shown_display = doc
                            .select(&sel("body > div > div > main > div > div:nth-child(4) > p"))
                            .next()
                            .map(|el| el.text().collect::<String>())
                            .unwrap_or_default();
                        if shown_display != display_name {
                            return Err(fatal(format!(
                                "another user's profile page shows the wrong display name for {display_name}"
                            )));
                        }
                        let src = doc
                            .select(&sel("body > div > div > main > div > div:nth-child(6) > img"))
                            .next()
                            .and_then(|el| el.value().attr("src"));
                        let Some(src) = src else {
                            return Err(fatal(format!(
                                "another user's profile page shows no avatar image for {name}"
                            )));
                        };
                        *avatar_url = Some(src.to_string());
                        Ok(())
                    })),
                    ..Default::default()
                },
            )
            .await?;
    }

    if let Some(url) = avatar_url {
        avatar_checker
            .play(
                cancel,
                CheckAction {
                    method: Method::GET,
                    path: url,
                    expected_status: Some(StatusCode::OK),
                    description: "the correct avatar can be fetched",
                    check: Some(check_avatar_image(avatar.md5.clone())),
                    ..Default::default()
                },
            )
            .await?;
    }

    Ok(())
}

/// The whole registration and profile-editing lifecycle, seen both by the
/// user itself and by a second logged-in observer.
pub async fn check_register_profile(
    cancel: &CancellationToken,
    world: &Arc<World>,
) -> Result<(), BenchError> {
    let Some((user, checker)) = world.pop_new_user() else {
        return Ok(());
    };
    let Some((user2, checker2)) = world.pop_random_user() else {
        return Ok(());
    };

    let result = async {
        checker
            .play(
                cancel,
                CheckAction {
                    method: Method::POST,
                    path: "/login".to_string(),
                    expected_status: Some(StatusCode::FORBIDDEN),
                    post: PostBody::Form(credentials(&user)),
                    description: "an unregistered user cannot log in",
                    ..Default::default()
                },
            )
            .await?;

        checker
            .play(
                cancel,
                CheckAction {
                    method: Method::POST,
                    path: "/register".to_string(),
                    post: PostBody::Form(credentials(&user)),
                    check: Some(Box::new(check_redirect)),
                    description: "a new user can register",
                    ..Default::default()
                },
            )
            .await?;

        checker
            .play(
                cancel,
                CheckAction {
                    method: Method::POST,
                    path: "/register".to_string(),
                    expected_status: Some(StatusCode::CONFLICT),
                    post: PostBody::Form(vec![
                        ("name".to_string(), user.name.clone()),
                        ("password".to_string(), format!("{}x", user.password)),
                    ]),
                    description: "a taken user name cannot be registered again",
                    ..Default::default()
                },
            )
            .await?;

        post_login(cancel, &checker, &user).await?;
        post_login(cancel, &checker2, &user2).await?;

        // A fresh account starts with its name as display name and the
        // default avatar.
        let default_avatar = Arc::clone(&world.dataset().default_avatar);
        check_self_profile(cancel, &checker, &user.name, &user.name, &default_avatar).await?;
        check_other_profile(
            cancel,
            &checker2,
            &checker,
            &user.name,
            &user.name,
            &default_avatar,
        )
        .await?;

        let large_avatar = {
            let pool = &world.dataset().large_avatars;
            Arc::clone(&pool[rand::thread_rng().gen_range(0..pool.len())])
        };
        checker
            .play(
                cancel,
                CheckAction {
                    disable_slow_checking: true,
                    method: Method::POST,
                    path: "/profile".to_string(),
                    expected_status: Some(StatusCode::BAD_REQUEST),
                    post: PostBody::Multipart(profile_form(
                        None,
                        Some((&large_avatar.file_name, large_avatar.bytes.clone())),
                    )),
                    description: "an oversized avatar is rejected",
                    ..Default::default()
                },
            )
            .await?;

        let avatar = {
            let pool = &world.dataset().avatars;
            Arc::clone(&pool[rand::thread_rng().gen_range(0..pool.len())])
        };
        *user.avatar.lock() = Some(Arc::clone(&avatar));

        let bad_name = format!("{}.bin", avatar.file_name);
        checker
            .play(
                cancel,
                CheckAction {
                    method: Method::POST,
                    path: "/profile".to_string(),
                    expected_status: Some(StatusCode::BAD_REQUEST),
                    post: PostBody::Multipart(profile_form(
                        Some(&user.display_name),
                        Some((&bad_name, avatar.bytes.clone())),
                    )),
                    description: "a non-image extension is rejected",
                    ..Default::default()
                },
            )
            .await?;

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

        check_self_profile(cancel, &checker, &user.name, &user.display_name, &avatar).await?;
        check_other_profile(
            cancel,
            &checker2,
            &checker,
            &user.name,
            &user.display_name,
            &avatar,
        )
        .await?;

        Ok(())
    }
    .await;

    world.push_user(user2);
    if result.is_ok() {
        world.push_user(user);
    }
    result
}

/// The channel page lists exactly the channels the benchmark knows about.
pub async fn check_get_channel(
    cancel: &CancellationToken,
    world: &Arc<World>,
) -> Result<(), BenchError> {
    let channel_id = world.random_channel_id();
    let Some((user, checker)) = world.pop_random_user() else {
        return Ok(());
    };

    let result = async {
        post_login(cancel, &checker, &user).await?;

        let world_ref = Arc::clone(world);
        let display_name = user.display_name.clone();
        checker
            .play(
                cancel,
                CheckAction {
                    method: Method::GET,
                    path: format!("/channel/{channel_id}"),
                    expected_status: Some(StatusCode::OK),
                    description: "the channel page renders",
                    check: Some(Box::new(move |res: &CheckResponse| {
                        let doc = html_document(res);
                        let header_name = doc
                            .select(&sel("#navbarsExampleDefault > ul > li:nth-child(3) > a"))
                            .next()
                            .map(|el| el.text().collect::<String>())
                            .unwrap_or_default();
                        if header_name.trim() != display_name {
                            return Err(fatal("the header does not show the display name"));
                        }

                        for li in doc.select(&sel("body > div > div > nav > ul > li")) {
                            let href = li
                                .select(&sel("a"))
                                .next()
                                .and_then(|a| a.value().attr("href"));
                            let Some(href) = href else {
                                return Err(fatal("a channel link is not set properly"));
                            };
                            let id: i64 = match href.rsplit('/').next().map(str::parse::<i64>) {
                                Some(Ok(id)) => id,
                                _ => return Err(fatal("a channel link is not set properly")),
                            };
                            let label = li.text().collect::<String>();
                            let Some(channel) = world_ref.get_channel(id) else {
                                return Err(fatal(format!(
                                    "a channel that should not exist is listed: id {id}, name {:?}",
                                    label.trim()
                                )));
                            };
                            if label.trim() != channel.name {
                                return Err(fatal("a channel name is not displayed properly"));
                            }
                        }
                        Ok(())
                    })),
                    ..Default::default()
                },
            )
            .await
    }
    .await;

    world.push_user(user);
    result
}

/// Creates a channel and registers it with the world. Returns the new
/// channel id, or `None` when the scenario was skipped.
pub async fn check_post_add_channel(
    cancel: &CancellationToken,
    world: &Arc<World>,
) -> Result<Option<i64>, BenchError> {
    let Some((user, checker)) = world.pop_random_user() else {
        return Ok(None);
    };

    let result = async {
        post_login(cancel, &checker, &user).await?;

        let name = format!("{} room", user.display_name);
        let description = format!("a room made by {}", user.display_name);

        let mut created: Option<i64> = None;
        {
            let created = &mut created;
            let world_ref = Arc::clone(world);
            let name_clone = name.clone();
            let description_clone = description.clone();
            checker
                .play(
                    cancel,
                    CheckAction {
                        method: Method::POST,
                        path: "/add_channel".to_string(),
                        post: PostBody::Form(vec![
                            ("name".to_string(), name),
                            ("description".to_string(), description),
                        ]),
                        description: "a channel can be created",
                        check: Some(Box::new(move |res: &CheckResponse| {
                            check_redirect(res)?;

                            let location = res
                                .headers
                                .get(reqwest::header::LOCATION)
                                .and_then(|v| v.to_str().ok())
                                .unwrap_or("");
                            if !location.contains('/') {
                                return Err(fatal("the redirect URL is not set properly"));
                            }
                            let id: i64 = match location.rsplit('/').next().map(str::parse::<i64>) {
                                Some(Ok(id)) => id,
                                _ => return Err(fatal("the redirect URL is not set properly")),
                            };

                            world_ref.add_channel(
                                id,
                                Channel {
                                    id,
                                    name: name_clone.clone(),
                                    description: description_clone.clone(),
                                },
                            );
                            *created = Some(id);
                            Ok(())
                        })),
                        ..Default::default()
                    },
                )
                .await?;
        }

        Ok(created)
    }
    .await;

    world.push_user(user);
    result
}

/// Channel creation requires both a name and a description.
pub async fn check_post_add_channel_fail(
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
                    method: Method::POST,
                    path: "/add_channel".to_string(),
                    expected_status: Some(StatusCode::BAD_REQUEST),
                    post: PostBody::Form(vec![(
                        "name".to_string(),
                        "a room without description".to_string(),
                    )]),
                    description: "a channel without a description is rejected",
                    ..Default::default()
                },
            )
            .await?;

        checker
            .play(
                cancel,
                CheckAction {
                    method: Method::POST,
                    path: "/add_channel".to_string(),
                    expected_status: Some(StatusCode::BAD_REQUEST),
                    post: PostBody::Form(vec![(
                        "description".to_string(),
                        "a room without a name".to_string(),
                    )]),
                    description: "a channel without a name is rejected",
                    ..Default::default()
                },
            )
            .await
    }
    .await;

    world.push_user(user);
    result
}

/// The channel creation form renders for logged-in users.
pub async fn check_get_add_channel(
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
                    path: "/add_channel".to_string(),
                    expected_status: Some(StatusCode::OK),
                    description: "the channel creation form renders",
                    check: Some(Box::new(|res: &CheckResponse| {
                        let doc = html_document(res);
                        if doc.select(&sel("#inputname")).count() != 1 {
                            return Err(fatal("the name input is not displayed properly"));
                        }
                        if doc.select(&sel("#inputdescription")).count() != 1 {
                            return Err(fatal("the description input is not displayed properly"));
                        }
                        if doc
                            .select(&sel("body > div > div > main > form > button"))
                            .next()
                            .is_none()
                        {
                            return Err(fatal("the submit button is not displayed properly"));
                        }
                        Ok(())
                    })),
                    ..Default::default()
                },
            )
            .await
    }
    .await;

    world.push_user(user);
    result
}

/// Walks the pagination list: numbers must start at 1 and be contiguous, the
/// only non-numeric labels allowed are the two arrows, and a single page
/// shows no arrows at all. Returns the highest page number.
pub fn validate_history_pagination(doc: &Html) -> Result<i64, BenchError> {
    let mut page = 0i64;
    let mut arrow_left = false;
    let mut arrow_right = false;

    for li in doc.select(&sel(".pagination li")) {
        let text = li.text().collect::<String>();
        let text = text.trim();
        match text.parse::<i64>() {
            Ok(n) => {
                if n != 1 && n != page + 1 {
                    return Err(fatal("pagination numbers are not contiguous"));
                }
                page = n;
            }
            Err(_) => {
                if text == "«" {
                    arrow_left = true;
                } else if text == "»" {
                    arrow_right = true;
                } else {
                    return Err(fatal("pagination contains a non-numeric label"));
                }
            }
        }
    }

    // An empty channel still renders page 1.
    if page == 0 {
        return Err(fatal("pagination shows no page numbers"));
    }
    if page == 1 && (arrow_left || arrow_right) {
        return Err(fatal("pagination shows needless arrows"));
    }

    Ok(page)
}

/// Which pages of the chat log a history check walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFollowMode {
    Random,
    Head,
    Tail,
}

const HISTORY_FOLLOW_PAGES: usize = 5;
const HISTORY_PAGE_SIZE: i64 = 20;

/// The chat log of one channel: page count bounded by the unread window,
/// every message attributable, authors displayed as `display@name`, and
/// exactly 20 entries per full page.
pub async fn check_get_history(
    cancel: &CancellationToken,
    world: &Arc<World>,
    channel_id: i64,
    mode: PageFollowMode,
) -> Result<(), BenchError> {
    let Some((user, checker)) = world.pop_random_user() else {
        return Ok(());
    };

    let result = async {
        post_login(cancel, &checker, &user).await?;

        let (min_map, _) = world.snapshot_message_count();
        let mut max_page = 1i64;
        {
            let max_page = &mut max_page;
            let world_ref = Arc::clone(world);
            let min_before = min_map.get(&channel_id).copied().unwrap_or(0);
            checker
                .play(
                    cancel,
                    CheckAction {
                        method: Method::GET,
                        path: format!("/history/{channel_id}"),
                        expected_status: Some(StatusCode::OK),
                        description: "the chat log renders",
                        check: Some(Box::new(move |res: &CheckResponse| {
                            let (_, max_map) = world_ref.snapshot_message_count();
                            let doc = html_document(res);
                            let page = validate_history_pagination(&doc)?;

                            // Floors keep the page arithmetic simple for
                            // empty channels.
                            let min_msg = min_before.max(1);
                            let max_msg = max_map.get(&channel_id).copied().unwrap_or(0).max(1);

                            if page < (min_msg + HISTORY_PAGE_SIZE - 1) / HISTORY_PAGE_SIZE {
                                return Err(fatal("pagination shows too few pages"));
                            }
                            if (max_msg + HISTORY_PAGE_SIZE - 1) / HISTORY_PAGE_SIZE < page {
                                return Err(fatal("pagination shows too many pages"));
                            }

                            *max_page = page;
                            Ok(())
                        })),
                        ..Default::default()
                    },
                )
                .await?;
        }

        if min_map.get(&channel_id).copied().unwrap_or(0) == 0 {
            // The channel has no settled messages yet.
            return Ok(());
        }

        let pages: Vec<i64> = match mode {
            PageFollowMode::Random => {
                let mut all: Vec<i64> = (1..=max_page).collect();
                all.shuffle(&mut rand::thread_rng());
                all.truncate(HISTORY_FOLLOW_PAGES);
                all
            }
            PageFollowMode::Head => (1..=max_page).take(HISTORY_FOLLOW_PAGES).collect(),
            PageFollowMode::Tail => (1..=max_page)
                .rev()
                .take(HISTORY_FOLLOW_PAGES)
                .collect(),
        };

        for page in pages {
            let mut avatar_by_user: HashMap<String, String> = HashMap::new();
            {
                let avatar_by_user = &mut avatar_by_user;
                let world_ref = Arc::clone(world);
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
                                validate_history_pagination(&doc)?;

                                let mut msg_count = 0i64;
                                let mut seen_contents = std::collections::HashSet::new();
                                for message in doc.select(&sel(".message")) {
                                    msg_count += 1;

                                    let avatar_src = message
                                        .select(&sel(".avatar"))
                                        .next()
                                        .and_then(|el| el.value().attr("src"));
                                    let Some(avatar_src) = avatar_src else {
                                        return Err(fatal(
                                            "a message is missing its avatar path",
                                        ));
                                    };
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

                                    if let Err(e) = world_ref.validate_history_message(
                                        channel_id, &name, &content, &date,
                                    ) {
                                        return Err(mismatch(format!(
                                            "history validation failed: {e}"
                                        )));
                                    }

                                    if !seen_contents.insert(content.trim().to_string()) {
                                        return Err(fatal("a message is displayed twice"));
                                    }

                                    avatar_by_user.insert(known.name.clone(), avatar_src.to_string());
                                }

                                if page == max_page {
                                    if !(1..=HISTORY_PAGE_SIZE).contains(&msg_count) {
                                        return Err(fatal("the page shows the wrong message count"));
                                    }
                                } else if msg_count != HISTORY_PAGE_SIZE {
                                    return Err(fatal("the page shows the wrong message count"));
                                }

                                Ok(())
                            })),
                            ..Default::default()
                        },
                    )
                    .await?;
            }

            for (name, path) in avatar_by_user.into_iter().take(5) {
                let Some(known) = world.find_user_by_name(&name) else {
                    return Err(fatal("an unknown user name is displayed"));
                };
                let Some(avatar) = known.avatar.lock().clone() else {
                    continue;
                };
                checker
                    .play(
                        cancel,
                        CheckAction {
                            method: Method::GET,
                            path,
                            expected_status: Some(StatusCode::OK),
                            description: "the correct avatar can be fetched",
                            check: Some(check_avatar_image(avatar.md5.clone())),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
        }

        Ok(())
    }
    .await;

    world.push_user(user);
    result
}

/// Creates and logs in the dedicated user the unread validator polls with.
pub async fn check_fetch_register_and_login(
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
                post: PostBody::Form(credentials(&user)),
                check: Some(Box::new(check_redirect)),
                description: "a new user can register",
                ..Default::default()
            },
        )
        .await?;

    post_login(cancel, &checker, &user).await?;

    // This user stays checked out for the rest of the run.
    world.set_fetch_check_user(user);
    Ok(())
}

/// Every unread count reported by `/fetch` must fall inside the window the
/// world tracked across the request.
pub async fn check_fetch_unread_count(
    cancel: &CancellationToken,
    world: &Arc<World>,
) -> Result<(), BenchError> {
    let Some(user) = world.fetch_check_user() else {
        return Ok(());
    };
    let checker = world.get_checker(&user);

    let (min_map, _) = world.snapshot_message_count();
    let world_ref = Arc::clone(world);

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
                    let (_, max_map) = world_ref.snapshot_message_count();
                    let unreads: Vec<crate::core::world::JsonUnreadInfo> =
                        serde_json::from_slice(&res.body)
                            .map_err(|e| fatal(format!("failed to decode the unread list: {e}")))?;

                    let mut valid = true;
                    for entry in &unreads {
                        let lo = min_map.get(&entry.channel_id).copied().unwrap_or(0);
                        let hi = max_map.get(&entry.channel_id).copied().unwrap_or(0);
                        if !(lo <= entry.unread && entry.unread <= hi) {
                            warn!(
                                "bad unread count: channel {} unread {} expected [{}, {}]",
                                entry.channel_id, entry.unread, lo, hi
                            );
                            valid = false;
                        }
                    }
                    if !valid {
                        return Err(fatal("an unread count is out of range"));
                    }
                    Ok(())
                })),
                ..Default::default()
            },
        )
        .await?;

    Ok(())
}
