// src/runner/mod.rs

//! The benchmark controller: the initialize call, the preflight validation
//! sequence, the load window with its level-up ticker, and the final score.

pub mod report;

pub use report::BenchResult;

use crate::config::Config;
use crate::core::checker::{APP_HOST, CHECKER_USER_AGENT, INITIALIZE_TIMEOUT};
use crate::core::context::BenchContext;
use crate::core::dataset::DataSet;
use crate::core::errors::BenchError;
use crate::core::world::World;
use crate::scenario;
use crate::scenario::PageFollowMode;
use anyhow::Result;
use chrono::{Local, Utc};
use parking_lot::Mutex;
use rand::Rng;
use rand::seq::SliceRandom;
use report::compute_score;
use reqwest::header::{HOST, USER_AGENT};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// How many channels exist once the preflight finishes creating extras.
const PREFLIGHT_CHANNEL_COUNT: usize = 100;

/// How far back errors and slow paths hold the load level down.
const LEVELUP_HOLDBACK: Duration = Duration::from_secs(5);

/// Workers added per promotion: 5 read-write on an active channel plus
/// 5 read-only on an inactive one.
const LEVELUP_STEP: usize = 5;

/// Runs the whole benchmark and produces the result document. Returns an
/// error only for configuration-class failures (unreadable fixtures); a
/// failing target application still yields an `Ok` result with score zero.
pub async fn run(config: &Config) -> Result<BenchResult> {
    let mut result = BenchResult::new(config.job_id.clone(), config.remotes.join(","));
    let ctx = BenchContext::new(config.remotes.clone(), config.debug);

    info!("loading fixtures from {}", config.data_dir.display());
    let dataset = Arc::new(DataSet::load(&config.data_dir)?);
    let world = World::new(Arc::clone(&ctx), dataset)?;
    info!("fixtures ready");

    info!("requesting /initialize");
    if let Err(e) = request_initialize(&ctx).await {
        result.message = format!("the request to /initialize failed: {e}");
        result.errors = ctx.error_strings();
        result.end_time = Utc::now();
        return Ok(result);
    }
    info!("/initialize done");

    // The clock starts here: preflight runs inside the benchmark window.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        let duration = config.duration;
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            cancel.cancel();
        });
    }

    info!("preflight validation");
    if let Err(e) = preflight(&cancel, &world).await {
        result.message = format!("validation before the load phase failed: {e}");
        result.errors = ctx.error_strings();
        result.end_time = Utc::now();
        return Ok(result);
    }
    info!("preflight validation done");

    if config.test_only {
        result.message = "pretest passed".to_string();
        result.errors = ctx.error_strings();
        result.end_time = Utc::now();
        return Ok(result);
    }

    let load_logs: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let cancel = cancel.clone();
        let world = Arc::clone(&world);
        let ctx = Arc::clone(&ctx);
        let load_logs = Arc::clone(&load_logs);
        let no_levelup = config.no_levelup;
        tokio::spawn(async move {
            benchmark_main(cancel, world, ctx, load_logs, no_levelup).await;
        });
    }

    loop {
        let outcome = validation_main(&cancel, &world).await;
        if cancel.is_cancelled() {
            break;
        }
        if let Err(e) = outcome {
            result.message = format!("validation during the load phase failed: {e}");
            result.errors = ctx.error_strings();
            result.logs = load_logs.lock().clone();
            result.end_time = Utc::now();
            return Ok(result);
        }
    }

    ctx.guard_errors(true);
    log_counter_summary(&ctx);

    let get = ctx.counters.sum_prefix("GET|/");
    let fetch = ctx.counters.sum_prefix("GET|/fetch");
    let post = ctx.counters.sum_prefix("POST|/");
    let msg = ctx.counters.sum_prefix("get-message-count");
    let s304 = ctx.counters.get("staticfile-304");
    let score = compute_score(get, fetch, post, msg, s304);

    info!("get {get}");
    info!("fetch {fetch}");
    info!("post {post}");
    info!("msg {msg}");
    info!("s304 {s304}");
    info!("score {score}");

    result.load_level = ctx.counters.get("load-level-up");
    result.pass = true;
    result.score = score;
    result.message = "ok".to_string();
    result.errors = ctx.error_strings();
    result.logs = load_logs.lock().clone();
    result.end_time = Utc::now();
    Ok(result)
}

/// The one-shot `GET /initialize` the target uses to reset itself. Sent to a
/// random host outside the checker machinery, with its own deadline.
async fn request_initialize(ctx: &BenchContext) -> Result<()> {
    let host = ctx.hosts.random_host();
    let client = reqwest::Client::builder()
        .timeout(INITIALIZE_TIMEOUT)
        .build()?;
    let res = client
        .get(format!("http://{host}/initialize"))
        .header(HOST, APP_HOST)
        .header(USER_AGENT, CHECKER_USER_AGENT)
        .send()
        .await?;
    res.bytes().await?;
    Ok(())
}

/// Passes a preflight step outcome through: only fatal failures abort;
/// ordinary ones are already in the error log and the sequence continues.
fn gate(outcome: Result<(), BenchError>) -> Result<(), BenchError> {
    match outcome {
        Err(e) if e.is_fatal() => Err(e),
        _ => Ok(()),
    }
}

/// Verifies that the application works at all before any load is applied.
/// Also creates the extra channels and settles the channel partitions.
async fn preflight(cancel: &CancellationToken, world: &Arc<World>) -> Result<(), BenchError> {
    let mut last_created = None;
    let mut attempts = 0;
    while world.total_channel_count() < PREFLIGHT_CHANNEL_COUNT {
        if cancel.is_cancelled() {
            break;
        }
        attempts += 1;
        if attempts > 2 * PREFLIGHT_CHANNEL_COUNT {
            break;
        }
        match scenario::check_post_add_channel(cancel, world).await {
            Ok(Some(id)) => last_created = Some(id),
            Ok(None) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(_) => {}
        }
    }

    world.distribute_tmp_channels();

    gate(scenario::check_get_add_channel(cancel, world).await)?;
    gate(scenario::check_post_add_channel_fail(cancel, world).await)?;
    gate(scenario::check_get_profile_fail(cancel, world).await)?;
    gate(
        scenario::check_get_history(cancel, world, last_created.unwrap_or(1), PageFollowMode::Tail)
            .await,
    )?;
    gate(scenario::check_get_history(cancel, world, 1, PageFollowMode::Tail).await)?;
    gate(scenario::check_not_logged_in_user(cancel, world).await)?;
    gate(scenario::check_static_files(cancel, world).await)?;
    gate(scenario::check_login(cancel, world).await)?;
    gate(scenario::check_register_profile(cancel, world).await)?;
    gate(scenario::check_get_channel(cancel, world).await)?;
    gate(scenario::check_fetch_register_and_login(cancel, world).await)?;
    gate(scenario::check_fetch_unread_count(cancel, world).await)?;
    gate(scenario::check_message_scenario(cancel, world).await)?;

    Ok(())
}

/// One shuffled pass over the validation scenarios. Fatal failures abort;
/// ordinary ones cost a 500 ms penalty so validation cannot be abused as a
/// score booster.
async fn validation_main(cancel: &CancellationToken, world: &Arc<World>) -> Result<(), BenchError> {
    let mut order: Vec<usize> = (0..8).collect();
    order.shuffle(&mut rand::thread_rng());

    for r in order {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let started = Instant::now();
        let (name, outcome) = match r {
            0 => (
                "check_not_logged_in_user",
                scenario::check_not_logged_in_user(cancel, world).await,
            ),
            1 => (
                "check_static_files",
                scenario::check_static_files(cancel, world).await,
            ),
            2 => ("check_login", scenario::check_login(cancel, world).await),
            3 => (
                "check_register_profile",
                scenario::check_register_profile(cancel, world).await,
            ),
            4 => (
                "check_get_channel",
                scenario::check_get_channel(cancel, world).await,
            ),
            5 => {
                let channel_id = world.active_channel_id();
                (
                    "check_get_history",
                    scenario::check_get_history(cancel, world, channel_id, PageFollowMode::Random)
                        .await,
                )
            }
            6 => (
                "check_fetch_unread_count",
                scenario::check_fetch_unread_count(cancel, world).await,
            ),
            _ => (
                "check_message_scenario",
                scenario::check_message_scenario(cancel, world).await,
            ),
        };
        info!("{} took {:?}", name, started.elapsed());

        if let Err(e) = outcome {
            if e.is_fatal() {
                return Err(e);
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
    Ok(())
}

fn spawn_read_write_users(
    cancel: &CancellationToken,
    world: &Arc<World>,
    channel_id: i64,
    n: usize,
) {
    for _ in 0..n {
        let cancel = cancel.clone();
        let world = Arc::clone(world);
        tokio::spawn(async move {
            let _ = scenario::load_read_write_user(&cancel, &world, channel_id).await;
        });
    }
}

fn spawn_read_only_users(
    cancel: &CancellationToken,
    world: &Arc<World>,
    channel_id: i64,
    n: usize,
) {
    for _ in 0..n {
        let cancel = cancel.clone();
        let world = Arc::clone(world);
        tokio::spawn(async move {
            let _ = scenario::load_read_only_user(&cancel, &world, channel_id).await;
        });
    }
}

/// Residents for one channel: `n` read-write plus `n` read-only loops.
fn spawn_channel_users(cancel: &CancellationToken, world: &Arc<World>, channel_id: i64, n: usize) {
    spawn_read_write_users(cancel, world, channel_id, n);
    spawn_read_only_users(cancel, world, channel_id, n);
}

#[derive(Debug, Clone, Copy)]
enum LoadKind {
    Profile,
    Register,
    GetChannel,
    GetHistory,
}

/// The weighted catalogue the chooser loops draw from.
fn weighted_load_kinds() -> Vec<LoadKind> {
    let weighted = [
        (1, LoadKind::Profile),
        (1, LoadKind::Register),
        (1, LoadKind::GetChannel),
        (1, LoadKind::GetHistory),
    ];
    let mut kinds = Vec::new();
    for (weight, kind) in weighted {
        for _ in 0..weight {
            kinds.push(kind);
        }
    }
    kinds
}

/// Starts the long-running load and promotes the load level once per second
/// while the recent error and slow-path signals stay clean.
async fn benchmark_main(
    cancel: CancellationToken,
    world: Arc<World>,
    ctx: Arc<BenchContext>,
    load_logs: Arc<Mutex<Vec<String>>>,
    no_levelup: bool,
) {
    spawn_channel_users(&cancel, &world, world.inactive_channel_id(), 10);
    spawn_channel_users(&cancel, &world, world.active_channel_id(), 10);

    let kinds = Arc::new(weighted_load_kinds());
    for _ in 0..10 {
        let cancel = cancel.clone();
        let world = Arc::clone(&world);
        let kinds = Arc::clone(&kinds);
        tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    return;
                }
                let kind = kinds[rand::thread_rng().gen_range(0..kinds.len())];
                let outcome = match kind {
                    LoadKind::Profile => scenario::load_profile(&cancel, &world).await,
                    LoadKind::Register => scenario::load_register(&cancel, &world).await,
                    LoadKind::GetChannel => scenario::load_get_channel(&cancel, &world).await,
                    LoadKind::GetHistory => scenario::load_get_history(&cancel, &world).await,
                };
                if outcome.is_err() {
                    return;
                }
            }
        });
    }

    let mut beat = tokio::time::interval(Duration::from_secs(1));
    beat.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // The window is over; stop collecting errors right here.
                ctx.guard_errors(true);
                return;
            }
            _ = beat.tick() => {}
        }

        if no_levelup {
            continue;
        }

        let recent_error = ctx
            .last_error()
            .filter(|(_, at)| at.elapsed() < LEVELUP_HOLDBACK);
        let recent_slow = ctx
            .last_slow_path()
            .filter(|(_, at)| at.elapsed() < LEVELUP_HOLDBACK);

        let now = Local::now().format("%m/%d %H:%M:%S");
        if let Some((err, at)) = recent_error {
            load_logs
                .lock()
                .push(format!("{now} load level held back by a recent error: {err}"));
            info!("load level held back, recent error {} ({:?} ago)", err, at.elapsed());
        } else if let Some((path, at)) = recent_slow {
            load_logs
                .lock()
                .push(format!("{now} load level held back by a slow response: {path}"));
            info!("load level held back, slow path {} ({:?} ago)", path, at.elapsed());
        } else {
            load_logs.lock().push(format!("{now} load level raised"));
            ctx.counters.inc("load-level-up");
            info!("load level raised");
            spawn_read_write_users(&cancel, &world, world.active_channel_id(), LEVELUP_STEP);
            spawn_read_only_users(&cancel, &world, world.inactive_channel_id(), LEVELUP_STEP);
        }
    }
}

/// Logs the aggregated request counters, most frequent first, with the
/// parameterized paths collapsed into `*` buckets.
fn log_counter_summary(ctx: &BenchContext) {
    let mut merged: std::collections::HashMap<String, i64> = std::collections::HashMap::new();
    for (key, count) in ctx.counters.snapshot() {
        let bucket = if key.starts_with("GET|/history/") {
            "GET|/history/*".to_string()
        } else if key.starts_with("GET|/message?") {
            "GET|/message?*".to_string()
        } else if key.starts_with("GET|/icons/") {
            "GET|/icons/*".to_string()
        } else if key.starts_with("GET|/channel/") {
            "GET|/channel/*".to_string()
        } else if key.starts_with("GET|/profile/") {
            "GET|/profile/*".to_string()
        } else {
            key
        };
        *merged.entry(bucket).or_insert(0) += count;
    }

    let mut entries: Vec<(String, i64)> = merged.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1));

    info!("----- request counts -----");
    for (key, count) in &entries {
        if key.starts_with("GET|") || key.starts_with("POST|") {
            info!("{key} {count}");
        }
    }
    info!("----- other counts -----");
    for (key, count) in &entries {
        if !key.starts_with("GET|") && !key.starts_with("POST|") {
            info!("{key} {count}");
        }
    }
    info!("--------------------------");
}
