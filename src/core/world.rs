// src/core/world.rs

//! The benchmark's model of the target application: user pools, channel
//! partitions, and the message tables that bound every channel's unread
//! count.
//!
//! Two mutexes split the state so message validation never blocks user
//! checkout. Neither lock is ever held across I/O.

use crate::core::checker::Checker;
use crate::core::context::BenchContext;
use crate::core::dataset::{AppUser, Channel, DataSet};
use anyhow::{Result, bail};
use parking_lot::Mutex;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A message entry from `GET /message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonMessage {
    pub id: i64,
    pub content: String,
    pub date: String,
    pub user: JsonUser,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonUser {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub avatar_icon: String,
}

/// One entry from `GET /fetch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonUnreadInfo {
    pub channel_id: i64,
    pub unread: i64,
}

/// A message's send got as far as the response's date string must allow.
#[derive(Debug)]
struct MessageRecord {
    user_name: String,
    send_begin: Option<Instant>,
    send_end: Option<Instant>,
    send_complete: bool,
}

#[derive(Debug, Default)]
struct MessageTable {
    /// channel id -> message content -> record. Content is unique per
    /// channel, which is what lets responses be cross-referenced by text.
    by_channel: HashMap<i64, HashMap<String, MessageRecord>>,
    min_cnt: HashMap<i64, i64>,
    max_cnt: HashMap<i64, i64>,
}

#[derive(Default)]
struct WorldInner {
    users: Vec<Arc<AppUser>>,
    new_users: Vec<Arc<AppUser>>,
    user_map: HashMap<String, Arc<AppUser>>,
    checker_map: HashMap<String, Arc<Checker>>,
    channel_map: HashMap<i64, Arc<Channel>>,
    active_channel_ids: Vec<i64>,
    inactive_channel_ids: Vec<i64>,
    msg_check_channel_ids: Vec<i64>,
    tmp_channel_ids: Vec<i64>,
    fetch_check_user: Option<Arc<AppUser>>,
}

pub struct World {
    ctx: Arc<BenchContext>,
    dataset: Arc<DataSet>,
    inner: Mutex<WorldInner>,
    msgs: Mutex<MessageTable>,
}

/// Completion handle returned by a successful message reservation. Completing
/// is idempotent; it raises the channel's lower unread bound once the 204 has
/// been observed.
pub struct SendHandle<'a> {
    world: &'a World,
    channel_id: i64,
    content: String,
}

impl SendHandle<'_> {
    pub fn complete(&self) {
        let mut table = self.world.msgs.lock();
        let table = &mut *table;
        if let Some(rec) = table
            .by_channel
            .get_mut(&self.channel_id)
            .and_then(|m| m.get_mut(&self.content))
        {
            if !rec.send_complete {
                rec.send_complete = true;
                *table.min_cnt.entry(self.channel_id).or_insert(0) += 1;
            }
            rec.send_end = Some(Instant::now());
        }
    }
}

impl World {
    pub fn new(ctx: Arc<BenchContext>, dataset: Arc<DataSet>) -> Result<Arc<Self>> {
        let world = Arc::new(Self {
            ctx,
            dataset: Arc::clone(&dataset),
            inner: Mutex::new(WorldInner::default()),
            msgs: Mutex::new(MessageTable::default()),
        });

        {
            let mut inner = world.inner.lock();
            inner.users = dataset.users.clone();
            inner.new_users = dataset.new_users.clone();
            for user in &dataset.users {
                inner.user_map.insert(user.name.clone(), Arc::clone(user));
            }

            let mut order: Vec<usize> = (0..dataset.channels.len()).collect();
            order.shuffle(&mut rand::thread_rng());
            for (i, channel) in dataset.channels.iter().enumerate() {
                inner.channel_map.insert(channel.id, Arc::clone(channel));
                if i == order[0] {
                    inner.active_channel_ids.push(channel.id);
                } else if i == order[1] {
                    inner.msg_check_channel_ids.push(channel.id);
                } else {
                    inner.inactive_channel_ids.push(channel.id);
                }
            }
        }

        for msg in &dataset.messages {
            if !world.insert_message(msg.channel_id, &msg.user_name, &msg.content, true) {
                bail!("duplicated message in the dataset");
            }
        }

        Ok(world)
    }

    pub fn context(&self) -> &Arc<BenchContext> {
        &self.ctx
    }

    pub fn dataset(&self) -> &Arc<DataSet> {
        &self.dataset
    }

    // --- user pool ---

    /// Removes and returns a random existing user with its checker. Callers
    /// re-insert the user with `push_user` when done with it.
    pub fn pop_random_user(&self) -> Option<(Arc<AppUser>, Arc<Checker>)> {
        let mut inner = self.inner.lock();
        if inner.users.is_empty() {
            return None;
        }
        let i = rand::thread_rng().gen_range(0..inner.users.len());
        let user = inner.users.swap_remove(i);
        let checker = Self::checker_locked(&self.ctx, &mut inner, &user);
        Some((user, checker))
    }

    /// Pops the most recently added unregistered user.
    pub fn pop_new_user(&self) -> Option<(Arc<AppUser>, Arc<Checker>)> {
        let mut inner = self.inner.lock();
        let user = inner.new_users.pop()?;
        let checker = Self::checker_locked(&self.ctx, &mut inner, &user);
        Some((user, checker))
    }

    pub fn push_user(&self, user: Arc<AppUser>) {
        let mut inner = self.inner.lock();
        inner.user_map.insert(user.name.clone(), Arc::clone(&user));
        inner.users.push(user);
    }

    pub fn find_user_by_name(&self, name: &str) -> Option<Arc<AppUser>> {
        self.inner.lock().user_map.get(name).cloned()
    }

    pub fn get_checker(&self, user: &AppUser) -> Arc<Checker> {
        let mut inner = self.inner.lock();
        Self::checker_locked(&self.ctx, &mut inner, user)
    }

    fn checker_locked(
        ctx: &Arc<BenchContext>,
        inner: &mut WorldInner,
        user: &AppUser,
    ) -> Arc<Checker> {
        inner
            .checker_map
            .entry(user.name.clone())
            .or_insert_with(|| {
                let checker = Checker::new(Arc::clone(ctx));
                checker.tag_user(&user.name);
                Arc::new(checker)
            })
            .clone()
    }

    pub fn set_fetch_check_user(&self, user: Arc<AppUser>) {
        self.inner.lock().fetch_check_user = Some(user);
    }

    pub fn fetch_check_user(&self) -> Option<Arc<AppUser>> {
        self.inner.lock().fetch_check_user.clone()
    }

    // --- channels ---

    /// Registers a channel created during the run; it sits in the `tmp`
    /// partition until `distribute_tmp_channels` runs.
    pub fn add_channel(&self, id: i64, channel: Channel) {
        let mut inner = self.inner.lock();
        inner.channel_map.insert(id, Arc::new(channel));
        inner.tmp_channel_ids.push(id);
    }

    /// Moves `tmp` channels into the load partitions: active grows to at
    /// least 5, message-check to at least 2, the rest go inactive.
    pub fn distribute_tmp_channels(&self) {
        let mut inner = self.inner.lock();
        let mut tmp = std::mem::take(&mut inner.tmp_channel_ids);
        tmp.shuffle(&mut rand::thread_rng());
        for id in tmp {
            if inner.active_channel_ids.len() < 5 {
                inner.active_channel_ids.push(id);
            } else if inner.msg_check_channel_ids.len() < 2 {
                inner.msg_check_channel_ids.push(id);
            } else {
                inner.inactive_channel_ids.push(id);
            }
        }
    }

    pub fn total_channel_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.active_channel_ids.len()
            + inner.inactive_channel_ids.len()
            + inner.msg_check_channel_ids.len()
            + inner.tmp_channel_ids.len()
    }

    pub fn get_channel(&self, id: i64) -> Option<Arc<Channel>> {
        self.inner.lock().channel_map.get(&id).cloned()
    }

    pub fn random_channel_id(&self) -> i64 {
        if rand::thread_rng().gen_range(0..100) < 50 {
            self.active_channel_id()
        } else {
            self.inactive_channel_id()
        }
    }

    pub fn active_channel_id(&self) -> i64 {
        let inner = self.inner.lock();
        inner.active_channel_ids[rand::thread_rng().gen_range(0..inner.active_channel_ids.len())]
    }

    pub fn inactive_channel_id(&self) -> i64 {
        let inner = self.inner.lock();
        inner.inactive_channel_ids
            [rand::thread_rng().gen_range(0..inner.inactive_channel_ids.len())]
    }

    pub fn msg_check_channel_id(&self) -> i64 {
        let inner = self.inner.lock();
        inner.msg_check_channel_ids
            [rand::thread_rng().gen_range(0..inner.msg_check_channel_ids.len())]
    }

    // --- messages and unread bounds ---

    /// Reserves a message about to be posted. Fails when the channel already
    /// carries the same content. The upper unread bound rises immediately;
    /// the lower bound rises when the returned handle is completed.
    pub fn add_send_message(
        &self,
        channel_id: i64,
        user_name: &str,
        content: &str,
    ) -> Option<SendHandle<'_>> {
        if !self.insert_message(channel_id, user_name, content, false) {
            return None;
        }
        Some(SendHandle {
            world: self,
            channel_id,
            content: content.to_string(),
        })
    }

    fn insert_message(&self, channel_id: i64, user_name: &str, content: &str, preseeded: bool) -> bool {
        let mut table = self.msgs.lock();
        let table = &mut *table;
        let per_channel = table.by_channel.entry(channel_id).or_default();
        if per_channel.contains_key(content) {
            return false;
        }

        *table.max_cnt.entry(channel_id).or_insert(0) += 1;
        if preseeded {
            *table.min_cnt.entry(channel_id).or_insert(0) += 1;
        }
        per_channel.insert(
            content.to_string(),
            MessageRecord {
                user_name: user_name.to_string(),
                send_begin: (!preseeded).then(Instant::now),
                send_end: None,
                send_complete: preseeded,
            },
        );
        true
    }

    /// Validates one `GET /message` entry against the known sends.
    pub fn validate_json_message(&self, channel_id: i64, msg: &JsonMessage) -> Result<(), String> {
        let table = self.msgs.lock();
        let Some(per_channel) = table.by_channel.get(&channel_id) else {
            return Err("message in a channel nobody posted to".to_string());
        };
        let Some(record) = per_channel.get(msg.content.trim()) else {
            return Err(format!("unknown message content: {:?}", msg.content.trim()));
        };

        if record.user_name != msg.user.name {
            return Err("message author does not match".to_string());
        }
        if !valid_date_shape(&msg.date) {
            return Err("message date has the wrong format".to_string());
        }

        if let Some(begin) = record.send_begin
            && begin.elapsed() < Duration::from_millis(200)
        {
            self.ctx.counters.inc("message-bonus");
        }

        Ok(())
    }

    /// Validates one chat-log entry against the known sends.
    pub fn validate_history_message(
        &self,
        channel_id: i64,
        user_name: &str,
        content: &str,
        date: &str,
    ) -> Result<(), String> {
        let table = self.msgs.lock();
        let Some(per_channel) = table.by_channel.get(&channel_id) else {
            return Err("message in a channel nobody posted to".to_string());
        };
        let Some(record) = per_channel.get(content.trim()) else {
            return Err(format!("unknown message content: {:?}", content.trim()));
        };

        if record.user_name != user_name {
            return Err("message author does not match".to_string());
        }
        if !valid_date_shape(date.trim()) {
            return Err("message date has the wrong format".to_string());
        }

        Ok(())
    }

    /// Copies of the per-channel unread bounds.
    pub fn snapshot_message_count(&self) -> (HashMap<i64, i64>, HashMap<i64, i64>) {
        let table = self.msgs.lock();
        (table.min_cnt.clone(), table.max_cnt.clone())
    }
}

/// `YYYY/MM/DD HH:MM:SS`: 19 bytes, two slashes, two colons, one space.
pub fn valid_date_shape(date: &str) -> bool {
    date.len() == 19
        && date.matches(':').count() == 2
        && date.matches('/').count() == 2
        && date.matches(' ').count() == 1
}
