// tests/property_test.rs

//! Property-based tests for the invariants the validators rely on: the
//! unread-bounds window, counter aggregation, and the date-shape check.

use bytes::Bytes;
use isubench::core::context::BenchContext;
use isubench::core::counter::CounterRegistry;
use isubench::core::dataset::{AppUser, Avatar, Channel, DataSet};
use isubench::core::world::{World, valid_date_shape};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

fn tiny_world() -> Arc<World> {
    let avatar = Arc::new(Avatar {
        file_name: "a.png".to_string(),
        sha1: String::new(),
        md5: String::new(),
        bytes: Bytes::from_static(b"png"),
    });
    let dataset = Arc::new(DataSet {
        users: vec![Arc::new(AppUser {
            name: "alice".to_string(),
            password: "aliceecila".to_string(),
            display_name: "Alice".to_string(),
            avatar: Mutex::new(Some(Arc::clone(&avatar))),
        })],
        new_users: vec![],
        channels: (1..=10)
            .map(|i| {
                Arc::new(Channel {
                    id: i,
                    name: format!("channel{i}"),
                    description: format!("this is channel{i}"),
                })
            })
            .collect(),
        avatars: vec![Arc::clone(&avatar)],
        large_avatars: vec![Arc::clone(&avatar)],
        default_avatar: avatar,
        texts: vec!["hello".to_string()],
        messages: vec![],
    });
    let ctx = BenchContext::new(vec!["127.0.0.1:1".to_string()], false);
    World::new(ctx, dataset).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        ..ProptestConfig::default()
    })]

    /// `0 <= min <= max` holds after every reserve/complete interleaving,
    /// both bounds only ever grow, and completing everything closes the gap.
    #[test]
    fn unread_bounds_hold_under_any_interleaving(
        ops in prop::collection::vec((1i64..=3, 0usize..200, any::<bool>()), 1..=100)
    ) {
        let world = tiny_world();
        let mut outstanding = Vec::new();
        let mut expected_min: HashMap<i64, i64> = HashMap::new();
        let mut expected_max: HashMap<i64, i64> = HashMap::new();

        for (channel_id, text_id, complete_now) in ops {
            let content = format!("text-{text_id}");
            if let Some(handle) = world.add_send_message(channel_id, "alice", &content) {
                *expected_max.entry(channel_id).or_insert(0) += 1;
                if complete_now {
                    handle.complete();
                    *expected_min.entry(channel_id).or_insert(0) += 1;
                } else {
                    outstanding.push(handle);
                }
            }

            let (min_map, max_map) = world.snapshot_message_count();
            for channel_id in 1..=3i64 {
                let lo = min_map.get(&channel_id).copied().unwrap_or(0);
                let hi = max_map.get(&channel_id).copied().unwrap_or(0);
                prop_assert!(0 <= lo && lo <= hi);
                prop_assert_eq!(lo, expected_min.get(&channel_id).copied().unwrap_or(0));
                prop_assert_eq!(hi, expected_max.get(&channel_id).copied().unwrap_or(0));
            }
        }

        // Completing every outstanding send closes the window; a second
        // completion changes nothing.
        for _ in 0..2 {
            for handle in &outstanding {
                handle.complete();
            }
            let (min_map, max_map) = world.snapshot_message_count();
            prop_assert_eq!(&min_map, &max_map);
        }
    }

    #[test]
    fn sum_prefix_matches_a_manual_snapshot_sum(
        entries in prop::collection::hash_map("[a-c]{1,6}", -100i64..100, 0..30),
        prefix in "[a-c]{0,2}"
    ) {
        let counters = CounterRegistry::new();
        for (key, value) in &entries {
            counters.add(key.clone(), *value);
        }

        let expected: i64 = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix.as_str()))
            .map(|(_, value)| value)
            .sum();
        prop_assert_eq!(counters.sum_prefix(&prefix), expected);
    }

    /// Every timestamp formatted the application's way passes the shape
    /// check.
    #[test]
    fn formatted_dates_always_pass_the_shape_check(secs in 0i64..4_000_000_000) {
        let formatted = chrono::DateTime::from_timestamp(secs, 0)
            .unwrap()
            .format("%Y/%m/%d %H:%M:%S")
            .to_string();
        prop_assert!(valid_date_shape(&formatted));
    }
}
