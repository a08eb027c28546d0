use isubench::core::counter::CounterRegistry;
use regex::Regex;

#[tokio::test]
async fn test_counter_inc_and_get() {
    let counters = CounterRegistry::new();
    assert_eq!(counters.get("GET|/"), 0);

    counters.inc("GET|/");
    counters.inc("GET|/");
    counters.inc("POST|/login");
    assert_eq!(counters.get("GET|/"), 2);
    assert_eq!(counters.get("POST|/login"), 1);
}

#[tokio::test]
async fn test_counter_add_negative_delta() {
    let counters = CounterRegistry::new();
    counters.add("balance", 10);
    counters.add("balance", -3);
    assert_eq!(counters.get("balance"), 7);
}

#[tokio::test]
async fn test_counter_sum_prefix() {
    let counters = CounterRegistry::new();
    counters.add("GET|/channel/1", 5);
    counters.add("GET|/channel/2", 7);
    counters.add("GET|/fetch", 11);
    counters.add("POST|/message", 13);

    assert_eq!(counters.sum_prefix("GET|/"), 23);
    assert_eq!(counters.sum_prefix("GET|/channel/"), 12);
    assert_eq!(counters.sum_prefix("POST|/"), 13);
    assert_eq!(counters.sum_prefix("DELETE|/"), 0);
}

#[tokio::test]
async fn test_counter_sum_matching_regex() {
    let counters = CounterRegistry::new();
    counters.add("GET|/message?channel_id=1", 2);
    counters.add("GET|/message?channel_id=2", 3);
    counters.add("GET|/history/1", 4);

    let re = Regex::new(r"^GET\|/message\?").unwrap();
    assert_eq!(counters.sum_matching(&re), 5);
}

#[tokio::test]
async fn test_counter_snapshot_is_a_copy() {
    let counters = CounterRegistry::new();
    counters.inc("a");
    let snapshot = counters.snapshot();
    counters.inc("a");

    assert_eq!(snapshot.get("a"), Some(&1));
    assert_eq!(counters.get("a"), 2);
}
