use isubench::core::transport::HostPool;
use std::sync::Arc;

fn pool(n: usize) -> Arc<HostPool> {
    let hosts = (0..n).map(|i| format!("10.0.0.{i}:8080")).collect();
    Arc::new(HostPool::new(hosts))
}

#[tokio::test]
async fn test_acquire_prefers_the_least_loaded_host() {
    let pool = pool(3);

    let first = pool.acquire();
    let second = pool.acquire();
    let third = pool.acquire();

    // With one slot held on every host, each host carries exactly one.
    assert_eq!(pool.in_flight_snapshot(), vec![1, 1, 1]);

    let freed = second.host().to_string();
    drop(second);
    let replacement = pool.acquire();
    assert_eq!(replacement.host(), freed);

    drop(first);
    drop(third);
    drop(replacement);
    assert_eq!(pool.in_flight_snapshot(), vec![0, 0, 0]);
}

#[tokio::test]
async fn test_slots_release_on_drop() {
    let pool = pool(2);
    {
        let _a = pool.acquire();
        let _b = pool.acquire();
        let _c = pool.acquire();
        assert_eq!(pool.in_flight_snapshot().iter().sum::<usize>(), 3);
    }
    assert_eq!(pool.in_flight_snapshot(), vec![0, 0]);
}

#[tokio::test]
async fn test_single_host_pool() {
    let pool = pool(1);
    let slot = pool.acquire();
    assert_eq!(slot.host(), "10.0.0.0:8080");
    assert_eq!(pool.random_host(), "10.0.0.0:8080");
}

#[tokio::test]
async fn test_counts_never_go_negative() {
    let pool = pool(2);
    let slot = pool.acquire();
    drop(slot);
    assert_eq!(pool.in_flight_snapshot(), vec![0, 0]);
}
