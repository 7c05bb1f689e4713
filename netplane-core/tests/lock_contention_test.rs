//! Distributed lock under contention from many workers and several nodes

use netplane_core::config::LockConfig;
use netplane_core::lock::LockManager;
use netplane_core::Store;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WORKERS: usize = 50;

fn lock_config() -> LockConfig {
    LockConfig {
        default_timeout: Duration::from_secs(1),
        lease_ttl: Duration::from_secs(30),
        min_poll_interval: Duration::from_millis(1),
        max_poll_interval: Duration::from_millis(10),
    }
}

#[derive(Default)]
struct Tally {
    holders: AtomicUsize,
    max_holders: AtomicUsize,
    acquired: AtomicUsize,
    timed_out: AtomicUsize,
    tokens: Mutex<Vec<u64>>,
}

async fn contend(
    managers: Vec<Arc<LockManager>>,
    hold: Duration,
    timeout: Duration,
) -> Arc<Tally> {
    let tally = Arc::new(Tally::default());
    let mut handles = Vec::new();

    for worker in 0..WORKERS {
        let manager = managers[worker % managers.len()].clone();
        let tally = tally.clone();
        handles.push(tokio::spawn(async move {
            let owner = format!("worker-{}", worker);
            let lock = manager.get("vm-operation-1");
            if !lock.acquire(&owner, timeout).await.unwrap() {
                tally.timed_out.fetch_add(1, Ordering::SeqCst);
                return;
            }

            let holders = tally.holders.fetch_add(1, Ordering::SeqCst) + 1;
            tally.max_holders.fetch_max(holders, Ordering::SeqCst);
            let token = lock.fencing_token(&owner).unwrap().unwrap();
            tally.tokens.lock().push(token);

            tokio::time::sleep(hold).await;

            tally.holders.fetch_sub(1, Ordering::SeqCst);
            tally.acquired.fetch_add(1, Ordering::SeqCst);
            assert!(lock.release(&owner).unwrap());
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }
    tally
}

fn assert_strictly_increasing(tokens: &[u64]) {
    for pair in tokens.windows(2) {
        assert!(pair[0] < pair[1], "fencing tokens out of order: {:?}", tokens);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_node_workers_hold_lock_one_at_a_time() {
    let store = Store::in_memory().unwrap();
    let manager = Arc::new(LockManager::new(1, store, lock_config()));

    let tally = contend(vec![manager.clone()], Duration::from_millis(1), Duration::from_secs(10)).await;

    assert_eq!(tally.max_holders.load(Ordering::SeqCst), 1);
    assert_eq!(tally.acquired.load(Ordering::SeqCst), WORKERS);
    assert_eq!(tally.timed_out.load(Ordering::SeqCst), 0);
    assert_strictly_increasing(&tally.tokens.lock());

    let lock = manager.get("vm-operation-1");
    assert!(!lock.is_locked().unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_nodes_sharing_a_store_exclude_each_other() {
    let store = Store::in_memory().unwrap();
    let managers = vec![
        Arc::new(LockManager::new(1, store.clone(), lock_config())),
        Arc::new(LockManager::new(2, store.clone(), lock_config())),
        Arc::new(LockManager::new(3, store, lock_config())),
    ];

    let tally = contend(managers.clone(), Duration::from_millis(1), Duration::from_secs(10)).await;

    assert_eq!(tally.max_holders.load(Ordering::SeqCst), 1);
    assert_eq!(tally.acquired.load(Ordering::SeqCst), WORKERS);
    assert_strictly_increasing(&tally.tokens.lock());

    // One row for the name, visible from every node
    let entries = managers[2].list().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].count, 0);
    assert_eq!(entries[0].deadline_ms, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_waiters_give_up_after_their_timeout() {
    let store = Store::in_memory().unwrap();
    let manager = Arc::new(LockManager::new(1, store, lock_config()));

    let tally = contend(vec![manager], Duration::from_millis(20), Duration::from_millis(100)).await;

    let acquired = tally.acquired.load(Ordering::SeqCst);
    let timed_out = tally.timed_out.load(Ordering::SeqCst);
    assert_eq!(tally.max_holders.load(Ordering::SeqCst), 1);
    assert_eq!(acquired + timed_out, WORKERS);
    assert!(acquired >= 1);
    // 50 holds of 20ms cannot fit in a 100ms wait
    assert!(timed_out > 0);
    assert_strictly_increasing(&tally.tokens.lock());
}

#[tokio::test]
async fn test_stale_holder_token_is_rejected_after_handover() {
    let store = Store::in_memory().unwrap();
    let node_1 = LockManager::new(1, store.clone(), lock_config());
    let node_2 = LockManager::new(2, store, lock_config());

    let lock = node_1.get("vm-operation-9");
    assert!(lock.acquire("migrate", Duration::from_millis(50)).await.unwrap());
    let first = lock.fencing_token("migrate").unwrap().unwrap();
    assert!(lock.validate_token(first).unwrap());
    assert!(lock.release("migrate").unwrap());
    assert!(!lock.validate_token(first).unwrap());

    let other = node_2.get("vm-operation-9");
    assert!(other.acquire("scale", Duration::from_millis(50)).await.unwrap());
    let second = other.fencing_token("scale").unwrap().unwrap();
    assert!(second > first);
    assert!(!other.validate_token(first).unwrap());
    assert!(other.validate_token(second).unwrap());

    // Node 1 cannot release a hold it does not own
    assert!(!lock.release("migrate").unwrap());
    assert!(other.is_locked().unwrap());
}
