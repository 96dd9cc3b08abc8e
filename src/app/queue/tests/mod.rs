//! Unit tests for queue module components
//!
//! Cross-worker exclusivity under load is covered by the integration tests in
//! `tests/queue.rs`; these tests pin down the single-caller contract.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};

use super::*;
use crate::app::models::prepare_items;

#[tokio::test]
async fn test_seed_then_drain() {
    let queue = WorkQueue::new();
    let seeded = assert_ok!(queue.seed(prepare_items(["A - 1", "B - 2", "C - 3"])).await);
    assert_eq!(seeded, 3);
    assert_eq!(queue.len().await, 3);

    let mut names = Vec::new();
    while let Some(item) = queue.try_take().await {
        names.push(item.name().to_string());
    }

    names.sort();
    assert_eq!(names, vec!["A - 1", "B - 2", "C - 3"]);
    assert!(queue.is_empty().await);

    let stats = queue.stats().await;
    assert_eq!(stats.seeded, 3);
    assert_eq!(stats.taken, 3);
    assert!(stats.is_drained());
}

/// Empty is a normal terminal signal and stays that way
#[tokio::test]
async fn test_empty_queue_returns_none_repeatedly() {
    let queue = WorkQueue::new();
    assert!(queue.try_take().await.is_none());

    assert_ok!(queue.seed(Vec::new()).await);
    assert!(queue.try_take().await.is_none());
    assert!(queue.try_take().await.is_none());
    assert_eq!(queue.stats().await.drained_percentage(), 100.0);
}

#[tokio::test]
async fn test_second_seed_is_rejected() {
    let queue = WorkQueue::new();
    assert_ok!(queue.seed(prepare_items(["A - 1"])).await);
    assert_err!(queue.seed(prepare_items(["B - 2"])).await);

    assert_eq!(queue.len().await, 1);
    assert_eq!(queue.remaining_names().await, vec!["A - 1".to_string()]);
}

#[tokio::test]
async fn test_duplicate_names_are_both_handed_out() {
    let queue = WorkQueue::new();
    assert_ok!(queue.seed(prepare_items(["Same - Song", "Same - Song"])).await);

    let first = queue.try_take().await.unwrap();
    let second = queue.try_take().await.unwrap();

    assert_eq!(first.name(), second.name());
    assert_ne!(first.id(), second.id());
    assert!(queue.try_take().await.is_none());
}

/// Two concurrent takers never receive the same item, even when the lock is
/// held long enough for both to be waiting on it
#[tokio::test]
async fn test_two_takers_with_delay_never_share_an_item() {
    let queue = Arc::new(WorkQueue::with_config(WorkQueueConfig::with_take_delay(
        Duration::from_millis(5),
    )));
    assert_ok!(queue.seed(prepare_items((0..20).map(|i| format!("Artist{} - Song{}", i, i)))).await);

    let takers: Vec<_> = (0..2)
        .map(|_| {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                let mut taken = Vec::new();
                while let Some(item) = queue.try_take().await {
                    taken.push(item.id());
                }
                taken
            })
        })
        .collect();

    let mut all = Vec::new();
    for taker in takers {
        all.extend(taker.await.unwrap());
    }

    let unique: HashSet<u64> = all.iter().copied().collect();
    assert_eq!(all.len(), 20);
    assert_eq!(unique.len(), 20);
}
