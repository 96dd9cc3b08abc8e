//! Integration tests for the work queue
//!
//! These drive the queue from many concurrent takers the way the worker pool
//! does, with a take delay to widen the window between picking an item and
//! removing it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use playlist_fetcher::app::queue::{WorkQueue, WorkQueueConfig};
use playlist_fetcher::app::{prepare_items, Item};
use playlist_fetcher::errors::QueueError;

async fn drain(queue: Arc<WorkQueue>) -> Vec<Item> {
    let mut taken = Vec::new();
    while let Some(item) = queue.try_take().await {
        taken.push(item);
        tokio::task::yield_now().await;
    }
    taken
}

/// Test exactly-once delivery under contention
///
/// Verifies that eight concurrent takers never receive the same item twice
/// and that together they receive every seeded item.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_takers_receive_each_item_once() {
    let queue = Arc::new(WorkQueue::with_config(WorkQueueConfig::with_take_delay(
        Duration::from_millis(2),
    )));
    let names: Vec<String> = (0..60).map(|i| format!("Artist {} - Song {}", i % 7, i)).collect();
    queue.seed(prepare_items(&names)).await.unwrap();

    let handles: Vec<_> = (0..8).map(|_| tokio::spawn(drain(queue.clone()))).collect();
    let mut ids = HashSet::new();
    let mut total = 0;
    for handle in handles {
        for item in handle.await.unwrap() {
            total += 1;
            assert!(ids.insert(item.id()), "item {} taken twice", item);
        }
    }

    assert_eq!(total, 60);
    let stats = queue.stats().await;
    assert_eq!(stats.seeded, 60);
    assert_eq!(stats.taken, 60);
    assert_eq!(stats.remaining, 0);
}

/// Test duplicate names
///
/// Verifies that a name listed twice is delivered twice, as two items with
/// distinct ids.
#[tokio::test]
async fn test_duplicate_names_are_independent_items() {
    let queue = Arc::new(WorkQueue::new());
    queue
        .seed(prepare_items(["Toto - Africa", "Toto - Africa", "Queen - Innuendo"]))
        .await
        .unwrap();

    let (a, b) = tokio::join!(drain(queue.clone()), drain(queue.clone()));
    let mut africa: Vec<u64> = a
        .iter()
        .chain(b.iter())
        .filter(|item| item.name() == "Toto - Africa")
        .map(Item::id)
        .collect();
    africa.sort_unstable();
    africa.dedup();
    assert_eq!(africa.len(), 2);
}

#[tokio::test]
async fn test_seed_only_once() {
    let queue = WorkQueue::new();
    assert_eq!(queue.seed(prepare_items(["A - One"])).await.unwrap(), 1);

    let error = queue.seed(prepare_items(["B - Two"])).await.unwrap_err();
    assert!(matches!(error, QueueError::AlreadySeeded { count: 1 }));
    assert_eq!(queue.remaining_names().await, vec!["A - One".to_string()]);
}

#[tokio::test]
async fn test_empty_queue_returns_none() {
    let queue = WorkQueue::new();
    assert!(queue.try_take().await.is_none());

    queue.seed(Vec::new()).await.unwrap();
    assert!(queue.is_empty().await);
    assert!(queue.try_take().await.is_none());
}
