use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hive_relay::workers::WorkerManager;

#[tokio::test]
async fn registered_worker_shows_active_until_done() {
    let manager = WorkerManager::new();
    let handle = tokio::spawn(async {
        tokio::time::sleep(Duration::from_millis(200)).await;
    });
    manager.register("t1", handle, "sleepy task");

    let active = manager.active();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].0, "t1");
    assert_eq!(active[0].1, "sleepy task");
}

#[tokio::test]
async fn cancel_aborts_running_worker() {
    let manager = WorkerManager::new();
    let completed = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&completed);
    let handle = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        flag.store(true, Ordering::SeqCst);
    });
    manager.register("t1", handle, "never finishes");

    assert!(manager.cancel("t1"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!completed.load(Ordering::SeqCst));
    assert!(!manager.cancel("t1"), "already-finished worker is not cancellable");
}

#[tokio::test]
async fn cancel_unknown_worker_is_false() {
    let manager = WorkerManager::new();
    assert!(!manager.cancel("ghost"));
}

#[tokio::test]
async fn cancel_all_stops_everything() {
    let manager = WorkerManager::new();
    for i in 0..3 {
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        manager.register(&format!("t{i}"), handle, "");
    }
    manager.cancel_all().await;
    assert!(manager.active().is_empty());
}

#[tokio::test]
async fn unregister_drops_tracking() {
    let manager = WorkerManager::new();
    let handle = tokio::spawn(async {});
    manager.register("t1", handle, "");
    manager.unregister("t1");
    assert!(manager.active().is_empty());
}
