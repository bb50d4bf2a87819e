//! Scheduler sweep behavior over a real database

use async_trait::async_trait;
use chrono::{Duration, Utc};
use coursive_engine::db::Database;
use coursive_engine::scheduler::{ReadyNotifier, Scheduler};
use sdk::types::ReadyNotification;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Mutex;

/// Collects every notification it receives
struct Collector(Mutex<Vec<ReadyNotification>>);

#[async_trait]
impl ReadyNotifier for Collector {
    async fn notify(&self, notification: ReadyNotification) -> anyhow::Result<()> {
        self.0.lock().await.push(notification);
        Ok(())
    }
}

#[tokio::test]
async fn due_entries_fire_exactly_once() {
    let dir = TempDir::new().unwrap();
    let db = Database::new(&dir.path().join("test.db")).await.unwrap();

    let collector = Arc::new(Collector(Mutex::new(Vec::new())));
    let scheduler = Scheduler::new(db.waiting(), Arc::clone(&collector) as Arc<dyn ReadyNotifier>);

    let now = Utc::now();
    scheduler
        .register(1, "demo", Some("m_1"), now - Duration::minutes(5))
        .await
        .unwrap();
    scheduler
        .register(2, "demo", None, now + Duration::hours(1))
        .await
        .unwrap();

    // First sweep: only the overdue entry fires.
    let fired = scheduler.sweep(now).await.unwrap();
    assert_eq!(fired, 1);
    {
        let seen = collector.0.lock().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].chat_id, 1);
        assert_eq!(seen[0].target_element_id.as_deref(), Some("m_1"));
    }

    // Sweeping again never re-fires a consumed entry.
    let fired = scheduler.sweep(now).await.unwrap();
    assert_eq!(fired, 0);
    assert_eq!(collector.0.lock().await.len(), 1);

    // Once time passes, the second entry fires — once.
    let later = now + Duration::hours(2);
    assert_eq!(scheduler.sweep(later).await.unwrap(), 1);
    assert_eq!(scheduler.sweep(later).await.unwrap(), 0);

    let seen = collector.0.lock().await;
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1].chat_id, 2);
    assert_eq!(seen[1].target_element_id, None);
}

#[tokio::test]
async fn entries_survive_a_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.db");

    let now = Utc::now();
    {
        let db = Database::new(&path).await.unwrap();
        let scheduler = Scheduler::new(db.waiting(), Arc::new(Collector(Mutex::new(Vec::new()))));
        scheduler
            .register(5, "demo", Some("m_9"), now - Duration::seconds(1))
            .await
            .unwrap();
        db.close().await.unwrap();
    }

    // A fresh process picks the durable entry up.
    let db = Database::new(&path).await.unwrap();
    let collector = Arc::new(Collector(Mutex::new(Vec::new())));
    let scheduler = Scheduler::new(db.waiting(), Arc::clone(&collector) as Arc<dyn ReadyNotifier>);

    assert_eq!(scheduler.sweep(now).await.unwrap(), 1);
    let seen = collector.0.lock().await;
    assert_eq!(seen[0].chat_id, 5);
}
