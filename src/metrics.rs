//! Live database metrics shown alongside the feed
//!
//! Both metrics are exposed as watch channels that republish whenever the
//! underlying data changes, and only when the value actually differs.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::db::Database;

/// Metric snapshot carried into the feed state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Metrics {
    /// Subscriptions whose feed was never loaded
    pub not_loaded_count: u64,
    /// Earliest subscription update, absent when none was ever updated
    pub oldest_update: Option<DateTime<Utc>>,
}

/// Earliest of the supplied timestamps
pub fn oldest_update(updates: &[DateTime<Utc>]) -> Option<DateTime<Utc>> {
    updates.iter().min().copied()
}

/// Producer of the two feed metrics
pub trait MetricSources: Send + Sync {
    /// Not-loaded subscription count, republished as it changes
    fn not_loaded_count(&self, group_id: i64) -> watch::Receiver<u64>;

    /// Every subscription update timestamp of the group, republished as it changes
    fn subscription_updates(&self, group_id: i64) -> watch::Receiver<Vec<DateTime<Utc>>>;
}

/// [`MetricSources`] backed by the feed database
#[derive(Clone)]
pub struct DatabaseMetrics {
    db: Arc<Database>,
}

impl DatabaseMetrics {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl MetricSources for DatabaseMetrics {
    fn not_loaded_count(&self, group_id: i64) -> watch::Receiver<u64> {
        watch_query(self.db.clone(), move |db| db.not_loaded_count(group_id))
    }

    fn subscription_updates(&self, group_id: i64) -> watch::Receiver<Vec<DateTime<Utc>>> {
        watch_query(self.db.clone(), move |db| db.subscription_updates(group_id))
    }
}

/// Run `query` in the background now and again after every database write.
///
/// The receiver holds `T::default()` until the first query finishes. The
/// watcher task stops once every receiver is dropped.
fn watch_query<T, F>(db: Arc<Database>, query: F) -> watch::Receiver<T>
where
    T: PartialEq + Default + Send + Sync + 'static,
    F: Fn(&Database) -> Result<T> + Send + Sync + 'static,
{
    // Subscribed before the first query, so a write racing it still re-queries
    let mut revision = db.revision();
    let (tx, rx) = watch::channel(T::default());
    let query = Arc::new(query);

    tokio::spawn(async move {
        requery(&db, &query, &tx).await;
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                changed = revision.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    requery(&db, &query, &tx).await;
                }
            }
        }
        tracing::debug!("Metric watcher stopped");
    });

    rx
}

/// Query on the blocking pool and republish if the value differs
async fn requery<T, F>(db: &Arc<Database>, query: &Arc<F>, tx: &watch::Sender<T>)
where
    T: PartialEq + Send + Sync + 'static,
    F: Fn(&Database) -> Result<T> + Send + Sync + 'static,
{
    let db = db.clone();
    let query = query.clone();
    match tokio::task::spawn_blocking(move || query(&db)).await {
        Ok(Ok(value)) => {
            tx.send_if_modified(|current| {
                if *current == value {
                    false
                } else {
                    *current = value;
                    true
                }
            });
        }
        Ok(Err(e)) => tracing::warn!("Metric query failed: {:#}", e),
        Err(e) => tracing::warn!("Metric query task failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::GROUP_ALL_ID;
    use chrono::TimeZone;
    use std::time::Duration;

    #[test]
    fn test_oldest_update_is_minimum() {
        let a = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2023, 12, 31, 0, 0, 0).unwrap();
        let c = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        assert_eq!(oldest_update(&[a, b, c]), Some(b));
        assert_eq!(oldest_update(&[]), None);
    }

    #[tokio::test]
    async fn test_metrics_follow_writes() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let sub = db.add_subscription("https://example.com/a", "A").unwrap();
        let metrics = DatabaseMetrics::new(db.clone());

        let mut count = metrics.not_loaded_count(GROUP_ALL_ID);
        let mut updates = metrics.subscription_updates(GROUP_ALL_ID);
        tokio::time::timeout(Duration::from_secs(2), count.wait_for(|c| *c == 1))
            .await
            .unwrap()
            .unwrap();
        assert!(updates.borrow_and_update().is_empty());

        let when = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        db.mark_subscription_updated(sub, when).unwrap();

        tokio::time::timeout(Duration::from_secs(2), count.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*count.borrow_and_update(), 0);

        tokio::time::timeout(Duration::from_secs(2), updates.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*updates.borrow_and_update(), vec![when]);
    }

    #[tokio::test]
    async fn test_unrelated_write_does_not_republish() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let group = db.add_group("Empty").unwrap();
        let metrics = DatabaseMetrics::new(db.clone());
        let mut count = metrics.not_loaded_count(group);
        assert_eq!(*count.borrow_and_update(), 0);

        // Let the first query finish before writing
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Not part of the group, so the group's count stays 0
        db.add_subscription("https://example.com/b", "B").unwrap();
        let waited = tokio::time::timeout(Duration::from_millis(200), count.changed()).await;
        assert!(waited.is_err(), "count should not be republished");
    }

    #[tokio::test]
    async fn test_write_right_after_subscribing_is_seen() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let metrics = DatabaseMetrics::new(db.clone());
        let mut count = metrics.not_loaded_count(GROUP_ALL_ID);

        // Lands before the watcher task has run its first query
        db.add_subscription("https://example.com/a", "A").unwrap();
        db.add_subscription("https://example.com/b", "B").unwrap();

        tokio::time::timeout(Duration::from_secs(2), count.wait_for(|c| *c == 2))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_subscribing_does_not_query_inline() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.add_subscription("https://example.com/a", "A").unwrap();
        let metrics = DatabaseMetrics::new(db);

        // Seeded with the default; the query runs on the blocking pool
        let mut count = metrics.not_loaded_count(GROUP_ALL_ID);
        assert_eq!(*count.borrow(), 0);
        tokio::time::timeout(Duration::from_secs(2), count.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*count.borrow_and_update(), 1);
    }
}
