//! Feed aggregation pipeline
//!
//! Turns five independently updating sources into one [`FeedState`] stream:
//!
//! 1. Combine the latest value of every source whenever any of them changes.
//! 2. Throttle the combined records, latest wins.
//! 3. For `Idle` and `Success`, fetch the feed list with the current filters.
//! 4. Map to a [`FeedState`] and publish it to the [`StateSink`].
//! 5. After publishing a terminal event, ask the event source to reset.
//!
//! Steps 1-2 and 3-5 run concurrently inside one task, connected by a
//! single-slot watch channel, so sources keep being combined while a fetch is
//! running and at most one fetch is in flight.

mod combine;
mod throttle;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::FeedConfig;
use crate::db::{FeedRepository, StreamItem, StreamQuery};
use crate::event::{ErrorInfo, EventSource, FeedEvent};
use crate::state::{FeedState, StateSink};
use crate::toggles::ShowItems;

pub use combine::{CombineLatest, CombinedRecord};
pub use throttle::Throttle;

/// Errors that end the pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Feed pipeline panicked: {0}")]
    Panicked(String),
}

/// The five pipeline inputs
pub struct PipelineSources {
    pub events: watch::Receiver<FeedEvent>,
    pub played: watch::Receiver<ShowItems>,
    pub show_future: watch::Receiver<bool>,
    pub not_loaded: watch::Receiver<u64>,
    pub updates: watch::Receiver<Vec<DateTime<Utc>>>,
}

/// Start the pipeline on the tokio runtime.
///
/// The task runs until every source is closed or the handle is aborted. A
/// panic inside the pipeline is published as [`FeedState::Error`].
pub fn spawn(
    sources: PipelineSources,
    repository: Arc<dyn FeedRepository>,
    events: Arc<dyn EventSource>,
    sink: StateSink,
    config: &FeedConfig,
) -> JoinHandle<()> {
    let window = config.throttle_window();
    let evaluator = Evaluator {
        repository,
        events,
        sink: sink.clone(),
        group_id: config.group_id,
        fetch_timeout: config.fetch_timeout(),
        handled_terminal: None,
    };

    tokio::spawn(async move {
        tracing::info!(
            "Feed pipeline started (group {}, throttle {:?})",
            evaluator.group_id,
            window
        );

        let (record_tx, record_rx) = watch::channel(None);
        let run = async {
            tokio::join!(combine(sources, window, record_tx), evaluator.run(record_rx));
        };

        match AssertUnwindSafe(run).catch_unwind().await {
            Ok(()) => tracing::info!("Feed pipeline stopped"),
            Err(panic) => {
                let err = PipelineError::Panicked(panic_message(panic.as_ref()));
                tracing::error!("{}", err);
                sink.publish(FeedState::Error {
                    cause: ErrorInfo::new(err.to_string()),
                });
            }
        }
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Combine and throttle the sources, writing emitted records to `out`
async fn combine(
    sources: PipelineSources,
    window: Duration,
    out: watch::Sender<Option<CombinedRecord>>,
) {
    let PipelineSources {
        mut events,
        mut played,
        mut show_future,
        mut not_loaded,
        mut updates,
    } = sources;

    // Treat every source's current value as its first emission
    events.mark_changed();
    played.mark_changed();
    show_future.mark_changed();
    not_loaded.mark_changed();
    updates.mark_changed();

    let mut open = [true; 5];
    let mut latest = CombineLatest::default();
    let mut throttle = Throttle::new(window);

    loop {
        let deadline = throttle.deadline();

        tokio::select! {
            changed = events.changed(), if open[0] => match changed {
                Ok(()) => latest.set_event(events.borrow_and_update().clone()),
                Err(_) => {
                    open[0] = false;
                    continue;
                }
            },
            changed = played.changed(), if open[1] => match changed {
                Ok(()) => latest.set_played(*played.borrow_and_update()),
                Err(_) => {
                    open[1] = false;
                    continue;
                }
            },
            changed = show_future.changed(), if open[2] => match changed {
                Ok(()) => latest.set_show_future(*show_future.borrow_and_update()),
                Err(_) => {
                    open[2] = false;
                    continue;
                }
            },
            changed = not_loaded.changed(), if open[3] => match changed {
                Ok(()) => latest.set_not_loaded(*not_loaded.borrow_and_update()),
                Err(_) => {
                    open[3] = false;
                    continue;
                }
            },
            changed = updates.changed(), if open[4] => match changed {
                Ok(()) => latest.set_updates(&updates.borrow_and_update()),
                Err(_) => {
                    open[4] = false;
                    continue;
                }
            },
            _ = sleep_until(deadline), if deadline.is_some() => {
                if let Some(record) = throttle.fire(Instant::now()) {
                    out.send_replace(Some(record));
                }
                continue;
            }
            else => break,
        }

        if let Some(record) = latest.snapshot() {
            if let Some(record) = throttle.push(Instant::now(), record) {
                out.send_replace(Some(record));
            }
        }
    }

    if let Some(record) = throttle.flush() {
        out.send_replace(Some(record));
    }
    tracing::debug!("All feed sources closed");
}

/// Fetch, map, publish and reset for each throttled record
struct Evaluator {
    repository: Arc<dyn FeedRepository>,
    events: Arc<dyn EventSource>,
    sink: StateSink,
    group_id: i64,
    fetch_timeout: Option<Duration>,
    /// Epoch of the last terminal event that was published and reset
    handled_terminal: Option<u64>,
}

impl Evaluator {
    async fn run(mut self, mut records: watch::Receiver<Option<CombinedRecord>>) {
        while records.changed().await.is_ok() {
            let record = records.borrow_and_update().clone();
            if let Some(record) = record {
                self.evaluate(record).await;
            }
        }
    }

    async fn evaluate(&mut self, record: CombinedRecord) {
        let already_handled = record.event.is_terminal()
            && self
                .handled_terminal
                .is_some_and(|epoch| record.event_epoch <= epoch);

        // The source may not have applied the reset yet; the terminal event
        // was already delivered, so show the plain list instead.
        let event = if already_handled {
            FeedEvent::Idle
        } else {
            record.event
        };

        let items = if event.needs_items() {
            self.fetch(StreamQuery::new(self.group_id, record.filters)).await
        } else {
            Vec::new()
        };

        self.sink
            .publish(FeedState::from_parts(&event, items, &record.metrics));

        if event.is_terminal() {
            self.handled_terminal = Some(record.event_epoch);
            self.events.reset();
        }
    }

    /// Materialize the feed list. Failures degrade to an empty list.
    async fn fetch(&self, query: StreamQuery) -> Vec<StreamItem> {
        let repository = self.repository.clone();
        let task = tokio::task::spawn_blocking(move || repository.fetch_items(&query));

        let result = match self.fetch_timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!("Feed list query timed out after {:?}", limit);
                    return Vec::new();
                }
            },
            None => task.await,
        };

        match result {
            Ok(Ok(items)) => {
                tracing::debug!("Fetched {} feed items", items.len());
                items
            }
            Ok(Err(e)) => {
                tracing::warn!("Failed to fetch feed items: {:#}", e);
                Vec::new()
            }
            Err(e) => {
                tracing::warn!("Feed item query task failed: {}", e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::FeedEventManager;
    use crate::metrics::Metrics;
    use crate::toggles::FilterState;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingRepository {
        queries: Mutex<Vec<StreamQuery>>,
    }

    impl FeedRepository for RecordingRepository {
        fn fetch_items(&self, query: &StreamQuery) -> anyhow::Result<Vec<StreamItem>> {
            self.queries.lock().unwrap().push(*query);
            Ok(Vec::new())
        }
    }

    struct CountingEvents {
        inner: FeedEventManager,
        resets: AtomicUsize,
    }

    impl EventSource for CountingEvents {
        fn subscribe(&self) -> watch::Receiver<FeedEvent> {
            self.inner.subscribe()
        }

        fn reset(&self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
            self.inner.reset();
        }
    }

    fn evaluator() -> (Evaluator, Arc<RecordingRepository>, Arc<CountingEvents>, StateSink) {
        let repository = Arc::new(RecordingRepository {
            queries: Mutex::new(Vec::new()),
        });
        let events = Arc::new(CountingEvents {
            inner: FeedEventManager::new(),
            resets: AtomicUsize::new(0),
        });
        let sink = StateSink::new();
        let evaluator = Evaluator {
            repository: repository.clone(),
            events: events.clone(),
            sink: sink.clone(),
            group_id: 7,
            fetch_timeout: None,
            handled_terminal: None,
        };
        (evaluator, repository, events, sink)
    }

    fn record(event: FeedEvent, epoch: u64, played: ShowItems) -> CombinedRecord {
        CombinedRecord {
            event,
            event_epoch: epoch,
            filters: FilterState {
                played_visibility: played,
                show_future: false,
            },
            metrics: Metrics::default(),
        }
    }

    #[tokio::test]
    async fn test_stale_terminal_event_is_not_reprocessed() {
        let (mut evaluator, repository, events, sink) = evaluator();
        let success = FeedEvent::Success {
            item_errors: vec![ErrorInfo::new("one feed failed")],
        };

        evaluator.evaluate(record(success.clone(), 3, ShowItems::Default)).await;
        assert_eq!(events.resets.load(Ordering::SeqCst), 1);
        assert!(matches!(
            sink.current(),
            FeedState::Loaded { item_errors: Some(ref e), .. } if e.len() == 1
        ));

        // Filter toggle arrives before the reset reached the combiner
        evaluator.evaluate(record(success, 3, ShowItems::Watched)).await;
        assert_eq!(events.resets.load(Ordering::SeqCst), 1);
        assert!(matches!(sink.current(), FeedState::Loaded { item_errors: None, .. }));

        let queries = repository.queries.lock().unwrap();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[1].group_id, 7);
        assert!(queries[1].exclude_partially_watched);
    }

    #[tokio::test]
    async fn test_new_terminal_event_resets_again() {
        let (mut evaluator, _, events, _) = evaluator();
        let cause = ErrorInfo::new("offline");

        evaluator
            .evaluate(record(FeedEvent::Error { cause: cause.clone() }, 1, ShowItems::Default))
            .await;
        evaluator
            .evaluate(record(FeedEvent::Error { cause }, 4, ShowItems::Default))
            .await;
        assert_eq!(events.resets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_progress_skips_fetch() {
        let (mut evaluator, repository, events, sink) = evaluator();
        let progress = FeedEvent::Progress {
            current: 5,
            max: 10,
            message: "Fetching".into(),
        };

        evaluator.evaluate(record(progress, 1, ShowItems::Default)).await;
        assert!(repository.queries.lock().unwrap().is_empty());
        assert_eq!(events.resets.load(Ordering::SeqCst), 0);
        assert_eq!(
            sink.current(),
            FeedState::Progress { current: 5, max: 10, message: "Fetching".into() }
        );
    }

    #[tokio::test]
    async fn test_unchanged_result_is_not_republished() {
        let (mut evaluator, repository, _, sink) = evaluator();
        evaluator.evaluate(record(FeedEvent::Idle, 0, ShowItems::Default)).await;
        let mut states = sink.subscribe();

        // Metric tick that changes nothing visible
        evaluator.evaluate(record(FeedEvent::Idle, 0, ShowItems::Default)).await;
        assert_eq!(repository.queries.lock().unwrap().len(), 2);
        assert!(!states.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_combined_output_settles_on_latest_values() {
        let (_event_tx, events) = watch::channel(FeedEvent::Idle);
        let (played_tx, played) = watch::channel(ShowItems::Default);
        let (future_tx, show_future) = watch::channel(true);
        let (_count_tx, not_loaded) = watch::channel(3u64);
        let (_updates_tx, updates) = watch::channel(Vec::new());
        let sources = PipelineSources {
            events,
            played,
            show_future,
            not_loaded,
            updates,
        };
        let (out, records) = watch::channel(None);
        let task = tokio::spawn(combine(sources, Duration::from_millis(40), out));

        // Changes land inside, at the edge of and after throttle windows
        for (i, delay) in [0u64, 10, 45, 5, 40, 20, 41].into_iter().enumerate() {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let played = if i % 2 == 0 { ShowItems::Watched } else { ShowItems::PartiallyWatched };
            played_tx.send_replace(played);
            future_tx.send_replace(i % 2 == 0);
        }
        played_tx.send_replace(ShowItems::Default);
        future_tx.send_replace(false);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let last = records.borrow().clone().unwrap();
        assert_eq!(
            last.filters,
            FilterState { played_visibility: ShowItems::Default, show_future: false }
        );
        assert_eq!(last.metrics.not_loaded_count, 3);
        task.abort();
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
