//! Feed state delivered to the UI
//!
//! [`FeedState`] is the only value the UI consumes. The [`StateSink`] holds the
//! latest one with last-write-wins semantics: late observers see only the most
//! recent state, never the history.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::db::StreamItem;
use crate::event::{ErrorInfo, FeedEvent};
use crate::metrics::Metrics;

/// What the feed screen should show
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FeedState {
    /// Placeholder before the pipeline produced anything
    Loading,
    Progress {
        current: u32,
        max: u32,
        message: String,
    },
    Loaded {
        items: Vec<StreamItem>,
        oldest_update: Option<DateTime<Utc>>,
        not_loaded_count: u64,
        /// Only present after a refresh that finished
        item_errors: Option<Vec<ErrorInfo>>,
    },
    Error { cause: ErrorInfo },
}

impl FeedState {
    /// Map a refresh event plus fetched items and metrics to a state.
    ///
    /// Total over all events. `items` is ignored unless the event is `Idle`
    /// or `Success`.
    pub fn from_parts(event: &FeedEvent, items: Vec<StreamItem>, metrics: &Metrics) -> Self {
        match event {
            FeedEvent::Idle => FeedState::Loaded {
                items,
                oldest_update: metrics.oldest_update,
                not_loaded_count: metrics.not_loaded_count,
                item_errors: None,
            },
            FeedEvent::Progress {
                current,
                max,
                message,
            } => FeedState::Progress {
                current: *current,
                max: *max,
                message: message.clone(),
            },
            FeedEvent::Success { item_errors } => FeedState::Loaded {
                items,
                oldest_update: metrics.oldest_update,
                not_loaded_count: metrics.not_loaded_count,
                item_errors: Some(item_errors.clone()),
            },
            FeedEvent::Error { cause } => FeedState::Error {
                cause: cause.clone(),
            },
        }
    }

    /// Short label for logs and text output
    pub fn label(&self) -> &'static str {
        match self {
            FeedState::Loading => "loading",
            FeedState::Progress { .. } => "progress",
            FeedState::Loaded { .. } => "loaded",
            FeedState::Error { .. } => "error",
        }
    }
}

impl std::fmt::Display for FeedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedState::Loading => write!(f, "Loading..."),
            FeedState::Progress {
                current,
                max,
                message,
            } => write!(f, "Refreshing {}/{}: {}", current, max, message),
            FeedState::Loaded {
                items,
                oldest_update,
                not_loaded_count,
                item_errors,
            } => {
                write!(f, "{} items", items.len())?;
                if let Some(oldest) = oldest_update {
                    write!(f, ", oldest update {}", oldest.format("%Y-%m-%d %H:%M"))?;
                }
                if *not_loaded_count > 0 {
                    write!(f, ", {} subscriptions not loaded", not_loaded_count)?;
                }
                if let Some(errors) = item_errors.as_ref().filter(|e| !e.is_empty()) {
                    write!(f, ", {} refresh errors", errors.len())?;
                }
                Ok(())
            }
            FeedState::Error { cause } => write!(f, "Error: {}", cause),
        }
    }
}

/// Single-slot holder of the current [`FeedState`]
#[derive(Clone)]
pub struct StateSink {
    tx: Arc<watch::Sender<FeedState>>,
}

impl Default for StateSink {
    fn default() -> Self {
        Self::new()
    }
}

impl StateSink {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(FeedState::Loading);
        Self { tx: Arc::new(tx) }
    }

    /// Replace the current state and wake observers.
    ///
    /// Observers are not woken when `state` equals the current one. Returns
    /// whether the state changed.
    pub fn publish(&self, state: FeedState) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            tracing::debug!("Publishing feed state: {}", state.label());
            *current = state;
            true
        })
    }

    pub fn current(&self) -> FeedState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedState> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(id: i64) -> StreamItem {
        StreamItem {
            id,
            subscription_id: 1,
            url: format!("https://example.com/watch/{}", id),
            title: format!("Stream {}", id),
            uploader: "Uploader".to_string(),
            duration_secs: 600,
            upload_date: None,
            progress_secs: None,
        }
    }

    fn metrics() -> Metrics {
        Metrics {
            not_loaded_count: 2,
            oldest_update: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
        }
    }

    #[test]
    fn test_idle_maps_to_loaded_without_errors() {
        let items = vec![item(1), item(2), item(3)];
        let state = FeedState::from_parts(&FeedEvent::Idle, items.clone(), &metrics());
        assert_eq!(
            state,
            FeedState::Loaded {
                items,
                oldest_update: metrics().oldest_update,
                not_loaded_count: 2,
                item_errors: None,
            }
        );
    }

    #[test]
    fn test_success_carries_item_errors() {
        let e1 = ErrorInfo::new("feed gone");
        let event = FeedEvent::Success { item_errors: vec![e1.clone()] };
        let state = FeedState::from_parts(&event, vec![], &metrics());
        match state {
            FeedState::Loaded { items, item_errors, not_loaded_count, .. } => {
                assert!(items.is_empty());
                assert_eq!(item_errors, Some(vec![e1]));
                assert_eq!(not_loaded_count, 2);
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn test_progress_and_error_ignore_items() {
        let progress = FeedEvent::Progress { current: 5, max: 10, message: "Fetching".into() };
        assert_eq!(
            FeedState::from_parts(&progress, vec![item(1)], &metrics()),
            FeedState::Progress { current: 5, max: 10, message: "Fetching".into() }
        );

        let cause = ErrorInfo::new("network down");
        let error = FeedEvent::Error { cause: cause.clone() };
        assert_eq!(
            FeedState::from_parts(&error, vec![item(1)], &metrics()),
            FeedState::Error { cause }
        );
    }

    #[test]
    fn test_sink_is_last_write_wins() {
        let sink = StateSink::new();
        assert_eq!(sink.current(), FeedState::Loading);

        sink.publish(FeedState::Progress { current: 1, max: 3, message: "a".into() });
        sink.publish(FeedState::Error { cause: ErrorInfo::new("b") });

        let late = sink.subscribe();
        assert_eq!(*late.borrow(), FeedState::Error { cause: ErrorInfo::new("b") });
    }

    #[test]
    fn test_identical_state_does_not_wake_observers() {
        let sink = StateSink::new();
        let loaded = FeedState::from_parts(&FeedEvent::Idle, vec![item(1)], &metrics());
        assert!(sink.publish(loaded.clone()));

        let mut rx = sink.subscribe();
        assert!(!sink.publish(loaded.clone()));
        assert!(!rx.has_changed().unwrap());

        assert!(sink.publish(FeedState::from_parts(&FeedEvent::Idle, vec![], &metrics())));
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn test_display() {
        let state = FeedState::from_parts(&FeedEvent::Idle, vec![item(1)], &metrics());
        assert_eq!(
            state.to_string(),
            "1 items, oldest update 2024-03-01 12:00, 2 subscriptions not loaded"
        );
    }
}
