//! Feed refresh lifecycle events
//!
//! The refresh service reports its phase through an [`EventSource`]. Exactly one
//! [`FeedEvent`] is current at any time; consumers observe it through a watch
//! channel and request a return to [`FeedEvent::Idle`] with [`EventSource::reset`].

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// User-visible description of a failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Short human-readable message
    pub message: String,
    /// Where the error came from (e.g. a subscription URL), if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.origin {
            Some(origin) => write!(f, "{} ({})", self.message, origin),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Phase of a background feed refresh
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    /// No refresh running
    #[default]
    Idle,
    /// Refresh in progress
    Progress {
        current: u32,
        max: u32,
        message: String,
    },
    /// Refresh finished; individual subscriptions may have failed
    Success { item_errors: Vec<ErrorInfo> },
    /// Refresh failed as a whole
    Error { cause: ErrorInfo },
}

impl FeedEvent {
    /// `Success` and `Error` end a refresh cycle and must be reset afterwards.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FeedEvent::Success { .. } | FeedEvent::Error { .. })
    }

    /// Whether the feed list should be materialized for this event.
    pub fn needs_items(&self) -> bool {
        matches!(self, FeedEvent::Idle | FeedEvent::Success { .. })
    }
}

/// Producer of refresh lifecycle events.
///
/// Consumers never mutate the event state directly; they only ask for a reset.
pub trait EventSource: Send + Sync {
    /// Subscribe to the current event and every later change.
    fn subscribe(&self) -> watch::Receiver<FeedEvent>;

    /// Force the current event back to [`FeedEvent::Idle`].
    fn reset(&self);
}

/// In-process event source shared between the refresh service and feed views
pub struct FeedEventManager {
    tx: watch::Sender<FeedEvent>,
}

impl Default for FeedEventManager {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedEventManager {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(FeedEvent::Idle);
        Self { tx }
    }

    /// Publish a new event, replacing the current one
    pub fn post(&self, event: FeedEvent) {
        tracing::debug!("Feed event: {:?}", event);
        self.tx.send_replace(event);
    }

    /// Current event
    pub fn current(&self) -> FeedEvent {
        self.tx.borrow().clone()
    }
}

impl EventSource for FeedEventManager {
    fn subscribe(&self) -> watch::Receiver<FeedEvent> {
        self.tx.subscribe()
    }

    fn reset(&self) {
        self.post(FeedEvent::Idle);
    }
}
