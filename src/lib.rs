//! Feed state aggregation.
//!
//! Combines the refresh lifecycle, the user's feed filters and two live
//! database metrics into a single [`FeedState`] for the UI.
//!
//! - `event` - refresh lifecycle events and the event source
//! - `toggles` - the two user filters
//! - `metrics` - live database metrics
//! - `db` - SQLite storage and the feed list query
//! - `pipeline` - combine, throttle, fetch, map, deliver
//! - `state` - the UI-facing state and its sink
//! - `view_model` - one feed screen's pipeline plus filters
//! - `preferences`, `config` - persisted settings

pub mod config;
pub mod db;
pub mod event;
pub mod metrics;
pub mod pipeline;
pub mod preferences;
pub mod state;
pub mod toggles;
pub mod view_model;

pub use event::{ErrorInfo, EventSource, FeedEvent, FeedEventManager};
pub use state::{FeedState, StateSink};
pub use toggles::{FilterState, ShowItems};
pub use view_model::{FeedServices, FeedViewModel};
