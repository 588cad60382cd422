//! Feed view model
//!
//! Owns the filter toggles, the state sink and the pipeline task for one feed
//! screen. The UI subscribes to [`FeedState`] changes and calls the toggle
//! methods; everything else happens in the pipeline.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::FeedConfig;
use crate::db::FeedRepository;
use crate::event::EventSource;
use crate::metrics::MetricSources;
use crate::pipeline::{self, PipelineSources};
use crate::state::{FeedState, StateSink};
use crate::toggles::{FeedToggles, FilterState, ShowItems};

/// External collaborators of a feed view
#[derive(Clone)]
pub struct FeedServices {
    pub events: Arc<dyn EventSource>,
    pub metrics: Arc<dyn MetricSources>,
    pub repository: Arc<dyn FeedRepository>,
}

pub struct FeedViewModel {
    toggles: FeedToggles,
    sink: StateSink,
    task: Option<JoinHandle<()>>,
}

impl FeedViewModel {
    /// Create the view model and start its pipeline.
    ///
    /// `initial` is usually read from the preference store by the caller.
    /// Must be called from within a tokio runtime.
    pub fn new(services: FeedServices, initial: FilterState, config: &FeedConfig) -> Self {
        let toggles = FeedToggles::new(initial);
        let sink = StateSink::new();

        let sources = PipelineSources {
            events: services.events.subscribe(),
            played: toggles.played_visibility(),
            show_future: toggles.show_future(),
            not_loaded: services.metrics.not_loaded_count(config.group_id),
            updates: services.metrics.subscription_updates(config.group_id),
        };

        let task = pipeline::spawn(
            sources,
            services.repository,
            services.events,
            sink.clone(),
            config,
        );

        Self {
            toggles,
            sink,
            task: Some(task),
        }
    }

    /// Observe state changes. Late subscribers see only the latest state.
    pub fn subscribe(&self) -> watch::Receiver<FeedState> {
        self.sink.subscribe()
    }

    pub fn state(&self) -> FeedState {
        self.sink.current()
    }

    pub fn filters(&self) -> FilterState {
        self.toggles.current()
    }

    pub fn toggle_played_items(&self, show_items: ShowItems) {
        if self.toggles.set_played_visibility(show_items) {
            tracing::debug!("Played items visibility set to {}", show_items);
        }
    }

    pub fn toggle_future_items(&self, show_future_items: bool) {
        if self.toggles.set_show_future(show_future_items) {
            tracing::debug!("Future items visibility set to {}", show_future_items);
        }
    }

    /// Stop the pipeline. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("Feed view model shut down");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for FeedViewModel {
    fn drop(&mut self) {
        self.shutdown();
    }
}
