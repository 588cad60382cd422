//! Latest value of every pipeline source

use chrono::{DateTime, Utc};

use crate::event::FeedEvent;
use crate::metrics::{Metrics, oldest_update};
use crate::toggles::{FilterState, ShowItems};

/// One combined snapshot of all sources
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedRecord {
    pub event: FeedEvent,
    /// Increases with every event emission; identifies which emission `event` is
    pub event_epoch: u64,
    pub filters: FilterState,
    pub metrics: Metrics,
}

/// Latest value per source. `None` means the source has not emitted yet.
#[derive(Debug, Default)]
pub struct CombineLatest {
    event: Option<FeedEvent>,
    event_epoch: u64,
    played: Option<ShowItems>,
    show_future: Option<bool>,
    not_loaded: Option<u64>,
    oldest_update: Option<Option<DateTime<Utc>>>,
}

impl CombineLatest {
    pub fn set_event(&mut self, event: FeedEvent) {
        self.event = Some(event);
        self.event_epoch += 1;
    }

    pub fn set_played(&mut self, value: ShowItems) {
        self.played = Some(value);
    }

    pub fn set_show_future(&mut self, value: bool) {
        self.show_future = Some(value);
    }

    pub fn set_not_loaded(&mut self, count: u64) {
        self.not_loaded = Some(count);
    }

    pub fn set_updates(&mut self, updates: &[DateTime<Utc>]) {
        self.oldest_update = Some(oldest_update(updates));
    }

    /// Current record, once every source has emitted at least once
    pub fn snapshot(&self) -> Option<CombinedRecord> {
        Some(CombinedRecord {
            event: self.event.clone()?,
            event_epoch: self.event_epoch,
            filters: FilterState {
                played_visibility: self.played?,
                show_future: self.show_future?,
            },
            metrics: Metrics {
                not_loaded_count: self.not_loaded?,
                oldest_update: self.oldest_update?,
            },
        })
    }
}
