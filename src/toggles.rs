//! User-controlled feed filters
//!
//! Each filter is held in its own watch channel seeded with an initial value.
//! Setting a filter to the value it already has does not notify subscribers.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Which watched streams the feed shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShowItems {
    Watched,
    PartiallyWatched,
    #[default]
    Default,
}

impl ShowItems {
    /// Stored preference name
    pub fn as_str(self) -> &'static str {
        match self {
            ShowItems::Watched => "WATCHED",
            ShowItems::PartiallyWatched => "PARTIALLY_WATCHED",
            ShowItems::Default => "DEFAULT",
        }
    }

    /// Parse a stored preference name
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "WATCHED" => Some(ShowItems::Watched),
            "PARTIALLY_WATCHED" => Some(ShowItems::PartiallyWatched),
            "DEFAULT" => Some(ShowItems::Default),
            _ => None,
        }
    }

    /// `(exclude_fully_watched, exclude_partially_watched)` for this setting.
    ///
    /// The three-way setting never excludes both kinds at once.
    pub fn exclusions(self) -> (bool, bool) {
        match self {
            ShowItems::Default => (true, false),
            ShowItems::Watched => (false, true),
            ShowItems::PartiallyWatched => (true, false),
        }
    }
}

impl std::fmt::Display for ShowItems {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of both filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterState {
    pub played_visibility: ShowItems,
    pub show_future: bool,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            played_visibility: ShowItems::Default,
            show_future: true,
        }
    }
}

/// Holder for the two filter values
pub struct FeedToggles {
    played: watch::Sender<ShowItems>,
    future: watch::Sender<bool>,
}

impl FeedToggles {
    pub fn new(initial: FilterState) -> Self {
        let (played, _) = watch::channel(initial.played_visibility);
        let (future, _) = watch::channel(initial.show_future);
        Self { played, future }
    }

    /// Set played-item visibility. Returns true if the value changed.
    pub fn set_played_visibility(&self, value: ShowItems) -> bool {
        send_if_different(&self.played, value)
    }

    /// Set future-item visibility. Returns true if the value changed.
    pub fn set_show_future(&self, value: bool) -> bool {
        send_if_different(&self.future, value)
    }

    pub fn played_visibility(&self) -> watch::Receiver<ShowItems> {
        self.played.subscribe()
    }

    pub fn show_future(&self) -> watch::Receiver<bool> {
        self.future.subscribe()
    }

    pub fn current(&self) -> FilterState {
        FilterState {
            played_visibility: *self.played.borrow(),
            show_future: *self.future.borrow(),
        }
    }
}

fn send_if_different<T: PartialEq + Copy>(tx: &watch::Sender<T>, value: T) -> bool {
    tx.send_if_modified(|current| {
        if *current == value {
            false
        } else {
            *current = value;
            true
        }
    })
}
