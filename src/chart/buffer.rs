use crate::chart::store::SequenceStore;
use crate::chart::view::ViewWindow;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FetchDirection {
    Past,
    Future,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MergeDirection {
    Past,
    Future,
    Update,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferNeeds {
    pub needs_past: bool,
    pub needs_future: bool,
}

impl BufferNeeds {
    pub fn any(self) -> bool {
        self.needs_past || self.needs_future
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub epoch: u64,
    pub direction: FetchDirection,
    pub min_loaded_sequence: Option<i64>,
    pub max_loaded_sequence: Option<i64>,
    pub latest_known_sequence: Option<i64>,
    pub left_buffer: usize,
    pub right_buffer: usize,
    pub max_lookback: usize,
}

pub fn check_buffer_needs(
    view: &ViewWindow,
    store: &SequenceStore,
    fetch_threshold: usize,
    max_lookback: usize,
    loading_past: bool,
    loading_future: bool,
) -> BufferNeeds {
    if store.is_empty() {
        return BufferNeeds::default();
    }

    let needs_past = view.left_margin() < fetch_threshold + max_lookback
        && store.has_older_history()
        && !loading_past;

    let needs_future = view.right_margin(store.len()) < fetch_threshold
        && store.has_newer_than_loaded()
        && !loading_future;

    BufferNeeds {
        needs_past,
        needs_future,
    }
}

// After an indicator-set change: how many bars of history are still missing
// to the left of the view for the widest lookback to resolve.
pub fn lookback_shortfall(view: &ViewWindow, store: &SequenceStore, max_lookback: usize) -> usize {
    if !store.has_older_history() {
        return 0;
    }
    max_lookback.saturating_sub(view.left_margin())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::types::Bar;

    fn store_with(range: std::ops::RangeInclusive<i64>, latest: Option<i64>) -> SequenceStore {
        let mut store = SequenceStore::new(1);
        let bars: Vec<Bar> = range
            .map(|sequence| Bar::new(sequence, sequence * 60_000, 1.0, 2.0, 0.5, 1.5, 1.0))
            .collect();
        store.replace_all(bars, latest);
        store
    }

    #[test]
    fn signals_past_when_left_margin_is_thin() {
        // min loaded is 5 with oldest available 1, 10 bars of left margin,
        // threshold 50.
        let store = store_with(5..=304, None);
        let mut view = ViewWindow::new(100);
        view.scroll_to(10, store.len());

        let needs = check_buffer_needs(&view, &store, 50, 0, false, false);
        assert!(needs.needs_past);
        assert!(!needs.needs_future);
    }

    #[test]
    fn lookback_widens_the_past_threshold() {
        let store = store_with(5..=504, None);
        let mut view = ViewWindow::new(100);
        view.scroll_to(70, store.len());

        let without_lookback = check_buffer_needs(&view, &store, 50, 0, false, false);
        assert!(!without_lookback.needs_past);

        let with_lookback = check_buffer_needs(&view, &store, 50, 33, false, false);
        assert!(with_lookback.needs_past);
    }

    #[test]
    fn no_past_signal_at_oldest_available() {
        let store = store_with(1..=300, None);
        let view = ViewWindow::new(100);
        let needs = check_buffer_needs(&view, &store, 50, 0, false, false);
        assert!(!needs.needs_past);
    }

    #[test]
    fn in_flight_fetch_suppresses_resignal() {
        let store = store_with(5..=304, None);
        let mut view = ViewWindow::new(100);
        view.scroll_to(10, store.len());

        let needs = check_buffer_needs(&view, &store, 50, 0, true, false);
        assert!(!needs.needs_past);
    }

    #[test]
    fn signals_future_only_when_newer_data_exists() {
        let store = store_with(1..=300, Some(400));
        let mut view = ViewWindow::new(100);
        view.snap_to_tail(store.len());

        let needs = check_buffer_needs(&view, &store, 50, 0, false, false);
        assert!(needs.needs_future);

        let caught_up = store_with(1..=300, Some(300));
        let needs = check_buffer_needs(&view, &caught_up, 50, 0, false, false);
        assert!(!needs.needs_future);
    }

    #[test]
    fn empty_store_never_signals() {
        let store = SequenceStore::new(1);
        let view = ViewWindow::new(100);
        let needs = check_buffer_needs(&view, &store, 50, 10, false, false);
        assert!(!needs.any());
    }

    #[test]
    fn lookback_shortfall_counts_missing_left_history() {
        let store = store_with(5..=304, None);
        let mut view = ViewWindow::new(100);
        view.scroll_to(10, store.len());

        assert_eq!(lookback_shortfall(&view, &store, 33), 23);
        assert_eq!(lookback_shortfall(&view, &store, 5), 0);

        let exhausted = store_with(1..=300, None);
        assert_eq!(lookback_shortfall(&view, &exhausted, 33), 0);
    }
}
