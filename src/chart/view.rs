use crate::chart::store::SequenceStore;
use crate::chart::types::{MAX_DISPLAY_CANDLES, MIN_DISPLAY_CANDLES};
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewWindow {
    start_index: usize,
    display_count: usize,
}

impl ViewWindow {
    pub fn new(display_count: usize) -> Self {
        Self {
            start_index: 0,
            display_count: display_count.clamp(MIN_DISPLAY_CANDLES, MAX_DISPLAY_CANDLES),
        }
    }

    pub fn start_index(&self) -> usize {
        self.start_index
    }

    pub fn display_count(&self) -> usize {
        self.display_count
    }

    pub fn max_start(&self, store_len: usize) -> usize {
        store_len.saturating_sub(self.display_count)
    }

    pub fn scroll_to(&mut self, start_index: usize, store_len: usize) {
        self.start_index = start_index.min(self.max_start(store_len));
    }

    pub fn clamp(&mut self, store_len: usize) {
        self.start_index = self.start_index.min(self.max_start(store_len));
    }

    // Prepended history shifts the window right so the same bars stay on
    // screen.
    pub fn shift_right(&mut self, prepended: usize, store_len: usize) {
        self.start_index = (self.start_index + prepended).min(self.max_start(store_len));
    }

    pub fn rebase_left(&mut self, trimmed_left: usize) {
        self.start_index = self.start_index.saturating_sub(trimmed_left);
    }

    pub fn snap_to_tail(&mut self, store_len: usize) {
        self.start_index = self.max_start(store_len);
    }

    // Only clamps the count; recentering around an anchor is the caller's
    // move so the anchored bar keeps its on-screen position.
    pub fn set_display_count(&mut self, display_count: usize) {
        self.display_count = display_count.clamp(MIN_DISPLAY_CANDLES, MAX_DISPLAY_CANDLES);
    }

    pub fn visible_range(&self, store_len: usize) -> Range<usize> {
        let start = self.start_index.min(store_len);
        let end = (start + self.display_count).min(store_len);
        start..end
    }

    pub fn left_margin(&self) -> usize {
        self.start_index
    }

    pub fn right_margin(&self, store_len: usize) -> usize {
        store_len.saturating_sub(self.visible_range(store_len).end)
    }

    pub fn is_at_latest_edge(&self, store: &SequenceStore) -> bool {
        let Some(latest_known) = store.latest_known_sequence() else {
            return true;
        };
        let range = self.visible_range(store.len());
        if range.is_empty() {
            return true;
        }
        store.bars()[range.end - 1].sequence >= latest_known
    }
}
