use crate::chart::buffer::{
    check_buffer_needs, lookback_shortfall, BufferNeeds, FetchDirection, FetchRequest,
    MergeDirection,
};
use crate::chart::indicator::{
    max_lookback, recompute_indicators, IndicatorCategory, IndicatorKind, IndicatorSettings,
    IndicatorSpec,
};
use crate::chart::store::{MergeOutcome, SequenceStore};
use crate::chart::types::{Bar, ChartConfig, ChartFrame};
use crate::chart::view::ViewWindow;
use crate::error::ChartError;
use tracing::debug;

#[derive(Debug)]
pub struct CandleWindowManager {
    config: ChartConfig,
    store: SequenceStore,
    view: ViewWindow,
    indicators: Vec<IndicatorSpec>,
    next_indicator_id: u64,
    follow_latest: bool,
    is_initializing: bool,
    loading_past: bool,
    loading_future: bool,
    frame_dirty: bool,
}

impl CandleWindowManager {
    pub fn new(config: ChartConfig) -> Self {
        let store = SequenceStore::new(config.oldest_available_sequence);
        let view = ViewWindow::new(config.display_count);
        Self {
            config,
            store,
            view,
            indicators: Vec::new(),
            next_indicator_id: 1,
            follow_latest: true,
            is_initializing: true,
            loading_past: false,
            loading_future: false,
            frame_dirty: false,
        }
    }

    pub fn config(&self) -> &ChartConfig {
        &self.config
    }

    pub fn store(&self) -> &SequenceStore {
        &self.store
    }

    pub fn view(&self) -> &ViewWindow {
        &self.view
    }

    pub fn indicators(&self) -> &[IndicatorSpec] {
        &self.indicators
    }

    pub fn is_initializing(&self) -> bool {
        self.is_initializing
    }

    pub fn loading_past(&self) -> bool {
        self.loading_past
    }

    pub fn loading_future(&self) -> bool {
        self.loading_future
    }

    pub fn following_latest(&self) -> bool {
        self.follow_latest
    }

    pub fn at_latest_edge(&self) -> bool {
        self.view.is_at_latest_edge(&self.store)
    }

    pub fn max_lookback(&self) -> usize {
        max_lookback(&self.indicators)
    }

    pub fn visible_bars(&self) -> &[Bar] {
        &self.store.bars()[self.view.visible_range(self.store.len())]
    }

    pub fn initialize(
        &mut self,
        bars: Vec<Bar>,
        latest_known_sequence: Option<i64>,
        anchor_sequence: Option<i64>,
    ) {
        self.store.replace_all(bars, latest_known_sequence);
        recompute_indicators(self.store.bars_mut(), &self.indicators);

        self.is_initializing = false;
        self.loading_past = false;
        self.loading_future = false;
        self.frame_dirty = true;

        if self.store.is_empty() {
            self.view.scroll_to(0, 0);
            self.follow_latest = true;
            return;
        }

        match anchor_sequence.and_then(|sequence| self.store.index_of_first_at_or_after(sequence)) {
            Some(anchor_index) => self.view.scroll_to(anchor_index, self.store.len()),
            None => self.view.snap_to_tail(self.store.len()),
        }
        self.follow_latest = self.view.is_at_latest_edge(&self.store);
    }

    pub fn merge(
        &mut self,
        bars: Vec<Bar>,
        direction: MergeDirection,
        latest_known_sequence: Option<i64>,
    ) -> MergeOutcome {
        match direction {
            MergeDirection::Past => self.loading_past = false,
            MergeDirection::Future => self.loading_future = false,
            MergeDirection::Update => {}
        }

        if bars.is_empty() {
            self.frame_dirty = true;
            return MergeOutcome::default();
        }

        let outcome = self.store.merge(bars);
        if let Some(latest) = latest_known_sequence {
            self.store.announce_latest_sequence(latest);
        }

        match direction {
            MergeDirection::Past => self.view.shift_right(outcome.prepended, self.store.len()),
            MergeDirection::Future | MergeDirection::Update => {
                if self.follow_latest {
                    self.view.snap_to_tail(self.store.len());
                } else {
                    self.view.clamp(self.store.len());
                }
            }
        }

        self.maybe_trim();
        recompute_indicators(self.store.bars_mut(), &self.indicators);
        self.frame_dirty = true;
        outcome
    }

    pub fn announce_latest_sequence(&mut self, sequence: i64) {
        self.store.announce_latest_sequence(sequence);
        self.frame_dirty = true;
    }

    pub fn scroll_to(&mut self, start_index: usize) {
        self.view.scroll_to(start_index, self.store.len());
        // Edge detection on every user-driven window change: scrolling away
        // disengages follow-latest, scrolling back to the edge re-engages it.
        self.follow_latest = self.view.is_at_latest_edge(&self.store);
        self.frame_dirty = true;
    }

    pub fn set_display_count(&mut self, display_count: usize, anchor_sequence: Option<i64>) {
        let old_start = self.view.start_index();
        let old_count = self.view.display_count();
        let anchor_index =
            anchor_sequence.and_then(|sequence| self.store.index_of_first_at_or_after(sequence));

        self.view.set_display_count(display_count);

        match anchor_index {
            Some(index) => {
                // Keep the anchored bar at the same relative position so it
                // stays under the cursor through the resize.
                let offset = index.saturating_sub(old_start);
                let ratio = offset as f64 / old_count.max(1) as f64;
                let new_offset = (ratio * self.view.display_count() as f64).round() as usize;
                self.view
                    .scroll_to(index.saturating_sub(new_offset), self.store.len());
            }
            None => self.view.clamp(self.store.len()),
        }

        self.follow_latest = self.view.is_at_latest_edge(&self.store);
        self.frame_dirty = true;
    }

    pub fn add_indicator(
        &mut self,
        kind: IndicatorKind,
        category: Option<IndicatorCategory>,
        settings: Option<IndicatorSettings>,
    ) -> Result<IndicatorSpec, ChartError> {
        let settings = settings.unwrap_or_default();
        settings.validate_for(kind)?;

        let spec = IndicatorSpec {
            id: self.next_indicator_id,
            kind,
            category: category.unwrap_or_else(|| kind.default_category()),
            settings,
        };
        self.next_indicator_id += 1;
        self.indicators.push(spec.clone());

        recompute_indicators(self.store.bars_mut(), &self.indicators);
        self.frame_dirty = true;
        Ok(spec)
    }

    pub fn update_indicator(
        &mut self,
        id: u64,
        kind: Option<IndicatorKind>,
        category: Option<IndicatorCategory>,
        settings: Option<IndicatorSettings>,
    ) -> Result<IndicatorSpec, ChartError> {
        let index = self
            .indicators
            .iter()
            .position(|spec| spec.id == id)
            .ok_or(ChartError::UnknownIndicator(id))?;

        let current = &self.indicators[index];
        let next_kind = kind.unwrap_or(current.kind);
        let next_category = match (category, kind) {
            (Some(category), _) => category,
            (None, Some(new_kind)) => new_kind.default_category(),
            (None, None) => current.category,
        };
        let next_settings = settings.unwrap_or_else(|| current.settings.clone());
        next_settings.validate_for(next_kind)?;

        let spec = IndicatorSpec {
            id,
            kind: next_kind,
            category: next_category,
            settings: next_settings,
        };
        self.indicators[index] = spec.clone();

        recompute_indicators(self.store.bars_mut(), &self.indicators);
        self.frame_dirty = true;
        Ok(spec)
    }

    pub fn remove_indicator(&mut self, id: u64) -> Result<(), ChartError> {
        let index = self
            .indicators
            .iter()
            .position(|spec| spec.id == id)
            .ok_or(ChartError::UnknownIndicator(id))?;
        self.indicators.remove(index);

        recompute_indicators(self.store.bars_mut(), &self.indicators);
        self.frame_dirty = true;
        Ok(())
    }

    pub fn buffer_needs(&self) -> BufferNeeds {
        check_buffer_needs(
            &self.view,
            &self.store,
            self.config.fetch_threshold,
            self.max_lookback(),
            self.loading_past,
            self.loading_future,
        )
    }

    pub fn lookback_shortfall(&self) -> usize {
        lookback_shortfall(&self.view, &self.store, self.max_lookback())
    }

    pub fn set_buffer_loading(&mut self, direction: FetchDirection, loading: bool) {
        match direction {
            FetchDirection::Past => self.loading_past = loading,
            FetchDirection::Future => self.loading_future = loading,
        }
    }

    pub fn fetch_request(&self, direction: FetchDirection, epoch: u64) -> FetchRequest {
        FetchRequest {
            epoch,
            direction,
            min_loaded_sequence: self.store.min_loaded_sequence(),
            max_loaded_sequence: self.store.max_loaded_sequence(),
            latest_known_sequence: self.store.latest_known_sequence(),
            left_buffer: self.view.left_margin(),
            right_buffer: self.view.right_margin(self.store.len()),
            max_lookback: self.max_lookback(),
        }
    }

    pub fn reset(&mut self) {
        self.store.clear();
        self.view.scroll_to(0, 0);
        self.follow_latest = true;
        self.is_initializing = true;
        self.loading_past = false;
        self.loading_future = false;
        self.frame_dirty = true;
    }

    pub fn take_frame_dirty(&mut self) -> bool {
        std::mem::take(&mut self.frame_dirty)
    }

    pub fn frame(&self) -> ChartFrame {
        ChartFrame {
            symbol: self.config.symbol.clone(),
            timeframe: self.config.timeframe,
            bars: self.visible_bars().to_vec(),
            start_index: self.view.start_index(),
            display_count: self.view.display_count(),
            store_len: self.store.len(),
            min_loaded_sequence: self.store.min_loaded_sequence(),
            max_loaded_sequence: self.store.max_loaded_sequence(),
            latest_known_sequence: self.store.latest_known_sequence(),
            is_initializing: self.is_initializing,
            loading_past: self.loading_past,
            loading_future: self.loading_future,
            at_latest_edge: self.at_latest_edge(),
            following_latest: self.follow_latest,
        }
    }

    // Memory stays bounded during long live sessions; the kept window always
    // spans the view plus buffer and lookback margins.
    fn maybe_trim(&mut self) {
        let capacity = self.view.display_count() + 2 * self.config.buffer_candles;
        if self.store.len() <= capacity + capacity / 2 {
            return;
        }

        let lookback = self.max_lookback();
        let width = capacity + lookback;
        let len = self.store.len();

        let mut keep_start = self
            .view
            .start_index()
            .saturating_sub(self.config.buffer_candles + lookback);
        if keep_start + width > len {
            keep_start = len.saturating_sub(width);
        }
        let keep_end = (keep_start + width).min(len);

        let removed_left = self.store.trim_to(keep_start..keep_end);
        debug!(
            removed_left,
            kept = self.store.len(),
            "trimmed candle store"
        );
        self.view.rebase_left(removed_left);
        self.view.clamp(self.store.len());
    }
}
