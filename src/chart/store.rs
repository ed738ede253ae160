use crate::chart::types::Bar;
use std::ops::Range;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub prepended: usize,
}

#[derive(Debug, Clone)]
pub struct SequenceStore {
    bars: Vec<Bar>,
    latest_known_sequence: Option<i64>,
    oldest_available_sequence: i64,
}

impl SequenceStore {
    pub fn new(oldest_available_sequence: i64) -> Self {
        Self {
            bars: Vec::new(),
            latest_known_sequence: None,
            oldest_available_sequence,
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn bars_mut(&mut self) -> &mut [Bar] {
        &mut self.bars
    }

    pub fn min_loaded_sequence(&self) -> Option<i64> {
        self.bars.first().map(|bar| bar.sequence)
    }

    pub fn max_loaded_sequence(&self) -> Option<i64> {
        self.bars.last().map(|bar| bar.sequence)
    }

    pub fn latest_known_sequence(&self) -> Option<i64> {
        self.latest_known_sequence
    }

    pub fn oldest_available_sequence(&self) -> i64 {
        self.oldest_available_sequence
    }

    // A live feed's announced latest is authoritative going forward, so a
    // lower (out-of-order) announce never rolls the bound back.
    pub fn announce_latest_sequence(&mut self, sequence: i64) {
        self.latest_known_sequence = Some(match self.latest_known_sequence {
            Some(existing) => existing.max(sequence),
            None => sequence,
        });
    }

    pub fn has_older_history(&self) -> bool {
        self.min_loaded_sequence()
            .map(|min| min > self.oldest_available_sequence)
            .unwrap_or(false)
    }

    pub fn has_newer_than_loaded(&self) -> bool {
        match (self.max_loaded_sequence(), self.latest_known_sequence) {
            (Some(max_loaded), Some(latest)) => max_loaded < latest,
            _ => false,
        }
    }

    pub fn index_of_first_at_or_after(&self, sequence: i64) -> Option<usize> {
        self.bars.iter().position(|bar| bar.sequence >= sequence)
    }

    pub fn replace_all(&mut self, bars: Vec<Bar>, latest_known_sequence: Option<i64>) {
        let mut sorted = bars;
        sorted.sort_by_key(|bar| bar.sequence);

        let mut deduped: Vec<Bar> = Vec::with_capacity(sorted.len());
        for bar in sorted {
            match deduped.last_mut() {
                Some(existing) if existing.sequence == bar.sequence => existing.merge_from(bar),
                _ => deduped.push(bar),
            }
        }

        self.bars = deduped;
        if self.bars.is_empty() {
            return;
        }

        self.latest_known_sequence = latest_known_sequence;
        self.raise_latest_to_loaded();
    }

    pub fn merge(&mut self, incoming: Vec<Bar>) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        if incoming.is_empty() {
            return outcome;
        }

        let old_min = self.min_loaded_sequence();
        for bar in incoming {
            match self
                .bars
                .binary_search_by_key(&bar.sequence, |existing| existing.sequence)
            {
                Ok(index) => {
                    self.bars[index].merge_from(bar);
                    outcome.updated += 1;
                }
                Err(index) => {
                    if old_min.map(|min| bar.sequence < min).unwrap_or(false) {
                        outcome.prepended += 1;
                    }
                    self.bars.insert(index, bar);
                    outcome.inserted += 1;
                }
            }
        }

        self.raise_latest_to_loaded();
        outcome
    }

    pub fn trim_to(&mut self, keep: Range<usize>) -> usize {
        let end = keep.end.min(self.bars.len());
        let start = keep.start.min(end);
        self.bars.truncate(end);
        self.bars.drain(..start);
        start
    }

    pub fn clear(&mut self) {
        self.bars.clear();
        self.latest_known_sequence = None;
    }

    fn raise_latest_to_loaded(&mut self) {
        if let Some(max_loaded) = self.max_loaded_sequence() {
            self.announce_latest_sequence(max_loaded);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::types::IndicatorValue;

    fn bar(sequence: i64) -> Bar {
        let base = sequence as f64;
        Bar::new(
            sequence,
            sequence * 60_000,
            base,
            base + 1.0,
            base - 1.0,
            base + 0.5,
            10.0,
        )
    }

    fn sequences(store: &SequenceStore) -> Vec<i64> {
        store.bars().iter().map(|bar| bar.sequence).collect()
    }

    #[test]
    fn replace_all_sorts_and_dedupes() {
        let mut store = SequenceStore::new(1);
        store.replace_all(vec![bar(5), bar(2), bar(5), bar(9), bar(2)], None);

        assert_eq!(sequences(&store), vec![2, 5, 9]);
        assert_eq!(store.min_loaded_sequence(), Some(2));
        assert_eq!(store.max_loaded_sequence(), Some(9));
        assert_eq!(store.latest_known_sequence(), Some(9));
    }

    #[test]
    fn replace_all_with_empty_input_leaves_bounds_alone() {
        let mut store = SequenceStore::new(1);
        store.announce_latest_sequence(50);
        store.replace_all(Vec::new(), Some(10));

        assert!(store.is_empty());
        assert_eq!(store.latest_known_sequence(), Some(50));
    }

    #[test]
    fn merge_keeps_bars_strictly_ascending() {
        let mut store = SequenceStore::new(1);
        store.replace_all(vec![bar(10), bar(12)], None);
        let outcome = store.merge(vec![bar(11), bar(9), bar(13), bar(12)]);

        assert_eq!(sequences(&store), vec![9, 10, 11, 12, 13]);
        assert_eq!(outcome.inserted, 3);
        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.prepended, 1);
    }

    #[test]
    fn merge_is_idempotent() {
        let mut store = SequenceStore::new(1);
        store.replace_all(vec![bar(1), bar(2)], None);

        let batch = vec![bar(2), bar(3), bar(4)];
        store.merge(batch.clone());
        let first_pass = store.bars().to_vec();
        let outcome = store.merge(batch);

        assert_eq!(store.bars(), first_pass.as_slice());
        assert_eq!(outcome.inserted, 0);
        assert_eq!(outcome.updated, 3);
        assert_eq!(outcome.prepended, 0);
    }

    #[test]
    fn merge_counts_only_genuinely_new_prepended_bars() {
        let mut store = SequenceStore::new(1);
        store.replace_all(vec![bar(10), bar(11)], None);

        // 10 is a duplicate, 7 and 8 are genuinely new history.
        let outcome = store.merge(vec![bar(7), bar(8), bar(10)]);
        assert_eq!(outcome.prepended, 2);
        assert_eq!(sequences(&store), vec![7, 8, 10, 11]);
    }

    #[test]
    fn merge_preserves_indicator_values_on_duplicates() {
        let mut store = SequenceStore::new(1);
        store.replace_all(vec![bar(1)], None);
        store.bars_mut()[0]
            .indicator_values
            .insert(9, IndicatorValue::Scalar(3.5));

        store.merge(vec![bar(1)]);
        assert_eq!(
            store.bars()[0].indicator_values.get(&9),
            Some(&IndicatorValue::Scalar(3.5))
        );
    }

    #[test]
    fn bounds_invariant_holds_after_merges() {
        let mut store = SequenceStore::new(1);
        store.replace_all(vec![bar(5), bar(6)], Some(20));
        store.merge(vec![bar(3), bar(8)]);

        let min = store.min_loaded_sequence().unwrap();
        let max = store.max_loaded_sequence().unwrap();
        let latest = store.latest_known_sequence().unwrap();
        assert!(store.oldest_available_sequence() <= min);
        assert!(min <= max);
        assert!(max <= latest);
    }

    #[test]
    fn announce_latest_is_monotonic() {
        let mut store = SequenceStore::new(1);
        store.announce_latest_sequence(100);
        store.announce_latest_sequence(40);
        assert_eq!(store.latest_known_sequence(), Some(100));
    }

    #[test]
    fn merge_raises_latest_to_loaded_maximum() {
        let mut store = SequenceStore::new(1);
        store.replace_all(vec![bar(5)], Some(5));
        store.merge(vec![bar(9)]);
        assert_eq!(store.latest_known_sequence(), Some(9));
    }

    #[test]
    fn history_availability_flags() {
        let mut store = SequenceStore::new(1);
        assert!(!store.has_older_history());
        assert!(!store.has_newer_than_loaded());

        store.replace_all(vec![bar(5), bar(6)], Some(10));
        assert!(store.has_older_history());
        assert!(store.has_newer_than_loaded());

        store.merge(vec![bar(1)]);
        assert!(!store.has_older_history());
    }

    #[test]
    fn trim_returns_left_removal_count() {
        let mut store = SequenceStore::new(1);
        store.replace_all((1..=10).map(bar).collect(), None);

        let removed_left = store.trim_to(3..8);
        assert_eq!(removed_left, 3);
        assert_eq!(sequences(&store), vec![4, 5, 6, 7, 8]);
    }

    #[test]
    fn anchor_lookup_finds_first_at_or_after() {
        let mut store = SequenceStore::new(1);
        store.replace_all(vec![bar(2), bar(4), bar(6)], None);
        assert_eq!(store.index_of_first_at_or_after(4), Some(1));
        assert_eq!(store.index_of_first_at_or_after(5), Some(2));
        assert_eq!(store.index_of_first_at_or_after(7), None);
    }
}
