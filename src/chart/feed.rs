use crate::chart::runtime::ChartCommand;
use crate::chart::types::{Bar, ChartTimeframe};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

// Deterministic bar source for demos and runtime tests; no wall clock, so
// the same start sequence always produces the same series.
#[derive(Debug, Clone)]
pub struct SyntheticFeed {
    next_sequence: i64,
    timeframe: ChartTimeframe,
    price: f64,
}

impl SyntheticFeed {
    pub fn new(start_sequence: i64, timeframe: ChartTimeframe) -> Self {
        Self {
            next_sequence: start_sequence.max(1),
            timeframe,
            price: 100_000.0,
        }
    }

    pub fn next_sequence(&self) -> i64 {
        self.next_sequence
    }

    pub fn next_bar(&mut self) -> Bar {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let drift = ((sequence % 7) as f64 - 3.0) * 2.1;
        let open = self.price;
        let close = (open + drift).max(1.0);
        let high = open.max(close) + 1.25;
        let low = (open.min(close) - 1.1).max(0.1);
        let volume = 2.0 + (sequence % 5) as f64 * 0.3;
        self.price = close;

        Bar::new(
            sequence,
            sequence * self.timeframe.duration_ms(),
            open,
            high,
            low,
            close,
            volume,
        )
    }

    pub fn history(&mut self, count: usize) -> Vec<Bar> {
        (0..count).map(|_| self.next_bar()).collect()
    }
}

pub async fn run_synthetic_feed(
    commands: mpsc::Sender<ChartCommand>,
    timeframe: ChartTimeframe,
    start_sequence: i64,
    emit_interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut feed = SyntheticFeed::new(start_sequence, timeframe);
    let mut ticker = tokio::time::interval(emit_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    while !cancel_token.is_cancelled() {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = ticker.tick() => {
                let bar = feed.next_bar();
                let latest = bar.sequence;
                let command = ChartCommand::LiveBar {
                    bar,
                    latest_known_sequence: Some(latest),
                };
                if commands.send(command).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_monotonic_sequences_and_valid_ohlc() {
        let mut feed = SyntheticFeed::new(1, ChartTimeframe::M1);
        let bars = feed.history(200);

        for pair in bars.windows(2) {
            assert_eq!(pair[1].sequence, pair[0].sequence + 1);
        }
        for bar in &bars {
            assert!(bar.low <= bar.open.min(bar.close));
            assert!(bar.open.max(bar.close) <= bar.high);
            assert!(bar.volume > 0.0);
        }
    }

    #[test]
    fn same_start_sequence_repeats_the_series() {
        let mut first = SyntheticFeed::new(50, ChartTimeframe::M5);
        let mut second = SyntheticFeed::new(50, ChartTimeframe::M5);
        assert_eq!(first.history(25), second.history(25));
    }

    #[tokio::test(start_paused = true)]
    async fn feeds_live_bars_until_cancelled() {
        let (command_tx, mut command_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_synthetic_feed(
            command_tx,
            ChartTimeframe::M1,
            301,
            Duration::from_millis(100),
            cancel.clone(),
        ));

        let mut received = Vec::new();
        while received.len() < 3 {
            match command_rx.recv().await {
                Some(ChartCommand::LiveBar { bar, .. }) => received.push(bar.sequence),
                Some(_) => {}
                None => panic!("feed ended early"),
            }
        }
        assert_eq!(received, vec![301, 302, 303]);

        cancel.cancel();
        handle.await.expect("feed task should join");
    }
}
