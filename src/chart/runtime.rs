use crate::chart::buffer::{FetchDirection, FetchRequest, MergeDirection};
use crate::chart::indicator::{IndicatorCategory, IndicatorKind, IndicatorSettings, IndicatorSpec};
use crate::chart::types::{Bar, ChartConfig, ChartFrame, ChartStatusSnapshot, ChartStreamState};
use crate::chart::window::CandleWindowManager;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const COMMAND_CHANNEL_CAPACITY: usize = 256;
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
const STATUS_HEARTBEAT_MS: u64 = 1_000;

#[derive(Debug, Clone)]
pub enum ChartCommand {
    Bootstrap {
        epoch: u64,
        bars: Vec<Bar>,
        latest_known_sequence: Option<i64>,
        anchor_sequence: Option<i64>,
    },
    MergeBatch {
        epoch: u64,
        direction: MergeDirection,
        bars: Vec<Bar>,
        latest_known_sequence: Option<i64>,
    },
    FetchFailed {
        epoch: u64,
        direction: FetchDirection,
        reason: String,
    },
    LiveBar {
        bar: Bar,
        latest_known_sequence: Option<i64>,
    },
    LiveLatestSequence {
        sequence: i64,
    },
    ScrollTo {
        start_index: usize,
    },
    SetDisplayCount {
        display_count: usize,
        anchor_sequence: Option<i64>,
    },
    AddIndicator {
        kind: IndicatorKind,
        category: Option<IndicatorCategory>,
        settings: Option<IndicatorSettings>,
    },
    UpdateIndicator {
        id: u64,
        kind: Option<IndicatorKind>,
        category: Option<IndicatorCategory>,
        settings: Option<IndicatorSettings>,
    },
    RemoveIndicator {
        id: u64,
    },
    Reset {
        anchor_sequence: Option<i64>,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum InitialFetchPlan {
    LatestSequence {
        latest_known_sequence: i64,
        count: usize,
    },
    DateRange {
        count: usize,
    },
    AroundSequence {
        anchor_sequence: i64,
        count: usize,
    },
}

#[derive(Debug, Clone)]
pub enum ChartEvent {
    InitialFetchNeeded {
        epoch: u64,
        plan: InitialFetchPlan,
    },
    FetchNeeded(FetchRequest),
    LookbackNeeded {
        min_loaded_sequence: Option<i64>,
        lookback_needed: usize,
    },
    IndicatorsChanged {
        indicators: Vec<IndicatorSpec>,
    },
    Frame(ChartFrame),
    Status(ChartStatusSnapshot),
}

enum CommandDirective {
    Continue,
    RecheckBuffers,
    Shutdown,
}

pub async fn run_chart_window(
    config: ChartConfig,
    mut commands: mpsc::Receiver<ChartCommand>,
    events: mpsc::Sender<ChartEvent>,
    status_store: Arc<Mutex<ChartStatusSnapshot>>,
    cancel_token: CancellationToken,
) {
    let mut manager = CandleWindowManager::new(config.clone());
    let mut epoch: u64 = 1;

    publish_status(
        &status_store,
        &events,
        &manager,
        ChartStreamState::Initializing,
        Some("waiting for live sequence announce".to_string()),
    )
    .await;

    // Two-path startup: prefer the live feed's announced latest sequence,
    // fall back to a date-range fetch when the channel stays quiet.
    let live_wait_deadline = Instant::now() + Duration::from_millis(config.live_wait_ms);
    let mut announced: Option<i64> = None;
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                publish_status(
                    &status_store,
                    &events,
                    &manager,
                    ChartStreamState::Stopped,
                    Some("chart window stopped".to_string()),
                )
                .await;
                return;
            }
            _ = tokio::time::sleep_until(live_wait_deadline) => break,
            command = commands.recv() => {
                match command {
                    Some(ChartCommand::LiveLatestSequence { sequence }) => {
                        announced = Some(sequence);
                        break;
                    }
                    Some(ChartCommand::LiveBar { bar, latest_known_sequence }) => {
                        announced = Some(latest_known_sequence.unwrap_or(bar.sequence));
                        break;
                    }
                    Some(ChartCommand::Shutdown) | None => {
                        publish_status(
                            &status_store,
                            &events,
                            &manager,
                            ChartStreamState::Stopped,
                            Some("chart window stopped".to_string()),
                        )
                        .await;
                        return;
                    }
                    Some(other) => {
                        // Indicator setup and view changes are valid before
                        // any data arrives; buffer rechecks are moot on an
                        // empty store.
                        if let CommandDirective::Shutdown = handle_command(
                            other,
                            &mut manager,
                            &events,
                            &status_store,
                            &mut epoch,
                        )
                        .await
                        {
                            return;
                        }
                    }
                }
            }
        }
    }

    let plan = match announced {
        Some(latest) => {
            manager.announce_latest_sequence(latest);
            InitialFetchPlan::LatestSequence {
                latest_known_sequence: latest,
                count: config.initial_fetch_count,
            }
        }
        None => InitialFetchPlan::DateRange {
            count: config.initial_fetch_count,
        },
    };
    let _ = events
        .send(ChartEvent::InitialFetchNeeded { epoch, plan })
        .await;

    let mut frame_ticker =
        tokio::time::interval(Duration::from_millis(config.emit_interval_ms));
    frame_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut heartbeat = tokio::time::interval(Duration::from_millis(STATUS_HEARTBEAT_MS));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let debounce = tokio::time::sleep(Duration::from_millis(0));
    tokio::pin!(debounce);
    let mut debounce_armed = false;

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            command = commands.recv() => {
                let Some(command) = command else { break };
                match handle_command(command, &mut manager, &events, &status_store, &mut epoch).await {
                    CommandDirective::Continue => {}
                    CommandDirective::RecheckBuffers => {
                        // Quiet-period debounce so rapid panning coalesces
                        // into one signal burst.
                        debounce
                            .as_mut()
                            .reset(Instant::now() + Duration::from_millis(config.debounce_ms));
                        debounce_armed = true;
                    }
                    CommandDirective::Shutdown => break,
                }
            }
            _ = frame_ticker.tick() => {
                if manager.take_frame_dirty() {
                    let _ = events.send(ChartEvent::Frame(manager.frame())).await;
                }
            }
            _ = heartbeat.tick() => {
                let (state, reason) = {
                    let readable = status_store.lock();
                    (readable.state, readable.reason.clone())
                };
                publish_status(&status_store, &events, &manager, state, reason).await;
            }
            _ = &mut debounce, if debounce_armed => {
                debounce_armed = false;
                emit_buffer_signals(&mut manager, &events, epoch).await;
            }
        }
    }

    publish_status(
        &status_store,
        &events,
        &manager,
        ChartStreamState::Stopped,
        Some("chart window stopped".to_string()),
    )
    .await;
}

async fn handle_command(
    command: ChartCommand,
    manager: &mut CandleWindowManager,
    events: &mpsc::Sender<ChartEvent>,
    status_store: &Arc<Mutex<ChartStatusSnapshot>>,
    epoch: &mut u64,
) -> CommandDirective {
    match command {
        ChartCommand::Bootstrap {
            epoch: command_epoch,
            bars,
            latest_known_sequence,
            anchor_sequence,
        } => {
            if command_epoch != *epoch {
                debug!(command_epoch, current_epoch = *epoch, "stale bootstrap discarded");
                return CommandDirective::Continue;
            }
            manager.initialize(bars, latest_known_sequence, anchor_sequence);
            publish_status(
                status_store,
                events,
                manager,
                ChartStreamState::Live,
                Some("initial candles loaded".to_string()),
            )
            .await;
            CommandDirective::RecheckBuffers
        }
        ChartCommand::MergeBatch {
            epoch: command_epoch,
            direction,
            bars,
            latest_known_sequence,
        } => {
            if command_epoch != *epoch {
                debug!(command_epoch, current_epoch = *epoch, "stale merge discarded");
                return CommandDirective::Continue;
            }
            let outcome = manager.merge(bars, direction, latest_known_sequence);
            debug!(
                ?direction,
                inserted = outcome.inserted,
                updated = outcome.updated,
                prepended = outcome.prepended,
                "merged candle batch"
            );
            CommandDirective::RecheckBuffers
        }
        ChartCommand::FetchFailed {
            epoch: command_epoch,
            direction,
            reason,
        } => {
            if command_epoch != *epoch {
                return CommandDirective::Continue;
            }
            manager.set_buffer_loading(direction, false);
            warn!(?direction, %reason, "buffer fetch failed");
            let state = status_store.lock().state;
            publish_status(
                status_store,
                events,
                manager,
                state,
                Some(format!("buffer fetch failed: {reason}")),
            )
            .await;
            CommandDirective::RecheckBuffers
        }
        ChartCommand::LiveBar {
            bar,
            latest_known_sequence,
        } => {
            manager.merge(vec![bar], MergeDirection::Update, latest_known_sequence);
            CommandDirective::RecheckBuffers
        }
        ChartCommand::LiveLatestSequence { sequence } => {
            manager.announce_latest_sequence(sequence);
            CommandDirective::RecheckBuffers
        }
        ChartCommand::ScrollTo { start_index } => {
            manager.scroll_to(start_index);
            CommandDirective::RecheckBuffers
        }
        ChartCommand::SetDisplayCount {
            display_count,
            anchor_sequence,
        } => {
            manager.set_display_count(display_count, anchor_sequence);
            CommandDirective::RecheckBuffers
        }
        ChartCommand::AddIndicator {
            kind,
            category,
            settings,
        } => {
            match manager.add_indicator(kind, category, settings) {
                Ok(_) => {
                    emit_indicator_events(manager, events).await;
                }
                Err(error) => {
                    warn!(%error, "indicator add rejected");
                    let state = status_store.lock().state;
                    publish_status(
                        status_store,
                        events,
                        manager,
                        state,
                        Some(format!("indicator add rejected: {error}")),
                    )
                    .await;
                }
            }
            CommandDirective::RecheckBuffers
        }
        ChartCommand::UpdateIndicator {
            id,
            kind,
            category,
            settings,
        } => {
            match manager.update_indicator(id, kind, category, settings) {
                Ok(_) => {
                    emit_indicator_events(manager, events).await;
                }
                Err(error) => {
                    warn!(id, %error, "indicator update rejected");
                    let state = status_store.lock().state;
                    publish_status(
                        status_store,
                        events,
                        manager,
                        state,
                        Some(format!("indicator update rejected: {error}")),
                    )
                    .await;
                }
            }
            CommandDirective::RecheckBuffers
        }
        ChartCommand::RemoveIndicator { id } => {
            match manager.remove_indicator(id) {
                Ok(()) => {
                    emit_indicator_events(manager, events).await;
                }
                Err(error) => {
                    warn!(id, %error, "indicator remove rejected");
                }
            }
            CommandDirective::RecheckBuffers
        }
        ChartCommand::Reset { anchor_sequence } => {
            let last_known = manager.store().latest_known_sequence();
            *epoch += 1;
            manager.reset();
            publish_status(
                status_store,
                events,
                manager,
                ChartStreamState::Initializing,
                Some("rebuilding candle window".to_string()),
            )
            .await;

            let count = manager.config().initial_fetch_count;
            let plan = match (anchor_sequence, last_known) {
                (Some(anchor), _) => InitialFetchPlan::AroundSequence {
                    anchor_sequence: anchor,
                    count,
                },
                (None, Some(latest)) => InitialFetchPlan::LatestSequence {
                    latest_known_sequence: latest,
                    count,
                },
                (None, None) => InitialFetchPlan::DateRange { count },
            };
            let _ = events
                .send(ChartEvent::InitialFetchNeeded {
                    epoch: *epoch,
                    plan,
                })
                .await;
            CommandDirective::Continue
        }
        ChartCommand::Shutdown => CommandDirective::Shutdown,
    }
}

async fn emit_indicator_events(manager: &CandleWindowManager, events: &mpsc::Sender<ChartEvent>) {
    let _ = events
        .send(ChartEvent::IndicatorsChanged {
            indicators: manager.indicators().to_vec(),
        })
        .await;

    // Backfill request so the new lookback can resolve without disturbing
    // the current view.
    let shortfall = manager.lookback_shortfall();
    if shortfall > 0 {
        let _ = events
            .send(ChartEvent::LookbackNeeded {
                min_loaded_sequence: manager.store().min_loaded_sequence(),
                lookback_needed: shortfall,
            })
            .await;
    }
}

async fn emit_buffer_signals(
    manager: &mut CandleWindowManager,
    events: &mpsc::Sender<ChartEvent>,
    epoch: u64,
) {
    let needs = manager.buffer_needs();
    if needs.needs_past {
        let request = manager.fetch_request(FetchDirection::Past, epoch);
        manager.set_buffer_loading(FetchDirection::Past, true);
        let _ = events.send(ChartEvent::FetchNeeded(request)).await;
    }
    if needs.needs_future {
        let request = manager.fetch_request(FetchDirection::Future, epoch);
        manager.set_buffer_loading(FetchDirection::Future, true);
        let _ = events.send(ChartEvent::FetchNeeded(request)).await;
    }
}

async fn publish_status(
    status_store: &Arc<Mutex<ChartStatusSnapshot>>,
    events: &mpsc::Sender<ChartEvent>,
    manager: &CandleWindowManager,
    state: ChartStreamState,
    reason: Option<String>,
) {
    let snapshot = ChartStatusSnapshot {
        state,
        symbol: manager.config().symbol.clone(),
        timeframe: manager.config().timeframe,
        store_len: manager.store().len(),
        latest_known_sequence: manager.store().latest_known_sequence(),
        reason,
    };

    {
        let mut writable = status_store.lock();
        *writable = snapshot.clone();
    }

    let _ = events.send(ChartEvent::Status(snapshot)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::types::ChartSubscriptionArgs;

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

    fn bars(range: std::ops::RangeInclusive<i64>) -> Vec<Bar> {
        range.map(bar).collect()
    }

    struct Harness {
        commands: mpsc::Sender<ChartCommand>,
        events: mpsc::Receiver<ChartEvent>,
        status: Arc<Mutex<ChartStatusSnapshot>>,
        cancel: CancellationToken,
        handle: tokio::task::JoinHandle<()>,
    }

    fn spawn_runtime(args: ChartSubscriptionArgs) -> Harness {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let config = args.normalize().expect("test args should normalize");
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let status = Arc::new(Mutex::new(ChartStatusSnapshot::stopped(
            config.symbol.clone(),
            None,
        )));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_chart_window(
            config,
            command_rx,
            event_tx,
            Arc::clone(&status),
            cancel.clone(),
        ));

        Harness {
            commands: command_tx,
            events: event_rx,
            status,
            cancel,
            handle,
        }
    }

    async fn next_matching<F, T>(events: &mut mpsc::Receiver<ChartEvent>, mut pick: F) -> T
    where
        F: FnMut(ChartEvent) -> Option<T>,
    {
        for _ in 0..200 {
            let event = tokio::time::timeout(Duration::from_secs(30), events.recv())
                .await
                .expect("timed out waiting for event")
                .expect("event channel closed");
            if let Some(found) = pick(event) {
                return found;
            }
        }
        panic!("expected event did not arrive within 200 events");
    }

    async fn initial_plan(events: &mut mpsc::Receiver<ChartEvent>) -> (u64, InitialFetchPlan) {
        next_matching(events, |event| match event {
            ChartEvent::InitialFetchNeeded { epoch, plan } => Some((epoch, plan)),
            _ => None,
        })
        .await
    }

    #[tokio::test(start_paused = true)]
    async fn initial_fetch_prefers_live_announced_sequence() {
        let mut harness = spawn_runtime(ChartSubscriptionArgs::default());

        harness
            .commands
            .send(ChartCommand::LiveLatestSequence { sequence: 500 })
            .await
            .expect("runtime should accept commands");

        let (epoch, plan) = initial_plan(&mut harness.events).await;
        assert_eq!(epoch, 1);
        assert_eq!(
            plan,
            InitialFetchPlan::LatestSequence {
                latest_known_sequence: 500,
                count: 300,
            }
        );

        harness.cancel.cancel();
        harness.handle.await.expect("runtime task should join");
    }

    #[tokio::test(start_paused = true)]
    async fn initial_fetch_falls_back_to_date_range() {
        let mut harness = spawn_runtime(ChartSubscriptionArgs::default());

        // No live announce arrives; the bounded wait elapses.
        let (_, plan) = initial_plan(&mut harness.events).await;
        assert_eq!(plan, InitialFetchPlan::DateRange { count: 300 });

        harness.cancel.cancel();
        harness.handle.await.expect("runtime task should join");
    }

    #[tokio::test(start_paused = true)]
    async fn bootstrap_produces_tail_aligned_frame() {
        let mut harness = spawn_runtime(ChartSubscriptionArgs::default());

        harness
            .commands
            .send(ChartCommand::LiveLatestSequence { sequence: 300 })
            .await
            .expect("runtime should accept commands");
        let (epoch, _) = initial_plan(&mut harness.events).await;

        harness
            .commands
            .send(ChartCommand::Bootstrap {
                epoch,
                bars: bars(1..=300),
                latest_known_sequence: Some(300),
                anchor_sequence: None,
            })
            .await
            .expect("runtime should accept commands");

        // The pre-bootstrap frame is empty and still initializing; wait for
        // the populated one.
        let frame = next_matching(&mut harness.events, |event| match event {
            ChartEvent::Frame(frame) if !frame.is_initializing => Some(frame),
            _ => None,
        })
        .await;

        assert_eq!(frame.store_len, 300);
        assert_eq!(frame.start_index, 200);
        assert_eq!(frame.bars.len(), 100);
        assert!(!frame.is_initializing);
        assert!(frame.at_latest_edge);

        harness.cancel.cancel();
        harness.handle.await.expect("runtime task should join");
    }

    #[tokio::test(start_paused = true)]
    async fn stale_epoch_merges_are_discarded() {
        let mut harness = spawn_runtime(ChartSubscriptionArgs::default());

        harness
            .commands
            .send(ChartCommand::LiveLatestSequence { sequence: 300 })
            .await
            .expect("runtime should accept commands");
        let (epoch, _) = initial_plan(&mut harness.events).await;
        harness
            .commands
            .send(ChartCommand::Bootstrap {
                epoch,
                bars: bars(1..=300),
                latest_known_sequence: Some(300),
                anchor_sequence: None,
            })
            .await
            .expect("runtime should accept commands");

        harness
            .commands
            .send(ChartCommand::MergeBatch {
                epoch: epoch + 7,
                direction: MergeDirection::Future,
                bars: bars(301..=310),
                latest_known_sequence: Some(310),
            })
            .await
            .expect("runtime should accept commands");
        harness
            .commands
            .send(ChartCommand::Shutdown)
            .await
            .expect("runtime should accept commands");
        harness.handle.await.expect("runtime task should join");

        let snapshot = harness.status.lock().clone();
        assert_eq!(snapshot.state, ChartStreamState::Stopped);
        assert_eq!(snapshot.store_len, 300);
    }

    #[tokio::test(start_paused = true)]
    async fn thin_left_margin_signals_past_fetch_after_debounce() {
        let mut harness = spawn_runtime(ChartSubscriptionArgs::default());

        harness
            .commands
            .send(ChartCommand::LiveLatestSequence { sequence: 304 })
            .await
            .expect("runtime should accept commands");
        let (epoch, _) = initial_plan(&mut harness.events).await;
        harness
            .commands
            .send(ChartCommand::Bootstrap {
                epoch,
                bars: bars(5..=304),
                latest_known_sequence: Some(304),
                anchor_sequence: None,
            })
            .await
            .expect("runtime should accept commands");

        harness
            .commands
            .send(ChartCommand::ScrollTo { start_index: 10 })
            .await
            .expect("runtime should accept commands");

        let request = next_matching(&mut harness.events, |event| match event {
            ChartEvent::FetchNeeded(request) if request.direction == FetchDirection::Past => {
                Some(request)
            }
            _ => None,
        })
        .await;

        assert_eq!(request.epoch, epoch);
        assert_eq!(request.min_loaded_sequence, Some(5));
        assert_eq!(request.left_buffer, 10);

        harness.cancel.cancel();
        harness.handle.await.expect("runtime task should join");
    }

    #[tokio::test(start_paused = true)]
    async fn indicator_add_emits_lookback_shortfall() {
        let mut harness = spawn_runtime(ChartSubscriptionArgs::default());

        harness
            .commands
            .send(ChartCommand::LiveLatestSequence { sequence: 304 })
            .await
            .expect("runtime should accept commands");
        let (epoch, _) = initial_plan(&mut harness.events).await;
        harness
            .commands
            .send(ChartCommand::Bootstrap {
                epoch,
                bars: bars(5..=304),
                latest_known_sequence: Some(304),
                anchor_sequence: None,
            })
            .await
            .expect("runtime should accept commands");
        harness
            .commands
            .send(ChartCommand::ScrollTo { start_index: 10 })
            .await
            .expect("runtime should accept commands");

        harness
            .commands
            .send(ChartCommand::AddIndicator {
                kind: IndicatorKind::Macd,
                category: None,
                settings: None,
            })
            .await
            .expect("runtime should accept commands");

        let indicators = next_matching(&mut harness.events, |event| match event {
            ChartEvent::IndicatorsChanged { indicators } => Some(indicators),
            _ => None,
        })
        .await;
        assert_eq!(indicators.len(), 1);
        assert_eq!(indicators[0].kind, IndicatorKind::Macd);

        let shortfall = next_matching(&mut harness.events, |event| match event {
            ChartEvent::LookbackNeeded {
                lookback_needed, ..
            } => Some(lookback_needed),
            _ => None,
        })
        .await;
        assert_eq!(shortfall, 23);

        harness.cancel.cancel();
        harness.handle.await.expect("runtime task should join");
    }

    #[tokio::test(start_paused = true)]
    async fn reset_bumps_epoch_and_replans_initial_fetch() {
        let mut harness = spawn_runtime(ChartSubscriptionArgs::default());

        harness
            .commands
            .send(ChartCommand::LiveLatestSequence { sequence: 300 })
            .await
            .expect("runtime should accept commands");
        let (first_epoch, _) = initial_plan(&mut harness.events).await;
        harness
            .commands
            .send(ChartCommand::Bootstrap {
                epoch: first_epoch,
                bars: bars(1..=300),
                latest_known_sequence: Some(300),
                anchor_sequence: None,
            })
            .await
            .expect("runtime should accept commands");

        harness
            .commands
            .send(ChartCommand::Reset {
                anchor_sequence: Some(120),
            })
            .await
            .expect("runtime should accept commands");

        let (second_epoch, plan) = initial_plan(&mut harness.events).await;
        assert_eq!(second_epoch, first_epoch + 1);
        assert_eq!(
            plan,
            InitialFetchPlan::AroundSequence {
                anchor_sequence: 120,
                count: 300,
            }
        );

        harness.cancel.cancel();
        harness.handle.await.expect("runtime task should join");
    }
}
