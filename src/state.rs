use crate::chart::runtime::{
    run_chart_window, ChartCommand, ChartEvent, COMMAND_CHANNEL_CAPACITY, EVENT_CHANNEL_CAPACITY,
};
use crate::chart::types::{
    ChartStatusSnapshot, ChartStreamState, ChartSubscriptionArgs, ChartSubscriptionSession,
    DEFAULT_SYMBOL,
};
use crate::error::ChartError;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct ChartSubscriptionHandle {
    pub cancellation_token: CancellationToken,
    pub join_handle: tokio::task::JoinHandle<()>,
    pub commands: mpsc::Sender<ChartCommand>,
}

// One chart instance owns one of these; nothing here is global, so multiple
// panels and tests each carry their own.
pub struct ChartState {
    subscription: tokio::sync::Mutex<Option<ChartSubscriptionHandle>>,
    status: Arc<Mutex<ChartStatusSnapshot>>,
}

impl ChartState {
    pub fn new() -> Self {
        let status = ChartStatusSnapshot::stopped(
            DEFAULT_SYMBOL.to_string(),
            Some("subscription idle".to_string()),
        );

        Self {
            subscription: tokio::sync::Mutex::new(None),
            status: Arc::new(Mutex::new(status)),
        }
    }

    pub async fn start_subscription(
        &self,
        args: ChartSubscriptionArgs,
    ) -> Result<
        (
            ChartSubscriptionSession,
            mpsc::Sender<ChartCommand>,
            mpsc::Receiver<ChartEvent>,
        ),
        ChartError,
    > {
        let config = args.normalize()?;

        // Superseding a subscription cancels the previous runtime first, so a
        // late fetch for the old symbol can never land in the new window.
        let existing_handle = {
            let mut subscription_slot = self.subscription.lock().await;
            subscription_slot.take()
        };
        if let Some(handle) = existing_handle {
            handle.cancellation_token.cancel();
            let _ = handle.join_handle.await;
        }

        let cancellation_token = CancellationToken::new();
        let task_token = cancellation_token.clone();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let status_store = Arc::clone(&self.status);
        let runtime_config = config.clone();

        let join_handle = tokio::spawn(async move {
            run_chart_window(runtime_config, command_rx, event_tx, status_store, task_token).await;
        });

        {
            let mut subscription_slot = self.subscription.lock().await;
            *subscription_slot = Some(ChartSubscriptionHandle {
                cancellation_token,
                join_handle,
                commands: command_tx.clone(),
            });
        }

        Ok((
            ChartSubscriptionSession::from_config(&config),
            command_tx,
            event_rx,
        ))
    }

    pub async fn stop_subscription(&self) -> bool {
        let existing_handle = {
            let mut subscription_slot = self.subscription.lock().await;
            subscription_slot.take()
        };

        let stopped = if let Some(handle) = existing_handle {
            handle.cancellation_token.cancel();
            let _ = handle.join_handle.await;
            true
        } else {
            false
        };

        {
            let (current_symbol, current_timeframe) = {
                let readable = self.status.lock();
                (readable.symbol.clone(), readable.timeframe)
            };
            let mut writable = self.status.lock();
            *writable = ChartStatusSnapshot {
                state: ChartStreamState::Stopped,
                symbol: current_symbol,
                timeframe: current_timeframe,
                store_len: 0,
                latest_known_sequence: None,
                reason: Some("subscription stopped by command".to_string()),
            };
        }

        stopped
    }

    pub fn status(&self) -> ChartStatusSnapshot {
        self.status.lock().clone()
    }

    pub async fn commands(&self) -> Option<mpsc::Sender<ChartCommand>> {
        let subscription_slot = self.subscription.lock().await;
        subscription_slot
            .as_ref()
            .map(|handle| handle.commands.clone())
    }
}

impl Default for ChartState {
    fn default() -> Self {
        Self::new()
    }
}
