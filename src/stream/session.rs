use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::metrics::Metrics;
use crate::models::common::Config;
use crate::models::events::NormalizedEvent;
use crate::models::filter::{FilterSpec, FilterTemplate};
use crate::reconciler::{Reconciler, Timeline};
use crate::stream::connection::{ConnectionManager, StreamEvent, Visibility};
use crate::stream::timer::DebounceTimer;

const COMMAND_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
enum Command {
    SetAccountFilter(Option<String>),
    Shutdown,
}

/// Control and subscription surface of a running [`FeedSession`].
#[derive(Clone)]
pub struct FeedHandle {
    commands: mpsc::Sender<Command>,
    visibility: Arc<watch::Sender<Visibility>>,
    timeline: watch::Receiver<Vec<NormalizedEvent>>,
}

impl FeedHandle {
    /// Receiver of the timeline, newest first, republished after every merge that changed it
    /// and after every filter reset.
    pub fn subscribe(&self) -> watch::Receiver<Vec<NormalizedEvent>> {
        self.timeline.clone()
    }

    pub fn timeline(&self) -> Vec<NormalizedEvent> {
        self.timeline.borrow().clone()
    }

    /// Narrows the feed to `account` (or clears the narrowing). Applied after the filter
    /// debounce settles; each call restarts the debounce.
    pub async fn set_account_filter(&self, account: Option<String>) -> Result<()> {
        self.commands
            .send(Command::SetAccountFilter(account))
            .await
            .map_err(|_| anyhow!("feed session has stopped"))
    }

    pub fn set_visibility(&self, visibility: Visibility) {
        self.visibility.send_replace(visibility);
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.commands
            .send(Command::Shutdown)
            .await
            .map_err(|_| anyhow!("feed session has stopped"))
    }
}

/// Ties the connection manager and the reconciler together on a single task.
///
/// Every input (control commands, the filter debounce, the reconnect timer and inbound
/// frames) is handled to completion before the next one, so the timeline is never observed
/// mid-merge.
pub struct FeedSession {
    connection: ConnectionManager,
    reconciler: Reconciler,
    timeline: Timeline,
    template: FilterTemplate,
    filter: FilterSpec,
    pending_account: Option<Option<String>>,
    filter_debounce: DebounceTimer,
    debounce_delay: Duration,
    reconnect_delay: Duration,
    commands: mpsc::Receiver<Command>,
    visibility: watch::Receiver<Visibility>,
    timeline_tx: watch::Sender<Vec<NormalizedEvent>>,
    metrics: Option<Arc<Metrics>>,
}

impl FeedSession {
    pub fn new(config: &Config, metrics: Option<Arc<Metrics>>) -> (Self, FeedHandle) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (visibility_tx, visibility_rx) = watch::channel(Visibility::Visible);
        let (timeline_tx, timeline_rx) = watch::channel(Vec::new());

        let template = FilterTemplate::from_config(&config.filter);
        let filter = template.build(config.filter.account_id.as_deref());

        let session = Self {
            connection: ConnectionManager::new(config.stream.clone(), metrics.clone()),
            reconciler: Reconciler::new(),
            timeline: Timeline::new(config.timeline.max_len),
            template,
            filter,
            pending_account: None,
            filter_debounce: DebounceTimer::new(),
            debounce_delay: config.filter.debounce(),
            reconnect_delay: config.stream.reconnect_delay(),
            commands: commands_rx,
            visibility: visibility_rx,
            timeline_tx,
            metrics,
        };

        let handle = FeedHandle {
            commands: commands_tx,
            visibility: Arc::new(visibility_tx),
            timeline: timeline_rx,
        };

        (session, handle)
    }

    /// Builds a session and runs it on its own task.
    pub fn spawn(config: &Config, metrics: Option<Arc<Metrics>>) -> (FeedHandle, JoinHandle<()>) {
        let (session, handle) = Self::new(config, metrics);
        (handle, tokio::spawn(session.run()))
    }

    pub fn filter(&self) -> &FilterSpec {
        &self.filter
    }

    pub async fn run(mut self) {
        info!(
            "Starting feed session for {} (actor filter: {})",
            self.filter.account_id,
            self.filter.actor_account().unwrap_or("none")
        );
        self.connect().await;

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::SetAccountFilter(account)) => self.queue_filter_change(account),
                    Some(Command::Shutdown) | None => break,
                },
                _ = self.filter_debounce.fired() => self.apply_filter_change().await,
                event = self.connection.next_event() => match event {
                    StreamEvent::Batch(raw) => self.on_event_batch(raw),
                    StreamEvent::ReconnectDue => self.connect().await,
                    StreamEvent::Closed => {}
                },
            }
        }

        self.filter_debounce.cancel();
        self.connection.close().await;
        info!("Feed session stopped");
    }

    async fn connect(&mut self) {
        let visibility = *self.visibility.borrow();
        self.connection.connect(&self.filter, visibility).await;
    }

    fn queue_filter_change(&mut self, account: Option<String>) {
        debug!("Queued actor filter change: {:?}", account);
        self.pending_account = Some(account);
        self.filter_debounce.schedule(self.debounce_delay);
    }

    async fn apply_filter_change(&mut self) {
        let Some(account) = self.pending_account.take() else {
            return;
        };

        let filter = self.template.build(account.as_deref());
        if filter == self.filter {
            debug!("Actor filter unchanged, keeping current connection");
            return;
        }

        info!(
            "Applying actor filter: {}",
            filter.actor_account().unwrap_or("none")
        );
        self.filter = filter;

        // Entries gathered under the old filter may not match the new one
        self.timeline.clear();
        self.publish();

        self.connection.close().await;
        self.connection.schedule_reconnect(self.reconnect_delay);
    }

    fn on_event_batch(&mut self, raw: Vec<serde_json::Value>) {
        let outcome = self.reconciler.merge(&mut self.timeline, raw);

        if let Some(metrics) = &self.metrics {
            let labels = metrics.labels();
            metrics
                .events_normalized
                .add((outcome.received - outcome.skipped) as u64, &labels);
            metrics.events_skipped.add(outcome.skipped as u64, &labels);
            metrics.events_merged.add(outcome.inserted as u64, &labels);
            metrics.timeline_len.record(self.timeline.len() as u64, &labels);
        }

        if outcome.inserted > 0 {
            self.publish();
        }
    }

    fn publish(&self) {
        self.timeline_tx.send_replace(self.timeline.to_vec());
    }
}
