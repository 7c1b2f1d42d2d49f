//! Realtime subscription adapter.
//!
//! Bridges a remote changefeed to local refetch triggers. Each subscription
//! owns one delivery task; the callback runs on that task for every change
//! on the watched table, whatever the change kind. Delivery is
//! at-least-once, so callbacks must be idempotent (typically "refetch
//! everything").
//!
//! A `Subscription` is a scoped resource: dropping it cancels the task and
//! closes the channel. At most one subscription is live per channel name;
//! subscribing again under the same name replaces the previous one.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::LedgerError;

const DEFAULT_FEED_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Change events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row-level change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    #[serde(default)]
    pub record: Value,
}

impl ChangeEvent {
    pub fn new(table: &str, kind: ChangeKind, record: Value) -> Self {
        Self {
            table: table.to_string(),
            kind,
            record,
        }
    }
}

/// Only deliver rows whose `column` equals `value` (e.g. one branch).
#[derive(Debug, Clone, PartialEq)]
pub struct RowFilter {
    pub column: String,
    pub value: Value,
}

impl RowFilter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self {
            column: column.to_string(),
            value: value.into(),
        }
    }

    /// Deletes often carry only the key, so a row without the column passes.
    fn matches(&self, record: &Value) -> bool {
        match record.get(&self.column) {
            Some(v) => v == &self.value,
            None => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Changefeed seam
// ---------------------------------------------------------------------------

/// Transport collaborator delivering change notifications.
pub trait Changefeed: Send + Sync + 'static {
    /// Open a logical channel and return its event stream.
    fn open_channel(&self, name: &str) -> Result<broadcast::Receiver<ChangeEvent>, LedgerError>;

    /// Release the channel's connection.
    fn close_channel(&self, name: &str);
}

/// In-process changefeed. Locally confirmed writes are published here so
/// other widgets refetch without waiting for the remote feed.
pub struct LocalChangefeed {
    sender: broadcast::Sender<ChangeEvent>,
    open: Mutex<HashSet<String>>,
}

impl Default for LocalChangefeed {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_FEED_CAPACITY)
    }
}

impl LocalChangefeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            open: Mutex::new(HashSet::new()),
        }
    }

    /// Publish to every open channel. Returns the number of receivers.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn open_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .open
            .lock()
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl Changefeed for LocalChangefeed {
    fn open_channel(&self, name: &str) -> Result<broadcast::Receiver<ChangeEvent>, LedgerError> {
        self.open
            .lock()
            .map_err(|e| LedgerError::Transport(format!("changefeed lock: {e}")))?
            .insert(name.to_string());
        Ok(self.sender.subscribe())
    }

    fn close_channel(&self, name: &str) {
        if let Ok(mut open) = self.open.lock() {
            open.remove(name);
        }
    }
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

type Registry = Arc<Mutex<HashMap<String, ActiveChannel>>>;

struct ActiveChannel {
    generation: u64,
    table: String,
    cancel: CancellationToken,
}

/// Owns the live subscriptions, one per channel name.
pub struct RealtimeHub {
    feed: Arc<dyn Changefeed>,
    channels: Registry,
    next_generation: AtomicU64,
}

impl RealtimeHub {
    pub fn new(feed: Arc<dyn Changefeed>) -> Self {
        Self {
            feed,
            channels: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Watch `table` on channel `channel_name`. Outside a Tokio runtime this
    /// fails with `LedgerError::Config` and leaves existing subscriptions
    /// untouched.
    pub fn subscribe<F>(
        &self,
        channel_name: &str,
        table: &str,
        callback: F,
    ) -> Result<Subscription, LedgerError>
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.subscribe_filtered(channel_name, table, None, callback)
    }

    pub fn subscribe_filtered<F>(
        &self,
        channel_name: &str,
        table: &str,
        filter: Option<RowFilter>,
        callback: F,
    ) -> Result<Subscription, LedgerError>
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| {
            LedgerError::Config("no Tokio runtime to deliver realtime events on".into())
        })?;
        let mut channels = self
            .channels
            .lock()
            .map_err(|e| LedgerError::Transport(format!("realtime registry lock: {e}")))?;

        if let Some(previous) = channels.remove(channel_name) {
            info!(
                channel = %channel_name,
                previous_table = %previous.table,
                "replacing existing realtime subscription"
            );
            previous.cancel.cancel();
            self.feed.close_channel(channel_name);
        }

        let mut rx = self.feed.open_channel(channel_name)?;
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        channels.insert(
            channel_name.to_string(),
            ActiveChannel {
                generation,
                table: table.to_string(),
                cancel: cancel.clone(),
            },
        );
        drop(channels);

        let task_cancel = cancel.clone();
        let task_channel = channel_name.to_string();
        let task_table = table.to_string();
        runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Ok(event) => {
                            if event.table != task_table {
                                continue;
                            }
                            if let Some(f) = filter.as_ref() {
                                if !f.matches(&event.record) {
                                    continue;
                                }
                            }
                            callback(&event);
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(
                                channel = %task_channel,
                                skipped,
                                "realtime receiver lagged; forcing refetch"
                            );
                            callback(&ChangeEvent::new(&task_table, ChangeKind::Update, Value::Null));
                        }
                        Err(RecvError::Closed) => {
                            debug!(channel = %task_channel, "changefeed closed");
                            break;
                        }
                    },
                }
            }
            debug!(channel = %task_channel, "realtime delivery task stopped");
        });

        info!(channel = %channel_name, table = %table, "realtime subscription opened");
        Ok(Subscription {
            channel_name: channel_name.to_string(),
            table: table.to_string(),
            generation,
            cancel,
            registry: Arc::clone(&self.channels),
            feed: Arc::clone(&self.feed),
            closed: false,
        })
    }

    pub fn is_active(&self, channel_name: &str) -> bool {
        self.channels
            .lock()
            .map(|c| c.contains_key(channel_name))
            .unwrap_or(false)
    }

    pub fn active_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .channels
            .lock()
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

/// Handle for one live subscription. Closed on drop.
pub struct Subscription {
    channel_name: String,
    table: String,
    generation: u64,
    cancel: CancellationToken,
    registry: Registry,
    feed: Arc<dyn Changefeed>,
    closed: bool,
}

impl Subscription {
    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// False once closed or replaced by a newer subscription on the same
    /// channel name.
    pub fn is_live(&self) -> bool {
        !self.closed && !self.cancel.is_cancelled()
    }

    pub fn close(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel.cancel();

        let Ok(mut channels) = self.registry.lock() else {
            return;
        };
        // A replacement under the same name owns the channel now.
        let current = channels
            .get(&self.channel_name)
            .map(|c| c.generation == self.generation)
            .unwrap_or(false);
        if current {
            channels.remove(&self.channel_name);
            self.feed.close_channel(&self.channel_name);
            info!(channel = %self.channel_name, "realtime subscription closed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.teardown();
    }
}
