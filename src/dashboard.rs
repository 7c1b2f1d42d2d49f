//! Dashboard view model.
//!
//! Holds the payments and cashouts listings, recomputes the sales summary
//! only when they change, and refetches after a realtime change marks the
//! view stale. Cached snapshots are shown until the first live fetch lands.

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::api::RecordSource;
use crate::calendar::DateFilter;
use crate::config::Endpoints;
use crate::credentials::AuthToken;
use crate::error::LedgerError;
use crate::metrics::{MetricsMemo, SalesSummary};
use crate::preferences::{KeyValueStore, SnapshotCache};
use crate::realtime::{RealtimeHub, Subscription};

pub const PAYMENTS_CHANNEL: &str = "dashboard-payments";
pub const CASHOUTS_CHANNEL: &str = "dashboard-cashouts";
const PAYMENTS_TABLE: &str = "payments";
const CASHOUTS_TABLE: &str = "cashouts";

/// Shared between the view and its realtime callbacks.
#[derive(Default)]
struct Staleness {
    dirty: AtomicBool,
    notify: Notify,
}

impl Staleness {
    fn mark(&self) {
        self.dirty.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }
}

pub struct Dashboard<S> {
    source: Arc<S>,
    endpoints: Endpoints,
    payments: Value,
    cashouts: Value,
    payments_cache: SnapshotCache<Value>,
    cashouts_cache: SnapshotCache<Value>,
    memo: MetricsMemo,
    staleness: Arc<Staleness>,
    filter: Option<DateFilter>,
    live: bool,
}

impl<S: RecordSource> Dashboard<S> {
    /// Seeded from cached snapshots when present. Starts stale either way.
    pub fn new(source: Arc<S>, endpoints: Endpoints, store: Arc<dyn KeyValueStore>) -> Self {
        let payments_cache = SnapshotCache::open(Arc::clone(&store), "dashboard.payments");
        let cashouts_cache = SnapshotCache::open(store, "dashboard.cashouts");
        let seed = |cache: &SnapshotCache<Value>| {
            Value::Array(cache.cached().map(|s| s.items.clone()).unwrap_or_default())
        };
        let staleness = Arc::new(Staleness::default());
        staleness.dirty.store(true, Ordering::SeqCst);

        Self {
            source,
            endpoints,
            payments: seed(&payments_cache),
            cashouts: seed(&cashouts_cache),
            payments_cache,
            cashouts_cache,
            memo: MetricsMemo::new(),
            staleness,
            filter: None,
            live: false,
        }
    }

    /// Subscribe both listings to the changefeed. Keep the returned handles
    /// alive for as long as the view is shown.
    pub fn watch(&self, hub: &RealtimeHub) -> Result<Vec<Subscription>, LedgerError> {
        let mut subs = Vec::with_capacity(2);
        for (channel, table) in [
            (PAYMENTS_CHANNEL, PAYMENTS_TABLE),
            (CASHOUTS_CHANNEL, CASHOUTS_TABLE),
        ] {
            let staleness = Arc::clone(&self.staleness);
            subs.push(hub.subscribe(channel, table, move |event| {
                debug!(table = %event.table, kind = ?event.kind, "dashboard marked stale");
                staleness.mark();
            })?);
        }
        Ok(subs)
    }

    /// Refetch both listings. On failure the previous data stays in place
    /// and the view remains stale.
    pub async fn refresh(
        &mut self,
        token: &AuthToken,
        filter: Option<DateFilter>,
    ) -> Result<&SalesSummary, LedgerError> {
        // Cleared first so a change arriving mid-fetch triggers another pass.
        self.staleness.dirty.store(false, Ordering::SeqCst);

        let fetched = tokio::try_join!(
            self.source
                .fetch_records(&self.endpoints.payments_read, token, filter),
            self.source
                .fetch_records(&self.endpoints.cashouts_read, token, filter),
        );
        let (payments, cashouts) = match fetched {
            Ok(lists) => lists,
            Err(e) => {
                warn!(error = %e, "dashboard refresh failed");
                self.staleness.dirty.store(true, Ordering::SeqCst);
                return Err(e);
            }
        };

        info!(
            payments = payments.len(),
            cashouts = cashouts.len(),
            "dashboard refreshed"
        );
        self.payments_cache.store(payments.clone());
        self.cashouts_cache.store(cashouts.clone());
        self.payments = Value::Array(payments);
        self.cashouts = Value::Array(cashouts);
        self.filter = filter;
        self.live = true;
        Ok(self.summary())
    }

    /// Refetch with the last filter only when a change was seen. Returns
    /// whether a fetch happened.
    pub async fn refresh_if_stale(&mut self, token: &AuthToken) -> Result<bool, LedgerError> {
        if !self.is_stale() {
            return Ok(false);
        }
        let filter = self.filter;
        self.refresh(token, filter).await?;
        Ok(true)
    }

    /// Resolves once a realtime change has marked the view stale.
    pub async fn stale(&self) {
        loop {
            let notified = self.staleness.notify.notified();
            if self.is_stale() {
                return;
            }
            notified.await;
        }
    }

    pub fn is_stale(&self) -> bool {
        self.staleness.dirty.load(Ordering::SeqCst)
    }

    /// `false` while the figures still come from the local snapshot.
    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn filter(&self) -> Option<DateFilter> {
        self.filter
    }

    pub fn summary(&mut self) -> &SalesSummary {
        self.memo.summary(&self.payments, &self.cashouts)
    }

    pub fn recomputations(&self) -> usize {
        self.memo.computations()
    }

    pub fn payments(&self) -> &Value {
        &self.payments
    }

    pub fn cashouts(&self) -> &Value {
        &self.cashouts
    }
}
