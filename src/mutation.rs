//! Optimistic writes for cashouts, sales and reports.
//!
//! `MutationController::submit` publishes a `Pending` record on its event
//! channel before any I/O, then POSTs the payload in a spawned task and
//! publishes either `Confirmed` (with the server's canonical record) or
//! `Failed`. The view that owns the list applies those events through
//! `MutationList::apply`, which keeps exactly one record per submission.
//!
//! ```text
//!         submit()              success
//!  (none) ───────────► Pending ───────────► Confirmed
//!                          │
//!                          │ HTTP error / network error / no token
//!                          ▼
//!                        Failed  (user may resubmit as a new record)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Endpoints;
use crate::credentials::AuthToken;
use crate::error::LedgerError;
use crate::schemas::Submission;

// ---------------------------------------------------------------------------
// Record types
// ---------------------------------------------------------------------------

/// Locally generated key for one submission. Never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(String);

impl ClientId {
    pub fn generate() -> Self {
        Self(format!("temp-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    Pending,
    Confirmed,
    Failed,
}

impl MutationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, MutationStatus::Pending)
    }
}

/// The backend's canonical stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ServerRecord {
    /// Parse a 2xx response body. The record may be the body itself or
    /// wrapped in `data` / `record`; its `id` may be a string or a number.
    /// A body that carries its own `id` is the record, whatever its other
    /// fields are called.
    pub fn from_response(body: Value) -> Result<Self, LedgerError> {
        let mut object = match body {
            Value::Object(obj) if obj.contains_key("id") => obj,
            Value::Object(mut obj) => {
                let inner = ["data", "record"]
                    .iter()
                    .find(|k| obj.get(**k).map(Value::is_object).unwrap_or(false))
                    .and_then(|k| obj.remove(*k));
                match inner {
                    Some(Value::Object(inner)) => inner,
                    _ => obj,
                }
            }
            other => {
                return Err(LedgerError::Transport(format!(
                    "malformed response: expected a record object, got {}",
                    json_kind(&other)
                )))
            }
        };

        let id = match object.remove("id") {
            Some(Value::String(s)) if !s.trim().is_empty() => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(LedgerError::Transport(
                    "malformed response: record has no id".into(),
                ))
            }
        };

        Ok(Self { id, fields: object })
    }

    /// The client id the backend stored from `Idempotency-Key`, if it
    /// echoes one.
    pub fn echoed_client_id(&self) -> Option<&str> {
        ["clientId", "client_id"]
            .iter()
            .find_map(|k| self.fields.get(*k).and_then(Value::as_str))
    }

    pub fn to_value(&self) -> Value {
        let mut obj = self.fields.clone();
        obj.insert("id".into(), Value::String(self.id.clone()));
        Value::Object(obj)
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// One user submission as the UI sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord<P> {
    pub client_id: ClientId,
    pub server_id: Option<String>,
    pub payload: P,
    pub server_record: Option<ServerRecord>,
    pub status: MutationStatus,
    pub error: Option<LedgerError>,
    pub submitted_at: DateTime<Utc>,
}

impl<P> MutationRecord<P> {
    fn pending(payload: P) -> Self {
        Self {
            client_id: ClientId::generate(),
            server_id: None,
            payload,
            server_record: None,
            status: MutationStatus::Pending,
            error: None,
            submitted_at: Utc::now(),
        }
    }

    /// List key: the server id once confirmed, the client id before.
    pub fn key(&self) -> &str {
        self.server_id
            .as_deref()
            .unwrap_or_else(|| self.client_id.as_str())
    }

    /// Failure text for display, if the record failed.
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(LedgerError::user_message)
    }
}

/// What the controller publishes for each submission.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationEvent<P> {
    Pending(MutationRecord<P>),
    Confirmed {
        client_id: ClientId,
        server_record: ServerRecord,
    },
    Failed {
        client_id: ClientId,
        error: LedgerError,
    },
}

impl<P> MutationEvent<P> {
    pub fn client_id(&self) -> &ClientId {
        match self {
            MutationEvent::Pending(record) => &record.client_id,
            MutationEvent::Confirmed { client_id, .. } | MutationEvent::Failed { client_id, .. } => {
                client_id
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Transport seam
// ---------------------------------------------------------------------------

/// The write half of the REST backend. `BackendClient` is the production
/// implementation.
pub trait RecordTransport: Send + Sync + 'static {
    /// POST `body` as JSON to `path` with `Authorization: Bearer <token>`
    /// and `Idempotency-Key: <idempotency_key>`. Returns the parsed 2xx body.
    fn post_record(
        &self,
        path: &str,
        token: &AuthToken,
        idempotency_key: &str,
        body: Value,
    ) -> impl Future<Output = Result<Value, LedgerError>> + Send;
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Issues optimistic writes. Each `submit` is independent: there is no
/// queue, lock, or ordering between concurrent submissions, and nothing is
/// retried automatically.
pub struct MutationController<T, P> {
    transport: Arc<T>,
    endpoints: Endpoints,
    events: mpsc::UnboundedSender<MutationEvent<P>>,
}

impl<T, P> Clone for MutationController<T, P> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            endpoints: self.endpoints.clone(),
            events: self.events.clone(),
        }
    }
}

/// A submission that has been published as `Pending`.
pub struct PendingSubmission<P> {
    pub record: MutationRecord<P>,
    task: Option<JoinHandle<()>>,
}

impl<P> PendingSubmission<P> {
    pub fn client_id(&self) -> &ClientId {
        &self.record.client_id
    }

    /// Whether a network request was started for this submission.
    pub fn is_in_flight(&self) -> bool {
        self.task.is_some()
    }

    /// Wait until the outcome has been published.
    pub async fn settled(self) {
        if let Some(task) = self.task {
            if let Err(e) = task.await {
                warn!(client_id = %self.record.client_id, error = %e, "submission task aborted");
            }
        }
    }
}

impl<T, P> MutationController<T, P>
where
    T: RecordTransport,
    P: Submission,
{
    /// Controller plus the receiving end its owning view drains.
    pub fn new(
        transport: Arc<T>,
        endpoints: Endpoints,
    ) -> (Self, mpsc::UnboundedReceiver<MutationEvent<P>>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                transport,
                endpoints,
                events,
            },
            rx,
        )
    }

    /// Submit `payload`.
    ///
    /// `Pending` is published before this returns. A missing token, an
    /// invalid payload, or no Tokio runtime to run the request on publishes
    /// `Failed` immediately without touching the network; otherwise the
    /// outcome is published from a spawned task. The token is checked first.
    pub fn submit(&self, payload: P, auth_token: Option<&AuthToken>) -> PendingSubmission<P> {
        let record = MutationRecord::pending(payload);
        let client_id = record.client_id.clone();
        let path = P::ENDPOINT.path(&self.endpoints).to_string();

        debug!(client_id = %client_id, path = %path, "submission pending");
        self.publish(MutationEvent::Pending(record.clone()));

        let Some(token) = auth_token.cloned() else {
            warn!(client_id = %client_id, "submission without auth token; not sent");
            self.publish(MutationEvent::Failed {
                client_id,
                error: LedgerError::Unauthenticated,
            });
            return PendingSubmission { record, task: None };
        };

        if let Err(error) = record.payload.validate() {
            warn!(client_id = %client_id, error = %error, "submission rejected before send");
            self.publish(MutationEvent::Failed { client_id, error });
            return PendingSubmission { record, task: None };
        }

        let Ok(runtime) = Handle::try_current() else {
            warn!(client_id = %client_id, "no async runtime; submission not sent");
            self.publish(MutationEvent::Failed {
                client_id,
                error: LedgerError::Config("no Tokio runtime to send the request on".into()),
            });
            return PendingSubmission { record, task: None };
        };

        let body = match serde_json::to_value(&record.payload) {
            Ok(v) => v,
            Err(e) => {
                self.publish(MutationEvent::Failed {
                    client_id,
                    error: LedgerError::Validation(format!("payload not serializable: {e}")),
                });
                return PendingSubmission { record, task: None };
            }
        };

        let transport = Arc::clone(&self.transport);
        let events = self.events.clone();
        let task = runtime.spawn(async move {
            let outcome = transport
                .post_record(&path, &token, client_id.as_str(), body)
                .await
                .and_then(ServerRecord::from_response);
            let event = match outcome {
                Ok(server_record) => {
                    info!(
                        client_id = %client_id,
                        server_id = %server_record.id,
                        path = %path,
                        "submission confirmed"
                    );
                    MutationEvent::Confirmed {
                        client_id,
                        server_record,
                    }
                }
                Err(error) => {
                    warn!(client_id = %client_id, path = %path, error = %error, "submission failed");
                    MutationEvent::Failed { client_id, error }
                }
            };
            publish_to(&events, event);
        });

        PendingSubmission {
            record,
            task: Some(task),
        }
    }

    /// Resubmit a failed record's payload as a new record. The failed entry
    /// is removed from `list`; the new one arrives through the event channel.
    pub fn resubmit(
        &self,
        list: &mut MutationList<P>,
        client_id: &ClientId,
        auth_token: Option<&AuthToken>,
    ) -> Option<PendingSubmission<P>> {
        let payload = list.take_for_retry(client_id)?;
        info!(previous = %client_id, "resubmitting failed record");
        Some(self.submit(payload, auth_token))
    }

    fn publish(&self, event: MutationEvent<P>) {
        publish_to(&self.events, event);
    }
}

/// A closed receiver means the owning view is gone; the result is dropped.
fn publish_to<P>(events: &mpsc::UnboundedSender<MutationEvent<P>>, event: MutationEvent<P>) {
    let client_id = event.client_id().clone();
    if events.send(event).is_err() {
        debug!(client_id = %client_id, "view closed; discarding submission result");
    }
}

// ---------------------------------------------------------------------------
// Reconciled list
// ---------------------------------------------------------------------------

/// View-owned list of records. Holds exactly one entry per submission.
#[derive(Debug, Clone)]
pub struct MutationList<P> {
    records: Vec<MutationRecord<P>>,
}

impl<P> Default for MutationList<P> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
        }
    }
}

impl<P: Submission> MutationList<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one controller event. Returns whether the list changed.
    pub fn apply(&mut self, event: MutationEvent<P>) -> bool {
        match event {
            MutationEvent::Pending(record) => {
                if self.position(&record.client_id).is_some() {
                    debug!(client_id = %record.client_id, "duplicate pending event ignored");
                    return false;
                }
                self.records.push(record);
                true
            }
            MutationEvent::Confirmed {
                client_id,
                server_record,
            } => {
                let adopted = self.get(&client_id).map_or(false, |r| {
                    r.status == MutationStatus::Confirmed
                        && r.server_id.as_deref() == Some(server_record.id.as_str())
                });
                if adopted {
                    debug!(client_id = %client_id, server_id = %server_record.id, "confirmation already applied by refetch");
                    return false;
                }
                let Some(idx) = self.transitionable(&client_id) else {
                    return false;
                };
                // A refetch may already have brought in the confirmed row.
                let already_listed = self
                    .records
                    .iter()
                    .any(|r| r.server_id.as_deref() == Some(server_record.id.as_str()));
                if already_listed {
                    debug!(client_id = %client_id, server_id = %server_record.id, "confirmed row already listed; dropping pending entry");
                    self.records.remove(idx);
                    return true;
                }
                let record = &mut self.records[idx];
                record.status = MutationStatus::Confirmed;
                record.server_id = Some(server_record.id.clone());
                record.server_record = Some(server_record);
                record.error = None;
                true
            }
            MutationEvent::Failed { client_id, error } => {
                let Some(idx) = self.transitionable(&client_id) else {
                    return false;
                };
                let record = &mut self.records[idx];
                record.status = MutationStatus::Failed;
                record.error = Some(error);
                true
            }
        }
    }

    /// Index of a record that may still leave `Pending`.
    fn transitionable(&self, client_id: &ClientId) -> Option<usize> {
        let Some(idx) = self.position(client_id) else {
            debug!(client_id = %client_id, "event for unknown record ignored");
            return None;
        };
        if self.records[idx].status.is_terminal() {
            warn!(
                client_id = %client_id,
                status = ?self.records[idx].status,
                "event for settled record ignored"
            );
            return None;
        }
        Some(idx)
    }

    fn position(&self, client_id: &ClientId) -> Option<usize> {
        self.records.iter().position(|r| &r.client_id == client_id)
    }

    pub fn get(&self, client_id: &ClientId) -> Option<&MutationRecord<P>> {
        self.records.iter().find(|r| &r.client_id == client_id)
    }

    pub fn records(&self) -> &[MutationRecord<P>] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn with_status(&self, status: MutationStatus) -> impl Iterator<Item = &MutationRecord<P>> {
        self.records.iter().filter(move |r| r.status == status)
    }

    pub fn pending(&self) -> impl Iterator<Item = &MutationRecord<P>> {
        self.with_status(MutationStatus::Pending)
    }

    pub fn confirmed(&self) -> impl Iterator<Item = &MutationRecord<P>> {
        self.with_status(MutationStatus::Confirmed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &MutationRecord<P>> {
        self.with_status(MutationStatus::Failed)
    }

    /// Remove a failed record at the user's request. Pending and confirmed
    /// records cannot be discarded.
    pub fn discard(&mut self, client_id: &ClientId) -> bool {
        match self.position(client_id) {
            Some(idx) if self.records[idx].status == MutationStatus::Failed => {
                self.records.remove(idx);
                true
            }
            _ => false,
        }
    }

    /// Remove a failed record and hand back its payload for resubmission.
    pub fn take_for_retry(&mut self, client_id: &ClientId) -> Option<P> {
        let idx = self.position(client_id)?;
        if self.records[idx].status != MutationStatus::Failed {
            return None;
        }
        Some(self.records.remove(idx).payload)
    }

    /// Sum of `Submission::amount` over records that are not failed.
    pub fn total_amount(&self) -> f64 {
        self.records
            .iter()
            .filter(|r| r.status != MutationStatus::Failed)
            .map(|r| r.payload.amount())
            .sum()
    }

    /// Replace confirmed entries with a fresh server listing.
    ///
    /// Rows that cannot be read as `P` are skipped. A row that echoes a
    /// local record's client id (`clientId` / `client_id`, stored by the
    /// backend from the `Idempotency-Key` header) takes that record's place,
    /// even while it is still pending or failed, so a late confirmation
    /// changes nothing and a stored write is not offered for resubmission. Client ids of rows already listed are preserved. Other
    /// pending and failed local records are kept.
    ///
    /// A backend that does not echo the client id leaves a window: between
    /// this refetch and the POST response the pending record and its listed
    /// row are both present, and the confirmation collapses them.
    pub fn replace_confirmed(&mut self, rows: Vec<Value>) {
        let mut next: Vec<MutationRecord<P>> = Vec::with_capacity(rows.len());

        for row in rows {
            let server_record = match ServerRecord::from_response(row) {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "skipping listed row without id");
                    continue;
                }
            };
            let payload: P = match serde_json::from_value(Value::Object(server_record.fields.clone())) {
                Ok(p) => p,
                Err(e) => {
                    warn!(server_id = %server_record.id, error = %e, "skipping unreadable listed row");
                    continue;
                }
            };
            let echoed = server_record.echoed_client_id();
            let existing = self.records.iter().find(|r| {
                r.server_id.as_deref() == Some(server_record.id.as_str())
                    || echoed == Some(r.client_id.as_str())
            });
            let client_id = existing
                .map(|r| r.client_id.clone())
                .unwrap_or_else(ClientId::generate);
            let submitted_at = existing.map(|r| r.submitted_at).unwrap_or_else(Utc::now);

            next.push(MutationRecord {
                client_id,
                server_id: Some(server_record.id.clone()),
                payload,
                server_record: Some(server_record),
                status: MutationStatus::Confirmed,
                error: None,
                submitted_at,
            });
        }

        let local: Vec<MutationRecord<P>> = self
            .records
            .drain(..)
            .filter(|r| r.status != MutationStatus::Confirmed)
            .filter(|r| !next.iter().any(|n| n.client_id == r.client_id))
            .collect();
        next.extend(local);
        self.records = next;
    }
}

// ---------------------------------------------------------------------------
// View
// ---------------------------------------------------------------------------

/// A list plus the receiving end of one controller's events.
pub struct LedgerView<P> {
    list: MutationList<P>,
    events: mpsc::UnboundedReceiver<MutationEvent<P>>,
}

impl<P: Submission> LedgerView<P> {
    pub fn new(events: mpsc::UnboundedReceiver<MutationEvent<P>>) -> Self {
        Self {
            list: MutationList::new(),
            events,
        }
    }

    /// Apply every queued event without waiting. Returns how many changed
    /// the list.
    pub fn drain(&mut self) -> usize {
        let mut changed = 0;
        while let Ok(event) = self.events.try_recv() {
            if self.list.apply(event) {
                changed += 1;
            }
        }
        changed
    }

    /// Wait for and apply the next event. `None` once every controller
    /// handle is gone.
    pub async fn next_event(&mut self) -> Option<bool> {
        let event = self.events.recv().await?;
        Some(self.list.apply(event))
    }

    pub fn list(&self) -> &MutationList<P> {
        &self.list
    }

    pub fn list_mut(&mut self) -> &mut MutationList<P> {
        &mut self.list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::CashoutPayload;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    type Responder = Box<dyn Fn(&Value) -> Result<Value, LedgerError> + Send + Sync>;

    /// Scripted backend: records every request and answers via `respond`.
    /// Requests whose category is "slow" wait for `gate` first.
    struct FakeTransport {
        calls: Mutex<Vec<(String, String, Value)>>,
        idempotency_keys: Mutex<Vec<String>>,
        served: AtomicUsize,
        respond: Responder,
        gate: Arc<Notify>,
    }

    impl FakeTransport {
        fn new(respond: Responder) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                idempotency_keys: Mutex::new(Vec::new()),
                served: AtomicUsize::new(0),
                respond,
                gate: Arc::new(Notify::new()),
            })
        }

        fn echo() -> Arc<Self> {
            let counter = AtomicUsize::new(0);
            Self::new(Box::new(move |body| {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                let mut record = body.clone();
                record["id"] = json!(format!("srv-{n}"));
                Ok(record)
            }))
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl RecordTransport for FakeTransport {
        async fn post_record(
            &self,
            path: &str,
            token: &AuthToken,
            idempotency_key: &str,
            body: Value,
        ) -> Result<Value, LedgerError> {
            self.calls
                .lock()
                .unwrap()
                .push((path.to_string(), token.bearer(), body.clone()));
            self.idempotency_keys
                .lock()
                .unwrap()
                .push(idempotency_key.to_string());
            if body["category"] == "slow" {
                self.gate.notified().await;
            }
            self.served.fetch_add(1, Ordering::SeqCst);
            (self.respond)(&body)
        }
    }

    fn cashout(amount: f64, category: &str) -> CashoutPayload {
        CashoutPayload {
            amount,
            category: category.into(),
            date: NaiveDate::from_ymd_opt(2026, 5, 2).unwrap(),
            notes: None,
            cashier: None,
        }
    }

    fn token() -> AuthToken {
        AuthToken::new("tok-123").unwrap()
    }

    fn controller(
        transport: Arc<FakeTransport>,
    ) -> (MutationController<FakeTransport, CashoutPayload>, LedgerView<CashoutPayload>) {
        let (ctl, rx) = MutationController::new(transport, Endpoints::default());
        (ctl, LedgerView::new(rx))
    }

    #[tokio::test]
    async fn test_pending_is_visible_before_network_completes() {
        let transport = FakeTransport::echo();
        let (ctl, mut view) = controller(transport.clone());

        let submission = ctl.submit(cashout(20.0, "slow"), Some(&token()));
        assert_eq!(view.drain(), 1);
        let record = view.list().get(submission.client_id()).unwrap();
        assert_eq!(record.status, MutationStatus::Pending);
        assert!(record.server_id.is_none());
        assert!(record.client_id.as_str().starts_with("temp-"));

        transport.gate.notify_one();
        let id = submission.client_id().clone();
        submission.settled().await;
        view.drain();
        assert_eq!(view.list().get(&id).unwrap().status, MutationStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_success_confirms_single_record_with_server_id() {
        let transport = FakeTransport::echo();
        let (ctl, mut view) = controller(transport.clone());

        let submission = ctl.submit(cashout(35.5, "supplies"), Some(&token()));
        let id = submission.client_id().clone();
        submission.settled().await;
        view.drain();

        assert_eq!(view.list().len(), 1);
        let record = view.list().get(&id).unwrap();
        assert_eq!(record.status, MutationStatus::Confirmed);
        assert_eq!(record.server_id.as_deref(), Some("srv-1"));
        assert_eq!(record.key(), "srv-1");
        assert_eq!(
            record.server_record.as_ref().unwrap().fields["category"],
            "supplies"
        );

        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "/api/cashout");
        assert_eq!(calls[0].1, "Bearer tok-123");
        assert_eq!(calls[0].2["amount"], 35.5);
        assert_eq!(
            transport.idempotency_keys.lock().unwrap().as_slice(),
            &[id.as_str().to_string()]
        );
    }

    #[tokio::test]
    async fn test_record_with_nested_record_field_is_confirmed() {
        let transport = FakeTransport::new(Box::new(|_| {
            Ok(json!({ "id": "srv-1", "amount": 5.0, "record": { "note": "audit" } }))
        }));
        let (ctl, mut view) = controller(transport);

        let submission = ctl.submit(cashout(5.0, "petty"), Some(&token()));
        let id = submission.client_id().clone();
        submission.settled().await;
        view.drain();

        let record = view.list().get(&id).unwrap();
        assert_eq!(record.status, MutationStatus::Confirmed);
        assert_eq!(record.error, None);
        assert_eq!(record.server_id.as_deref(), Some("srv-1"));
        let fields = &record.server_record.as_ref().unwrap().fields;
        assert_eq!(fields["record"]["note"], "audit");
    }

    #[tokio::test]
    async fn test_missing_token_fails_without_network_call() {
        let transport = FakeTransport::echo();
        let (ctl, mut view) = controller(transport.clone());

        let submission = ctl.submit(cashout(10.0, "petty"), None);
        assert!(!submission.is_in_flight());
        let id = submission.client_id().clone();
        submission.settled().await;
        view.drain();

        let record = view.list().get(&id).unwrap();
        assert_eq!(record.status, MutationStatus::Failed);
        assert_eq!(record.error, Some(LedgerError::Unauthenticated));
        assert!(record.server_id.is_none());
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_token_wins_over_invalid_payload() {
        let transport = FakeTransport::echo();
        let (ctl, mut view) = controller(transport.clone());

        let submission = ctl.submit(cashout(-1.0, ""), None);
        let id = submission.client_id().clone();
        view.drain();

        let record = view.list().get(&id).unwrap();
        assert_eq!(record.status, MutationStatus::Failed);
        assert_eq!(record.error, Some(LedgerError::Unauthenticated));
        assert_eq!(transport.call_count(), 0);
    }

    #[test]
    fn test_submit_outside_runtime_fails_instead_of_panicking() {
        let transport = FakeTransport::echo();
        let (ctl, mut view) = controller(transport.clone());

        let submission = ctl.submit(cashout(4.0, "petty"), Some(&token()));
        assert!(!submission.is_in_flight());
        let id = submission.client_id().clone();
        assert_eq!(view.drain(), 2);

        let record = view.list().get(&id).unwrap();
        assert_eq!(record.status, MutationStatus::Failed);
        assert!(matches!(record.error, Some(LedgerError::Config(_))));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_payload_fails_without_network_call() {
        let transport = FakeTransport::echo();
        let (ctl, mut view) = controller(transport.clone());

        let submission = ctl.submit(cashout(-5.0, "petty"), Some(&token()));
        let id = submission.client_id().clone();
        view.drain();

        let record = view.list().get(&id).unwrap();
        assert_eq!(record.status, MutationStatus::Failed);
        assert!(matches!(record.error, Some(LedgerError::Validation(_))));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_server_rejection_marks_failed_and_keeps_record() {
        let transport = FakeTransport::new(Box::new(|_| {
            Err(LedgerError::ServerRejection {
                status: 422,
                message: Some("Drawer is closed".into()),
            })
        }));
        let (ctl, mut view) = controller(transport);

        let submission = ctl.submit(cashout(10.0, "petty"), Some(&token()));
        let id = submission.client_id().clone();
        submission.settled().await;
        view.drain();

        assert_eq!(view.list().len(), 1);
        let record = view.list().get(&id).unwrap();
        assert_eq!(record.status, MutationStatus::Failed);
        assert_eq!(record.error_message().as_deref(), Some("Drawer is closed"));
        assert_eq!(view.list().failed().count(), 1);
    }

    #[tokio::test]
    async fn test_response_without_id_is_transport_failure() {
        let transport = FakeTransport::new(Box::new(|_| Ok(json!({ "ok": true }))));
        let (ctl, mut view) = controller(transport);

        let submission = ctl.submit(cashout(10.0, "petty"), Some(&token()));
        let id = submission.client_id().clone();
        submission.settled().await;
        view.drain();

        let record = view.list().get(&id).unwrap();
        assert!(matches!(record.error, Some(LedgerError::Transport(_))));
    }

    #[tokio::test]
    async fn test_concurrent_submissions_complete_out_of_order() {
        let transport = FakeTransport::echo();
        let (ctl, mut view) = controller(transport.clone());

        let slow = ctl.submit(cashout(1.0, "slow"), Some(&token()));
        let fast = ctl.submit(cashout(2.0, "fast"), Some(&token()));
        let slow_id = slow.client_id().clone();
        let fast_id = fast.client_id().clone();

        fast.settled().await;
        view.drain();
        assert_eq!(view.list().get(&fast_id).unwrap().status, MutationStatus::Confirmed);
        assert_eq!(view.list().get(&slow_id).unwrap().status, MutationStatus::Pending);

        transport.gate.notify_one();
        slow.settled().await;
        view.drain();
        assert_eq!(view.list().get(&slow_id).unwrap().status, MutationStatus::Confirmed);
        assert_eq!(view.list().len(), 2);
        assert_eq!(view.list().total_amount(), 3.0);
    }

    #[tokio::test]
    async fn test_resubmit_creates_new_record_and_drops_failed_one() {
        let transport = FakeTransport::echo();
        let (ctl, mut view) = controller(transport.clone());

        let first = ctl.submit(cashout(12.0, "petty"), None);
        let failed_id = first.client_id().clone();
        view.drain();

        let retry = ctl
            .resubmit(view.list_mut(), &failed_id, Some(&token()))
            .expect("failed record can be retried");
        assert_ne!(retry.client_id(), &failed_id);
        let retry_id = retry.client_id().clone();
        retry.settled().await;
        view.drain();

        assert!(view.list().get(&failed_id).is_none());
        assert_eq!(view.list().len(), 1);
        assert_eq!(view.list().get(&retry_id).unwrap().status, MutationStatus::Confirmed);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_view_discards_results() {
        let transport = FakeTransport::echo();
        let (ctl, view) = controller(transport.clone());
        drop(view);

        let submission = ctl.submit(cashout(5.0, "petty"), Some(&token()));
        submission.settled().await;
        assert_eq!(transport.served.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_next_event_applies_in_order() {
        let transport = FakeTransport::echo();
        let (ctl, mut view) = controller(transport);

        let submission = ctl.submit(cashout(5.0, "petty"), Some(&token()));
        let id = submission.client_id().clone();
        assert_eq!(view.next_event().await, Some(true));
        assert_eq!(view.list().get(&id).unwrap().status, MutationStatus::Pending);
        assert_eq!(view.next_event().await, Some(true));
        assert_eq!(view.list().get(&id).unwrap().status, MutationStatus::Confirmed);
    }

    fn pending_event(id: &str, amount: f64) -> MutationEvent<CashoutPayload> {
        let mut record = MutationRecord::pending(cashout(amount, "petty"));
        record.client_id = ClientId::from(id);
        MutationEvent::Pending(record)
    }

    #[test]
    fn test_confirm_replaces_pending_entry_in_place() {
        let mut list = MutationList::new();
        list.apply(pending_event("temp-41", 1.0));
        list.apply(pending_event("temp-42", 20.0));

        let server_record =
            ServerRecord::from_response(json!({ "id": "srv-1", "amount": 20.0 })).unwrap();
        assert!(list.apply(MutationEvent::Confirmed {
            client_id: ClientId::from("temp-42"),
            server_record,
        }));

        assert_eq!(list.len(), 2);
        assert_eq!(list.records()[1].client_id.as_str(), "temp-42");
        assert_eq!(list.records()[1].status, MutationStatus::Confirmed);
        assert_eq!(list.records()[1].server_id.as_deref(), Some("srv-1"));
    }

    #[test]
    fn test_terminal_states_do_not_transition() {
        let mut list = MutationList::new();
        list.apply(pending_event("temp-1", 1.0));
        list.apply(MutationEvent::Failed {
            client_id: ClientId::from("temp-1"),
            error: LedgerError::Transport("offline".into()),
        });

        let server_record = ServerRecord::from_response(json!({ "id": 7 })).unwrap();
        assert!(!list.apply(MutationEvent::Confirmed {
            client_id: ClientId::from("temp-1"),
            server_record,
        }));
        assert_eq!(list.records()[0].status, MutationStatus::Failed);

        assert!(!list.apply(pending_event("temp-1", 1.0)));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_discard_only_removes_failed_records() {
        let mut list = MutationList::new();
        list.apply(pending_event("temp-1", 1.0));
        assert!(!list.discard(&ClientId::from("temp-1")));

        list.apply(MutationEvent::Failed {
            client_id: ClientId::from("temp-1"),
            error: LedgerError::Unauthenticated,
        });
        assert!(list.discard(&ClientId::from("temp-1")));
        assert!(list.is_empty());
    }

    #[test]
    fn test_refetch_adopts_pending_record_by_echoed_client_id() {
        let mut list = MutationList::new();
        list.apply(pending_event("temp-9", 15.0));

        list.replace_confirmed(vec![json!({
            "id": "srv-9",
            "clientId": "temp-9",
            "amount": 15.0,
            "category": "petty",
            "date": "2026-05-02"
        })]);
        assert_eq!(list.len(), 1);
        let record = &list.records()[0];
        assert_eq!(record.client_id.as_str(), "temp-9");
        assert_eq!(record.status, MutationStatus::Confirmed);
        assert_eq!(record.server_id.as_deref(), Some("srv-9"));

        let server_record = ServerRecord::from_response(json!({ "id": "srv-9" })).unwrap();
        assert!(!list.apply(MutationEvent::Confirmed {
            client_id: ClientId::from("temp-9"),
            server_record,
        }));
        assert_eq!(list.len(), 1);
        assert_eq!(list.confirmed().count(), 1);
    }

    #[test]
    fn test_refetch_adopts_failed_record_the_server_stored() {
        let mut list = MutationList::new();
        list.apply(pending_event("temp-3", 8.0));
        list.apply(MutationEvent::Failed {
            client_id: ClientId::from("temp-3"),
            error: LedgerError::Transport("timed out".into()),
        });

        list.replace_confirmed(vec![json!({
            "id": "srv-3",
            "client_id": "temp-3",
            "amount": 8.0,
            "category": "petty",
            "date": "2026-05-02"
        })]);
        assert_eq!(list.len(), 1);
        assert_eq!(list.failed().count(), 0);
        assert!(list.take_for_retry(&ClientId::from("temp-3")).is_none());
    }

    #[test]
    fn test_late_confirmation_collapses_uncorrelated_listed_row() {
        let mut list = MutationList::new();
        list.apply(pending_event("temp-9", 15.0));
        list.replace_confirmed(vec![json!({
            "id": "srv-9",
            "amount": 15.0,
            "category": "petty",
            "date": "2026-05-02"
        })]);

        let server_record = ServerRecord::from_response(json!({ "id": "srv-9" })).unwrap();
        assert!(list.apply(MutationEvent::Confirmed {
            client_id: ClientId::from("temp-9"),
            server_record,
        }));
        assert_eq!(list.len(), 1);
        assert_eq!(list.records()[0].server_id.as_deref(), Some("srv-9"));
        assert!(list.get(&ClientId::from("temp-9")).is_none());
    }

    #[test]
    fn test_replace_confirmed_keeps_local_failures_and_skips_bad_rows() {
        let mut list = MutationList::new();
        list.apply(pending_event("temp-1", 3.0));
        list.apply(MutationEvent::Failed {
            client_id: ClientId::from("temp-1"),
            error: LedgerError::Transport("offline".into()),
        });

        list.replace_confirmed(vec![
            json!({ "id": "srv-1", "amount": 5.0, "category": "bank", "date": "2026-05-01" }),
            json!({ "id": "srv-2", "amount": "n/a" }),
            json!({ "amount": 1.0 }),
        ]);

        assert_eq!(list.confirmed().count(), 1);
        assert_eq!(list.failed().count(), 1);
        assert_eq!(list.total_amount(), 5.0);
    }

    #[test]
    fn test_server_record_parsing() {
        let wrapped = ServerRecord::from_response(json!({ "data": { "id": 42, "amount": 1 } })).unwrap();
        assert_eq!(wrapped.id, "42");
        assert_eq!(wrapped.to_value()["amount"], 1);

        let own_id = ServerRecord::from_response(json!({ "id": "srv-1", "data": { "id": 9 } })).unwrap();
        assert_eq!(own_id.id, "srv-1");
        assert_eq!(own_id.fields["data"]["id"], 9);

        assert!(ServerRecord::from_response(json!([1, 2])).is_err());
        assert!(ServerRecord::from_response(json!({ "id": "" })).is_err());
    }
}
