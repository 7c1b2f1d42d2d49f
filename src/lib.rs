//! pos-ledger: client-side core of the POS back-office.
//!
//! Cashout and sale writes go through the optimistic mutation controller
//! (`mutation`), listings refetch on realtime changes (`realtime`), the
//! dashboard derives its figures from those listings (`metrics`,
//! `dashboard`), and the calendar selector produces the date filters they
//! are fetched with (`calendar`). UI preferences and list snapshots persist
//! locally (`preferences`, `db`).

pub mod api;
pub mod calendar;
pub mod config;
pub mod credentials;
pub mod dashboard;
pub mod db;
pub mod error;
pub mod format;
pub mod logging;
pub mod metrics;
pub mod mutation;
pub mod preferences;
pub mod realtime;
pub mod schemas;

pub use api::{BackendClient, RecordSource};
pub use calendar::{Calendar, CalendarMode, CalendarWarning, DateFilter, DateRange};
pub use config::{ClientConfig, Endpoints, LogConfig};
pub use credentials::AuthToken;
pub use dashboard::Dashboard;
pub use error::LedgerError;
pub use metrics::{MetricsMemo, SalesSummary};
pub use mutation::{
    ClientId, LedgerView, MutationController, MutationEvent, MutationList, MutationRecord,
    MutationStatus, RecordTransport, ServerRecord,
};
pub use preferences::{KeyValueStore, MemoryStore, Preference, SqliteStore};
pub use realtime::{ChangeEvent, ChangeKind, Changefeed, LocalChangefeed, RealtimeHub, Subscription};
pub use schemas::{CashoutPayload, MonthlyReportRequest, SalePayload, Submission};
