//! Persistent UI preferences: panel sizes, card visibility, layout, and
//! cached list snapshots.
//!
//! Values are JSON inside a versioned envelope. A value that is missing,
//! corrupt, or from an unknown schema version falls back to the supplied
//! default; store errors are logged and swallowed because the cache is
//! best-effort only.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::db::{self, DbState};
use crate::error::LedgerError;

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// String key/value capability injected into every component that persists
/// state. Keys are independent; concurrent use of different keys is safe.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<(), LedgerError>;

    fn remove(&self, key: &str) -> Result<(), LedgerError>;
}

#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LedgerError> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| LedgerError::Storage(format!("memory store lock: {e}")))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), LedgerError> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| LedgerError::Storage(format!("memory store lock: {e}")))?;
        values.remove(key);
        Ok(())
    }
}

/// Store backed by the local SQLite `preferences` table, scoped to one
/// namespace.
pub struct SqliteStore {
    db: Arc<DbState>,
    namespace: String,
}

impl SqliteStore {
    pub fn new(db: Arc<DbState>, namespace: &str) -> Self {
        Self {
            db,
            namespace: namespace.to_string(),
        }
    }

    /// Remove every key in this store's namespace.
    pub fn clear(&self) -> Result<usize, LedgerError> {
        let conn = self
            .db
            .conn
            .lock()
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        db::clear_namespace(&conn, &self.namespace)
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Option<String> {
        let conn = match self.db.conn.lock() {
            Ok(c) => c,
            Err(e) => {
                warn!(key, error = %e, "preference store lock poisoned");
                return None;
            }
        };
        match db::get_preference(&conn, &self.namespace, key) {
            Ok(v) => v,
            Err(e) => {
                warn!(namespace = %self.namespace, key, error = %e, "preference read failed");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LedgerError> {
        let conn = self
            .db
            .conn
            .lock()
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        db::set_preference(&conn, &self.namespace, key, value)
    }

    fn remove(&self, key: &str) -> Result<(), LedgerError> {
        let conn = self
            .db
            .conn
            .lock()
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        db::delete_preference(&conn, &self.namespace, key)
    }
}

// ---------------------------------------------------------------------------
// Versioned preference
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct Envelope<V> {
    version: u32,
    value: V,
}

type Migration<T> = Box<dyn FnOnce(u32, Value) -> Option<T>>;

/// One typed preference under one key.
pub struct Preference<T> {
    store: Arc<dyn KeyValueStore>,
    key: String,
    version: u32,
    default: T,
    value: T,
}

impl<T> Preference<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Read `key` once; values from other schema versions are discarded.
    pub fn load(store: Arc<dyn KeyValueStore>, key: &str, version: u32, default: T) -> Self {
        Self::load_inner(store, key, version, default, None)
    }

    /// Like [`Preference::load`], but an older stored version is handed to
    /// `migrate` (old version, raw value). `None` from the migration falls
    /// back to the default. A migrated value is written back immediately.
    pub fn load_with_migration<F>(
        store: Arc<dyn KeyValueStore>,
        key: &str,
        version: u32,
        default: T,
        migrate: F,
    ) -> Self
    where
        F: FnOnce(u32, Value) -> Option<T> + 'static,
    {
        Self::load_inner(store, key, version, default, Some(Box::new(migrate)))
    }

    fn load_inner(
        store: Arc<dyn KeyValueStore>,
        key: &str,
        version: u32,
        default: T,
        migrate: Option<Migration<T>>,
    ) -> Self {
        let mut pref = Self {
            store,
            key: key.to_string(),
            version,
            value: default.clone(),
            default,
        };

        let Some(raw) = pref.store.get(key) else {
            return pref;
        };

        match decode_envelope(key, &raw) {
            Ok((stored_version, value)) if stored_version == version => {
                match serde_json::from_value::<T>(value) {
                    Ok(v) => pref.value = v,
                    Err(e) => log_malformed(key, &e.to_string()),
                }
            }
            Ok((stored_version, value)) if stored_version < version => {
                match migrate.and_then(|m| m(stored_version, value)) {
                    Some(v) => {
                        debug!(key, from = stored_version, to = version, "preference migrated");
                        pref.value = v;
                        pref.persist();
                    }
                    None => {
                        debug!(key, from = stored_version, to = version, "preference reset on version change");
                    }
                }
            }
            Ok((stored_version, _)) => {
                warn!(key, stored_version, version, "preference written by a newer schema; using default");
            }
            Err(LedgerError::MalformedCache { reason, .. }) => log_malformed(key, &reason),
            Err(e) => log_malformed(key, &e.to_string()),
        }

        pref
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Replace the value and write it through.
    pub fn set(&mut self, value: T) {
        self.value = value;
        self.persist();
    }

    pub fn update<F: FnOnce(&mut T)>(&mut self, f: F) {
        f(&mut self.value);
        self.persist();
    }

    /// Remove the stored key and go back to the default.
    pub fn clear(&mut self) {
        self.value = self.default.clone();
        if let Err(e) = self.store.remove(&self.key) {
            warn!(key = %self.key, error = %e, "failed to clear preference");
        }
    }

    fn persist(&self) {
        let envelope = Envelope {
            version: self.version,
            value: &self.value,
        };
        let encoded = match serde_json::to_string(&envelope) {
            Ok(s) => s,
            Err(e) => {
                warn!(key = %self.key, error = %e, "failed to encode preference");
                return;
            }
        };
        if let Err(e) = self.store.set(&self.key, &encoded) {
            warn!(key = %self.key, error = %e, "failed to persist preference");
        }
    }
}

/// Split a stored string into (version, value). A bare JSON value without an
/// envelope is treated as version 0.
fn decode_envelope(key: &str, raw: &str) -> Result<(u32, Value), LedgerError> {
    let parsed: Value = serde_json::from_str(raw).map_err(|e| LedgerError::MalformedCache {
        key: key.to_string(),
        reason: e.to_string(),
    })?;

    let is_envelope = parsed
        .as_object()
        .map(|o| o.len() == 2 && o.contains_key("version") && o.contains_key("value"))
        .unwrap_or(false);
    if !is_envelope {
        return Ok((0, parsed));
    }

    let envelope: Envelope<Value> =
        serde_json::from_value(parsed).map_err(|e| LedgerError::MalformedCache {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
    Ok((envelope.version, envelope.value))
}

fn log_malformed(key: &str, reason: &str) {
    warn!(key, reason, "malformed cached preference; falling back to default");
}

// ---------------------------------------------------------------------------
// List snapshots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot<T> {
    pub fetched_at: DateTime<Utc>,
    pub items: Vec<T>,
}

const SNAPSHOT_VERSION: u32 = 1;

/// Last fetched list for one resource. Advisory: shown only until a live
/// fetch resolves, then overwritten.
pub struct SnapshotCache<T> {
    pref: Preference<Option<Snapshot<T>>>,
}

impl<T> SnapshotCache<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    pub fn open(store: Arc<dyn KeyValueStore>, resource: &str) -> Self {
        Self {
            pref: Preference::load(store, &format!("snapshot:{resource}"), SNAPSHOT_VERSION, None),
        }
    }

    pub fn cached(&self) -> Option<&Snapshot<T>> {
        self.pref.get().as_ref()
    }

    pub fn store(&mut self, items: Vec<T>) {
        self.pref.set(Some(Snapshot {
            fetched_at: Utc::now(),
            items,
        }));
    }

    pub fn invalidate(&mut self) {
        self.pref.clear();
    }
}
