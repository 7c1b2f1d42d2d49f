//! Session credentials in the OS credential store.
//!
//! On Windows this uses DPAPI (via the `keyring` crate), on macOS Keychain,
//! and on Linux the Secret Service API. The auth token handed to the
//! mutation controller comes from here.

use keyring::Entry;
use std::fmt;
use tracing::{info, warn};
use zeroize::Zeroize;

use crate::config::normalize_backend_url;
use crate::error::LedgerError;

const SERVICE_NAME: &str = "pos-ledger";

const KEY_AUTH_TOKEN: &str = "auth_token";
const KEY_BACKEND_URL: &str = "backend_url";

const ALL_KEYS: &[&str] = &[KEY_AUTH_TOKEN, KEY_BACKEND_URL];

/// Bearer token for the REST backend. Wiped from memory on drop and never
/// printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// `None` for a blank token.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let mut raw = raw.into();
        let trimmed = raw.trim().to_string();
        raw.zeroize();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub(crate) fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl Drop for AuthToken {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(***)")
    }
}

// ---------------------------------------------------------------------------
// Low-level helpers
// ---------------------------------------------------------------------------

/// Retrieve a single credential. Returns `None` when the entry does not
/// exist or the platform store is unavailable.
fn get_credential(key: &str) -> Option<String> {
    let entry = match Entry::new(SERVICE_NAME, key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) => Some(pw),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}

fn set_credential(key: &str, value: &str) -> Result<(), LedgerError> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| LedgerError::Storage(e.to_string()))?;
    entry
        .set_password(value)
        .map_err(|e| LedgerError::Storage(e.to_string()))
}

fn delete_credential(key: &str) -> Result<(), LedgerError> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| LedgerError::Storage(e.to_string()))?;
    match entry.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(LedgerError::Storage(e.to_string())),
    }
}

// ---------------------------------------------------------------------------
// High-level API
// ---------------------------------------------------------------------------

/// The stored session token, if the cashier is signed in.
pub fn auth_token() -> Option<AuthToken> {
    get_credential(KEY_AUTH_TOKEN).and_then(AuthToken::new)
}

pub fn store_auth_token(token: &AuthToken) -> Result<(), LedgerError> {
    set_credential(KEY_AUTH_TOKEN, token.expose())?;
    info!("session token stored");
    Ok(())
}

/// Backend URL saved during onboarding, normalised.
pub fn backend_url() -> Option<String> {
    get_credential(KEY_BACKEND_URL)
        .map(|u| normalize_backend_url(&u))
        .filter(|u| !u.is_empty())
}

pub fn store_backend_url(url: &str) -> Result<(), LedgerError> {
    let normalized = normalize_backend_url(url);
    if normalized.is_empty() {
        return Err(LedgerError::Config("backend URL is empty".into()));
    }
    set_credential(KEY_BACKEND_URL, &normalized)
}

/// Delete every stored credential (sign-out / reset).
pub fn sign_out() -> Result<(), LedgerError> {
    info!("clearing stored session credentials");
    for key in ALL_KEYS {
        delete_credential(key)?;
    }
    Ok(())
}
