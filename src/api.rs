//! REST backend client.
//!
//! Every request carries `Authorization: Bearer <token>`. Writes go through
//! `RecordTransport` (used by the mutation controller), list reads through
//! `RecordSource` (used by the dashboard).

use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::future::Future;
use tracing::{debug, warn};

use crate::calendar::DateFilter;
use crate::config::{ClientConfig, Endpoints};
use crate::credentials::AuthToken;
use crate::error::{rejection, transport_error, LedgerError};
use crate::mutation::RecordTransport;

/// The read half of the backend: date-filtered listings.
pub trait RecordSource: Send + Sync + 'static {
    fn fetch_records(
        &self,
        path: &str,
        token: &AuthToken,
        filter: Option<DateFilter>,
    ) -> impl Future<Output = Result<Vec<Value>, LedgerError>> + Send;
}

/// Reject anything that is not a relative `/api/*` path.
pub fn validate_api_path(path: &str) -> Result<(), LedgerError> {
    if path.trim().is_empty() {
        return Err(LedgerError::Config("missing API path".into()));
    }
    if path.contains("..") {
        return Err(LedgerError::Config(format!("invalid API path: {path}")));
    }
    if path.starts_with("http://") || path.starts_with("https://") {
        return Err(LedgerError::Config("absolute URLs are not allowed".into()));
    }
    if !path.starts_with("/api/") {
        return Err(LedgerError::Config(format!("only /api/* paths are allowed: {path}")));
    }
    Ok(())
}

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

pub struct BackendClient {
    client: Client,
    base_url: String,
    endpoints: Endpoints,
}

impl BackendClient {
    pub fn new(cfg: &ClientConfig) -> Result<Self, LedgerError> {
        let base_url = cfg.require_backend_url()?;
        let client = Client::builder()
            .timeout(cfg.request_timeout())
            .build()
            .map_err(|e| LedgerError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url,
            endpoints: cfg.endpoints.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    fn url(&self, path: &str) -> Result<String, LedgerError> {
        validate_api_path(path)?;
        Ok(format!("{}{}", self.base_url, path))
    }

    /// POST `body` as JSON. With `idempotency_key` set, the backend can
    /// recognise a repeated write and store the key with the record.
    pub async fn post_json(
        &self,
        path: &str,
        token: &AuthToken,
        idempotency_key: Option<&str>,
        body: &Value,
    ) -> Result<Value, LedgerError> {
        let url = self.url(path)?;
        debug!(url = %url, "POST");
        let mut req = self
            .client
            .post(&url)
            .header("Authorization", token.bearer())
            .json(body);
        if let Some(key) = idempotency_key {
            req = req.header(IDEMPOTENCY_HEADER, key);
        }
        self.send(req, &url).await
    }

    pub async fn get_json(
        &self,
        path: &str,
        token: &AuthToken,
        query: &[(&str, String)],
    ) -> Result<Value, LedgerError> {
        let url = self.url(path)?;
        debug!(url = %url, params = query.len(), "GET");
        let req = self
            .client
            .get(&url)
            .header("Authorization", token.bearer())
            .query(query);
        self.send(req, &url).await
    }

    async fn send(&self, req: RequestBuilder, url: &str) -> Result<Value, LedgerError> {
        let resp = req
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| transport_error(&self.base_url, &e))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            let message = rejection_message(&body_text);
            warn!(url = %url, status = status.as_u16(), message = ?message, "backend rejected request");
            return Err(rejection(status, message));
        }

        // Empty 204-style bodies come back as null.
        if body_text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text)
            .map_err(|e| LedgerError::Transport(format!("malformed response from {url}: {e}")))
    }
}

/// The server's own explanation from an error body, if it sent one.
fn rejection_message(body_text: &str) -> Option<String> {
    let trimmed = body_text.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(json) => json
            .get("error")
            .or_else(|| json.get("message"))
            .and_then(|v| match v {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Object(o) => o.get("message").and_then(Value::as_str).map(str::to_string),
                _ => None,
            })
            .filter(|s| !s.is_empty()),
        // Plain-text bodies are used as-is when short; HTML error pages are not.
        Err(_) if trimmed.len() <= 200 && !trimmed.starts_with('<') => Some(trimmed.to_string()),
        Err(_) => None,
    }
}

/// Listing bodies are either a bare array or wrapped in `data` / `items`.
fn rows_from_body(body: Value) -> Result<Vec<Value>, LedgerError> {
    match body {
        Value::Array(rows) => Ok(rows),
        Value::Null => Ok(Vec::new()),
        Value::Object(mut obj) => match ["data", "items", "rows"]
            .iter()
            .find_map(|k| obj.remove(*k))
        {
            Some(Value::Array(rows)) => Ok(rows),
            _ => Err(LedgerError::Transport(
                "malformed response: expected a list of records".into(),
            )),
        },
        _ => Err(LedgerError::Transport(
            "malformed response: expected a list of records".into(),
        )),
    }
}

impl RecordTransport for BackendClient {
    async fn post_record(
        &self,
        path: &str,
        token: &AuthToken,
        idempotency_key: &str,
        body: Value,
    ) -> Result<Value, LedgerError> {
        self.post_json(path, token, Some(idempotency_key), &body).await
    }
}

impl RecordSource for BackendClient {
    async fn fetch_records(
        &self,
        path: &str,
        token: &AuthToken,
        filter: Option<DateFilter>,
    ) -> Result<Vec<Value>, LedgerError> {
        let query = filter.map(|f| f.query_pairs()).unwrap_or_default();
        let body = self.get_json(path, token, &query).await?;
        rows_from_body(body)
    }
}
