//! Client configuration: backend location, endpoint paths, timeouts and
//! logging settings.
//!
//! Defaults are overlaid by `POS_*` environment variables or by a JSON
//! document. The backend URL is normalised the same way regardless of source.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::LedgerError;
use crate::format;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_LOG_FILES: usize = 10;

const ENV_BACKEND_URL: &str = "POS_BACKEND_URL";
const ENV_TIMEOUT: &str = "POS_REQUEST_TIMEOUT_SECS";
const ENV_LOG_DIR: &str = "POS_LOG_DIR";
const ENV_LOG_JSON: &str = "POS_LOG_JSON";
const ENV_CURRENCY: &str = "POS_CURRENCY_SYMBOL";

/// REST paths, relative to the backend URL.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Endpoints {
    pub cashout: String,
    pub sale: String,
    pub monthly_report: String,
    pub cashouts_read: String,
    pub payments_read: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            cashout: "/api/cashout".into(),
            sale: "/api/sales".into(),
            monthly_report: "/api/reports/monthly".into(),
            cashouts_read: "/api/cashout".into(),
            payments_read: "/api/payments".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct LogConfig {
    /// Directory for rolling log files. `None` logs to the console only.
    pub dir: Option<PathBuf>,
    pub json: bool,
    pub max_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: None,
            json: false,
            max_files: DEFAULT_MAX_LOG_FILES,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    pub backend_url: String,
    pub request_timeout_secs: u64,
    pub endpoints: Endpoints,
    pub currency_symbol: String,
    pub log: LogConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: String::new(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            endpoints: Endpoints::default(),
            currency_symbol: "€".into(),
            log: LogConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults overlaid with `POS_*` environment variables.
    pub fn from_env() -> Result<Self, LedgerError> {
        let mut cfg = Self::default();
        if let Some(url) = env_var(ENV_BACKEND_URL) {
            cfg.backend_url = normalize_backend_url(&url);
        }
        if let Some(raw) = env_var(ENV_TIMEOUT) {
            cfg.request_timeout_secs = raw
                .parse()
                .map_err(|_| LedgerError::Config(format!("{ENV_TIMEOUT} must be seconds, got '{raw}'")))?;
        }
        if let Some(dir) = env_var(ENV_LOG_DIR) {
            cfg.log.dir = Some(PathBuf::from(dir));
        }
        if let Some(flag) = env_var(ENV_LOG_JSON) {
            cfg.log.json = parse_flag(&flag);
        }
        if let Some(symbol) = env_var(ENV_CURRENCY) {
            cfg.currency_symbol = symbol;
        }
        Ok(cfg)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, LedgerError> {
        let mut cfg: Self = serde_json::from_str(raw)
            .map_err(|e| LedgerError::Config(format!("invalid config JSON: {e}")))?;
        cfg.backend_url = normalize_backend_url(&cfg.backend_url);
        Ok(cfg)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// The backend base URL, or a `Config` error when none is set.
    pub fn require_backend_url(&self) -> Result<String, LedgerError> {
        let url = normalize_backend_url(&self.backend_url);
        if url.is_empty() {
            return Err(LedgerError::Config("missing backend URL".into()));
        }
        Ok(url)
    }

    /// `amount` in the configured currency, e.g. `€1,234.50`.
    pub fn format_amount(&self, amount: f64) -> String {
        format::format_currency(amount, &self.currency_symbol)
    }

    /// Short axis label in the configured currency, e.g. `€1.2K`.
    pub fn format_amount_compact(&self, amount: f64) -> String {
        format::format_compact(amount, &self.currency_symbol)
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Normalise the backend URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_backend_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() {
        return url;
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }
    while url.ends_with('/') {
        url.pop();
    }

    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_normalize_backend_url() {
        assert_eq!(
            normalize_backend_url("pos.example.com/api/"),
            "https://pos.example.com"
        );
        assert_eq!(
            normalize_backend_url("localhost:3000"),
            "http://localhost:3000"
        );
        assert_eq!(
            normalize_backend_url("  https://pos.example.com//  "),
            "https://pos.example.com"
        );
        assert_eq!(normalize_backend_url("   "), "");
    }

    #[test]
    fn test_json_config_keeps_defaults_for_missing_fields() {
        let cfg = ClientConfig::from_json_str(
            r#"{ "backendUrl": "pos.example.com/api", "endpoints": { "sale": "/api/pos/sales" } }"#,
        )
        .unwrap();
        assert_eq!(cfg.backend_url, "https://pos.example.com");
        assert_eq!(cfg.endpoints.sale, "/api/pos/sales");
        assert_eq!(cfg.endpoints.cashout, "/api/cashout");
        assert_eq!(cfg.request_timeout_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn test_amounts_use_configured_currency_symbol() {
        let cfg = ClientConfig::from_json_str(r#"{ "currencySymbol": "$" }"#).unwrap();
        assert_eq!(cfg.format_amount(1234.5), "$1,234.50");
        assert_eq!(cfg.format_amount(-12.0), "-$12.00");
        assert_eq!(cfg.format_amount_compact(1200.0), "$1.2K");
        assert_eq!(ClientConfig::default().format_amount(3.0), "€3.00");
    }

    #[test]
    fn test_missing_backend_url_is_config_error() {
        let cfg = ClientConfig::default();
        assert!(matches!(
            cfg.require_backend_url(),
            Err(LedgerError::Config(_))
        ));
    }

    #[test]
    #[serial]
    fn test_from_env_overlays_defaults() {
        std::env::set_var(ENV_BACKEND_URL, "127.0.0.1:8080/api");
        std::env::set_var(ENV_TIMEOUT, "5");
        std::env::set_var(ENV_LOG_JSON, "yes");
        let cfg = ClientConfig::from_env().unwrap();
        std::env::remove_var(ENV_BACKEND_URL);
        std::env::remove_var(ENV_TIMEOUT);
        std::env::remove_var(ENV_LOG_JSON);

        assert_eq!(cfg.backend_url, "http://127.0.0.1:8080");
        assert_eq!(cfg.request_timeout(), Duration::from_secs(5));
        assert!(cfg.log.json);
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_timeout() {
        std::env::set_var(ENV_TIMEOUT, "soon");
        let result = ClientConfig::from_env();
        std::env::remove_var(ENV_TIMEOUT);
        assert!(matches!(result, Err(LedgerError::Config(_))));
    }
}
