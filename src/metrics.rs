//! Dashboard figures derived from payment and cashout listings.
//!
//! Every function here is pure: the result depends only on the inputs, so
//! callers may memoize on input identity (`MetricsMemo` does exactly that).
//! Inputs are raw listings as returned by the backend; anything that is not
//! an array counts as empty, and missing or non-numeric amounts count as 0.

use chrono::{DateTime, NaiveDate};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

const DATE_FIELDS: &[&str] = &["created_at", "createdAt", "date", "payment_date", "paymentDate"];

/// Numeric value of `record[key]`. Numbers and numeric strings count;
/// anything else is 0.
fn field_amount(record: &Value, key: &str) -> f64 {
    let n = match record.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if n.is_finite() {
        n
    } else {
        0.0
    }
}

fn rows(list: &Value) -> &[Value] {
    match list {
        Value::Array(items) => items.as_slice(),
        _ => &[],
    }
}

fn record_net(record: &Value) -> f64 {
    field_amount(record, "amount") - field_amount(record, "discount")
}

/// Σ amount − Σ discount over all payments.
pub fn gross_sales(payments: &Value) -> f64 {
    rows(payments).iter().map(record_net).sum()
}

/// `gross_sales(payments) − total_cashouts`.
pub fn net_sales(payments: &Value, total_cashouts: f64) -> f64 {
    gross_sales(payments) - total_cashouts
}

/// Σ amount over cashout rows.
pub fn total_cashouts(cashouts: &Value) -> f64 {
    rows(cashouts)
        .iter()
        .map(|r| field_amount(r, "amount"))
        .sum()
}

/// Net income per calendar day. Rows without a readable date are skipped.
pub fn daily_income(payments: &Value) -> BTreeMap<NaiveDate, f64> {
    let mut by_day: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for record in rows(payments) {
        if let Some(day) = record_date(record) {
            *by_day.entry(day).or_insert(0.0) += record_net(record);
        }
    }
    by_day
}

/// First readable date among the usual timestamp fields. Accepts RFC 3339
/// timestamps and plain `YYYY-MM-DD` (or a longer string starting with one).
pub fn record_date(record: &Value) -> Option<NaiveDate> {
    DATE_FIELDS.iter().find_map(|key| {
        let raw = record.get(*key)?.as_str()?.trim();
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.date_naive());
        }
        raw.get(..10)
            .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesSummary {
    pub gross_sales: f64,
    pub net_sales: f64,
    pub total_cashouts: f64,
    pub transaction_count: usize,
    pub daily_income: BTreeMap<NaiveDate, f64>,
}

impl SalesSummary {
    pub fn compute(payments: &Value, cashouts: &Value) -> Self {
        let cashout_total = total_cashouts(cashouts);
        Self {
            gross_sales: gross_sales(payments),
            net_sales: net_sales(payments, cashout_total),
            total_cashouts: cashout_total,
            transaction_count: rows(payments).len(),
            daily_income: daily_income(payments),
        }
    }
}

/// Caches the last `SalesSummary`, keyed on an md5 fingerprint of the
/// inputs.
#[derive(Debug, Default)]
pub struct MetricsMemo {
    fingerprint: Option<md5::Digest>,
    summary: Option<SalesSummary>,
    computations: usize,
}

impl MetricsMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&mut self, payments: &Value, cashouts: &Value) -> &SalesSummary {
        let fingerprint = fingerprint(payments, cashouts);
        let stale = self.fingerprint != Some(fingerprint) || self.summary.is_none();
        if stale {
            self.summary = Some(SalesSummary::compute(payments, cashouts));
            self.fingerprint = Some(fingerprint);
            self.computations += 1;
        }
        self.summary.get_or_insert_with(|| SalesSummary::compute(payments, cashouts))
    }

    /// How many times the summary was actually recomputed.
    pub fn computations(&self) -> usize {
        self.computations
    }

    pub fn invalidate(&mut self) {
        self.fingerprint = None;
        self.summary = None;
    }
}

fn fingerprint(payments: &Value, cashouts: &Value) -> md5::Digest {
    let mut ctx = md5::Context::new();
    ctx.consume(payments.to_string().as_bytes());
    ctx.consume([0u8]);
    ctx.consume(cashouts.to_string().as_bytes());
    ctx.compute()
}
