//! Request schemas for every payload the client submits.
//!
//! Payloads are validated here, before a record is created, instead of
//! trusting whatever a form produced.

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::Endpoints;
use crate::error::LedgerError;

/// Which configured endpoint a submission is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Cashout,
    Sale,
    MonthlyReport,
}

impl Endpoint {
    pub fn path(self, endpoints: &Endpoints) -> &str {
        match self {
            Endpoint::Cashout => &endpoints.cashout,
            Endpoint::Sale => &endpoints.sale,
            Endpoint::MonthlyReport => &endpoints.monthly_report,
        }
    }
}

/// A payload the mutation controller can submit.
pub trait Submission: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const ENDPOINT: Endpoint;

    fn validate(&self) -> Result<(), LedgerError>;

    /// Amount this submission contributes to totals, if any.
    fn amount(&self) -> f64 {
        0.0
    }
}

// ---------------------------------------------------------------------------
// Cashout
// ---------------------------------------------------------------------------

/// Cash taken out of the drawer (supplier payment, petty cash, refund).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CashoutPayload {
    pub amount: f64,
    pub category: String,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cashier: Option<String>,
}

impl Submission for CashoutPayload {
    const ENDPOINT: Endpoint = Endpoint::Cashout;

    fn validate(&self) -> Result<(), LedgerError> {
        validate_amount("amount", self.amount)?;
        if self.category.trim().is_empty() {
            return Err(LedgerError::Validation("category is required".into()));
        }
        Ok(())
    }

    fn amount(&self) -> f64 {
        self.amount
    }
}

// ---------------------------------------------------------------------------
// Sale
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SaleItem {
    pub product_id: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price: f64,
}

impl SaleItem {
    pub fn line_total(&self) -> f64 {
        self.unit_price * f64::from(self.quantity)
    }
}

/// A completed sale from the terminal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SalePayload {
    pub items: Vec<SaleItem>,
    #[serde(default)]
    pub discount: f64,
    pub payment_method: PaymentMethod,
    pub date: NaiveDate,
}

impl SalePayload {
    pub fn subtotal(&self) -> f64 {
        self.items.iter().map(SaleItem::line_total).sum()
    }
}

impl Submission for SalePayload {
    const ENDPOINT: Endpoint = Endpoint::Sale;

    fn validate(&self) -> Result<(), LedgerError> {
        if self.items.is_empty() {
            return Err(LedgerError::Validation("a sale needs at least one item".into()));
        }
        for item in &self.items {
            if item.quantity == 0 {
                return Err(LedgerError::Validation(format!(
                    "quantity for '{}' must be at least 1",
                    item.name
                )));
            }
            if !item.unit_price.is_finite() || item.unit_price < 0.0 {
                return Err(LedgerError::Validation(format!(
                    "price for '{}' must not be negative",
                    item.name
                )));
            }
        }
        if !self.discount.is_finite() || self.discount < 0.0 {
            return Err(LedgerError::Validation("discount must not be negative".into()));
        }
        if self.discount > self.subtotal() {
            return Err(LedgerError::Validation("discount exceeds sale total".into()));
        }
        Ok(())
    }

    fn amount(&self) -> f64 {
        self.subtotal() - self.discount
    }
}

// ---------------------------------------------------------------------------
// Monthly report
// ---------------------------------------------------------------------------

/// Request to generate (and store) a monthly report on the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyReportRequest {
    pub month: u32,
    pub year: i32,
}

impl Submission for MonthlyReportRequest {
    const ENDPOINT: Endpoint = Endpoint::MonthlyReport;

    fn validate(&self) -> Result<(), LedgerError> {
        if !(1..=12).contains(&self.month) {
            return Err(LedgerError::Validation(format!(
                "month must be 1-12, got {}",
                self.month
            )));
        }
        if !(2000..=9999).contains(&self.year) {
            return Err(LedgerError::Validation(format!("invalid year {}", self.year)));
        }
        Ok(())
    }
}

fn validate_amount(field: &str, value: f64) -> Result<(), LedgerError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(LedgerError::Validation(format!("{field} must be positive")));
    }
    Ok(())
}
