//! Structured estimates embedded in model output
//!
//! The system prompt asks the model to close an estimate with a JSON object
//! wrapped in `<script type="application/json">` … `</script>`. This module
//! finds that block, validates it against the invoice shape and reconciles
//! the stated total with its line items.
//!
//! # Reconciliation
//!
//! Line items are authoritative. When `total.amount` disagrees with the sum
//! of item amounts (beyond half a cent) the total is replaced by the sum and
//! the stated value is kept in [`Invoice::reconciliation`] so the
//! discrepancy stays visible.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::error::{EstimateError, Result};

/// Amounts closer than this are considered equal
const AMOUNT_TOLERANCE: f64 = 0.005;

/// A parsed, reconciled estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    /// Name of the quoted project
    pub project: String,
    /// Line items grouped by category, in model order
    pub invoice_group: Vec<InvoiceGroup>,
    /// Totals; `amount` always equals the sum of item amounts
    pub total: InvoiceTotal,
    /// Set when the stated total had to be corrected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconciliation: Option<TotalDiscrepancy>,
}

/// A category of line items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceGroup {
    pub category: String,
    pub items: Vec<InvoiceItem>,
}

/// One quoted feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub feature: String,
    #[serde(default)]
    pub description: String,
    /// Price in the localization block's currency
    pub amount: f64,
    /// Effort, in the unit the persona document prescribes
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<u32>,
}

/// Invoice totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceTotal {
    pub amount: f64,
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<u32>,
}

/// Stated versus recomputed total
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TotalDiscrepancy {
    /// What the model wrote in `total.amount`
    pub stated: f64,
    /// Sum of item amounts, now stored in `total.amount`
    pub computed: f64,
}

impl Invoice {
    /// Iterate every line item across groups
    pub fn items(&self) -> impl Iterator<Item = &InvoiceItem> {
        self.invoice_group.iter().flat_map(|g| g.items.iter())
    }

    /// Sum of item amounts, rounded to cents
    pub fn items_amount(&self) -> f64 {
        round_cents(self.items().map(|item| item.amount).sum())
    }

    /// Whether the stated total had to be corrected
    pub fn was_reconciled(&self) -> bool {
        self.reconciliation.is_some()
    }

    fn validate(&self) -> Result<()> {
        if self.invoice_group.iter().all(|g| g.items.is_empty()) {
            return Err(EstimateError::InvoiceParse("invoice has no line items".to_string()).into());
        }

        for item in self.items() {
            if item.amount < 0.0 {
                return Err(EstimateError::InvoiceParse(format!(
                    "item '{}' has a negative amount",
                    item.feature
                ))
                .into());
            }
            if item.duration < 0.0 {
                return Err(EstimateError::InvoiceParse(format!(
                    "item '{}' has a negative duration",
                    item.feature
                ))
                .into());
            }
        }

        Ok(())
    }

    fn reconcile(mut self) -> Self {
        let computed = self.items_amount();
        let stated = self.total.amount;
        if (computed - stated).abs() > AMOUNT_TOLERANCE {
            tracing::warn!(
                stated,
                computed,
                project = %self.project,
                "Invoice total disagrees with line items; using line items"
            );
            self.total.amount = computed;
            self.reconciliation = Some(TotalDiscrepancy { stated, computed });
        }
        self
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn block_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?is)<script\b[^>]*>(.*?)</script\s*>")
            .expect("invoice block pattern is valid")
    })
}

/// Parse one JSON payload into a reconciled invoice
///
/// Numeric fields must be JSON numbers; a string such as `"contact us"`
/// where an amount belongs rejects the whole invoice.
///
/// # Errors
///
/// Returns `EstimateError::InvoiceParse` if the payload is not an invoice
pub fn parse_invoice(payload: &str) -> Result<Invoice> {
    let payload = strip_code_fence(payload.trim());
    let invoice: Invoice = serde_json::from_str(payload)
        .map_err(|e| EstimateError::InvoiceParse(format!("invoice does not match schema: {}", e)))?;
    invoice.validate()?;
    Ok(invoice.reconcile())
}

/// Find and parse the invoice embedded in a complete model response
///
/// Returns `Ok(None)` when the text carries no block. When several blocks
/// are present the last one wins.
///
/// # Errors
///
/// Returns `EstimateError::InvoiceParse` if a block exists but is not a
/// valid invoice
///
/// # Examples
///
/// ```
/// use estimate_chat::invoice::extract_invoice;
///
/// let text = r#"Here is your estimate.
/// <script type="application/json">
/// {"project":"Shop","invoiceGroup":[{"category":"Web","items":[
///   {"feature":"Cart","description":"","amount":1200,"duration":2}]}],
///  "total":{"amount":1200,"duration":2}}
/// </script>"#;
/// let invoice = extract_invoice(text).unwrap().unwrap();
/// assert_eq!(invoice.total.amount, 1200.0);
/// ```
pub fn extract_invoice(text: &str) -> Result<Option<Invoice>> {
    let payload = block_pattern()
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .last()
        .map(|m| m.as_str());

    match payload {
        Some(payload) => parse_invoice(payload).map(Some),
        None => Ok(None),
    }
}

/// The response text with embedded blocks removed, for display
pub fn strip_invoice_blocks(text: &str) -> String {
    block_pattern().replace_all(text, "").trim_end().to_string()
}

fn strip_code_fence(payload: &str) -> &str {
    let Some(rest) = payload.strip_prefix("```") else {
        return payload;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
