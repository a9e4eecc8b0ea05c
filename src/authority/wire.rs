//! FACTUS wire shapes and the local-to-wire invoice mapping.
//!
//! The mapping degrades every missing optional field to an empty string or
//! its documented default; it fails only when the invoice itself is
//! structurally incomplete (no line items).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::invoice::{CompanyProfile, Invoice};

use super::{AuthorityError, Result};

/// Default document series when the invoice carries none.
pub const DEFAULT_SERIES: &str = "A";
/// Default currency code.
pub const DEFAULT_CURRENCY: &str = "COP";
/// Default exchange rate.
pub const DEFAULT_EXCHANGE_RATE: f64 = 1.0;
/// Default payment method.
pub const DEFAULT_PAYMENT_METHOD: &str = "Contado";

// ============================================================================
// OAuth
// ============================================================================

#[derive(Debug, Serialize)]
pub struct PasswordGrant<'a> {
    pub grant_type: &'static str,
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub struct RefreshGrant<'a> {
    pub grant_type: &'static str,
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

// ============================================================================
// Bill payload (submission)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillPayload {
    pub issuer: IssuerBlock,
    pub customer: CustomerBlock,
    pub invoice: InvoiceBlock,
    pub items: Vec<ItemBlock>,
    pub totals: TotalsBlock,
    pub additional: AdditionalBlock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuerBlock {
    pub document_type: String,
    pub document_number: String,
    pub business_name: String,
    pub trade_name: String,
    pub address: String,
    pub phone: String,
    pub email: String,
    pub tax_regime: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerBlock {
    pub document_type: String,
    pub document_number: String,
    pub name: String,
    pub address: String,
    pub phone: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceBlock {
    pub number: String,
    pub series: String,
    pub date: String,
    pub due_date: String,
    pub currency: String,
    pub exchange_rate: f64,
    pub notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemBlock {
    pub code: String,
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub discount: f64,
    pub tax_rate: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TotalsBlock {
    pub subtotal: f64,
    pub tax_total: f64,
    pub discount_total: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdditionalBlock {
    pub payment_method: String,
    pub payment_due_date: String,
    pub delivery_date: String,
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    pub id: String,
    #[serde(default)]
    pub number: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct ValidateResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub cufe: Option<String>,
    #[serde(default)]
    pub qr_code: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub cufe: Option<String>,
    #[serde(default)]
    pub pdf_url: Option<String>,
    #[serde(default)]
    pub xml_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelResponse {
    #[serde(default)]
    pub cancellation_id: String,
    #[serde(default)]
    pub status: String,
}

// ============================================================================
// Mapping
// ============================================================================

fn date_or_empty(date: Option<DateTime<Utc>>) -> String {
    date.map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

/// Build the authority's bill payload from the local invoice and the issuer
/// snapshot.
pub fn build_bill_payload(invoice: &Invoice, company: &CompanyProfile) -> Result<BillPayload> {
    if invoice.items.is_empty() {
        return Err(AuthorityError::Invalid(format!(
            "invoice {} has no line items",
            invoice.id
        )));
    }

    let currency = if invoice.currency.is_empty() {
        DEFAULT_CURRENCY.to_string()
    } else {
        invoice.currency.clone()
    };

    let issue_date = invoice.issue_date.or_else(|| Some(Utc::now()));

    Ok(BillPayload {
        issuer: IssuerBlock {
            document_type: company.document_type.clone(),
            document_number: company.document_number.clone(),
            business_name: company.business_name.clone(),
            trade_name: company.trade_name.clone(),
            address: company.address.clone(),
            phone: company.phone.clone(),
            email: company.email.clone(),
            tax_regime: company.tax_regime.clone(),
        },
        customer: CustomerBlock {
            document_type: invoice.client.document_type.clone(),
            document_number: invoice.client.document_number.clone(),
            name: invoice.client.name.clone(),
            address: invoice.client.address.clone(),
            phone: invoice.client.phone.clone(),
            email: invoice.client.email.clone(),
        },
        invoice: InvoiceBlock {
            number: invoice.display_number(),
            series: DEFAULT_SERIES.to_string(),
            date: date_or_empty(issue_date),
            due_date: date_or_empty(invoice.due_date),
            currency,
            exchange_rate: DEFAULT_EXCHANGE_RATE,
            notes: invoice.notes.clone().unwrap_or_default(),
        },
        items: invoice
            .items
            .iter()
            .map(|item| ItemBlock {
                code: item.code.clone(),
                description: item.description.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                discount: item.discount,
                tax_rate: item.tax_rate,
                total: item.total,
            })
            .collect(),
        totals: TotalsBlock {
            subtotal: invoice.sub_total,
            tax_total: invoice.tax_total,
            discount_total: invoice.discount,
            total: invoice.total,
        },
        additional: AdditionalBlock {
            payment_method: DEFAULT_PAYMENT_METHOD.to_string(),
            payment_due_date: date_or_empty(invoice.due_date),
            delivery_date: date_or_empty(invoice.due_date),
        },
    })
}
