//! Invoice document model.
//!
//! The `Invoice` root belongs to the surrounding ERP; this core only mutates
//! the embedded [`FactusState`] sub-document, and only through the lifecycle
//! orchestrator. `FactusState` exists from the moment the invoice document is
//! created (all fields empty), advances monotonically, and every transition
//! stamps its timestamp exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Electronic-invoice status as tracked against the authority.
///
/// `Draft` is implicit: an invoice with no `factus_id` has never been
/// submitted. `Accepted`, `Rejected` and `Cancelled` are terminal: no
/// further lifecycle call is meaningful once reached, though they are not
/// hard-blocked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactusStatus {
    #[default]
    Draft,
    Created,
    Validated,
    Sent,
    Accepted,
    Rejected,
    Cancelled,
}

impl FactusStatus {
    /// True for states after which no lifecycle call is meaningful.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FactusStatus::Accepted | FactusStatus::Rejected | FactusStatus::Cancelled
        )
    }

    /// Position in the forward lifecycle ordering. `Cancelled` compares
    /// highest: it is reachable from any state.
    pub fn rank(&self) -> u8 {
        match self {
            FactusStatus::Draft => 0,
            FactusStatus::Created => 1,
            FactusStatus::Validated => 2,
            FactusStatus::Sent => 3,
            FactusStatus::Accepted | FactusStatus::Rejected => 4,
            FactusStatus::Cancelled => 5,
        }
    }

    /// Parse a status string reported by the authority.
    ///
    /// Unknown strings map to `None`; the caller decides whether to keep the
    /// local status or record the raw value elsewhere.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "draft" => Some(FactusStatus::Draft),
            "created" => Some(FactusStatus::Created),
            "validated" => Some(FactusStatus::Validated),
            "sent" => Some(FactusStatus::Sent),
            "accepted" => Some(FactusStatus::Accepted),
            "rejected" => Some(FactusStatus::Rejected),
            "cancelled" | "canceled" => Some(FactusStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for FactusStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FactusStatus::Draft => "draft",
            FactusStatus::Created => "created",
            FactusStatus::Validated => "validated",
            FactusStatus::Sent => "sent",
            FactusStatus::Accepted => "accepted",
            FactusStatus::Rejected => "rejected",
            FactusStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Per-invoice FACTUS synchronization state.
///
/// Mutated exclusively through [`crate::store::FactusPatch`]; never deleted
/// independently of the invoice itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactusState {
    /// External authority identifier. Absent until first successful
    /// submission; only a forced re-submission may overwrite it.
    pub factus_id: Option<String>,
    /// Unique fiscal code (CUFE), assigned at validation.
    pub cufe: Option<String>,
    /// QR code content, when the authority has returned one.
    pub qr_code: Option<String>,
    /// Remote PDF artifact URL. Last write wins.
    pub pdf_url: Option<String>,
    /// Remote XML artifact URL. Last write wins.
    pub xml_url: Option<String>,
    /// Current lifecycle status.
    pub status: FactusStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub validated_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Opaque snapshot of the authority's validation payload, kept for audit.
    pub validation_result: Option<serde_json::Value>,
    pub cancellation_id: Option<String>,
    pub cancellation_reason: Option<String>,
    /// Persisted when the authority reports a rejection; no local operation
    /// fabricates one.
    pub rejection_reason: Option<String>,
}

/// Customer (the invoice's client), resolved/populated at read time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Customer {
    pub document_type: String,
    pub document_number: String,
    pub name: String,
    pub address: String,
    pub phone: String,
    pub email: String,
}

/// One invoice line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineItem {
    pub code: String,
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub discount: f64,
    pub tax_rate: f64,
    pub total: f64,
}

impl Default for LineItem {
    fn default() -> Self {
        Self {
            code: String::new(),
            description: String::new(),
            quantity: 1.0,
            unit_price: 0.0,
            discount: 0.0,
            tax_rate: 0.0,
            total: 0.0,
        }
    }
}

/// Invoice root document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Invoice {
    pub id: String,
    /// Sequential legal number within `year`.
    pub number: u32,
    pub year: i32,
    pub currency: String,
    pub sub_total: f64,
    pub tax_total: f64,
    pub tax_rate: f64,
    pub discount: f64,
    pub total: f64,
    pub notes: Option<String>,
    pub issue_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub client: Customer,
    pub items: Vec<LineItem>,
    pub factus: FactusState,
}

impl Invoice {
    /// Display/legal numbering, e.g. `2026-42`.
    pub fn display_number(&self) -> String {
        format!("{}-{}", self.year, self.number)
    }
}

/// Billing-entity snapshot used only at submission time; never persisted on
/// the invoice. Supplied by the company-settings collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanyProfile {
    pub document_type: String,
    pub document_number: String,
    pub business_name: String,
    pub trade_name: String,
    pub address: String,
    pub phone: String,
    pub email: String,
    pub tax_regime: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serde_round_trip() {
        let json = serde_json::to_string(&FactusStatus::Validated).unwrap();
        assert_eq!(json, "\"validated\"");
        let back: FactusStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, FactusStatus::Validated);
    }

    #[test]
    fn status_parse_accepts_authority_spellings() {
        assert_eq!(FactusStatus::parse("Created"), Some(FactusStatus::Created));
        assert_eq!(
            FactusStatus::parse("canceled"),
            Some(FactusStatus::Cancelled)
        );
        assert_eq!(FactusStatus::parse("settled"), None);
    }

    #[test]
    fn rank_orders_the_forward_lifecycle() {
        assert!(FactusStatus::Draft.rank() < FactusStatus::Created.rank());
        assert!(FactusStatus::Created.rank() < FactusStatus::Validated.rank());
        assert!(FactusStatus::Validated.rank() < FactusStatus::Sent.rank());
        assert!(FactusStatus::Sent.rank() < FactusStatus::Accepted.rank());
        assert_eq!(
            FactusStatus::Accepted.rank(),
            FactusStatus::Rejected.rank()
        );
        // Cancellation is reachable from anywhere, so it never reads as a
        // regression.
        assert!(FactusStatus::Cancelled.rank() > FactusStatus::Accepted.rank());
    }

    #[test]
    fn terminal_states() {
        assert!(FactusStatus::Accepted.is_terminal());
        assert!(FactusStatus::Rejected.is_terminal());
        assert!(FactusStatus::Cancelled.is_terminal());
        assert!(!FactusStatus::Validated.is_terminal());
        assert!(!FactusStatus::Draft.is_terminal());
    }

    #[test]
    fn fresh_invoice_is_draft_with_no_factus_id() {
        let invoice = Invoice::default();
        assert_eq!(invoice.factus.status, FactusStatus::Draft);
        assert!(invoice.factus.factus_id.is_none());
    }
}
