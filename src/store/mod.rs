//! Invoice record persistence.
//!
//! The store is deliberately narrow: find-by-id (client populated), apply a
//! partial patch to the FACTUS sub-state, and list in-flight invoices for
//! the reconciliation sweep. Nothing here assumes more than "document with
//! nested fields, updatable by path".

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::StorageConfig;
use crate::invoice::{FactusState, FactusStatus, Invoice};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryInvoiceStore;
pub use sqlite::SqliteInvoiceStore;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Invoice not found: {0}")]
    NotFound(String),

    #[error("Invoice already exists: {0}")]
    AlreadyExists(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Document decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Partial update of an invoice's [`FactusState`].
///
/// `None` fields are untouched. Timestamp fields are stamped only if
/// currently unset, preserving the set-exactly-once invariant even when the
/// same transition is replayed. `clear_progress` resets every
/// validation-stage field before the rest of the patch applies, which is how
/// a forced re-submission discards artifacts of the superseded remote
/// document.
#[derive(Debug, Clone, Default)]
pub struct FactusPatch {
    pub factus_id: Option<String>,
    pub cufe: Option<String>,
    pub qr_code: Option<String>,
    pub pdf_url: Option<String>,
    pub xml_url: Option<String>,
    pub status: Option<FactusStatus>,
    pub created_at: Option<DateTime<Utc>>,
    pub validated_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub validation_result: Option<serde_json::Value>,
    pub cancellation_id: Option<String>,
    pub cancellation_reason: Option<String>,
    pub rejection_reason: Option<String>,
    /// Clear downstream fields (cufe, artifacts, validation data) before
    /// applying the rest of the patch.
    pub clear_progress: bool,
}

impl FactusPatch {
    /// Apply this patch to a state in place.
    pub fn apply(&self, state: &mut FactusState) {
        if self.clear_progress {
            state.cufe = None;
            state.qr_code = None;
            state.pdf_url = None;
            state.xml_url = None;
            state.validated_at = None;
            state.validation_result = None;
            // A re-submission starts a fresh remote document, so the created
            // stamp belongs to the new submission.
            state.created_at = None;
        }

        if let Some(v) = &self.factus_id {
            state.factus_id = Some(v.clone());
        }
        if let Some(v) = &self.cufe {
            state.cufe = Some(v.clone());
        }
        if let Some(v) = &self.qr_code {
            state.qr_code = Some(v.clone());
        }
        if let Some(v) = &self.pdf_url {
            state.pdf_url = Some(v.clone());
        }
        if let Some(v) = &self.xml_url {
            state.xml_url = Some(v.clone());
        }
        if let Some(v) = self.status {
            state.status = v;
        }
        if let Some(v) = &self.validation_result {
            state.validation_result = Some(v.clone());
        }
        if let Some(v) = &self.cancellation_id {
            state.cancellation_id = Some(v.clone());
        }
        if let Some(v) = &self.cancellation_reason {
            state.cancellation_reason = Some(v.clone());
        }
        if let Some(v) = &self.rejection_reason {
            state.rejection_reason = Some(v.clone());
        }

        // Timestamps: first successful transition wins.
        Self::stamp(&mut state.created_at, self.created_at);
        Self::stamp(&mut state.validated_at, self.validated_at);
        Self::stamp(&mut state.sent_at, self.sent_at);
        Self::stamp(&mut state.accepted_at, self.accepted_at);
        Self::stamp(&mut state.rejected_at, self.rejected_at);
        Self::stamp(&mut state.cancelled_at, self.cancelled_at);
    }

    fn stamp(slot: &mut Option<DateTime<Utc>>, value: Option<DateTime<Utc>>) {
        if slot.is_none() {
            if let Some(v) = value {
                *slot = Some(v);
            }
        }
    }
}

/// Interface for invoice persistence.
///
/// Implementations:
/// - [`SqliteInvoiceStore`]: SQLite document storage
/// - [`MemoryInvoiceStore`]: in-memory, for tests and ephemeral runs
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    /// Insert a new invoice document.
    async fn insert(&self, invoice: Invoice) -> Result<()>;

    /// Load an invoice with its client populated.
    async fn find(&self, id: &str) -> Result<Invoice>;

    /// Apply a partial FACTUS-state patch and return the updated document.
    ///
    /// The patch is applied atomically with respect to concurrent patches
    /// for the same invoice.
    async fn patch(&self, id: &str, patch: FactusPatch) -> Result<Invoice>;

    /// Ids of invoices that have been submitted but not reached a terminal
    /// state. Input for the reconciliation sweep.
    async fn list_in_flight(&self) -> Result<Vec<String>>;
}

/// Initialize the invoice store based on configuration.
pub async fn init_store(
    config: &StorageConfig,
) -> std::result::Result<Arc<dyn InvoiceStore>, Box<dyn std::error::Error>> {
    info!("Storage: {} at {}", config.storage_type, config.path);

    match config.storage_type.as_str() {
        "sqlite" => {
            if let Some(parent) = std::path::Path::new(&config.path).parent() {
                std::fs::create_dir_all(parent)?;
            }

            let pool =
                sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", config.path)).await?;

            let store = SqliteInvoiceStore::new(pool);
            store.init().await?;
            Ok(Arc::new(store))
        }
        "memory" => Ok(Arc::new(MemoryInvoiceStore::new())),
        other => Err(format!("unknown storage type: {other}").into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_leaves_unnamed_fields_alone() {
        let mut state = FactusState {
            factus_id: Some("SETP-1".to_string()),
            cufe: Some("cufe".to_string()),
            status: FactusStatus::Validated,
            ..Default::default()
        };

        FactusPatch {
            pdf_url: Some("https://pdf".to_string()),
            status: Some(FactusStatus::Sent),
            ..Default::default()
        }
        .apply(&mut state);

        assert_eq!(state.factus_id.as_deref(), Some("SETP-1"));
        assert_eq!(state.cufe.as_deref(), Some("cufe"));
        assert_eq!(state.pdf_url.as_deref(), Some("https://pdf"));
        assert_eq!(state.status, FactusStatus::Sent);
    }

    #[test]
    fn timestamps_stamp_exactly_once() {
        let first = Utc::now();
        let mut state = FactusState::default();

        FactusPatch {
            validated_at: Some(first),
            ..Default::default()
        }
        .apply(&mut state);

        let later = first + chrono::Duration::seconds(90);
        FactusPatch {
            validated_at: Some(later),
            ..Default::default()
        }
        .apply(&mut state);

        assert_eq!(state.validated_at, Some(first));
    }

    #[test]
    fn clear_progress_discards_downstream_fields() {
        let mut state = FactusState {
            factus_id: Some("SETP-1".to_string()),
            cufe: Some("cufe".to_string()),
            qr_code: Some("qr".to_string()),
            pdf_url: Some("pdf".to_string()),
            xml_url: Some("xml".to_string()),
            status: FactusStatus::Validated,
            created_at: Some(Utc::now()),
            validated_at: Some(Utc::now()),
            validation_result: Some(serde_json::json!({"ok": true})),
            ..Default::default()
        };

        let now = Utc::now();
        FactusPatch {
            factus_id: Some("SETP-2".to_string()),
            status: Some(FactusStatus::Created),
            created_at: Some(now),
            clear_progress: true,
            ..Default::default()
        }
        .apply(&mut state);

        assert_eq!(state.factus_id.as_deref(), Some("SETP-2"));
        assert_eq!(state.status, FactusStatus::Created);
        assert_eq!(state.created_at, Some(now));
        assert!(state.cufe.is_none());
        assert!(state.qr_code.is_none());
        assert!(state.pdf_url.is_none());
        assert!(state.xml_url.is_none());
        assert!(state.validated_at.is_none());
        assert!(state.validation_result.is_none());
    }
}
