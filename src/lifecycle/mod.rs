//! Invoice lifecycle orchestrator.
//!
//! Sequences authority calls against a specific invoice record, enforces the
//! idempotency guard on submission, and persists the resulting transitions.
//! Within one operation the remote call always happens before the local
//! write: a crash between the two leaves local state stale but never
//! advertises a `factus_id` the authority does not also have.
//! [`InvoiceLifecycle::sweep`] is the recovery path for that gap.
//!
//! A per-invoice async lock serializes the mutating operations for one
//! invoice, so two concurrent submits cannot both observe "no factus_id yet"
//! and create two remote documents. Distinct invoices never contend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::authority::{
    Artifact, AuthorityClient, AuthorityError, ConfigCheck, DEFAULT_CANCELLATION_REASON,
};
use crate::invoice::{CompanyProfile, FactusStatus, Invoice};
use crate::store::{FactusPatch, InvoiceStore, StoreError};

/// Result type for lifecycle operations.
pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Errors from lifecycle operations.
///
/// `InvoiceNotFound`, `AlreadySubmitted` and `NotSubmitted` are expected
/// business outcomes, surfaced as values and never panics. Configuration and
/// authentication failures pass through inside `Authority` untouched.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Invoice not found: {0}")]
    InvoiceNotFound(String),

    #[error("Invoice already submitted to FACTUS as {factus_id} (status {status}); use force to re-submit")]
    AlreadySubmitted {
        factus_id: String,
        status: FactusStatus,
    },

    #[error("Invoice {0} has not been sent to FACTUS")]
    NotSubmitted(String),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Authority(#[from] AuthorityError),
}

impl From<StoreError> for LifecycleError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => LifecycleError::InvoiceNotFound(id),
            other => LifecycleError::Store(other),
        }
    }
}

/// Supplies the billing-entity snapshot used at submission time.
///
/// The company-settings collaborator lives outside this core; the orchestrator
/// treats the snapshot as an opaque input to the wire mapping.
#[async_trait]
pub trait CompanyProvider: Send + Sync {
    async fn company_profile(&self) -> CompanyProfile;
}

/// Fixed snapshot provider, for deployments where issuer details come from
/// configuration, and for tests.
pub struct StaticCompanyProvider(pub CompanyProfile);

#[async_trait]
impl CompanyProvider for StaticCompanyProvider {
    async fn company_profile(&self) -> CompanyProfile {
        self.0.clone()
    }
}

/// A persisted state transition, with the sandbox warning when present.
#[derive(Debug, Clone)]
pub struct Transition {
    pub invoice: Invoice,
    pub warning: Option<String>,
}

/// Outcome of a reconciliation sweep.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SweepReport {
    pub refreshed: usize,
    pub failed: usize,
}

/// The invoice lifecycle state machine.
pub struct InvoiceLifecycle {
    store: Arc<dyn InvoiceStore>,
    authority: Arc<dyn AuthorityClient>,
    company: Arc<dyn CompanyProvider>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl InvoiceLifecycle {
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        authority: Arc<dyn AuthorityClient>,
        company: Arc<dyn CompanyProvider>,
    ) -> Self {
        Self {
            store,
            authority,
            company,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Per-invoice lock. Entries nobody currently holds are pruned on the
    /// way in, so the registry tracks live contention rather than every id
    /// ever touched.
    async fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.retain(|key, lock| key == id || Arc::strong_count(lock) > 1);
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Submit the invoice to the authority.
    ///
    /// Refuses when a `factus_id` already exists and `force` is false,
    /// without making a network call. A forced re-submission overwrites `factus_id`
    /// and clears downstream fields: local state must never advertise
    /// artifacts of a superseded remote document.
    pub async fn submit(&self, id: &str, force: bool) -> Result<Transition> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let invoice = self.store.find(id).await?;

        if let Some(existing) = &invoice.factus.factus_id {
            if !force {
                warn!(invoice_id = id, factus_id = %existing, "submit refused: already submitted");
                return Err(LifecycleError::AlreadySubmitted {
                    factus_id: existing.clone(),
                    status: invoice.factus.status,
                });
            }
        }

        let company = self.company.company_profile().await;
        let submission = self.authority.submit_invoice(&invoice, &company).await?;

        let updated = self
            .store
            .patch(
                id,
                FactusPatch {
                    factus_id: Some(submission.factus_id.clone()),
                    status: Some(FactusStatus::Created),
                    created_at: Some(Utc::now()),
                    clear_progress: force,
                    ..Default::default()
                },
            )
            .await?;

        info!(invoice_id = id, factus_id = %submission.factus_id, force, "invoice submitted to FACTUS");
        Ok(Transition {
            invoice: updated,
            warning: submission.warning,
        })
    }

    /// Request validation of an already-submitted invoice.
    pub async fn validate(&self, id: &str) -> Result<Transition> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let invoice = self.store.find(id).await?;
        let factus_id = Self::require_submitted(&invoice)?;

        let validation = self.authority.validate_invoice(&factus_id).await?;

        let updated = self
            .store
            .patch(
                id,
                FactusPatch {
                    status: Some(FactusStatus::Validated),
                    validated_at: Some(Utc::now()),
                    validation_result: Some(validation.result),
                    cufe: validation.cufe,
                    qr_code: validation.qr_code,
                    ..Default::default()
                },
            )
            .await?;

        info!(invoice_id = id, factus_id = %factus_id, "invoice validated");
        Ok(Transition {
            invoice: updated,
            warning: validation.warning,
        })
    }

    /// Pull the remote status and persist it locally (partial merge: status,
    /// artifact URLs and the matching transition timestamp; `cufe` is left
    /// to the validation path). The local status only ever advances: a
    /// remote status earlier in the lifecycle ordering than the persisted
    /// one is logged and dropped.
    pub async fn refresh_status(&self, id: &str) -> Result<Invoice> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let invoice = self.store.find(id).await?;
        let factus_id = Self::require_submitted(&invoice)?;

        let remote = self.authority.invoice_status(&factus_id).await?;

        let mut patch = FactusPatch {
            pdf_url: remote.pdf_url,
            xml_url: remote.xml_url,
            ..Default::default()
        };

        match FactusStatus::parse(&remote.status) {
            Some(status) if status.rank() < invoice.factus.status.rank() => {
                warn!(
                    invoice_id = id,
                    remote = %status,
                    local = %invoice.factus.status,
                    "remote status behind local, keeping local"
                );
            }
            Some(status) => {
                let now = Utc::now();
                match status {
                    FactusStatus::Validated => patch.validated_at = Some(now),
                    FactusStatus::Sent => patch.sent_at = Some(now),
                    FactusStatus::Accepted => patch.accepted_at = Some(now),
                    FactusStatus::Rejected => patch.rejected_at = Some(now),
                    FactusStatus::Cancelled => patch.cancelled_at = Some(now),
                    FactusStatus::Draft | FactusStatus::Created => {}
                }
                patch.status = Some(status);
            }
            None => {
                warn!(invoice_id = id, status = %remote.status, "unknown remote status, keeping local");
            }
        }

        let updated = self.store.patch(id, patch).await?;
        info!(invoice_id = id, status = %updated.factus.status, "remote status refreshed");
        Ok(updated)
    }

    /// Download the PDF artifact. Does not mutate the invoice.
    pub async fn fetch_pdf(&self, id: &str) -> Result<Artifact> {
        let invoice = self.store.find(id).await?;
        let factus_id = Self::require_submitted(&invoice)?;
        Ok(self.authority.download_pdf(&factus_id).await?)
    }

    /// Download the XML artifact. Does not mutate the invoice.
    pub async fn fetch_xml(&self, id: &str) -> Result<Artifact> {
        let invoice = self.store.find(id).await?;
        let factus_id = Self::require_submitted(&invoice)?;
        Ok(self.authority.download_xml(&factus_id).await?)
    }

    /// Cancel the remote document.
    pub async fn cancel(&self, id: &str, reason: Option<String>) -> Result<Invoice> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let invoice = self.store.find(id).await?;
        let factus_id = Self::require_submitted(&invoice)?;

        let reason = reason
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_CANCELLATION_REASON.to_string());

        let cancellation = self.authority.cancel_invoice(&factus_id, &reason).await?;

        let updated = self
            .store
            .patch(
                id,
                FactusPatch {
                    status: Some(FactusStatus::Cancelled),
                    cancelled_at: Some(Utc::now()),
                    cancellation_id: Some(cancellation.cancellation_id),
                    cancellation_reason: Some(reason),
                    ..Default::default()
                },
            )
            .await?;

        info!(invoice_id = id, factus_id = %factus_id, "invoice cancelled");
        Ok(updated)
    }

    /// Reconciliation pass: refresh every in-flight invoice from the
    /// authority, recovering any local state left stale by a crash between
    /// remote call and local write. Per-invoice failures are logged and do
    /// not stop the sweep.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let ids = self.store.list_in_flight().await?;
        let mut report = SweepReport::default();

        for id in ids {
            match self.refresh_status(&id).await {
                Ok(_) => report.refreshed += 1,
                Err(e) => {
                    error!(invoice_id = %id, error = %e, "sweep: status refresh failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            refreshed = report.refreshed,
            failed = report.failed,
            "reconciliation sweep complete"
        );
        Ok(report)
    }

    /// Check credentials and operational access against the authority.
    pub async fn validate_configuration(&self) -> Result<ConfigCheck> {
        Ok(self.authority.validate_configuration().await?)
    }

    fn require_submitted(invoice: &Invoice) -> Result<String> {
        invoice
            .factus
            .factus_id
            .clone()
            .ok_or_else(|| LifecycleError::NotSubmitted(invoice.id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::authority::{Cancellation, RemoteStatus, Result as AuthResult, Submission, Validation};
    use crate::invoice::{Customer, LineItem};
    use crate::store::MemoryInvoiceStore;

    /// Stub authority that counts submissions, hands out sequential ids and
    /// reports a fixed remote status.
    struct CountingAuthority {
        submits: AtomicUsize,
        remote_status: String,
    }

    impl CountingAuthority {
        fn new() -> Self {
            Self::reporting("accepted")
        }

        fn reporting(status: &str) -> Self {
            Self {
                submits: AtomicUsize::new(0),
                remote_status: status.to_string(),
            }
        }
    }

    #[async_trait]
    impl AuthorityClient for CountingAuthority {
        async fn submit_invoice(
            &self,
            invoice: &Invoice,
            _company: &CompanyProfile,
        ) -> AuthResult<Submission> {
            let n = self.submits.fetch_add(1, Ordering::SeqCst);
            Ok(Submission {
                factus_id: format!("SETP-{n}"),
                number: invoice.display_number(),
                status: "created".to_string(),
                raw: serde_json::json!({}),
                warning: None,
            })
        }

        async fn validate_invoice(&self, _factus_id: &str) -> AuthResult<Validation> {
            Ok(Validation {
                status: "validated".to_string(),
                cufe: Some("cufe".to_string()),
                qr_code: None,
                result: serde_json::json!({"ok": true}),
                warning: None,
            })
        }

        async fn invoice_status(&self, _factus_id: &str) -> AuthResult<RemoteStatus> {
            Ok(RemoteStatus {
                status: self.remote_status.clone(),
                cufe: None,
                pdf_url: Some("https://pdf".to_string()),
                xml_url: None,
            })
        }

        async fn download_pdf(&self, _factus_id: &str) -> AuthResult<Artifact> {
            Ok(Artifact {
                bytes: bytes::Bytes::from_static(b"%PDF-1.4"),
                content_type: "application/pdf".to_string(),
                sandbox: false,
            })
        }

        async fn download_xml(&self, _factus_id: &str) -> AuthResult<Artifact> {
            Ok(Artifact {
                bytes: bytes::Bytes::from_static(b"<Invoice/>"),
                content_type: "application/xml".to_string(),
                sandbox: false,
            })
        }

        async fn cancel_invoice(&self, _factus_id: &str, _reason: &str) -> AuthResult<Cancellation> {
            Ok(Cancellation {
                cancellation_id: "ANU-1".to_string(),
                status: "cancelled".to_string(),
            })
        }

        async fn numbering_ranges(&self) -> AuthResult<serde_json::Value> {
            Ok(serde_json::json!([]))
        }
        async fn municipios(&self) -> AuthResult<serde_json::Value> {
            Ok(serde_json::json!([]))
        }
        async fn paises(&self) -> AuthResult<serde_json::Value> {
            Ok(serde_json::json!([]))
        }
        async fn tributos(&self) -> AuthResult<serde_json::Value> {
            Ok(serde_json::json!([]))
        }
        async fn unidades_medida(&self) -> AuthResult<serde_json::Value> {
            Ok(serde_json::json!([]))
        }

        async fn validate_configuration(&self) -> AuthResult<ConfigCheck> {
            Ok(ConfigCheck {
                authenticated: true,
                ranges_available: true,
                sandbox: false,
            })
        }
    }

    fn invoice(id: &str) -> Invoice {
        Invoice {
            id: id.to_string(),
            number: 1,
            year: 2026,
            client: Customer::default(),
            items: vec![LineItem::default()],
            ..Default::default()
        }
    }

    async fn lifecycle_reporting(status: &str) -> (Arc<InvoiceLifecycle>, Arc<CountingAuthority>) {
        let store = Arc::new(MemoryInvoiceStore::new());
        store.insert(invoice("inv-1")).await.unwrap();
        let authority = Arc::new(CountingAuthority::reporting(status));
        let lifecycle = Arc::new(InvoiceLifecycle::new(
            store,
            authority.clone(),
            Arc::new(StaticCompanyProvider(CompanyProfile::default())),
        ));
        (lifecycle, authority)
    }

    async fn lifecycle() -> (Arc<InvoiceLifecycle>, Arc<CountingAuthority>) {
        lifecycle_reporting("accepted").await
    }

    #[tokio::test]
    async fn concurrent_submits_produce_one_remote_document() {
        let (lifecycle, authority) = lifecycle().await;

        let a = tokio::spawn({
            let l = lifecycle.clone();
            async move { l.submit("inv-1", false).await }
        });
        let b = tokio::spawn({
            let l = lifecycle.clone();
            async move { l.submit("inv-1", false).await }
        });

        let results = [a.await.unwrap(), b.await.unwrap()];
        let successes = results.iter().filter(|r| r.is_ok()).count();

        assert_eq!(successes, 1);
        assert_eq!(authority.submits.load(Ordering::SeqCst), 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(LifecycleError::AlreadySubmitted { .. })
        )));
    }

    #[tokio::test]
    async fn refresh_stamps_terminal_timestamp_once() {
        let (lifecycle, _) = lifecycle().await;
        lifecycle.submit("inv-1", false).await.unwrap();

        let first = lifecycle.refresh_status("inv-1").await.unwrap();
        assert_eq!(first.factus.status, FactusStatus::Accepted);
        let stamp = first.factus.accepted_at.unwrap();

        let second = lifecycle.refresh_status("inv-1").await.unwrap();
        assert_eq!(second.factus.accepted_at, Some(stamp));
    }

    #[tokio::test]
    async fn refresh_recovers_remote_cancellation_with_timestamp() {
        // A cancel that crashed between remote success and local persist is
        // recovered by the status refresh, timestamp included.
        let (lifecycle, _) = lifecycle_reporting("cancelled").await;
        lifecycle.submit("inv-1", false).await.unwrap();

        let recovered = lifecycle.refresh_status("inv-1").await.unwrap();
        assert_eq!(recovered.factus.status, FactusStatus::Cancelled);
        assert!(recovered.factus.cancelled_at.is_some());
    }

    #[tokio::test]
    async fn refresh_stamps_validated_at_when_remote_reports_validated() {
        let (lifecycle, _) = lifecycle_reporting("validated").await;
        lifecycle.submit("inv-1", false).await.unwrap();

        let updated = lifecycle.refresh_status("inv-1").await.unwrap();
        assert_eq!(updated.factus.status, FactusStatus::Validated);
        assert!(updated.factus.validated_at.is_some());
    }

    #[tokio::test]
    async fn refresh_never_regresses_the_local_status() {
        let (lifecycle, _) = lifecycle_reporting("created").await;
        lifecycle.submit("inv-1", false).await.unwrap();
        lifecycle.validate("inv-1").await.unwrap();
        let validated_at = lifecycle
            .store
            .find("inv-1")
            .await
            .unwrap()
            .factus
            .validated_at;

        let updated = lifecycle.refresh_status("inv-1").await.unwrap();

        assert_eq!(updated.factus.status, FactusStatus::Validated);
        assert_eq!(updated.factus.validated_at, validated_at);
        // Artifact URLs still merge even when the status is dropped.
        assert_eq!(updated.factus.pdf_url.as_deref(), Some("https://pdf"));
    }

    #[tokio::test]
    async fn lock_registry_prunes_idle_entries() {
        let (lifecycle, _) = lifecycle().await;

        for id in ["a", "b", "c"] {
            let lock = lifecycle.lock_for(id).await;
            drop(lock);
        }

        let held = lifecycle.lock_for("d").await;
        assert_eq!(lifecycle.locks.lock().await.len(), 1);
        drop(held);
    }

    #[tokio::test]
    async fn sweep_refreshes_in_flight_invoices() {
        let (lifecycle, _) = lifecycle().await;
        lifecycle.submit("inv-1", false).await.unwrap();

        let report = lifecycle.sweep().await.unwrap();
        assert_eq!(report.refreshed, 1);
        assert_eq!(report.failed, 0);

        // The invoice reached a terminal state, so the next sweep sees
        // nothing in flight.
        let report = lifecycle.sweep().await.unwrap();
        assert_eq!(report.refreshed, 0);
    }

    #[tokio::test]
    async fn cancel_uses_default_reason_when_omitted() {
        let (lifecycle, _) = lifecycle().await;
        lifecycle.submit("inv-1", false).await.unwrap();

        let cancelled = lifecycle.cancel("inv-1", None).await.unwrap();
        assert_eq!(cancelled.factus.status, FactusStatus::Cancelled);
        assert_eq!(
            cancelled.factus.cancellation_reason.as_deref(),
            Some(DEFAULT_CANCELLATION_REASON)
        );
        assert!(cancelled.factus.cancelled_at.is_some());
    }

    #[tokio::test]
    async fn missing_invoice_maps_to_not_found() {
        let (lifecycle, _) = lifecycle().await;
        assert!(matches!(
            lifecycle.submit("ghost", false).await,
            Err(LifecycleError::InvoiceNotFound(_))
        ));
    }
}
