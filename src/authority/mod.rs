//! External authority (FACTUS) client.
//!
//! [`AuthorityClient`] is the only seam through which the rest of the system
//! reaches the tax-document intermediary. Two implementations exist:
//! [`LiveAuthorityClient`] speaks HTTP with OAuth2 token management, and
//! [`SandboxAuthorityClient`] fabricates shape-correct responses with zero
//! network I/O. The implementation is chosen once, at construction
//! ([`build_authority_client`]); callers never branch on environment.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::FactusConfig;
use crate::invoice::{CompanyProfile, Invoice};

pub mod live;
pub mod sandbox;
pub mod wire;

pub use live::LiveAuthorityClient;
pub use sandbox::SandboxAuthorityClient;

/// Result type for authority operations.
pub type Result<T> = std::result::Result<T, AuthorityError>;

/// Errors from the authority boundary, typed by kind rather than sniffed
/// from message text. HTTP status codes land in `Upstream` verbatim.
#[derive(Debug, thiserror::Error)]
pub enum AuthorityError {
    #[error("FACTUS is not configured: base URL or credentials missing")]
    NotConfigured,

    #[error("FACTUS authentication failed: {0}")]
    Auth(String),

    #[error("Invoice cannot be mapped for submission: {0}")]
    Invalid(String),

    #[error("FACTUS returned {status}: {message}")]
    Upstream {
        status: u16,
        message: String,
        /// Raw response body, kept for diagnosis. Never interpreted.
        details: Option<serde_json::Value>,
    },

    #[error("Transport error talking to FACTUS: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Malformed FACTUS response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Outcome of a document submission.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Authority identifier for the created document.
    pub factus_id: String,
    /// Invoice number as echoed by the authority.
    pub number: String,
    /// Remote status, normally `created`.
    pub status: String,
    /// Raw response payload, kept for audit.
    pub raw: serde_json::Value,
    /// Set when the response was fabricated by the sandbox layer.
    pub warning: Option<String>,
}

/// Outcome of a document validation.
#[derive(Debug, Clone)]
pub struct Validation {
    pub status: String,
    pub cufe: Option<String>,
    pub qr_code: Option<String>,
    /// Opaque validation payload as returned by the authority.
    pub result: serde_json::Value,
    pub warning: Option<String>,
}

/// Remote status projection for an already-submitted document.
#[derive(Debug, Clone)]
pub struct RemoteStatus {
    pub status: String,
    pub cufe: Option<String>,
    pub pdf_url: Option<String>,
    pub xml_url: Option<String>,
}

/// A downloaded binary artifact (PDF or XML).
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: bytes::Bytes,
    pub content_type: String,
    /// True when the artifact was synthesized by the sandbox layer.
    pub sandbox: bool,
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone)]
pub struct Cancellation {
    pub cancellation_id: String,
    pub status: String,
}

/// Report from a configuration check.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConfigCheck {
    pub authenticated: bool,
    pub ranges_available: bool,
    pub sandbox: bool,
}

/// Interface for all FACTUS interaction.
///
/// Every operation ensures a valid OAuth session first (live client) or
/// fabricates a response (sandbox); callers never see session management.
#[async_trait]
pub trait AuthorityClient: Send + Sync {
    /// Map the invoice to the authority's wire shape and create a remote
    /// document.
    async fn submit_invoice(
        &self,
        invoice: &Invoice,
        company: &CompanyProfile,
    ) -> Result<Submission>;

    /// Request validation of an already-submitted document.
    async fn validate_invoice(&self, factus_id: &str) -> Result<Validation>;

    /// Fetch the current remote status, CUFE and artifact URLs.
    async fn invoice_status(&self, factus_id: &str) -> Result<RemoteStatus>;

    /// Download the PDF representation. Binary-safe.
    async fn download_pdf(&self, factus_id: &str) -> Result<Artifact>;

    /// Download the signed XML representation. Binary-safe.
    async fn download_xml(&self, factus_id: &str) -> Result<Artifact>;

    /// Cancel a document with a free-text reason.
    async fn cancel_invoice(&self, factus_id: &str, reason: &str) -> Result<Cancellation>;

    // Master data lookups. Opaque JSON: the core does not interpret these.
    async fn numbering_ranges(&self) -> Result<serde_json::Value>;
    async fn municipios(&self) -> Result<serde_json::Value>;
    async fn paises(&self) -> Result<serde_json::Value>;
    async fn tributos(&self) -> Result<serde_json::Value>;
    async fn unidades_medida(&self) -> Result<serde_json::Value>;

    /// Perform a full authentication and, outside sandbox, confirm that
    /// numbering ranges are reachable.
    async fn validate_configuration(&self) -> Result<ConfigCheck>;
}

/// Default cancellation reason when the caller supplies none.
pub const DEFAULT_CANCELLATION_REASON: &str = "Anulación solicitada por el emisor";

/// Build the authority client matching the configured environment.
///
/// Sandbox base URLs get the simulation layer; everything else gets the live
/// HTTP client. This is the only place the environment is inspected.
pub fn build_authority_client(config: &FactusConfig) -> Arc<dyn AuthorityClient> {
    if config.is_sandbox() {
        info!(base_url = %config.base_url, "FACTUS sandbox environment, using simulated authority");
        Arc::new(SandboxAuthorityClient::new(config.clone()))
    } else {
        info!(base_url = %config.base_url, "FACTUS production environment");
        Arc::new(LiveAuthorityClient::new(config.clone()))
    }
}
