//! REST surface for the invoice lifecycle.
//!
//! Thin adapters: each route extracts its parameters, invokes exactly one
//! orchestrator operation (master-data routes go straight to the authority
//! client, being stateless reads rather than lifecycle transitions), and
//! translates the result into the uniform envelope
//! `{success, message, result?, error?, details?}`. Binary endpoints stream
//! the raw buffer; when they fail they return the JSON envelope, never a
//! corrupted binary body.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::authority::{Artifact, AuthorityClient, AuthorityError};
use crate::invoice::Invoice;
use crate::lifecycle::{InvoiceLifecycle, LifecycleError, Transition};

/// Shared state for axum handlers.
pub struct AppState {
    pub lifecycle: Arc<InvoiceLifecycle>,
    pub authority: Arc<dyn AuthorityClient>,
}

/// Uniform response envelope.
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl Envelope {
    fn ok(message: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            result: Some(result),
            error: None,
            details: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SubmitBody {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelBody {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Start the REST server on the given port.
///
/// When `port` is 0, the OS assigns an ephemeral port. The bound port is
/// always logged so it can be discovered.
pub async fn serve(
    state: Arc<AppState>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    info!(port = listener.local_addr()?.port(), "invoice REST API listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the axum router (separated for testing).
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/factus/create/:id", post(create))
        .route("/factus/validate/:id", post(validate))
        .route("/factus/status/:id", get(status))
        .route("/factus/download/pdf/:id", get(download_pdf))
        .route("/factus/download/xml/:id", get(download_xml))
        .route("/factus/cancel/:id", post(cancel))
        .route("/factus/numbering-ranges", get(numbering_ranges))
        .route("/factus/municipios", get(municipios))
        .route("/factus/paises", get(paises))
        .route("/factus/tributos", get(tributos))
        .route("/factus/unidades-medida", get(unidades_medida))
        .route("/factus/validate-config", get(validate_config))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn create(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<SubmitBody>>,
) -> Response {
    let force = body.map(|Json(b)| b.force).unwrap_or(false);
    match state.lifecycle.submit(&id, force).await {
        Ok(transition) => {
            transition_response("Factura enviada a FACTUS", transition).into_response()
        }
        Err(e) => failure(e).into_response(),
    }
}

async fn validate(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.lifecycle.validate(&id).await {
        Ok(transition) => {
            transition_response("Factura validada ante la DIAN", transition).into_response()
        }
        Err(e) => failure(e).into_response(),
    }
}

async fn status(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.lifecycle.refresh_status(&id).await {
        Ok(invoice) => Json(Envelope::ok("Estado actualizado", projection(&invoice))).into_response(),
        Err(e) => failure(e).into_response(),
    }
}

async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<CancelBody>>,
) -> Response {
    let reason = body.and_then(|Json(b)| b.reason);
    match state.lifecycle.cancel(&id, reason).await {
        Ok(invoice) => Json(Envelope::ok("Factura anulada", projection(&invoice))).into_response(),
        Err(e) => failure(e).into_response(),
    }
}

async fn download_pdf(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.lifecycle.fetch_pdf(&id).await {
        Ok(artifact) => stream_artifact(artifact, &format!("factura-{id}.pdf")),
        Err(e) => failure(e).into_response(),
    }
}

async fn download_xml(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.lifecycle.fetch_xml(&id).await {
        Ok(artifact) => stream_artifact(artifact, &format!("factura-{id}.xml")),
        Err(e) => failure(e).into_response(),
    }
}

async fn validate_config(State(state): State<Arc<AppState>>) -> Response {
    match state.lifecycle.validate_configuration().await {
        Ok(check) => Json(Envelope::ok(
            "Configuración verificada",
            serde_json::to_value(check).unwrap_or_default(),
        ))
        .into_response(),
        Err(e) => failure(e).into_response(),
    }
}

async fn numbering_ranges(State(state): State<Arc<AppState>>) -> Response {
    master_data(state.authority.numbering_ranges().await, "Rangos de numeración")
}

async fn municipios(State(state): State<Arc<AppState>>) -> Response {
    master_data(state.authority.municipios().await, "Municipios")
}

async fn paises(State(state): State<Arc<AppState>>) -> Response {
    master_data(state.authority.paises().await, "Países")
}

async fn tributos(State(state): State<Arc<AppState>>) -> Response {
    master_data(state.authority.tributos().await, "Tributos")
}

async fn unidades_medida(State(state): State<Arc<AppState>>) -> Response {
    master_data(state.authority.unidades_medida().await, "Unidades de medida")
}

// ============================================================================
// Result translation
// ============================================================================

/// Status projection handed back to downstream consumers: identity plus the
/// full FACTUS sub-state.
fn projection(invoice: &Invoice) -> serde_json::Value {
    serde_json::json!({
        "invoice_id": invoice.id,
        "number": invoice.display_number(),
        "factus": invoice.factus,
    })
}

fn transition_response(message: &str, transition: Transition) -> Json<Envelope> {
    let message = match &transition.warning {
        Some(warning) => format!("{message}. {warning}"),
        None => message.to_string(),
    };
    Json(Envelope::ok(message, projection(&transition.invoice)))
}

fn stream_artifact(artifact: Artifact, filename: &str) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, artifact.content_type.clone()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        artifact.bytes,
    )
        .into_response()
}

fn master_data(
    result: crate::authority::Result<serde_json::Value>,
    message: &str,
) -> Response {
    match result {
        Ok(value) => Json(Envelope::ok(message, value)).into_response(),
        Err(e) => failure(LifecycleError::Authority(e)).into_response(),
    }
}

/// Map a lifecycle error to an HTTP status plus envelope.
///
/// Business/state outcomes are 4xx with a human-readable message; upstream
/// and transport problems are 502; configuration and authentication
/// failures indicate a deployment problem, not a per-request condition.
fn failure(e: LifecycleError) -> (StatusCode, Json<Envelope>) {
    let (status, details) = match &e {
        LifecycleError::InvoiceNotFound(_) => (StatusCode::NOT_FOUND, None),
        LifecycleError::AlreadySubmitted { factus_id, status } => (
            StatusCode::BAD_REQUEST,
            Some(serde_json::json!({
                "factus_id": factus_id,
                "status": status,
            })),
        ),
        LifecycleError::NotSubmitted(_) => (StatusCode::BAD_REQUEST, None),
        LifecycleError::Authority(auth) => match auth {
            AuthorityError::NotConfigured => (StatusCode::SERVICE_UNAVAILABLE, None),
            AuthorityError::Auth(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
            AuthorityError::Invalid(_) => (StatusCode::BAD_REQUEST, None),
            AuthorityError::Upstream { details, .. } => {
                (StatusCode::BAD_GATEWAY, details.clone())
            }
            AuthorityError::Transport(_) | AuthorityError::Decode(_) => {
                (StatusCode::BAD_GATEWAY, None)
            }
        },
        LifecycleError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
    };

    if status.is_server_error() {
        error!(error = %e, "lifecycle operation failed");
    }

    (
        status,
        Json(Envelope {
            success: false,
            message: e.to_string(),
            result: None,
            error: Some(e.to_string()),
            details,
        }),
    )
}
