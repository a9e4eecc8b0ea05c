//! Live HTTP client for the FACTUS API.
//!
//! Owns the OAuth2 session exclusively: every network operation goes through
//! [`LiveAuthorityClient::ensure_authenticated`], which refreshes an expired
//! token and falls back to a full password-grant authentication when the
//! refresh chain is dead. Callers never distinguish "expired" from "never
//! authenticated".

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::FactusConfig;
use crate::invoice::{CompanyProfile, Invoice};

use super::wire::{
    self, CancelResponse, PasswordGrant, RefreshGrant, StatusResponse, SubmitResponse,
    TokenResponse, ValidateResponse,
};
use super::{
    Artifact, AuthorityClient, AuthorityError, Cancellation, ConfigCheck, RemoteStatus, Result,
    Submission, Validation,
};

/// Bounded timeout for every authority call; the authority is a third party.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// An authenticated OAuth2 session. Immutable: refresh produces a new value.
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    fn from_token_response(token: TokenResponse) -> Self {
        Self {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: Utc::now() + chrono::Duration::seconds(token.expires_in),
        }
    }

    /// True once the access token can no longer be trusted.
    pub fn expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// HTTP implementation of [`AuthorityClient`].
pub struct LiveAuthorityClient {
    http: reqwest::Client,
    config: FactusConfig,
    // Serializes token refresh across concurrent operations. A redundant
    // double-refresh would be benign; serializing it avoids the waste.
    session: Mutex<Option<Session>>,
}

impl LiveAuthorityClient {
    /// Create a new client. No network I/O happens until the first call.
    ///
    /// Panics if the TLS backend cannot be initialized; there is no client
    /// worth running without the request timeout.
    pub fn new(config: FactusConfig) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("HTTP client construction failed"),
            config,
            session: Mutex::new(None),
        }
    }

    fn ensure_configured(&self) -> Result<()> {
        if !self.config.is_configured() {
            return Err(AuthorityError::NotConfigured);
        }
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn request_token(&self, form: &impl serde::Serialize) -> Result<Session> {
        let response = self
            .http
            .post(self.url("/oauth/token"))
            .form(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthorityError::Auth(format!("{status}: {body}")));
        }

        let token: TokenResponse = response.json().await?;
        Ok(Session::from_token_response(token))
    }

    /// Perform a full OAuth2 password-grant authentication and store the
    /// resulting session. Not retried internally; callers decide.
    pub async fn authenticate(&self) -> Result<Session> {
        self.ensure_configured()?;

        let session = self
            .request_token(&PasswordGrant {
                grant_type: "password",
                client_id: &self.config.client_id,
                client_secret: &self.config.client_secret,
                username: &self.config.email,
                password: &self.config.password,
            })
            .await?;

        debug!(expires_at = %session.expires_at, "FACTUS authentication succeeded");
        *self.session.lock().await = Some(session.clone());
        Ok(session)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session> {
        self.request_token(&RefreshGrant {
            grant_type: "refresh_token",
            client_id: &self.config.client_id,
            client_secret: &self.config.client_secret,
            refresh_token,
        })
        .await
    }

    /// Return a valid access token, refreshing or re-authenticating as
    /// needed. Refresh failures are never surfaced: the fallback to a full
    /// authentication means a dead refresh chain only matters if the
    /// credentials themselves are dead.
    async fn ensure_authenticated(&self) -> Result<String> {
        self.ensure_configured()?;

        let mut guard = self.session.lock().await;

        if let Some(session) = guard.as_ref() {
            if !session.expired() {
                return Ok(session.access_token.clone());
            }

            match self.refresh(&session.refresh_token).await {
                Ok(fresh) => {
                    let token = fresh.access_token.clone();
                    *guard = Some(fresh);
                    return Ok(token);
                }
                Err(e) => {
                    warn!(error = %e, "token refresh failed, falling back to full authentication");
                }
            }
        }

        let session = self
            .request_token(&PasswordGrant {
                grant_type: "password",
                client_id: &self.config.client_id,
                client_secret: &self.config.client_secret,
                username: &self.config.email,
                password: &self.config.password,
            })
            .await?;

        let token = session.access_token.clone();
        *guard = Some(session);
        Ok(token)
    }

    async fn authorized(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let token = self.ensure_authenticated().await?;
        Ok(self
            .http
            .request(method, self.url(path))
            .bearer_auth(token)
            .header("Accept", "application/json"))
    }

    /// Convert a non-2xx business response into a typed upstream error,
    /// keeping the raw body as details.
    async fn upstream_error(response: Response) -> AuthorityError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let details: Option<serde_json::Value> = serde_json::from_str(&body).ok();
        let message = details
            .as_ref()
            .and_then(|d| d.get("message"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or(body);

        AuthorityError::Upstream {
            status: status.as_u16(),
            message,
            details,
        }
    }

    async fn decode_or_upstream<T: DeserializeOwned>(response: Response) -> Result<T> {
        if !response.status().is_success() {
            return Err(Self::upstream_error(response).await);
        }
        Ok(response.json().await?)
    }

    async fn get_json(&self, path: &str) -> Result<serde_json::Value> {
        let response = self.authorized(Method::GET, path).await?.send().await?;
        Self::decode_or_upstream(response).await
    }

    async fn download(&self, path: &str, default_content_type: &str) -> Result<Artifact> {
        let response = self.authorized(Method::GET, path).await?.send().await?;

        if !response.status().is_success() {
            return Err(Self::upstream_error(response).await);
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(default_content_type)
            .to_string();

        Ok(Artifact {
            bytes: response.bytes().await?,
            content_type,
            sandbox: false,
        })
    }
}

#[async_trait]
impl AuthorityClient for LiveAuthorityClient {
    async fn submit_invoice(
        &self,
        invoice: &Invoice,
        company: &CompanyProfile,
    ) -> Result<Submission> {
        let payload = wire::build_bill_payload(invoice, company)?;

        let response = self
            .authorized(Method::POST, "/v1/bills/create")
            .await?
            .json(&payload)
            .send()
            .await?;

        let submit: SubmitResponse = Self::decode_or_upstream(response).await?;
        Ok(Submission {
            factus_id: submit.id,
            number: submit.number,
            status: if submit.status.is_empty() {
                "created".to_string()
            } else {
                submit.status
            },
            raw: submit.data,
            warning: None,
        })
    }

    async fn validate_invoice(&self, factus_id: &str) -> Result<Validation> {
        let response = self
            .authorized(Method::POST, &format!("/v1/bills/validate/{factus_id}"))
            .await?
            // The validation endpoint takes no body beyond the path id.
            .json(&serde_json::json!({}))
            .send()
            .await?;

        let validate: ValidateResponse = Self::decode_or_upstream(response).await?;
        Ok(Validation {
            status: if validate.status.is_empty() {
                "validated".to_string()
            } else {
                validate.status
            },
            cufe: validate.cufe,
            qr_code: validate.qr_code,
            result: validate.data,
            warning: None,
        })
    }

    async fn invoice_status(&self, factus_id: &str) -> Result<RemoteStatus> {
        let response = self
            .authorized(Method::GET, &format!("/v1/bills/show/{factus_id}"))
            .await?
            .send()
            .await?;

        let status: StatusResponse = Self::decode_or_upstream(response).await?;
        Ok(RemoteStatus {
            status: status.status,
            cufe: status.cufe,
            pdf_url: status.pdf_url,
            xml_url: status.xml_url,
        })
    }

    async fn download_pdf(&self, factus_id: &str) -> Result<Artifact> {
        self.download(
            &format!("/v1/bills/download-pdf/{factus_id}"),
            "application/pdf",
        )
        .await
    }

    async fn download_xml(&self, factus_id: &str) -> Result<Artifact> {
        self.download(
            &format!("/v1/bills/download-xml/{factus_id}"),
            "application/xml",
        )
        .await
    }

    async fn cancel_invoice(&self, factus_id: &str, reason: &str) -> Result<Cancellation> {
        let response = self
            .authorized(Method::POST, &format!("/v1/bills/cancel/{factus_id}"))
            .await?
            .json(&serde_json::json!({ "reason": reason }))
            .send()
            .await?;

        let cancel: CancelResponse = Self::decode_or_upstream(response).await?;
        Ok(Cancellation {
            cancellation_id: cancel.cancellation_id,
            status: if cancel.status.is_empty() {
                "cancelled".to_string()
            } else {
                cancel.status
            },
        })
    }

    async fn numbering_ranges(&self) -> Result<serde_json::Value> {
        self.get_json("/v1/numbering-ranges").await
    }

    async fn municipios(&self) -> Result<serde_json::Value> {
        self.get_json("/v1/municipalities").await
    }

    async fn paises(&self) -> Result<serde_json::Value> {
        self.get_json("/v1/countries").await
    }

    async fn tributos(&self) -> Result<serde_json::Value> {
        self.get_json("/v1/tributes").await
    }

    async fn unidades_medida(&self) -> Result<serde_json::Value> {
        self.get_json("/v1/measurement-units").await
    }

    async fn validate_configuration(&self) -> Result<ConfigCheck> {
        self.authenticate().await?;
        let ranges_available = self.numbering_ranges().await.is_ok();

        Ok(ConfigCheck {
            authenticated: true,
            ranges_available,
            sandbox: false,
        })
    }
}
