//! factus-bridge server: invoice lifecycle REST surface.
//!
//! Wires configuration → invoice store → authority client → lifecycle
//! orchestrator → REST router.
//!
//! ## Configuration
//! - FACTUS_BRIDGE_CONFIG: optional YAML config path (also first CLI arg)
//! - FACTUS_URL / FACTUS_CLIENT_ID / FACTUS_CLIENT_SECRET /
//!   FACTUS_EMAIL / FACTUS_PASSWORD: authority credentials
//! - FACTUS_BRIDGE__SERVER__PORT, FACTUS_BRIDGE__STORAGE__PATH: overrides
//! - FACTUS_BRIDGE_LOG: tracing filter (default "info")
//!
//! A sandbox FACTUS_URL switches the authority client to the simulation
//! layer; no other component is environment-aware.

use std::sync::Arc;

use tracing::{error, info, warn};

use factus_bridge::authority::build_authority_client;
use factus_bridge::config::AppConfig;
use factus_bridge::invoice::CompanyProfile;
use factus_bridge::lifecycle::{InvoiceLifecycle, StaticCompanyProvider};
use factus_bridge::rest::{self, AppState};
use factus_bridge::store::init_store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    factus_bridge::bootstrap::init_tracing();

    let config_path = factus_bridge::bootstrap::parse_config_path();
    let config = AppConfig::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Starting factus-bridge");

    if !config.factus.is_configured() {
        warn!("FACTUS credentials incomplete; lifecycle operations will be refused");
    }

    let store = init_store(&config.storage)
        .await
        .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { e.to_string().into() })?;
    info!("Storage initialized");

    let authority = build_authority_client(&config.factus);

    // Issuer snapshot comes from the company-settings collaborator; until
    // one is wired in, an empty static profile keeps the mapping contract
    // (optionals degrade to empty strings).
    let company = Arc::new(StaticCompanyProvider(CompanyProfile::default()));

    let lifecycle = Arc::new(InvoiceLifecycle::new(store, authority.clone(), company));

    if config.server.sweep_interval_secs > 0 {
        let sweeper = lifecycle.clone();
        let period = std::time::Duration::from_secs(config.server.sweep_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately; skip it so the sweep
            // starts one full period after boot.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = sweeper.sweep().await {
                    error!(error = %e, "reconciliation sweep failed");
                }
            }
        });
        info!(
            interval_secs = config.server.sweep_interval_secs,
            "reconciliation sweeper scheduled"
        );
    }

    let state = Arc::new(AppState {
        lifecycle,
        authority,
    });

    rest::serve(state, config.server.port).await
}
