//! Application configuration.
//!
//! Aggregates configuration for the server, storage and the FACTUS authority
//! client into a single [`AppConfig`] that can be loaded from a YAML file,
//! `FACTUS_BRIDGE__`-prefixed environment variables, or the flat `FACTUS_*`
//! credential variables the original deployment used.

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "FACTUS_BRIDGE_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "FACTUS_BRIDGE";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "FACTUS_BRIDGE_LOG";

/// Environment variable for the FACTUS API base URL.
pub const FACTUS_URL_ENV_VAR: &str = "FACTUS_URL";
/// Environment variable for the FACTUS OAuth client id.
pub const FACTUS_CLIENT_ID_ENV_VAR: &str = "FACTUS_CLIENT_ID";
/// Environment variable for the FACTUS OAuth client secret.
pub const FACTUS_CLIENT_SECRET_ENV_VAR: &str = "FACTUS_CLIENT_SECRET";
/// Environment variable for the FACTUS account email.
pub const FACTUS_EMAIL_ENV_VAR: &str = "FACTUS_EMAIL";
/// Environment variable for the FACTUS account password.
pub const FACTUS_PASSWORD_ENV_VAR: &str = "FACTUS_PASSWORD";

/// Substring identifying a sandbox base URL.
const SANDBOX_URL_MARKER: &str = "sandbox";

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP surface configuration.
    pub server: ServerConfig,
    /// Invoice record store configuration.
    pub storage: StorageConfig,
    /// FACTUS authority client configuration.
    pub factus: FactusConfig,
}

/// HTTP surface configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen port. 0 lets the OS assign an ephemeral port.
    pub port: u16,
    /// Seconds between reconciliation sweeps. 0 disables the sweeper.
    pub sweep_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            sweep_interval_secs: 600,
        }
    }
}

/// Invoice record store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage backend: "sqlite" or "memory".
    pub storage_type: String,
    /// Database path (sqlite only).
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: "sqlite".to_string(),
            path: "data/invoices.db".to_string(),
        }
    }
}

/// FACTUS authority client configuration.
///
/// All five credential fields must be non-empty for the client to be
/// considered configured; operations requiring network access fail fast
/// otherwise.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FactusConfig {
    /// Base URL of the FACTUS API.
    pub base_url: String,
    /// OAuth2 client id.
    pub client_id: String,
    /// OAuth2 client secret.
    pub client_secret: String,
    /// Account email (OAuth2 password-grant username).
    pub email: String,
    /// Account password.
    pub password: String,
}

impl FactusConfig {
    /// True iff all credential fields are present.
    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty()
            && !self.client_id.is_empty()
            && !self.client_secret.is_empty()
            && !self.email.is_empty()
            && !self.password.is_empty()
    }

    /// True iff the base URL points at the FACTUS sandbox environment.
    ///
    /// Evaluated once at client construction; nothing downstream branches
    /// on the environment.
    pub fn is_sandbox(&self) -> bool {
        self.base_url.contains(SANDBOX_URL_MARKER)
    }
}

impl AppConfig {
    /// Load configuration from an optional YAML file layered under
    /// environment variables.
    ///
    /// Precedence, lowest to highest: defaults, file,
    /// `FACTUS_BRIDGE__SECTION__KEY` variables, flat `FACTUS_*` credential
    /// variables.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            builder =
                builder.add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(CONFIG_ENV_PREFIX).separator("__"),
        );

        let mut cfg: AppConfig = builder.build()?.try_deserialize()?;
        cfg.factus.apply_env_overrides();

        if cfg.storage.storage_type != "sqlite" && cfg.storage.storage_type != "memory" {
            return Err(ConfigError::Invalid(format!(
                "unknown storage type: {}",
                cfg.storage.storage_type
            )));
        }

        Ok(cfg)
    }
}

impl FactusConfig {
    /// Apply the flat `FACTUS_*` environment variables used by the original
    /// deployment. Set variables win over file values.
    fn apply_env_overrides(&mut self) {
        let overrides = [
            (FACTUS_URL_ENV_VAR, &mut self.base_url),
            (FACTUS_CLIENT_ID_ENV_VAR, &mut self.client_id),
            (FACTUS_CLIENT_SECRET_ENV_VAR, &mut self.client_secret),
            (FACTUS_EMAIL_ENV_VAR, &mut self.email),
            (FACTUS_PASSWORD_ENV_VAR, &mut self.password),
        ];
        for (var, field) in overrides {
            if let Ok(value) = std::env::var(var) {
                if !value.is_empty() {
                    *field = value;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_config() -> FactusConfig {
        FactusConfig {
            base_url: "https://api.factus.com.co".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            email: "emisor@example.com".to_string(),
            password: "hunter2".to_string(),
        }
    }

    #[test]
    fn configured_requires_all_credentials() {
        assert!(full_config().is_configured());

        for blank in 0..5 {
            let mut cfg = full_config();
            match blank {
                0 => cfg.base_url.clear(),
                1 => cfg.client_id.clear(),
                2 => cfg.client_secret.clear(),
                3 => cfg.email.clear(),
                _ => cfg.password.clear(),
            }
            assert!(!cfg.is_configured(), "field {blank} should be required");
        }
    }

    #[test]
    fn sandbox_detection_from_base_url() {
        let mut cfg = full_config();
        assert!(!cfg.is_sandbox());

        cfg.base_url = "https://api-sandbox.factus.com.co".to_string();
        assert!(cfg.is_sandbox());
    }

    #[test]
    #[serial_test::serial]
    fn flat_env_vars_override_credentials() {
        std::env::set_var(FACTUS_CLIENT_ID_ENV_VAR, "env-client");
        std::env::set_var(FACTUS_PASSWORD_ENV_VAR, "");

        let mut cfg = full_config();
        cfg.apply_env_overrides();

        assert_eq!(cfg.client_id, "env-client");
        // Empty variables never blank out a configured value.
        assert_eq!(cfg.password, "hunter2");

        std::env::remove_var(FACTUS_CLIENT_ID_ENV_VAR);
        std::env::remove_var(FACTUS_PASSWORD_ENV_VAR);
    }

    #[test]
    fn defaults_are_usable() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.sweep_interval_secs, 600);
        assert_eq!(cfg.storage.storage_type, "sqlite");
        assert!(!cfg.factus.is_configured());
    }
}
