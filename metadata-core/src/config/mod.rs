use crate::error::AppError;
use config::{Config as Cfg, File};
use secrecy::SecretString;
use serde::Deserialize;
use std::time::Duration;

/// Tag sent in the `source` header when calling as the service account.
pub const DEFAULT_SOURCE_TAG: &str = "PythonClient";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    #[serde(default)]
    pub authz: AuthzConfig,
}

/// Settings for the channel to the authorization service.
///
/// `host` and `port` are optional here because some deployments run without
/// an authorization service; the channel refuses to start when either is missing.
#[derive(Debug, Deserialize, Clone)]
pub struct AuthzConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub service_user_email: Option<String>,
    #[serde(default)]
    pub service_user_dev_key: Option<SecretString>,
    #[serde(default = "default_source_tag")]
    pub source_tag: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            service_user_email: None,
            service_user_dev_key: None,
            source_tag: default_source_tag(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl AuthzConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn default_service_name() -> String {
    "metadata-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_source_tag() -> String {
    DEFAULT_SOURCE_TAG.to_string()
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_authz_config_defaults() {
        let config = AuthzConfig::default();
        assert!(config.host.is_none());
        assert!(config.port.is_none());
        assert_eq!(config.source_tag, "PythonClient");
        assert_eq!(config.shutdown_grace(), Duration::from_secs(30));
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_config_deserializes_nested_authz_section() {
        let config: Config = Cfg::builder()
            .set_override("authz.host", "uac.internal")
            .unwrap()
            .set_override("authz.port", 50051)
            .unwrap()
            .set_override("authz.service_user_dev_key", "dev-key-1")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.service_name, "metadata-service");
        assert_eq!(config.authz.host.as_deref(), Some("uac.internal"));
        assert_eq!(config.authz.port, Some(50051));
        assert_eq!(
            config
                .authz
                .service_user_dev_key
                .as_ref()
                .map(|k| k.expose_secret().as_str()),
            Some("dev-key-1")
        );
    }
}
