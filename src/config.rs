//! Webhook configuration from the environment.

use std::time::Duration;

use thiserror::Error;

/// Default path to webhook TLS certificate
pub const WEBHOOK_CERT_PATH: &str = "/etc/webhook/certs/tls.crt";
/// Default path to webhook TLS private key
pub const WEBHOOK_KEY_PATH: &str = "/etc/webhook/certs/tls.key";
/// Default path to the rules file
pub const WEBHOOK_RULES_PATH: &str = "/etc/webhook/rules.yaml";
/// Default webhook server port
pub const WEBHOOK_PORT: u16 = 9443;
/// Default timeout for API server calls made by the webhook
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_COMPANY_DOMAIN: &str = "example.com";
const DEFAULT_NAMESPACE: &str = "default";
const DEFAULT_SERVICE_NAME: &str = "namespace-webhook";

/// Errors raised while reading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An environment variable holds a value of the wrong type
    #[error("invalid value {value:?} for {name}: {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Immutable webhook server settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebhookConfig {
    /// Domain used to qualify annotations and labels written by rules
    pub company_domain: String,
    /// Namespace the webhook runs in
    pub namespace: String,
    /// Service fronting the webhook
    pub service_name: String,
    /// HTTPS listen port
    pub port: u16,
    /// Timeout for API server calls (CA bundle fetch, namespace lookups)
    pub api_timeout: Duration,
    pub cert_path: String,
    pub key_path: String,
    /// CA certificate that signed the serving certificate
    pub ca_cert_path: Option<String>,
    pub rules_path: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            company_domain: DEFAULT_COMPANY_DOMAIN.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            port: WEBHOOK_PORT,
            api_timeout: DEFAULT_API_TIMEOUT,
            cert_path: WEBHOOK_CERT_PATH.to_string(),
            key_path: WEBHOOK_KEY_PATH.to_string(),
            ca_cert_path: None,
            rules_path: WEBHOOK_RULES_PATH.to_string(),
        }
    }
}

impl WebhookConfig {
    /// Read configuration from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    ///
    /// Unset variables fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let string = |name: &str, default: String| lookup(name).unwrap_or(default);

        let port = match lookup("WEBHOOK_PORT") {
            Some(value) => value.parse::<u16>().map_err(|e| ConfigError::InvalidValue {
                name: "WEBHOOK_PORT",
                value: value.clone(),
                reason: e.to_string(),
            })?,
            None => defaults.port,
        };

        let api_timeout = match lookup("WEBHOOK_API_TIMEOUT_SECS") {
            Some(value) => value
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| ConfigError::InvalidValue {
                    name: "WEBHOOK_API_TIMEOUT_SECS",
                    value: value.clone(),
                    reason: e.to_string(),
                })?,
            None => defaults.api_timeout,
        };

        Ok(Self {
            company_domain: string("WEBHOOK_COMPANY_DOMAIN", defaults.company_domain),
            namespace: string("POD_NAMESPACE", defaults.namespace),
            service_name: string("WEBHOOK_SERVICE_NAME", defaults.service_name),
            port,
            api_timeout,
            cert_path: string("WEBHOOK_CERT_PATH", defaults.cert_path),
            key_path: string("WEBHOOK_KEY_PATH", defaults.key_path),
            ca_cert_path: lookup("WEBHOOK_CA_CERT_PATH").filter(|p| !p.is_empty()),
            rules_path: string("WEBHOOK_RULES_PATH", defaults.rules_path),
        })
    }

    /// In-cluster DNS name of the webhook service
    pub fn service_host(&self) -> String {
        format!("{}.{}.svc", self.service_name, self.namespace)
    }
}
