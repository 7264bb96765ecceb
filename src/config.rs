// Service Configuration
//
// Everything is read once from the environment at startup.

use std::env;
use std::time::Duration;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use url::Url;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_INVOICE_EXPIRY_SECS: u64 = 3600;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
const DEFAULT_L402_SERVICE: &str = "ganamos-posts";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable {0}")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightningBackendKind {
    Lnd,
    Fake,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackendKind {
    Supabase,
    Memory,
}

/// LND connection settings
#[derive(Clone)]
pub struct LightningConfig {
    pub rest_url: String,
    pub macaroon: String,
    pub tls_skip_verify: bool,
}

impl std::fmt::Debug for LightningConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LightningConfig")
            .field("rest_url", &self.rest_url)
            .field("macaroon", &"<redacted>")
            .field("tls_skip_verify", &self.tls_skip_verify)
            .finish()
    }
}

#[derive(Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub service_role_key: String,
}

impl std::fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("url", &self.url)
            .field("service_role_key", &"<redacted>")
            .finish()
    }
}

/// Which node and which ledger to talk to. Shared by the service and the
/// admin CLI.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub lightning_backend: LightningBackendKind,
    pub lightning: Option<LightningConfig>,
    pub store_backend: StoreBackendKind,
    pub supabase: Option<SupabaseConfig>,
}

#[derive(Clone)]
pub struct ServiceConfig {
    pub bind_addr: String,
    pub backends: BackendConfig,
    pub invoice_expiry_secs: u64,
    pub jwt_secret: String,
    pub admin_api_key: Option<String>,
    pub l402_root_key: Vec<u8>,
    pub l402_service: String,
    pub coinmarketcap_api_key: Option<String>,
    /// `None` disables the pending deposit poller
    pub deposit_poll_interval: Option<Duration>,
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("bind_addr", &self.bind_addr)
            .field("backends", &self.backends)
            .field("invoice_expiry_secs", &self.invoice_expiry_secs)
            .field("admin_api_key", &self.admin_api_key.as_ref().map(|_| "<set>"))
            .field("l402_service", &self.l402_service)
            .field("deposit_poll_interval", &self.deposit_poll_interval)
            .finish()
    }
}

/// Normalise an LND REST URL: add `https://` when no scheme is given and
/// drop any trailing slash.
pub fn normalize_lnd_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    with_scheme.trim_end_matches('/').to_string()
}

fn macaroon_prefix(macaroon: &str) -> String {
    macaroon.chars().take(10).collect()
}

/// Validate and normalise Lightning connection settings
pub fn check_lightning_config(
    url: Option<&str>,
    macaroon: Option<&str>,
    tls_skip_verify: bool,
) -> Result<LightningConfig, ConfigError> {
    let url = url
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or(ConfigError::Missing("LND_REST_URL"))?;
    let macaroon = macaroon
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or(ConfigError::Missing("LND_ADMIN_MACAROON"))?;

    let rest_url = normalize_lnd_url(url);
    Url::parse(&rest_url).map_err(|e| ConfigError::Invalid {
        name: "LND_REST_URL",
        reason: format!("'{}' is not a valid URL: {}", rest_url, e),
    })?;

    if hex::decode(macaroon).is_err() {
        return Err(ConfigError::Invalid {
            name: "LND_ADMIN_MACAROON",
            reason: format!(
                "macaroon starting with '{}...' is not hex encoded",
                macaroon_prefix(macaroon)
            ),
        });
    }

    Ok(LightningConfig {
        rest_url,
        macaroon: macaroon.to_string(),
        tls_skip_verify,
    })
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match non_empty_var(name) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_bool_var(name: &'static str) -> Result<bool, ConfigError> {
    match non_empty_var(name).map(|v| v.to_lowercase()) {
        None => Ok(false),
        Some(v) if v == "true" || v == "1" || v == "yes" => Ok(true),
        Some(v) if v == "false" || v == "0" || v == "no" => Ok(false),
        Some(v) => Err(ConfigError::Invalid {
            name,
            reason: format!("expected a boolean, got '{}'", v),
        }),
    }
}

impl BackendConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let lightning_backend = match non_empty_var("LIGHTNING_BACKEND")
            .unwrap_or_else(|| "lnd".to_string())
            .to_lowercase()
            .as_str()
        {
            "lnd" => LightningBackendKind::Lnd,
            "fake" => LightningBackendKind::Fake,
            other => {
                return Err(ConfigError::Invalid {
                    name: "LIGHTNING_BACKEND",
                    reason: format!("expected 'lnd' or 'fake', got '{}'", other),
                })
            }
        };

        let lightning = match lightning_backend {
            LightningBackendKind::Lnd => Some(check_lightning_config(
                non_empty_var("LND_REST_URL").as_deref(),
                non_empty_var("LND_ADMIN_MACAROON").as_deref(),
                parse_bool_var("LND_TLS_SKIP_VERIFY")?,
            )?),
            LightningBackendKind::Fake => None,
        };

        let supabase_url = non_empty_var("SUPABASE_URL");
        let store_backend = match non_empty_var("STORE_BACKEND").map(|v| v.to_lowercase()) {
            Some(v) if v == "supabase" => StoreBackendKind::Supabase,
            Some(v) if v == "memory" => StoreBackendKind::Memory,
            Some(v) => {
                return Err(ConfigError::Invalid {
                    name: "STORE_BACKEND",
                    reason: format!("expected 'supabase' or 'memory', got '{}'", v),
                })
            }
            None if supabase_url.is_some() => StoreBackendKind::Supabase,
            None => StoreBackendKind::Memory,
        };

        let supabase = match store_backend {
            StoreBackendKind::Supabase => Some(SupabaseConfig {
                url: supabase_url
                    .ok_or(ConfigError::Missing("SUPABASE_URL"))?
                    .trim_end_matches('/')
                    .to_string(),
                service_role_key: non_empty_var("SUPABASE_SERVICE_ROLE_KEY")
                    .ok_or(ConfigError::Missing("SUPABASE_SERVICE_ROLE_KEY"))?,
            }),
            StoreBackendKind::Memory => None,
        };

        Ok(Self {
            lightning_backend,
            lightning,
            store_backend,
            supabase,
        })
    }

    /// Fake node and in-memory ledger
    pub fn development() -> Self {
        Self {
            lightning_backend: LightningBackendKind::Fake,
            lightning: None,
            store_backend: StoreBackendKind::Memory,
            supabase: None,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let backends = BackendConfig::from_env()?;

        let jwt_secret =
            non_empty_var("SUPABASE_JWT_SECRET").ok_or(ConfigError::Missing("SUPABASE_JWT_SECRET"))?;

        let l402_root_key = match non_empty_var("L402_ROOT_KEY") {
            Some(key) => key.into_bytes(),
            None => {
                warn!("L402_ROOT_KEY not set, generating an ephemeral key; outstanding L402 tokens will not survive a restart");
                let mut key = vec![0u8; 32];
                rand::thread_rng().fill_bytes(&mut key);
                key
            }
        };

        let poll_secs = parse_var("DEPOSIT_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?;

        Ok(Self {
            bind_addr: non_empty_var("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            backends,
            invoice_expiry_secs: parse_var("INVOICE_EXPIRY_SECS", DEFAULT_INVOICE_EXPIRY_SECS)?,
            jwt_secret,
            admin_api_key: non_empty_var("ADMIN_API_KEY"),
            l402_root_key,
            l402_service: non_empty_var("L402_SERVICE")
                .unwrap_or_else(|| DEFAULT_L402_SERVICE.to_string()),
            coinmarketcap_api_key: non_empty_var("COINMARKETCAP_API_KEY"),
            deposit_poll_interval: (poll_secs > 0).then(|| Duration::from_secs(poll_secs)),
        })
    }

    /// Configuration for tests and local development: fake node, memory store
    pub fn for_development(jwt_secret: &str) -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            backends: BackendConfig::development(),
            invoice_expiry_secs: DEFAULT_INVOICE_EXPIRY_SECS,
            jwt_secret: jwt_secret.to_string(),
            admin_api_key: None,
            l402_root_key: b"development-root-key".to_vec(),
            l402_service: DEFAULT_L402_SERVICE.to_string(),
            coinmarketcap_api_key: None,
            deposit_poll_interval: None,
        }
    }
}
