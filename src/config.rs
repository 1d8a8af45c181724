//! Environment-driven configuration

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_HISTORY_LIMIT: usize = 100;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Top-level server configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub db_path: PathBuf,
    /// Default page size for `GET /api/history`
    pub history_limit: usize,
    /// `None` when the payment network credentials are incomplete
    pub network: Option<NetworkConfig>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let db_path = lookup("PAYDEMO_DB_PATH").map_or_else(
            || {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(format!("{home}/.paydemo/paydemo.db"))
            },
            PathBuf::from,
        );

        Self {
            port: parse_or(lookup("PAYDEMO_PORT"), DEFAULT_PORT),
            db_path,
            history_limit: parse_or(lookup("PAYDEMO_HISTORY_LIMIT"), DEFAULT_HISTORY_LIMIT),
            network: NetworkConfig::from_lookup(&lookup),
        }
    }
}

/// Connection settings for the payment network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// PEM client certificate presented during the TLS handshake
    pub client_cert: Option<PathBuf>,
    /// PEM private key matching `client_cert`
    pub client_key: Option<PathBuf>,
    /// Extra root certificate for sandboxes with a private CA
    pub ca_cert: Option<PathBuf>,
    pub timeout: Duration,
}

impl NetworkConfig {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Option<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let base_url = non_empty("PAYMENT_API_BASE_URL")?;
        let username = non_empty("PAYMENT_API_USERNAME")?;
        let password = non_empty("PAYMENT_API_PASSWORD")?;

        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            username,
            password,
            client_cert: non_empty("PAYMENT_CLIENT_CERT").map(PathBuf::from),
            client_key: non_empty("PAYMENT_CLIENT_KEY").map(PathBuf::from),
            ca_cert: non_empty("PAYMENT_CA_CERT").map(PathBuf::from),
            timeout: Duration::from_secs(parse_or(
                lookup("PAYMENT_API_TIMEOUT_SECS"),
                DEFAULT_TIMEOUT_SECS,
            )),
        })
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}
