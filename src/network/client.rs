//! HTTPS client for the payment network

use super::{NetworkError, NetworkRequest, NetworkResponse, PaymentGateway};
use crate::config::NetworkConfig;
use async_trait::async_trait;
use reqwest::{Certificate, Client, Identity};
use serde_json::Value;
use std::path::Path;
use std::time::Instant;

/// Gateway backed by `reqwest` with optional client-certificate TLS
pub struct HttpGateway {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl HttpGateway {
    /// Build the client, loading certificate material from disk
    pub fn from_config(config: &NetworkConfig) -> Result<Self, NetworkError> {
        let mut builder = Client::builder()
            .use_rustls_tls()
            .timeout(config.timeout)
            .user_agent(concat!("paydemo/", env!("CARGO_PKG_VERSION")));

        match (&config.client_cert, &config.client_key) {
            (Some(cert), Some(key)) => {
                builder = builder.identity(load_identity(cert, key)?);
            }
            (Some(cert), None) => {
                // Combined PEM holding both certificate and key
                builder = builder.identity(load_identity(cert, cert)?);
            }
            (None, Some(_)) => {
                return Err(NetworkError::certificate(
                    "PAYMENT_CLIENT_KEY is set without PAYMENT_CLIENT_CERT",
                ));
            }
            (None, None) => {}
        }

        if let Some(ca) = &config.ca_cert {
            let pem = read_pem(ca)?;
            let cert = Certificate::from_pem(&pem)
                .map_err(|e| NetworkError::certificate(format!("Invalid CA certificate: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }

        let client = builder
            .build()
            .map_err(|e| NetworkError::certificate(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn send(&self, request: &NetworkRequest) -> Result<NetworkResponse, NetworkError> {
        let url = self.url(&request.path);
        let started = Instant::now();

        let mut builder = self
            .client
            .request(request.method.into(), &url)
            .basic_auth(&self.username, Some(&self.password));
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        tracing::debug!(method = %request.method, url = %url, "Calling payment network");
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let body = parse_body(&text);

        tracing::info!(
            method = %request.method,
            path = %request.path,
            status,
            duration_ms,
            "Payment network responded"
        );

        if (200..300).contains(&status) {
            Ok(NetworkResponse {
                status,
                body,
                duration_ms,
            })
        } else {
            Err(NetworkError::from_status(status, body))
        }
    }

    fn is_configured(&self) -> bool {
        true
    }
}

/// Stand-in used when no credentials are configured
pub struct UnconfiguredGateway;

#[async_trait]
impl PaymentGateway for UnconfiguredGateway {
    async fn send(&self, _request: &NetworkRequest) -> Result<NetworkResponse, NetworkError> {
        Err(NetworkError::not_configured())
    }

    fn is_configured(&self) -> bool {
        false
    }
}

fn load_identity(cert: &Path, key: &Path) -> Result<Identity, NetworkError> {
    let mut pem = read_pem(cert)?;
    if key != cert {
        pem.push(b'\n');
        pem.extend(read_pem(key)?);
    }
    Identity::from_pem(&pem)
        .map_err(|e| NetworkError::certificate(format!("Invalid client certificate: {e}")))
}

fn read_pem(path: &Path) -> Result<Vec<u8>, NetworkError> {
    std::fs::read(path).map_err(|e| {
        NetworkError::certificate(format!("Cannot read {}: {e}", path.display()))
    })
}

/// Empty bodies become `null`, non-JSON bodies are kept as a string
fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
    }
}
