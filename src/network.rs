//! Outbound access to the payment network
//!
//! Flow action steps and the proxy endpoints both go through a
//! [`PaymentGateway`], so tests can swap in a scripted implementation.

mod client;
mod error;
mod types;

pub use client::{HttpGateway, UnconfiguredGateway};
pub use error::{NetworkError, NetworkErrorKind};
pub use types::{HttpMethod, NetworkRequest, NetworkResponse};

use crate::config::NetworkConfig;
use async_trait::async_trait;
use std::sync::Arc;

/// Client for calls to the payment network
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Send a request; non-2xx responses are returned as errors
    async fn send(&self, request: &NetworkRequest) -> Result<NetworkResponse, NetworkError>;

    /// Whether credentials are present
    fn is_configured(&self) -> bool;
}

#[async_trait]
impl<T: PaymentGateway + ?Sized> PaymentGateway for Arc<T> {
    async fn send(&self, request: &NetworkRequest) -> Result<NetworkResponse, NetworkError> {
        (**self).send(request).await
    }

    fn is_configured(&self) -> bool {
        (**self).is_configured()
    }
}

/// Build the production gateway, falling back to [`UnconfiguredGateway`]
pub fn gateway_from_config(config: Option<&NetworkConfig>) -> Arc<dyn PaymentGateway> {
    let Some(config) = config else {
        tracing::warn!(
            "Payment network not configured. Set PAYMENT_API_BASE_URL, PAYMENT_API_USERNAME and PAYMENT_API_PASSWORD."
        );
        return Arc::new(UnconfiguredGateway);
    };

    match HttpGateway::from_config(config) {
        Ok(gateway) => {
            tracing::info!(
                base_url = %config.base_url,
                client_cert = config.client_cert.is_some(),
                "Payment network gateway initialized"
            );
            Arc::new(gateway)
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize payment network gateway");
            Arc::new(UnconfiguredGateway)
        }
    }
}
