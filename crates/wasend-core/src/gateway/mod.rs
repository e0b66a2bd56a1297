//! Messaging Gateway - The delivery primitive the dispatch pipeline calls

mod http;
mod simulated;

pub use http::HttpGateway;
pub use simulated::SimulatedGateway;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use wasend_common::config::GatewayConfig;
use wasend_common::types::Contact;
use wasend_common::{Error, Result};

/// Sends one message to one recipient
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Deliver `message` to `recipient`
    async fn send_one(
        &self,
        recipient: &Contact,
        message: &str,
    ) -> std::result::Result<(), DeliveryError>;
}

/// Failure of a single delivery attempt
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeliveryError {
    /// Expected to succeed on retry
    #[error("{0}")]
    Transient(String),

    /// Will not succeed on retry
    #[error("{0}")]
    Permanent(String),

    /// The gateway did not answer in time
    #[error("delivery timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Anything the gateway did not classify itself
    #[error("{0}")]
    Other(String),
}

/// How the pipeline treats a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Permanent,
}

impl DeliveryError {
    /// Classify the failure; unclassified errors are transient unless the
    /// reason clearly names a dead recipient
    pub fn classify(&self) -> FailureKind {
        match self {
            DeliveryError::Transient(_) | DeliveryError::Timeout(_) => FailureKind::Transient,
            DeliveryError::Permanent(_) => FailureKind::Permanent,
            DeliveryError::Other(reason) => classify_reason(reason),
        }
    }
}

/// Reason fragments that mean the recipient can never be reached
const PERMANENT_MARKERS: &[&str] = &[
    "blocked",
    "invalid number",
    "invalid phone",
    "not registered",
    "not on whatsapp",
    "does not exist",
    "banned",
];

/// Classify a free-form gateway error message
pub fn classify_reason(reason: &str) -> FailureKind {
    let reason = reason.to_lowercase();
    if PERMANENT_MARKERS.iter().any(|m| reason.contains(m)) {
        FailureKind::Permanent
    } else {
        FailureKind::Transient
    }
}

/// Create a gateway from configuration
pub fn create_gateway(config: &GatewayConfig) -> Result<Arc<dyn Gateway>> {
    match config.backend.as_str() {
        "simulated" => Ok(Arc::new(SimulatedGateway::from_config(config))),
        "http" => Ok(Arc::new(HttpGateway::from_config(config)?)),
        other => Err(Error::Config(format!(
            "Unsupported gateway backend: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Refusing;

    #[async_trait]
    impl Gateway for Refusing {
        async fn send_one(
            &self,
            _recipient: &Contact,
            _message: &str,
        ) -> std::result::Result<(), DeliveryError> {
            Err(DeliveryError::Other("number does not exist".into()))
        }
    }

    #[tokio::test]
    async fn test_gateway_as_trait_object() {
        let gateways: Vec<Arc<dyn Gateway>> = vec![
            Arc::new(Refusing),
            Arc::new(SimulatedGateway::new(0.0, Duration::ZERO)),
        ];
        let contact = Contact::new("Ana", "5511999990000");

        let refused = gateways[0].send_one(&contact, "oi").await.unwrap_err();
        assert_eq!(refused.classify(), FailureKind::Permanent);
        assert!(gateways[1].send_one(&contact, "oi").await.is_ok());
    }

    #[test]
    fn test_classify_explicit_variants() {
        assert_eq!(
            DeliveryError::Transient("busy".into()).classify(),
            FailureKind::Transient
        );
        assert_eq!(
            DeliveryError::Permanent("nope".into()).classify(),
            FailureKind::Permanent
        );
        assert_eq!(
            DeliveryError::Timeout(Duration::from_secs(30)).classify(),
            FailureKind::Transient
        );
    }

    #[test]
    fn test_classify_unknown_errors() {
        assert_eq!(
            DeliveryError::Other("connection reset by peer".into()).classify(),
            FailureKind::Transient
        );
        assert_eq!(
            DeliveryError::Other("Number is NOT registered on WhatsApp".into()).classify(),
            FailureKind::Permanent
        );
        assert_eq!(classify_reason("recipient blocked the sender"), FailureKind::Permanent);
    }

    #[test]
    fn test_timeout_message() {
        let err = DeliveryError::Timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "delivery timed out after 30s");
    }

    #[test]
    fn test_create_gateway() {
        let config = GatewayConfig::default();
        assert!(create_gateway(&config).is_ok());

        let config = GatewayConfig {
            backend: "http".to_string(),
            url: None,
            ..Default::default()
        };
        assert!(matches!(create_gateway(&config), Err(Error::Config(_))));

        let config = GatewayConfig {
            backend: "carrier-pigeon".to_string(),
            ..Default::default()
        };
        assert!(create_gateway(&config).is_err());
    }
}
