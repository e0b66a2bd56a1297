//! HTTP gateway adapter

use super::{DeliveryError, Gateway};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use wasend_common::config::GatewayConfig;
use wasend_common::types::Contact;
use wasend_common::{Error, Result};

/// Request body sent to the gateway
#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    phone: String,
    message: &'a str,
}

/// Gateway reached over HTTP: `POST {url}/messages`
pub struct HttpGateway {
    http_client: Client,
    endpoint: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpGateway {
    /// Create a gateway for `base_url`
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let base = reqwest::Url::parse(base_url)
            .map_err(|e| Error::Config(format!("Invalid gateway URL '{}': {}", base_url, e)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "Gateway URL must be http or https: {}",
                base_url
            )));
        }

        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Gateway(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint: format!("{}/messages", base_url.trim_end_matches('/')),
            token,
            timeout,
        })
    }

    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| Error::Config("Gateway URL required for http backend".to_string()))?;
        Self::new(url, config.token.clone(), Duration::from_secs(config.timeout_secs))
    }
}

/// Map a non-success status to a delivery error
fn status_error(status: StatusCode, body: String) -> DeliveryError {
    let reason = if body.trim().is_empty() {
        format!("gateway returned {}", status)
    } else {
        format!("gateway returned {}: {}", status, body.trim())
    };

    match status.as_u16() {
        400 | 404 | 410 | 422 => DeliveryError::Permanent(reason),
        408 | 429 => DeliveryError::Transient(reason),
        s if s >= 500 => DeliveryError::Transient(reason),
        _ => DeliveryError::Other(reason),
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn send_one(
        &self,
        recipient: &Contact,
        message: &str,
    ) -> std::result::Result<(), DeliveryError> {
        let body = SendRequest {
            phone: recipient.normalized_phone(),
            message,
        };

        let mut request = self.http_client.post(&self.endpoint).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DeliveryError::Timeout(self.timeout)
            } else {
                DeliveryError::Transient(format!("gateway request failed: {}", e))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            debug!(phone = %body.phone, %status, "Gateway accepted message");
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        Err(status_error(status, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn contact() -> Contact {
        Contact::new("Ana Souza", "+55 (11) 99999-0000")
    }

    #[tokio::test]
    async fn test_send_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("authorization", "Bearer secret"))
            .and(body_json(serde_json::json!({
                "phone": "5511999990000",
                "message": "Olá Ana"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(
            &format!("{}/", server.uri()),
            Some("secret".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();

        gateway.send_one(&contact(), "Olá Ana").await.unwrap();
    }

    #[tokio::test]
    async fn test_client_errors_are_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(404).set_body_string("number not on whatsapp"))
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(&server.uri(), None, Duration::from_secs(5)).unwrap();
        let err = gateway.send_one(&contact(), "oi").await.unwrap_err();

        assert!(matches!(err, DeliveryError::Permanent(_)));
        assert!(err.to_string().contains("number not on whatsapp"));
    }

    #[tokio::test]
    async fn test_server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(&server.uri(), None, Duration::from_secs(5)).unwrap();
        let err = gateway.send_one(&contact(), "oi").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Transient(_)));
    }

    #[tokio::test]
    async fn test_slow_gateway_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let gateway =
            HttpGateway::new(&server.uri(), None, Duration::from_millis(100)).unwrap();
        let err = gateway.send_one(&contact(), "oi").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Timeout(_)));
    }

    #[test]
    fn test_rejects_bad_urls() {
        assert!(HttpGateway::new("not a url", None, Duration::from_secs(1)).is_err());
        assert!(HttpGateway::new("ftp://example.com", None, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, String::new()),
            DeliveryError::Transient(_)
        ));
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, String::new()),
            DeliveryError::Other(_)
        ));
    }
}
