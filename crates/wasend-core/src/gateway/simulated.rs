//! Simulated gateway for demos and dry runs

use super::{DeliveryError, Gateway};
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;
use wasend_common::config::GatewayConfig;
use wasend_common::types::Contact;

/// Gateway that never leaves the process
///
/// Numbers outside 10..=15 digits and numbers on the blocked list fail
/// permanently; everything else fails transiently with `failure_rate`.
pub struct SimulatedGateway {
    failure_rate: f64,
    latency: Duration,
    blocked: HashSet<String>,
}

impl SimulatedGateway {
    pub fn new(failure_rate: f64, latency: Duration) -> Self {
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
            latency,
            blocked: HashSet::new(),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        let mut gateway = Self::new(config.failure_rate, Duration::from_millis(config.latency_ms));
        for number in &config.blocked_numbers {
            gateway = gateway.with_blocked(number);
        }
        gateway
    }

    /// Reject a number as blocked
    pub fn with_blocked(mut self, phone: &str) -> Self {
        let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
        self.blocked.insert(digits);
        self
    }
}

#[async_trait]
impl Gateway for SimulatedGateway {
    async fn send_one(&self, recipient: &Contact, message: &str) -> Result<(), DeliveryError> {
        let phone = recipient.normalized_phone();

        if !(10..=15).contains(&phone.len()) {
            return Err(DeliveryError::Permanent(format!(
                "invalid phone number: {}",
                recipient.phone
            )));
        }

        if self.blocked.contains(&phone) {
            return Err(DeliveryError::Permanent(format!(
                "recipient {} is blocked",
                phone
            )));
        }

        let roll: f64 = rand::rng().random();

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if roll < self.failure_rate {
            return Err(DeliveryError::Transient(
                "recipient temporarily unreachable".to_string(),
            ));
        }

        debug!(phone = %phone, chars = message.chars().count(), "Simulated send");
        Ok(())
    }
}
