//! Push delivery: fans an alert out to every registered device token.
//!
//! Delivery is best-effort per token. Having no registered targets is a
//! normal state, not an error — the alert stays active and is retried on a
//! later tick once a token appears.

use serde_json::json;
use thiserror::Error;

use crate::config::PushConfig;
use crate::db::{AlertDb, DbAlert};

/// Errors from a single push send.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Push endpoint returned status {status}")]
    Status { status: u16 },

    #[error("Failed to load device tokens: {0}")]
    TokenLoad(#[from] crate::db::DbError),
}

/// One notification send to one device token.
pub trait PushTransport: Send + Sync {
    fn send(&self, token: &str, title: &str, message: &str) -> Result<(), PushError>;
}

/// Outcome of fanning one alert out over the registered tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// At least one token accepted the notification.
    Delivered,
    /// No device tokens registered; nothing attempted.
    NoTargets,
    /// Every token send failed.
    Failed,
}

/// HTTP transport POSTing to a gateway endpoint.
pub struct HttpPush {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpPush {
    pub fn new(config: &PushConfig) -> Result<Self, PushError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

impl PushTransport for HttpPush {
    fn send(&self, token: &str, title: &str, message: &str) -> Result<(), PushError> {
        let body = json!({
            "to": token,
            "title": title,
            "body": message,
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(PushError::Status {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Deliver one alert to all registered tokens.
///
/// Per-token failures are logged and do not abort the fan-out. The alert's
/// status is never touched here; the caller advances it only on
/// `Delivered`.
pub fn deliver_alert(
    db: &AlertDb,
    transport: &dyn PushTransport,
    alert: &DbAlert,
) -> Result<DeliveryOutcome, PushError> {
    let tokens = db.get_device_tokens()?;

    if tokens.is_empty() {
        log::info!(
            "No device tokens registered; alert {} stays pending delivery",
            alert.id
        );
        return Ok(DeliveryOutcome::NoTargets);
    }

    let mut delivered = 0usize;
    for token in &tokens {
        match transport.send(token, &alert.title, &alert.message) {
            Ok(()) => delivered += 1,
            Err(e) => log::warn!("Push to one device failed for alert {}: {}", alert.id, e),
        }
    }

    if delivered > 0 {
        log::info!(
            "Alert {} delivered to {}/{} devices",
            alert.id,
            delivered,
            tokens.len()
        );
        Ok(DeliveryOutcome::Delivered)
    } else {
        Ok(DeliveryOutcome::Failed)
    }
}
