//! HTTP webhook delivery with HMAC signing.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use clavis_application::WebhookDeliverer;
use clavis_core::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

/// Delivers audit event payloads over HTTP with signature headers.
///
/// The caller owns the retry schedule; one call is one attempt. Deadlines
/// come from the injected client's timeout configuration.
#[derive(Clone)]
pub struct HttpWebhookDeliverer {
    http_client: reqwest::Client,
}

impl HttpWebhookDeliverer {
    /// Creates a deliverer over a configured HTTP client.
    #[must_use]
    pub fn new(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl WebhookDeliverer for HttpWebhookDeliverer {
    async fn deliver(
        &self,
        url: &str,
        signing_secret: &[u8],
        event_id: Uuid,
        event_type: &str,
        timestamp: i64,
        body: &str,
    ) -> AppResult<u16> {
        let signature = sign_payload(signing_secret, timestamp, body)?;

        let response = self
            .http_client
            .post(url)
            .header("content-type", "application/json")
            .header("X-Signature", signature)
            .header("X-Timestamp", timestamp.to_string())
            .header("X-Event-Id", event_id.to_string())
            .header("X-Event-Type", event_type)
            .body(body.to_owned())
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    AppError::UpstreamTimeout(format!("webhook endpoint timed out: {error}"))
                } else {
                    AppError::Internal(format!("webhook delivery transport error: {error}"))
                }
            })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            tracing::warn!(%event_id, event_type, status, "webhook endpoint returned non-success");
        }

        Ok(status)
    }
}

/// Computes `hex(HMAC-SHA256(secret, timestamp || "." || body))`.
///
/// Receivers recompute this over `X-Timestamp` and the raw body and check
/// the timestamp freshness window before trusting the payload.
pub(crate) fn sign_payload(secret: &[u8], timestamp: i64, body: &str) -> AppResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|error| AppError::Internal(format!("invalid webhook signing key: {error}")))?;

    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body.as_bytes());

    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_hex_encoded_sha256_length() -> AppResult<()> {
        let signature = sign_payload(b"secret", 1_700_000_000, "{\"a\":1}")?;
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|ch| ch.is_ascii_hexdigit()));
        Ok(())
    }

    #[test]
    fn signature_binds_timestamp_and_body() -> AppResult<()> {
        let base = sign_payload(b"secret", 1_700_000_000, "{}")?;
        assert_ne!(base, sign_payload(b"secret", 1_700_000_001, "{}")?);
        assert_ne!(base, sign_payload(b"secret", 1_700_000_000, "{ }")?);
        assert_ne!(base, sign_payload(b"other", 1_700_000_000, "{}")?);
        Ok(())
    }

    #[test]
    fn signature_verifies_against_manual_recomputation() -> AppResult<()> {
        let secret = b"a-shared-subscription-secret";
        let timestamp = 1_700_000_000;
        let body = "{\"event_type\":\"user.created\"}";

        let signature = sign_payload(secret, timestamp, body)?;

        let mut mac = HmacSha256::new_from_slice(secret)
            .map_err(|error| AppError::Internal(error.to_string()))?;
        mac.update(format!("{timestamp}.{body}").as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());

        assert_eq!(signature, expected);
        Ok(())
    }
}
