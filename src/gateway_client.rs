//! Gateway client (C8): a single attempt at transmitting a shaped payload to
//! a named external gateway, per §4.8. Cancellation aborts an in-flight
//! attempt; the retry chain around this client lives in [`crate::retry`],
//! not here.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::models::GatewayCredentials;
use crate::wire::ShapedRequest;

/// Per-attempt HTTP deadline. Bounded well under the 1s/2s backoff gaps so a
/// single hung attempt can't stall the whole bounded-retry budget.
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GatewayClient: Send + Sync {
    async fn send(
        &self,
        ctx: &CancellationToken,
        payload: &ShapedRequest,
        gateway_name: &str,
        gateway_config: &GatewayCredentials,
    ) -> Result<(), GatewayError>;
}

/// `reqwest`-backed implementation. One client is built at startup and
/// shared (connection pooling, §5: "config registry is read-only after
/// init" applies equally to the underlying HTTP client).
pub struct HttpGatewayClient {
    http: reqwest::Client,
}

impl HttpGatewayClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(ATTEMPT_TIMEOUT)
            .build()
            .expect("reqwest client config is static and valid");
        Self { http }
    }
}

impl Default for HttpGatewayClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GatewayClient for HttpGatewayClient {
    async fn send(
        &self,
        ctx: &CancellationToken,
        payload: &ShapedRequest,
        gateway_name: &str,
        gateway_config: &GatewayCredentials,
    ) -> Result<(), GatewayError> {
        let request = self
            .http
            .post(&gateway_config.url)
            .header(reqwest::header::CONTENT_TYPE, payload.content_type)
            .header("X-Api-Key", &gateway_config.api_key)
            .body(payload.body.clone())
            .send();

        let response = tokio::select! {
            result = request => result.map_err(|e| GatewayError(e.to_string()))?,
            _ = ctx.cancelled() => {
                warn!(gateway = gateway_name, "send cancelled mid-flight");
                return Err(GatewayError("cancelled".to_string()));
            }
        };

        if !response.status().is_success() {
            return Err(GatewayError(format!(
                "gateway {gateway_name} returned status {}",
                response.status()
            )));
        }

        debug!(gateway = gateway_name, "gateway accepted transaction");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn creds(url: String) -> GatewayCredentials {
        GatewayCredentials {
            url,
            api_key: "test-key".to_string(),
            private_key: vec![0u8; 32],
        }
    }

    #[tokio::test]
    async fn successful_response_yields_ok() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("X-Api-Key", "test-key"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = HttpGatewayClient::new();
        let payload = ShapedRequest {
            body: "json".to_string(),
            content_type: "application/json",
        };
        let ctx = CancellationToken::new();
        let result = client
            .send(&ctx, &payload, "A", &creds(server.uri()))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn server_error_yields_gateway_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = HttpGatewayClient::new();
        let payload = ShapedRequest {
            body: "json".to_string(),
            content_type: "application/json",
        };
        let ctx = CancellationToken::new();
        let result = client
            .send(&ctx, &payload, "A", &creds(server.uri()))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn cancelled_token_aborts_in_flight_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let client = HttpGatewayClient::new();
        let payload = ShapedRequest {
            body: "json".to_string(),
            content_type: "application/json",
        };
        let ctx = CancellationToken::new();
        ctx.cancel();
        let result = client
            .send(&ctx, &payload, "A", &creds(server.uri()))
            .await;
        assert!(result.is_err());
    }
}
