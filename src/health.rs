//! Health control loop (C11), per §4.11.
//!
//! Every `interval`, iterate known gateway ids and write back a health
//! status. The probe is a pluggable predicate rather than an unconditional
//! flip-to-healthy: unconditionally marking every gateway healthy on every
//! tick would undo the failure-path unhealthy marking from C9 within at
//! most 30s and defeat the fallback mechanism entirely, so this control
//! loop treats the probe as real reachability — see DESIGN.md.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::AppConfig;
use crate::models::HealthStatus;
use crate::store::{GatewayDirectory, GatewayHealthRepository};

/// Probes whether a gateway's external endpoint is ready to accept
/// traffic. Pluggable per §4.11 ("the probe itself is a pluggable
/// predicate").
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn is_healthy(&self, gateway_id: i64, url: &str) -> bool;
}

/// HTTP readiness probe: `GET {url}` must return a 2xx within `timeout`.
pub struct HttpHealthProbe {
    http: reqwest::Client,
}

impl HttpHealthProbe {
    pub fn new(timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client config is static and valid");
        Self { http }
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn is_healthy(&self, gateway_id: i64, url: &str) -> bool {
        match self.http.get(url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(gateway_id, url, error = %e, "health probe request failed");
                false
            }
        }
    }
}

/// Resolves a gateway id to the URL its health probe should hit. Separate
/// from [`GatewayDirectory`] because the URL lives in the in-memory config
/// registry (C7), not the store (§4.7).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GatewayUrlResolver: Send + Sync {
    async fn resolve(&self, gateway_id: i64) -> Option<String>;
}

/// Resolves a gateway's probe URL through its name, not its id: the
/// directory (C4/C5's store) gives us the row, the config registry (C7)
/// gives us the URL keyed by name (§4.7, §9 "gateway model has two shapes"
/// — resolved by treating name as the sole cross-reference key, see
/// DESIGN.md).
pub struct PgGatewayUrlResolver {
    directory: Arc<dyn GatewayDirectory>,
    config: Arc<AppConfig>,
}

impl PgGatewayUrlResolver {
    pub fn new(directory: Arc<dyn GatewayDirectory>, config: Arc<AppConfig>) -> Self {
        Self { directory, config }
    }
}

#[async_trait]
impl GatewayUrlResolver for PgGatewayUrlResolver {
    async fn resolve(&self, gateway_id: i64) -> Option<String> {
        match self.directory.get(gateway_id).await {
            Ok(Some(gateway)) => self.config.gateways.get(&gateway.name).map(|c| c.url.clone()),
            Ok(None) => None,
            Err(e) => {
                error!(gateway_id, error = %e, "failed to resolve gateway url for health probe");
                None
            }
        }
    }
}

pub struct HealthController {
    directory: Arc<dyn GatewayDirectory>,
    health: Arc<dyn GatewayHealthRepository>,
    probe: Arc<dyn HealthProbe>,
    gateway_url: Arc<dyn GatewayUrlResolver>,
    interval: Duration,
}

impl HealthController {
    pub fn new(
        directory: Arc<dyn GatewayDirectory>,
        health: Arc<dyn GatewayHealthRepository>,
        probe: Arc<dyn HealthProbe>,
        gateway_url: Arc<dyn GatewayUrlResolver>,
        interval: Duration,
    ) -> Self {
        Self {
            directory,
            health,
            probe,
            gateway_url,
            interval,
        }
    }

    /// Runs the periodic probe loop until `shutdown` is cancelled (§4.11,
    /// §5: one of the three long-lived tasks in the process).
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("health controller shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    async fn tick(&self) {
        let ids = match self.directory.active_gateway_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "failed to list active gateways for health probe");
                return;
            }
        };

        for gateway_id in ids {
            let Some(url) = self.gateway_url.resolve(gateway_id).await else {
                continue;
            };
            let healthy = self.probe.is_healthy(gateway_id, &url).await;
            let status = if healthy {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            };
            if let Err(e) = self.health.set_health(gateway_id, status).await {
                error!(gateway_id, error = %e, "failed to write gateway health");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MockGatewayDirectory, MockGatewayHealthRepository};

    struct AlwaysHealthy;

    #[async_trait]
    impl HealthProbe for AlwaysHealthy {
        async fn is_healthy(&self, _gateway_id: i64, _url: &str) -> bool {
            true
        }
    }

    struct AlwaysUnhealthy;

    #[async_trait]
    impl HealthProbe for AlwaysUnhealthy {
        async fn is_healthy(&self, _gateway_id: i64, _url: &str) -> bool {
            false
        }
    }

    struct StaticUrlResolver;

    #[async_trait]
    impl GatewayUrlResolver for StaticUrlResolver {
        async fn resolve(&self, gateway_id: i64) -> Option<String> {
            Some(format!("https://gateway-{gateway_id}.test/ready"))
        }
    }

    #[tokio::test]
    async fn tick_writes_healthy_for_every_active_gateway() {
        let mut directory = MockGatewayDirectory::new();
        directory
            .expect_active_gateway_ids()
            .returning(|| Ok(vec![1, 2]));

        let mut health = MockGatewayHealthRepository::new();
        health
            .expect_set_health()
            .withf(|_, status| *status == HealthStatus::Healthy)
            .times(2)
            .returning(|_, _| Ok(()));

        let controller = HealthController::new(
            Arc::new(directory),
            Arc::new(health),
            Arc::new(AlwaysHealthy),
            Arc::new(StaticUrlResolver),
            Duration::from_secs(30),
        );

        controller.tick().await;
    }

    #[tokio::test]
    async fn tick_writes_unhealthy_when_probe_fails() {
        let mut directory = MockGatewayDirectory::new();
        directory.expect_active_gateway_ids().returning(|| Ok(vec![1]));

        let mut health = MockGatewayHealthRepository::new();
        health
            .expect_set_health()
            .withf(|_, status| *status == HealthStatus::Unhealthy)
            .times(1)
            .returning(|_, _| Ok(()));

        let controller = HealthController::new(
            Arc::new(directory),
            Arc::new(health),
            Arc::new(AlwaysUnhealthy),
            Arc::new(StaticUrlResolver),
            Duration::from_secs(30),
        );

        controller.tick().await;
    }
}
