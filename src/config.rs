use std::collections::HashMap;
use std::env;

use crate::models::GatewayCredentials;

const GATEWAY_NAMES: [&str; 3] = ["A", "B", "C"];

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Server
    pub server_address: String,

    // Postgres
    pub postgres_uri: String,

    // Kafka
    pub kafka_broker_url: Vec<String>,
    pub kafka_group_id: String,
    pub kafka_client_id: String,
    pub send_transaction_topic: String,

    // Gateway credentials, keyed by short name ("A"/"B"/"C").
    pub gateways: HashMap<String, GatewayCredentials>,

    // Dispatch / health tuning
    pub dispatch_max_attempts: u32,
    pub health_check_interval_secs: u64,
    pub graceful_shutdown_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_address = env::var("SERVER_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into());
        let postgres_uri = require_env("POSTGRES_URI")?;

        let kafka_broker_url = require_env("KAFKA_BROKER_URL")?
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        if kafka_broker_url.is_empty() {
            return Err(ConfigError::Invalid(
                "KAFKA_BROKER_URL".into(),
                "must contain at least one broker".into(),
            ));
        }
        let kafka_group_id = require_env("KAFKA_GROUP_ID")?;
        let kafka_client_id = require_env("KAFKA_CLIENT_ID")?;
        let send_transaction_topic = require_env("SEND_TRANSACTION_KAFKA_TOPIC")?;

        let mut gateways = HashMap::with_capacity(GATEWAY_NAMES.len());
        for name in GATEWAY_NAMES {
            let url = require_env(&format!("GATEWAY_{name}_URL"))?;
            let api_key = require_env(&format!("GATEWAY_{name}_API_KEY"))?;
            let private_key_raw = require_env(&format!("GATEWAY_{name}_PRIVATE_KEY"))?;
            let private_key = private_key_raw.into_bytes();
            if private_key.len() != 32 {
                return Err(ConfigError::Invalid(
                    format!("GATEWAY_{name}_PRIVATE_KEY"),
                    format!("must be exactly 32 bytes, got {}", private_key.len()),
                ));
            }
            gateways.insert(
                name.to_string(),
                GatewayCredentials {
                    url,
                    api_key,
                    private_key,
                },
            );
        }

        let dispatch_max_attempts = parse_env_or("DISPATCH_MAX_ATTEMPTS", 3u32)?;
        if dispatch_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "DISPATCH_MAX_ATTEMPTS".into(),
                "must be > 0".into(),
            ));
        }
        let health_check_interval_secs = parse_env_or("HEALTH_CHECK_INTERVAL_SECS", 30u64)?;
        let graceful_shutdown_secs = parse_env_or("GRACEFUL_SHUTDOWN_SECS", 185u64)?;

        Ok(Self {
            server_address,
            postgres_uri,
            kafka_broker_url,
            kafka_group_id,
            kafka_client_id,
            send_transaction_topic,
            gateways,
            dispatch_max_attempts,
            health_check_interval_secs,
            graceful_shutdown_secs,
        })
    }

    pub fn kafka_brokers_csv(&self) -> String {
        self.kafka_broker_url.join(",")
    }

    /// Gateway config registry lookup (C7). Fails with `UnsupportedGateway`
    /// on unknown name (§4.7).
    pub fn config_for(&self, name: &str) -> Result<&GatewayCredentials, crate::error::UnsupportedGateway> {
        self.gateways
            .get(name)
            .ok_or_else(|| crate::error::UnsupportedGateway(name.to_string()))
    }
}

fn require_env(name: &str) -> Result<String, ConfigError> {
    env::var(name)
        .map_err(|_| ConfigError::Missing(name.into()))
        .and_then(|v| {
            if v.is_empty() {
                Err(ConfigError::Missing(name.into()))
            } else {
                Ok(v)
            }
        })
}

fn parse_env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(v) if !v.is_empty() => v
            .parse()
            .map_err(|_| ConfigError::Invalid(name.into(), format!("could not parse '{v}'"))),
        _ => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Missing(String),
    Invalid(String, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(name) => write!(f, "missing required env var: {name}"),
            ConfigError::Invalid(name, reason) => write!(f, "invalid env var {name}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}
