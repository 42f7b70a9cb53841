//! Bridge Configuration Settings
//!
//! Configuration types for the bridge, loaded from environment variables.
//! Invalid numeric values fall back to defaults; only structurally broken
//! configuration is an error.

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// gRPC server port.
    pub grpc_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
    /// Prometheus metrics port (0 = disabled, metrics stay on the health
    /// port only).
    pub metrics_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            grpc_port: 50051,
            health_port: 8081,
            metrics_port: 9091,
        }
    }
}

/// Queue and stream buffer settings.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Outbound trade queue capacity.
    pub trade_queue_capacity: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            trade_queue_capacity: 100,
        }
    }
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    /// Server port settings.
    pub server: ServerSettings,
    /// Queue settings.
    pub queue: QueueSettings,
}

impl BridgeConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error when a provided port value is present but not a
    /// valid port number.
    pub fn from_env() -> Result<Self, ConfigError> {
        let server = ServerSettings {
            grpc_port: parse_env_port("BRIDGE_GRPC_PORT", ServerSettings::default().grpc_port)?,
            health_port: parse_env_port(
                "BRIDGE_HEALTH_PORT",
                ServerSettings::default().health_port,
            )?,
            metrics_port: parse_env_port(
                "BRIDGE_METRICS_PORT",
                ServerSettings::default().metrics_port,
            )?,
        };

        let queue = QueueSettings {
            trade_queue_capacity: parse_env_usize(
                "BRIDGE_TRADE_QUEUE_CAPACITY",
                QueueSettings::default().trade_queue_capacity,
            ),
        };

        Ok(Self { server, queue })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable holds a value that is not a valid port.
    #[error("environment variable {0} is not a valid port: {1}")]
    InvalidPort(String, String),
}

fn parse_env_port(key: &str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidPort(key.to_string(), value)),
        _ => Ok(default),
    }
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_settings_defaults() {
        let settings = ServerSettings::default();
        assert_eq!(settings.grpc_port, 50051);
        assert_eq!(settings.health_port, 8081);
        assert_eq!(settings.metrics_port, 9091);
    }

    #[test]
    fn queue_settings_defaults() {
        assert_eq!(QueueSettings::default().trade_queue_capacity, 100);
    }

    #[test]
    fn from_env_uses_defaults_when_unset() {
        // Env-var based tests share process state; only assert defaults for
        // variables this suite never sets.
        let config = BridgeConfig::from_env().unwrap();
        assert_eq!(config.queue.trade_queue_capacity, 100);
    }
}
