//! Connection and server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Settings for one connection's workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Delay between the end of one worker invocation and the start of
    /// the next. Applies to all four workers.
    pub worker_cadence: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            worker_cadence: Duration::from_millis(10),
        }
    }
}

impl ConnectionConfig {
    pub const MIN_CADENCE: Duration = Duration::from_millis(1);

    pub fn with_cadence(worker_cadence: Duration) -> Self {
        Self { worker_cadence }
    }

    /// Clamps out-of-range values. Called when a connection is built.
    pub fn validated(mut self) -> Self {
        if self.worker_cadence < Self::MIN_CADENCE {
            warn!(
                cadence_us = self.worker_cadence.as_micros() as u64,
                "worker_cadence below 1ms, clamping"
            );
            self.worker_cadence = Self::MIN_CADENCE;
        }
        self
    }
}

/// Settings for a [`Server`](crate::Server).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the listener binds to. Port 0 picks a free port.
    pub bind_addr: String,
    /// Delay between accept attempts.
    pub accept_cadence: Duration,
    /// Settings for every connection the server accepts. Overrides the
    /// config of the connection builder it was given.
    pub connection: ConnectionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            accept_cadence: Duration::from_millis(10),
            connection: ConnectionConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn bind(addr: impl Into<String>) -> Self {
        Self {
            bind_addr: addr.into(),
            ..Default::default()
        }
    }

    pub fn validated(mut self) -> Self {
        if self.accept_cadence < ConnectionConfig::MIN_CADENCE {
            warn!(
                cadence_us = self.accept_cadence.as_micros() as u64,
                "accept_cadence below 1ms, clamping"
            );
            self.accept_cadence = ConnectionConfig::MIN_CADENCE;
        }
        self.connection = self.connection.validated();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.bind_addr, "127.0.0.1:0");
        assert_eq!(cfg.accept_cadence, Duration::from_millis(10));
        assert_eq!(cfg.connection.worker_cadence, Duration::from_millis(10));
    }

    #[test]
    fn test_validated_clamps_zero_cadence() {
        let cfg = ServerConfig {
            accept_cadence: Duration::ZERO,
            connection: ConnectionConfig::with_cadence(Duration::from_micros(10)),
            ..Default::default()
        }
        .validated();
        assert_eq!(cfg.accept_cadence, Duration::from_millis(1));
        assert_eq!(cfg.connection.worker_cadence, Duration::from_millis(1));
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let cfg = ServerConfig::bind("0.0.0.0:7777");
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}
