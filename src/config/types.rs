// p2volley configuration types
// All settings with sensible defaults matching current hardcoded values

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    // TCP port the match server listens on (overridden by the PORT env var)
    pub listen_port: u16,

    // Liveness probe interval in milliseconds; a connection silent for more
    // than one full interval is treated as closed
    pub heartbeat_interval_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_port: 8080,
            heartbeat_interval_ms: 5000,
        }
    }
}

impl RelayConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    // Match server WebSocket URL
    pub server_url: String,

    // Bound on establishing the control-plane connection (including waiting
    // out a dial already in flight)
    pub connect_timeout_secs: u64,

    // Bound on the `created` reply after a create request
    pub create_timeout_secs: u64,

    // Bound on the `joined` reply after a join request; longer than create
    // since join is the latency-sensitive, user-waiting path
    pub join_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "wss://p2volley-match.up.railway.app".to_string(),
            connect_timeout_secs: 5,
            create_timeout_secs: 10,
            join_timeout_secs: 15,
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn create_timeout(&self) -> Duration {
        Duration::from_secs(self.create_timeout_secs)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }
}
