//! Node configuration, loaded from a JSON file.
//!
//! ```json
//! {
//!   "service_id": "chat",
//!   "invite_timeout_secs": 15,
//!   "application_port": 8080
//! }
//! ```
//!
//! Every field is optional; missing fields take the defaults below.

use std::path::Path;

use crate::error::ConfigError;

fn default_service_id() -> String {
    "peerlink".to_string()
}

/// Configuration of one [`Node`](crate::Node).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name advertised and browsed for. Only nodes sharing it see each other.
    pub service_id: String,

    /// Fixed identifier for this node. A fresh one is generated when unset.
    pub peer_identifier: Option<peerlink_id::PeerIdentifier>,

    /// Passed through to the transport for every outbound invitation.
    pub invite_timeout_secs: u64,

    /// Local TCP server that accepted sessions are relayed to. When unset,
    /// accepted sessions wait for [`Node::open_relay`](crate::Node::open_relay).
    pub application_port: Option<u16>,

    /// Capacity of the peer event channel handed to the application.
    pub event_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_id: default_service_id(),
            peer_identifier: None,
            invite_timeout_secs: 30,
            application_port: None,
            event_buffer: 64,
        }
    }
}

impl Config {
    pub fn invite_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.invite_timeout_secs)
    }

    /// Read and validate a JSON config file.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let config: Config = serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        tracing::debug!(path = %path.display(), ?config, "loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_id.trim().is_empty() {
            return Err(ConfigError::Invalid {
                reason: "service_id must not be empty".to_string(),
            });
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid {
                reason: "event_buffer must be at least 1".to_string(),
            });
        }
        if self.application_port == Some(0) {
            return Err(ConfigError::Invalid {
                reason: "application_port must not be 0".to_string(),
            });
        }
        Ok(())
    }
}
