//! Node configuration
//!
//! Every section has defaults, so a config file only needs what differs:
//!
//! ```json
//! { "node_id": 1, "role": { "role": "controller" } }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tagmesh_core::NodeId;
use tagmesh_mesh::{MeshParams, RegistryConfig, RouterConfig, MAX_WINDOW};
use tagmesh_time::{ClockConfig, SyncConfig};

use crate::{ConfigError, LoggingConfig, Role, RoleConfig, SchedulerConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node_id: NodeId,
    /// Human-readable name; defaults to the role label
    pub label: Option<String>,
    pub mesh: MeshParams,
    pub role: RoleConfig,
    pub clock: ClockConfig,
    pub sync: SyncConfig,
    pub registry: RegistryConfig,
    pub router: RouterConfig,
    pub scheduler: SchedulerConfig,
    /// Neighbour beacon period (ms); zero disables beacons
    pub beacon_interval_ms: u64,
    pub logging: LoggingConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            node_id: NodeId::UNASSIGNED,
            label: None,
            mesh: MeshParams::default(),
            role: RoleConfig::default(),
            clock: ClockConfig::default(),
            sync: SyncConfig::default(),
            registry: RegistryConfig::default(),
            router: RouterConfig::default(),
            scheduler: SchedulerConfig::default(),
            beacon_interval_ms: 1000,
            logging: LoggingConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Hardware verification firmware settings for the given role
    pub fn hardware_verification(role: Role, node_id: NodeId) -> Self {
        NodeConfig {
            node_id,
            mesh: MeshParams::hardware_verification(),
            role: match role {
                Role::Controller => RoleConfig::controller(),
                Role::Target => RoleConfig::target(),
            },
            ..Default::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn label(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| self.role.role.label().to_string())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.node_id.is_assigned() {
            return Err(ConfigError::Invalid("node_id must be non-zero".into()));
        }
        if self.router.max_outbound == 0 {
            return Err(ConfigError::Invalid("router.max_outbound must be non-zero".into()));
        }
        if self.router.max_hops == 0 {
            return Err(ConfigError::Invalid("router.max_hops must be non-zero".into()));
        }
        if self.router.dedup_window == 0 || self.router.dedup_window > MAX_WINDOW {
            return Err(ConfigError::Invalid(format!(
                "router.dedup_window must be within 1..={}",
                MAX_WINDOW
            )));
        }
        if self.sync.interval_ms == 0 {
            return Err(ConfigError::Invalid("sync.interval_ms must be non-zero".into()));
        }
        if self.registry.peer_timeout_ms <= self.sync.interval_ms {
            return Err(ConfigError::Invalid(
                "registry.peer_timeout_ms must exceed sync.interval_ms".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_json() {
        let config = NodeConfig::from_json_str(r#"{"node_id": 7, "role": {"role": "controller"}}"#)
            .unwrap();
        assert_eq!(config.node_id, NodeId::new(7));
        assert_eq!(config.role.role, Role::Controller);
        assert_eq!(config.role.timings.laser_ms, 17);
        assert_eq!(config.mesh, MeshParams::hardware_verification());
        assert_eq!(config.label(), "Controller");
    }

    #[test]
    fn test_overrides() {
        let json = r#"{
            "node_id": 3,
            "label": "bench",
            "sync": {"transit_estimate_ms": 10},
            "router": {"max_hops": 3},
            "mesh": {"prefix": "lab", "password": "pw", "port": 1}
        }"#;
        let config = NodeConfig::from_json_str(json).unwrap();
        assert_eq!(config.label(), "bench");
        assert_eq!(config.sync.transit_estimate_ms, 10);
        assert_eq!(config.sync.interval_ms, 1000);
        assert_eq!(config.router.max_hops, 3);
        assert_eq!(config.router.max_outbound, 64);
        assert_eq!(config.mesh.port, 1);
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            NodeConfig::from_json_str("{}"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            NodeConfig::from_json_str(r#"{"node_id": 1, "router": {"dedup_window": 65}}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            NodeConfig::from_json_str("not json"),
            Err(ConfigError::Parse(_))
        ));
        assert!(NodeConfig::hardware_verification(Role::Target, NodeId::new(2))
            .validate()
            .is_ok());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            NodeConfig::load("/nonexistent/tagmesh.json"),
            Err(ConfigError::Io(_))
        ));
    }
}
