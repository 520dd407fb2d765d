//! Session configuration and FlexRay profiles
//!
//! Both load from YAML. Every [`SessionConfig`] field has a default, so a profile
//! only needs the values it changes:
//!
//! ```yaml
//! go_online_timeout: 2000   # milliseconds
//! polling_capacity: 5000
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::flexray::controller::ControllerTiming;
use crate::flexray::{ClusterConfig, ControllerConfig, FlexRayCluster, FlexRayController};
use crate::router::DEFAULT_POLLING_CAPACITY;
use crate::{DeviceError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bound on link-up confirmation and on coldstart synchronization.
    #[serde(with = "millis")]
    pub go_online_timeout: Duration,
    /// Bound on one request/response exchange with the unit.
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    pub polling_capacity: usize,
    /// Interval between POC status reads while waiting for FlexRay startup.
    #[serde(with = "millis")]
    pub flexray_poll_interval: Duration,
    /// Consecutive transport receive errors before the dispatch loop gives up.
    pub max_transport_errors: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            go_online_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_millis(500),
            polling_capacity: DEFAULT_POLLING_CAPACITY,
            flexray_poll_interval: Duration::from_millis(1),
            max_transport_errors: 10,
        }
    }
}

impl SessionConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.polling_capacity == 0 {
            return Err(DeviceError::configuration("polling_capacity must be at least 1"));
        }
        if self.max_transport_errors == 0 {
            return Err(DeviceError::configuration("max_transport_errors must be at least 1"));
        }
        if self.request_timeout.is_zero() || self.go_online_timeout.is_zero() {
            return Err(DeviceError::configuration("timeouts must be non-zero"));
        }
        Ok(())
    }

    pub(crate) fn controller_timing(&self) -> ControllerTiming {
        ControllerTiming {
            command_timeout: self.request_timeout,
            poll_interval: self.flexray_poll_interval,
        }
    }
}

/// One cluster and the controller configurations of the nodes on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlexRayProfile {
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub controllers: Vec<NodeProfile>,
}

/// A controller configuration plus the host-side start flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeProfile {
    pub name: String,
    #[serde(default)]
    pub allow_coldstart: bool,
    #[serde(default = "default_true")]
    pub start_when_going_online: bool,
    #[serde(default)]
    pub wakeup_before_start: bool,
    pub controller: ControllerConfig,
}

fn default_true() -> bool {
    true
}

impl NodeProfile {
    /// Configure `controller` as this node on `cluster`.
    pub fn apply(
        &self,
        controller: &FlexRayController,
        cluster: Arc<FlexRayCluster>,
    ) -> Result<()> {
        controller.set_configuration(cluster, self.controller.clone())?;
        controller.set_allow_coldstart(self.allow_coldstart)?;
        controller.set_start_when_going_online(self.start_when_going_online)?;
        controller.set_wakeup_before_start(self.wakeup_before_start)?;
        Ok(())
    }
}

/// Durations as whole milliseconds.
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

impl FlexRayProfile {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml_ng::from_str(yaml)?)
    }

    /// Read and validate a profile file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("reading FlexRay profile {}", path.display()))?;
        let profile = Self::from_yaml(&yaml)
            .with_context(|| format!("parsing FlexRay profile {}", path.display()))?;
        profile
            .validate()
            .with_context(|| format!("validating FlexRay profile {}", path.display()))?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<()> {
        self.cluster.validate()?;
        for node in &self.controllers {
            node.controller
                .validate(&self.cluster)
                .map_err(|e| DeviceError::configuration(format!("node {}: {}", node.name, e)))?;
        }
        Ok(())
    }

    pub fn node(&self, name: &str) -> Option<&NodeProfile> {
        self.controllers.iter().find(|node| node.name == name)
    }

    pub fn build_cluster(&self) -> Result<Arc<FlexRayCluster>> {
        FlexRayCluster::new(self.cluster.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = "go_online_timeout: 2000\npolling_capacity: 16\n";
        let config = SessionConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.go_online_timeout, Duration::from_secs(2));
        assert_eq!(config.polling_capacity, 16);
        assert_eq!(config.request_timeout, SessionConfig::default().request_timeout);
    }

    #[test]
    fn invalid_values_rejected() {
        let err = SessionConfig::from_yaml("polling_capacity: 0\n").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
        let err = SessionConfig::from_yaml("polling_capacity: [1, 2]\n").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn profile_round_trip() {
        let profile = FlexRayProfile {
            cluster: crate::test_utils::example_cluster_config(),
            controllers: vec![NodeProfile {
                name: "front".into(),
                allow_coldstart: true,
                start_when_going_online: true,
                wakeup_before_start: false,
                controller: crate::test_utils::example_controller_config(1),
            }],
        };
        let yaml = serde_yaml_ng::to_string(&profile).unwrap();
        let back = FlexRayProfile::from_yaml(&yaml).unwrap();
        assert_eq!(back, profile);
        back.validate().unwrap();
        assert!(back.node("front").unwrap().allow_coldstart);
    }

    #[test]
    fn load_reports_path_context() {
        let err = FlexRayProfile::load("/nonexistent/profile.yaml").unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/profile.yaml"));
    }
}
