use polaris_config::assignment::config::ConsistentHashConfig;
use polaris_config::helpers::{clamp_floor, deserialize_humantime_duration};
use serde::Deserialize;
use std::time::Duration;

const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServiceReaperConfig {
    pub open: bool,
    /// Namespace of the service maintenance nodes register themselves under.
    pub namespace: String,
    pub service: String,
    /// This node's host as it appears in its own self-service registration.
    pub local_host: String,
    #[serde(deserialize_with = "deserialize_humantime_duration")]
    pub check_interval: Duration,
    /// How long a service must have gone unmodified before it can be reaped.
    #[serde(deserialize_with = "deserialize_humantime_duration")]
    pub expire_time: Duration,
    pub check_count_before_clean: u32,
    pub ignored_namespaces: Vec<String>,
    pub ring: ConsistentHashConfig,
}

impl Default for ServiceReaperConfig {
    fn default() -> Self {
        Self {
            open: false,
            namespace: "Polaris".to_string(),
            service: "polaris.maintain".to_string(),
            local_host: String::new(),
            check_interval: Duration::from_secs(60),
            expire_time: Duration::from_secs(60 * 60),
            check_count_before_clean: 3,
            ignored_namespaces: vec!["Polaris".to_string()],
            ring: ConsistentHashConfig::default(),
        }
    }
}

impl ServiceReaperConfig {
    pub fn threshold(&self) -> u32 {
        self.check_count_before_clean.max(1)
    }

    /// `check_interval`, raised to one second so the loop never spins.
    pub fn interval(&self) -> Duration {
        clamp_floor(self.check_interval, MIN_CHECK_INTERVAL)
    }

    pub(crate) fn is_ignored(&self, namespace: &str, name: &str) -> bool {
        (namespace == self.namespace && name == self.service)
            || self.ignored_namespaces.iter().any(|ns| ns == namespace)
    }
}
