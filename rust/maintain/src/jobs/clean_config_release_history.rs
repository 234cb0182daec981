use super::cutoff_before;
use crate::context::JobContext;
use crate::drain::batch_drain;
use crate::job::{decode_option, JobConfigError, JobOption, MaintainJob};
use async_trait::async_trait;
use chrono::Utc;
use polaris_config::helpers::{clamp_floor, deserialize_humantime_duration};
use polaris_types::Store;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub const CLEAN_CONFIG_RELEASE_HISTORY: &str = "clean_config_release_history";

const MIN_RETENTION: Duration = Duration::from_secs(60);
const MIN_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CleanConfigReleaseHistoryConfig {
    #[serde(deserialize_with = "deserialize_humantime_duration")]
    pub retention: Duration,
    pub batch_size: u32,
    #[serde(deserialize_with = "deserialize_humantime_duration")]
    pub interval: Duration,
}

impl Default for CleanConfigReleaseHistoryConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(720 * 60 * 60),
            batch_size: 1000,
            interval: Duration::from_secs(60 * 60),
        }
    }
}

/// Trims config file release history older than the retention window. Runs
/// on its own, slower, configurable interval.
#[derive(Debug)]
pub struct CleanConfigReleaseHistoryJob {
    store: Arc<dyn Store>,
    config: CleanConfigReleaseHistoryConfig,
}

impl CleanConfigReleaseHistoryJob {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            config: CleanConfigReleaseHistoryConfig::default(),
        }
    }

    pub fn config(&self) -> &CleanConfigReleaseHistoryConfig {
        &self.config
    }
}

#[async_trait]
impl MaintainJob for CleanConfigReleaseHistoryJob {
    fn init(&mut self, option: &JobOption) -> Result<(), JobConfigError> {
        let mut config: CleanConfigReleaseHistoryConfig =
            decode_option(CLEAN_CONFIG_RELEASE_HISTORY, option)?;
        config.retention = clamp_floor(config.retention, MIN_RETENTION);
        config.interval = clamp_floor(config.interval, MIN_INTERVAL);
        config.batch_size = config.batch_size.max(1);
        self.config = config;
        Ok(())
    }

    async fn execute(&mut self, ctx: &JobContext) {
        let cutoff = cutoff_before(Utc::now(), self.config.retention);
        let store = self.store.as_ref();
        batch_drain(ctx, "config_release_history", self.config.batch_size, |batch| {
            store.clean_config_file_release_history(cutoff, batch)
        })
        .await;
    }

    fn clear(&mut self) {}

    fn interval(&self) -> Duration {
        self.config.interval
    }
}
