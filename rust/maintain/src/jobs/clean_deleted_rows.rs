use super::resource::ResourceKind;
use super::{cutoff_before, DEFAULT_JOB_INTERVAL};
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

pub const CLEAN_DELETED_INSTANCES: &str = "clean_deleted_instances";
pub const CLEAN_DELETED_CLIENTS: &str = "clean_deleted_clients";

const MIN_CLEAN_TIMEOUT: Duration = Duration::from_secs(2 * 60);

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CleanDeletedRowsConfig {
    #[serde(deserialize_with = "deserialize_humantime_duration")]
    pub clean_timeout: Duration,
    pub batch_size: u32,
}

impl Default for CleanDeletedRowsConfig {
    fn default() -> Self {
        Self {
            clean_timeout: Duration::from_secs(10 * 60),
            batch_size: 100,
        }
    }
}

/// Hard-deletes the rows of one table that were soft-deleted long enough ago.
///
/// Each job names its timeout option after its table (`instance_clean_timeout`,
/// `client_clean_timeout`); the key of the other job is ignored.
#[derive(Debug)]
pub struct CleanDeletedRowsJob {
    name: &'static str,
    resource: ResourceKind,
    timeout_key: &'static str,
    store: Arc<dyn Store>,
    config: CleanDeletedRowsConfig,
}

impl CleanDeletedRowsJob {
    pub fn instances(store: Arc<dyn Store>) -> Self {
        Self::new(
            CLEAN_DELETED_INSTANCES,
            ResourceKind::Instance,
            "instance_clean_timeout",
            store,
        )
    }

    pub fn clients(store: Arc<dyn Store>) -> Self {
        Self::new(
            CLEAN_DELETED_CLIENTS,
            ResourceKind::Client,
            "client_clean_timeout",
            store,
        )
    }

    fn new(
        name: &'static str,
        resource: ResourceKind,
        timeout_key: &'static str,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            name,
            resource,
            timeout_key,
            store,
            config: CleanDeletedRowsConfig::default(),
        }
    }

    pub fn config(&self) -> &CleanDeletedRowsConfig {
        &self.config
    }
}

#[async_trait]
impl MaintainJob for CleanDeletedRowsJob {
    fn init(&mut self, option: &JobOption) -> Result<(), JobConfigError> {
        let mut option = option.clone();
        option.remove("clean_timeout");
        if let Some(timeout) = option.remove(self.timeout_key) {
            option.insert("clean_timeout".to_string(), timeout);
        }
        let mut config: CleanDeletedRowsConfig = decode_option(self.name, &option)?;
        config.clean_timeout = clamp_floor(config.clean_timeout, MIN_CLEAN_TIMEOUT);
        config.batch_size = config.batch_size.max(1);
        self.config = config;
        Ok(())
    }

    async fn execute(&mut self, ctx: &JobContext) {
        let cutoff = cutoff_before(Utc::now(), self.config.clean_timeout);
        let (store, resource) = (self.store.as_ref(), self.resource);
        batch_drain(ctx, resource.as_str(), self.config.batch_size, |batch| {
            resource.clean(store, cutoff, batch)
        })
        .await;
    }

    fn clear(&mut self) {}

    fn interval(&self) -> Duration {
        DEFAULT_JOB_INTERVAL
    }
}
