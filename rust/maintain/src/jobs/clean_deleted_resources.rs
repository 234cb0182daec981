use super::resource::ResourceKind;
use super::{cutoff_before, DEFAULT_JOB_INTERVAL};
use crate::context::JobContext;
use crate::drain::{batch_drain, DrainStatus};
use crate::job::{decode_option, JobConfigError, JobOption, MaintainJob};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use polaris_config::helpers::{clamp_floor, deserialize_humantime_duration};
use polaris_types::Store;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

pub const CLEAN_DELETED_RESOURCES: &str = "clean_deleted_resources";

const MIN_RESOURCE_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_RESOURCE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

fn default_enable() -> bool {
    true
}

fn default_resource_timeout() -> Duration {
    DEFAULT_RESOURCE_TIMEOUT
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResourceCleanConfig {
    pub name: ResourceKind,
    #[serde(default = "default_enable")]
    pub enable: bool,
    #[serde(
        default = "default_resource_timeout",
        deserialize_with = "deserialize_humantime_duration"
    )]
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CleanDeletedResourcesConfig {
    pub resources: Vec<ResourceCleanConfig>,
    pub batch_size: u32,
}

impl Default for CleanDeletedResourcesConfig {
    fn default() -> Self {
        Self {
            resources: ResourceKind::ALL
                .into_iter()
                .map(|name| ResourceCleanConfig {
                    name,
                    enable: true,
                    timeout: DEFAULT_RESOURCE_TIMEOUT,
                })
                .collect(),
            batch_size: 100,
        }
    }
}

/// Drains every enabled resource table concurrently. Resources are
/// independent; a failure on one table does not hold back the others.
#[derive(Debug)]
pub struct CleanDeletedResourcesJob {
    store: Arc<dyn Store>,
    config: CleanDeletedResourcesConfig,
}

impl CleanDeletedResourcesJob {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            config: CleanDeletedResourcesConfig::default(),
        }
    }

    pub fn config(&self) -> &CleanDeletedResourcesConfig {
        &self.config
    }
}

#[async_trait]
impl MaintainJob for CleanDeletedResourcesJob {
    fn init(&mut self, option: &JobOption) -> Result<(), JobConfigError> {
        let mut config: CleanDeletedResourcesConfig = decode_option(CLEAN_DELETED_RESOURCES, option)?;
        let mut seen = HashSet::new();
        for resource in config.resources.iter_mut() {
            if !seen.insert(resource.name) {
                return Err(JobConfigError::Invalid {
                    job: CLEAN_DELETED_RESOURCES.to_string(),
                    reason: format!("resource [{}] is listed more than once", resource.name),
                });
            }
            resource.timeout = clamp_floor(resource.timeout, MIN_RESOURCE_TIMEOUT);
        }
        config.batch_size = config.batch_size.max(1);
        self.config = config;
        Ok(())
    }

    async fn execute(&mut self, ctx: &JobContext) {
        let now = Utc::now();
        let store = self.store.as_ref();
        let batch_size = self.config.batch_size;

        let drains = self
            .config
            .resources
            .iter()
            .filter(|resource| resource.enable)
            .map(|resource| {
                let kind = resource.name;
                let cutoff = cutoff_before(now, resource.timeout);
                async move {
                    let outcome = batch_drain(ctx, kind.as_str(), batch_size, move |batch| {
                        kind.clean(store, cutoff, batch)
                    })
                    .await;
                    (kind, outcome)
                }
            });

        for (kind, outcome) in join_all(drains).await {
            if outcome.status != DrainStatus::Exhausted {
                tracing::warn!(
                    job = CLEAN_DELETED_RESOURCES,
                    resource = %kind,
                    status = ?outcome.status,
                    "[Maintain][Job] resource clean ended early"
                );
            }
        }
    }

    fn clear(&mut self) {}

    fn interval(&self) -> Duration {
        DEFAULT_JOB_INTERVAL
    }
}
