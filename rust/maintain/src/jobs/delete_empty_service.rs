use super::{cutoff_before, DEFAULT_JOB_INTERVAL};
use crate::context::JobContext;
use crate::job::{decode_option, JobConfigError, JobOption, MaintainJob};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use polaris_config::helpers::{clamp_floor, deserialize_humantime_duration};
use polaris_types::{CacheManager, DiscoveryServer, ResponseCode, Service};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const DELETE_EMPTY_SERVICE: &str = "delete_empty_service";

const MIN_SERVICE_DELETE_TIMEOUT: Duration = Duration::from_secs(2 * 60);
const DELETE_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeleteEmptyServiceConfig {
    #[serde(deserialize_with = "deserialize_humantime_duration")]
    pub service_delete_timeout: Duration,
}

impl Default for DeleteEmptyServiceConfig {
    fn default() -> Self {
        Self {
            service_delete_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Deletes services that have had no instance for longer than the timeout.
///
/// A service becomes a candidate the first tick it is seen empty, and is only
/// deleted on a later tick once it has stayed empty past the timeout. Any
/// service that is no longer empty drops out of the candidate map, so a
/// service that briefly loses all instances is never deleted.
#[derive(Debug)]
pub struct DeleteEmptyServiceJob {
    cache: Arc<dyn CacheManager>,
    discovery: Arc<dyn DiscoveryServer>,
    config: DeleteEmptyServiceConfig,
    // Service id to the time it was first seen empty.
    empty_services: HashMap<String, DateTime<Utc>>,
}

impl DeleteEmptyServiceJob {
    pub fn new(cache: Arc<dyn CacheManager>, discovery: Arc<dyn DiscoveryServer>) -> Self {
        Self {
            cache,
            discovery,
            config: DeleteEmptyServiceConfig::default(),
            empty_services: HashMap::new(),
        }
    }

    pub fn config(&self) -> &DeleteEmptyServiceConfig {
        &self.config
    }

    pub fn candidates(&self) -> &HashMap<String, DateTime<Utc>> {
        &self.empty_services
    }

    fn empty_services_in_cache(&self) -> Vec<Service> {
        let mut services = Vec::new();
        self.cache.iterate_services(&mut |svc| {
            if !svc.is_alias() {
                services.push(svc.clone());
            }
            true
        });
        services.retain(|svc| self.cache.instances_count_by_service_id(&svc.id).total == 0);
        services
    }

    /// Rebuilds the candidate map from the services that are empty right now
    /// and returns the ones that have been empty for longer than `timeout`.
    /// Those are left out of the new map.
    pub fn filter_to_deleted_services(
        &mut self,
        empty: Vec<Service>,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Vec<Service> {
        let deadline = cutoff_before(now, timeout);
        let mut candidates = HashMap::with_capacity(empty.len());
        let mut to_delete = Vec::new();
        for svc in empty {
            match self.empty_services.get(&svc.id) {
                Some(first_seen) if *first_seen < deadline => to_delete.push(svc),
                Some(first_seen) => {
                    candidates.insert(svc.id.clone(), *first_seen);
                }
                None => {
                    candidates.insert(svc.id.clone(), now);
                }
            }
        }
        self.empty_services = candidates;
        to_delete
    }
}

#[async_trait]
impl MaintainJob for DeleteEmptyServiceJob {
    fn init(&mut self, option: &JobOption) -> Result<(), JobConfigError> {
        let mut config: DeleteEmptyServiceConfig = decode_option(DELETE_EMPTY_SERVICE, option)?;
        config.service_delete_timeout =
            clamp_floor(config.service_delete_timeout, MIN_SERVICE_DELETE_TIMEOUT);
        self.config = config;
        Ok(())
    }

    async fn execute(&mut self, ctx: &JobContext) {
        let empty = self.empty_services_in_cache();
        let to_delete =
            self.filter_to_deleted_services(empty, Utc::now(), self.config.service_delete_timeout);
        if to_delete.is_empty() {
            return;
        }

        let mut deleted = 0u64;
        for (i, chunk) in to_delete.chunks(DELETE_BATCH_SIZE).enumerate() {
            if i > 0 && ctx.should_stop().await {
                break;
            }
            let resp = self
                .discovery
                .delete_services(ctx.request_ctx(), chunk.to_vec())
                .await;
            if resp.responses.is_empty() && !resp.code.is_deleted() {
                tracing::error!(
                    code = ?resp.code,
                    info = %resp.info,
                    "[Maintain][Job] delete empty services failed"
                );
                continue;
            }
            for failed in resp.failures() {
                if failed.code == ResponseCode::ServiceExistedInstances {
                    tracing::info!(
                        service_id = %failed.id,
                        "[Maintain][Job] service registered instances again, skip delete"
                    );
                } else {
                    tracing::error!(
                        service_id = %failed.id,
                        code = ?failed.code,
                        info = %failed.info,
                        "[Maintain][Job] delete empty service failed"
                    );
                }
            }
            deleted += resp
                .responses
                .iter()
                .filter(|r| r.code == ResponseCode::ExecuteSuccess)
                .count() as u64;
        }

        ctx.metrics().record_services_deleted("job", deleted);
        if deleted > 0 {
            tracing::info!(count = deleted, "[Maintain][Job] deleted empty services");
        }
    }

    fn clear(&mut self) {
        self.empty_services.clear();
    }

    fn interval(&self) -> Duration {
        DEFAULT_JOB_INTERVAL
    }
}
